use std::collections::HashSet;
use std::time::Duration;

use bankrev_core::ReviewRecord;
use bankrev_storage::Throttle;
use tracing::{info, info_span, warn, Instrument};

use crate::{ListingRequest, ReviewListing, TrackedSource};

#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub page_size: usize,
    pub max_attempts: u32,
    pub throttle: Duration,
    pub lang: String,
    pub country: String,
    pub sort: String,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            page_size: 200,
            max_attempts: 6,
            throttle: Duration::from_secs(1),
            lang: "en".to_string(),
            country: "et".to_string(),
            sort: "newest".to_string(),
        }
    }
}

/// Page through the listing for one source until the target is reached, the
/// cursor runs out, or `max_attempts` consecutive pages come back empty.
///
/// Listing errors end the loop and the records gathered so far are returned.
pub async fn collect(
    listing: &dyn ReviewListing,
    source: &TrackedSource,
    options: &CollectorOptions,
) -> Vec<ReviewRecord> {
    let span = info_span!(
        "collect",
        source = %source.source_name,
        app_id = %source.app_id,
        target = source.target,
        adapter = listing.name(),
    );
    async move {
        let throttle = Throttle::new(options.throttle);
        let mut records: Vec<ReviewRecord> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut empty_attempts = 0u32;
        let mut first_call = true;

        while records.len() < source.target {
            if !first_call {
                throttle.pause().await;
            }
            first_call = false;

            let request = ListingRequest {
                app_id: source.app_id.clone(),
                lang: options.lang.clone(),
                country: options.country.clone(),
                sort: options.sort.clone(),
                count: options.page_size.min(source.target - records.len()),
                continuation_token: cursor.clone(),
            };

            let page = match listing.fetch_page(&request).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(error = %err, collected = records.len(), "listing failed; keeping partial results");
                    break;
                }
            };

            let next_cursor = page.continuation_token.filter(|token| !token.is_empty());
            if page.reviews.is_empty() {
                empty_attempts += 1;
                warn!(attempt = empty_attempts, max_attempts = options.max_attempts, "empty page");
                if empty_attempts >= options.max_attempts {
                    warn!("giving up after consecutive empty pages");
                    break;
                }
                if next_cursor.is_none() {
                    break;
                }
                continue;
            }

            empty_attempts = 0;
            records.extend(
                page.reviews
                    .into_iter()
                    .map(|review| review.into_record(&source.source_name)),
            );
            info!(collected = records.len(), "page collected");

            match next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(collected = records.len(), "collection finished");
        records
    }
    .instrument(span)
    .await
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalizedCollection {
    pub records: Vec<ReviewRecord>,
    pub duplicates_removed: usize,
    pub invalid_removed: usize,
}

/// Exact-match dedup on (text, date), first occurrence wins, then drop
/// records that fail validity.
pub fn finalize_collection(records: Vec<ReviewRecord>) -> FinalizedCollection {
    let total = records.len();
    let mut seen = HashSet::with_capacity(total);
    let unique: Vec<ReviewRecord> = records
        .into_iter()
        .filter(|record| seen.insert(record.dedup_key()))
        .collect();
    let duplicates_removed = total - unique.len();

    let before_validity = unique.len();
    let records: Vec<ReviewRecord> = unique.into_iter().filter(ReviewRecord::is_valid).collect();
    let invalid_removed = before_validity - records.len();

    FinalizedCollection {
        records,
        duplicates_removed,
        invalid_removed,
    }
}
