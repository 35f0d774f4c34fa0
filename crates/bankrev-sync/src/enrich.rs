//! Sentiment scoring, theme assignment and id assignment for collected reviews.

use std::collections::{BTreeMap, BTreeSet};

use bankrev_core::{
    EnrichedRecord, ReviewIdStrategy, ReviewRecord, Sentiment, SentimentLabel, OTHER_THEME,
};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::normalize::TextNormalizer;
use crate::sentiment::SentimentClassifier;
use crate::themes::ThemeTable;

/// Classifier input is cut to this many whitespace-delimited tokens.
pub const MAX_CLASSIFIER_TOKENS: usize = 512;

/// Share of non-zero sentiment scores below which a run is flagged.
pub const MIN_SENTIMENT_COVERAGE: f64 = 0.9;

/// Sources with fewer themes than this are flagged.
pub const MIN_THEMES_PER_SOURCE: usize = 3;

pub fn truncate_tokens(text: &str, max_tokens: usize) -> String {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() <= max_tokens {
        return text.to_string();
    }
    tokens[..max_tokens].join(" ")
}

/// Apply the `Other` fallback to an assigned theme list.
pub fn themes_or_other(themes: Vec<String>) -> Vec<String> {
    if themes.is_empty() {
        vec![OTHER_THEME.to_string()]
    } else {
        themes
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrichOutcome {
    pub records: Vec<EnrichedRecord>,
    pub classifier_failures: usize,
}

/// Score, theme and number every record, one classifier call at a time.
/// Classifier failures degrade that record to neutral and the batch goes on.
pub async fn enrich(
    records: &[ReviewRecord],
    classifier: &dyn SentimentClassifier,
    normalizer: &TextNormalizer,
    themes: &ThemeTable,
    id_strategy: ReviewIdStrategy,
) -> EnrichOutcome {
    let span = info_span!("enrich", records = records.len(), classifier = classifier.name());
    async move {
        let matcher = themes.matcher(normalizer);
        let mut unknown_sources: BTreeSet<&str> = BTreeSet::new();
        let mut classifier_failures = 0usize;
        let mut enriched = Vec::with_capacity(records.len());

        for (position, record) in records.iter().enumerate() {
            let review_id = id_strategy.assign(position, record);
            let sentiment = if record.review_text.trim().is_empty() {
                Sentiment::neutral()
            } else {
                let input = truncate_tokens(&record.review_text, MAX_CLASSIFIER_TOKENS);
                match classifier.classify(&input).await {
                    Ok(output) => Sentiment::from_classifier(&output),
                    Err(err) => {
                        classifier_failures += 1;
                        warn!(review_id, error = %err, "classification failed; defaulting to neutral");
                        Sentiment::neutral()
                    }
                }
            };

            if !matcher.knows_source(&record.source_name)
                && unknown_sources.insert(record.source_name.as_str())
            {
                warn!(source = %record.source_name, "no theme table for source; reviews fall back to Other");
            }
            let identified_themes =
                themes_or_other(matcher.assign(&record.source_name, &record.review_text));

            enriched.push(EnrichedRecord {
                review_id,
                review_text: record.review_text.clone(),
                rating: Some(record.rating),
                date: record.date,
                source_name: record.source_name.clone(),
                origin: record.origin.clone(),
                sentiment_label: sentiment.label,
                sentiment_score: sentiment.score,
                identified_themes,
            });
        }

        info!(enriched = enriched.len(), classifier_failures, "enrichment finished");
        EnrichOutcome {
            records: enriched,
            classifier_failures,
        }
    }
    .instrument(span)
    .await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceInsights {
    pub reviews: usize,
    pub mean_score_by_rating: BTreeMap<u8, f64>,
    pub label_counts: BTreeMap<String, usize>,
    pub theme_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichSummary {
    pub records: usize,
    pub coverage: f64,
    pub per_source: BTreeMap<String, SourceInsights>,
    pub sparse_theme_sources: Vec<String>,
}

/// Aggregate figures for the run report; logs the quality warnings.
pub fn summarize(records: &[EnrichedRecord], themes: &ThemeTable) -> EnrichSummary {
    let mut per_source: BTreeMap<String, SourceInsights> = BTreeMap::new();
    let mut score_sums: BTreeMap<(String, u8), (f64, usize)> = BTreeMap::new();
    let mut scored = 0usize;

    for record in records {
        if record.sentiment_score != 0.0 {
            scored += 1;
        }
        let insights = per_source.entry(record.source_name.clone()).or_default();
        insights.reviews += 1;
        *insights
            .label_counts
            .entry(record.sentiment_label.as_str().to_string())
            .or_default() += 1;
        for theme in &record.identified_themes {
            *insights.theme_counts.entry(theme.clone()).or_default() += 1;
        }
        if let Some(rating) = record.rating {
            let slot = score_sums
                .entry((record.source_name.clone(), rating))
                .or_default();
            slot.0 += record.sentiment_score;
            slot.1 += 1;
        }
    }

    for ((source, rating), (sum, count)) in score_sums {
        let mean = sum / count as f64;
        info!(source = %source, rating, mean_score = mean, "mean sentiment");
        if let Some(insights) = per_source.get_mut(&source) {
            insights.mean_score_by_rating.insert(rating, mean);
        }
    }

    let coverage = if records.is_empty() {
        0.0
    } else {
        scored as f64 / records.len() as f64
    };
    if coverage < MIN_SENTIMENT_COVERAGE {
        warn!(coverage, "sentiment coverage below 90%");
    } else {
        info!(coverage, "sentiment coverage");
    }

    for (source, insights) in &per_source {
        for (theme, count) in &insights.theme_counts {
            info!(source = %source, theme = %theme, count, "theme distribution");
        }
        let neutral = insights
            .label_counts
            .get(SentimentLabel::Neutral.as_str())
            .copied()
            .unwrap_or_default();
        info!(source = %source, reviews = insights.reviews, neutral, "source summary");
    }

    let sparse_theme_sources: Vec<String> = themes
        .sources()
        .filter(|(_, rules)| rules.len() < MIN_THEMES_PER_SOURCE)
        .map(|(source, _)| source.to_string())
        .collect();
    for source in &sparse_theme_sources {
        warn!(source = %source, "fewer than 3 themes configured");
    }

    EnrichSummary {
        records: records.len(),
        coverage,
        per_source,
        sparse_theme_sources,
    }
}
