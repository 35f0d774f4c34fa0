use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use bankrev_adapters::{adapter_for_source, collect, finalize_collection, CollectorOptions};
use bankrev_core::{EnrichedRecord, ReviewRecord};
use bankrev_storage::{
    read_enriched_reviews, read_raw_reviews, write_enriched_reviews, write_raw_reviews,
    HttpClientConfig, HttpFetcher, ReviewStore,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::enrich::{enrich, summarize, EnrichSummary};
use crate::keywords::{corpus_from_records, keywords_by_source, KeywordOptions};
use crate::normalize::TextNormalizer;
use crate::report::{write_analysis_brief, BriefInput};
use crate::sentiment::{HttpSentimentClassifier, LexiconSentimentClassifier, SentimentClassifier};
use crate::themes::ThemeTable;
use crate::{SourceRegistry, SyncConfig};

#[derive(Debug, Clone, Serialize)]
pub struct CollectRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub collected: usize,
    pub duplicates_removed: usize,
    pub invalid_removed: usize,
    pub per_source: BTreeMap<String, usize>,
    pub written: usize,
    pub raw_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: usize,
    pub classifier: String,
    pub classifier_failures: usize,
    pub coverage: f64,
    pub enriched_path: String,
    pub report_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeywordsRunSummary {
    pub run_id: Uuid,
    pub records: usize,
    pub keywords: BTreeMap<String, Vec<String>>,
    pub report_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub inserted: usize,
    pub skipped: usize,
    pub total_reviews: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FullRunSummary {
    pub collect: CollectRunSummary,
    pub enrich: Option<EnrichRunSummary>,
    pub load: Option<LoadRunSummary>,
}

pub struct SyncPipeline {
    config: SyncConfig,
    registry: SourceRegistry,
    themes: ThemeTable,
    http: HttpFetcher,
    classifier: Box<dyn SentimentClassifier>,
    normalizer: TextNormalizer,
    collector: CollectorOptions,
    keywords: KeywordOptions,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        let registry = SourceRegistry::load(&config.workspace_root)?;
        let themes = ThemeTable::load(&config.workspace_root)?;
        let classifier: Box<dyn SentimentClassifier> = match &config.classifier_url {
            Some(url) => Box::new(HttpSentimentClassifier::new(
                http.clone(),
                url.clone(),
                config.classifier_token.clone(),
            )),
            None => {
                info!("no classifier endpoint configured; using lexicon classifier");
                Box::new(LexiconSentimentClassifier)
            }
        };
        let collector = CollectorOptions {
            throttle: config.throttle(),
            ..CollectorOptions::default()
        };
        Ok(Self {
            config,
            registry,
            themes,
            http,
            classifier,
            normalizer: TextNormalizer::new(),
            collector,
            keywords: KeywordOptions::default(),
        })
    }

    pub fn with_registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn SentimentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_theme_table(mut self, themes: ThemeTable) -> Self {
        self.themes = themes;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn run_collect(&self) -> Result<CollectRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("collect_run", run_id = %run_id);
        self.collect_stage(run_id).instrument(span).await
    }

    async fn collect_stage(&self, run_id: Uuid) -> Result<CollectRunSummary> {
        let started_at = Utc::now();
        let mut collected: Vec<ReviewRecord> = Vec::new();

        for source in &self.registry.sources {
            let listing = match adapter_for_source(source, &self.http, &self.config.listing_url) {
                Ok(listing) => listing,
                Err(err) => {
                    warn!(source = %source.source_name, error = %err, "no listing available; skipping source");
                    continue;
                }
            };
            let records = collect(listing.as_ref(), source, &self.collector).await;
            collected.extend(records);
        }

        let total = collected.len();
        let finalized = finalize_collection(collected);
        info!(
            collected = total,
            duplicates = finalized.duplicates_removed,
            invalid = finalized.invalid_removed,
            kept = finalized.records.len(),
            "collection finalized"
        );

        let mut per_source: BTreeMap<String, usize> = BTreeMap::new();
        for record in &finalized.records {
            *per_source.entry(record.source_name.clone()).or_default() += 1;
        }
        for source in &self.registry.sources {
            let count = per_source.get(&source.source_name).copied().unwrap_or_default();
            info!(source = %source.source_name, count, "reviews kept");
            if count < source.target {
                warn!(source = %source.source_name, count, target = source.target, "collected fewer reviews than targeted");
            }
        }

        let raw_path = if finalized.records.is_empty() {
            warn!("no reviews collected; raw checkpoint not written");
            None
        } else {
            let path = self.config.raw_path();
            write_raw_reviews(&path, &finalized.records)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            Some(path.display().to_string())
        };

        Ok(CollectRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            collected: total,
            duplicates_removed: finalized.duplicates_removed,
            invalid_removed: finalized.invalid_removed,
            per_source,
            written: finalized.records.len(),
            raw_path,
        })
    }

    pub async fn run_enrich(&self) -> Result<EnrichRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("enrich_run", run_id = %run_id);
        self.enrich_stage(run_id).instrument(span).await
    }

    async fn enrich_stage(&self, run_id: Uuid) -> Result<EnrichRunSummary> {
        let started_at = Utc::now();
        let raw_path = self.config.raw_path();
        let records = read_raw_reviews(&raw_path)
            .await
            .with_context(|| format!("reading {}", raw_path.display()))?;
        info!(records = records.len(), path = %raw_path.display(), "raw checkpoint read");

        let outcome = enrich(
            &records,
            self.classifier.as_ref(),
            &self.normalizer,
            &self.themes,
            self.config.review_ids,
        )
        .await;

        let enriched_path = self.config.enriched_path();
        write_enriched_reviews(&enriched_path, &outcome.records)
            .await
            .with_context(|| format!("writing {}", enriched_path.display()))?;

        let summary = summarize(&outcome.records, &self.themes);
        let keywords = self.extract_keywords(&outcome.records);
        let finished_at = Utc::now();
        let report_path = self
            .write_brief(run_id, "enrich", started_at, finished_at, &summary, &keywords)
            .await?;

        Ok(EnrichRunSummary {
            run_id,
            started_at,
            finished_at,
            records: outcome.records.len(),
            classifier: self.classifier.name().to_string(),
            classifier_failures: outcome.classifier_failures,
            coverage: summary.coverage,
            enriched_path: enriched_path.display().to_string(),
            report_path,
        })
    }

    pub async fn run_keywords(&self) -> Result<KeywordsRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("keywords_run", run_id = %run_id);
        async move {
            let started_at = Utc::now();
            let path = self.config.enriched_path();
            let records = read_enriched_reviews(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let summary = summarize(&records, &self.themes);
            let keywords = self.extract_keywords(&records);
            let report_path = self
                .write_brief(run_id, "keywords", started_at, Utc::now(), &summary, &keywords)
                .await?;
            Ok(KeywordsRunSummary {
                run_id,
                records: records.len(),
                keywords,
                report_path,
            })
        }
        .instrument(span)
        .await
    }

    pub async fn run_load(&self) -> Result<LoadRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("load_run", run_id = %run_id);
        async move {
            let started_at = Utc::now();
            let path = self.config.enriched_path();
            let records = read_enriched_reviews(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;

            let mut store = ReviewStore::connect(&self.config.database_url)
                .await
                .with_context(|| format!("connecting to {}", self.config.database_url))?;
            let outcome = store
                .load(&records)
                .await
                .context("loading reviews into the reviews table")?;
            let total_reviews = store.count_reviews().await.context("counting reviews")?;
            store.close().await.context("closing database connection")?;

            Ok(LoadRunSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                inserted: outcome.inserted,
                skipped: outcome.skipped,
                total_reviews,
            })
        }
        .instrument(span)
        .await
    }

    /// Collect, enrich and load in sequence. Stops after collection when
    /// nothing was collected.
    pub async fn run_all(&self) -> Result<FullRunSummary> {
        let collect = self.run_collect().await?;
        if collect.raw_path.is_none() {
            return Ok(FullRunSummary {
                collect,
                enrich: None,
                load: None,
            });
        }
        let enrich = self.run_enrich().await?;
        let load = self.run_load().await?;
        Ok(FullRunSummary {
            collect,
            enrich: Some(enrich),
            load: Some(load),
        })
    }

    fn extract_keywords(&self, records: &[EnrichedRecord]) -> BTreeMap<String, Vec<String>> {
        let corpus = corpus_from_records(records, &self.normalizer);
        let keywords = keywords_by_source(&corpus, &self.keywords);
        for (source, terms) in &keywords {
            if terms.is_empty() {
                info!(source = %source, "too few reviews for keyword extraction");
            } else {
                info!(source = %source, keywords = %terms.join(", "), "top keywords");
            }
        }
        keywords
    }

    async fn write_brief(
        &self,
        run_id: Uuid,
        stage: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        summary: &EnrichSummary,
        keywords: &BTreeMap<String, Vec<String>>,
    ) -> Result<String> {
        let input = BriefInput {
            run_id,
            stage,
            started_at,
            finished_at,
            summary,
            keywords,
        };
        let path = write_analysis_brief(&self.config.workspace_root, &input).await?;
        info!(path = %path.display(), "analysis brief written");
        Ok(path.display().to_string())
    }
}
