//! Stage orchestration for the review pipeline: configuration, the source
//! registry, enrichment, keyword extraction and run reports.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bankrev_adapters::{ListingMode, TrackedSource, DEFAULT_TARGET};
use bankrev_core::ReviewIdStrategy;
use serde::Deserialize;
use tracing::{info, warn};

pub mod enrich;
pub mod keywords;
pub mod normalize;
mod pipeline;
pub mod report;
pub mod sentiment;
pub mod themes;

pub use pipeline::{
    CollectRunSummary, EnrichRunSummary, FullRunSummary, KeywordsRunSummary, LoadRunSummary,
    SyncPipeline,
};

pub const CRATE_NAME: &str = "bankrev-sync";

pub const RAW_CHECKPOINT: &str = "bank_reviews.csv";
pub const ENRICHED_CHECKPOINT: &str = "analyzed_reviews.csv";

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<TrackedSource>,
}

impl SourceRegistry {
    /// The three tracked banking apps.
    pub fn builtin() -> Self {
        let source = |name: &str, app_id: &str| TrackedSource {
            source_name: name.to_string(),
            app_id: app_id.to_string(),
            target: DEFAULT_TARGET,
            mode: ListingMode::Api,
            fixture: None,
        };
        Self {
            sources: vec![
                source("Commercial Bank of Ethiopia", "com.combanketh.mobilebanking"),
                source("Bank of Abyssinia", "com.boa.boaMobileBanking"),
                source("Dashen Bank", "com.dashen.dashensuperapp"),
            ],
        }
    }

    /// `sources.yaml` under `root` when present, otherwise the built-in list.
    /// Relative fixture paths are resolved against `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("sources.yaml");
        let mut registry = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let registry: Self = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            info!(path = %path.display(), sources = registry.sources.len(), "source registry loaded");
            registry
        } else {
            Self::builtin()
        };
        for source in &mut registry.sources {
            if let Some(fixture) = &source.fixture {
                if fixture.is_relative() {
                    source.fixture = Some(root.join(fixture));
                }
            }
        }
        Ok(registry)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub data_dir: PathBuf,
    pub listing_url: String,
    pub classifier_url: Option<String>,
    pub classifier_token: Option<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub throttle_ms: u64,
    pub review_ids: ReviewIdStrategy,
    pub workspace_root: PathBuf,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let review_ids = match std::env::var("BANKREV_REVIEW_IDS") {
            Ok(raw) => raw.parse().unwrap_or_else(|err: String| {
                warn!(value = %raw, error = %err, "ignoring BANKREV_REVIEW_IDS");
                ReviewIdStrategy::default()
            }),
            Err(_) => ReviewIdStrategy::default(),
        };
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/bank_reviews.db".to_string()),
            data_dir: std::env::var("BANKREV_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            listing_url: std::env::var("BANKREV_LISTING_URL")
                .unwrap_or_else(|_| "http://localhost:8085/reviews".to_string()),
            classifier_url: std::env::var("BANKREV_CLASSIFIER_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            classifier_token: std::env::var("BANKREV_CLASSIFIER_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            user_agent: std::env::var("BANKREV_USER_AGENT")
                .unwrap_or_else(|_| "bankrev-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("BANKREV_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            throttle_ms: std::env::var("BANKREV_THROTTLE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            review_ids,
            workspace_root: PathBuf::from("."),
        }
    }

    pub fn raw_path(&self) -> PathBuf {
        self.data_dir.join(RAW_CHECKPOINT)
    }

    pub fn enriched_path(&self) -> PathBuf {
        self.data_dir.join(ENRICHED_CHECKPOINT)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}
