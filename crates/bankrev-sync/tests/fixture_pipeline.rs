use std::path::{Path, PathBuf};

use bankrev_adapters::{ListingMode, TrackedSource};
use bankrev_core::{ReviewIdStrategy, OTHER_THEME};
use bankrev_storage::read_enriched_reviews;
use bankrev_sync::{SourceRegistry, SyncConfig, SyncPipeline};

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

fn config(workspace: &Path) -> SyncConfig {
    let data_dir = workspace.join("data");
    SyncConfig {
        database_url: format!("sqlite://{}", data_dir.join("bank_reviews.db").display()),
        data_dir,
        listing_url: "http://127.0.0.1:9/reviews".to_string(),
        classifier_url: None,
        classifier_token: None,
        user_agent: "bankrev-test/0.1".to_string(),
        http_timeout_secs: 5,
        throttle_ms: 0,
        review_ids: ReviewIdStrategy::StableHash,
        workspace_root: workspace.to_path_buf(),
    }
}

fn fixture_registry() -> SourceRegistry {
    SourceRegistry {
        sources: vec![TrackedSource {
            source_name: "Dashen Bank".to_string(),
            app_id: "com.dashen.dashensuperapp".to_string(),
            target: 25,
            mode: ListingMode::Fixture,
            fixture: Some(repo_root().join("fixtures/dashen-bank/sample.json")),
        }],
    }
}

#[tokio::test]
async fn fixture_run_is_idempotent_end_to_end() {
    let workspace = tempfile::tempdir().unwrap();
    let pipeline = SyncPipeline::new(config(workspace.path()))
        .unwrap()
        .with_registry(fixture_registry());

    let first = pipeline.run_all().await.unwrap();
    assert_eq!(first.collect.collected, 14);
    assert_eq!(first.collect.duplicates_removed, 1);
    assert_eq!(first.collect.invalid_removed, 2);
    assert_eq!(first.collect.written, 11);
    assert_eq!(first.collect.per_source["Dashen Bank"], 11);

    let enrich = first.enrich.as_ref().unwrap();
    assert_eq!(enrich.records, 11);
    assert_eq!(enrich.classifier, "lexicon");
    assert!(Path::new(&enrich.report_path).exists());

    let load = first.load.as_ref().unwrap();
    assert_eq!((load.inserted, load.skipped), (11, 0));
    assert_eq!(load.total_reviews, 11);

    let enriched = read_enriched_reviews(&pipeline.config().enriched_path())
        .await
        .unwrap();
    assert!(enriched.iter().all(|r| !r.identified_themes.is_empty()));
    let login = enriched
        .iter()
        .find(|r| r.review_text.starts_with("Cannot login"))
        .unwrap();
    assert!(login
        .identified_themes
        .contains(&"Account Access Issues".to_string()));
    assert!(!login.identified_themes.contains(&OTHER_THEME.to_string()));

    let json = serde_json::to_value(&first).unwrap();
    assert_eq!(
        json["collect"]["run_id"],
        serde_json::Value::String(first.collect.run_id.to_string())
    );
    assert_eq!(json["load"]["inserted"], 11);

    let second = pipeline.run_all().await.unwrap();
    let load = second.load.as_ref().unwrap();
    assert_eq!((load.inserted, load.skipped), (0, 11));
    assert_eq!(load.total_reviews, 11);
}

#[tokio::test]
async fn empty_collection_writes_no_checkpoint() {
    let workspace = tempfile::tempdir().unwrap();
    let missing = SourceRegistry {
        sources: vec![TrackedSource {
            source_name: "Dashen Bank".to_string(),
            app_id: "com.dashen.dashensuperapp".to_string(),
            target: 25,
            mode: ListingMode::Fixture,
            fixture: None,
        }],
    };
    let pipeline = SyncPipeline::new(config(workspace.path()))
        .unwrap()
        .with_registry(missing);

    let summary = pipeline.run_all().await.unwrap();
    assert_eq!(summary.collect.written, 0);
    assert!(summary.collect.raw_path.is_none());
    assert!(summary.enrich.is_none());
    assert!(!pipeline.config().raw_path().exists());
}

#[tokio::test]
async fn keyword_stage_reports_from_enriched_checkpoint() {
    let workspace = tempfile::tempdir().unwrap();
    let pipeline = SyncPipeline::new(config(workspace.path()))
        .unwrap()
        .with_registry(fixture_registry());
    pipeline.run_collect().await.unwrap();
    pipeline.run_enrich().await.unwrap();

    let keywords = pipeline.run_keywords().await.unwrap();
    assert_eq!(keywords.records, 11);
    assert!(keywords.keywords.contains_key("Dashen Bank"));
    let brief = std::fs::read_to_string(&keywords.report_path).unwrap();
    assert!(brief.contains("## Dashen Bank"));
    assert!(brief.contains("Stage: keywords"));
}
