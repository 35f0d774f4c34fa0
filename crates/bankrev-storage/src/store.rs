use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use bankrev_core::{format_date, themes_storage_string, EnrichedRecord, THEMES_STORAGE_CAP};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::Connection;
use thiserror::Error;
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        source_id   INTEGER PRIMARY KEY AUTOINCREMENT,
        source_name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reviews (
        review_id         INTEGER PRIMARY KEY,
        source_id         INTEGER NOT NULL REFERENCES sources (source_id),
        review_text       TEXT NOT NULL,
        rating            INTEGER CHECK (rating IS NULL OR rating BETWEEN 1 AND 5),
        review_date       TEXT,
        origin            TEXT,
        sentiment_label   TEXT NOT NULL,
        sentiment_score   REAL NOT NULL,
        identified_themes TEXT CHECK (length(identified_themes) <= 500)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_reviews_source_id ON reviews (source_id)
    "#,
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("inserting review {review_id}: {source}")]
    Insert {
        review_id: i64,
        #[source]
        source: sqlx::Error,
    },
    #[error("creating database directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

/// Single-connection handle on the review database.
pub struct ReviewStore {
    conn: SqliteConnection,
}

impl ReviewStore {
    /// Open (creating if needed) the database at `database_url` and make sure
    /// both tables exist.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        ensure_database_dir(database_url).await?;
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let conn = SqliteConnection::connect_with(&options).await?;
        let mut store = Self { conn };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&mut self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&mut self.conn).await?;
        }
        Ok(())
    }

    /// Look up or create the surrogate key for a source. Committed on its own,
    /// outside any review batch.
    pub async fn upsert_source(&mut self, source_name: &str) -> Result<i64, StoreError> {
        sqlx::query("INSERT OR IGNORE INTO sources (source_name) VALUES (?1)")
            .bind(source_name)
            .execute(&mut self.conn)
            .await?;
        let source_id: i64 =
            sqlx::query_scalar("SELECT source_id FROM sources WHERE source_name = ?1")
                .bind(source_name)
                .fetch_one(&mut self.conn)
                .await?;
        Ok(source_id)
    }

    pub async fn existing_review_ids(&mut self) -> Result<HashSet<i64>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT review_id FROM reviews")
            .fetch_all(&mut self.conn)
            .await?;
        Ok(ids.into_iter().collect())
    }

    pub async fn count_reviews(&mut self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews")
            .fetch_one(&mut self.conn)
            .await?;
        Ok(count)
    }

    /// Insert every record whose id is not stored yet, all in one
    /// transaction. Ids already present (in the table or earlier in this
    /// batch) are skipped. Any insert failure rolls the whole batch back.
    pub async fn load(&mut self, records: &[EnrichedRecord]) -> Result<LoadOutcome, StoreError> {
        let span = info_span!("load_reviews", records = records.len());
        async move {
            let mut source_ids: HashMap<&str, i64> = HashMap::new();
            for record in records {
                if !source_ids.contains_key(record.source_name.as_str()) {
                    let id = self.upsert_source(&record.source_name).await?;
                    source_ids.insert(record.source_name.as_str(), id);
                }
            }
            info!(sources = source_ids.len(), "sources resolved");

            let mut seen = self.existing_review_ids().await?;
            let mut pending = Vec::with_capacity(records.len());
            let mut skipped = 0usize;
            for record in records {
                if seen.insert(record.review_id) {
                    pending.push(record);
                } else {
                    skipped += 1;
                }
            }
            if skipped > 0 {
                warn!(skipped, "reviews already stored or repeated in batch");
            }
            if pending.is_empty() {
                info!("no new reviews to insert");
                return Ok(LoadOutcome {
                    inserted: 0,
                    skipped,
                });
            }

            let mut tx = self.conn.begin().await?;
            for record in &pending {
                let source_id = source_ids
                    .get(record.source_name.as_str())
                    .copied()
                    .unwrap_or_default();
                sqlx::query(
                    r#"
                    INSERT INTO reviews (
                        review_id, source_id, review_text, rating, review_date,
                        origin, sentiment_label, sentiment_score, identified_themes
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                )
                .bind(record.review_id)
                .bind(source_id)
                .bind(&record.review_text)
                .bind(record.rating.map(i64::from))
                .bind(record.date.map(format_date))
                .bind(&record.origin)
                .bind(record.sentiment_label.as_str())
                .bind(record.sentiment_score)
                .bind(themes_storage_string(
                    &record.identified_themes,
                    THEMES_STORAGE_CAP,
                ))
                .execute(&mut *tx)
                .await
                .map_err(|source| StoreError::Insert {
                    review_id: record.review_id,
                    source,
                })?;
            }
            tx.commit().await?;

            let total = self.count_reviews().await?;
            info!(inserted = pending.len(), skipped, total, "reviews loaded");
            Ok(LoadOutcome {
                inserted: pending.len(),
                skipped,
            })
        }
        .instrument(span)
        .await
    }

    pub async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await?;
        Ok(())
    }
}

async fn ensure_database_dir(database_url: &str) -> Result<(), StoreError> {
    let Some(rest) = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
    else {
        return Ok(());
    };
    let file = rest.split('?').next().unwrap_or_default();
    if file.is_empty() || file == ":memory:" {
        return Ok(());
    }
    match Path::new(file).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.display().to_string(),
                    source,
                })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankrev_core::{SentimentLabel, ORIGIN_GOOGLE_PLAY};
    use chrono::NaiveDate;

    fn enriched(review_id: i64, source: &str) -> EnrichedRecord {
        EnrichedRecord {
            review_id,
            review_text: format!("review {review_id}"),
            rating: Some(4),
            date: NaiveDate::from_ymd_opt(2024, 5, 17),
            source_name: source.to_string(),
            origin: ORIGIN_GOOGLE_PLAY.to_string(),
            sentiment_label: SentimentLabel::Positive,
            sentiment_score: 0.87,
            identified_themes: vec!["User Interface & Experience".to_string()],
        }
    }

    async fn memory_store() -> ReviewStore {
        ReviewStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn second_load_of_same_batch_inserts_nothing() {
        let mut store = memory_store().await;
        let batch: Vec<_> = (1..=10).map(|id| enriched(id, "Dashen Bank")).collect();

        let first = store.load(&batch).await.unwrap();
        let second = store.load(&batch).await.unwrap();

        assert_eq!(first, LoadOutcome { inserted: 10, skipped: 0 });
        assert_eq!(second, LoadOutcome { inserted: 0, skipped: 10 });
        assert_eq!(store.count_reviews().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn sources_are_created_once() {
        let mut store = memory_store().await;
        let a = store.upsert_source("Bank of Abyssinia").await.unwrap();
        let b = store.upsert_source("Bank of Abyssinia").await.unwrap();
        let c = store.upsert_source("Dashen Bank").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn repeated_ids_within_a_batch_are_skipped() {
        let mut store = memory_store().await;
        let batch = vec![enriched(5, "Dashen Bank"), enriched(5, "Dashen Bank")];
        let outcome = store.load(&batch).await.unwrap();
        assert_eq!(outcome, LoadOutcome { inserted: 1, skipped: 1 });
    }

    #[tokio::test]
    async fn failed_insert_rolls_back_the_batch_but_keeps_sources() {
        let mut store = memory_store().await;
        let mut bad = enriched(3, "Commercial Bank of Ethiopia");
        bad.rating = Some(9);
        let batch = vec![enriched(1, "Commercial Bank of Ethiopia"), enriched(2, "Dashen Bank"), bad];

        let err = store.load(&batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Insert { review_id: 3, .. }));
        assert_eq!(store.count_reviews().await.unwrap(), 0);

        let sources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
            .fetch_one(&mut store.conn)
            .await
            .unwrap();
        assert_eq!(sources, 2);
    }

    #[tokio::test]
    async fn missing_dates_are_stored_as_null() {
        let mut store = memory_store().await;
        let mut undated = enriched(21, "Bank of Abyssinia");
        undated.date = None;
        let outcome = store.load(&[undated, enriched(22, "Bank of Abyssinia")]).await.unwrap();
        assert_eq!(outcome, LoadOutcome { inserted: 2, skipped: 0 });

        let dates: Vec<Option<String>> =
            sqlx::query_scalar("SELECT review_date FROM reviews ORDER BY review_id")
                .fetch_all(&mut store.conn)
                .await
                .unwrap();
        assert_eq!(dates, vec![None, Some("2024-05-17".to_string())]);
    }

    #[tokio::test]
    async fn long_theme_lists_are_truncated_on_store() {
        let mut store = memory_store().await;
        let mut record = enriched(11, "Dashen Bank");
        record.identified_themes = (0..60).map(|i| format!("Generated theme {i:02}")).collect();
        store.load(&[record]).await.unwrap();

        let stored: String =
            sqlx::query_scalar("SELECT identified_themes FROM reviews WHERE review_id = 11")
                .fetch_one(&mut store.conn)
                .await
                .unwrap();
        assert!(stored.chars().count() <= THEMES_STORAGE_CAP);
        let themes: Vec<String> = serde_json::from_str(&stored).unwrap();
        assert_eq!(themes[0], "Generated theme 00");
    }

    #[tokio::test]
    async fn file_database_is_created_under_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("data").join("bank_reviews.db");
        let url = format!("sqlite://{}", db_path.display());

        let mut store = ReviewStore::connect(&url).await.unwrap();
        store.load(&[enriched(1, "Dashen Bank")]).await.unwrap();
        store.close().await.unwrap();

        let mut reopened = ReviewStore::connect(&url).await.unwrap();
        assert_eq!(reopened.count_reviews().await.unwrap(), 1);
        assert!(db_path.exists());
    }
}
