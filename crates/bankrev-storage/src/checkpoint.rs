//! CSV checkpoint files exchanged between pipeline stages.
//!
//! The raw file carries collected reviews; the enriched file adds ids,
//! sentiment and themes. Both are rewritten atomically so a crashed run
//! never leaves a half-written checkpoint behind.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use bankrev_core::{
    format_date, normalize_date, parse_themes_cell, EnrichedRecord, ReviewRecord, SentimentLabel,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// Required raw columns; each entry lists the accepted header names.
pub const RAW_REQUIRED_COLUMNS: &[&[&str]] = &[
    &["review_text", "review"],
    &["rating"],
    &["date"],
    &["source_name", "bank"],
    &["origin", "source"],
];

pub const ENRICHED_REQUIRED_COLUMNS: &[&[&str]] = &[
    &["review_id"],
    &["review_text", "review"],
    &["sentiment_label"],
    &["sentiment_score"],
    &["identified_themes"],
    &["source_name", "bank"],
    &["date"],
];

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path} is missing required columns: {}", .columns.join(", "))]
    MissingColumns { path: PathBuf, columns: Vec<String> },
}

#[derive(Debug, Serialize, Deserialize)]
struct RawRow {
    #[serde(alias = "review")]
    review_text: String,
    rating: String,
    date: String,
    #[serde(alias = "bank")]
    source_name: String,
    #[serde(alias = "source")]
    origin: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct EnrichedRow {
    review_id: i64,
    #[serde(alias = "review")]
    review_text: String,
    sentiment_label: String,
    sentiment_score: f64,
    identified_themes: String,
    #[serde(alias = "bank")]
    source_name: String,
    date: String,
    #[serde(default)]
    rating: String,
    #[serde(default)]
    origin: String,
}

pub async fn write_raw_reviews(path: &Path, records: &[ReviewRecord]) -> Result<(), CheckpointError> {
    let rows = records.iter().map(|record| RawRow {
        review_text: record.review_text.clone(),
        rating: record.rating.to_string(),
        date: record.date.map(format_date).unwrap_or_default(),
        source_name: record.source_name.clone(),
        origin: record.origin.clone(),
    });
    let bytes = encode_rows(path, rows)?;
    write_atomic(path, &bytes).await?;
    info!(path = %path.display(), rows = records.len(), "raw checkpoint written");
    Ok(())
}

pub async fn read_raw_reviews(path: &Path) -> Result<Vec<ReviewRecord>, CheckpointError> {
    let rows: Vec<RawRow> = decode_rows(path, RAW_REQUIRED_COLUMNS).await?;
    let mut records = Vec::with_capacity(rows.len());
    for (idx, row) in rows.into_iter().enumerate() {
        let Some(rating) = parse_rating(&row.rating) else {
            warn!(path = %path.display(), row = idx + 1, rating = %row.rating, "skipping row with unreadable rating");
            continue;
        };
        records.push(ReviewRecord {
            review_text: row.review_text,
            rating,
            date: normalize_date(&row.date),
            source_name: row.source_name,
            origin: row.origin,
        });
    }
    Ok(records)
}

pub async fn write_enriched_reviews(
    path: &Path,
    records: &[EnrichedRecord],
) -> Result<(), CheckpointError> {
    let rows = records.iter().map(|record| EnrichedRow {
        review_id: record.review_id,
        review_text: record.review_text.clone(),
        sentiment_label: record.sentiment_label.as_str().to_string(),
        sentiment_score: record.sentiment_score,
        identified_themes: serde_json::to_string(&record.identified_themes).unwrap_or_default(),
        source_name: record.source_name.clone(),
        date: record.date.map(format_date).unwrap_or_default(),
        rating: record.rating.map(|r| r.to_string()).unwrap_or_default(),
        origin: record.origin.clone(),
    });
    let bytes = encode_rows(path, rows)?;
    write_atomic(path, &bytes).await?;
    info!(path = %path.display(), rows = records.len(), "enriched checkpoint written");
    Ok(())
}

pub async fn read_enriched_reviews(path: &Path) -> Result<Vec<EnrichedRecord>, CheckpointError> {
    let rows: Vec<EnrichedRow> = decode_rows(path, ENRICHED_REQUIRED_COLUMNS).await?;
    Ok(rows
        .into_iter()
        .map(|row| EnrichedRecord {
            review_id: row.review_id,
            review_text: row.review_text,
            rating: parse_rating(&row.rating),
            date: normalize_date(&row.date),
            source_name: row.source_name,
            origin: row.origin,
            sentiment_label: row
                .sentiment_label
                .parse()
                .unwrap_or(SentimentLabel::Neutral),
            sentiment_score: if row.sentiment_score.is_finite() {
                row.sentiment_score
            } else {
                0.0
            },
            identified_themes: parse_themes_cell(&row.identified_themes),
        })
        .collect())
}

/// Ratings written by older tooling may be floats (`5.0`).
fn parse_rating(raw: &str) -> Option<u8> {
    let raw = raw.trim();
    if let Ok(value) = raw.parse::<u8>() {
        return Some(value);
    }
    let value = raw.parse::<f64>().ok()?;
    if value.fract() == 0.0 && (0.0..=255.0).contains(&value) {
        Some(value as u8)
    } else {
        None
    }
}

fn encode_rows<T: Serialize>(
    path: &Path,
    rows: impl IntoIterator<Item = T>,
) -> Result<Vec<u8>, CheckpointError> {
    let csv_err = |source| CheckpointError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row).map_err(csv_err)?;
    }
    writer.into_inner().map_err(|err| CheckpointError::Io {
        path: path.to_path_buf(),
        source: err.into_error(),
    })
}

async fn decode_rows<T: for<'de> Deserialize<'de>>(
    path: &Path,
    required: &[&[&str]],
) -> Result<Vec<T>, CheckpointError> {
    let bytes = fs::read(path).await.map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let csv_err = |source| CheckpointError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let headers: HashSet<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let missing: Vec<String> = required
        .iter()
        .filter(|names| !names.iter().any(|name| headers.contains(*name)))
        .map(|names| names[0].to_string())
        .collect();
    if !missing.is_empty() {
        return Err(CheckpointError::MissingColumns {
            path: path.to_path_buf(),
            columns: missing,
        });
    }

    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(csv_err)
}

/// Temp-file-then-rename write in the target directory.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    let io_err = |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await.map_err(io_err)?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .map_err(io_err)?;
    file.write_all(bytes).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(io_err(err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankrev_core::ORIGIN_GOOGLE_PLAY;
    use chrono::NaiveDate;

    fn raw(text: &str) -> ReviewRecord {
        ReviewRecord {
            review_text: text.to_string(),
            rating: 5,
            date: NaiveDate::from_ymd_opt(2024, 5, 17),
            source_name: "Dashen Bank".to_string(),
            origin: ORIGIN_GOOGLE_PLAY.to_string(),
        }
    }

    #[tokio::test]
    async fn raw_checkpoint_survives_commas_and_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank_reviews.csv");
        let records = vec![raw("fast, \"reliable\" app"), raw("crashes\non login")];

        write_raw_reviews(&path, &records).await.unwrap();
        let back = read_raw_reviews(&path).await.unwrap();

        assert_eq!(back, records);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn legacy_raw_headers_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank_reviews.csv");
        std::fs::write(
            &path,
            "review,rating,date,bank,source\nGood app,5.0,2024-05-17,Dashen Bank,Google Play\nbad,x,2024-05-17,Dashen Bank,Google Play\n",
        )
        .unwrap();

        let back = read_raw_reviews(&path).await.unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].rating, 5);
        assert_eq!(back[0].source_name, "Dashen Bank");
    }

    #[tokio::test]
    async fn missing_columns_are_reported_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank_reviews.csv");
        std::fs::write(&path, "review_text,rating\nok,5\n").unwrap();

        let err = read_raw_reviews(&path).await.unwrap_err();
        match err {
            CheckpointError::MissingColumns { columns, .. } => {
                assert_eq!(columns, vec!["date", "source_name", "origin"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn enriched_checkpoint_without_scores_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analyzed_reviews.csv");
        std::fs::write(
            &path,
            "review_id,review_text,sentiment_label,identified_themes,source_name,date
             7,Cannot login,negative,\"[]\",Bank of Abyssinia,2024-05-01
",
        )
        .unwrap();

        match read_enriched_reviews(&path).await.unwrap_err() {
            CheckpointError::MissingColumns { columns, .. } => {
                assert_eq!(columns, vec!["sentiment_score"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn enriched_checkpoint_reads_legacy_theme_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analyzed_reviews.csv");
        std::fs::write(
            &path,
            "review_id,review_text,sentiment_label,sentiment_score,identified_themes,bank,date\n\
             7,Cannot login,negative,-0.98,\"['Account Access Issues']\",Bank of Abyssinia,2024-05-01\n",
        )
        .unwrap();

        let back = read_enriched_reviews(&path).await.unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].review_id, 7);
        assert_eq!(back[0].rating, None);
        assert_eq!(back[0].sentiment_label, SentimentLabel::Negative);
        assert_eq!(back[0].identified_themes, vec!["Account Access Issues"]);
    }

    #[tokio::test]
    async fn enriched_checkpoint_keeps_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("analyzed_reviews.csv");
        let record = EnrichedRecord {
            review_id: 42,
            review_text: "Transfers are slow".to_string(),
            rating: Some(2),
            date: NaiveDate::from_ymd_opt(2024, 3, 9),
            source_name: "Commercial Bank of Ethiopia".to_string(),
            origin: ORIGIN_GOOGLE_PLAY.to_string(),
            sentiment_label: SentimentLabel::Negative,
            sentiment_score: -0.91,
            identified_themes: vec!["Transaction Performance".to_string()],
        };

        write_enriched_reviews(&path, std::slice::from_ref(&record))
            .await
            .unwrap();
        let back = read_enriched_reviews(&path).await.unwrap();
        assert_eq!(back, vec![record]);
    }
}
