//! Core domain model for bank app review collection and enrichment.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CRATE_NAME: &str = "bankrev-core";

/// Collection channel recorded on every review.
pub const ORIGIN_GOOGLE_PLAY: &str = "Google Play";

/// Fallback theme for reviews that match no keyword.
pub const OTHER_THEME: &str = "Other";

/// Maximum length of the persisted theme string.
pub const THEMES_STORAGE_CAP: usize = 500;

/// Classifier confidence at or above which a polarity label is kept.
pub const POLARITY_THRESHOLD: f64 = 0.6;

/// A review as collected from the listing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub review_text: String,
    pub rating: u8,
    pub date: Option<NaiveDate>,
    pub source_name: String,
    pub origin: String,
}

impl ReviewRecord {
    /// Exact-match identity used for run-level dedup.
    pub fn dedup_key(&self) -> (String, Option<NaiveDate>) {
        (self.review_text.clone(), self.date)
    }

    /// Records with blank text, no date or an out-of-range rating are not kept.
    pub fn is_valid(&self) -> bool {
        !self.review_text.trim().is_empty() && self.date.is_some() && (1..=5).contains(&self.rating)
    }
}

/// A review after sentiment scoring and theme assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub review_id: i64,
    pub review_text: String,
    pub rating: Option<u8>,
    pub date: Option<NaiveDate>,
    pub source_name: String,
    pub origin: String,
    pub sentiment_label: SentimentLabel,
    pub sentiment_score: f64,
    pub identified_themes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SentimentLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Self::Positive),
            "neutral" => Ok(Self::Neutral),
            "negative" => Ok(Self::Negative),
            other => Err(format!("unknown sentiment label `{other}`")),
        }
    }
}

/// Polarity reported by the external classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierLabel {
    Positive,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOutput {
    pub label: ClassifierLabel,
    pub confidence: f64,
}

/// Label and signed score derived from a classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    pub score: f64,
}

impl Sentiment {
    pub fn neutral() -> Self {
        Self {
            label: SentimentLabel::Neutral,
            score: 0.0,
        }
    }

    /// Sign encodes polarity, magnitude the confidence; weak confidence
    /// keeps its signed score but is labelled neutral.
    pub fn from_classifier(output: &ClassifierOutput) -> Self {
        if !output.confidence.is_finite() {
            return Self::neutral();
        }
        let confidence = output.confidence.clamp(0.0, 1.0);
        let strong = confidence >= POLARITY_THRESHOLD;
        match output.label {
            ClassifierLabel::Positive => Self {
                label: if strong {
                    SentimentLabel::Positive
                } else {
                    SentimentLabel::Neutral
                },
                score: confidence,
            },
            ClassifierLabel::Negative => Self {
                label: if strong {
                    SentimentLabel::Negative
                } else {
                    SentimentLabel::Neutral
                },
                score: -confidence,
            },
        }
    }
}

/// How `review_id` is assigned at enrichment time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewIdStrategy {
    /// Hash of (source, text, date); survives re-ordering and re-runs.
    #[default]
    StableHash,
    /// 1-based position in the enrichment batch.
    Positional,
}

impl ReviewIdStrategy {
    pub fn assign(&self, position: usize, record: &ReviewRecord) -> i64 {
        match self {
            Self::StableHash => {
                stable_review_id(&record.source_name, &record.review_text, record.date)
            }
            Self::Positional => i64::try_from(position + 1).unwrap_or(i64::MAX),
        }
    }
}

impl FromStr for ReviewIdStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hash" | "stable" | "stable-hash" => Ok(Self::StableHash),
            "positional" | "position" => Ok(Self::Positional),
            other => Err(format!("unknown review id strategy `{other}`")),
        }
    }
}

/// Positive 63-bit id derived from the review's natural key.
pub fn stable_review_id(source_name: &str, review_text: &str, date: Option<NaiveDate>) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(source_name.as_bytes());
    hasher.update([0x1f]);
    hasher.update(review_text.as_bytes());
    hasher.update([0x1f]);
    if let Some(date) = date {
        hasher.update(format_date(date).as_bytes());
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) >> 1) as i64
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%Y%m%d",
];

/// Parse a calendar date out of the formats seen in listing payloads and
/// checkpoint files. Returns `None` rather than failing.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.date_naive());
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(raw) {
        return Some(ts.date_naive());
    }
    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts.date());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        let value: i64 = raw.parse().ok()?;
        let seconds = match raw.len() {
            10 => value,
            13 => value / 1000,
            _ => return None,
        };
        return DateTime::from_timestamp(seconds, 0).map(|ts| ts.date_naive());
    }
    None
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// JSON-array form of a theme list, keeping whole themes until the next one
/// would push the string past `cap` characters. A first theme that cannot fit
/// on its own is cut by characters so at least one label is kept.
pub fn themes_storage_string(themes: &[String], cap: usize) -> String {
    let mut kept: Vec<&str> = Vec::with_capacity(themes.len());
    let mut encoded: Option<String> = None;
    for theme in themes {
        kept.push(theme);
        let candidate = serde_json::to_string(&kept).unwrap_or_default();
        if candidate.chars().count() > cap {
            break;
        }
        encoded = Some(candidate);
    }
    match (encoded, themes.first()) {
        (Some(encoded), _) => encoded,
        (None, Some(first)) => truncated_single_theme(first, cap),
        (None, None) => String::from("[]"),
    }
}

fn truncated_single_theme(theme: &str, cap: usize) -> String {
    let mut chars: Vec<char> = theme.chars().take(cap.saturating_sub(4)).collect();
    while !chars.is_empty() {
        let label: String = chars.iter().collect();
        let candidate = serde_json::to_string(&[label.trim_end()]).unwrap_or_default();
        if candidate.chars().count() <= cap {
            return candidate;
        }
        chars.pop();
    }
    String::from("[]")
}

/// Read a theme cell written either as a JSON array or as a Python-style
/// list (`['A', 'B']`).
pub fn parse_themes_cell(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    if let Ok(themes) = serde_json::from_str::<Vec<String>>(raw) {
        return themes;
    }
    raw.trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|part| part.trim().trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
