//! Sentiment classifiers: a hosted inference endpoint and an offline lexicon.

use async_trait::async_trait;
use bankrev_core::{ClassifierLabel, ClassifierOutput};
use bankrev_storage::{FetchError, HttpFetcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("classifier returned no predictions")]
    EmptyResponse,
    #[error("unknown classifier label `{0}`")]
    UnknownLabel(String),
    #[error("non-finite classifier confidence {0}")]
    NonFinite(f64),
}

#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, text: &str) -> Result<ClassifierOutput, ClassifierError>;
}

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

impl InferenceResponse {
    fn into_predictions(self) -> Vec<LabelScore> {
        match self {
            Self::Nested(batches) => batches.into_iter().flatten().collect(),
            Self::Flat(predictions) => predictions,
        }
    }
}

fn parse_label(raw: &str) -> Result<ClassifierLabel, ClassifierError> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "POSITIVE" | "POS" | "LABEL_1" => Ok(ClassifierLabel::Positive),
        "NEGATIVE" | "NEG" | "LABEL_0" => Ok(ClassifierLabel::Negative),
        _ => Err(ClassifierError::UnknownLabel(raw.to_string())),
    }
}

/// Binary sentiment model behind an HTTP inference endpoint.
#[derive(Debug, Clone)]
pub struct HttpSentimentClassifier {
    http: HttpFetcher,
    url: String,
    token: Option<String>,
}

impl HttpSentimentClassifier {
    pub fn new(http: HttpFetcher, url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            url: url.into(),
            token,
        }
    }
}

#[async_trait]
impl SentimentClassifier for HttpSentimentClassifier {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn classify(&self, text: &str) -> Result<ClassifierOutput, ClassifierError> {
        let response: InferenceResponse = self
            .http
            .post_json(&self.url, &InferenceRequest { inputs: text }, self.token.as_deref())
            .await?;
        let best = response
            .into_predictions()
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .ok_or(ClassifierError::EmptyResponse)?;
        if !best.score.is_finite() {
            return Err(ClassifierError::NonFinite(best.score));
        }
        Ok(ClassifierOutput {
            label: parse_label(&best.label)?,
            confidence: best.score,
        })
    }
}

const POSITIVE_WORDS: &[(&str, f64)] = &[
    ("good", 1.0),
    ("great", 1.5),
    ("excellent", 2.0),
    ("amazing", 2.0),
    ("awesome", 1.8),
    ("best", 1.5),
    ("better", 1.2),
    ("nice", 1.2),
    ("love", 2.0),
    ("like", 1.0),
    ("easy", 1.2),
    ("fast", 1.2),
    ("smooth", 1.2),
    ("reliable", 1.5),
    ("helpful", 1.5),
    ("perfect", 2.0),
    ("super", 1.5),
    ("wow", 1.5),
    ("thanks", 1.0),
    ("thank", 1.0),
    ("convenient", 1.2),
    ("satisfied", 1.0),
];

const NEGATIVE_WORDS: &[(&str, f64)] = &[
    ("bad", -1.0),
    ("worst", -2.0),
    ("terrible", -2.0),
    ("awful", -2.0),
    ("horrible", -2.0),
    ("poor", -1.2),
    ("slow", -1.2),
    ("crash", -1.5),
    ("crashes", -1.5),
    ("crashed", -1.5),
    ("fail", -1.5),
    ("fails", -1.5),
    ("failed", -1.5),
    ("error", -1.2),
    ("errors", -1.2),
    ("bug", -1.2),
    ("bugs", -1.2),
    ("useless", -1.8),
    ("disappointing", -1.5),
    ("frustrating", -1.5),
    ("annoying", -1.2),
    ("hate", -2.0),
    ("stuck", -1.2),
    ("problem", -1.0),
];

const INTENSIFIERS: &[(&str, f64)] = &[
    ("very", 1.5),
    ("extremely", 2.0),
    ("really", 1.3),
    ("so", 1.2),
    ("too", 1.2),
    ("totally", 1.8),
];

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "cannot", "cant", "don", "doesn", "didn", "isn", "wasn", "won",
];

/// Offline word-list classifier with intensifier and negation handling.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexiconSentimentClassifier;

impl LexiconSentimentClassifier {
    /// Mean signed weight of the lexicon hits, or `None` if nothing matched.
    pub fn polarity(text: &str) -> Option<f64> {
        let words: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphabetic())
            .filter(|w| !w.is_empty())
            .map(ToString::to_string)
            .collect();

        let mut total = 0.0;
        let mut hits = 0usize;
        for (i, word) in words.iter().enumerate() {
            let Some((_, weight)) = POSITIVE_WORDS
                .iter()
                .chain(NEGATIVE_WORDS)
                .find(|(w, _)| *w == word.as_str())
            else {
                continue;
            };
            let mut sentiment = *weight;
            if i > 0 {
                if let Some((_, factor)) = INTENSIFIERS.iter().find(|(w, _)| *w == words[i - 1]) {
                    sentiment *= factor;
                }
            }
            let negated = (1..=2)
                .filter_map(|back| i.checked_sub(back))
                .any(|j| NEGATIONS.contains(&words[j].as_str()));
            if negated {
                sentiment = -sentiment * 0.8;
            }
            total += sentiment;
            hits += 1;
        }
        (hits > 0).then(|| total / hits as f64)
    }
}

#[async_trait]
impl SentimentClassifier for LexiconSentimentClassifier {
    fn name(&self) -> &'static str {
        "lexicon"
    }

    async fn classify(&self, text: &str) -> Result<ClassifierOutput, ClassifierError> {
        let Some(polarity) = Self::polarity(text) else {
            return Ok(ClassifierOutput {
                label: ClassifierLabel::Positive,
                confidence: 0.0,
            });
        };
        let label = if polarity < 0.0 {
            ClassifierLabel::Negative
        } else {
            ClassifierLabel::Positive
        };
        Ok(ClassifierOutput {
            label,
            confidence: (0.5 + polarity.abs() / 4.0).min(1.0),
        })
    }
}
