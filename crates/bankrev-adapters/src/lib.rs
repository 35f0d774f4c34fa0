//! Listing-service contract, HTTP and fixture listing adapters, and the
//! paginating collector built on top of them.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bankrev_core::{normalize_date, ReviewRecord, ORIGIN_GOOGLE_PLAY};
use bankrev_storage::{FetchError, HttpFetcher};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

mod collector;

pub use collector::{collect, finalize_collection, CollectorOptions, FinalizedCollection};

pub const CRATE_NAME: &str = "bankrev-adapters";

/// Default number of reviews requested per tracked application.
pub const DEFAULT_TARGET: usize = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingMode {
    #[default]
    Api,
    Fixture,
}

/// One application whose store reviews are collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSource {
    #[serde(alias = "name")]
    pub source_name: String,
    pub app_id: String,
    #[serde(default = "default_target")]
    pub target: usize,
    #[serde(default)]
    pub mode: ListingMode,
    #[serde(default)]
    pub fixture: Option<PathBuf>,
}

fn default_target() -> usize {
    DEFAULT_TARGET
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingRequest {
    pub app_id: String,
    pub lang: String,
    pub country: String,
    pub sort: String,
    pub count: usize,
    pub continuation_token: Option<String>,
}

impl ListingRequest {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("app_id", self.app_id.clone()),
            ("lang", self.lang.clone()),
            ("country", self.country.clone()),
            ("sort", self.sort.clone()),
            ("count", self.count.to_string()),
        ];
        if let Some(token) = &self.continuation_token {
            pairs.push(("continuation_token", token.clone()));
        }
        pairs
    }
}

/// A review as the listing service returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedReview {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub at: JsonValue,
}

impl ListedReview {
    pub fn into_record(self, source_name: &str) -> ReviewRecord {
        let raw_date = match &self.at {
            JsonValue::String(s) => s.clone(),
            JsonValue::Number(n) => n.to_string(),
            _ => String::new(),
        };
        ReviewRecord {
            review_text: self.content,
            rating: u8::try_from(self.score)
                .ok()
                .filter(|rating| (1..=5).contains(rating))
                .unwrap_or(0),
            date: normalize_date(&raw_date),
            source_name: source_name.to_string(),
            origin: ORIGIN_GOOGLE_PLAY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewPage {
    #[serde(default)]
    pub reviews: Vec<ListedReview>,
    #[serde(default)]
    pub continuation_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("fixture {path}: {message}")]
    Fixture { path: PathBuf, message: String },
    #[error("{0}")]
    Message(String),
}

#[async_trait]
pub trait ReviewListing: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_page(&self, request: &ListingRequest) -> Result<ReviewPage, AdapterError>;
}

/// Pages reviews from the HTTP listing service.
#[derive(Debug, Clone)]
pub struct HttpListingAdapter {
    http: HttpFetcher,
    listing_url: String,
}

impl HttpListingAdapter {
    pub fn new(http: HttpFetcher, listing_url: impl Into<String>) -> Self {
        Self {
            http,
            listing_url: listing_url.into(),
        }
    }
}

#[async_trait]
impl ReviewListing for HttpListingAdapter {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch_page(&self, request: &ListingRequest) -> Result<ReviewPage, AdapterError> {
        let page = self
            .http
            .get_json::<ReviewPage, _>(&self.listing_url, &request.query_pairs())
            .await?;
        Ok(page)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FixtureFile {
    pages: Vec<ReviewPage>,
}

/// Serves pages from a captured JSON file. Cursor `page-N` selects page N;
/// no cursor selects the first page.
#[derive(Debug, Clone)]
pub struct FixtureListingAdapter {
    path: PathBuf,
    pages: Vec<ReviewPage>,
}

impl FixtureListingAdapter {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AdapterError> {
        let path = path.as_ref();
        let fixture_err = |message: String| AdapterError::Fixture {
            path: path.to_path_buf(),
            message,
        };
        let data = fs::read_to_string(path).map_err(|err| fixture_err(format!("reading: {err}")))?;
        let file: FixtureFile =
            serde_json::from_str(&data).map_err(|err| fixture_err(format!("parsing: {err}")))?;
        Ok(Self {
            path: path.to_path_buf(),
            pages: file.pages,
        })
    }
}

#[async_trait]
impl ReviewListing for FixtureListingAdapter {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_page(&self, request: &ListingRequest) -> Result<ReviewPage, AdapterError> {
        let index = match request.continuation_token.as_deref() {
            None => 0,
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| AdapterError::Fixture {
                    path: self.path.clone(),
                    message: format!("unknown cursor `{token}`"),
                })?,
        };
        let Some(page) = self.pages.get(index) else {
            return Ok(ReviewPage::default());
        };
        let mut page = page.clone();
        page.reviews.truncate(request.count);
        Ok(page)
    }
}

/// Pick the listing implementation for a source's configured mode.
pub fn adapter_for_source(
    source: &TrackedSource,
    http: &HttpFetcher,
    listing_url: &str,
) -> Result<Box<dyn ReviewListing>, AdapterError> {
    match source.mode {
        ListingMode::Api => Ok(Box::new(HttpListingAdapter::new(http.clone(), listing_url))),
        ListingMode::Fixture => {
            let Some(path) = &source.fixture else {
                return Err(AdapterError::Message(format!(
                    "source `{}` uses fixture mode but names no fixture file",
                    source.source_name
                )));
            };
            Ok(Box::new(FixtureListingAdapter::from_path(path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankrev_storage::HttpClientConfig;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(token: Option<&str>) -> ListingRequest {
        ListingRequest {
            app_id: "com.dashen.dashensuperapp".to_string(),
            lang: "en".to_string(),
            country: "et".to_string(),
            sort: "newest".to_string(),
            count: 200,
            continuation_token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn http_listing_sends_parameters_and_decodes_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reviews"))
            .and(query_param("app_id", "com.dashen.dashensuperapp"))
            .and(query_param("country", "et"))
            .and(query_param("count", "200"))
            .and(query_param("continuation_token", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "reviews": [
                    {"content": "Super app", "score": 5, "at": "2024-05-17 08:12:55"}
                ],
                "continuation_token": "def"
            })))
            .mount(&server)
            .await;

        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let adapter = HttpListingAdapter::new(http, format!("{}/reviews", server.uri()));
        let page = adapter.fetch_page(&request(Some("abc"))).await.unwrap();

        assert_eq!(page.continuation_token.as_deref(), Some("def"));
        let record = page.reviews[0].clone().into_record("Dashen Bank");
        assert_eq!(record.rating, 5);
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 5, 17));
        assert_eq!(record.origin, ORIGIN_GOOGLE_PLAY);
    }

    #[tokio::test]
    async fn http_listing_surfaces_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let adapter = HttpListingAdapter::new(http, server.uri());
        let err = adapter.fetch_page(&request(None)).await.unwrap_err();
        assert!(matches!(
            err,
            AdapterError::Fetch(FetchError::HttpStatus { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn fixture_listing_follows_page_cursors() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = dir.path().join("sample.json");
        std::fs::write(
            &fixture,
            json!({
                "pages": [
                    {"reviews": [{"content": "a", "score": 4, "at": "2024-01-01"}], "continuation_token": "page-1"},
                    {"reviews": [{"content": "b", "score": 2, "at": "2024-01-02"}], "continuation_token": null}
                ]
            })
            .to_string(),
        )
        .unwrap();

        let adapter = FixtureListingAdapter::from_path(&fixture).unwrap();
        let first = adapter.fetch_page(&request(None)).await.unwrap();
        assert_eq!(first.continuation_token.as_deref(), Some("page-1"));
        let second = adapter.fetch_page(&request(Some("page-1"))).await.unwrap();
        assert_eq!(second.reviews[0].content, "b");
        assert_eq!(second.continuation_token, None);
        let past_end = adapter.fetch_page(&request(Some("page-5"))).await.unwrap();
        assert!(past_end.reviews.is_empty());
        assert_eq!(past_end.continuation_token, None);
        assert!(adapter.fetch_page(&request(Some("bogus"))).await.is_err());
    }

    #[test]
    fn fixture_mode_requires_a_file() {
        let source = TrackedSource {
            source_name: "Dashen Bank".to_string(),
            app_id: "com.dashen.dashensuperapp".to_string(),
            target: 10,
            mode: ListingMode::Fixture,
            fixture: None,
        };
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        assert!(adapter_for_source(&source, &http, "http://localhost/reviews").is_err());
    }

    #[test]
    fn out_of_range_scores_become_invalid_ratings() {
        let listed = ListedReview {
            content: "meh".to_string(),
            score: 11,
            at: json!(1715933575),
        };
        let record = listed.into_record("Bank of Abyssinia");
        assert_eq!(record.rating, 0);
        assert!(!record.is_valid());
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 5, 17));
    }
}
