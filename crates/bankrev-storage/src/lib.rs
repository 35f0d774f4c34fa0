//! HTTP fetch utilities, CSV checkpoint files and the relational review store.

use std::time::Duration;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{info_span, Instrument};

mod checkpoint;
mod store;

pub use checkpoint::{
    read_enriched_reviews, read_raw_reviews, write_enriched_reviews, write_raw_reviews,
    CheckpointError, ENRICHED_REQUIRED_COLUMNS, RAW_REQUIRED_COLUMNS,
};
pub use store::{LoadOutcome, ReviewStore, StoreError};

pub const CRATE_NAME: &str = "bankrev-storage";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
struct FetchedResponse {
    final_url: String,
    body: Vec<u8>,
}

/// Thin reqwest wrapper shared by the listing adapter and the sentiment
/// client. Calls are made one at a time by the callers; no retries here.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn get_json<T, Q>(&self, url: &str, query: &Q) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let span = info_span!("http_get", url);
        async {
            let resp = self.client.get(url).query(query).send().await?;
            let fetched = Self::read_success(resp).await?;
            decode_json(&fetched)
        }
        .instrument(span)
        .await
    }

    pub async fn post_json<T, B>(
        &self,
        url: &str,
        body: &B,
        bearer_token: Option<&str>,
    ) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let span = info_span!("http_post", url);
        async {
            let mut request = self.client.post(url).json(body);
            if let Some(token) = bearer_token {
                request = request.bearer_auth(token);
            }
            let resp = request.send().await?;
            let fetched = Self::read_success(resp).await?;
            decode_json(&fetched)
        }
        .instrument(span)
        .await
    }

    async fn read_success(resp: reqwest::Response) -> Result<FetchedResponse, FetchError> {
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let body = resp.bytes().await?.to_vec();
        Ok(FetchedResponse { final_url, body })
    }
}

/// Fixed pause between consecutive outbound calls. Not a backoff.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    delay: Duration,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

fn decode_json<T: DeserializeOwned>(fetched: &FetchedResponse) -> Result<T, FetchError> {
    serde_json::from_slice(&fetched.body).map_err(|source| FetchError::Decode {
        url: fetched.final_url.clone(),
        source,
    })
}
