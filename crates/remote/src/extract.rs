use std::env;
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_EXTRACTOR_ENDPOINT: &str = "https://boilerpipe-web.appspot.com/extract";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("text extraction request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("text extraction service returned {status} for {url}")]
    Status { status: u16, url: String },
    #[error("text extraction service returned malformed json: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("text extraction response has no response.content")]
    MissingContent,
}

/// Client for a boilerplate-removal service answering `{"response": {"content": ...}}`.
#[derive(Clone)]
pub struct TextExtractor {
    http: Client,
    endpoint: String,
}

impl TextExtractor {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_env() -> Result<Self, FetchError> {
        let endpoint = env::var("CHUNKQA_EXTRACTOR_URL")
            .unwrap_or_else(|_| DEFAULT_EXTRACTOR_ENDPOINT.to_string());
        Self::new(endpoint, Duration::from_secs(30))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetches the main text of `url`. Failures are returned as-is, never retried.
    pub fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("url", url), ("output", "json")])
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.text()?;
        let value: Value = serde_json::from_str(&body)?;
        let content = extract_content(&value)?;
        debug!(url, chars = content.len(), "extracted document text");
        Ok(content)
    }
}

pub fn extract_content(value: &Value) -> Result<String, FetchError> {
    value
        .get("response")
        .and_then(|response| response.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(FetchError::MissingContent)
}
