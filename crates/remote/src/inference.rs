use std::env;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use chunkqa_core::{EncodedBatch, ModelKind, ModelOutput, QaError, ScoringModel};

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub endpoint: String,
    pub kind: ModelKind,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: usize,
    pub concurrent_calls: bool,
}

impl InferenceConfig {
    pub fn new(endpoint: impl Into<String>, kind: ModelKind) -> Self {
        Self {
            endpoint: endpoint.into(),
            kind,
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            concurrent_calls: true,
        }
    }

    /// `CHUNKQA_SPAN_MODEL_URL` or `CHUNKQA_READER_MODEL_URL`, plus shared knobs.
    pub fn from_env(kind: ModelKind) -> Result<Self> {
        let key = match kind {
            ModelKind::SingleSpan => "CHUNKQA_SPAN_MODEL_URL",
            ModelKind::Relevance => "CHUNKQA_READER_MODEL_URL",
        };
        let endpoint = env::var(key).map_err(|_| anyhow!("{key} is required"))?;
        let mut config = Self::new(endpoint, kind);
        config.api_key = env::var("CHUNKQA_MODEL_API_KEY").ok();
        if let Some(secs) = env::var("CHUNKQA_MODEL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = env::var("CHUNKQA_MODEL_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_retries = retries;
        }
        Ok(config)
    }
}

/// Scoring model served over HTTP. Posts token ids, receives logits.
#[derive(Clone)]
pub struct InferenceClient {
    http: Client,
    config: InferenceConfig,
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    input_ids: &'a [Vec<u32>],
    attention_mask: &'a [Vec<u32>],
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    start_logits: Vec<Vec<f32>>,
    end_logits: Vec<Vec<f32>>,
    #[serde(default)]
    relevance_logits: Option<RelevanceLogits>,
}

/// Readers emit either one scalar per item or a small vector per item.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelevanceLogits {
    Flat(Vec<f32>),
    Nested(Vec<Vec<f32>>),
}

impl From<InferenceResponse> for ModelOutput {
    fn from(value: InferenceResponse) -> Self {
        let relevance_logits = value.relevance_logits.map(|logits| match logits {
            RelevanceLogits::Flat(values) => values.into_iter().map(|v| vec![v]).collect(),
            RelevanceLogits::Nested(rows) => rows,
        });
        Self {
            start_logits: value.start_logits,
            end_logits: value.end_logits,
            relevance_logits,
        }
    }
}

impl InferenceClient {
    pub fn new(config: InferenceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build inference http client")?;
        Ok(Self { http, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn request(&self, batch: &EncodedBatch) -> Result<ModelOutput> {
        let payload = InferenceRequest {
            input_ids: &batch.input_ids,
            attention_mask: &batch.attention_mask,
        };
        let max_retries = self.config.max_retries;
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let mut builder = self.http.post(&self.config.endpoint).json(&payload);
            if let Some(key) = &self.config.api_key {
                builder = builder.bearer_auth(key);
            }
            let response = match builder.send() {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt > max_retries {
                        return Err(err).context("inference request failed");
                    }
                    warn!(attempt, "inference request failed, retrying: {err}");
                    sleep(backoff_delay(attempt, None));
                    continue;
                }
            };
            let status = response.status();
            if is_retryable(status) {
                if attempt > max_retries {
                    bail!("inference endpoint returned {status} after {max_retries} retries");
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                warn!(attempt, %status, wait_secs = wait.as_secs(), "inference endpoint busy");
                sleep(wait);
                continue;
            }
            if !status.is_success() {
                bail!("inference endpoint returned {status}");
            }
            let parsed: InferenceResponse = response
                .json()
                .context("failed to decode inference response")?;
            return Ok(parsed.into());
        }
    }
}

impl ScoringModel for InferenceClient {
    fn kind(&self) -> ModelKind {
        self.config.kind
    }

    fn score(&self, batch: &EncodedBatch) -> chunkqa_core::Result<ModelOutput> {
        self.request(batch)
            .map_err(|err| QaError::Model(format!("{err:#}")))
    }

    fn supports_concurrent_calls(&self) -> bool {
        self.config.concurrent_calls
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.parse::<u64>() {
                return Duration::from_secs(secs.max(1));
            }
        }
    }
    let capped = attempt.min(6) as u32;
    Duration::from_secs(1u64 << capped)
}
