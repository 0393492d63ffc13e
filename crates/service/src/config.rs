use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use chunkqa_remote::DEFAULT_EXTRACTOR_ENDPOINT;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub request_timeout_secs: u64,
    pub span_tokenizer: Option<PathBuf>,
    pub span_model_url: Option<String>,
    pub reader_tokenizer: Option<PathBuf>,
    pub reader_model_url: Option<String>,
    pub extractor_url: String,
    pub model_timeout_secs: u64,
    pub model_max_retries: usize,
    pub model_api_key: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            request_timeout_secs: 120,
            span_tokenizer: None,
            span_model_url: None,
            reader_tokenizer: None,
            reader_model_url: None,
            extractor_url: DEFAULT_EXTRACTOR_ENDPOINT.to_string(),
            model_timeout_secs: 30,
            model_max_retries: 3,
            model_api_key: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    service: ServiceConfig,
}

impl ServiceConfig {
    /// Reads the `[service]` table; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file: ConfigFile = toml::from_str(&contents)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(file.service)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var("BIND_ADDR") {
            self.bind_addr = value;
        }
        if let Some(value) = env::var("CHUNKQA_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.request_timeout_secs = value;
        }
        if let Ok(value) = env::var("CHUNKQA_SPAN_TOKENIZER") {
            self.span_tokenizer = Some(PathBuf::from(value));
        }
        if let Ok(value) = env::var("CHUNKQA_SPAN_MODEL_URL") {
            self.span_model_url = Some(value);
        }
        if let Ok(value) = env::var("CHUNKQA_READER_TOKENIZER") {
            self.reader_tokenizer = Some(PathBuf::from(value));
        }
        if let Ok(value) = env::var("CHUNKQA_READER_MODEL_URL") {
            self.reader_model_url = Some(value);
        }
        if let Ok(value) = env::var("CHUNKQA_EXTRACTOR_URL") {
            self.extractor_url = value;
        }
        if let Ok(value) = env::var("CHUNKQA_MODEL_API_KEY") {
            self.model_api_key = Some(value);
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs.max(1))
    }
}
