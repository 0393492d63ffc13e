use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::answer::DEFAULT_NO_ANSWER_SCORE;
use crate::chunk::TokenBudget;
use crate::error::{QaError, Result};

pub const DEFAULT_CONFIG: &str = "chunkqa.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    pub max_tokens: usize,
    pub max_tokens_question: usize,
    pub consolidate: bool,
    pub no_answer_score: f32,
    pub parallel_chunks: bool,
}

impl Default for QaConfig {
    fn default() -> Self {
        let budget = TokenBudget::default();
        Self {
            max_tokens: budget.max_tokens,
            max_tokens_question: budget.max_tokens_question,
            consolidate: true,
            no_answer_score: DEFAULT_NO_ANSWER_SCORE,
            parallel_chunks: false,
        }
    }
}

impl QaConfig {
    pub fn budget(&self) -> TokenBudget {
        TokenBudget {
            max_tokens: self.max_tokens,
            max_tokens_question: self.max_tokens_question,
        }
    }

    /// Reads the `[qa]` table of a TOML file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&contents).map_err(|e| QaError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(file.qa)
    }

    /// `CHUNKQA_CONFIG` (or `chunkqa.toml`) followed by `CHUNKQA_*` overrides.
    pub fn from_env() -> Result<Self> {
        let path = env::var("CHUNKQA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
        let mut config = Self::load(Path::new(&path))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_parse("CHUNKQA_MAX_TOKENS") {
            self.max_tokens = value;
        }
        if let Some(value) = env_parse("CHUNKQA_MAX_TOKENS_QUESTION") {
            self.max_tokens_question = value;
        }
        if let Ok(value) = env::var("CHUNKQA_CONSOLIDATE") {
            self.consolidate = parse_bool(&value);
        }
        if let Some(value) = env_parse("CHUNKQA_NO_ANSWER_SCORE") {
            self.no_answer_score = value;
        }
        if let Ok(value) = env::var("CHUNKQA_PARALLEL_CHUNKS") {
            self.parallel_chunks = parse_bool(&value);
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    qa: QaConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
