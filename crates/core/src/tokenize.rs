use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::error::{QaError, Result};

pub trait TokenLength: Send + Sync {
    fn token_length(&self, text: &str) -> Result<usize>;
}

pub trait QaTokenizer: TokenLength {
    /// `[CLS] question [SEP] context [SEP]`
    fn encode_pair(&self, question: &str, context: &str) -> Result<Encoding>;

    /// `[CLS] question [SEP] title [SEP] text`
    fn encode_reader(&self, question: &str, title: &str, text: &str) -> Result<Encoding>;

    fn pad_id(&self) -> u32 {
        0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoding {
    pub ids: Vec<u32>,
    pub tokens: Vec<String>,
    pub attention_mask: Vec<u32>,
    pub special_tokens_mask: Vec<u32>,
}

impl Encoding {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn extend(&mut self, other: Encoding) {
        self.ids.extend(other.ids);
        self.tokens.extend(other.tokens);
        self.attention_mask.extend(other.attention_mask);
        self.special_tokens_mask.extend(other.special_tokens_mask);
    }
}

impl From<tokenizers::Encoding> for Encoding {
    fn from(value: tokenizers::Encoding) -> Self {
        Self {
            ids: value.get_ids().to_vec(),
            tokens: value.get_tokens().to_vec(),
            attention_mask: value.get_attention_mask().to_vec(),
            special_tokens_mask: value.get_special_tokens_mask().to_vec(),
        }
    }
}

pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    pad_id: u32,
}

impl HfTokenizer {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            QaError::Tokenizer(format!(
                "failed to load tokenizer {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self::new(inner))
    }

    pub fn new(inner: tokenizers::Tokenizer) -> Self {
        let pad_id = inner.token_to_id("[PAD]").unwrap_or(0);
        Self { inner, pad_id }
    }

    fn encode_raw<'s, E>(&self, input: E, add_special_tokens: bool) -> Result<Encoding>
    where
        E: Into<tokenizers::EncodeInput<'s>>,
    {
        self.inner
            .encode(input, add_special_tokens)
            .map(Encoding::from)
            .map_err(|e| QaError::Tokenizer(e.to_string()))
    }
}

impl TokenLength for HfTokenizer {
    fn token_length(&self, text: &str) -> Result<usize> {
        Ok(self.encode_raw(text, true)?.len())
    }
}

impl QaTokenizer for HfTokenizer {
    fn encode_pair(&self, question: &str, context: &str) -> Result<Encoding> {
        self.encode_raw((question, context), true)
    }

    fn encode_reader(&self, question: &str, title: &str, text: &str) -> Result<Encoding> {
        let mut encoding = self.encode_raw((question, title), true)?;
        encoding.extend(self.encode_raw(text, false)?);
        Ok(encoding)
    }

    fn pad_id(&self) -> u32 {
        self.pad_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenizerKind {
    Cl100k,
    Gpt2,
    O200k,
    Custom(PathBuf),
}

impl TokenizerKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "cl100k" | "cl100k_base" => Some(TokenizerKind::Cl100k),
            "o200k" | "o200k_base" => Some(TokenizerKind::O200k),
            "gpt2" | "p50k" | "p50k_base" => Some(TokenizerKind::Gpt2),
            _ => None,
        }
    }

    pub fn build(&self) -> Result<BpeCounter> {
        let bpe = match self {
            TokenizerKind::Cl100k => {
                tiktoken_rs::cl100k_base().map_err(|e| QaError::Tokenizer(e.to_string()))?
            }
            TokenizerKind::Gpt2 => {
                tiktoken_rs::p50k_base().map_err(|e| QaError::Tokenizer(e.to_string()))?
            }
            TokenizerKind::O200k => {
                tiktoken_rs::o200k_base().map_err(|e| QaError::Tokenizer(e.to_string()))?
            }
            TokenizerKind::Custom(path) => BpeVocabulary::load(path)?.into_core_bpe()?,
        };
        Ok(BpeCounter { bpe })
    }
}

pub struct BpeCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TokenLength for BpeCounter {
    fn token_length(&self, text: &str) -> Result<usize> {
        Ok(self.bpe.encode_with_special_tokens(text).len())
    }
}

const END_OF_TEXT: &str = "<|endoftext|>";

// tiktoken exports use `pat_str`/`mergeable_ranks`; the short names are accepted too.
#[derive(Deserialize)]
struct BpeVocabulary {
    #[serde(alias = "pat_str")]
    pattern: String,
    #[serde(alias = "mergeable_ranks")]
    ranks: HashMap<String, usize>,
    #[serde(default)]
    special_tokens: HashMap<String, usize>,
}

impl BpeVocabulary {
    fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| {
            QaError::Tokenizer(format!("failed to read vocabulary {}: {e}", path.display()))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            QaError::Tokenizer(format!("invalid vocabulary {}: {e}", path.display()))
        })
    }

    fn into_core_bpe(self) -> Result<tiktoken_rs::CoreBPE> {
        let mut encoder: FxHashMap<Vec<u8>, usize> = FxHashMap::default();
        let mut seen: FxHashMap<usize, String> = FxHashMap::default();
        for (key, rank) in self.ranks {
            let bytes = general_purpose::STANDARD.decode(&key).map_err(|e| {
                QaError::Tokenizer(format!("vocabulary key {key:?} is not base64: {e}"))
            })?;
            if let Some(previous) = seen.insert(rank, key.clone()) {
                return Err(QaError::Tokenizer(format!(
                    "rank {rank} is shared by {previous:?} and {key:?}"
                )));
            }
            encoder.insert(bytes, rank);
        }
        if encoder.is_empty() {
            return Err(QaError::Tokenizer("vocabulary has no ranks".to_string()));
        }

        let mut special: FxHashMap<String, usize> = self.special_tokens.into_iter().collect();
        if special.is_empty() {
            // An empty special set compiles to a pattern that matches everywhere.
            let next_rank = seen.keys().max().map_or(0, |rank| rank + 1);
            special.insert(END_OF_TEXT.to_string(), next_rank);
        }
        tiktoken_rs::CoreBPE::new(encoder, special, &self.pattern)
            .map_err(|e| QaError::Tokenizer(format!("invalid vocabulary pattern: {e}")))
    }
}
