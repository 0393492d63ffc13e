use serde::{Deserialize, Serialize};

use crate::error::{QaError, Result};
use crate::tokenize::Encoding;

const PAD_TOKEN: &str = "[PAD]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    SingleSpan,
    Relevance,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedBatch {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u32>>,
    pub tokens: Vec<Vec<String>>,
    pub special_tokens_mask: Vec<Vec<u32>>,
}

impl EncodedBatch {
    pub fn from_encodings(encodings: Vec<Encoding>, pad_id: u32) -> Self {
        let width = encodings.iter().map(Encoding::len).max().unwrap_or(0);
        let mut batch = Self::default();
        for mut encoding in encodings {
            let missing = width - encoding.len();
            encoding.ids.extend(std::iter::repeat(pad_id).take(missing));
            encoding.attention_mask.extend(std::iter::repeat(0).take(missing));
            encoding
                .tokens
                .extend(std::iter::repeat(PAD_TOKEN.to_string()).take(missing));
            encoding
                .special_tokens_mask
                .extend(std::iter::repeat(1).take(missing));
            batch.input_ids.push(encoding.ids);
            batch.attention_mask.push(encoding.attention_mask);
            batch.tokens.push(encoding.tokens);
            batch.special_tokens_mask.push(encoding.special_tokens_mask);
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    pub fn width(&self) -> usize {
        self.input_ids.first().map(Vec::len).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub start_logits: Vec<Vec<f32>>,
    pub end_logits: Vec<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_logits: Option<Vec<Vec<f32>>>,
}

impl ModelOutput {
    pub fn validate(&self, batch: &EncodedBatch) -> Result<()> {
        let rows = batch.len();
        if self.start_logits.len() != rows || self.end_logits.len() != rows {
            return Err(QaError::Model(format!(
                "expected {rows} logit rows, got {} start / {} end",
                self.start_logits.len(),
                self.end_logits.len()
            )));
        }
        for (idx, ids) in batch.input_ids.iter().enumerate() {
            if self.start_logits[idx].len() != ids.len() || self.end_logits[idx].len() != ids.len()
            {
                return Err(QaError::Model(format!(
                    "row {idx}: logits do not cover {} positions",
                    ids.len()
                )));
            }
        }
        if let Some(relevance) = &self.relevance_logits {
            if relevance.len() != rows {
                return Err(QaError::Model(format!(
                    "expected {rows} relevance rows, got {}",
                    relevance.len()
                )));
            }
        }
        Ok(())
    }
}

pub trait ScoringModel: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn score(&self, batch: &EncodedBatch) -> Result<ModelOutput>;

    fn supports_concurrent_calls(&self) -> bool {
        true
    }
}
