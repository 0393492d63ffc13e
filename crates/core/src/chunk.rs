use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::tokenize::TokenLength;

const PARAGRAPH_JOINER: &str = "\n";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenBudget {
    pub max_tokens: usize,
    pub max_tokens_question: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            max_tokens_question: 30,
        }
    }
}

impl TokenBudget {
    // Question plus [CLS] and [SEP].
    pub fn max_tokens_document(&self) -> usize {
        self.max_tokens
            .saturating_sub(self.max_tokens_question)
            .saturating_sub(2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedSentence {
    pub paragraph_index: usize,
    pub token_length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    pub chunks: Vec<String>,
    pub dropped: Vec<DroppedSentence>,
}

pub struct Chunker<'a, T: ?Sized> {
    tokenizer: &'a T,
    budget: TokenBudget,
}

impl<'a, T: TokenLength + ?Sized> Chunker<'a, T> {
    pub fn new(tokenizer: &'a T, budget: TokenBudget) -> Self {
        Self { tokenizer, budget }
    }

    pub fn chunk(&self, document: &str, consolidate: bool) -> Result<Vec<String>> {
        Ok(self.chunk_with_report(document, consolidate)?.chunks)
    }

    pub fn chunk_with_report(&self, document: &str, consolidate: bool) -> Result<ChunkReport> {
        let limit = self.budget.max_tokens_document();
        let document_length = self.tokenizer.token_length(document)?;
        if document_length <= limit {
            return Ok(ChunkReport {
                chunks: vec![document.to_string()],
                dropped: Vec::new(),
            });
        }

        let mut report = ChunkReport::default();
        let mut candidates: Vec<(&str, usize)> = Vec::new();
        for (paragraph_index, paragraph) in paragraphs(document).enumerate() {
            let paragraph_length = self.tokenizer.token_length(paragraph)?;
            if paragraph_length <= limit {
                candidates.push((paragraph, paragraph_length));
                continue;
            }
            for sentence in sentences(paragraph) {
                let sentence_length = self.tokenizer.token_length(sentence)?;
                if sentence_length <= limit {
                    candidates.push((sentence, sentence_length));
                } else {
                    warn!(
                        paragraph = paragraph_index,
                        tokens = sentence_length,
                        limit,
                        "ignoring overlong sentence"
                    );
                    report.dropped.push(DroppedSentence {
                        paragraph_index,
                        token_length: sentence_length,
                    });
                }
            }
        }

        report.chunks = if consolidate {
            self.consolidate(&candidates, limit)?
        } else {
            candidates
                .iter()
                .map(|(text, _)| text.to_string())
                .collect()
        };
        if report.chunks.is_empty() {
            warn!(
                tokens = document_length,
                limit, "document produced no chunks within budget"
            );
        }
        debug!(
            tokens = document_length,
            candidates = candidates.len(),
            chunks = report.chunks.len(),
            dropped = report.dropped.len(),
            "chunked document"
        );
        Ok(report)
    }

    fn consolidate(&self, candidates: &[(&str, usize)], limit: usize) -> Result<Vec<String>> {
        let joiner_cost = self.joiner_cost()?;
        let mut consolidated = Vec::new();
        let mut current = String::new();
        let mut running = 0usize;
        for &(text, length) in candidates {
            if current.is_empty() {
                current.push_str(text);
                running = length;
                continue;
            }
            let grown = running + joiner_cost + length;
            if grown < limit {
                current.push_str(PARAGRAPH_JOINER);
                current.push_str(text);
                running = grown;
            } else {
                consolidated.push(std::mem::take(&mut current));
                current.push_str(text);
                running = length;
            }
        }
        if !current.is_empty() {
            consolidated.push(current);
        }
        Ok(consolidated)
    }

    // WordPiece counts nothing for a newline; byte-level BPE spends a token on it.
    fn joiner_cost(&self) -> Result<usize> {
        let joined = self.tokenizer.token_length(PARAGRAPH_JOINER)?;
        let empty = self.tokenizer.token_length("")?;
        Ok(joined.saturating_sub(empty))
    }
}

fn paragraphs(document: &str) -> impl Iterator<Item = &str> {
    document.lines().filter(|line| !line.trim().is_empty())
}

fn sentences(paragraph: &str) -> impl Iterator<Item = &str> {
    paragraph
        .split_inclusive('.')
        .filter(|piece| piece.chars().any(|c| c != '.' && !c.is_whitespace()))
}
