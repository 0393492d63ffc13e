use std::sync::Arc;

use tracing::debug;

use crate::answer::{rank, Answer, AnswerCandidate, ScoreKind, DEFAULT_NO_ANSWER_SCORE};
use crate::chunk::TokenBudget;
use crate::error::{QaError, Result};
use crate::model::{EncodedBatch, ModelKind, ModelOutput, ScoringModel};
use crate::tokenize::QaTokenizer;

const CONTINUATION_PREFIX: &str = "##";

#[derive(Clone)]
pub struct SpanReader {
    tokenizer: Arc<dyn QaTokenizer>,
    model: Arc<dyn ScoringModel>,
    budget: TokenBudget,
    no_answer_score: f32,
}

impl SpanReader {
    pub fn new(
        tokenizer: Arc<dyn QaTokenizer>,
        model: Arc<dyn ScoringModel>,
        budget: TokenBudget,
    ) -> Self {
        Self {
            tokenizer,
            model,
            budget,
            no_answer_score: DEFAULT_NO_ANSWER_SCORE,
        }
    }

    pub fn with_no_answer_score(mut self, score: f32) -> Self {
        self.no_answer_score = score;
        self
    }

    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    pub fn tokenizer(&self) -> &dyn QaTokenizer {
        self.tokenizer.as_ref()
    }

    pub fn model(&self) -> &dyn ScoringModel {
        self.model.as_ref()
    }

    pub fn check_question(&self, question: &str) -> Result<()> {
        check_question(self.tokenizer.as_ref(), question, &self.budget)
    }

    pub fn answer_question(&self, question: &str, document: &str) -> Result<Answer> {
        check_question(self.tokenizer.as_ref(), question, &self.budget)?;
        let document_length = self.tokenizer.token_length(document)?;
        let limit = self.budget.max_tokens_document();
        if document_length > limit {
            return Err(QaError::Validation {
                field: "document",
                length: document_length,
                limit,
            });
        }

        let encoding = self.tokenizer.encode_pair(question, document)?;
        let batch = EncodedBatch::from_encodings(vec![encoding], self.tokenizer.pad_id());
        let output = self.model.score(&batch)?;
        output.validate(&batch)?;

        let start_logits = &output.start_logits[0];
        let end_logits = &output.end_logits[0];
        let confidence = max_logit(start_logits).max(max_logit(end_logits));
        let span = match (argmax(start_logits), argmax(end_logits)) {
            (Some(start), Some(end)) => {
                span_text(&batch.tokens[0], &batch.special_tokens_mask[0], start, end)
            }
            _ => None,
        };
        Ok(match span {
            Some(text) => Answer::Answered {
                text,
                score: confidence,
            },
            None => {
                debug!(confidence, "model predicted an empty span");
                Answer::NoAnswer {
                    score: self.no_answer_score,
                }
            }
        })
    }
}

#[derive(Clone)]
pub struct RelevanceReader {
    tokenizer: Arc<dyn QaTokenizer>,
    model: Arc<dyn ScoringModel>,
    budget: TokenBudget,
}

impl RelevanceReader {
    pub fn new(
        tokenizer: Arc<dyn QaTokenizer>,
        model: Arc<dyn ScoringModel>,
        budget: TokenBudget,
    ) -> Result<Self> {
        if model.kind() != ModelKind::Relevance {
            return Err(QaError::Model(
                "relevance reader requires a relevance-aware model".to_string(),
            ));
        }
        Ok(Self {
            tokenizer,
            model,
            budget,
        })
    }

    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    pub fn tokenizer(&self) -> &dyn QaTokenizer {
        self.tokenizer.as_ref()
    }

    pub fn check_question(&self, question: &str) -> Result<()> {
        check_question(self.tokenizer.as_ref(), question, &self.budget)
    }

    // The title and its trailing separator share the encoding with every chunk.
    pub fn chunk_budget(&self, title: &str) -> Result<TokenBudget> {
        let title_tokens = self
            .tokenizer
            .token_length(title)?
            .saturating_sub(self.tokenizer.token_length("")?);
        let reserve = title_tokens + 1;
        let available = self.budget.max_tokens_document();
        if reserve >= available {
            return Err(QaError::Validation {
                field: "title",
                length: title_tokens,
                limit: available.saturating_sub(2),
            });
        }
        Ok(TokenBudget {
            max_tokens: self.budget.max_tokens - reserve,
            max_tokens_question: self.budget.max_tokens_question,
        })
    }

    pub fn read_documents(
        &self,
        question: &str,
        documents: &[String],
        titles: &[String],
    ) -> Result<Vec<AnswerCandidate>> {
        if documents.len() != titles.len() {
            return Err(QaError::InvalidInput(format!(
                "{} documents but {} titles",
                documents.len(),
                titles.len()
            )));
        }
        check_question(self.tokenizer.as_ref(), question, &self.budget)?;
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut encodings = Vec::with_capacity(documents.len());
        for (document, title) in documents.iter().zip(titles) {
            let encoding = self.tokenizer.encode_reader(question, title, document)?;
            if encoding.len() > self.budget.max_tokens {
                return Err(QaError::Validation {
                    field: "reader input",
                    length: encoding.len(),
                    limit: self.budget.max_tokens,
                });
            }
            encodings.push(encoding);
        }
        let batch = EncodedBatch::from_encodings(encodings, self.tokenizer.pad_id());
        let output = self.model.score(&batch)?;
        output.validate(&batch)?;
        let candidates = collect_candidates(&batch, &output, documents, titles)?;
        debug!(items = candidates.len(), "read documents");
        Ok(candidates)
    }
}

fn collect_candidates(
    batch: &EncodedBatch,
    output: &ModelOutput,
    documents: &[String],
    titles: &[String],
) -> Result<Vec<AnswerCandidate>> {
    let relevance_rows = output
        .relevance_logits
        .as_ref()
        .ok_or_else(|| QaError::Model("model returned no relevance logits".to_string()))?;
    let mut candidates = Vec::with_capacity(documents.len());
    for idx in 0..documents.len() {
        let relevance = max_logit(&relevance_rows[idx]);
        let span = match (
            argmax(&output.start_logits[idx]),
            argmax(&output.end_logits[idx]),
        ) {
            (Some(start), Some(end)) => span_text(
                &batch.tokens[idx],
                &batch.special_tokens_mask[idx],
                start,
                end,
            ),
            _ => None,
        };
        let answer = match span {
            Some(text) => Answer::Answered {
                text,
                score: relevance,
            },
            None => Answer::NoAnswer { score: relevance },
        };
        candidates.push(AnswerCandidate {
            answer,
            kind: ScoreKind::Relevance,
            source: documents[idx].clone(),
            title: Some(titles[idx].clone()),
        });
    }
    rank(&mut candidates);
    Ok(candidates)
}

fn check_question(
    tokenizer: &dyn QaTokenizer,
    question: &str,
    budget: &TokenBudget,
) -> Result<()> {
    let length = tokenizer.token_length(question)?;
    if length > budget.max_tokens_question {
        return Err(QaError::Validation {
            field: "question",
            length,
            limit: budget.max_tokens_question,
        });
    }
    Ok(())
}

// First maximum wins; NaN never does.
fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

fn max_logit(values: &[f32]) -> f32 {
    values.iter().copied().fold(f32::NEG_INFINITY, f32::max)
}

fn span_text(tokens: &[String], special_mask: &[u32], start: usize, end: usize) -> Option<String> {
    if end < start || start >= tokens.len() {
        return None;
    }
    let end = end.min(tokens.len() - 1);
    let kept: Vec<&str> = tokens[start..=end]
        .iter()
        .zip(&special_mask[start..=end])
        .filter(|(_, special)| **special == 0)
        .map(|(token, _)| token.as_str())
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(reconstruct_tokens(&kept))
    }
}

pub fn reconstruct_tokens(tokens: &[&str]) -> String {
    let mut text = String::new();
    for token in tokens {
        match token.strip_prefix(CONTINUATION_PREFIX) {
            Some(rest) => text.push_str(rest),
            None => {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(token);
            }
        }
    }
    text
}
