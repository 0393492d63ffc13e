#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use chunkqa_core::{
    EncodedBatch, Encoding, ModelKind, ModelOutput, QaTokenizer, Result, ScoringModel,
    TokenLength,
};

pub const CLS: &str = "[CLS]";
pub const SEP: &str = "[SEP]";

/// Splits on whitespace, then into alphanumeric runs and single punctuation marks.
/// Every lone sequence costs two extra control tokens, like a BERT tokenizer.
pub struct WordTokenizer;

impl WordTokenizer {
    pub fn pieces(text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        for word in text.split_whitespace() {
            let mut current = String::new();
            for ch in word.chars() {
                if ch.is_alphanumeric() {
                    current.push(ch);
                } else {
                    if !current.is_empty() {
                        pieces.push(std::mem::take(&mut current));
                    }
                    pieces.push(ch.to_string());
                }
            }
            if !current.is_empty() {
                pieces.push(current);
            }
        }
        pieces
    }

    fn push(encoding: &mut Encoding, token: &str, special: bool) {
        encoding.ids.push(token_id(token));
        encoding.tokens.push(token.to_string());
        encoding.attention_mask.push(1);
        encoding.special_tokens_mask.push(u32::from(special));
    }

    fn push_text(encoding: &mut Encoding, text: &str) {
        for piece in Self::pieces(text) {
            Self::push(encoding, &piece, false);
        }
    }
}

impl TokenLength for WordTokenizer {
    fn token_length(&self, text: &str) -> Result<usize> {
        Ok(Self::pieces(text).len() + 2)
    }
}

impl QaTokenizer for WordTokenizer {
    fn encode_pair(&self, question: &str, context: &str) -> Result<Encoding> {
        let mut encoding = Encoding::default();
        Self::push(&mut encoding, CLS, true);
        Self::push_text(&mut encoding, question);
        Self::push(&mut encoding, SEP, true);
        Self::push_text(&mut encoding, context);
        Self::push(&mut encoding, SEP, true);
        Ok(encoding)
    }

    fn encode_reader(&self, question: &str, title: &str, text: &str) -> Result<Encoding> {
        let mut encoding = Encoding::default();
        Self::push(&mut encoding, CLS, true);
        Self::push_text(&mut encoding, question);
        Self::push(&mut encoding, SEP, true);
        Self::push_text(&mut encoding, title);
        Self::push(&mut encoding, SEP, true);
        Self::push_text(&mut encoding, text);
        Ok(encoding)
    }
}

fn token_id(token: &str) -> u32 {
    match token {
        CLS => 101,
        SEP => 102,
        _ => {
            let hash = token
                .bytes()
                .fold(2166136261u32, |acc, b| (acc ^ u32::from(b)).wrapping_mul(16777619));
            1000 + hash % 20000
        }
    }
}

/// Peaks start and end logits on the first occurrence of `target` after the question.
/// Without a match both peaks land on `[CLS]`, which reads as an empty span.
pub struct TargetModel {
    kind: ModelKind,
    target: String,
    calls: AtomicUsize,
    concurrent: bool,
    relevance_logits: bool,
}

impl TargetModel {
    pub fn span(target: &str) -> Self {
        Self {
            kind: ModelKind::SingleSpan,
            target: target.to_string(),
            calls: AtomicUsize::new(0),
            concurrent: true,
            relevance_logits: true,
        }
    }

    pub fn relevance(target: &str) -> Self {
        Self {
            kind: ModelKind::Relevance,
            ..Self::span(target)
        }
    }

    pub fn serial(mut self) -> Self {
        self.concurrent = false;
        self
    }

    pub fn without_relevance_logits(mut self) -> Self {
        self.relevance_logits = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn target_position(&self, tokens: &[String]) -> Option<usize> {
        let context_start = tokens.iter().position(|t| t == SEP)? + 1;
        tokens[context_start..]
            .iter()
            .position(|t| t == &self.target)
            .map(|idx| idx + context_start)
    }
}

impl ScoringModel for TargetModel {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn score(&self, batch: &EncodedBatch) -> Result<ModelOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut output = ModelOutput::default();
        let mut relevance = Vec::new();
        for tokens in &batch.tokens {
            let mut start = vec![0.0f32; tokens.len()];
            let mut end = vec![0.0f32; tokens.len()];
            match self.target_position(tokens) {
                Some(pos) => {
                    start[pos] = 5.0;
                    end[pos] = 4.0;
                    relevance.push(vec![3.0]);
                }
                None => {
                    start[0] = 1.0;
                    end[0] = 1.0;
                    relevance.push(vec![-2.0]);
                }
            }
            output.start_logits.push(start);
            output.end_logits.push(end);
        }
        if self.kind == ModelKind::Relevance && self.relevance_logits {
            output.relevance_logits = Some(relevance);
        }
        Ok(output)
    }

    fn supports_concurrent_calls(&self) -> bool {
        self.concurrent
    }
}

/// Always predicts the same start and end positions.
pub struct FixedSpanModel {
    pub start: usize,
    pub end: usize,
}

impl ScoringModel for FixedSpanModel {
    fn kind(&self) -> ModelKind {
        ModelKind::SingleSpan
    }

    fn score(&self, batch: &EncodedBatch) -> Result<ModelOutput> {
        let width = batch.width();
        let mut start = vec![0.0f32; width];
        let mut end = vec![0.0f32; width];
        start[self.start] = 2.5;
        end[self.end] = 3.5;
        Ok(ModelOutput {
            start_logits: vec![start],
            end_logits: vec![end],
            relevance_logits: None,
        })
    }
}

pub fn words(count: usize, stem: &str) -> String {
    (0..count)
        .map(|idx| format!("{stem}{idx}"))
        .collect::<Vec<_>>()
        .join(" ")
}
