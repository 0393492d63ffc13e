use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::answer::{rank, Answer, AnswerCandidate, ScoreKind};
use crate::chunk::Chunker;
use crate::config::QaConfig;
use crate::error::{QaError, Result};
use crate::reader::{RelevanceReader, SpanReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Squad,
    Dpr,
}

impl Method {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "squad" => Some(Method::Squad),
            "dpr" => Some(Method::Dpr),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Squad => "squad",
            Method::Dpr => "dpr",
        }
    }
}

pub struct QaPipeline {
    config: QaConfig,
    span_reader: Option<SpanReader>,
    relevance_reader: Option<RelevanceReader>,
}

impl QaPipeline {
    pub fn new(config: QaConfig) -> Self {
        Self {
            config,
            span_reader: None,
            relevance_reader: None,
        }
    }

    pub fn with_span_reader(mut self, reader: SpanReader) -> Self {
        self.span_reader = Some(reader.with_no_answer_score(self.config.no_answer_score));
        self
    }

    pub fn with_relevance_reader(mut self, reader: RelevanceReader) -> Self {
        self.relevance_reader = Some(reader);
        self
    }

    pub fn config(&self) -> &QaConfig {
        &self.config
    }

    pub fn supports(&self, method: Method) -> bool {
        match method {
            Method::Squad => self.span_reader.is_some(),
            Method::Dpr => self.relevance_reader.is_some(),
        }
    }

    pub fn answer_question(&self, question: &str, document: &str) -> Result<Answer> {
        self.span_reader()?.answer_question(question, document)
    }

    pub fn answer_documents(
        &self,
        question: &str,
        documents: &[String],
    ) -> Result<Vec<AnswerCandidate>> {
        let reader = self.span_reader()?;
        documents
            .iter()
            .map(|document| {
                Ok(AnswerCandidate {
                    answer: reader.answer_question(question, document)?,
                    kind: ScoreKind::Confidence,
                    source: document.clone(),
                    title: None,
                })
            })
            .collect()
    }

    pub fn answer_question_chunked(
        &self,
        question: &str,
        document: &str,
    ) -> Result<Vec<AnswerCandidate>> {
        let started = Instant::now();
        let reader = self.span_reader()?;
        reader.check_question(question)?;
        let chunks = Chunker::new(reader.tokenizer(), reader.budget())
            .chunk(document, self.config.consolidate)?;

        let concurrent = self.config.parallel_chunks
            && chunks.len() > 1
            && reader.model().supports_concurrent_calls();
        let answers: Vec<Answer> = if concurrent {
            chunks
                .par_iter()
                .map(|chunk| reader.answer_question(question, chunk))
                .collect::<Result<_>>()?
        } else {
            chunks
                .iter()
                .map(|chunk| reader.answer_question(question, chunk))
                .collect::<Result<_>>()?
        };

        let mut candidates: Vec<AnswerCandidate> = answers
            .into_iter()
            .zip(chunks)
            .map(|(answer, chunk)| AnswerCandidate {
                answer,
                kind: ScoreKind::Confidence,
                source: chunk,
                title: None,
            })
            .collect();
        rank(&mut candidates);
        debug!(
            chunks = candidates.len(),
            concurrent,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "answered chunked document"
        );
        Ok(candidates)
    }

    pub fn read_chunked_document(
        &self,
        question: &str,
        document: &str,
        title: &str,
    ) -> Result<Vec<AnswerCandidate>> {
        let started = Instant::now();
        let reader = self.relevance_reader()?;
        reader.check_question(question)?;
        let chunks = Chunker::new(reader.tokenizer(), reader.chunk_budget(title)?)
            .chunk(document, self.config.consolidate)?;
        let titles = vec![title.to_string(); chunks.len()];
        let candidates = reader.read_documents(question, &chunks, &titles)?;
        debug!(
            chunks = candidates.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "read chunked document"
        );
        Ok(candidates)
    }

    pub fn read_documents(
        &self,
        question: &str,
        documents: &[String],
        titles: &[String],
    ) -> Result<Vec<AnswerCandidate>> {
        self.relevance_reader()?
            .read_documents(question, documents, titles)
    }

    pub fn answer(
        &self,
        question: &str,
        document: &str,
        method: Method,
    ) -> Result<Vec<AnswerCandidate>> {
        match method {
            Method::Squad => self.answer_question_chunked(question, document),
            Method::Dpr => self.read_chunked_document(question, document, ""),
        }
    }

    fn span_reader(&self) -> Result<&SpanReader> {
        self.span_reader
            .as_ref()
            .ok_or_else(|| QaError::Model("no single-span model configured".to_string()))
    }

    fn relevance_reader(&self) -> Result<&RelevanceReader> {
        self.relevance_reader
            .as_ref()
            .ok_or_else(|| QaError::Model("no relevance model configured".to_string()))
    }
}
