mod answer;
mod chunk;
mod config;
mod error;
mod model;
mod pipeline;
mod reader;
mod tokenize;

pub use answer::{rank, Answer, AnswerCandidate, ScoreKind, DEFAULT_NO_ANSWER_SCORE};
pub use chunk::{ChunkReport, Chunker, DroppedSentence, TokenBudget};
pub use config::{QaConfig, DEFAULT_CONFIG};
pub use error::{QaError, Result};
pub use model::{EncodedBatch, ModelKind, ModelOutput, ScoringModel};
pub use pipeline::{Method, QaPipeline};
pub use reader::{reconstruct_tokens, RelevanceReader, SpanReader};
pub use tokenize::{BpeCounter, Encoding, HfTokenizer, QaTokenizer, TokenLength, TokenizerKind};
