use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

pub const DEFAULT_NO_ANSWER_SCORE: f32 = -10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    Answered { text: String, score: f32 },
    NoAnswer { score: f32 },
}

impl Answer {
    pub fn score(&self) -> f32 {
        match self {
            Answer::Answered { score, .. } | Answer::NoAnswer { score } => *score,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Answer::Answered { text, .. } => Some(text),
            Answer::NoAnswer { .. } => None,
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, Answer::Answered { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    Confidence,
    Relevance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerCandidate {
    pub answer: Answer,
    pub kind: ScoreKind,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl AnswerCandidate {
    pub fn score(&self) -> f32 {
        self.answer.score()
    }
}

pub fn rank(candidates: &mut [AnswerCandidate]) {
    candidates.sort_by(|a, b| descending(a.score(), b.score()));
}

fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}
