mod common;

use std::sync::Arc;

use chunkqa_core::{
    Answer, QaError, RelevanceReader, ScoreKind, SpanReader, TokenBudget, DEFAULT_NO_ANSWER_SCORE,
};
use common::{words, FixedSpanModel, TargetModel, WordTokenizer};

const PARIS_DOC: &str = "Paris is the capital of France.\nIt has a population of over 2 million.";

fn span_reader(model: Arc<TargetModel>) -> SpanReader {
    SpanReader::new(Arc::new(WordTokenizer), model, TokenBudget::default())
}

#[test]
fn span_reader_finds_the_answer() {
    let model = Arc::new(TargetModel::span("Paris"));
    let answer = span_reader(model.clone())
        .answer_question("What is the capital of France?", PARIS_DOC)
        .unwrap();
    assert_eq!(answer.text(), Some("Paris"));
    assert!(answer.score() > DEFAULT_NO_ANSWER_SCORE);
    assert_eq!(answer.score(), 5.0);
    assert_eq!(model.calls(), 1);
}

#[test]
fn question_over_budget_fails_before_model_call() {
    let model = Arc::new(TargetModel::span("Paris"));
    let question = words(40, "why");
    let err = span_reader(model.clone())
        .answer_question(&question, PARIS_DOC)
        .unwrap_err();
    match err {
        QaError::Validation {
            field,
            length,
            limit,
        } => {
            assert_eq!(field, "question");
            assert_eq!(length, 42);
            assert_eq!(limit, 30);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(model.calls(), 0);
}

#[test]
fn document_over_budget_fails_before_model_call() {
    let model = Arc::new(TargetModel::span("Paris"));
    let err = span_reader(model.clone())
        .answer_question("Where?", &words(500, "d"))
        .unwrap_err();
    assert!(matches!(err, QaError::Validation { field: "document", .. }));
    assert!(err.is_validation());
    assert_eq!(model.calls(), 0);
}

#[test]
fn end_before_start_yields_no_answer() {
    let reader = SpanReader::new(
        Arc::new(WordTokenizer),
        Arc::new(FixedSpanModel { start: 5, end: 2 }),
        TokenBudget::default(),
    );
    let answer = reader
        .answer_question("What is the capital of France?", PARIS_DOC)
        .unwrap();
    assert_eq!(
        answer,
        Answer::NoAnswer {
            score: DEFAULT_NO_ANSWER_SCORE
        }
    );
}

#[test]
fn span_on_control_tokens_yields_configured_sentinel() {
    let reader = span_reader(Arc::new(TargetModel::span("Berlin"))).with_no_answer_score(-99.0);
    let answer = reader
        .answer_question("What is the capital of France?", PARIS_DOC)
        .unwrap();
    assert_eq!(answer, Answer::NoAnswer { score: -99.0 });
}

#[test]
fn relevance_reader_requires_relevance_model() {
    let result = RelevanceReader::new(
        Arc::new(WordTokenizer),
        Arc::new(TargetModel::span("Paris")),
        TokenBudget::default(),
    );
    assert!(matches!(result, Err(QaError::Model(_))));
}

#[test]
fn relevance_reader_ranks_one_batch() {
    let model = Arc::new(TargetModel::relevance("Paris"));
    let reader =
        RelevanceReader::new(Arc::new(WordTokenizer), model.clone(), TokenBudget::default())
            .unwrap();
    let documents = vec![
        "Berlin is in Germany.".to_string(),
        "Paris is in France.".to_string(),
        "Rome is in Italy.".to_string(),
    ];
    let titles = vec!["de".to_string(), "fr".to_string(), "it".to_string()];
    let ranked = reader
        .read_documents("Which city is in France?", &documents, &titles)
        .unwrap();
    assert_eq!(model.calls(), 1);
    assert_eq!(ranked.len(), 3);
    assert_eq!(ranked[0].answer.text(), Some("Paris"));
    assert_eq!(ranked[0].title.as_deref(), Some("fr"));
    assert_eq!(ranked[0].source, documents[1]);
    assert_eq!(ranked[0].kind, ScoreKind::Relevance);
    // Items without a span keep their relevance and their input order.
    assert_eq!(ranked[1].answer, Answer::NoAnswer { score: -2.0 });
    assert_eq!(ranked[1].title.as_deref(), Some("de"));
    assert_eq!(ranked[2].title.as_deref(), Some("it"));
}

#[test]
fn relevance_reader_rejects_mismatched_titles() {
    let model = Arc::new(TargetModel::relevance("Paris"));
    let reader =
        RelevanceReader::new(Arc::new(WordTokenizer), model.clone(), TokenBudget::default())
            .unwrap();
    let err = reader
        .read_documents("Where?", &["a".to_string()], &[])
        .unwrap_err();
    assert!(matches!(err, QaError::InvalidInput(_)));
    assert_eq!(model.calls(), 0);
}

fn relevance_reader(model: Arc<TargetModel>) -> RelevanceReader {
    RelevanceReader::new(Arc::new(WordTokenizer), model, TokenBudget::default()).unwrap()
}

#[test]
fn relevance_question_over_budget_fails_before_model_call() {
    let model = Arc::new(TargetModel::relevance("Paris"));
    let err = relevance_reader(model.clone())
        .read_documents(
            &words(40, "why"),
            &["Paris is in France.".to_string()],
            &["fr".to_string()],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        QaError::Validation {
            field: "question",
            length: 42,
            limit: 30
        }
    ));
    assert_eq!(model.calls(), 0);
}

#[test]
fn relevance_reader_requires_relevance_logits() {
    let model = Arc::new(TargetModel::relevance("Paris").without_relevance_logits());
    let err = relevance_reader(model.clone())
        .read_documents(
            "Which city?",
            &["Paris is in France.".to_string()],
            &["fr".to_string()],
        )
        .unwrap_err();
    assert!(matches!(err, QaError::Model(_)));
    assert!(!err.is_validation());
    assert_eq!(model.calls(), 1);
}

#[test]
fn oversized_reader_input_fails_before_model_call() {
    let model = Arc::new(TargetModel::relevance("Paris"));
    let documents = vec!["Paris is in France.".to_string(), words(520, "d")];
    let titles = vec!["fr".to_string(), "long".to_string()];
    let err = relevance_reader(model.clone())
        .read_documents("Which city?", &documents, &titles)
        .unwrap_err();
    match err {
        QaError::Validation {
            field,
            length,
            limit,
        } => {
            assert_eq!(field, "reader input");
            // [CLS] 3 question pieces [SEP] title [SEP] 520 words
            assert_eq!(length, 527);
            assert_eq!(limit, 512);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(model.calls(), 0);
}

#[test]
fn chunk_budget_reserves_title_and_separator() {
    let reader = relevance_reader(Arc::new(TargetModel::relevance("Paris")));
    assert_eq!(reader.chunk_budget("").unwrap().max_tokens_document(), 479);
    let budget = reader.chunk_budget(&words(7, "t")).unwrap();
    assert_eq!(budget.max_tokens, 504);
    assert_eq!(budget.max_tokens_question, 30);
    assert_eq!(budget.max_tokens_document(), 472);
}

#[test]
fn title_without_room_for_text_is_rejected() {
    let reader = relevance_reader(Arc::new(TargetModel::relevance("Paris")));
    let err = reader.chunk_budget(&words(479, "t")).unwrap_err();
    assert!(matches!(
        err,
        QaError::Validation {
            field: "title",
            length: 479,
            limit: 478
        }
    ));
    assert!(reader.chunk_budget(&words(478, "t")).is_ok());
}
