mod config;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chunkqa_core::{
    AnswerCandidate, HfTokenizer, Method, ModelKind, QaConfig, QaError, QaPipeline,
    RelevanceReader, ScoreKind, SpanReader, DEFAULT_CONFIG,
};
use chunkqa_remote::{FetchError, InferenceClient, InferenceConfig, TextExtractor};

use crate::config::ServiceConfig;

struct AppState {
    pipeline: QaPipeline,
    extractor: TextExtractor,
    request_timeout: Duration,
}

fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let config_path =
        std::env::var("CHUNKQA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let qa_config = QaConfig::from_env()?;
    let mut service_config = ServiceConfig::load(Path::new(&config_path))?;
    service_config.apply_env_overrides();

    // Blocking HTTP clients must be built outside the async runtime.
    let state = Arc::new(build_state(qa_config, &service_config)?);
    let addr: SocketAddr = service_config
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", service_config.bind_addr))?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(serve(state, addr))
}

async fn serve(state: Arc<AppState>, addr: SocketAddr) -> Result<(), anyhow::Error> {
    let app = Router::new()
        .route("/healthz", get(handle_health))
        .route("/qa_from_documents", post(handle_qa_from_documents))
        .route("/qa_from_url", post(handle_qa_from_url))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening" = %addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_state(qa_config: QaConfig, service: &ServiceConfig) -> Result<AppState, anyhow::Error> {
    let budget = qa_config.budget();
    let mut pipeline = QaPipeline::new(qa_config);
    if let (Some(tokenizer), Some(url)) = (&service.span_tokenizer, &service.span_model_url) {
        let tokenizer = Arc::new(HfTokenizer::from_file(tokenizer)?);
        let model = Arc::new(InferenceClient::new(model_config(
            service,
            url,
            ModelKind::SingleSpan,
        ))?);
        pipeline = pipeline.with_span_reader(SpanReader::new(tokenizer, model, budget));
        info!(endpoint = %url, "single-span model configured");
    }
    if let (Some(tokenizer), Some(url)) = (&service.reader_tokenizer, &service.reader_model_url) {
        let tokenizer = Arc::new(HfTokenizer::from_file(tokenizer)?);
        let model = Arc::new(InferenceClient::new(model_config(
            service,
            url,
            ModelKind::Relevance,
        ))?);
        pipeline = pipeline.with_relevance_reader(RelevanceReader::new(tokenizer, model, budget)?);
        info!(endpoint = %url, "relevance model configured");
    }
    if !pipeline.supports(Method::Squad) && !pipeline.supports(Method::Dpr) {
        warn!("no model configured; every question will be rejected");
    }
    let extractor = TextExtractor::new(service.extractor_url.clone(), service.model_timeout())?;
    Ok(AppState {
        pipeline,
        extractor,
        request_timeout: service.request_timeout(),
    })
}

fn model_config(service: &ServiceConfig, url: &str, kind: ModelKind) -> InferenceConfig {
    let mut config = InferenceConfig::new(url, kind);
    config.api_key = service.model_api_key.clone();
    config.timeout = service.model_timeout();
    config.max_retries = service.model_max_retries;
    config
}

#[derive(Debug, Deserialize)]
struct DocumentsRequest {
    question: String,
    documents: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq)]
struct DocumentAnswer {
    document: String,
    answer: Option<String>,
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct UrlRequest {
    question: String,
    url: String,
    method: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
enum RankedAnswer {
    Chunk {
        answer: Option<String>,
        confidence: f32,
        chunk: String,
    },
    Reader {
        answer: Option<String>,
        relevance: f32,
        title: String,
        document: String,
    },
}

impl From<AnswerCandidate> for RankedAnswer {
    fn from(value: AnswerCandidate) -> Self {
        let answer = value.answer.text().map(str::to_string);
        let score = value.score();
        match value.kind {
            ScoreKind::Confidence => RankedAnswer::Chunk {
                answer,
                confidence: score,
                chunk: value.source,
            },
            ScoreKind::Relevance => RankedAnswer::Reader {
                answer,
                relevance: score,
                title: value.title.unwrap_or_default(),
                document: value.source,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    squad: bool,
    dpr: bool,
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        squad: state.pipeline.supports(Method::Squad),
        dpr: state.pipeline.supports(Method::Dpr),
    })
}

async fn handle_qa_from_documents(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DocumentsRequest>,
) -> Result<Json<Vec<DocumentAnswer>>, AppError> {
    let answers = run_blocking(&state, move |state| {
        let candidates = state
            .pipeline
            .answer_documents(&body.question, &body.documents)?;
        Ok(candidates
            .into_iter()
            .map(|candidate| DocumentAnswer {
                confidence: candidate.score(),
                answer: candidate.answer.text().map(str::to_string),
                document: candidate.source,
            })
            .collect())
    })
    .await?;
    Ok(Json(answers))
}

async fn handle_qa_from_url(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UrlRequest>,
) -> Result<Json<Vec<RankedAnswer>>, AppError> {
    let method = Method::parse(&body.method).ok_or_else(|| {
        AppError::bad_request(format!("invalid extraction method {}", body.method))
    })?;
    if !state.pipeline.supports(method) {
        return Err(AppError::bad_request(format!(
            "extraction method {} is not configured",
            method.as_str()
        )));
    }
    let ranked = run_blocking(&state, move |state| {
        let document = state.extractor.fetch(&body.url)?;
        let candidates = state.pipeline.answer(&body.question, &document, method)?;
        Ok(candidates.into_iter().map(RankedAnswer::from).collect())
    })
    .await?;
    Ok(Json(ranked))
}

/// Runs model work off the async workers under the configured deadline.
/// A timed-out job keeps running on its blocking thread; only the response is abandoned.
async fn run_blocking<T, F>(state: &Arc<AppState>, job: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> Result<T, AppError> + Send + 'static,
{
    let worker_state = state.clone();
    let handle = task::spawn_blocking(move || job(&worker_state));
    match tokio::time::timeout(state.request_timeout, handle).await {
        Ok(joined) => joined.map_err(AppError::internal)?,
        Err(_) => Err(AppError::Unavailable(format!(
            "request exceeded {}s",
            state.request_timeout.as_secs()
        ))),
    }
}

#[derive(Debug, Error)]
enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unavailable(String),
    #[error(transparent)]
    Upstream(#[from] FetchError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn bad_request<E: ToString>(msg: E) -> Self {
        Self::BadRequest(msg.to_string())
    }

    fn internal<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Internal(err.into())
    }
}

impl From<QaError> for AppError {
    fn from(value: QaError) -> Self {
        if value.is_validation() {
            Self::BadRequest(value.to_string())
        } else {
            Self::internal(value)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::Unavailable(msg) => {
                warn!("request_timeout" = %msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg).into_response()
            }
            AppError::Upstream(err) => {
                warn!("upstream_error" = %err);
                (StatusCode::BAD_GATEWAY, err.to_string()).into_response()
            }
            AppError::Internal(err) => {
                error!("internal_error" = %err);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}
