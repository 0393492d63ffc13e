use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chunkqa_core::{
    AnswerCandidate, Chunker, HfTokenizer, Method, ModelKind, QaConfig, QaPipeline,
    RelevanceReader, SpanReader, TokenLength, TokenizerKind, DEFAULT_CONFIG,
};
use chunkqa_remote::{InferenceClient, InferenceConfig, TextExtractor};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "chunkqa", version = VERSION, about = "Chunked extractive question answering")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Split a document into model-sized chunks.
    Chunk {
        input: PathBuf,
        #[command(flatten)]
        tokenizer: TokenizerArgs,
        #[command(flatten)]
        budget: BudgetArgs,
        #[arg(long = "no-consolidate", action = ArgAction::SetTrue)]
        no_consolidate: bool,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Count tokens in a file.
    Tokens {
        input: PathBuf,
        #[command(flatten)]
        tokenizer: TokenizerArgs,
    },
    /// Answer a question over a local file or a fetched URL.
    Ask {
        #[arg(short, long)]
        question: String,
        #[arg(long, conflicts_with = "url", required_unless_present = "url")]
        file: Option<PathBuf>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long, default_value = "squad")]
        method: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long = "tokenizer-file")]
        tokenizer_file: PathBuf,
        #[arg(long = "model-url")]
        model_url: String,
        #[arg(long = "extractor-url")]
        extractor_url: Option<String>,
        #[arg(long = "timeout-secs", default_value_t = 30)]
        timeout_secs: u64,
        #[arg(long)]
        top: Option<usize>,
        #[command(flatten)]
        budget: BudgetArgs,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct TokenizerArgs {
    /// BPE vocabulary used when no model tokenizer is given.
    #[arg(long, default_value = "cl100k_base")]
    tokenizer: String,
    /// HuggingFace tokenizer.json of the model that will read the chunks.
    #[arg(long = "tokenizer-file")]
    tokenizer_file: Option<PathBuf>,
    /// tiktoken-style JSON vocabulary.
    #[arg(long = "bpe-file", conflicts_with = "tokenizer_file")]
    bpe_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
struct BudgetArgs {
    #[arg(long = "max-tokens")]
    max_tokens: Option<usize>,
    #[arg(long = "max-tokens-question")]
    max_tokens_question: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ChunkSummary {
    index: usize,
    tokens: usize,
    text: String,
}

#[derive(Debug, Serialize)]
struct ChunkOutput {
    chunks: Vec<ChunkSummary>,
    dropped_sentences: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let mut config = QaConfig::load(&config_path)?;
    config.apply_env_overrides();

    match cli.command {
        Commands::Chunk {
            input,
            tokenizer,
            budget,
            no_consolidate,
            json,
        } => {
            apply_budget(&mut config, &budget);
            let document = read_document(&input)?;
            let counter = resolve_counter(&tokenizer)?;
            let consolidate = config.consolidate && !no_consolidate;
            let report = Chunker::new(counter.as_ref(), config.budget())
                .chunk_with_report(&document, consolidate)?;
            let mut chunks = Vec::with_capacity(report.chunks.len());
            for (index, text) in report.chunks.into_iter().enumerate() {
                let tokens = counter.token_length(&text)?;
                chunks.push(ChunkSummary {
                    index,
                    tokens,
                    text,
                });
            }
            let output = ChunkOutput {
                chunks,
                dropped_sentences: report.dropped.len(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_chunks(&output, config.budget().max_tokens_document());
            }
        }
        Commands::Tokens { input, tokenizer } => {
            let document = read_document(&input)?;
            let counter = resolve_counter(&tokenizer)?;
            println!("{}", counter.token_length(&document)?);
        }
        Commands::Ask {
            question,
            file,
            url,
            method,
            title,
            tokenizer_file,
            model_url,
            extractor_url,
            timeout_secs,
            top,
            budget,
            json,
        } => {
            apply_budget(&mut config, &budget);
            let method = Method::parse(&method)
                .ok_or_else(|| anyhow!("invalid extraction method {method}"))?;
            let timeout = Duration::from_secs(timeout_secs.max(1));
            let document = match (file, url) {
                (Some(path), _) => read_document(&path)?,
                (None, Some(url)) => {
                    let extractor = match extractor_url {
                        Some(endpoint) => TextExtractor::new(endpoint, timeout)?,
                        None => TextExtractor::from_env()?,
                    };
                    info!(url = %url, endpoint = extractor.endpoint(), "fetching document");
                    extractor.fetch(&url)?
                }
                (None, None) => bail!("either --file or --url is required"),
            };
            let pipeline = build_pipeline(config, method, &tokenizer_file, &model_url, timeout)?;
            let mut ranked = match method {
                Method::Squad => pipeline.answer_question_chunked(&question, &document)?,
                Method::Dpr => pipeline.read_chunked_document(&question, &document, &title)?,
            };
            if let Some(limit) = top {
                ranked.truncate(limit);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&ranked)?);
            } else {
                print_ranked(&ranked);
            }
        }
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn apply_budget(config: &mut QaConfig, args: &BudgetArgs) {
    if let Some(value) = args.max_tokens {
        config.max_tokens = value;
    }
    if let Some(value) = args.max_tokens_question {
        config.max_tokens_question = value;
    }
}

fn read_document(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn resolve_counter(args: &TokenizerArgs) -> Result<Box<dyn TokenLength>> {
    if let Some(path) = &args.tokenizer_file {
        return Ok(Box::new(HfTokenizer::from_file(path)?));
    }
    let kind = match &args.bpe_file {
        Some(path) => TokenizerKind::Custom(path.clone()),
        None => TokenizerKind::parse(&args.tokenizer)
            .ok_or_else(|| anyhow!("unknown tokenizer {}", args.tokenizer))?,
    };
    Ok(Box::new(kind.build()?))
}

fn build_pipeline(
    config: QaConfig,
    method: Method,
    tokenizer_file: &Path,
    model_url: &str,
    timeout: Duration,
) -> Result<QaPipeline> {
    let budget = config.budget();
    let tokenizer = Arc::new(HfTokenizer::from_file(tokenizer_file)?);
    let kind = match method {
        Method::Squad => ModelKind::SingleSpan,
        Method::Dpr => ModelKind::Relevance,
    };
    let mut model_config = InferenceConfig::new(model_url, kind);
    model_config.timeout = timeout;
    if let Ok(key) = std::env::var("CHUNKQA_MODEL_API_KEY") {
        model_config.api_key = Some(key);
    }
    let model = Arc::new(InferenceClient::new(model_config)?);
    let pipeline = QaPipeline::new(config);
    Ok(match method {
        Method::Squad => pipeline.with_span_reader(SpanReader::new(tokenizer, model, budget)),
        Method::Dpr => {
            pipeline.with_relevance_reader(RelevanceReader::new(tokenizer, model, budget)?)
        }
    })
}

fn print_chunks(output: &ChunkOutput, limit: usize) {
    for chunk in &output.chunks {
        println!(
            "--- chunk {} ({} / {} tokens) ---",
            chunk.index, chunk.tokens, limit
        );
        println!("{}", chunk.text);
    }
    println!(
        "{} chunks, {} overlong sentences dropped",
        output.chunks.len(),
        output.dropped_sentences
    );
}

fn print_ranked(ranked: &[AnswerCandidate]) {
    if ranked.is_empty() {
        println!("no chunks to answer from");
        return;
    }
    for (idx, candidate) in ranked.iter().enumerate() {
        let answer = candidate.answer.text().unwrap_or("<no answer>");
        println!(
            "{:>3}. [{:>8.3}] {}{}",
            idx + 1,
            candidate.score(),
            answer,
            candidate
                .title
                .as_deref()
                .filter(|t| !t.is_empty())
                .map(|t| format!("  ({t})"))
                .unwrap_or_default()
        );
    }
}
