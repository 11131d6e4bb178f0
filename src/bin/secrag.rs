//! secrag CLI
//!
//! Command-line interface for chunking SEC filings, building the vector
//! index, and querying it. Results are printed as JSON on stdout; logs go
//! to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use secrag_lib::{
    build_grounding_prompt, build_index, ingest_directory, load_artifacts, ChunkTextIndex,
    DocumentFailure, PipelineConfig, Retriever, SearchResult, Tokenizer, VectorStore,
};

#[derive(Parser)]
#[command(name = "secrag")]
#[command(about = "secrag - Contextual chunking and retrieval over SEC filings", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/secrag/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split filings into contextual chunks
    Chunk {
        /// Directory of .txt filings
        #[arg(short, long)]
        input: PathBuf,
        /// Directory for chunk artifacts
        #[arg(short, long)]
        output: PathBuf,
        /// Process at most this many filings
        #[arg(long)]
        limit: Option<usize>,
        /// Core tokens per chunk
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Context tokens on each side of the core window
        #[arg(long)]
        margin: Option<usize>,
    },
    /// Embed chunk artifacts and write the vector index
    Embed {
        /// Directory of chunk artifacts
        #[arg(short, long)]
        chunks: PathBuf,
        /// Directory for the index files
        #[arg(short, long)]
        index: PathBuf,
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Retrieve the chunks most similar to a question
    Query {
        /// Question text
        question: String,
        #[arg(short, long)]
        index: PathBuf,
        /// Directory of chunk artifacts, used to attach chunk text
        #[arg(short, long)]
        chunks: PathBuf,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Only search filings of this form type
        #[arg(long)]
        form_type: Option<String>,
        /// Also emit the grounding prompt
        #[arg(long)]
        prompt: bool,
    },
    /// Token counting commands
    Tokens {
        #[command(subcommand)]
        action: TokensAction,
    },
}

#[derive(Subcommand)]
enum TokensAction {
    /// Count tokens in text
    Count {
        /// Text to count (or - to read from stdin)
        text: String,
    },
}

// ============ Output Types ============

#[derive(Serialize)]
struct ChunkOutput {
    documents: usize,
    chunks: u64,
    tokens: u64,
    failures: Vec<DocumentFailure>,
}

#[derive(Serialize)]
struct EmbedOutput {
    build_id: String,
    model: String,
    dimension: usize,
    rows: usize,
    skipped: Vec<DocumentFailure>,
}

#[derive(Serialize)]
struct QueryOutput {
    question: String,
    results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_tokens: Option<u32>,
}

#[derive(Serialize)]
struct TokenCountOutput {
    tokens: u32,
    encoding: String,
}

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
}

// ============ Main ============

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let result = PipelineConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")
        .and_then(|config| match cli.command {
            Commands::Chunk {
                input,
                output,
                limit,
                chunk_size,
                margin,
            } => handle_chunk(config, &input, &output, limit, chunk_size, margin),
            Commands::Embed {
                chunks,
                index,
                batch_size,
            } => handle_embed(config, &chunks, &index, batch_size),
            Commands::Query {
                question,
                index,
                chunks,
                top_k,
                form_type,
                prompt,
            } => handle_query(config, &question, &index, &chunks, top_k, form_type, prompt),
            Commands::Tokens { action } => handle_tokens(config, action),
        });

    match result {
        Ok(json) => println!("{}", json),
        Err(e) => {
            let error = ErrorOutput {
                error: format!("{:#}", e),
            };
            match serde_json::to_string(&error) {
                Ok(json) => println!("{}", json),
                Err(_) => println!(r#"{{"error": "unknown error"}}"#),
            }
            std::process::exit(1);
        }
    }
}

// ============ Handlers ============

fn handle_chunk(
    mut config: PipelineConfig,
    input: &Path,
    output: &Path,
    limit: Option<usize>,
    chunk_size: Option<usize>,
    margin: Option<usize>,
) -> Result<String> {
    if let Some(size) = chunk_size {
        config.chunk_size = size;
    }
    if let Some(margin) = margin {
        config.context_margin = margin;
    }
    config.validate()?;

    let tokenizer = Tokenizer::new(&config.encoding)?;
    let report = ingest_directory(input, output, &tokenizer, &config, limit)
        .with_context(|| format!("Failed to chunk {}", input.display()))?;

    let output = ChunkOutput {
        documents: report.documents.len(),
        chunks: report.total_chunks(),
        tokens: report.total_tokens(),
        failures: report.failures,
    };
    Ok(serde_json::to_string(&output)?)
}

fn handle_embed(
    mut config: PipelineConfig,
    chunks: &Path,
    index: &Path,
    batch_size: Option<usize>,
) -> Result<String> {
    if let Some(size) = batch_size {
        config.embedding.batch_size = size;
    }
    config.validate()?;

    let (artifacts, skipped) = load_artifacts(chunks)
        .with_context(|| format!("Failed to read chunk artifacts from {}", chunks.display()))?;
    if artifacts.is_empty() {
        bail!("No chunk artifacts found in {}", chunks.display());
    }

    let engine = config.embedding.build_engine()?;
    let store = build_index(&artifacts, &engine, config.embedding.batch_size)?;
    let manifest = store
        .save(index)
        .with_context(|| format!("Failed to write index to {}", index.display()))?;
    info!(build_id = %manifest.build_id, rows = manifest.rows, "Index written");

    let output = EmbedOutput {
        build_id: manifest.build_id,
        model: manifest.model,
        dimension: manifest.dimension,
        rows: manifest.rows,
        skipped,
    };
    Ok(serde_json::to_string(&output)?)
}

fn handle_query(
    config: PipelineConfig,
    question: &str,
    index: &Path,
    chunks: &Path,
    top_k: Option<usize>,
    form_type: Option<String>,
    with_prompt: bool,
) -> Result<String> {
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    let mut store = VectorStore::load(index)
        .with_context(|| format!("Failed to load index from {}", index.display()))?;
    if let Some(form) = form_type.as_deref() {
        store = store.filtered(|row| row.form_type.eq_ignore_ascii_case(form));
        info!(form_type = form, rows = store.len(), "Filtered index");
    }

    let engine = config.embedding.build_engine()?;

    let (artifacts, _) = load_artifacts(chunks)?;
    let texts = ChunkTextIndex::from_artifacts(&artifacts);

    let hits = Retriever::new(&engine, &store).retrieve(question, top_k)?;
    let results = texts.resolve(&store, &hits);

    let (prompt, prompt_tokens) = if with_prompt {
        let tokenizer = Tokenizer::new(&config.encoding)?;
        let grounding = build_grounding_prompt(
            &tokenizer,
            question,
            &results,
            &config.retrieval.prompt_options(),
        );
        (Some(grounding.prompt), Some(grounding.tokens))
    } else {
        (None, None)
    };

    let output = QueryOutput {
        question: question.to_string(),
        results,
        prompt,
        prompt_tokens,
    };
    Ok(serde_json::to_string(&output)?)
}

fn handle_tokens(config: PipelineConfig, action: TokensAction) -> Result<String> {
    match action {
        TokensAction::Count { text } => {
            let input = if text == "-" {
                let mut buffer = String::new();
                std::io::stdin().read_to_string(&mut buffer)?;
                buffer
            } else {
                text
            };

            let tokenizer = Tokenizer::new(&config.encoding)?;
            let output = TokenCountOutput {
                tokens: tokenizer.count_tokens(&input),
                encoding: tokenizer.encoding().to_string(),
            };
            Ok(serde_json::to_string(&output)?)
        }
    }
}
