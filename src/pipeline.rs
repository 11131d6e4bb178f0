//! Corpus pipeline
//!
//! Drives documents through segmenting, context assembly and embedding, and
//! builds the vector store from the resulting chunk artifacts. A failure on
//! one document is recorded and the batch continues.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::context::header::{
    build_embedding_text, UNKNOWN_COMPANY, UNKNOWN_DATE, UNKNOWN_FORM, UNKNOWN_ID,
};
use crate::context::tokens::Tokenizer;
use crate::documents::artifact::{ArtifactError, ChunkArtifact};
use crate::documents::chunker::{chunk_text, Chunk, ChunkerError};
use crate::documents::embeddings::{EmbeddingEngine, EmbeddingError};
use crate::documents::metadata::{FilingMetadata, MetadataError};
use crate::documents::store::{RowMetadata, StoreError, VectorStore, VectorStoreRow};

const SOURCE_EXTENSION: &str = "txt";
const ARTIFACT_EXTENSION: &str = "json";
const SIDECAR_SUFFIX: &str = ".meta.json";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Chunker(#[from] ChunkerError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-document outcome of a successful ingest
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub num_chunks: u32,
    pub total_tokens: u32,
    pub artifact_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentFailure {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CorpusReport {
    pub documents: Vec<DocumentSummary>,
    pub failures: Vec<DocumentFailure>,
}

impl CorpusReport {
    pub fn total_chunks(&self) -> u64 {
        self.documents.iter().map(|d| d.num_chunks as u64).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.documents.iter().map(|d| d.total_tokens as u64).sum()
    }
}

/// Segment one document and assemble its chunk artifact.
pub fn process_document(
    tokenizer: &Tokenizer,
    text: &str,
    metadata: FilingMetadata,
    config: &PipelineConfig,
) -> Result<ChunkArtifact, PipelineError> {
    let (chunks, total_tokens) =
        chunk_text(tokenizer, text, config.chunk_size, config.context_margin)?;
    if chunks.is_empty() {
        warn!(document_id = %metadata.document_id(), "Document has no tokens");
    }
    debug!(
        document_id = %metadata.document_id(),
        tokens = total_tokens,
        chunks = chunks.len(),
        "Segmented document"
    );
    Ok(ChunkArtifact::from_chunks(metadata, &chunks, config.include_embedding_text))
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().map(|e| e == extension).unwrap_or(false)
}

fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(SIDECAR_SUFFIX))
        .unwrap_or(false)
}

/// Files in `dir` with `extension`, sorted by name.
fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_extension(path, extension) && !is_sidecar(path))
        .collect();
    files.sort();
    Ok(files)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn ingest_one(
    path: &Path,
    output_dir: &Path,
    tokenizer: &Tokenizer,
    config: &PipelineConfig,
) -> Result<DocumentSummary, PipelineError> {
    let metadata = FilingMetadata::for_document(path)?;
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);

    let artifact = process_document(tokenizer, &text, metadata, config)?;
    let document_id = artifact.document_id();
    let artifact_path = output_dir.join(format!("{}.{}", document_id, ARTIFACT_EXTENSION));
    artifact.save(&artifact_path)?;

    Ok(DocumentSummary {
        document_id,
        num_chunks: artifact.num_chunks,
        total_tokens: artifact.total_tokens,
        artifact_path: artifact_path.display().to_string(),
    })
}

/// Chunk every `.txt` filing in `input_dir`, writing one artifact per
/// document into `output_dir`.
pub fn ingest_directory(
    input_dir: &Path,
    output_dir: &Path,
    tokenizer: &Tokenizer,
    config: &PipelineConfig,
    limit: Option<usize>,
) -> Result<CorpusReport, PipelineError> {
    let mut files = list_files(input_dir, SOURCE_EXTENSION)?;
    if let Some(limit) = limit {
        files.truncate(limit);
    }
    fs::create_dir_all(output_dir)?;
    info!(documents = files.len(), input = %input_dir.display(), "Chunking documents");

    let mut report = CorpusReport::default();
    for path in &files {
        match ingest_one(path, output_dir, tokenizer, config) {
            Ok(summary) => {
                debug!(
                    document_id = %summary.document_id,
                    chunks = summary.num_chunks,
                    "Wrote chunk artifact"
                );
                report.documents.push(summary);
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Failed to process document");
                report.failures.push(DocumentFailure {
                    filename: file_label(path),
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        documents = report.documents.len(),
        failures = report.failures.len(),
        chunks = report.total_chunks(),
        "Chunking complete"
    );
    Ok(report)
}

/// Load every chunk artifact in `dir`. Unreadable artifacts are reported,
/// not fatal.
pub fn load_artifacts(
    dir: &Path,
) -> Result<(Vec<ChunkArtifact>, Vec<DocumentFailure>), PipelineError> {
    let mut artifacts = Vec::new();
    let mut failures = Vec::new();
    for path in list_files(dir, ARTIFACT_EXTENSION)? {
        match ChunkArtifact::load(&path) {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping chunk artifact");
                failures.push(DocumentFailure {
                    filename: file_label(&path),
                    error: e.to_string(),
                });
            }
        }
    }
    Ok((artifacts, failures))
}

fn or_placeholder(value: &Option<String>, placeholder: &str) -> String {
    value.clone().unwrap_or_else(|| placeholder.to_string())
}

fn row_metadata(
    artifact: &ChunkArtifact,
    chunk_id: u32,
    core_tokens: u32,
    extended_tokens: u32,
) -> RowMetadata {
    let metadata = &artifact.metadata;
    RowMetadata {
        document_id: artifact.document_id(),
        chunk_id,
        company: or_placeholder(&metadata.company_name, UNKNOWN_COMPANY),
        form_type: or_placeholder(&metadata.form_type, UNKNOWN_FORM),
        filing_date: or_placeholder(&metadata.filing_date, UNKNOWN_DATE),
        cik: or_placeholder(&metadata.cik, UNKNOWN_ID),
        core_tokens,
        extended_tokens,
        total_chunks: artifact.num_chunks,
    }
}

/// Text to embed for a stored chunk. Artifacts written without the exact
/// embedding input fall back to header plus core text.
fn embedding_input(artifact: &ChunkArtifact, index: usize) -> String {
    let stored = &artifact.chunks[index];
    if let Some(text) = &stored.text_for_embedding {
        return text.clone();
    }
    let chunk = Chunk {
        chunk_id: stored.chunk_id,
        core_text: stored.text.clone(),
        extended_text: stored.text.clone(),
        core_start: 0,
        core_end: 0,
        extended_start: 0,
        extended_end: 0,
        core_token_count: stored.token_count,
        extended_token_count: stored.extended_token_count,
    };
    build_embedding_text(&chunk, &artifact.metadata)
}

/// Embed every chunk of `artifacts` and load the vectors into a new store.
///
/// Rows are added in artifact order, then chunk order.
pub fn build_index(
    artifacts: &[ChunkArtifact],
    engine: &EmbeddingEngine,
    batch_size: usize,
) -> Result<VectorStore, PipelineError> {
    let mut texts = Vec::new();
    let mut metadata = Vec::new();
    for artifact in artifacts {
        for (i, chunk) in artifact.chunks.iter().enumerate() {
            texts.push(embedding_input(artifact, i));
            metadata.push(row_metadata(
                artifact,
                chunk.chunk_id,
                chunk.token_count,
                chunk.extended_token_count,
            ));
        }
    }
    info!(
        documents = artifacts.len(),
        chunks = texts.len(),
        model = %engine.model_name(),
        "Embedding chunks"
    );

    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let embeddings = engine.embed(&refs, batch_size)?;

    let rows = embeddings
        .into_iter()
        .zip(metadata)
        .map(|(embedding, metadata)| VectorStoreRow {
            embedding,
            metadata,
        })
        .collect();

    let mut store = VectorStore::new(engine.dimension(), engine.model_name());
    store.add(rows)?;
    Ok(store)
}
