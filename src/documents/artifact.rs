//! Persisted chunk artifact
//!
//! One JSON file per document holding its metadata and ordered chunks. Only
//! core text is stored for display; the exact embedding input is kept
//! optionally so the index can be rebuilt without re-tokenizing.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::chunker::Chunk;
use super::metadata::FilingMetadata;
use crate::context::header::build_embedding_text;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid chunk artifact {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A stored chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk_id: u32,
    /// Core text of the chunk
    pub text: String,
    pub token_count: u32,
    #[serde(default)]
    pub extended_token_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_for_embedding: Option<String>,
}

/// Chunked document as written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkArtifact {
    pub metadata: FilingMetadata,
    pub num_chunks: u32,
    pub total_tokens: u32,
    pub chunks: Vec<StoredChunk>,
}

impl ChunkArtifact {
    /// Assemble an artifact from segmented chunks.
    pub fn from_chunks(
        metadata: FilingMetadata,
        chunks: &[Chunk],
        include_embedding_text: bool,
    ) -> Self {
        let stored: Vec<StoredChunk> = chunks
            .iter()
            .map(|chunk| StoredChunk {
                chunk_id: chunk.chunk_id,
                text: chunk.core_text.clone(),
                token_count: chunk.core_token_count,
                extended_token_count: chunk.extended_token_count,
                text_for_embedding: include_embedding_text
                    .then(|| build_embedding_text(chunk, &metadata)),
            })
            .collect();

        Self {
            num_chunks: stored.len() as u32,
            total_tokens: stored.iter().map(|c| c.token_count).sum(),
            metadata,
            chunks: stored,
        }
    }

    pub fn document_id(&self) -> String {
        self.metadata.document_id()
    }

    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|source| ArtifactError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
