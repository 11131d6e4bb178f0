//! Vector Store
//!
//! Flat in-memory matrix of unit-normalized embeddings with a row-aligned
//! metadata table. Row `i` of the matrix and row `i` of the metadata table
//! always describe the same chunk. Both tables also carry an explicit row
//! key (`document_id#chunk_id`) so that alignment is verified when the
//! tables are loaded back from disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};
use ulid::Ulid;

use super::embeddings::{dot, l2_norm, Embedding, NORM_TOLERANCE};

pub const EMBEDDINGS_FILE: &str = "embeddings.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Invalid row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },
    #[error("Embedding and metadata tables are misaligned: {0}")]
    Misaligned(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identity of a chunk across the corpus
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkRef {
    pub document_id: String,
    pub chunk_id: u32,
}

impl ChunkRef {
    pub fn key(&self) -> String {
        format!("{}#{}", self.document_id, self.chunk_id)
    }
}

/// One row of the metadata table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMetadata {
    pub document_id: String,
    pub chunk_id: u32,
    pub company: String,
    pub form_type: String,
    pub filing_date: String,
    pub cik: String,
    pub core_tokens: u32,
    pub extended_tokens: u32,
    pub total_chunks: u32,
}

impl RowMetadata {
    pub fn chunk_ref(&self) -> ChunkRef {
        ChunkRef {
            document_id: self.document_id.clone(),
            chunk_id: self.chunk_id,
        }
    }

    pub fn row_key(&self) -> String {
        format!("{}#{}", self.document_id, self.chunk_id)
    }
}

/// An embedding together with the metadata of the chunk it encodes
#[derive(Debug, Clone)]
pub struct VectorStoreRow {
    pub embedding: Embedding,
    pub metadata: RowMetadata,
}

/// A ranked search result. `rank` starts at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub chunk: ChunkRef,
    pub score: f32,
    pub rank: usize,
    /// Row index in the store the hit came from
    pub row: usize,
}

/// Row-major `[N, D]` matrix
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    pub dimension: usize,
    pub data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn rows(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }
}

/// Persisted embedding table
#[derive(Debug, Serialize, Deserialize)]
struct EmbeddingTable {
    dimension: usize,
    row_keys: Vec<String>,
    rows: Vec<Embedding>,
}

/// Persisted metadata table
#[derive(Debug, Serialize, Deserialize)]
struct MetadataTable {
    rows: Vec<MetadataRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataRecord {
    row_key: String,
    #[serde(flatten)]
    metadata: RowMetadata,
}

/// Summary written next to the two tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexManifest {
    pub build_id: String,
    pub model: String,
    pub dimension: usize,
    pub rows: usize,
    pub built_at: DateTime<Utc>,
}

/// Append-only vector store.
///
/// A single builder owns the store while rows are added; afterwards it is
/// read-only and `search` may be called from any number of threads.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dimension: usize,
    model: String,
    matrix: Vec<f32>,
    metadata: Vec<RowMetadata>,
}

impl VectorStore {
    pub fn new(dimension: usize, model: &str) -> Self {
        Self {
            dimension,
            model: model.to_string(),
            matrix: Vec::new(),
            metadata: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn metadata(&self, row: usize) -> Option<&RowMetadata> {
        self.metadata.get(row)
    }

    pub fn embedding(&self, row: usize) -> Option<&[f32]> {
        let start = row.checked_mul(self.dimension)?;
        self.matrix.get(start..start + self.dimension)
    }

    /// Append rows. Either every row is added or none is.
    pub fn add(&mut self, rows: Vec<VectorStoreRow>) -> Result<(), StoreError> {
        for (offset, row) in rows.iter().enumerate() {
            self.validate_row(self.len() + offset, &row.embedding)?;
        }

        self.matrix.reserve(rows.len() * self.dimension);
        self.metadata.reserve(rows.len());
        for row in rows {
            self.matrix.extend_from_slice(&row.embedding);
            self.metadata.push(row.metadata);
        }

        debug_assert_eq!(self.matrix.len(), self.metadata.len() * self.dimension);
        Ok(())
    }

    fn validate_row(&self, row: usize, embedding: &[f32]) -> Result<(), StoreError> {
        if embedding.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(StoreError::InvalidRow {
                row,
                reason: "non-finite component".to_string(),
            });
        }
        let norm = l2_norm(embedding);
        if (norm - 1.0).abs() >= NORM_TOLERANCE {
            return Err(StoreError::InvalidRow {
                row,
                reason: format!("not unit length (norm {})", norm),
            });
        }
        Ok(())
    }

    /// Copy of the embedding matrix and the aligned metadata table
    pub fn snapshot(&self) -> (EmbeddingMatrix, Vec<RowMetadata>) {
        (
            EmbeddingMatrix {
                dimension: self.dimension,
                data: self.matrix.clone(),
            },
            self.metadata.clone(),
        )
    }

    /// New store holding only rows whose metadata matches, in original order.
    pub fn filtered<F>(&self, predicate: F) -> VectorStore
    where
        F: Fn(&RowMetadata) -> bool,
    {
        let mut store = VectorStore::new(self.dimension, &self.model);
        for (row, metadata) in self.metadata.iter().enumerate() {
            if predicate(metadata) {
                if let Some(embedding) = self.embedding(row) {
                    store.matrix.extend_from_slice(embedding);
                    store.metadata.push(metadata.clone());
                }
            }
        }
        store
    }

    /// Rank rows by dot product with `query`.
    ///
    /// Scores descend; equal scores keep the lower row first. `top_k` larger
    /// than the store is clamped.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<RetrievalHit>, StoreError> {
        if top_k == 0 {
            return Err(StoreError::InvalidQuery("top_k must be greater than zero".to_string()));
        }
        if query.len() != self.dimension {
            return Err(StoreError::InvalidQuery(format!(
                "query has dimension {}, store has {}",
                query.len(),
                self.dimension
            )));
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(StoreError::InvalidQuery("query contains non-finite values".to_string()));
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .matrix
            .chunks_exact(self.dimension)
            .map(|row| dot(row, query))
            .enumerate()
            .collect();

        let by_rank = |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
            b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
        };

        let k = top_k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_rank);
            scored.truncate(k);
        }
        scored.sort_by(by_rank);

        let hits = scored
            .into_iter()
            .enumerate()
            .map(|(i, (row, score))| RetrievalHit {
                chunk: self.metadata[row].chunk_ref(),
                score,
                rank: i + 1,
                row,
            })
            .collect();

        Ok(hits)
    }

    /// Write the embedding table, metadata table and manifest into `dir`.
    pub fn save(&self, dir: &Path) -> Result<IndexManifest, StoreError> {
        fs::create_dir_all(dir)?;

        let row_keys: Vec<String> = self.metadata.iter().map(|m| m.row_key()).collect();
        let embeddings = EmbeddingTable {
            dimension: self.dimension,
            row_keys: row_keys.clone(),
            rows: self.matrix.chunks_exact(self.dimension.max(1)).map(|r| r.to_vec()).collect(),
        };
        let metadata = MetadataTable {
            rows: self
                .metadata
                .iter()
                .zip(row_keys)
                .map(|(m, row_key)| MetadataRecord {
                    row_key,
                    metadata: m.clone(),
                })
                .collect(),
        };
        let manifest = IndexManifest {
            build_id: Ulid::new().to_string(),
            model: self.model.clone(),
            dimension: self.dimension,
            rows: self.len(),
            built_at: Utc::now(),
        };

        fs::write(dir.join(EMBEDDINGS_FILE), serde_json::to_string(&embeddings)?)?;
        fs::write(dir.join(METADATA_FILE), serde_json::to_string_pretty(&metadata)?)?;
        fs::write(dir.join(MANIFEST_FILE), serde_json::to_string_pretty(&manifest)?)?;

        info!(
            path = %dir.display(),
            rows = manifest.rows,
            dimension = self.dimension,
            "Saved vector store"
        );
        Ok(manifest)
    }

    /// Load a store saved by [`VectorStore::save`], verifying row alignment.
    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let embeddings: EmbeddingTable =
            serde_json::from_str(&fs::read_to_string(dir.join(EMBEDDINGS_FILE))?)?;
        let metadata: MetadataTable =
            serde_json::from_str(&fs::read_to_string(dir.join(METADATA_FILE))?)?;

        let model = match fs::read_to_string(dir.join(MANIFEST_FILE)) {
            Ok(raw) => serde_json::from_str::<IndexManifest>(&raw)?.model,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        if embeddings.rows.len() != embeddings.row_keys.len() {
            return Err(StoreError::Misaligned(format!(
                "{} embedding rows but {} row keys",
                embeddings.rows.len(),
                embeddings.row_keys.len()
            )));
        }
        if embeddings.rows.len() != metadata.rows.len() {
            return Err(StoreError::Misaligned(format!(
                "{} embedding rows but {} metadata rows",
                embeddings.rows.len(),
                metadata.rows.len()
            )));
        }

        let mut rows = Vec::with_capacity(metadata.rows.len());
        for (i, ((embedding, key), record)) in embeddings
            .rows
            .into_iter()
            .zip(embeddings.row_keys)
            .zip(metadata.rows)
            .enumerate()
        {
            if key != record.row_key || key != record.metadata.row_key() {
                return Err(StoreError::Misaligned(format!(
                    "row {}: embedding key {} does not match metadata key {}",
                    i, key, record.row_key
                )));
            }
            rows.push(VectorStoreRow {
                embedding,
                metadata: record.metadata,
            });
        }

        let mut store = VectorStore::new(embeddings.dimension, &model);
        store.add(rows)?;
        debug!(path = %dir.display(), rows = store.len(), "Loaded vector store");
        Ok(store)
    }
}
