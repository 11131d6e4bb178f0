//! Document Retrieval
//!
//! Embeds a query and ranks stored chunks against it. Retrieval never
//! mutates the store and is safe to retry as a whole.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use super::artifact::ChunkArtifact;
use super::embeddings::{EmbeddingEngine, EmbeddingError};
use super::store::{ChunkRef, RetrievalHit, StoreError, VectorStore};

#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Index was built with model {index}, but queries are embedded with {query}")]
    ModelMismatch { index: String, query: String },
}

/// Query front end over an engine and a store
pub struct Retriever<'a> {
    engine: &'a EmbeddingEngine,
    store: &'a VectorStore,
}

impl<'a> Retriever<'a> {
    pub fn new(engine: &'a EmbeddingEngine, store: &'a VectorStore) -> Self {
        Self { engine, store }
    }

    pub fn store(&self) -> &VectorStore {
        self.store
    }

    /// Top-`top_k` hits for `query_text`, best first.
    ///
    /// The query must be embedded with the model the store was built with.
    /// A store with no recorded model is not checked.
    pub fn retrieve(
        &self,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalHit>, RetrieverError> {
        let index_model = self.store.model();
        if !index_model.is_empty() && index_model != self.engine.model_name() {
            return Err(RetrieverError::ModelMismatch {
                index: index_model.to_string(),
                query: self.engine.model_name().to_string(),
            });
        }
        let query = self.engine.embed_one(query_text)?;
        let hits = self.store.search(&query, top_k)?;
        debug!(top_k = top_k, hits = hits.len(), "Retrieved chunks");
        Ok(hits)
    }
}

/// A hit resolved to its stored text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub document_id: String,
    pub chunk_id: u32,
    pub rank: usize,
    pub score: f32,
    pub company: String,
    pub form_type: String,
    pub filing_date: String,
    pub content: Option<String>,
    pub token_count: u32,
}

/// Lookup from chunk identity to core text, built from chunk artifacts
#[derive(Debug, Default)]
pub struct ChunkTextIndex {
    texts: HashMap<ChunkRef, String>,
}

impl ChunkTextIndex {
    pub fn from_artifacts<'a, I>(artifacts: I) -> Self
    where
        I: IntoIterator<Item = &'a ChunkArtifact>,
    {
        let mut texts = HashMap::new();
        for artifact in artifacts {
            let document_id = artifact.document_id();
            for chunk in &artifact.chunks {
                texts.insert(
                    ChunkRef {
                        document_id: document_id.clone(),
                        chunk_id: chunk.chunk_id,
                    },
                    chunk.text.clone(),
                );
            }
        }
        Self { texts }
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn get(&self, chunk: &ChunkRef) -> Option<&str> {
        self.texts.get(chunk).map(String::as_str)
    }

    /// Attach stored text and metadata to each hit.
    pub fn resolve(&self, store: &VectorStore, hits: &[RetrievalHit]) -> Vec<SearchResult> {
        hits.iter()
            .filter_map(|hit| {
                let metadata = store.metadata(hit.row)?;
                Some(SearchResult {
                    document_id: hit.chunk.document_id.clone(),
                    chunk_id: hit.chunk.chunk_id,
                    rank: hit.rank,
                    score: hit.score,
                    company: metadata.company.clone(),
                    form_type: metadata.form_type.clone(),
                    filing_date: metadata.filing_date.clone(),
                    content: self.get(&hit.chunk).map(str::to_string),
                    token_count: metadata.core_tokens,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::header::build_embedding_text;
    use crate::documents::chunker::Chunk;
    use crate::documents::embeddings::tests::FixedEmbedder;
    use crate::documents::embeddings::HashingEmbedder;
    use crate::documents::metadata::FilingMetadata;
    use crate::documents::store::{RowMetadata, VectorStoreRow};

    const MSFT: &str = "20240130_10-Q_edgar_data_789019_0000950170-24-008814.txt";

    const SOURCES: [&str; 3] = [
        "Tesla produced 1,845,985 consumer vehicles in 2023",
        "Microsoft Intelligent Cloud segment revenue grew",
        "Apple iPhone net sales for the quarter ended December 30",
    ];

    fn chunk(id: u32, text: &str) -> Chunk {
        Chunk {
            chunk_id: id,
            core_text: text.to_string(),
            extended_text: text.to_string(),
            core_start: 0,
            core_end: 1,
            extended_start: 0,
            extended_end: 1,
            core_token_count: 10,
            extended_token_count: 10,
        }
    }

    fn fixture() -> (EmbeddingEngine, VectorStore, Vec<String>) {
        let engine = EmbeddingEngine::new(Box::new(HashingEmbedder::new(256).unwrap()));
        let metadata = FilingMetadata::from_filename(MSFT);

        let texts: Vec<String> = SOURCES
            .iter()
            .enumerate()
            .map(|(i, s)| build_embedding_text(&chunk(i as u32, s), &metadata))
            .collect();
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let vectors = engine.embed(&refs, 2).unwrap();

        let mut store = VectorStore::new(engine.dimension(), engine.model_name());
        let rows = vectors
            .into_iter()
            .enumerate()
            .map(|(i, embedding)| VectorStoreRow {
                embedding,
                metadata: RowMetadata {
                    document_id: metadata.document_id(),
                    chunk_id: i as u32,
                    company: "Unknown Company".to_string(),
                    form_type: "10-Q".to_string(),
                    filing_date: "20240130".to_string(),
                    cik: "789019".to_string(),
                    core_tokens: 10,
                    extended_tokens: 10,
                    total_chunks: 3,
                },
            })
            .collect();
        store.add(rows).unwrap();
        (engine, store, texts)
    }

    #[test]
    fn test_query_matching_row_one() {
        let (engine, store, texts) = fixture();
        let retriever = Retriever::new(&engine, &store);

        let hits = retriever.retrieve(&texts[1], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].row, 1);
        assert_eq!(hits[0].rank, 1);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits[1].score <= hits[0].score);
    }

    #[test]
    fn test_retrieve_is_repeatable() {
        let (engine, store, _) = fixture();
        let retriever = Retriever::new(&engine, &store);
        let first = retriever.retrieve("vehicle production", 3).unwrap();
        let second = retriever.retrieve("vehicle production", 3).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_invalid_top_k_propagates() {
        let (engine, store, _) = fixture();
        let retriever = Retriever::new(&engine, &store);
        let err = retriever.retrieve("anything", 0).unwrap_err();
        assert!(matches!(err, RetrieverError::Store(StoreError::InvalidQuery(_))));
    }

    #[test]
    fn test_other_model_rejected() {
        let (_, store, _) = fixture();
        let other = EmbeddingEngine::new(Box::new(HashingEmbedder::new(16).unwrap()));
        let err = Retriever::new(&other, &store).retrieve("anything", 1).unwrap_err();
        match err {
            RetrieverError::ModelMismatch { index, query } => {
                assert_eq!(index, "feature-hash-256");
                assert_eq!(query, "feature-hash-16");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_other_model_rejected_after_reload() {
        let (_, store, _) = fixture();
        let dir = tempfile::tempdir().unwrap();
        store.save(dir.path()).unwrap();
        let loaded = VectorStore::load(dir.path()).unwrap();

        let remote = EmbeddingEngine::new(Box::new(FixedEmbedder {
            dimension: 256,
            vectors: vec![vec![1.0; 256]],
        }));
        assert!(matches!(
            Retriever::new(&remote, &loaded).retrieve("revenue", 1),
            Err(RetrieverError::ModelMismatch { .. })
        ));
    }

    #[test]
    fn test_unrecorded_model_checks_dimension_only() {
        let (_, store, _) = fixture();
        let (matrix, metadata) = store.snapshot();
        let mut bare = VectorStore::new(store.dimension(), "");
        let rows = metadata
            .into_iter()
            .enumerate()
            .filter_map(|(i, metadata)| {
                let embedding = matrix.row(i)?.to_vec();
                Some(VectorStoreRow {
                    embedding,
                    metadata,
                })
            })
            .collect();
        bare.add(rows).unwrap();

        let narrow = EmbeddingEngine::new(Box::new(HashingEmbedder::new(16).unwrap()));
        assert!(matches!(
            Retriever::new(&narrow, &bare).retrieve("anything", 1),
            Err(RetrieverError::Store(StoreError::InvalidQuery(_)))
        ));
    }

    #[test]
    fn test_resolve_attaches_text() {
        let (engine, store, _) = fixture();
        let metadata = FilingMetadata::from_filename(MSFT);
        let chunks: Vec<Chunk> = SOURCES
            .iter()
            .enumerate()
            .map(|(i, s)| chunk(i as u32, s))
            .collect();
        let artifact = ChunkArtifact::from_chunks(metadata, &chunks, false);
        let index = ChunkTextIndex::from_artifacts([&artifact]);
        assert_eq!(index.len(), 3);

        let hits = Retriever::new(&engine, &store).retrieve(SOURCES[2], 1).unwrap();
        let results = index.resolve(&store, &hits);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content.as_deref(), Some(SOURCES[2]));
        assert_eq!(results[0].form_type, "10-Q");
    }
}
