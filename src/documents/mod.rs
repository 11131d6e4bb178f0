//! Filing Document Module
//!
//! Handles filing metadata, chunking, embedding, vector storage, and retrieval.

pub mod artifact;
pub mod chunker;
pub mod embeddings;
pub mod http_embedder;
pub mod metadata;
pub mod retriever;
pub mod store;

// Re-export key public types
pub use artifact::{ArtifactError, ChunkArtifact, StoredChunk};
pub use chunker::{chunk_text, plan_windows, segment, Chunk, ChunkWindow, ChunkerError};
pub use embeddings::{Embedder, Embedding, EmbeddingEngine, EmbeddingError, HashingEmbedder};
pub use http_embedder::{HttpEmbedder, HttpEmbedderOptions, RetryPolicy};
pub use metadata::{FilingMetadata, MetadataError};
pub use retriever::{ChunkTextIndex, Retriever, RetrieverError, SearchResult};
pub use store::{
    ChunkRef, IndexManifest, RetrievalHit, RowMetadata, StoreError, VectorStore, VectorStoreRow,
};
