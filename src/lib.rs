// SEC RAG Library
// Exports core modules for use by the CLI binary

pub mod config;
pub mod context;
pub mod documents;
pub mod pipeline;

// Re-export commonly used types for CLI
pub use config::{ConfigError, EmbeddingBackend, EmbeddingConfig, PipelineConfig, RetrievalConfig};
pub use context::{build_grounding_prompt, context_header, PromptOptions, Tokenizer};
pub use documents::{
    ChunkArtifact, ChunkTextIndex, EmbeddingEngine, FilingMetadata, IndexManifest, Retriever,
    SearchResult, VectorStore,
};
pub use pipeline::{
    build_index, ingest_directory, load_artifacts, process_document, CorpusReport, DocumentFailure,
    PipelineError,
};
