//! Context Module
//!
//! Token handling, the per-chunk document header, and the grounding prompt
//! built from retrieved chunks.

pub mod header;
pub mod prompt;
pub mod tokens;

// Re-export public types for external use
pub use header::{build_embedding_text, context_header};
pub use prompt::{build_grounding_prompt, GroundingPrompt, PromptOptions};
pub use tokens::{TokenId, Tokenizer, TokenizerError};
