//! Document Chunking
//!
//! Splits a token sequence into fixed-size core windows that partition the
//! document exactly, and pairs each core window with a wider extended window
//! (core plus a context margin on both sides) used only for embedding.
//!
//! Boundaries are chosen in token space, so decoded chunk text may start or
//! end mid-word.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::tokens::{TokenId, Tokenizer};

/// Target chunk size in tokens
pub const CHUNK_SIZE_TARGET: usize = 500;

/// Tokens of surrounding context added on each side of a chunk for embedding
pub const CONTEXT_MARGIN: usize = 50;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Document too large: {0}")]
    TooLarge(String),
}

/// Token ranges for one chunk. All ranges are half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    pub core_start: usize,
    pub core_end: usize,
    pub extended_start: usize,
    pub extended_end: usize,
}

impl ChunkWindow {
    pub fn core_len(&self) -> usize {
        self.core_end - self.core_start
    }

    pub fn extended_len(&self) -> usize {
        self.extended_end - self.extended_start
    }
}

/// A core segment of a document together with its extended context text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Zero-based position of the chunk within its document
    pub chunk_id: u32,
    pub core_text: String,
    pub extended_text: String,
    pub core_start: usize,
    pub core_end: usize,
    pub extended_start: usize,
    pub extended_end: usize,
    pub core_token_count: u32,
    pub extended_token_count: u32,
}

/// Plan core and extended windows for a sequence of `len` tokens.
///
/// Core windows step by `chunk_size` from 0 and the last one may be short.
/// Extended windows are clamped to `[0, len)`.
pub fn plan_windows(
    len: usize,
    chunk_size: usize,
    context_margin: usize,
) -> Result<Vec<ChunkWindow>, ChunkerError> {
    if chunk_size == 0 {
        return Err(ChunkerError::InvalidConfiguration(
            "chunk_size must be greater than zero".to_string(),
        ));
    }

    // Chunk ids and token counts are stored as u32
    let count = len.div_ceil(chunk_size);
    if u32::try_from(count).is_err() {
        return Err(ChunkerError::TooLarge(format!(
            "{} chunks exceed the chunk id range",
            count
        )));
    }
    let widest = len.min(chunk_size.saturating_add(context_margin.saturating_mul(2)));
    if u32::try_from(widest).is_err() {
        return Err(ChunkerError::TooLarge(format!(
            "{}-token windows exceed the token count range",
            widest
        )));
    }

    let mut windows = Vec::with_capacity(count);
    let mut start = 0usize;
    while start < len {
        let end = start.saturating_add(chunk_size).min(len);
        windows.push(ChunkWindow {
            core_start: start,
            core_end: end,
            extended_start: start.saturating_sub(context_margin),
            extended_end: end.saturating_add(context_margin).min(len),
        });
        start = end;
    }

    Ok(windows)
}

/// Segment a token sequence into chunks, decoding each window's text.
///
/// `tokens` must have been produced by `tokenizer`.
pub fn segment(
    tokenizer: &Tokenizer,
    tokens: &[TokenId],
    chunk_size: usize,
    context_margin: usize,
) -> Result<Vec<Chunk>, ChunkerError> {
    let windows = plan_windows(tokens.len(), chunk_size, context_margin)?;

    let mut chunks = Vec::with_capacity(windows.len());
    for (index, window) in windows.iter().enumerate() {
        chunks.push(Chunk {
            chunk_id: to_u32(index)?,
            core_text: tokenizer.decode(&tokens[window.core_start..window.core_end]),
            extended_text: tokenizer.decode(&tokens[window.extended_start..window.extended_end]),
            core_start: window.core_start,
            core_end: window.core_end,
            extended_start: window.extended_start,
            extended_end: window.extended_end,
            core_token_count: to_u32(window.core_len())?,
            extended_token_count: to_u32(window.extended_len())?,
        });
    }

    Ok(chunks)
}

fn to_u32(value: usize) -> Result<u32, ChunkerError> {
    u32::try_from(value)
        .map_err(|_| ChunkerError::TooLarge(format!("{} does not fit in u32", value)))
}

/// Encode `text` and segment it in one step.
pub fn chunk_text(
    tokenizer: &Tokenizer,
    text: &str,
    chunk_size: usize,
    context_margin: usize,
) -> Result<(Vec<Chunk>, usize), ChunkerError> {
    let tokens = tokenizer.encode(text);
    let chunks = segment(tokenizer, &tokens, chunk_size, context_margin)?;
    Ok((chunks, tokens.len()))
}
