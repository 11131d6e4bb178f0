//! Token encoding using tiktoken-rs.
//!
//! Wraps a byte-pair encoding table so that text and token ids convert
//! deterministically in both directions. Chunk sizes are counted in these
//! tokens, so the same encoding must be used for encode and decode.

use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;
use tiktoken_rs::{cl100k_base, p50k_base, r50k_base, CoreBPE};

/// Default encoding, matching the one used to size filing chunks.
pub const DEFAULT_ENCODING: &str = "cl100k_base";

/// Maximum number of cached token counts per tokenizer
const TOKEN_CACHE_SIZE: usize = 10_000;

/// A single token id as produced by the encoder
pub type TokenId = usize;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),
    #[error("Failed to load encoding {name}: {reason}")]
    LoadFailed { name: String, reason: String },
}

/// Cache for token counts, keyed by content hash
struct TokenCache {
    cache: HashMap<u64, u32>,
    max_size: usize,
}

impl TokenCache {
    fn new(max_size: usize) -> Self {
        Self {
            cache: HashMap::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    fn get(&self, hash: u64) -> Option<u32> {
        self.cache.get(&hash).copied()
    }

    fn insert(&mut self, hash: u64, count: u32) {
        // At capacity: drop half the entries
        if self.cache.len() >= self.max_size {
            let keys_to_remove: Vec<_> =
                self.cache.keys().take(self.max_size / 2).copied().collect();
            for key in keys_to_remove {
                self.cache.remove(&key);
            }
        }
        self.cache.insert(hash, count);
    }
}

/// Tokenizer adapter around a tiktoken BPE table.
///
/// Loading the table is the expensive part; build one instance and pass it
/// to every stage that needs token accounting.
pub struct Tokenizer {
    encoding: String,
    bpe: CoreBPE,
    cache: RwLock<TokenCache>,
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl Tokenizer {
    /// Load a named encoding (`cl100k_base`, `p50k_base` or `r50k_base`).
    pub fn new(encoding: &str) -> Result<Self, TokenizerError> {
        let loaded = match encoding {
            "cl100k_base" => cl100k_base(),
            "p50k_base" => p50k_base(),
            "r50k_base" => r50k_base(),
            other => return Err(TokenizerError::UnknownEncoding(other.to_string())),
        };
        let bpe = loaded.map_err(|e| TokenizerError::LoadFailed {
            name: encoding.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            encoding: encoding.to_string(),
            bpe,
            cache: RwLock::new(TokenCache::new(TOKEN_CACHE_SIZE)),
        })
    }

    /// Tokenizer for the default `cl100k_base` encoding
    pub fn cl100k() -> Result<Self, TokenizerError> {
        Self::new(DEFAULT_ENCODING)
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Encode text into token ids. Special-token markup is encoded as plain text.
    pub fn encode(&self, text: &str) -> Vec<TokenId> {
        if text.is_empty() {
            return Vec::new();
        }
        self.bpe.encode_ordinary(text)
    }

    /// Decode token ids back into text.
    ///
    /// A range that splits a multi-byte character decodes the partial bytes
    /// as U+FFFD rather than failing.
    pub fn decode(&self, tokens: &[TokenId]) -> String {
        if tokens.is_empty() {
            return String::new();
        }
        let bytes = self.bpe._decode_native(tokens);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Count tokens in text, caching by content hash.
    pub fn count_tokens(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }

        let content_hash = hash_content(text);
        if let Some(count) = self.cache.read().get(content_hash) {
            return count;
        }

        let count = self.encode(text).len() as u32;
        self.cache.write().insert(content_hash, count);
        count
    }

    /// Number of cached entries and the cache capacity
    pub fn cache_stats(&self) -> (usize, usize) {
        let cache = self.cache.read();
        (cache.cache.len(), cache.max_size)
    }
}

/// Hash content for cache lookup
fn hash_content(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}
