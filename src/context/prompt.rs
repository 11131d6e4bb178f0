//! Grounding prompt assembly.
//!
//! Turns ranked, resolved hits and a question into the prompt handed to a
//! downstream text generator. Passages are added best-first until the token
//! budget is reached.

use serde::Serialize;
use tracing::debug;

use super::tokens::Tokenizer;
use crate::documents::retriever::SearchResult;

/// Characters of each passage included in the prompt
pub const MAX_CHUNK_CHARS: usize = 500;

/// Default prompt token budget
pub const PROMPT_TOKEN_BUDGET: u32 = 6_000;

const INSTRUCTION: &str = "You are a financial analyst assistant. \
    Answer the user's question based ONLY on the provided context from SEC filings.";

#[derive(Debug, Clone, Copy)]
pub struct PromptOptions {
    pub max_chunk_chars: usize,
    pub token_budget: u32,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            max_chunk_chars: MAX_CHUNK_CHARS,
            token_budget: PROMPT_TOKEN_BUDGET,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroundingPrompt {
    pub prompt: String,
    /// Number of passages that fit in the budget
    pub passages: usize,
    pub tokens: u32,
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn passage_block(number: usize, result: &SearchResult, text: &str, max_chars: usize) -> String {
    format!(
        "[Chunk {}] (from {}, similarity: {:.3})\n{}",
        number,
        result.document_id,
        result.score,
        truncate_chars(text, max_chars)
    )
}

fn render(question: &str, blocks: &[String]) -> String {
    format!(
        "{}\n\nContext from SEC Filings:\n{}\n\nQuestion: {}\n\n\
         Answer (be specific and cite which filing you're referencing):",
        INSTRUCTION,
        blocks.join("\n\n"),
        question
    )
}

/// Build the grounding prompt for `question` from ranked results.
///
/// Results without resolved text are skipped.
pub fn build_grounding_prompt(
    tokenizer: &Tokenizer,
    question: &str,
    results: &[SearchResult],
    options: &PromptOptions,
) -> GroundingPrompt {
    let mut blocks: Vec<String> = Vec::new();
    let mut used = tokenizer.count_tokens(&render(question, &blocks));

    for result in results {
        let Some(text) = result.content.as_deref() else {
            debug!(
                document_id = %result.document_id,
                chunk_id = result.chunk_id,
                "Skipping unresolved hit"
            );
            continue;
        };
        let block = passage_block(blocks.len() + 1, result, text, options.max_chunk_chars);
        // Separator plus the block itself
        let cost = tokenizer.count_tokens(&block) + 1;
        if used + cost > options.token_budget {
            break;
        }
        used += cost;
        blocks.push(block);
    }

    let prompt = render(question, &blocks);
    GroundingPrompt {
        tokens: tokenizer.count_tokens(&prompt),
        passages: blocks.len(),
        prompt,
    }
}
