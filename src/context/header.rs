//! Context headers for embedding input.
//!
//! Each chunk is embedded as a short document header followed by its
//! extended text. Only the core text is stored for retrieval.

use crate::documents::chunker::Chunk;
use crate::documents::metadata::FilingMetadata;

pub const UNKNOWN_COMPANY: &str = "Unknown Company";
pub const UNKNOWN_FORM: &str = "Unknown Form";
pub const UNKNOWN_DATE: &str = "Unknown Date";
pub const UNKNOWN_ID: &str = "Unknown ID";

fn field_or<'a>(value: Option<&'a str>, placeholder: &'a str) -> &'a str {
    match value {
        Some(v) if !v.trim().is_empty() => v.trim(),
        _ => placeholder,
    }
}

/// Render the document header, ending in a blank line.
///
/// The identifier is the CIK, then the accession number.
pub fn context_header(metadata: &FilingMetadata) -> String {
    let company = field_or(metadata.company_name.as_deref(), UNKNOWN_COMPANY);
    let form_type = field_or(metadata.form_type.as_deref(), UNKNOWN_FORM);
    let filing_date = field_or(metadata.filing_date.as_deref(), UNKNOWN_DATE);
    let identifier = metadata
        .cik
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .or(metadata.accession_number.as_deref());
    let identifier = field_or(identifier, UNKNOWN_ID);

    format!(
        "Document: {} ({}) filed {} [ID: {}]\n\n",
        company, form_type, filing_date, identifier
    )
}

/// Exact text submitted to the embedding model for a chunk.
pub fn build_embedding_text(chunk: &Chunk, metadata: &FilingMetadata) -> String {
    let mut text = context_header(metadata);
    text.push_str(&chunk.extended_text);
    text
}
