//! Filing Metadata
//!
//! Fixed-field record describing a source filing. Fields other than the
//! filename are optional; consumers substitute placeholders where needed.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid metadata sidecar {path}: {source}")]
    Sidecar {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Metadata for one SEC filing.
///
/// Created once per source document and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingMetadata {
    pub filename: String,
    /// Central index key
    #[serde(default)]
    pub cik: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub form_type: Option<String>,
    /// Filing date as found upstream (usually `YYYYMMDD`, not validated)
    #[serde(default)]
    pub filing_date: Option<String>,
    #[serde(default)]
    pub accession_number: Option<String>,
    #[serde(default)]
    pub fiscal_year: Option<String>,
}

/// Partial metadata read from a `<stem>.meta.json` sidecar
#[derive(Debug, Clone, Default, Deserialize)]
struct MetadataOverrides {
    cik: Option<String>,
    company_name: Option<String>,
    form_type: Option<String>,
    filing_date: Option<String>,
    accession_number: Option<String>,
    fiscal_year: Option<String>,
}

impl FilingMetadata {
    /// Parse metadata out of an EDGAR-style filename.
    ///
    /// Expected shape: `YYYYMMDD_FORM-TYPE_edgar_data_CIK_ACCESSION.txt`.
    /// Anything missing is left as `None`.
    pub fn from_filename(filename: &str) -> Self {
        let stem = strip_extension(filename);
        let parts: Vec<&str> = stem.split('_').collect();
        let part = |i: usize| parts.get(i).and_then(|p| non_blank(p));

        let filing_date = part(0);
        let fiscal_year = filing_date.as_deref().and_then(fiscal_year_of);

        Self {
            filename: filename.to_string(),
            cik: part(4),
            company_name: None,
            form_type: part(1),
            filing_date,
            accession_number: part(5),
            fiscal_year,
        }
    }

    /// Metadata for a document on disk: filename parsing plus an optional
    /// `<stem>.meta.json` sidecar in the same directory.
    pub fn for_document(path: &Path) -> Result<Self, MetadataError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let mut metadata = Self::from_filename(&filename);

        let sidecar = sidecar_path(path);
        if sidecar.is_file() {
            let raw = fs::read_to_string(&sidecar)?;
            let overrides: MetadataOverrides =
                serde_json::from_str(&raw).map_err(|source| MetadataError::Sidecar {
                    path: sidecar.display().to_string(),
                    source,
                })?;
            metadata.merge(overrides);
        }

        Ok(metadata)
    }

    fn merge(&mut self, overrides: MetadataOverrides) {
        fn take(slot: &mut Option<String>, value: Option<String>) {
            if let Some(v) = value.as_deref().and_then(non_blank) {
                *slot = Some(v);
            }
        }
        take(&mut self.cik, overrides.cik);
        take(&mut self.company_name, overrides.company_name);
        take(&mut self.form_type, overrides.form_type);
        take(&mut self.filing_date, overrides.filing_date);
        take(&mut self.accession_number, overrides.accession_number);
        take(&mut self.fiscal_year, overrides.fiscal_year);
        if self.fiscal_year.is_none() {
            self.fiscal_year = self.filing_date.as_deref().and_then(fiscal_year_of);
        }
    }

    /// Document identifier: the filename without its extension.
    pub fn document_id(&self) -> String {
        strip_extension(&self.filename).to_string()
    }
}

/// Path of the metadata sidecar for a document
pub fn sidecar_path(document: &Path) -> PathBuf {
    let stem = document
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    document.with_file_name(format!("{}.meta.json", stem))
}

fn strip_extension(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => &filename[..idx],
        _ => filename,
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn fiscal_year_of(date: &str) -> Option<String> {
    let year: String = date.chars().take(4).collect();
    if year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()) {
        Some(year)
    } else {
        None
    }
}
