//! PDF text extraction.
//!
//! Returns the plain UTF-8 text of a PDF. Malformed files are an error for
//! that file only; the loader skips it and carries on.

use std::panic::{catch_unwind, AssertUnwindSafe};

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug)]
pub enum ExtractError {
    NotPdf,
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::NotPdf => write!(f, "not a PDF (missing %PDF- header)"),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract the text of every page, in page order.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(ExtractError::NotPdf);
    }
    // pdf-extract panics on some malformed inputs.
    match catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked".to_string())),
    }
}
