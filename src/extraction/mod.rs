//! Text extraction from uploaded documents.
//!
//! Converts an uploaded file into one string of document text:
//!
//! - `text/plain`: decoded verbatim
//! - `application/pdf`: page text via [`lopdf`]
//! - `.docx` (Office Open XML): run text via [`docx_rs`]
//!
//! Legacy Word (`application/msword`) and every other type are rejected.
//! Extraction is deterministic, so nothing here retries.

mod docx;
mod pdf;

use axum::body::Bytes;

/// Plain text media type.
pub const TEXT_PLAIN: &str = "text/plain";
/// PDF media type.
pub const APPLICATION_PDF: &str = "application/pdf";
/// Office Open XML word processing media type.
pub const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
/// Legacy binary Word media type.
pub const MSWORD: &str = "application/msword";

/// An uploaded file: declared media type plus raw content.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Original file name, if the client sent one.
    pub name: Option<String>,
    /// Normalized media type (lower-case, no parameters).
    pub media_type: String,
    /// File content.
    pub bytes: Bytes,
}

impl SourceFile {
    /// Build a source file, normalizing the declared media type.
    ///
    /// When the declared type is missing or `application/octet-stream`, the
    /// type is guessed from the file name.
    pub fn new(name: Option<String>, declared: Option<&str>, bytes: impl Into<Bytes>) -> Self {
        let declared = declared.map(normalize_media_type).unwrap_or_default();
        let media_type = if declared.is_empty() || declared == "application/octet-stream" {
            name.as_deref()
                .and_then(|n| mime_guess::from_path(n).first_raw())
                .map_or(declared, normalize_media_type)
        } else {
            declared
        };

        Self {
            name,
            media_type,
            bytes: bytes.into(),
        }
    }
}

/// Strip parameters and lower-case a media type.
fn normalize_media_type(raw: &str) -> String {
    raw.split(';').next().unwrap_or_default().trim().to_lowercase()
}

/// Errors that can occur during extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// The media type is not one this service reads.
    #[error(
        "Unsupported file type: {0}. Please use PDF, DOCX, or TXT files, or paste the text directly."
    )]
    UnsupportedType(String),

    /// Legacy binary Word document.
    #[error(
        "Legacy DOC files are not supported. Please convert to DOCX format or copy and paste the text."
    )]
    LegacyWord,

    /// The container parsed but held no text (e.g. a scanned PDF).
    #[error("No text content found in the {0}.")]
    NoText(&'static str),

    /// The container could not be parsed.
    #[error("{message}")]
    Malformed {
        /// User-facing explanation.
        message: &'static str,
        /// Parser detail, for logs.
        reason: String,
    },
}

impl ExtractionError {
    /// Whether the failure is the client's input rather than the parser.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Malformed { .. })
    }
}

/// Extract the document text from `file`.
///
/// PDF and DOCX parsing is CPU-bound; async callers should run this on the
/// blocking pool.
pub fn extract(file: &SourceFile) -> Result<String, ExtractionError> {
    match file.media_type.as_str() {
        TEXT_PLAIN => Ok(String::from_utf8_lossy(&file.bytes).into_owned()),
        APPLICATION_PDF => pdf::extract_text(&file.bytes),
        DOCX => docx::extract_text(&file.bytes),
        MSWORD => Err(ExtractionError::LegacyWord),
        other => Err(ExtractionError::UnsupportedType(if other.is_empty() {
            "unknown".to_string()
        } else {
            other.to_string()
        })),
    }
}
