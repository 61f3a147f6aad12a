//! Error taxonomy for ingestion and question answering.
//!
//! Every failure the library reports is a [`RagError`]. Each variant maps to
//! a stable machine-readable [`code`](RagError::code) that the HTTP server
//! uses in its error body:
//!
//! ```json
//! { "error": { "code": "no_documents", "message": "no documents to ingest in data" } }
//! ```
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`NoDocuments`](RagError::NoDocuments) | `no_documents` | yes (upload, rebuild) |
//! | [`IndexLoad`](RagError::IndexLoad) | `index_load` | yes (rebuild) |
//! | [`Retrieval`](RagError::Retrieval) | `retrieval` | yes (per question) |
//! | [`Completion`](RagError::Completion) | `completion` | yes (per question) |
//! | [`Configuration`](RagError::Configuration) | `configuration` | no |
//! | [`Ingest`](RagError::Ingest) | `ingest` | yes (fix input, rebuild) |
//! | [`RebuildInProgress`](RagError::RebuildInProgress) | `rebuild_in_progress` | yes (wait) |
//! | [`InvalidDocument`](RagError::InvalidDocument) | `invalid_document` | yes |
//! | [`DocumentNotFound`](RagError::DocumentNotFound) | `document_not_found` | yes |
//! | [`Io`](RagError::Io) | `io` | yes |

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RagError {
    /// The source directory is missing or holds no accepted file.
    #[error("no documents to ingest in {}: add PDF or TXT files first", .0.display())]
    NoDocuments(PathBuf),

    /// The persisted index is missing, empty or corrupt.
    #[error("failed to load index from {}: {reason}", .path.display())]
    IndexLoad { path: PathBuf, reason: String },

    /// Embedding the question or searching the index failed.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// The language model call failed or timed out.
    #[error("completion failed: {0}")]
    Completion(String),

    /// Missing credential, invalid settings or an embedding model mismatch.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Extraction, embedding or persistence failed during a rebuild.
    #[error("ingestion failed: {0}")]
    Ingest(String),

    #[error("knowledge base rebuild already in progress")]
    RebuildInProgress,

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Stable identifier for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::NoDocuments(_) => "no_documents",
            RagError::IndexLoad { .. } => "index_load",
            RagError::Retrieval(_) => "retrieval",
            RagError::Completion(_) => "completion",
            RagError::Configuration(_) => "configuration",
            RagError::Ingest(_) => "ingest",
            RagError::RebuildInProgress => "rebuild_in_progress",
            RagError::InvalidDocument(_) => "invalid_document",
            RagError::DocumentNotFound(_) => "document_not_found",
            RagError::Io(_) => "io",
        }
    }

    /// Whether the caller can retry after user action without restarting.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, RagError::Configuration(_))
    }

    pub(crate) fn index_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RagError::IndexLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
