//! Core data models.
//!
//! These types flow through the two pipelines: [`SourceDocument`]s are read
//! from the data directory, split into [`Chunk`]s, embedded and indexed; a
//! question produces [`RetrievedChunk`]s and finally an [`Answer`].

use serde::{Deserialize, Serialize};

/// Sentinel source used when a loader cannot name the originating file.
pub const UNKNOWN_SOURCE: &str = "Unknown";

/// One raw text record read from an uploaded file.
///
/// Plain-text files produce one record; PDFs produce one record per page.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Bare filename of the originating file.
    pub source: String,
    /// 1-based page number for paginated formats.
    pub page: Option<u32>,
    pub text: String,
}

/// A contiguous span of a document's text, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic identifier: `"{source}#{page}:{chunk_index}"`.
    pub id: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub chunk_index: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk returned by nearest-neighbour search.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    /// 1-based rank in retrieval order.
    pub rank: usize,
    /// Squared L2 distance to the query embedding.
    pub distance: f32,
    pub chunk: Chunk,
}

/// A document present in the data directory.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DocumentInfo {
    pub name: String,
    pub size_bytes: u64,
}

/// Summary of a completed rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    /// Distinct files that contributed at least one record.
    pub documents: usize,
    pub chunks: usize,
    /// Sorted distinct source names in the new index.
    pub sources: Vec<String>,
    pub elapsed_ms: u128,
}

/// The result of answering one question.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Answer {
    pub text: String,
    /// Distinct sources of the retrieved chunks, sorted lexicographically.
    pub sources: Vec<String>,
}

impl Answer {
    /// Answer text followed by a bulleted list of source documents.
    pub fn render(&self) -> String {
        let mut out = self.text.trim_end().to_string();
        if !self.sources.is_empty() {
            out.push_str("\n\nSource documents:\n");
            out.push_str(&render_sources(&self.sources));
        }
        out
    }
}

/// Bulleted, newline-separated source list.
pub fn render_sources(sources: &[String]) -> String {
    sources
        .iter()
        .map(|s| format!("- {}", s))
        .collect::<Vec<_>>()
        .join("\n")
}
