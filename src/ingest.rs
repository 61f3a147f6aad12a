//! Ingestion pipeline orchestration.
//!
//! Coordinates a full rebuild: data directory → extraction → chunking →
//! embedding → flat L2 index → storage swap. The index is always built from
//! the complete current document set; there is no incremental update.
//!
//! Storage is only touched once the new index is fully built in memory, and
//! then replaced via [`storage::replace_dir_atomically`]. Any failure before
//! that point leaves the previous index in place.

use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info};

use crate::chunk::chunk_documents;
use crate::config::Config;
use crate::embedding::{check_dims, Embedder};
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::loader;
use crate::models::{Chunk, IngestSummary};
use crate::storage;

/// Rebuild the index from every document in the data directory.
///
/// # Errors
///
/// - [`RagError::NoDocuments`]: nothing to ingest (missing/empty directory,
///   or files without any text). Storage is left unmodified.
/// - [`RagError::Ingest`]: a file failed to extract, embedding failed, or
///   the index could not be written.
/// - [`RagError::Configuration`]: the embedder returned vectors of the
///   wrong dimension.
pub async fn ingest(config: &Config, embedder: &dyn Embedder) -> Result<IngestSummary> {
    let started = Instant::now();

    let documents = loader::load_documents(&config.paths)?;
    let chunks = chunk_documents(
        &documents,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );
    if chunks.is_empty() {
        return Err(RagError::NoDocuments(config.paths.data_dir.clone()));
    }

    let sources: Vec<String> = chunks
        .iter()
        .map(|c| c.source.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    info!(
        records = documents.len(),
        documents = sources.len(),
        chunks = chunks.len(),
        "chunked documents"
    );

    let vectors = embed_chunks(embedder, &chunks, config.embedding.batch_size).await?;

    let index = VectorIndex::build(embedder.model_name(), embedder.dims(), chunks, &vectors)?;
    storage::replace_dir_atomically(&config.paths.storage_dir, |dir| index.save(dir))
        .map_err(|e| match e {
            RagError::Io(io) => RagError::Ingest(format!(
                "failed to write index to {}: {}",
                config.paths.storage_dir.display(),
                io
            )),
            other => other,
        })?;

    let summary = IngestSummary {
        documents: sources.len(),
        chunks: index.len(),
        sources,
        elapsed_ms: started.elapsed().as_millis(),
    };
    info!(
        documents = summary.documents,
        chunks = summary.chunks,
        elapsed_ms = summary.elapsed_ms as u64,
        storage = %config.paths.storage_dir.display(),
        "index rebuilt"
    );
    Ok(summary)
}

/// Embed chunk texts in batches of `batch_size`, preserving order.
async fn embed_chunks(
    embedder: &dyn Embedder,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(chunks.len());

    for (i, batch) in chunks.chunks(batch_size.max(1)).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = embedder
            .embed(&texts)
            .await
            .map_err(|e| RagError::Ingest(format!("embedding batch {} failed: {}", i, e)))?;

        if embedded.len() != texts.len() {
            return Err(RagError::Ingest(format!(
                "embedding batch {} returned {} vectors for {} texts",
                i,
                embedded.len(),
                texts.len()
            )));
        }
        check_dims(embedder, &embedded)?;

        debug!(batch = i, size = texts.len(), "embedded batch");
        vectors.extend(embedded);
    }

    Ok(vectors)
}
