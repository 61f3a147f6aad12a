//! Exact nearest-neighbour index and its on-disk format.
//!
//! [`FlatL2Index`] is an exhaustive index: a query is compared against every
//! stored vector by squared Euclidean distance. [`VectorIndex`] pairs it with
//! the chunk metadata (parallel to the vectors) and a [`Manifest`].
//!
//! # Storage layout
//!
//! ```text
//! storage/
//! ├── manifest.json   format version, model, dims, counts, build time
//! ├── chunks.json     chunk metadata, in vector order
//! └── vectors.bin     count × dims little-endian f32
//! ```
//!
//! The index is immutable once built; a rebuild writes a new directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::embedding::{blob_to_vec, l2_distance_squared, vec_to_blob};
use crate::error::{RagError, Result};
use crate::models::{Chunk, RetrievedChunk};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const VECTORS_FILE: &str = "vectors.bin";

/// Bumped whenever the storage layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

/// Flat index over `dims`-dimensional vectors stored contiguously.
#[derive(Debug, Clone)]
pub struct FlatL2Index {
    dims: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one vector; its position is the previous `len()`.
    pub fn add(&mut self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dims {
            return Err(RagError::Configuration(format!(
                "vector has {} dimensions, index expects {}",
                vector.len(),
                self.dims
            )));
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    /// The `k` nearest positions as `(position, squared_distance)`.
    ///
    /// Sorted by distance ascending, then position ascending for ties.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dims.max(1))
            .enumerate()
            .map(|(i, v)| (i, l2_distance_squared(query, v)))
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    fn to_bytes(&self) -> Vec<u8> {
        vec_to_blob(&self.data)
    }

    fn from_bytes(dims: usize, bytes: &[u8]) -> Option<Self> {
        if dims == 0 || bytes.len() % 4 != 0 || (bytes.len() / 4) % dims != 0 {
            return None;
        }
        Some(Self {
            dims,
            data: blob_to_vec(bytes),
        })
    }
}

/// Metadata describing a persisted index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub embedding_model: String,
    pub dims: usize,
    /// Always `"l2"`.
    pub metric: String,
    pub chunk_count: usize,
    pub document_count: usize,
    pub built_at: DateTime<Utc>,
}

/// Searchable index: vectors plus the chunk each one came from.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    manifest: Manifest,
    chunks: Vec<Chunk>,
    flat: FlatL2Index,
}

impl VectorIndex {
    /// Build from parallel chunk and vector lists.
    pub fn build(
        embedding_model: &str,
        dims: usize,
        chunks: Vec<Chunk>,
        vectors: &[Vec<f32>],
    ) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(RagError::Ingest(format!(
                "{} chunks but {} embeddings",
                chunks.len(),
                vectors.len()
            )));
        }

        let mut flat = FlatL2Index::new(dims);
        for v in vectors {
            flat.add(v)?;
        }

        let document_count = chunks
            .iter()
            .map(|c| c.source.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        Ok(Self {
            manifest: Manifest {
                format_version: FORMAT_VERSION,
                embedding_model: embedding_model.to_string(),
                dims,
                metric: "l2".to_string(),
                chunk_count: chunks.len(),
                document_count,
                built_at: Utc::now(),
            },
            chunks,
            flat,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Sorted distinct source names.
    pub fn sources(&self) -> Vec<String> {
        self.chunks
            .iter()
            .map(|c| c.source.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// The `k` chunks nearest to `query`, in rank order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<RetrievedChunk> {
        self.flat
            .search(query, k)
            .into_iter()
            .enumerate()
            .map(|(i, (pos, distance))| RetrievedChunk {
                rank: i + 1,
                distance,
                chunk: self.chunks[pos].clone(),
            })
            .collect()
    }

    /// Write the three storage files into `dir`, which must exist.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let manifest = serde_json::to_vec_pretty(&self.manifest)
            .map_err(|e| RagError::Ingest(format!("serialize manifest: {}", e)))?;
        let chunks = serde_json::to_vec(&self.chunks)
            .map_err(|e| RagError::Ingest(format!("serialize chunks: {}", e)))?;

        std::fs::write(dir.join(VECTORS_FILE), self.flat.to_bytes())?;
        std::fs::write(dir.join(CHUNKS_FILE), chunks)?;
        // Written last: a directory with a manifest is complete.
        std::fs::write(dir.join(MANIFEST_FILE), manifest)?;
        Ok(())
    }

    /// Load and cross-check a persisted index.
    ///
    /// Any missing, unparsable or inconsistent file yields
    /// [`RagError::IndexLoad`].
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(RagError::index_load(dir, "storage directory does not exist"));
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(RagError::index_load(dir, "no index has been built yet"));
        }

        let manifest: Manifest = read_json(dir, MANIFEST_FILE)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(RagError::index_load(
                dir,
                format!(
                    "unsupported format version {} (expected {})",
                    manifest.format_version, FORMAT_VERSION
                ),
            ));
        }
        if manifest.metric != "l2" {
            return Err(RagError::index_load(
                dir,
                format!("unsupported metric '{}'", manifest.metric),
            ));
        }

        let chunks: Vec<Chunk> = read_json(dir, CHUNKS_FILE)?;

        let bytes = std::fs::read(dir.join(VECTORS_FILE))
            .map_err(|e| RagError::index_load(dir, format!("{}: {}", VECTORS_FILE, e)))?;
        let flat = FlatL2Index::from_bytes(manifest.dims, &bytes).ok_or_else(|| {
            RagError::index_load(
                dir,
                format!(
                    "{} is not a whole number of {}-dimensional vectors",
                    VECTORS_FILE, manifest.dims
                ),
            )
        })?;

        if flat.len() != chunks.len() || chunks.len() != manifest.chunk_count {
            return Err(RagError::index_load(
                dir,
                format!(
                    "count mismatch: manifest {}, chunks {}, vectors {}",
                    manifest.chunk_count,
                    chunks.len(),
                    flat.len()
                ),
            ));
        }
        if chunks.is_empty() {
            return Err(RagError::index_load(dir, "index is empty"));
        }

        Ok(Self {
            manifest,
            chunks,
            flat,
        })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(dir: &Path, file: &str) -> Result<T> {
    let bytes = std::fs::read(dir.join(file))
        .map_err(|e| RagError::index_load(dir, format!("{}: {}", file, e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RagError::index_load(dir, format!("{} is corrupt: {}", file, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(source: &str, i: usize, text: &str) -> Chunk {
        Chunk {
            id: format!("{}#0:{}", source, i),
            source: source.to_string(),
            page: None,
            chunk_index: i,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    fn sample() -> VectorIndex {
        VectorIndex::build(
            "test-model",
            2,
            vec![
                chunk("a.txt", 0, "origin"),
                chunk("b.txt", 0, "far"),
                chunk("a.txt", 1, "near"),
            ],
            &[vec![0.0, 0.0], vec![10.0, 10.0], vec![1.0, 0.0]],
        )
        .unwrap()
    }

    #[test]
    fn flat_search_orders_by_distance() {
        let mut flat = FlatL2Index::new(2);
        flat.add(&[5.0, 5.0]).unwrap();
        flat.add(&[0.0, 1.0]).unwrap();
        flat.add(&[0.0, 0.0]).unwrap();
        let hits = flat.search(&[0.0, 0.0], 2);
        assert_eq!(hits, vec![(2, 0.0), (1, 1.0)]);
    }

    #[test]
    fn flat_search_ties_break_by_position() {
        let mut flat = FlatL2Index::new(1);
        flat.add(&[1.0]).unwrap();
        flat.add(&[-1.0]).unwrap();
        let hits = flat.search(&[0.0], 2);
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 1);
    }

    #[test]
    fn flat_rejects_wrong_dimension() {
        let mut flat = FlatL2Index::new(3);
        assert!(flat.add(&[1.0, 2.0]).is_err());
        assert!(flat.is_empty());
    }

    #[test]
    fn k_larger_than_index_returns_all() {
        let idx = sample();
        assert_eq!(idx.search(&[0.0, 0.0], 10).len(), 3);
    }

    #[test]
    fn search_returns_ranked_chunks() {
        let idx = sample();
        let hits = idx.search(&[0.2, 0.0], 2);
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[0].chunk.text, "origin");
        assert_eq!(hits[1].rank, 2);
        assert_eq!(hits[1].chunk.text, "near");
    }

    #[test]
    fn manifest_counts_documents() {
        let idx = sample();
        assert_eq!(idx.manifest().chunk_count, 3);
        assert_eq!(idx.manifest().document_count, 2);
        assert_eq!(idx.sources(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn build_rejects_length_mismatch() {
        let err = VectorIndex::build("m", 2, vec![chunk("a.txt", 0, "x")], &[]).unwrap_err();
        assert!(matches!(err, RagError::Ingest(_)));
    }

    #[test]
    fn save_then_load_preserves_search() {
        let tmp = TempDir::new().unwrap();
        let idx = sample();
        idx.save(tmp.path()).unwrap();

        let loaded = VectorIndex::load(tmp.path()).unwrap();
        assert_eq!(loaded.manifest(), idx.manifest());
        assert_eq!(loaded.chunks(), idx.chunks());
        let before: Vec<String> = idx.search(&[9.0, 9.0], 3).into_iter().map(|h| h.chunk.id).collect();
        let after: Vec<String> = loaded.search(&[9.0, 9.0], 3).into_iter().map(|h| h.chunk.id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn load_empty_directory_fails() {
        let tmp = TempDir::new().unwrap();
        let err = VectorIndex::load(tmp.path()).unwrap_err();
        assert!(matches!(err, RagError::IndexLoad { .. }));
    }

    #[test]
    fn load_missing_directory_fails() {
        let tmp = TempDir::new().unwrap();
        let err = VectorIndex::load(&tmp.path().join("absent")).unwrap_err();
        assert!(matches!(err, RagError::IndexLoad { .. }));
    }

    #[test]
    fn load_detects_truncated_vectors() {
        let tmp = TempDir::new().unwrap();
        sample().save(tmp.path()).unwrap();
        let path = tmp.path().join(VECTORS_FILE);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();

        let err = VectorIndex::load(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("count mismatch"), "{err}");
    }

    #[test]
    fn load_detects_corrupt_chunks() {
        let tmp = TempDir::new().unwrap();
        sample().save(tmp.path()).unwrap();
        std::fs::write(tmp.path().join(CHUNKS_FILE), b"{not json").unwrap();

        let err = VectorIndex::load(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("corrupt"), "{err}");
    }
}
