//! Offline feature-hashing embedder.
//!
//! Lower-cased alphanumeric tokens are hashed (SHA-256, first 8 bytes) into
//! `dims` buckets and the count vector is L2-normalised. Texts sharing words
//! land close together under L2 distance, which is enough for lexical
//! retrieval without a model download.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::Embedder;

pub struct HashEmbedder {
    dims: usize,
    name: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            dims,
            name: format!("hash-{}", dims),
        }
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokens(text) {
            v[bucket(&token, self.dims)] += 1.0;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn bucket(token: &str, dims: usize) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(head) % dims as u64) as usize
}
