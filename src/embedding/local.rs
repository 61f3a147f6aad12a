//! In-process embeddings via fastembed.
//!
//! The ONNX model is downloaded from Hugging Face on first use and cached;
//! afterwards embedding runs offline. Inference is blocking, so it runs on
//! tokio's blocking pool. The loaded model is kept for the embedder's
//! lifetime.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::RagError;

pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
    loaded: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, RagError> {
        let model = config_to_fastembed_model(&config.model)
            .map_err(|e| RagError::Configuration(e.to_string()))?;
        let native = native_dims(&config.model);
        if native != config.dims {
            return Err(RagError::Configuration(format!(
                "embedding.dims is {} but '{}' produces {}-dimensional vectors",
                config.dims, config.model, native
            )));
        }

        Ok(Self {
            model_name: config.model.clone(),
            model,
            dims: config.dims,
            batch_size: config.batch_size,
            loaded: Arc::new(Mutex::new(None)),
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let texts = texts.to_vec();
        let batch_size = self.batch_size;
        let model = self.model.clone();
        let loaded = Arc::clone(&self.loaded);

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
            if guard.is_none() {
                let init = fastembed::InitOptions::new(model).with_show_download_progress(false);
                let embedding = fastembed::TextEmbedding::try_new(init)
                    .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(embedding);
            }
            let Some(embedding) = guard.as_mut() else {
                bail!("local embedding model unavailable");
            };
            embedding
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

fn native_dims(name: &str) -> usize {
    match name {
        "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    }
}

fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_known() {
        let config = EmbeddingConfig::default();
        let embedder = LocalEmbedder::new(&config).unwrap();
        assert_eq!(embedder.model_name(), "bge-small-en-v1.5");
        assert_eq!(embedder.dims(), 384);
    }

    #[test]
    fn dims_mismatch_is_configuration_error() {
        let config = EmbeddingConfig {
            model: "bge-base-en-v1.5".to_string(),
            dims: 384,
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            LocalEmbedder::new(&config),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn unknown_model_rejected() {
        assert!(config_to_fastembed_model("gpt-embed-9000").is_err());
    }
}
