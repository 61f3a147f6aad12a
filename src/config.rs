//! TOML configuration.
//!
//! Every section is optional; omitted fields take the defaults below, which
//! match the reference deployment (512/64 word chunks, 384-dimensional
//! `bge-small-en-v1.5` embeddings, top-4 retrieval, a Groq-hosted chat model
//! at temperature 0.3).
//!
//! ```toml
//! [paths]
//! data_dir = "data"
//! storage_dir = "storage"
//!
//! [chunking]
//! chunk_size = 512
//! chunk_overlap = 64
//!
//! [embedding]
//! provider = "local"
//! model = "bge-small-en-v1.5"
//! dims = 384
//!
//! [retrieval]
//! top_k = 4
//!
//! [llm]
//! base_url = "https://api.groq.com/openai/v1"
//! model = "llama3-70b-8192"
//! temperature = 0.3
//! api_key_env = "GROQ_API_KEY"
//!
//! [server]
//! bind = "127.0.0.1:8501"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Path searched when no `--config` flag is given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/docqa.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Directory holding the uploaded documents.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory holding the persisted index.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Descend into subdirectories of `data_dir`.
    #[serde(default = "default_true")]
    pub recursive: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            storage_dir: default_storage_dir(),
            recursive: true,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from("storage")
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Words per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Words shared between adjacent chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `local`, `openai`, `ollama` or `hash`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    /// Base URL override for the HTTP providers.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "bge-small-en-v1.5".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible API root; `/chat/completions` is appended.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_llm_model() -> String {
    "llama3-70b-8192".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}

/// Resolve the configuration for the CLI.
///
/// An explicit path must exist. Without one, [`DEFAULT_CONFIG_PATH`] is used
/// when present and built-in defaults otherwise.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => load_config(path),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load_config(default_path)
            } else {
                let config = Config::default();
                validate(&config)?;
                Ok(config)
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.timeout_secs == 0 {
        bail!("embedding.timeout_secs must be > 0");
    }
    match config.embedding.provider.as_str() {
        "local" | "openai" | "ollama" | "hash" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, ollama, or hash.",
            other
        ),
    }

    // Validate llm
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.api_key_env.trim().is_empty() {
        bail!("llm.api_key_env must name an environment variable");
    }
    if config.llm.timeout_secs == 0 {
        bail!("llm.timeout_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.chunking.chunk_size, 512);
        assert_eq!(cfg.chunking.chunk_overlap, 64);
        assert_eq!(cfg.embedding.dims, 384);
        assert_eq!(cfg.retrieval.top_k, 4);
        assert!((cfg.llm.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(cfg.llm.api_key_env, "GROQ_API_KEY");
        assert_eq!(cfg.paths.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse_config(
            r#"
[embedding]
provider = "hash"

[retrieval]
top_k = 3
"#,
        )
        .unwrap();
        assert_eq!(cfg.embedding.provider, "hash");
        assert_eq!(cfg.embedding.model, "bge-small-en-v1.5");
        assert_eq!(cfg.retrieval.top_k, 3);
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = parse_config("[chunking]\nchunk_size = 64\nchunk_overlap = 64\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = parse_config("[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn zero_top_k_rejected() {
        assert!(parse_config("[retrieval]\ntop_k = 0\n").is_err());
    }

    #[test]
    fn zero_timeouts_rejected() {
        let err = parse_config("[embedding]\ntimeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("embedding.timeout_secs"));
        let err = parse_config("[llm]\ntimeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("llm.timeout_secs"));
    }

    #[test]
    fn temperature_out_of_range_rejected() {
        assert!(parse_config("[llm]\ntemperature = 3.5\n").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = resolve_config(Some(Path::new("/nonexistent/docqa.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
