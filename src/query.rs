//! Query pipeline: answer one question against the persisted index.
//!
//! A [`QueryPipeline`] is opened once against the storage directory and is
//! then in exactly one of two states for its whole lifetime:
//!
//! - **ready**: the index loaded and matches the configured embedder;
//! - **not ready**: no usable index (never built, cleared, or corrupt). The
//!   load failure is kept and reported by [`ask`](QueryPipeline::ask) as a
//!   [`Reply::NotReady`] rather than an error.
//!
//! Becoming ready after a rebuild means opening a new pipeline; the host
//! ([`KnowledgeBase`](crate::knowledge_base::KnowledgeBase)) swaps it in.
//!
//! `ask` embeds the question, retrieves the `top_k` nearest chunks, builds
//! the prompt and sends it to the language model. Both network-bound steps
//! run under a timeout; failures surface as [`RagError::Retrieval`] or
//! [`RagError::Completion`] and leave the pipeline usable.

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::{check_dims, embed_query, Embedder};
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::llm::{LanguageModel, TextStream};
use crate::models::{Answer, RetrievedChunk};
use crate::prompt::build_prompt;

/// Outcome of a question.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Answer(Answer),
    /// The knowledge base has no usable index.
    NotReady { message: String },
}

/// A streamed answer: sources are known up front, text arrives in fragments.
pub struct StreamingAnswer {
    pub sources: Vec<String>,
    pub fragments: TextStream,
}

pub enum StreamingReply {
    Answer(StreamingAnswer),
    NotReady { message: String },
}

/// Snapshot of the pipeline state for status output.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub storage_dir: PathBuf,
    pub embedding_model: String,
    pub dims: usize,
    pub chunks: usize,
    pub documents: usize,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built_at: Option<String>,
}

enum State {
    Ready(VectorIndex),
    NotReady(String),
}

pub struct QueryPipeline {
    state: State,
    storage_dir: PathBuf,
    top_k: usize,
    embed_timeout: Duration,
    completion_timeout: Duration,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
}

impl QueryPipeline {
    /// Load the index from `config.paths.storage_dir`.
    ///
    /// A missing, empty or corrupt index yields a not-ready pipeline.
    ///
    /// # Errors
    ///
    /// [`RagError::Configuration`] when the index was built with a different
    /// embedding model or dimension than `embedder`.
    pub fn open(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        let state = match VectorIndex::load(&config.paths.storage_dir) {
            Ok(index) => {
                let manifest = index.manifest();
                if manifest.embedding_model != embedder.model_name()
                    || manifest.dims != embedder.dims()
                {
                    return Err(RagError::Configuration(format!(
                        "index in {} was built with '{}' ({} dims) but the configured embedder is '{}' ({} dims); run `docqa rebuild`",
                        config.paths.storage_dir.display(),
                        manifest.embedding_model,
                        manifest.dims,
                        embedder.model_name(),
                        embedder.dims()
                    )));
                }
                info!(
                    chunks = index.len(),
                    documents = manifest.document_count,
                    model = %manifest.embedding_model,
                    "index loaded"
                );
                State::Ready(index)
            }
            Err(RagError::IndexLoad { reason, .. }) => {
                warn!(storage = %config.paths.storage_dir.display(), %reason, "knowledge base not ready");
                State::NotReady(reason)
            }
            Err(other) => return Err(other),
        };

        Ok(Self::with_state(config, state, embedder, llm))
    }

    /// A pipeline with no index, e.g. after every document was removed.
    pub fn not_ready(
        config: &Config,
        reason: impl Into<String>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self::with_state(config, State::NotReady(reason.into()), embedder, llm)
    }

    fn with_state(
        config: &Config,
        state: State,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            state,
            storage_dir: config.paths.storage_dir.clone(),
            top_k: config.retrieval.top_k,
            embed_timeout: Duration::from_secs(config.embedding.timeout_secs),
            completion_timeout: Duration::from_secs(config.llm.timeout_secs),
            embedder,
            llm,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    pub fn status(&self) -> PipelineStatus {
        match &self.state {
            State::Ready(index) => {
                let manifest = index.manifest();
                PipelineStatus {
                    ready: true,
                    reason: None,
                    storage_dir: self.storage_dir.clone(),
                    embedding_model: manifest.embedding_model.clone(),
                    dims: manifest.dims,
                    chunks: manifest.chunk_count,
                    documents: manifest.document_count,
                    sources: index.sources(),
                    built_at: Some(manifest.built_at.to_rfc3339()),
                }
            }
            State::NotReady(reason) => PipelineStatus {
                ready: false,
                reason: Some(reason.clone()),
                storage_dir: self.storage_dir.clone(),
                embedding_model: self.embedder.model_name().to_string(),
                dims: self.embedder.dims(),
                chunks: 0,
                documents: 0,
                sources: Vec::new(),
                built_at: None,
            },
        }
    }

    /// User-facing explanation when not ready.
    pub fn not_ready_message(&self) -> Option<String> {
        match &self.state {
            State::Ready(_) => None,
            State::NotReady(reason) => Some(not_ready_message(reason)),
        }
    }

    /// Embed `question` and return the nearest chunks in rank order.
    ///
    /// # Errors
    ///
    /// - [`RagError::IndexLoad`] when the pipeline is not ready.
    /// - [`RagError::Retrieval`] for an empty question, an embedding failure
    ///   or a timeout.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>> {
        let index = match &self.state {
            State::Ready(index) => index,
            State::NotReady(reason) => {
                return Err(RagError::index_load(&self.storage_dir, reason.clone()))
            }
        };

        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::Retrieval("question is empty".into()));
        }

        let vector = tokio::time::timeout(
            self.embed_timeout,
            embed_query(self.embedder.as_ref(), question),
        )
        .await
        .map_err(|_| {
            RagError::Retrieval(format!(
                "embedding the question timed out after {}s",
                self.embed_timeout.as_secs()
            ))
        })?
        .map_err(|e| RagError::Retrieval(format!("embedding the question failed: {}", e)))?;
        check_dims(self.embedder.as_ref(), std::slice::from_ref(&vector))?;

        let hits = index.search(&vector, self.top_k);
        debug!(
            hits = hits.len(),
            nearest = hits.first().map(|h| h.chunk.source.as_str()).unwrap_or(""),
            "retrieved chunks"
        );
        Ok(hits)
    }

    /// Answer `question` from the index.
    ///
    /// # Errors
    ///
    /// [`RagError::Retrieval`] or [`RagError::Completion`] for per-question
    /// failures; the pipeline stays usable.
    pub async fn ask(&self, question: &str) -> Result<Reply> {
        if let Some(message) = self.not_ready_message() {
            return Ok(Reply::NotReady { message });
        }

        let hits = self.retrieve(question).await?;
        let prompt = build_prompt(question, &hits);

        let text = tokio::time::timeout(self.completion_timeout, self.llm.complete(&prompt))
            .await
            .map_err(|_| self.completion_timed_out())??;

        let answer = Answer {
            text,
            sources: distinct_sources(&hits),
        };
        info!(
            model = self.llm.name(),
            sources = answer.sources.len(),
            "question answered"
        );
        Ok(Reply::Answer(answer))
    }

    /// Like [`ask`](Self::ask), but the answer text arrives as a stream.
    ///
    /// Only the start of the completion is bounded by the timeout; the
    /// stream itself ends when the model finishes.
    pub async fn ask_streaming(&self, question: &str) -> Result<StreamingReply> {
        if let Some(message) = self.not_ready_message() {
            return Ok(StreamingReply::NotReady { message });
        }

        let hits = self.retrieve(question).await?;
        let prompt = build_prompt(question, &hits);

        let fragments =
            tokio::time::timeout(self.completion_timeout, self.llm.stream_complete(&prompt))
                .await
                .map_err(|_| self.completion_timed_out())??;

        Ok(StreamingReply::Answer(StreamingAnswer {
            sources: distinct_sources(&hits),
            fragments,
        }))
    }

    fn completion_timed_out(&self) -> RagError {
        RagError::Completion(format!(
            "{} did not respond within {}s",
            self.llm.name(),
            self.completion_timeout.as_secs()
        ))
    }
}

/// Distinct sources of `hits`, sorted.
pub fn distinct_sources(hits: &[RetrievedChunk]) -> Vec<String> {
    hits.iter()
        .map(|h| h.chunk.source.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn not_ready_message(reason: &str) -> String {
    format!(
        "The knowledge base is not ready ({}). Add PDF or TXT documents and rebuild the knowledge base.",
        reason
    )
}
