//! Application state shared by the CLI and the HTTP server.
//!
//! [`KnowledgeBase`] owns the configuration, the embedder, the language
//! model and the current [`QueryPipeline`]. It is the only place that
//! mutates the data directory or the storage directory, and it serializes
//! those mutations:
//!
//! - one rebuild at a time; a second caller gets
//!   [`RagError::RebuildInProgress`], and so do uploads and deletes that
//!   arrive while a rebuild runs;
//! - overlapping uploads and deletes wait for each other;
//! - questions asked while a rebuild runs get a not-ready reply;
//! - a successful rebuild swaps in a freshly opened pipeline, a failed one
//!   keeps the previous pipeline (and the previous index on disk).

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::ingest;
use crate::llm::LanguageModel;
use crate::loader;
use crate::models::{DocumentInfo, IngestSummary};
use crate::query::{PipelineStatus, QueryPipeline, Reply, StreamingReply};
use crate::storage;

const REBUILDING_MESSAGE: &str =
    "The knowledge base is being rebuilt. Try again when the rebuild has finished.";

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBaseStatus {
    pub rebuilding: bool,
    pub data_dir: String,
    pub documents_on_disk: usize,
    pub llm: String,
    pub index: PipelineStatus,
}

pub struct KnowledgeBase {
    config: Config,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
    pipeline: RwLock<Arc<QueryPipeline>>,
    write_lock: Mutex<()>,
    rebuilding: AtomicBool,
}

impl KnowledgeBase {
    /// Open the knowledge base against the configured storage directory.
    ///
    /// # Errors
    ///
    /// [`RagError::Configuration`] when the persisted index does not match
    /// the embedder.
    pub fn open(
        config: Config,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        let pipeline = QueryPipeline::open(&config, embedder.clone(), llm.clone())?;
        Ok(Self {
            config,
            embedder,
            llm,
            pipeline: RwLock::new(Arc::new(pipeline)),
            write_lock: Mutex::new(()),
            rebuilding: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        !self.is_rebuilding() && self.pipeline().is_ready()
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Result<KnowledgeBaseStatus> {
        let documents = self.list_documents()?;
        Ok(KnowledgeBaseStatus {
            rebuilding: self.is_rebuilding(),
            data_dir: self.config.paths.data_dir.display().to_string(),
            documents_on_disk: documents.len(),
            llm: self.llm.name().to_string(),
            index: self.pipeline().status(),
        })
    }

    pub fn list_documents(&self) -> Result<Vec<DocumentInfo>> {
        loader::list_documents(&self.config.paths.data_dir, self.config.paths.recursive)
    }

    /// Store a new document. It is searchable after the next rebuild.
    pub async fn add_document(&self, name: &str, bytes: &[u8]) -> Result<DocumentInfo> {
        let _guard = self.lock_for_edit().await?;
        loader::add_document(&self.config.paths.data_dir, name, bytes)?;
        info!(name, size = bytes.len(), "document added");
        Ok(DocumentInfo {
            name: name.to_string(),
            size_bytes: bytes.len() as u64,
        })
    }

    /// Delete a document from the data directory.
    ///
    /// Removing the last document also clears the index, so no stale answer
    /// can be served; the knowledge base then reports not ready.
    pub async fn remove_document(&self, name: &str) -> Result<()> {
        let _guard = self.lock_for_edit().await?;
        if remove_document_files(&self.config, name)? {
            self.swap(QueryPipeline::not_ready(
                &self.config,
                "all documents were removed",
                self.embedder.clone(),
                self.llm.clone(),
            ));
        }
        Ok(())
    }

    /// Rebuild the index from the data directory and start serving it.
    pub async fn rebuild(&self) -> Result<IngestSummary> {
        let _guard = self.write_lock.try_lock().map_err(|_| RagError::RebuildInProgress)?;
        let _flag = RebuildFlag::raise(&self.rebuilding);

        let summary = ingest::ingest(&self.config, self.embedder.as_ref()).await?;
        let pipeline = QueryPipeline::open(&self.config, self.embedder.clone(), self.llm.clone())?;
        self.swap(pipeline);
        Ok(summary)
    }

    pub async fn ask(&self, question: &str) -> Result<Reply> {
        if self.is_rebuilding() {
            return Ok(Reply::NotReady {
                message: REBUILDING_MESSAGE.to_string(),
            });
        }
        self.pipeline().ask(question).await
    }

    pub async fn ask_streaming(&self, question: &str) -> Result<StreamingReply> {
        if self.is_rebuilding() {
            return Ok(StreamingReply::NotReady {
                message: REBUILDING_MESSAGE.to_string(),
            });
        }
        self.pipeline().ask_streaming(question).await
    }

    /// Wait for the write lock unless a rebuild holds it.
    async fn lock_for_edit(&self) -> Result<MutexGuard<'_, ()>> {
        if self.is_rebuilding() {
            return Err(RagError::RebuildInProgress);
        }
        Ok(self.write_lock.lock().await)
    }

    fn pipeline(&self) -> Arc<QueryPipeline> {
        match self.pipeline.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn swap(&self, pipeline: QueryPipeline) {
        let mut slot = match self.pipeline.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Arc::new(pipeline);
    }
}

/// Delete `name` from the data directory, clearing the index when it was
/// the last document. Returns whether the index was cleared.
pub fn remove_document_files(config: &Config, name: &str) -> Result<bool> {
    loader::remove_document(&config.paths.data_dir, name)?;
    info!(name, "document removed");

    let remaining = loader::list_documents(&config.paths.data_dir, config.paths.recursive)?;
    if !remaining.is_empty() {
        return Ok(false);
    }
    storage::clear_dir(&config.paths.storage_dir)?;
    warn!(storage = %config.paths.storage_dir.display(), "last document removed, index cleared");
    Ok(true)
}

/// Sets the rebuilding flag for its lifetime.
struct RebuildFlag<'a>(&'a AtomicBool);

impl<'a> RebuildFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RebuildFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use crate::embedding::HashEmbedder;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Echo;

    #[async_trait]
    impl LanguageModel for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok("answer".to_string())
        }
    }

    fn open_kb(root: &std::path::Path) -> KnowledgeBase {
        let mut cfg = Config {
            paths: PathsConfig {
                data_dir: root.join("data"),
                storage_dir: root.join("storage"),
                recursive: true,
            },
            ..Config::default()
        };
        cfg.embedding.provider = "hash".to_string();
        KnowledgeBase::open(cfg, Arc::new(HashEmbedder::new(384)), Arc::new(Echo)).unwrap()
    }

    #[tokio::test]
    async fn rebuild_makes_ready() {
        let tmp = TempDir::new().unwrap();
        let kb = open_kb(tmp.path());
        assert!(!kb.is_ready());

        kb.add_document("a.txt", b"The sky is blue.").await.unwrap();
        assert!(!kb.is_ready());

        let summary = kb.rebuild().await.unwrap();
        assert_eq!(summary.sources, vec!["a.txt"]);
        assert!(kb.is_ready());
        assert!(matches!(kb.ask("sky?").await.unwrap(), Reply::Answer(_)));
    }

    #[tokio::test]
    async fn removing_last_document_clears_index() {
        let tmp = TempDir::new().unwrap();
        let kb = open_kb(tmp.path());
        kb.add_document("a.txt", b"The sky is blue.").await.unwrap();
        kb.rebuild().await.unwrap();

        kb.remove_document("a.txt").await.unwrap();
        assert!(!kb.is_ready());
        assert!(!storage::dir_has_contents(&kb.config().paths.storage_dir));
        assert!(matches!(
            kb.ask("sky?").await.unwrap(),
            Reply::NotReady { .. }
        ));

        let err = kb.rebuild().await.unwrap_err();
        assert!(matches!(err, RagError::NoDocuments(_)));
        assert!(!kb.is_rebuilding());
    }

    #[tokio::test]
    async fn rebuild_flag_reports_not_ready() {
        let tmp = TempDir::new().unwrap();
        let kb = open_kb(tmp.path());
        kb.add_document("a.txt", b"text").await.unwrap();
        kb.rebuild().await.unwrap();

        let flag = RebuildFlag::raise(&kb.rebuilding);
        match kb.ask("text?").await.unwrap() {
            Reply::NotReady { message } => assert!(message.contains("rebuilt")),
            other => panic!("unexpected reply: {other:?}"),
        }
        drop(flag);
        assert!(kb.is_ready());
    }

    #[tokio::test]
    async fn overlapping_uploads_wait_instead_of_failing() {
        let tmp = TempDir::new().unwrap();
        let kb = Arc::new(open_kb(tmp.path()));

        let held = kb.write_lock.lock().await;
        let upload = tokio::spawn({
            let kb = kb.clone();
            async move { kb.add_document("a.txt", b"text").await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!upload.is_finished());
        drop(held);

        let info = upload.await.unwrap().unwrap();
        assert_eq!(info.name, "a.txt");

        let (b, c) = tokio::join!(
            kb.add_document("b.txt", b"one"),
            kb.add_document("c.txt", b"two")
        );
        b.unwrap();
        c.unwrap();
        assert_eq!(kb.list_documents().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn edits_during_rebuild_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let kb = open_kb(tmp.path());
        kb.add_document("a.txt", b"text").await.unwrap();

        let flag = RebuildFlag::raise(&kb.rebuilding);
        assert!(matches!(
            kb.add_document("b.txt", b"more").await.unwrap_err(),
            RagError::RebuildInProgress
        ));
        assert!(matches!(
            kb.remove_document("a.txt").await.unwrap_err(),
            RagError::RebuildInProgress
        ));
        drop(flag);

        kb.remove_document("a.txt").await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_rebuild_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let kb = open_kb(tmp.path());
        kb.add_document("a.txt", b"text").await.unwrap();

        let _held = kb.write_lock.lock().await;
        assert!(matches!(
            kb.rebuild().await.unwrap_err(),
            RagError::RebuildInProgress
        ));
    }
}
