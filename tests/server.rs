//! HTTP API tests driven through the router with `tower::ServiceExt::oneshot`.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use doc_qa::config::{Config, PathsConfig};
use doc_qa::embedding::HashEmbedder;
use doc_qa::error::{RagError, Result};
use doc_qa::knowledge_base::KnowledgeBase;
use doc_qa::llm::LanguageModel;
use doc_qa::server::router;

struct Canned {
    fail: bool,
}

#[async_trait]
impl LanguageModel for Canned {
    fn name(&self) -> &str {
        "canned"
    }
    async fn complete(&self, _prompt: &str) -> Result<String> {
        if self.fail {
            Err(RagError::Completion("connection refused".into()))
        } else {
            Ok("Blue.".to_string())
        }
    }
}

fn knowledge_base(root: &Path, fail: bool) -> Arc<KnowledgeBase> {
    let mut cfg = Config {
        paths: PathsConfig {
            data_dir: root.join("data"),
            storage_dir: root.join("storage"),
            recursive: true,
        },
        ..Config::default()
    };
    cfg.embedding.provider = "hash".to_string();
    let kb = KnowledgeBase::open(
        cfg,
        Arc::new(HashEmbedder::new(384)),
        Arc::new(Canned { fail }),
    )
    .unwrap();
    Arc::new(kb)
}

async fn send(kb: &Arc<KnowledgeBase>, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router(kb.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1_000_000)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn put(uri: &str, body: &'static [u8]) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .body(Body::from(body))
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(tmp.path(), false);

    let (status, json) = send(&kb, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn upload_rebuild_and_ask() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(tmp.path(), false);

    let (status, json) = send(&kb, put("/documents/a.txt", b"The sky is blue.")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["name"], "a.txt");
    send(&kb, put("/documents/b.txt", b"Grass is green.")).await;

    let (status, json) = send(&kb, get("/documents")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["documents"].as_array().unwrap().len(), 2);

    let (status, json) = send(&kb, post_empty("/rebuild")).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["documents"], 2);

    let (status, json) = send(
        &kb,
        post_json("/ask", serde_json::json!({ "question": "What color is the sky?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "answered");
    assert_eq!(json["answer"], "Blue.");
    let sources: Vec<&str> = json["sources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap())
        .collect();
    assert!(sources.contains(&"a.txt"));

    let (_, json) = send(&kb, get("/status")).await;
    assert_eq!(json["index"]["ready"], true);
    assert_eq!(json["documents_on_disk"], 2);
}

#[tokio::test]
async fn ask_without_index_is_not_ready() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(tmp.path(), false);

    let (status, json) = send(
        &kb,
        post_json("/ask", serde_json::json!({ "question": "Anything?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "not_ready");
    assert!(json["message"].as_str().unwrap().contains("not ready"));
}

#[tokio::test]
async fn errors_use_the_error_envelope() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(tmp.path(), false);

    let (status, json) = send(&kb, post_empty("/rebuild")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "no_documents");

    let (status, json) = send(&kb, put("/documents/notes.docx", b"x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "invalid_document");

    let (status, json) = send(&kb, delete("/documents/missing.txt")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "document_not_found");

    let (status, json) = send(
        &kb,
        post_json("/ask", serde_json::json!({ "question": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "bad_request");
}

#[tokio::test]
async fn completion_failure_is_bad_gateway() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(tmp.path(), true);
    send(&kb, put("/documents/a.txt", b"The sky is blue.")).await;
    send(&kb, post_empty("/rebuild")).await;

    let (status, json) = send(
        &kb,
        post_json("/ask", serde_json::json!({ "question": "What color is the sky?" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"]["code"], "completion");
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("connection refused"));

    let (_, json) = send(&kb, get("/status")).await;
    assert_eq!(json["index"]["ready"], true);
}

#[tokio::test]
async fn deleting_last_document_clears_index() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(tmp.path(), false);
    send(&kb, put("/documents/a.txt", b"The sky is blue.")).await;
    send(&kb, post_empty("/rebuild")).await;

    let (status, _) = send(&kb, delete("/documents/a.txt")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, json) = send(
        &kb,
        post_json("/ask", serde_json::json!({ "question": "What color is the sky?" })),
    )
    .await;
    assert_eq!(json["status"], "not_ready");
}

#[tokio::test]
async fn nested_document_is_deleted_by_listed_name() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(tmp.path(), false);
    std::fs::create_dir_all(tmp.path().join("data/sub")).unwrap();
    std::fs::write(tmp.path().join("data/sub/deep.txt"), "Deep water is dark.").unwrap();
    send(&kb, put("/documents/top.txt", b"The sky is blue.")).await;

    let (_, json) = send(&kb, get("/documents")).await;
    let names: Vec<&str> = json["documents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["sub/deep.txt", "top.txt"]);

    let (status, json) = send(&kb, delete("/documents/sub/deep.txt")).await;
    assert_eq!(status, StatusCode::NO_CONTENT, "{json}");
    assert!(!tmp.path().join("data/sub/deep.txt").exists());

    let (status, json) = send(&kb, delete("/documents/.git/top.txt")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "invalid_document");
}

#[tokio::test]
async fn hidden_upload_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let kb = knowledge_base(tmp.path(), false);

    let (status, json) = send(&kb, put("/documents/.notes.txt", b"hidden")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "invalid_document");

    let (status, json) = send(&kb, put("/documents/sub/a.txt", b"nested")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "invalid_document");
}
