//! # Doc QA
//!
//! Question answering over a folder of PDF and text documents.
//!
//! Documents are split into overlapping word windows, embedded, and stored
//! in a flat L2 vector index. A question is embedded with the same model,
//! the nearest chunks are placed into a prompt, and a hosted chat model
//! writes an answer that cites the source documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │ data/    │──▶│  Ingest     │──▶│  storage/     │
//! │ PDF/TXT  │   │ Chunk+Embed │   │ manifest+vecs │
//! └──────────┘   └─────────────┘   └──────┬───────┘
//!                                         │
//!                                   ┌─────▼──────┐   ┌─────────┐
//!                                   │   Query    │──▶│   LLM   │
//!                                   │top-k+prompt│   │ (chat)  │
//!                                   └─────┬──────┘   └─────────┘
//!                      ┌──────────────────┤
//!                      ▼                  ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │   CLI    │       │   HTTP   │
//!                 │ (docqa)  │       │  (JSON)  │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa init                        # create data/ and storage/
//! docqa docs add ./handbook.pdf     # copy a document in
//! docqa rebuild                     # build the index
//! docqa ask "What is the leave policy?"
//! docqa serve                       # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF and plain-text extraction |
//! | [`loader`] | Data directory scan and document management |
//! | [`chunk`] | Overlapping word-window chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Flat L2 index and its on-disk format |
//! | [`storage`] | Atomic storage directory replacement |
//! | [`ingest`] | Full rebuild pipeline |
//! | [`llm`] | Language model abstraction and chat client |
//! | [`prompt`] | Prompt assembly |
//! | [`query`] | Question answering pipeline |
//! | [`knowledge_base`] | Shared application state |
//! | [`server`] | HTTP JSON API |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod knowledge_base;
pub mod llm;
pub mod loader;
pub mod models;
pub mod prompt;
pub mod query;
pub mod server;
pub mod storage;
