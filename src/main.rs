//! # Doc QA CLI (`docqa`)
//!
//! Manage a folder of documents, build the index, and ask questions about
//! them from the terminal or over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the data and storage directories |
//! | `docqa status` | Show readiness, documents and index details |
//! | `docqa docs list` | List documents in the data directory |
//! | `docqa docs add <file>` | Copy a PDF or TXT file into the data directory |
//! | `docqa docs remove <name>` | Delete a document by the name `docs list` shows |
//! | `docqa rebuild` | Rebuild the index from every document |
//! | `docqa ask "<question>"` | Answer one question |
//! | `docqa chat` | Interactive question loop |
//! | `docqa serve` | Start the HTTP JSON API |
//!
//! `ask`, `chat` and `serve` need the chat model credential (by default
//! `GROQ_API_KEY`) in the environment.

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use doc_qa::config::{self, Config};
use doc_qa::embedding::create_embedder;
use doc_qa::index::VectorIndex;
use doc_qa::ingest;
use doc_qa::knowledge_base::{remove_document_files, KnowledgeBase};
use doc_qa::llm::{ChatCompletionsModel, LanguageModel};
use doc_qa::loader;
use doc_qa::models::render_sources;
use doc_qa::query::{Reply, StreamingReply};
use doc_qa::server;

/// Doc QA CLI: ask questions about your PDF and text documents.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Doc QA: ask questions about a folder of PDF and text documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docqa.toml` when it exists, built-in defaults
    /// otherwise.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data and storage directories.
    ///
    /// Idempotent; existing documents and indexes are left alone.
    Init,

    /// Show whether the knowledge base is ready and what it contains.
    Status,

    /// Manage documents in the data directory.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Rebuild the index from every document in the data directory.
    ///
    /// The previous index stays in place until the new one is complete.
    Rebuild,

    /// Answer a single question.
    Ask {
        /// The question to answer.
        question: String,

        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,
    },

    /// Ask questions interactively. Type `exit`, `quit` or `q` to leave.
    Chat,

    /// Start the HTTP JSON API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum DocsAction {
    /// List documents.
    List,
    /// Copy a PDF or TXT file into the data directory.
    ///
    /// Run `docqa rebuild` afterwards to make it searchable.
    Add {
        /// Path of the file to add.
        path: PathBuf,
    },
    /// Delete a document. Removing the last one also clears the index.
    Remove {
        /// Document filename as shown by `docqa docs list`.
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let cfg = config::resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => run_init(&cfg)?,
        Commands::Status => run_status(&cfg)?,
        Commands::Docs { action } => match action {
            DocsAction::List => run_docs_list(&cfg)?,
            DocsAction::Add { path } => run_docs_add(&cfg, &path)?,
            DocsAction::Remove { name } => {
                if remove_document_files(&cfg, &name)? {
                    println!("Removed {}. No documents remain; the index was cleared.", name);
                } else {
                    println!("Removed {}. Run `docqa rebuild` to update the index.", name);
                }
            }
        },
        Commands::Rebuild => run_rebuild(&cfg).await?,
        Commands::Ask { question, stream } => {
            let kb = open_knowledge_base(cfg)?;
            if stream {
                ask_streaming(&kb, &question).await?;
            } else {
                ask(&kb, &question).await?;
            }
        }
        Commands::Chat => {
            let kb = open_knowledge_base(cfg)?;
            run_chat(&kb).await?;
        }
        Commands::Serve => {
            let kb = open_knowledge_base(cfg)?;
            server::run_server(Arc::new(kb)).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter);

    tracing_subscriber::registry().with(stderr_layer).init();
}

/// The chat model is built first so a missing credential fails before any
/// model download or index load.
fn open_knowledge_base(cfg: Config) -> anyhow::Result<KnowledgeBase> {
    let llm: Arc<dyn LanguageModel> = Arc::new(ChatCompletionsModel::from_env(&cfg.llm)?);
    let embedder = create_embedder(&cfg.embedding)?;
    Ok(KnowledgeBase::open(cfg, embedder, llm)?)
}

fn run_init(cfg: &Config) -> anyhow::Result<()> {
    for dir in [&cfg.paths.data_dir, &cfg.paths.storage_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    println!(
        "Initialized. Put PDF or TXT files in {} and run `docqa rebuild`.",
        cfg.paths.data_dir.display()
    );
    Ok(())
}

fn run_status(cfg: &Config) -> anyhow::Result<()> {
    let documents = loader::list_documents(&cfg.paths.data_dir, cfg.paths.recursive)?;
    println!("Data directory:    {}", cfg.paths.data_dir.display());
    println!("Documents:         {}", documents.len());
    println!("Storage directory: {}", cfg.paths.storage_dir.display());

    match VectorIndex::load(&cfg.paths.storage_dir) {
        Ok(index) => {
            let manifest = index.manifest();
            println!("Status:            ready");
            println!(
                "Embedding model:   {} ({} dims)",
                manifest.embedding_model, manifest.dims
            );
            println!("Indexed documents: {}", manifest.document_count);
            println!("Chunks:            {}", manifest.chunk_count);
            println!("Built at:          {}", manifest.built_at.to_rfc3339());
        }
        Err(e) => {
            println!("Status:            not ready");
            println!("Reason:            {}", e);
        }
    }
    Ok(())
}

fn run_docs_list(cfg: &Config) -> anyhow::Result<()> {
    let documents = loader::list_documents(&cfg.paths.data_dir, cfg.paths.recursive)?;
    if documents.is_empty() {
        println!("No documents in {}.", cfg.paths.data_dir.display());
        return Ok(());
    }
    for doc in documents {
        println!("{:>10}  {}", doc.size_bytes, doc.name);
    }
    Ok(())
}

fn run_docs_add(cfg: &Config, path: &Path) -> anyhow::Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("{} is not a file path", path.display()))?;
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    loader::add_document(&cfg.paths.data_dir, &name, &bytes)?;
    println!(
        "Added {} ({} bytes). Run `docqa rebuild` to update the index.",
        name,
        bytes.len()
    );
    Ok(())
}

async fn run_rebuild(cfg: &Config) -> anyhow::Result<()> {
    let embedder = create_embedder(&cfg.embedding)?;
    let summary = ingest::ingest(cfg, embedder.as_ref()).await?;
    println!(
        "Rebuilt index: {} documents, {} chunks in {} ms.",
        summary.documents, summary.chunks, summary.elapsed_ms
    );
    println!("{}", render_sources(&summary.sources));
    Ok(())
}

async fn ask(kb: &KnowledgeBase, question: &str) -> anyhow::Result<()> {
    match kb.ask(question).await? {
        Reply::Answer(answer) => println!("{}", answer.render()),
        Reply::NotReady { message } => println!("{}", message),
    }
    Ok(())
}

async fn ask_streaming(kb: &KnowledgeBase, question: &str) -> anyhow::Result<()> {
    match kb.ask_streaming(question).await? {
        StreamingReply::Answer(mut answer) => {
            let mut stdout = std::io::stdout();
            while let Some(fragment) = answer.fragments.next().await {
                write!(stdout, "{}", fragment?)?;
                stdout.flush()?;
            }
            if !answer.sources.is_empty() {
                println!("\n\nSource documents:\n{}", render_sources(&answer.sources));
            } else {
                println!();
            }
        }
        StreamingReply::NotReady { message } => println!("{}", message),
    }
    Ok(())
}

async fn run_chat(kb: &KnowledgeBase) -> anyhow::Result<()> {
    if !kb.is_ready() {
        println!("Note: the knowledge base is not ready yet. Run `docqa rebuild` first.");
    }
    println!("Ask a question about your documents (exit, quit or q to leave).");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if is_quit_command(question) {
            break;
        }

        // Per-question failures are reported and the loop continues.
        if let Err(e) = ask(kb, question).await {
            eprintln!("Error: {:#}", e);
        }
        println!();
    }
    Ok(())
}

/// `exit`, `quit` or `q` in any letter case ends the chat loop.
fn is_quit_command(input: &str) -> bool {
    ["exit", "quit", "q"]
        .iter()
        .any(|word| input.eq_ignore_ascii_case(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_words_ignore_case() {
        for input in ["exit", "QUIT", "Quit", "q", "Q", "eXiT"] {
            assert!(is_quit_command(input), "{input:?} should quit");
        }
        for input in ["quitting", "what is q?", "exit now", ""] {
            assert!(!is_quit_command(input), "{input:?} should not quit");
        }
    }
}
