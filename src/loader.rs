//! Data directory scanning and document file management.
//!
//! [`load_documents`] enumerates the accepted files (`*.pdf`, `*.txt`) under
//! the data directory and turns them into [`SourceDocument`] records tagged
//! with their bare filename. The add/remove/list helpers back the CLI and
//! HTTP document endpoints.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::PathsConfig;
use crate::error::{RagError, Result};
use crate::extract::{self, FileKind, ACCEPTED_EXTENSIONS};
use crate::models::{DocumentInfo, SourceDocument, UNKNOWN_SOURCE};

/// Reduce a loader-supplied path to a bare filename.
///
/// Both `/` and `\` count as separators so Windows-style names are handled on
/// every platform. Returns [`UNKNOWN_SOURCE`] when nothing is left.
pub fn source_name(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        UNKNOWN_SOURCE.to_string()
    } else {
        name.to_string()
    }
}

/// Read every accepted file under `paths.data_dir`.
///
/// Files are visited in sorted order. A PDF contributes one record per page.
///
/// # Errors
///
/// - [`RagError::NoDocuments`] when the directory is missing or holds no
///   accepted file.
/// - [`RagError::Ingest`] when a file cannot be read or extracted.
pub fn load_documents(paths: &PathsConfig) -> Result<Vec<SourceDocument>> {
    let files = accepted_files(&paths.data_dir, paths.recursive)?;
    if files.is_empty() {
        return Err(RagError::NoDocuments(paths.data_dir.clone()));
    }

    let mut documents = Vec::new();
    for (path, kind) in files {
        let bytes = std::fs::read(&path).map_err(|e| {
            RagError::Ingest(format!("failed to read {}: {}", path.display(), e))
        })?;
        let pages = extract::extract_pages(&bytes, kind)
            .map_err(|e| RagError::Ingest(format!("{}: {}", path.display(), e)))?;

        let source = source_name(&path.to_string_lossy());
        debug!(source = %source, pages = pages.len(), "loaded document");

        let paginated = kind == FileKind::Pdf;
        for (i, text) in pages.into_iter().enumerate() {
            documents.push(SourceDocument {
                source: source.clone(),
                page: paginated.then(|| i as u32 + 1),
                text,
            });
        }
    }

    Ok(documents)
}

/// List the accepted files directly or recursively under `data_dir`.
pub fn list_documents(data_dir: &Path, recursive: bool) -> Result<Vec<DocumentInfo>> {
    if !data_dir.is_dir() {
        return Ok(Vec::new());
    }
    let files = accepted_files(data_dir, recursive)?;
    let mut docs = Vec::with_capacity(files.len());
    for (path, _) in files {
        let size_bytes = std::fs::metadata(&path)?.len();
        let name = path
            .strip_prefix(data_dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        docs.push(DocumentInfo { name, size_bytes });
    }
    Ok(docs)
}

/// Store a new document in `data_dir`.
///
/// The name must be a bare filename with an accepted extension and must not
/// already exist; documents are immutable while present.
pub fn add_document(data_dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    validate_document_name(name)?;
    std::fs::create_dir_all(data_dir)?;

    let path = data_dir.join(name);
    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(RagError::InvalidDocument(format!(
                "'{}' already exists; remove it first",
                name
            )))
        }
        Err(e) => return Err(e.into()),
    };
    std::io::Write::write_all(&mut file, bytes)?;
    Ok(path)
}

/// Delete a document from `data_dir`.
///
/// `name` is a name as reported by [`list_documents`], so documents found in
/// subdirectories are addressed by their relative path (`team/plan.txt`).
pub fn remove_document(data_dir: &Path, name: &str) -> Result<()> {
    validate_listed_name(name)?;
    let path = data_dir.join(name);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(RagError::DocumentNotFound(name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Check that `name` is a bare filename with an accepted extension.
///
/// Hidden names are rejected: the scanner skips them, so they would never be
/// listed or ingested.
pub fn validate_document_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(RagError::InvalidDocument("name must not be empty".into()));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(RagError::InvalidDocument(format!(
            "'{}' must be a plain filename",
            name
        )));
    }
    if name.starts_with('.') {
        return Err(RagError::InvalidDocument(format!(
            "'{}' is a hidden file name",
            name
        )));
    }
    let ext = Path::new(name).extension().and_then(|e| e.to_str());
    if ext.and_then(FileKind::from_extension).is_none() {
        return Err(RagError::InvalidDocument(format!(
            "'{}' has an unsupported extension; accepted: {}",
            name,
            ACCEPTED_EXTENSIONS.join(", ")
        )));
    }
    Ok(())
}

/// Check a `/`-separated path relative to the data directory, as emitted by
/// [`list_documents`]. Every directory component must be a plain, visible
/// name and the last component must pass [`validate_document_name`].
fn validate_listed_name(name: &str) -> Result<()> {
    if let Some((dirs, file)) = name.rsplit_once('/') {
        let escapes = name.contains('\\')
            || dirs
                .split('/')
                .any(|part| part.trim().is_empty() || part.starts_with('.'));
        if escapes {
            return Err(RagError::InvalidDocument(format!(
                "'{}' is not a document inside the data directory",
                name
            )));
        }
        return validate_document_name(file);
    }
    validate_document_name(name)
}

fn accepted_files(data_dir: &Path, recursive: bool) -> Result<Vec<(PathBuf, FileKind)>> {
    if !data_dir.is_dir() {
        return Err(RagError::NoDocuments(data_dir.to_path_buf()));
    }

    let include_set = build_globset(ACCEPTED_EXTENSIONS)?;
    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut files = Vec::new();
    // Hidden files and directories are skipped.
    let walker = WalkDir::new(data_dir)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker {
        let entry = entry.map_err(|e| RagError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy();
        if !include_set.is_match(file_name.as_ref()) {
            continue;
        }

        let kind = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(FileKind::from_extension);
        if let Some(kind) = kind {
            files.push((path.to_path_buf(), kind));
        }
    }

    Ok(files)
}

fn build_globset(extensions: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for ext in extensions {
        let glob = GlobBuilder::new(&format!("*.{}", ext))
            .case_insensitive(true)
            .build()
            .map_err(|e| RagError::Configuration(e.to_string()))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RagError::Configuration(e.to_string()))
}
