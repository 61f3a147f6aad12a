//! Text extraction for uploaded files.
//!
//! The data directory accepts PDF and plain-text files. Extraction returns
//! UTF-8 text; PDFs are split per page so attribution can carry a page
//! number. Failures never panic: the caller receives an [`ExtractError`].

/// Accepted file kinds, keyed by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Text,
}

impl FileKind {
    /// Case-insensitive lookup by file extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(FileKind::Pdf),
            "txt" => Some(FileKind::Text),
            _ => None,
        }
    }
}

/// Extensions accepted in the data directory.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["pdf", "txt"];

#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract the pages of `bytes` according to `kind`.
///
/// Plain text yields exactly one page.
pub fn extract_pages(bytes: &[u8], kind: FileKind) -> Result<Vec<String>, ExtractError> {
    match kind {
        FileKind::Pdf => extract_pdf_pages(bytes),
        FileKind::Text => Ok(vec![extract_plain(bytes)]),
    }
}

pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Decode plain text, replacing invalid UTF-8 and stripping a BOM.
pub fn extract_plain(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_prefix('\u{feff}').unwrap_or(&text).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_lookup_is_case_insensitive() {
        assert_eq!(FileKind::from_extension("PDF"), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_extension("txt"), Some(FileKind::Text));
        assert_eq!(FileKind::from_extension("md"), None);
    }

    #[test]
    fn plain_text_strips_bom_and_replaces_invalid_bytes() {
        let mut bytes = "\u{feff}hello ".as_bytes().to_vec();
        bytes.push(0xff);
        let text = extract_plain(&bytes);
        assert!(text.starts_with("hello "));
        assert!(text.ends_with('\u{fffd}'));
    }

    #[test]
    fn text_kind_yields_single_page() {
        let pages = extract_pages(b"one\n\ntwo", FileKind::Text).unwrap();
        assert_eq!(pages, vec!["one\n\ntwo".to_string()]);
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pages(b"not a pdf", FileKind::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }
}
