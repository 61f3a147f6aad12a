//! Fixed-size sliding-window text chunker.
//!
//! Splits a [`SourceDocument`] into [`Chunk`]s of `chunk_size` words, with
//! `chunk_overlap` words repeated between neighbours so text spanning a
//! boundary stays intact in at least one chunk. Windows advance by
//! `chunk_size - chunk_overlap` words. Chunk text is sliced from the
//! original, so whitespace and line breaks inside a window are preserved.
//!
//! Every chunk carries its document's source name, falling back to
//! [`UNKNOWN_SOURCE`] when the loader supplied none, plus a SHA-256 hash of
//! its text.

use sha2::{Digest, Sha256};

use crate::models::{Chunk, SourceDocument, UNKNOWN_SOURCE};

/// Split one document into overlapping chunks.
///
/// Returns an empty vector for whitespace-only text. `chunk_overlap` must be
/// smaller than `chunk_size` (enforced by config validation); larger values
/// are clamped so the window always advances.
pub fn chunk_document(doc: &SourceDocument, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let stride = chunk_size - chunk_overlap.min(chunk_size - 1);

    let source = if doc.source.trim().is_empty() {
        UNKNOWN_SOURCE.to_string()
    } else {
        doc.source.clone()
    };

    let spans = word_spans(&doc.text);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < spans.len() {
        let end = (start + chunk_size).min(spans.len());
        let text = &doc.text[spans[start].0..spans[end - 1].1];
        chunks.push(make_chunk(&source, doc.page, chunks.len(), text));
        if end == spans.len() {
            break;
        }
        start += stride;
    }

    chunks
}

/// Chunk a batch of documents, preserving document order.
pub fn chunk_documents(docs: &[SourceDocument], chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    docs.iter()
        .flat_map(|d| chunk_document(d, chunk_size, chunk_overlap))
        .collect()
}

/// Byte ranges of whitespace-delimited words.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

fn make_chunk(source: &str, page: Option<u32>, index: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}#{}:{}", source, page.unwrap_or(0), index),
        source: source.to_string(),
        page,
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(source: &str, text: &str) -> SourceDocument {
        SourceDocument {
            source: source.to_string(),
            page: None,
            text: text.to_string(),
        }
    }

    fn numbered_words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_document(&doc("a.txt", "Hello, world!"), 512, 64);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].source, "a.txt");
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(chunk_document(&doc("a.txt", ""), 512, 64).is_empty());
        assert!(chunk_document(&doc("a.txt", "  \n\t "), 512, 64).is_empty());
    }

    #[test]
    fn test_exact_window_is_one_chunk() {
        let chunks = chunk_document(&doc("a.txt", &numbered_words(10)), 10, 2);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_adjacent_chunks_share_overlap() {
        let text = numbered_words(1300);
        let chunks = chunk_document(&doc("long.txt", &text), 512, 64);
        assert_eq!(chunks.len(), 3);
        for pair in chunks.windows(2) {
            let prev: Vec<&str> = pair[0].text.split_whitespace().collect();
            let next: Vec<&str> = pair[1].text.split_whitespace().collect();
            assert_eq!(&prev[prev.len() - 64..], &next[..64]);
        }
        // Every word is covered and the last chunk ends the document.
        assert!(chunks[0].text.starts_with("w0 "));
        assert!(chunks.last().unwrap().text.ends_with("w1299"));
    }

    #[test]
    fn test_whitespace_inside_window_preserved() {
        let chunks = chunk_document(&doc("a.txt", "  one\n\ntwo   three  "), 512, 64);
        assert_eq!(chunks[0].text, "one\n\ntwo   three");
    }

    #[test]
    fn test_missing_source_backfilled() {
        let chunks = chunk_document(&doc("  ", "orphan text"), 512, 64);
        assert_eq!(chunks[0].source, UNKNOWN_SOURCE);
    }

    #[test]
    fn test_ids_and_indices() {
        let mut d = doc("r.pdf", &numbered_words(30));
        d.page = Some(2);
        let chunks = chunk_document(&d, 10, 5);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.id, format!("r.pdf#2:{}", i));
            assert_eq!(c.page, Some(2));
        }
    }

    #[test]
    fn test_deterministic() {
        let text = numbered_words(200);
        let c1 = chunk_document(&doc("a.txt", &text), 50, 10);
        let c2 = chunk_document(&doc("a.txt", &text), 50, 10);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_overlap_clamped_when_too_large() {
        let chunks = chunk_document(&doc("a.txt", &numbered_words(5)), 2, 9);
        // stride falls back to one word
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn test_multibyte_text() {
        let chunks = chunk_document(&doc("ü.txt", "héllo wörld ñandú"), 2, 1);
        assert_eq!(chunks[0].text, "héllo wörld");
        assert_eq!(chunks[1].text, "wörld ñandú");
    }
}
