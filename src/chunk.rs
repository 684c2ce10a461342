//! Paragraph-boundary text chunker.
//!
//! Splits revision content into [`KnowledgeChunk`]s on blank-line boundaries
//! (runs of two or more newlines). Each paragraph becomes exactly one chunk;
//! there is no size-based merging or splitting.
//!
//! Each chunk receives a fresh UUID plus a SHA-256 hash of its text, which the
//! knowledge store uses to recognise that a rebuild would reproduce the
//! existing chunk set.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::models::{new_id, now_millis, KnowledgeChunk};

static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").expect("valid regex"));

/// Split content into trimmed, non-empty paragraphs, preserving order.
pub fn split_paragraphs(content: &str) -> Vec<&str> {
    PARAGRAPH_BREAK
        .split(content.trim())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Chunk a revision's content. Returns chunks with contiguous indices
/// starting at 0, or no chunks for empty/whitespace-only content.
pub fn chunk_text(revision_id: &str, content: &str) -> Vec<KnowledgeChunk> {
    let created_at = now_millis();
    split_paragraphs(content)
        .into_iter()
        .enumerate()
        .map(|(index, text)| make_chunk(revision_id, index as i64, text, created_at))
        .collect()
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(revision_id: &str, index: i64, text: &str, created_at: i64) -> KnowledgeChunk {
    KnowledgeChunk {
        id: new_id(),
        revision_id: revision_id.to_string(),
        chunk_index: index,
        content: text.to_string(),
        hash: hash_text(text),
        created_at,
    }
}
