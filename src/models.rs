//! Core data models used throughout the triage pipeline.
//!
//! These types mirror the rows stored in SQLite: the versioned knowledge
//! entities, the vector index bookkeeping, and the analytics logs. All
//! timestamps are Unix epoch milliseconds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TriageError;

/// A named, versioned collection of knowledge items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub published_version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A keyed entry inside a knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub kb_id: String,
    pub key: String,
    pub title: String,
    pub tags: String,
    pub is_active: bool,
    /// Latest published revision; never points at a draft.
    pub current_revision_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionStatus {
    Draft,
    Published,
}

impl RevisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionStatus::Draft => "draft",
            RevisionStatus::Published => "published",
        }
    }
}

impl fmt::Display for RevisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevisionStatus {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(RevisionStatus::Draft),
            "published" => Ok(RevisionStatus::Published),
            other => Err(TriageError::DataIntegrity(format!(
                "unknown revision status: {}",
                other
            ))),
        }
    }
}

/// An immutable content snapshot of an item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeItemRevision {
    pub id: String,
    pub item_id: String,
    pub revision: i64,
    pub content: String,
    pub source: String,
    pub status: RevisionStatus,
    /// Base version of the most recent publish while this revision was current.
    pub published_version: Option<i64>,
    pub created_at: i64,
}

/// A paragraph-sized slice of a revision's content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeChunk {
    pub id: String,
    pub revision_id: String,
    pub chunk_index: i64,
    pub content: String,
    /// SHA-256 of `content`, hex encoded.
    pub hash: String,
    pub created_at: i64,
}

/// Metadata row for one built vector index of a (kb, version) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorIndexMeta {
    pub id: String,
    pub kb_id: String,
    pub kb_version: i64,
    pub provider: String,
    pub model: String,
    /// `0` marks an index built from an empty corpus; it has no artifact.
    pub dim: i64,
    pub index_path: String,
    pub created_at: i64,
}

/// Maps a slot inside one built index to the chunk it embeds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub index_id: String,
    pub kb_id: String,
    pub kb_version: i64,
    pub vector_pos: i64,
    pub chunk_id: String,
    pub revision_id: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorQueryLog {
    pub id: String,
    pub kb_id: String,
    pub kb_version: i64,
    pub query: String,
    pub top_k: i64,
    pub provider: String,
    pub model: String,
    pub latency_ms: i64,
    pub meta_json: String,
    pub created_at: i64,
}

/// Analytics record emitted once per reply synthesis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyEvent {
    pub id: String,
    pub kb_id: String,
    pub kb_version: i64,
    pub comment_id: String,
    pub note_id: String,
    pub intent: String,
    pub lead_score: i64,
    pub lead_level: String,
    pub latency_ms: i64,
    pub llm_used: bool,
    pub meta_json: String,
    pub created_at: i64,
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!("draft".parse::<RevisionStatus>().unwrap(), RevisionStatus::Draft);
        assert_eq!(
            "published".parse::<RevisionStatus>().unwrap(),
            RevisionStatus::Published
        );
        assert!(matches!(
            "archived".parse::<RevisionStatus>(),
            Err(TriageError::DataIntegrity(_))
        ));
    }
}
