//! Hybrid retrieval over a knowledge base's built vector index.
//!
//! A search resolves the latest index row for the base (optionally pinned to
//! a published version), loads its artifact, and over-fetches
//! `top_k × candidate_multiplier` raw vector candidates. Each candidate is
//! joined to its chunk and re-scored:
//!
//! ```text
//! hybrid = α · vector_score + (1 − α) · lexical_score
//! ```
//!
//! where `vector_score` is the cosine similarity of normalized embeddings
//! and `lexical_score` is [`lexical_score`](crate::lexical::lexical_score).
//! `α` comes from `retrieval.hybrid_alpha` (default 0.75).
//!
//! The query is embedded before any pooled connection is held. Candidate
//! records are resolved in a read transaction that first re-checks that the
//! index row is still the latest one, so a concurrent
//! [`reindex`](Retriever::reindex) is observed either entirely or not at
//! all. Every search, including one against a base
//! without an index, appends a row to `vector_query_logs`.

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{Config, RetrievalConfig};
use crate::embedding::{embed_normalized, EmbeddingProvider};
use crate::error::{Result, TriageError};
use crate::knowledge::KnowledgeStore;
use crate::lexical::lexical_score;
use crate::models::{new_id, now_millis, VectorIndexMeta, VectorQueryLog, VectorRecord};
use crate::vector::{IndexBackend, SearchHit};

/// One ranked knowledge chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeHit {
    pub chunk_id: String,
    pub revision_id: String,
    pub content: String,
    /// Fused score used for ranking.
    pub score: f64,
    pub vector_score: f64,
    pub lexical_score: f64,
    pub vector_pos: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// Version of the index that answered, or the requested version (0 when
    /// none was given) if the base has no index.
    pub kb_version: i64,
    pub latency_ms: i64,
    pub hits: Vec<KnowledgeHit>,
}

/// Retrieval service: reindexing and hybrid search for knowledge bases.
#[derive(Clone)]
pub struct Retriever {
    pub(crate) store: KnowledgeStore,
    pub(crate) pool: SqlitePool,
    pub(crate) vector_root: PathBuf,
    pub(crate) backend: IndexBackend,
    retrieval: RetrievalConfig,
    pub(crate) embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(
        store: KnowledgeStore,
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let backend: IndexBackend = config.vector.backend.parse()?;
        Ok(Self {
            pool: store.pool().clone(),
            store,
            vector_root: config.vector.root.clone(),
            backend,
            retrieval: config.retrieval.clone(),
            embedder,
        })
    }

    pub fn default_top_k(&self) -> usize {
        self.retrieval.default_top_k
    }

    /// Latest-created index row for the base, optionally restricted to one
    /// version.
    pub async fn latest_index(
        &self,
        kb_id: &str,
        kb_version: Option<i64>,
    ) -> Result<Option<VectorIndexMeta>> {
        let mut conn = self.pool.acquire().await?;
        fetch_latest_index(&mut conn, kb_id, kb_version).await
    }

    pub async fn search(
        &self,
        kb_id: &str,
        query: &str,
        top_k: usize,
        kb_version: Option<i64>,
    ) -> Result<SearchResponse> {
        if top_k == 0 {
            return Err(TriageError::invalid("top_k must be >= 1"));
        }
        let started = Instant::now();
        let fetch_k = top_k.saturating_mul(self.retrieval.candidate_multiplier);

        // The query is embedded at most once, outside any transaction. A
        // concurrent reindex may replace the row or delete the artifact while
        // this search is in flight; the second pass re-resolves the row.
        let mut embedded: Option<Vec<f32>> = None;
        for attempt in 0..2 {
            let last = attempt == 1;

            let meta = match self.latest_index(kb_id, kb_version).await? {
                Some(meta) if meta.dim > 0 => meta,
                other => {
                    let version = other
                        .map(|m| m.kb_version)
                        .unwrap_or_else(|| kb_version.unwrap_or(0));
                    return self.empty_response(kb_id, version, query, top_k, started).await;
                }
            };

            if embedded.is_none() {
                embedded = Some(self.embed_query(query).await?);
            }
            let query_vec = embedded.as_deref().unwrap_or_default();

            let index = match self.backend.load(Path::new(&meta.index_path)) {
                Ok(index) => index,
                Err(TriageError::NotFound(_)) if !last => {
                    tracing::debug!(kb_id, index_id = %meta.id, "index artifact superseded, re-resolving");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let candidates = index.search(query_vec, fetch_k)?;

            // Records are only consistent with the artifact while the row
            // is still the latest one.
            let mut tx = self.pool.begin().await?;
            let current = fetch_latest_index(&mut tx, kb_id, kb_version).await?;
            if current.as_ref().map(|m| m.id.as_str()) != Some(meta.id.as_str()) {
                drop(tx);
                if last {
                    break;
                }
                tracing::debug!(kb_id, index_id = %meta.id, "index row replaced during search, re-resolving");
                continue;
            }
            let resolved = resolve_candidates(&mut tx, &meta.id, &candidates).await?;
            tx.commit().await?;

            let alpha = self.retrieval.hybrid_alpha;
            let mut hits: Vec<KnowledgeHit> = candidates
                .iter()
                .zip(resolved)
                .map(|(candidate, chunk)| {
                    let vector_score = candidate.score as f64;
                    let lexical = lexical_score(query, &chunk.content);
                    KnowledgeHit {
                        chunk_id: chunk.chunk_id,
                        revision_id: chunk.revision_id,
                        content: chunk.content,
                        score: hybrid_score(alpha, vector_score, lexical),
                        vector_score,
                        lexical_score: lexical,
                        vector_pos: candidate.pos as i64,
                    }
                })
                .collect();

            hits.sort_by(rank_knowledge_hits);
            hits.truncate(top_k);

            let latency_ms = started.elapsed().as_millis() as i64;
            let meta_json = serde_json::json!({
                "index_id": meta.id,
                "candidates": candidates.len(),
            })
            .to_string();
            self.log_query(kb_id, meta.kb_version, query, top_k, latency_ms, &meta_json)
                .await?;

            tracing::debug!(
                kb_id,
                kb_version = meta.kb_version,
                backend = %index.backend(),
                candidates = candidates.len(),
                hits = hits.len(),
                latency_ms,
                "hybrid search"
            );

            return Ok(SearchResponse {
                kb_version: meta.kb_version,
                latency_ms,
                hits,
            });
        }

        Err(TriageError::not_found(format!(
            "vector index artifact for knowledge base {}",
            kb_id
        )))
    }

    /// Position-to-chunk records of one built index, by position.
    pub async fn list_records(&self, index_id: &str) -> Result<Vec<VectorRecord>> {
        let rows = sqlx::query(
            "SELECT id, index_id, kb_id, kb_version, vector_pos, chunk_id, revision_id, created_at
             FROM vector_records
             WHERE index_id = ?
             ORDER BY vector_pos",
        )
        .bind(index_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| VectorRecord {
                id: row.get("id"),
                index_id: row.get("index_id"),
                kb_id: row.get("kb_id"),
                kb_version: row.get("kb_version"),
                vector_pos: row.get("vector_pos"),
                chunk_id: row.get("chunk_id"),
                revision_id: row.get("revision_id"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Most recent query log rows for a base, newest first.
    pub async fn list_query_logs(&self, kb_id: &str, limit: i64) -> Result<Vec<VectorQueryLog>> {
        let rows = sqlx::query(
            "SELECT id, kb_id, kb_version, query, top_k, provider, model, latency_ms, meta_json, created_at
             FROM vector_query_logs
             WHERE kb_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(kb_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| VectorQueryLog {
                id: row.get("id"),
                kb_id: row.get("kb_id"),
                kb_version: row.get("kb_version"),
                query: row.get("query"),
                top_k: row.get("top_k"),
                provider: row.get("provider"),
                model: row.get("model"),
                latency_ms: row.get("latency_ms"),
                meta_json: row.get("meta_json"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut rows = embed_normalized(self.embedder.as_ref(), &[query.to_string()]).await?;
        rows.pop()
            .ok_or_else(|| TriageError::ExternalService("empty query embedding".to_string()))
    }

    async fn empty_response(
        &self,
        kb_id: &str,
        kb_version: i64,
        query: &str,
        top_k: usize,
        started: Instant,
    ) -> Result<SearchResponse> {
        let latency_ms = started.elapsed().as_millis() as i64;
        self.log_query(kb_id, kb_version, query, top_k, latency_ms, r#"{"empty":true}"#)
            .await?;
        tracing::debug!(kb_id, kb_version, "search against base without index");
        Ok(SearchResponse {
            kb_version,
            latency_ms,
            hits: Vec::new(),
        })
    }

    async fn log_query(
        &self,
        kb_id: &str,
        kb_version: i64,
        query: &str,
        top_k: usize,
        latency_ms: i64,
        meta_json: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO vector_query_logs (id, kb_id, kb_version, query, top_k, provider, model, latency_ms, meta_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(kb_id)
        .bind(kb_version)
        .bind(query)
        .bind(top_k as i64)
        .bind(self.embedder.provider())
        .bind(self.embedder.model_name())
        .bind(latency_ms)
        .bind(meta_json)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Weighted fusion of vector and lexical similarity.
pub fn hybrid_score(alpha: f64, vector_score: f64, lexical_score: f64) -> f64 {
    alpha * vector_score + (1.0 - alpha) * lexical_score
}

fn rank_knowledge_hits(a: &KnowledgeHit, b: &KnowledgeHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.vector_pos.cmp(&b.vector_pos))
}

pub(crate) async fn fetch_latest_index(
    conn: &mut SqliteConnection,
    kb_id: &str,
    kb_version: Option<i64>,
) -> Result<Option<VectorIndexMeta>> {
    let row = sqlx::query(
        "SELECT id, kb_id, kb_version, provider, model, dim, index_path, created_at
         FROM vector_indexes
         WHERE kb_id = ? AND (? IS NULL OR kb_version = ?)
         ORDER BY created_at DESC, rowid DESC
         LIMIT 1",
    )
    .bind(kb_id)
    .bind(kb_version)
    .bind(kb_version)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(index_meta_from_row))
}

pub(crate) fn index_meta_from_row(row: &SqliteRow) -> VectorIndexMeta {
    VectorIndexMeta {
        id: row.get("id"),
        kb_id: row.get("kb_id"),
        kb_version: row.get("kb_version"),
        provider: row.get("provider"),
        model: row.get("model"),
        dim: row.get("dim"),
        index_path: row.get("index_path"),
        created_at: row.get("created_at"),
    }
}

struct ResolvedChunk {
    chunk_id: String,
    revision_id: String,
    content: String,
}

/// Join candidate positions to their records and chunks, in candidate order.
async fn resolve_candidates(
    conn: &mut SqliteConnection,
    index_id: &str,
    candidates: &[SearchHit],
) -> Result<Vec<ResolvedChunk>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; candidates.len()].join(", ");
    let sql = format!(
        "SELECT r.vector_pos, r.chunk_id, r.revision_id, c.content
         FROM vector_records r
         LEFT JOIN knowledge_chunks c ON c.id = r.chunk_id
         WHERE r.index_id = ? AND r.vector_pos IN ({})",
        placeholders
    );
    let mut query = sqlx::query(&sql).bind(index_id);
    for candidate in candidates {
        query = query.bind(candidate.pos as i64);
    }
    let rows = query.fetch_all(&mut *conn).await?;

    let mut by_pos: HashMap<i64, (String, String, Option<String>)> = rows
        .iter()
        .map(|row| {
            (
                row.get::<i64, _>("vector_pos"),
                (row.get("chunk_id"), row.get("revision_id"), row.get("content")),
            )
        })
        .collect();

    candidates
        .iter()
        .map(|candidate| {
            let pos = candidate.pos as i64;
            let (chunk_id, revision_id, content) = by_pos.remove(&pos).ok_or_else(|| {
                TriageError::DataIntegrity(format!(
                    "index {} has no record for position {}",
                    index_id, pos
                ))
            })?;
            let content = content.ok_or_else(|| {
                TriageError::DataIntegrity(format!(
                    "record at position {} of index {} references missing chunk {}",
                    pos, index_id, chunk_id
                ))
            })?;
            Ok(ResolvedChunk {
                chunk_id,
                revision_id,
                content,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(pos: i64, score: f64) -> KnowledgeHit {
        KnowledgeHit {
            chunk_id: format!("c{}", pos),
            revision_id: "r".to_string(),
            content: String::new(),
            score,
            vector_score: score,
            lexical_score: 0.0,
            vector_pos: pos,
        }
    }

    #[test]
    fn test_hybrid_default_weights() {
        let s = hybrid_score(0.75, 0.8, 0.4);
        assert!((s - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_hybrid_stays_in_unit_interval() {
        let grid = [0.0, 0.1, 0.25, 0.5, 0.9, 1.0];
        for &alpha in &[0.0, 0.3, 0.75, 1.0] {
            for &v in &grid {
                for &l in &grid {
                    let s = hybrid_score(alpha, v, l);
                    assert!(
                        (0.0..=1.0 + 1e-12).contains(&s),
                        "alpha={} v={} l={} → {}",
                        alpha,
                        v,
                        l,
                        s
                    );
                }
            }
        }
    }

    #[test]
    fn test_alpha_extremes_select_one_channel() {
        assert_eq!(hybrid_score(1.0, 0.3, 0.9), 0.3);
        assert_eq!(hybrid_score(0.0, 0.3, 0.9), 0.9);
    }

    #[test]
    fn test_lexical_can_reorder_vector_candidates() {
        // Vector prefers position 0, but a strong lexical match on position 1
        // wins after fusion.
        let a = hybrid_score(0.75, 0.60, 0.10);
        let b = hybrid_score(0.75, 0.55, 1.00);
        let mut hits = vec![hit(0, a), hit(1, b)];
        hits.sort_by(rank_knowledge_hits);
        assert_eq!(hits[0].vector_pos, 1);
    }

    #[test]
    fn test_ties_keep_vector_order() {
        let mut hits = vec![hit(3, 0.5), hit(1, 0.5), hit(2, 0.9)];
        hits.sort_by(rank_knowledge_hits);
        let order: Vec<i64> = hits.iter().map(|h| h.vector_pos).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }
}
