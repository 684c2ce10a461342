//! Vector index rebuild for a (knowledge base, version) pair.
//!
//! A rebuild is always a full replace from the current chunk snapshot:
//!
//! 1. collect the active chunks of the base;
//! 2. embed them in one provider call and L2-normalize the rows;
//! 3. build a fresh index and persist it to a new artifact file
//!    `<vector.root>/<kb_id>/<kb_version>/index-<index_id>.vec`;
//! 4. in one transaction, delete the previous index rows and records for
//!    the pair and insert the new ones;
//! 5. after commit, delete superseded artifact files.
//!
//! Nothing visible to readers changes before step 4 commits, so a failed
//! embedding call or write leaves the previous index searchable. An empty
//! corpus still produces an index row (`dim = 0`, no artifact) so searches
//! report zero hits instead of falling back to an older build.

use futures::TryStreamExt;
use sqlx::SqliteConnection;
use std::path::{Path, PathBuf};

use crate::embedding::embed_normalized;
use crate::db;
use crate::error::{Result, TriageError};
use crate::models::{new_id, now_millis, KnowledgeChunk, VectorIndexMeta};
use crate::search::Retriever;

impl Retriever {
    /// Rebuild the index for `kb_id` at `kb_version` from the base's current
    /// active chunks. Returns the new index row.
    pub async fn reindex(&self, kb_id: &str, kb_version: i64) -> Result<VectorIndexMeta> {
        if kb_version < 0 {
            return Err(TriageError::invalid("kb_version must be >= 0"));
        }
        self.store.get_knowledge_base(kb_id).await?;

        let chunks: Vec<KnowledgeChunk> = self.store.list_active_chunks(kb_id).try_collect().await?;

        let index_id = new_id();
        let mut meta = VectorIndexMeta {
            id: index_id.clone(),
            kb_id: kb_id.to_string(),
            kb_version,
            provider: self.embedder.provider().to_string(),
            model: self.embedder.model_name().to_string(),
            dim: 0,
            index_path: String::new(),
            created_at: now_millis(),
        };

        let staged: Option<PathBuf> = if chunks.is_empty() {
            None
        } else {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let vectors = embed_normalized(self.embedder.as_ref(), &texts).await?;

            let mut index = self.backend.create(None)?;
            index.add(&vectors)?;

            let path = self.artifact_path(kb_id, kb_version, &index_id);
            index.save(&path)?;

            meta.dim = index.dim().unwrap_or(0) as i64;
            meta.index_path = path.to_string_lossy().into_owned();
            Some(path)
        };

        let superseded = match self.swap_index(&meta, &chunks).await {
            Ok(paths) => paths,
            Err(e) => {
                if let Some(path) = &staged {
                    if let Err(cleanup) = std::fs::remove_file(path) {
                        tracing::warn!(
                            path = %path.display(),
                            error = %cleanup,
                            "failed to remove staged index artifact"
                        );
                    }
                }
                return Err(e);
            }
        };

        for old in superseded {
            if old.is_empty() || old == meta.index_path {
                continue;
            }
            if let Err(e) = std::fs::remove_file(&old) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %old, error = %e, "failed to remove superseded index artifact");
                }
            }
        }

        tracing::info!(
            kb_id,
            kb_version,
            index_id = %meta.id,
            records = chunks.len(),
            dim = meta.dim,
            backend = %self.backend,
            "reindexed knowledge base"
        );
        Ok(meta)
    }

    fn artifact_path(&self, kb_id: &str, kb_version: i64, index_id: &str) -> PathBuf {
        version_dir(&self.vector_root, kb_id, kb_version).join(format!("index-{}.vec", index_id))
    }

    /// Replace index rows and records for the pair in one transaction.
    /// Returns the artifact paths of the replaced rows.
    async fn swap_index(
        &self,
        meta: &VectorIndexMeta,
        chunks: &[KnowledgeChunk],
    ) -> Result<Vec<String>> {
        let mut tx = db::begin_write(&self.pool).await?;

        let superseded: Vec<String> = sqlx::query_scalar(
            "SELECT index_path FROM vector_indexes WHERE kb_id = ? AND kb_version = ?",
        )
        .bind(&meta.kb_id)
        .bind(meta.kb_version)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM vector_records WHERE kb_id = ? AND kb_version = ?")
            .bind(&meta.kb_id)
            .bind(meta.kb_version)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM vector_indexes WHERE kb_id = ? AND kb_version = ?")
            .bind(&meta.kb_id)
            .bind(meta.kb_version)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO vector_indexes (id, kb_id, kb_version, provider, model, dim, index_path, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&meta.id)
        .bind(&meta.kb_id)
        .bind(meta.kb_version)
        .bind(&meta.provider)
        .bind(&meta.model)
        .bind(meta.dim)
        .bind(&meta.index_path)
        .bind(meta.created_at)
        .execute(&mut *tx)
        .await?;

        insert_records(&mut tx, meta, chunks).await?;

        tx.commit().await?;
        Ok(superseded)
    }
}

async fn insert_records(
    conn: &mut SqliteConnection,
    meta: &VectorIndexMeta,
    chunks: &[KnowledgeChunk],
) -> Result<()> {
    for (pos, chunk) in chunks.iter().enumerate() {
        sqlx::query(
            "INSERT INTO vector_records (id, index_id, kb_id, kb_version, vector_pos, chunk_id, revision_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(&meta.id)
        .bind(&meta.kb_id)
        .bind(meta.kb_version)
        .bind(pos as i64)
        .bind(&chunk.id)
        .bind(&chunk.revision_id)
        .bind(meta.created_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Directory holding every artifact built for one (base, version) pair.
pub fn version_dir(root: &Path, kb_id: &str, kb_version: i64) -> PathBuf {
    root.join(kb_id).join(kb_version.to_string())
}
