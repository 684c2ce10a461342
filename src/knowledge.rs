//! Versioned knowledge store.
//!
//! Owns the lifecycle of knowledge bases, items, revisions, and their
//! derived chunks. Every mutating operation runs inside a single SQLite
//! transaction, and validation happens before the transaction opens, so a
//! failed call never leaves partial rows behind.
//!
//! # Lifecycle
//!
//! ```text
//! create_item ──▶ revision 1 (published, current)
//! create_revision ──▶ revision N+1 (draft)
//! publish_revision ──▶ draft → published, becomes current
//! publish_kb ──▶ published_version += 1, stamps every current revision
//! ```
//!
//! Chunks are a pure function of revision content ([`chunk_text`]). A rebuild
//! that would reproduce the stored chunk set keeps the stored rows, so chunk
//! ids referenced by a built vector index stay valid across republishing.

use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::chunk::chunk_text;
use crate::config::KnowledgeConfig;
use crate::db;
use crate::error::{Result, TriageError};
use crate::models::{
    new_id, now_millis, KnowledgeBase, KnowledgeChunk, KnowledgeItem, KnowledgeItemRevision,
    RevisionStatus,
};

const DEFAULT_KB_NAME: &str = "默认知识库";
const DEFAULT_KB_DESCRIPTION: &str = "系统默认知识库";

const KB_COLUMNS: &str = "id, slug, name, description, published_version, created_at, updated_at";
const ITEM_COLUMNS: &str =
    "id, kb_id, key, title, tags, is_active, current_revision_id, created_at, updated_at";
const REVISION_COLUMNS: &str =
    "id, item_id, revision, content, source, status, published_version, created_at";
const CHUNK_COLUMNS: &str = "id, revision_id, chunk_index, content, hash, created_at";

/// Knowledge store service. Cheap to clone; all state lives in the pool.
#[derive(Clone)]
pub struct KnowledgeStore {
    pool: SqlitePool,
    default_kb_slug: String,
}

impl KnowledgeStore {
    pub fn new(pool: SqlitePool, config: &KnowledgeConfig) -> Self {
        Self {
            pool,
            default_kb_slug: config.default_kb_slug.clone(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ── Knowledge bases ─────────────────────────────────────────────────

    pub async fn create_knowledge_base(
        &self,
        slug: &str,
        name: &str,
        description: &str,
    ) -> Result<KnowledgeBase> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(TriageError::invalid("knowledge base slug must not be empty"));
        }

        if self.get_knowledge_base_by_slug(slug).await?.is_some() {
            return Err(TriageError::Conflict(format!(
                "knowledge base slug '{}' already exists",
                slug
            )));
        }

        let now = now_millis();
        let kb = KnowledgeBase {
            id: new_id(),
            slug: slug.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            published_version: 0,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO knowledge_bases (id, slug, name, description, published_version, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&kb.id)
        .bind(&kb.slug)
        .bind(&kb.name)
        .bind(&kb.description)
        .bind(kb.created_at)
        .bind(kb.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(kb_id = %kb.id, slug = %kb.slug, "created knowledge base");
        Ok(kb)
    }

    /// Return the configured default base, creating it on first use.
    pub async fn ensure_default_knowledge_base(&self) -> Result<KnowledgeBase> {
        if let Some(kb) = self.get_knowledge_base_by_slug(&self.default_kb_slug).await? {
            return Ok(kb);
        }
        match self
            .create_knowledge_base(&self.default_kb_slug, DEFAULT_KB_NAME, DEFAULT_KB_DESCRIPTION)
            .await
        {
            Ok(kb) => Ok(kb),
            // Lost a creation race with another caller.
            Err(TriageError::Conflict(_)) => self
                .get_knowledge_base_by_slug(&self.default_kb_slug)
                .await?
                .ok_or_else(|| TriageError::not_found(format!("knowledge base '{}'", self.default_kb_slug))),
            Err(e) => Err(e),
        }
    }

    /// All bases, newest first.
    pub async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM knowledge_bases ORDER BY created_at DESC, rowid DESC",
            KB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(kb_from_row).collect())
    }

    pub async fn get_knowledge_base(&self, kb_id: &str) -> Result<KnowledgeBase> {
        let row = sqlx::query(&format!("SELECT {} FROM knowledge_bases WHERE id = ?", KB_COLUMNS))
            .bind(kb_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(kb_from_row)
            .ok_or_else(|| TriageError::not_found(format!("knowledge base {}", kb_id)))
    }

    pub async fn get_knowledge_base_by_slug(&self, slug: &str) -> Result<Option<KnowledgeBase>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM knowledge_bases WHERE slug = ?",
            KB_COLUMNS
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(kb_from_row))
    }

    /// Bump the base's published version and stamp it on every item's
    /// current revision. Returns the new version.
    pub async fn publish_kb(&self, kb_id: &str) -> Result<i64> {
        let now = now_millis();
        let mut tx = db::begin_write(&self.pool).await?;

        let version: Option<i64> = sqlx::query_scalar(
            "UPDATE knowledge_bases
             SET published_version = published_version + 1, updated_at = ?
             WHERE id = ?
             RETURNING published_version",
        )
        .bind(now)
        .bind(kb_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(version) = version else {
            return Err(TriageError::not_found(format!("knowledge base {}", kb_id)));
        };

        let stamped = sqlx::query(
            "UPDATE knowledge_revisions SET published_version = ?
             WHERE id IN (
                 SELECT current_revision_id FROM knowledge_items
                 WHERE kb_id = ? AND current_revision_id IS NOT NULL
             )",
        )
        .bind(version)
        .bind(kb_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            kb_id,
            version,
            revisions = stamped.rows_affected(),
            "published knowledge base"
        );
        Ok(version)
    }

    // ── Items ───────────────────────────────────────────────────────────

    /// Create an item together with its first, already published, revision.
    pub async fn create_item(
        &self,
        kb_id: &str,
        key: &str,
        title: &str,
        tags: &str,
        content: &str,
        source: &str,
    ) -> Result<KnowledgeItem> {
        if key.trim().is_empty() {
            return Err(TriageError::invalid("item key must not be empty"));
        }
        if content.trim().is_empty() {
            return Err(TriageError::invalid("item content must not be empty"));
        }

        let now = now_millis();
        let item_id = new_id();
        let revision_id = new_id();

        let mut tx = db::begin_write(&self.pool).await?;

        let kb_exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM knowledge_bases WHERE id = ?")
                .bind(kb_id)
                .fetch_optional(&mut *tx)
                .await?;
        if kb_exists.is_none() {
            return Err(TriageError::not_found(format!("knowledge base {}", kb_id)));
        }

        let duplicate: Option<String> =
            sqlx::query_scalar("SELECT id FROM knowledge_items WHERE kb_id = ? AND key = ?")
                .bind(kb_id)
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
        if duplicate.is_some() {
            return Err(TriageError::Conflict(format!(
                "item key '{}' already exists in knowledge base {}",
                key, kb_id
            )));
        }

        sqlx::query(
            "INSERT INTO knowledge_items (id, kb_id, key, title, tags, is_active, current_revision_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 1, NULL, ?, ?)",
        )
        .bind(&item_id)
        .bind(kb_id)
        .bind(key)
        .bind(title)
        .bind(tags)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO knowledge_revisions (id, item_id, revision, content, source, status, published_version, created_at)
             VALUES (?, ?, 1, ?, ?, ?, NULL, ?)",
        )
        .bind(&revision_id)
        .bind(&item_id)
        .bind(content)
        .bind(source)
        .bind(RevisionStatus::Published.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE knowledge_items SET current_revision_id = ? WHERE id = ?")
            .bind(&revision_id)
            .bind(&item_id)
            .execute(&mut *tx)
            .await?;

        rebuild_chunks(&mut tx, &revision_id, content).await?;

        tx.commit().await?;

        tracing::info!(kb_id, item_id = %item_id, key, "created knowledge item");
        self.get_item(&item_id).await
    }

    /// Partial update of the mutable item fields. Revisions are untouched.
    pub async fn update_item(
        &self,
        item_id: &str,
        title: Option<&str>,
        tags: Option<&str>,
        is_active: Option<bool>,
    ) -> Result<KnowledgeItem> {
        let result = sqlx::query(
            "UPDATE knowledge_items
             SET title = COALESCE(?, title),
                 tags = COALESCE(?, tags),
                 is_active = COALESCE(?, is_active),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(title)
        .bind(tags)
        .bind(is_active)
        .bind(now_millis())
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TriageError::not_found(format!("item {}", item_id)));
        }
        self.get_item(item_id).await
    }

    pub async fn get_item(&self, item_id: &str) -> Result<KnowledgeItem> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM knowledge_items WHERE id = ?",
            ITEM_COLUMNS
        ))
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref()
            .map(item_from_row)
            .ok_or_else(|| TriageError::not_found(format!("item {}", item_id)))
    }

    /// Items of a base, most recently updated first, optionally filtered by
    /// the active flag.
    pub async fn list_items(
        &self,
        kb_id: &str,
        is_active: Option<bool>,
    ) -> Result<Vec<KnowledgeItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM knowledge_items
             WHERE kb_id = ? AND (? IS NULL OR is_active = ?)
             ORDER BY updated_at DESC, rowid DESC",
            ITEM_COLUMNS
        ))
        .bind(kb_id)
        .bind(is_active)
        .bind(is_active)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(item_from_row).collect())
    }

    // ── Revisions ───────────────────────────────────────────────────────

    /// Append a draft revision numbered one past the item's latest.
    pub async fn create_revision(
        &self,
        item_id: &str,
        content: &str,
        source: &str,
    ) -> Result<KnowledgeItemRevision> {
        if content.trim().is_empty() {
            return Err(TriageError::invalid("revision content must not be empty"));
        }

        let revision_id = new_id();
        let mut tx = db::begin_write(&self.pool).await?;

        let item_exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM knowledge_items WHERE id = ?")
                .bind(item_id)
                .fetch_optional(&mut *tx)
                .await?;
        if item_exists.is_none() {
            return Err(TriageError::not_found(format!("item {}", item_id)));
        }

        // Numbering and insert in one statement so concurrent writers cannot
        // observe the same maximum.
        sqlx::query(
            "INSERT INTO knowledge_revisions (id, item_id, revision, content, source, status, published_version, created_at)
             SELECT ?, ?, COALESCE(MAX(revision), 0) + 1, ?, ?, ?, NULL, ?
             FROM knowledge_revisions WHERE item_id = ?",
        )
        .bind(&revision_id)
        .bind(item_id)
        .bind(content)
        .bind(source)
        .bind(RevisionStatus::Draft.as_str())
        .bind(now_millis())
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

        rebuild_chunks(&mut tx, &revision_id, content).await?;

        tx.commit().await?;

        let revision = self.get_revision(&revision_id).await?;
        tracing::debug!(item_id, revision = revision.revision, "created draft revision");
        Ok(revision)
    }

    /// Mark a revision published and make it the item's current revision.
    /// Earlier published revisions keep their status.
    pub async fn publish_revision(&self, item_id: &str, revision_id: &str) -> Result<KnowledgeItem> {
        let mut tx = db::begin_write(&self.pool).await?;

        let item_exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM knowledge_items WHERE id = ?")
                .bind(item_id)
                .fetch_optional(&mut *tx)
                .await?;
        if item_exists.is_none() {
            return Err(TriageError::not_found(format!("item {}", item_id)));
        }

        let revision = sqlx::query("SELECT item_id, content FROM knowledge_revisions WHERE id = ?")
            .bind(revision_id)
            .fetch_optional(&mut *tx)
            .await?;
        let content: String = match revision {
            Some(row) if row.get::<String, _>("item_id") == item_id => row.get("content"),
            _ => {
                return Err(TriageError::not_found(format!(
                    "revision {} of item {}",
                    revision_id, item_id
                )))
            }
        };

        sqlx::query("UPDATE knowledge_revisions SET status = ? WHERE id = ?")
            .bind(RevisionStatus::Published.as_str())
            .bind(revision_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE knowledge_items SET current_revision_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(revision_id)
        .bind(now_millis())
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

        rebuild_chunks(&mut tx, revision_id, &content).await?;

        tx.commit().await?;

        tracing::info!(item_id, revision_id, "published revision");
        self.get_item(item_id).await
    }

    pub async fn get_revision(&self, revision_id: &str) -> Result<KnowledgeItemRevision> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM knowledge_revisions WHERE id = ?",
            REVISION_COLUMNS
        ))
        .bind(revision_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => revision_from_row(&row),
            None => Err(TriageError::not_found(format!("revision {}", revision_id))),
        }
    }

    /// Revisions of an item, newest first.
    pub async fn list_revisions(&self, item_id: &str) -> Result<Vec<KnowledgeItemRevision>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM knowledge_revisions WHERE item_id = ? ORDER BY revision DESC",
            REVISION_COLUMNS
        ))
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(revision_from_row).collect()
    }

    // ── Chunks ──────────────────────────────────────────────────────────

    pub async fn list_chunks(&self, revision_id: &str) -> Result<Vec<KnowledgeChunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM knowledge_chunks WHERE revision_id = ? ORDER BY chunk_index",
            CHUNK_COLUMNS
        ))
        .bind(revision_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    /// Chunks of the current revision of every active item in the base, in
    /// chunk creation order. Rows are streamed from the database.
    pub fn list_active_chunks(&self, kb_id: &str) -> BoxStream<'_, Result<KnowledgeChunk>> {
        sqlx::query(
            "SELECT c.id, c.revision_id, c.chunk_index, c.content, c.hash, c.created_at
             FROM knowledge_chunks c
             JOIN knowledge_items i ON i.current_revision_id = c.revision_id
             WHERE i.kb_id = ? AND i.is_active = 1
             ORDER BY c.created_at ASC, c.rowid ASC",
        )
        .bind(kb_id.to_string())
        .fetch(&self.pool)
        .map(|row| row.map(|r| chunk_from_row(&r)).map_err(TriageError::from))
        .boxed()
    }
}

/// Replace a revision's chunk set with the one derived from `content`,
/// unless the stored set already matches. Returns whether rows changed.
async fn rebuild_chunks(
    conn: &mut SqliteConnection,
    revision_id: &str,
    content: &str,
) -> Result<bool> {
    let fresh = chunk_text(revision_id, content);

    let existing: Vec<String> = sqlx::query_scalar(
        "SELECT hash FROM knowledge_chunks WHERE revision_id = ? ORDER BY chunk_index",
    )
    .bind(revision_id)
    .fetch_all(&mut *conn)
    .await?;

    let unchanged = existing.len() == fresh.len()
        && existing.iter().zip(fresh.iter()).all(|(h, c)| *h == c.hash);
    if unchanged {
        return Ok(false);
    }

    sqlx::query("DELETE FROM knowledge_chunks WHERE revision_id = ?")
        .bind(revision_id)
        .execute(&mut *conn)
        .await?;

    for chunk in &fresh {
        sqlx::query(
            "INSERT INTO knowledge_chunks (id, revision_id, chunk_index, content, hash, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.revision_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.content)
        .bind(&chunk.hash)
        .bind(chunk.created_at)
        .execute(&mut *conn)
        .await?;
    }

    tracing::debug!(revision_id, chunks = fresh.len(), "rebuilt chunks");
    Ok(true)
}

fn kb_from_row(row: &SqliteRow) -> KnowledgeBase {
    KnowledgeBase {
        id: row.get("id"),
        slug: row.get("slug"),
        name: row.get("name"),
        description: row.get("description"),
        published_version: row.get("published_version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn item_from_row(row: &SqliteRow) -> KnowledgeItem {
    KnowledgeItem {
        id: row.get("id"),
        kb_id: row.get("kb_id"),
        key: row.get("key"),
        title: row.get("title"),
        tags: row.get("tags"),
        is_active: row.get("is_active"),
        current_revision_id: row.get("current_revision_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn revision_from_row(row: &SqliteRow) -> Result<KnowledgeItemRevision> {
    let status: String = row.get("status");
    Ok(KnowledgeItemRevision {
        id: row.get("id"),
        item_id: row.get("item_id"),
        revision: row.get("revision"),
        content: row.get("content"),
        source: row.get("source"),
        status: status.parse()?,
        published_version: row.get("published_version"),
        created_at: row.get("created_at"),
    })
}

pub(crate) fn chunk_from_row(row: &SqliteRow) -> KnowledgeChunk {
    KnowledgeChunk {
        id: row.get("id"),
        revision_id: row.get("revision_id"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        hash: row.get("hash"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations;
    use futures::TryStreamExt;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> KnowledgeStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        KnowledgeStore::new(pool, &KnowledgeConfig::default())
    }

    #[tokio::test]
    async fn test_create_item_publishes_first_revision() {
        let store = store().await;
        let kb = store.create_knowledge_base("shop", "Shop", "").await.unwrap();
        let item = store
            .create_item(&kb.id, "faq", "FAQ", "", "A\n\nB\n\nC", "manual")
            .await
            .unwrap();

        let revisions = store.list_revisions(&item.id).await.unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].revision, 1);
        assert_eq!(revisions[0].status, RevisionStatus::Published);
        assert_eq!(item.current_revision_id.as_deref(), Some(revisions[0].id.as_str()));

        let chunks = store.list_chunks(&revisions[0].id).await.unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(texts, vec!["A", "B", "C"]);
        assert_eq!(
            chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let store = store().await;
        let kb = store.create_knowledge_base("shop", "Shop", "").await.unwrap();
        let item = store
            .create_item(&kb.id, "faq", "FAQ", "", "one\n\ntwo", "")
            .await
            .unwrap();
        let rev_id = item.current_revision_id.clone().unwrap();
        let before = store.list_chunks(&rev_id).await.unwrap();

        store.publish_revision(&item.id, &rev_id).await.unwrap();
        store.publish_revision(&item.id, &rev_id).await.unwrap();

        let after = store.list_chunks(&rev_id).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_empty_slug_rejected() {
        let store = store().await;
        let err = store.create_knowledge_base("  ", "x", "").await.unwrap_err();
        assert!(matches!(err, TriageError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_ensure_default_is_stable() {
        let store = store().await;
        let first = store.ensure_default_knowledge_base().await.unwrap();
        let second = store.ensure_default_knowledge_base().await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.slug, "default");
        assert_eq!(store.list_knowledge_bases().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_items_excluded_from_active_chunks() {
        let store = store().await;
        let kb = store.create_knowledge_base("shop", "Shop", "").await.unwrap();
        let keep = store
            .create_item(&kb.id, "a", "A", "", "alpha", "")
            .await
            .unwrap();
        let hide = store
            .create_item(&kb.id, "b", "B", "", "beta", "")
            .await
            .unwrap();
        store
            .update_item(&hide.id, None, None, Some(false))
            .await
            .unwrap();

        let chunks: Vec<KnowledgeChunk> =
            store.list_active_chunks(&kb.id).try_collect().await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "alpha");
        assert_eq!(Some(chunks[0].revision_id.clone()), keep.current_revision_id);

        let active = store.list_items(&kb.id, Some(true)).await.unwrap();
        assert_eq!(active.len(), 1);
        let all = store.list_items(&kb.id, None).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
