use sqlx::SqlitePool;

use crate::error::Result;

/// Create every table and index used by the crate. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Knowledge bases
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_bases (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            published_version INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_items (
            id TEXT PRIMARY KEY,
            kb_id TEXT NOT NULL,
            key TEXT NOT NULL,
            title TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            current_revision_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(kb_id, key),
            FOREIGN KEY (kb_id) REFERENCES knowledge_bases(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_revisions (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            revision INTEGER NOT NULL,
            content TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'draft',
            published_version INTEGER,
            created_at INTEGER NOT NULL,
            UNIQUE(item_id, revision),
            FOREIGN KEY (item_id) REFERENCES knowledge_items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_chunks (
            id TEXT PRIMARY KEY,
            revision_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(revision_id, chunk_index),
            FOREIGN KEY (revision_id) REFERENCES knowledge_revisions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector index metadata, records, and query logs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_indexes (
            id TEXT PRIMARY KEY,
            kb_id TEXT NOT NULL,
            kb_version INTEGER NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            dim INTEGER NOT NULL,
            index_path TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_records (
            id TEXT PRIMARY KEY,
            index_id TEXT NOT NULL,
            kb_id TEXT NOT NULL,
            kb_version INTEGER NOT NULL,
            vector_pos INTEGER NOT NULL,
            chunk_id TEXT NOT NULL,
            revision_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(index_id, vector_pos)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_query_logs (
            id TEXT PRIMARY KEY,
            kb_id TEXT NOT NULL,
            kb_version INTEGER NOT NULL,
            query TEXT NOT NULL,
            top_k INTEGER NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            latency_ms INTEGER NOT NULL DEFAULT 0,
            meta_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Reply analytics
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reply_events (
            id TEXT PRIMARY KEY,
            kb_id TEXT NOT NULL,
            kb_version INTEGER NOT NULL,
            comment_id TEXT NOT NULL DEFAULT '',
            note_id TEXT NOT NULL DEFAULT '',
            intent TEXT NOT NULL,
            lead_score INTEGER NOT NULL DEFAULT 0,
            lead_level TEXT NOT NULL DEFAULT 'low',
            latency_ms INTEGER NOT NULL DEFAULT 0,
            llm_used INTEGER NOT NULL DEFAULT 0,
            meta_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_items_kb_id ON knowledge_items(kb_id)",
        "CREATE INDEX IF NOT EXISTS idx_revisions_item_id ON knowledge_revisions(item_id)",
        "CREATE INDEX IF NOT EXISTS idx_chunks_revision_id ON knowledge_chunks(revision_id)",
        "CREATE INDEX IF NOT EXISTS idx_vector_indexes_kb ON vector_indexes(kb_id, kb_version, created_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_vector_records_kb ON vector_records(kb_id, kb_version)",
        "CREATE INDEX IF NOT EXISTS idx_query_logs_kb ON vector_query_logs(kb_id, created_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_reply_events_note ON reply_events(note_id, lead_score DESC)",
        "CREATE INDEX IF NOT EXISTS idx_reply_events_created_at ON reply_events(created_at)",
    ];
    for ddl in indexes {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}
