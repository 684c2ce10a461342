//! Reply analytics: the event sink contract and its SQLite implementation,
//! plus the aggregate views built on top of it.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::models::{now_millis, ReplyEvent};

/// Receives one immutable record per reply synthesis.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: &ReplyEvent) -> Result<()>;
}

/// Aggregate statistics over a time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub total_replies: i64,
    pub avg_latency_ms: i64,
    /// Fraction of replies produced by the chat provider.
    pub llm_rate: f64,
    pub lead_high: i64,
    pub lead_medium: i64,
    /// Includes events with an unrecognized level.
    pub lead_low: i64,
    pub intent_counts: BTreeMap<String, i64>,
    pub generated_at: i64,
}

/// Writes events to `reply_events` and answers monitor queries.
#[derive(Clone)]
pub struct SqliteEventSink {
    pool: SqlitePool,
}

impl SqliteEventSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Aggregate over events with `since <= created_at <= until` (epoch
    /// millis, both optional).
    pub async fn overview(&self, since: Option<i64>, until: Option<i64>) -> Result<Overview> {
        const WINDOW: &str = "(? IS NULL OR created_at >= ?) AND (? IS NULL OR created_at <= ?)";

        let totals = sqlx::query(&format!(
            "SELECT COUNT(*) AS total,
                    COALESCE(AVG(latency_ms), 0.0) AS avg_latency,
                    COALESCE(AVG(CASE WHEN llm_used THEN 1.0 ELSE 0.0 END), 0.0) AS llm_rate
             FROM reply_events WHERE {}",
            WINDOW
        ))
        .bind(since)
        .bind(since)
        .bind(until)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = totals.get("total");
        let generated_at = now_millis();
        if total == 0 {
            return Ok(Overview {
                total_replies: 0,
                avg_latency_ms: 0,
                llm_rate: 0.0,
                lead_high: 0,
                lead_medium: 0,
                lead_low: 0,
                intent_counts: BTreeMap::new(),
                generated_at,
            });
        }

        let levels = sqlx::query(&format!(
            "SELECT lead_level AS label, COUNT(*) AS n FROM reply_events WHERE {} GROUP BY lead_level",
            WINDOW
        ))
        .bind(since)
        .bind(since)
        .bind(until)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        let (mut high, mut medium, mut low) = (0, 0, 0);
        for row in &levels {
            let label: String = row.get("label");
            let n: i64 = row.get("n");
            match label.as_str() {
                "high" => high += n,
                "medium" => medium += n,
                _ => low += n,
            }
        }

        let intents = sqlx::query(&format!(
            "SELECT intent AS label, COUNT(*) AS n FROM reply_events WHERE {} GROUP BY intent",
            WINDOW
        ))
        .bind(since)
        .bind(since)
        .bind(until)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        let intent_counts = intents
            .iter()
            .map(|row| (row.get::<String, _>("label"), row.get::<i64, _>("n")))
            .collect();

        let avg_latency: f64 = totals.get("avg_latency");
        Ok(Overview {
            total_replies: total,
            avg_latency_ms: avg_latency as i64,
            llm_rate: totals.get("llm_rate"),
            lead_high: high,
            lead_medium: medium,
            lead_low: low,
            intent_counts,
            generated_at,
        })
    }

    /// Events for one note, highest lead score first, newest first on ties.
    pub async fn note_top_leads(&self, note_id: &str, limit: i64) -> Result<Vec<ReplyEvent>> {
        let rows = sqlx::query(
            "SELECT id, kb_id, kb_version, comment_id, note_id, intent, lead_score, lead_level,
                    latency_ms, llm_used, meta_json, created_at
             FROM reply_events
             WHERE note_id = ?
             ORDER BY lead_score DESC, created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(note_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(event_from_row).collect())
    }
}

#[async_trait]
impl EventSink for SqliteEventSink {
    async fn record(&self, event: &ReplyEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO reply_events (id, kb_id, kb_version, comment_id, note_id, intent, lead_score,
                                       lead_level, latency_ms, llm_used, meta_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.kb_id)
        .bind(event.kb_version)
        .bind(&event.comment_id)
        .bind(&event.note_id)
        .bind(&event.intent)
        .bind(event.lead_score)
        .bind(&event.lead_level)
        .bind(event.latency_ms)
        .bind(event.llm_used)
        .bind(&event.meta_json)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn event_from_row(row: &SqliteRow) -> ReplyEvent {
    ReplyEvent {
        id: row.get("id"),
        kb_id: row.get("kb_id"),
        kb_version: row.get("kb_version"),
        comment_id: row.get("comment_id"),
        note_id: row.get("note_id"),
        intent: row.get("intent"),
        lead_score: row.get("lead_score"),
        lead_level: row.get("lead_level"),
        latency_ms: row.get("latency_ms"),
        llm_used: row.get("llm_used"),
        meta_json: row.get("meta_json"),
        created_at: row.get("created_at"),
    }
}
