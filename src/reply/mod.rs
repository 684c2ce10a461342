//! Reply synthesis: classification, retrieval, generation, and policy.
//!
//! ```text
//! comment ──▶ detect_intent ─┐
//!         └─▶ score_lead ────┤
//!                            ▼
//!            build_query ──▶ Retriever::search ──▶ knowledge hits
//!                                                      │
//!            ChatProvider::chat (optional) ◀───────────┘
//!                 │ failure / empty / absent
//!                 ▼
//!            fallback_template
//!                 │
//!            redact_sensitive ──▶ enforce_style ──▶ EventSink::record
//! ```
//!
//! Chat failures never surface to the caller; they are logged and the
//! per-intent template is used. Event sink failures are logged and ignored.

pub mod chat;
pub mod policy;
pub mod prompt;
pub mod templates;

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{ChatConfig, ReplyConfig};
use crate::error::Result;
use crate::intent::{detect_intent, Intent};
use crate::leads::{score_lead, LeadLevel};
use crate::models::{new_id, now_millis, ReplyEvent};
use crate::monitor::EventSink;
use crate::search::{KnowledgeHit, Retriever};

use chat::{ChatMessage, ChatProvider};
use policy::{enforce_style, redact_sensitive};
use prompt::{build_messages, build_query, wants_sales_hint, PromptInput};
use templates::fallback_template;

/// One comment to answer.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub kb_id: String,
    pub comment_id: String,
    pub note_id: String,
    pub comment: String,
    pub note_title: String,
    pub note_desc: String,
    /// Defaults to `retrieval.default_top_k`.
    pub top_k: Option<usize>,
    /// Pin retrieval to a published version; latest index otherwise.
    pub kb_version: Option<i64>,
    pub inject_sales: bool,
}

impl ReplyRequest {
    pub fn new(kb_id: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            kb_id: kb_id.into(),
            comment_id: String::new(),
            note_id: String::new(),
            comment: comment.into(),
            note_title: String::new(),
            note_desc: String::new(),
            top_k: None,
            kb_version: None,
            inject_sales: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyOutcome {
    pub kb_id: String,
    pub kb_version: i64,
    pub intent: Intent,
    pub intent_confidence: f64,
    pub intent_reasons: Vec<String>,
    pub reply: String,
    pub used_knowledge: Vec<KnowledgeHit>,
    pub lead_score: i64,
    pub lead_level: LeadLevel,
    pub lead_signals: Vec<String>,
    pub next_actions: Vec<String>,
    pub latency_ms: i64,
    pub retrieval_ms: i64,
    /// True only when the returned text came from the chat provider.
    pub llm_used: bool,
}

#[derive(Clone)]
pub struct ReplyService {
    retriever: Retriever,
    chat: Option<Arc<dyn ChatProvider>>,
    events: Arc<dyn EventSink>,
    max_chars: usize,
    knowledge_snippets: usize,
    temperature: f32,
}

impl ReplyService {
    pub fn new(
        retriever: Retriever,
        chat: Option<Arc<dyn ChatProvider>>,
        events: Arc<dyn EventSink>,
        reply: &ReplyConfig,
        chat_config: &ChatConfig,
    ) -> Self {
        Self {
            retriever,
            chat,
            events,
            max_chars: reply.max_chars,
            knowledge_snippets: reply.knowledge_snippets,
            temperature: chat_config.temperature,
        }
    }

    pub fn has_chat(&self) -> bool {
        self.chat.is_some()
    }

    pub async fn synthesize(&self, request: &ReplyRequest) -> Result<ReplyOutcome> {
        let started = Instant::now();

        let intent = detect_intent(&request.comment);
        let lead = score_lead(&request.comment);

        let query = build_query(
            &request.note_title,
            &request.note_desc,
            &request.comment,
            intent.intent,
        );
        let top_k = request
            .top_k
            .unwrap_or_else(|| self.retriever.default_top_k());
        let retrieval_started = Instant::now();
        let search = self
            .retriever
            .search(&request.kb_id, &query, top_k, request.kb_version)
            .await?;
        let retrieval_ms = retrieval_started.elapsed().as_millis() as i64;

        let generated = match &self.chat {
            Some(chat) => {
                let snippets: Vec<&str> = search
                    .hits
                    .iter()
                    .take(self.knowledge_snippets)
                    .map(|h| h.content.as_str())
                    .collect();
                let messages = build_messages(&PromptInput {
                    note_title: &request.note_title,
                    note_desc: &request.note_desc,
                    comment: &request.comment,
                    intent: intent.intent,
                    snippets: &snippets,
                    sales_hint: wants_sales_hint(request.inject_sales, intent.intent),
                });
                self.generate(chat.as_ref(), &messages).await
            }
            None => None,
        };

        let llm_used = generated.is_some();
        let raw = generated.unwrap_or_else(|| fallback_template(intent.intent).to_string());
        let reply = enforce_style(&redact_sensitive(&raw), self.max_chars);

        let latency_ms = started.elapsed().as_millis() as i64;

        let event = ReplyEvent {
            id: new_id(),
            kb_id: request.kb_id.clone(),
            kb_version: search.kb_version,
            comment_id: request.comment_id.clone(),
            note_id: request.note_id.clone(),
            intent: intent.intent.to_string(),
            lead_score: lead.score,
            lead_level: lead.level.to_string(),
            latency_ms,
            llm_used,
            meta_json: serde_json::json!({
                "retrieval_ms": retrieval_ms,
                "intent_reasons": intent.reasons,
            })
            .to_string(),
            created_at: now_millis(),
        };
        if let Err(e) = self.events.record(&event).await {
            tracing::warn!(error = %e, kb_id = %request.kb_id, "failed to record reply event");
        }

        tracing::debug!(
            kb_id = %request.kb_id,
            intent = %intent.intent,
            lead_score = lead.score,
            hits = search.hits.len(),
            llm_used,
            latency_ms,
            "synthesized reply"
        );

        Ok(ReplyOutcome {
            kb_id: request.kb_id.clone(),
            kb_version: search.kb_version,
            intent: intent.intent,
            intent_confidence: intent.confidence,
            intent_reasons: intent.reasons,
            reply,
            used_knowledge: search.hits,
            lead_score: lead.score,
            lead_level: lead.level,
            lead_signals: lead.signals,
            next_actions: lead.next_actions,
            latency_ms,
            retrieval_ms,
            llm_used,
        })
    }

    /// Non-empty completion text, or `None` when the provider failed or
    /// answered with whitespace.
    async fn generate(&self, chat: &dyn ChatProvider, messages: &[ChatMessage]) -> Option<String> {
        match chat.chat(messages, self.temperature).await {
            Ok(completion) => {
                let text = completion.text.trim();
                if text.is_empty() {
                    tracing::warn!(model = chat.model_name(), "chat returned empty text, using template");
                    None
                } else {
                    tracing::debug!(latency_ms = completion.latency_ms, "chat completion");
                    Some(text.to_string())
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, model = chat.model_name(), "chat failed, using template");
                None
            }
        }
    }
}
