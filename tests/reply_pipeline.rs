//! End-to-end tests for reply synthesis: template fallback, chat output
//! policy, prompt contents, and event recording.

mod common;

use anyhow::Result;
use async_trait::async_trait;
use comment_triage::intent::Intent;
use comment_triage::leads::LeadLevel;
use comment_triage::models::ReplyEvent;
use comment_triage::monitor::{EventSink, SqliteEventSink};
use comment_triage::reply::chat::{ChatCompletion, ChatMessage, ChatProvider};
use comment_triage::reply::templates::fallback_template;
use comment_triage::reply::{ReplyRequest, ReplyService};
use comment_triage::TriageError;
use std::sync::{Arc, Mutex};

// ─── Test Providers ─────────────────────────────────────────────────

/// Answers every conversation with a fixed text and remembers the prompts.
struct ScriptedChat {
    answer: String,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn last_user_message(&self) -> String {
        let seen = self.seen.lock().unwrap();
        seen.last().unwrap()[1].content.clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _temperature: f32,
    ) -> comment_triage::Result<ChatCompletion> {
        self.seen.lock().unwrap().push(messages.to_vec());
        Ok(ChatCompletion {
            text: self.answer.clone(),
            latency_ms: 1,
        })
    }
}

struct BrokenChat;

#[async_trait]
impl ChatProvider for BrokenChat {
    fn model_name(&self) -> &str {
        "broken"
    }

    async fn chat(&self, _: &[ChatMessage], _: f32) -> comment_triage::Result<ChatCompletion> {
        Err(TriageError::ExternalService("chat API error 503".to_string()))
    }
}

struct BrokenSink;

#[async_trait]
impl EventSink for BrokenSink {
    async fn record(&self, _event: &ReplyEvent) -> comment_triage::Result<()> {
        Err(TriageError::ExternalService("sink offline".to_string()))
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

struct Fixture {
    h: common::Harness,
    kb_id: String,
    events: SqliteEventSink,
}

/// A base with one indexed warranty item at version 1.
async fn fixture() -> Result<Fixture> {
    let h = common::setup().await?;
    let kb = h.store.ensure_default_knowledge_base().await?;
    h.store
        .create_item(&kb.id, "warranty", "质保", "", "整机质保一年\n\n电池质保半年", "manual")
        .await?;
    let version = h.store.publish_kb(&kb.id).await?;
    h.retriever.reindex(&kb.id, version).await?;
    let events = SqliteEventSink::new(h.pool.clone());
    Ok(Fixture {
        kb_id: kb.id,
        events,
        h,
    })
}

fn service(f: &Fixture, chat: Option<Arc<dyn ChatProvider>>) -> ReplyService {
    ReplyService::new(
        f.h.retriever.clone(),
        chat,
        Arc::new(f.events.clone()),
        &f.h.config.reply,
        &f.h.config.chat,
    )
}

fn request(f: &Fixture, comment: &str) -> ReplyRequest {
    let mut req = ReplyRequest::new(&f.kb_id, comment);
    req.note_id = "note-1".to_string();
    req.comment_id = "c-1".to_string();
    req.note_title = "这款到底值不值".to_string();
    req
}

// ─── Template path ──────────────────────────────────────────────────

#[tokio::test]
async fn test_without_chat_question_gets_template() -> Result<()> {
    let f = fixture().await?;
    let replies = service(&f, None);
    assert!(!replies.has_chat());

    let outcome = replies.synthesize(&request(&f, "这个怎么用？")).await?;

    assert_eq!(outcome.intent, Intent::Question);
    assert_eq!(outcome.reply, fallback_template(Intent::Question));
    assert!(!outcome.llm_used);
    assert_eq!(outcome.kb_version, 1);
    assert_eq!(outcome.used_knowledge.len(), 2);
    assert_eq!(outcome.lead_level, LeadLevel::Low);
    assert_eq!(outcome.intent_reasons, vec!["question_pattern".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_empty_comment_gets_empty_template() -> Result<()> {
    let f = fixture().await?;
    let outcome = service(&f, None).synthesize(&request(&f, "   ")).await?;

    assert_eq!(outcome.intent, Intent::Empty);
    assert_eq!(outcome.reply, fallback_template(Intent::Empty));
    assert_eq!(outcome.lead_score, 0);
    Ok(())
}

#[tokio::test]
async fn test_failing_chat_falls_back_to_template() -> Result<()> {
    let f = fixture().await?;
    let replies = service(&f, Some(Arc::new(BrokenChat)));

    let outcome = replies.synthesize(&request(&f, "有货吗？怎么买")).await?;

    assert_eq!(outcome.intent, Intent::BuyIntent);
    assert_eq!(outcome.reply, fallback_template(Intent::BuyIntent));
    assert!(!outcome.llm_used);
    assert_eq!(outcome.lead_level, LeadLevel::High);
    assert!(!outcome.next_actions.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_blank_chat_answer_falls_back_to_template() -> Result<()> {
    let f = fixture().await?;
    let replies = service(&f, Some(ScriptedChat::new("  \n ")));

    let outcome = replies.synthesize(&request(&f, "好看！")).await?;

    assert_eq!(outcome.intent, Intent::Praise);
    assert_eq!(outcome.reply, fallback_template(Intent::Praise));
    assert!(!outcome.llm_used);
    Ok(())
}

// ─── Chat path ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_reply_is_redacted() -> Result<()> {
    let f = fixture().await?;
    let chat = ScriptedChat::new("欢迎咨询 13812345678 或访问 https://shop.example.com/item?id=9 了解");
    let replies = service(&f, Some(chat));

    let outcome = replies.synthesize(&request(&f, "电池质保多久？")).await?;

    assert!(outcome.llm_used);
    assert_eq!(outcome.reply, "欢迎咨询 [号码已隐藏] 或访问 [链接已隐藏] 了解");
    Ok(())
}

#[tokio::test]
async fn test_chat_reply_is_truncated() -> Result<()> {
    let f = fixture().await?;
    let mut reply_config = f.h.config.reply.clone();
    reply_config.max_chars = 10;
    let replies = ReplyService::new(
        f.h.retriever.clone(),
        Some(ScriptedChat::new(&"好".repeat(50))),
        Arc::new(f.events.clone()),
        &reply_config,
        &f.h.config.chat,
    );

    let outcome = replies.synthesize(&request(&f, "厉害")).await?;

    assert!(outcome.llm_used);
    assert_eq!(outcome.reply.chars().count(), 10);
    assert!(outcome.reply.ends_with('…'));
    Ok(())
}

#[tokio::test]
async fn test_prompt_carries_knowledge_and_sales_hint() -> Result<()> {
    let f = fixture().await?;
    let chat = ScriptedChat::new("整机一年、电池半年哦");
    let replies = service(&f, Some(chat.clone()));

    replies.synthesize(&request(&f, "电池质保多久？")).await?;
    let prompt = chat.last_user_message();
    assert!(prompt.contains("- 电池质保半年"));
    assert!(prompt.contains("- 整机质保一年"));
    assert!(prompt.contains("帖子标题：这款到底值不值"));
    assert!(prompt.contains("意图：question"));
    assert!(prompt.contains("避免硬广"));

    let mut quiet = request(&f, "电池质保多久？");
    quiet.inject_sales = false;
    replies.synthesize(&quiet).await?;
    assert!(!chat.last_user_message().contains("避免硬广"));

    // Praise never gets the hint, even when requested.
    replies.synthesize(&request(&f, "好看")).await?;
    assert!(!chat.last_user_message().contains("避免硬广"));
    Ok(())
}

// ─── Events ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reply_records_event() -> Result<()> {
    let f = fixture().await?;
    let replies = service(&f, None);
    replies.synthesize(&request(&f, "有货吗？怎么买")).await?;
    replies.synthesize(&request(&f, "这个怎么用？")).await?;

    let top = f.events.note_top_leads("note-1", 10).await?;
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].intent, "buy_intent");
    assert_eq!(top[0].lead_level, "high");
    assert_eq!(top[0].kb_version, 1);
    assert!(!top[0].llm_used);

    let meta: serde_json::Value = serde_json::from_str(&top[1].meta_json)?;
    assert!(meta["retrieval_ms"].is_i64());
    assert_eq!(meta["intent_reasons"], serde_json::json!(["question_pattern"]));

    let overview = f.events.overview(None, None).await?;
    assert_eq!(overview.total_replies, 2);
    assert_eq!(overview.llm_rate, 0.0);
    assert_eq!(overview.lead_high, 1);
    assert_eq!(overview.intent_counts.get("question"), Some(&1));
    Ok(())
}

#[tokio::test]
async fn test_sink_failure_does_not_fail_reply() -> Result<()> {
    let f = fixture().await?;
    let replies = ReplyService::new(
        f.h.retriever.clone(),
        None,
        Arc::new(BrokenSink),
        &f.h.config.reply,
        &f.h.config.chat,
    );

    let outcome = replies.synthesize(&request(&f, "这个怎么用？")).await?;
    assert_eq!(outcome.reply, fallback_template(Intent::Question));
    Ok(())
}

#[tokio::test]
async fn test_unindexed_base_still_replies() -> Result<()> {
    let h = common::setup().await?;
    let kb = h.store.ensure_default_knowledge_base().await?;
    let replies = ReplyService::new(
        h.retriever.clone(),
        None,
        Arc::new(SqliteEventSink::new(h.pool.clone())),
        &h.config.reply,
        &h.config.chat,
    );

    let outcome = replies.synthesize(&ReplyRequest::new(&kb.id, "踩雷了，失望")).await?;
    assert_eq!(outcome.intent, Intent::Complaint);
    assert!(outcome.used_knowledge.is_empty());
    assert_eq!(outcome.kb_version, 0);
    assert_eq!(outcome.reply, fallback_template(Intent::Complaint));
    Ok(())
}
