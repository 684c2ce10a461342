//! # Comment Triage
//!
//! Knowledge-grounded triage for social-post comments.
//!
//! Given an incoming comment, the crate classifies its intent, estimates
//! purchase likelihood, retrieves relevant knowledge from a versioned
//! knowledge base, and synthesizes a short reply that never leaks contact
//! details. The HTTP layer, CLI, and raw export ingestion live elsewhere;
//! this crate exposes plain async services over a SQLite pool.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Knowledge   │──▶│   Reindex    │──▶│ Vector index │
//! │ bases/items/ │   │ embed+build  │   │ flat/parallel│
//! │ revisions    │   └──────────────┘   └──────┬───────┘
//! └──────┬───────┘                             │
//!        │ chunks                              ▼
//!        │                             ┌──────────────┐
//!        └────────────────────────────▶│ Hybrid search│
//!                                      │ vector+fuzzy │
//!                                      └──────┬───────┘
//!  comment ─▶ intent + lead score ───────────▶│
//!                                             ▼
//!                                      ┌──────────────┐   ┌──────────┐
//!                                      │    Reply     │──▶│  Events  │
//!                                      │ chat/template│   │ monitor  │
//!                                      └──────────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use comment_triage::config::Config;
//! use comment_triage::knowledge::KnowledgeStore;
//! use comment_triage::monitor::SqliteEventSink;
//! use comment_triage::reply::{chat::create_chat_provider, ReplyRequest, ReplyService};
//! use comment_triage::search::Retriever;
//! use comment_triage::{db, embedding, migrate};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::with_data_dir(std::path::Path::new("./data"));
//! let pool = db::connect(&config).await?;
//! migrate::run_migrations(&pool).await?;
//!
//! let store = KnowledgeStore::new(pool.clone(), &config.knowledge);
//! let kb = store.ensure_default_knowledge_base().await?;
//! store
//!     .create_item(&kb.id, "warranty", "质保", "", "整机质保一年。\n\n电池质保半年。", "manual")
//!     .await?;
//! let version = store.publish_kb(&kb.id).await?;
//!
//! let retriever = Retriever::new(store, &config, embedding::create_provider(&config.embedding)?)?;
//! retriever.reindex(&kb.id, version).await?;
//!
//! let replies = ReplyService::new(
//!     retriever,
//!     create_chat_provider(&config.chat)?,
//!     Arc::new(SqliteEventSink::new(pool)),
//!     &config.reply,
//!     &config.chat,
//! );
//! let outcome = replies.synthesize(&ReplyRequest::new(&kb.id, "质保多久？")).await?;
//! println!("{} ({})", outcome.reply, outcome.intent);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite pool construction |
//! | [`migrate`] | Schema migrations |
//! | [`models`] | Row types |
//! | [`error`] | Error taxonomy |
//! | [`chunk`] | Paragraph chunker |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector`] | Vector index backends and artifact format |
//! | [`knowledge`] | Versioned knowledge store |
//! | [`lexical`] | Fuzzy partial-match similarity |
//! | [`search`] | Hybrid retrieval and query logs |
//! | [`reindex`] | Index rebuild with atomic swap |
//! | [`intent`] | Intent rule table |
//! | [`leads`] | Lead scoring |
//! | [`reply`] | Reply synthesis pipeline |
//! | [`monitor`] | Reply events and aggregates |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod intent;
pub mod knowledge;
pub mod leads;
pub mod lexical;
pub mod migrate;
pub mod models;
pub mod monitor;
pub mod reindex;
pub mod reply;
pub mod search;
pub mod vector;

pub use error::{Result, TriageError};
