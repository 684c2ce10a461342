use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub vector: VectorConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// Directory under which `<kb_id>/<kb_version>/index-<id>.vec` artifacts live.
    pub root: PathBuf,
    #[serde(default = "default_backend")]
    pub backend: String,
}

fn default_backend() -> String {
    "flat".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Weight of the vector score; the lexical score gets `1 - hybrid_alpha`.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    /// Raw vector candidates fetched per requested hit, before lexical re-ranking.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            candidate_multiplier: default_candidate_multiplier(),
            default_top_k: default_top_k(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.75
}
fn default_candidate_multiplier() -> usize {
    5
}
fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            base_url: None,
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_api_key_env() -> String {
    "GLM_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_embedding_timeout() -> u64 {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_chat_provider(),
            model: None,
            base_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_chat_timeout(),
            temperature: default_temperature(),
        }
    }
}

impl ChatConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_chat_provider() -> String {
    "disabled".to_string()
}
fn default_chat_timeout() -> u64 {
    10
}
fn default_temperature() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReplyConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_knowledge_snippets")]
    pub knowledge_snippets: usize,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            knowledge_snippets: default_knowledge_snippets(),
        }
    }
}

fn default_max_chars() -> usize {
    160
}
fn default_knowledge_snippets() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    #[serde(default = "default_kb_slug")]
    pub default_kb_slug: String,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            default_kb_slug: default_kb_slug(),
        }
    }
}

fn default_kb_slug() -> String {
    "default".to_string()
}

impl Config {
    /// Build a configuration rooted at `data_dir` with every other setting
    /// at its default. Used by tests and embedders that skip the TOML file.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: data_dir.join("triage.sqlite"),
                max_connections: default_max_connections(),
            },
            vector: VectorConfig {
                root: data_dir.join("vectors"),
                backend: default_backend(),
            },
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            chat: ChatConfig::default(),
            reply: ReplyConfig::default(),
            knowledge: KnowledgeConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate retrieval
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if config.retrieval.candidate_multiplier == 0 {
        anyhow::bail!("retrieval.candidate_multiplier must be >= 1");
    }
    if config.retrieval.default_top_k == 0 {
        anyhow::bail!("retrieval.default_top_k must be >= 1");
    }

    // Validate vector backend
    match config.vector.backend.as_str() {
        "flat" => {}
        #[cfg(feature = "parallel-index")]
        "parallel" => {}
        #[cfg(not(feature = "parallel-index"))]
        "parallel" => anyhow::bail!(
            "vector.backend = 'parallel' requires the parallel-index feature"
        ),
        other => anyhow::bail!(
            "Unknown vector backend: '{}'. Must be flat or parallel.",
            other
        ),
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "hash" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be specified when provider is 'openai'");
            }
            if config.embedding.base_url.is_none() {
                anyhow::bail!("embedding.base_url must be specified when provider is 'openai'");
            }
            if config.embedding.dims.is_none() {
                anyhow::bail!("embedding.dims must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash or openai.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }

    // Validate chat
    match config.chat.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.chat.model.is_none() || config.chat.base_url.is_none() {
                anyhow::bail!("chat.model and chat.base_url are required when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown chat provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Validate reply
    if config.reply.max_chars < 2 {
        anyhow::bail!("reply.max_chars must be >= 2");
    }

    Ok(())
}
