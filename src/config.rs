use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone, Default, Validate)]
pub struct Config {
    #[serde(default)]
    pub ai: AIConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    #[validate]
    pub executor: ExecutorConfig,
    #[serde(default)]
    #[validate]
    pub fixer: FixerConfig,
    #[serde(default)]
    #[validate]
    pub search: SearchConfig,
    #[serde(default)]
    #[validate]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AIConfig {
    pub enabled: bool,
    pub provider: AIProvider,
    pub model: String,
    pub max_tokens: u32,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    #[serde(skip)]
    pub api_url: Option<String>,
}

impl Default for AIConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: AIProvider::Anthropic,
            model: "claude-3-haiku-20240307".to_string(),
            max_tokens: 1000,
            anthropic_api_key: None,
            openai_api_key: None,
            api_url: None,
        }
    }
}

impl AIConfig {
    pub fn api_key(&self) -> Option<&str> {
        match self.provider {
            AIProvider::Anthropic => self.anthropic_api_key.as_deref(),
            AIProvider::OpenAI => self.openai_api_key.as_deref(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AIProvider {
    Anthropic,
    OpenAI,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Extra substrings that make the runner refuse a command, on top of the built-in deny-list.
    pub dangerous_commands: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
#[serde(default)]
pub struct ExecutorConfig {
    #[validate(range(min = 1, message = "timeout must be at least one second"))]
    pub timeout_secs: u64,
    pub kill_grace_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            kill_grace_ms: 2000,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
#[serde(default)]
pub struct FixerConfig {
    #[validate(range(min = 1, max = 20, message = "max_attempts must be between 1 and 20"))]
    pub max_attempts: u32,
    pub git_enabled: bool,
    pub retry_backoff_ms: u64,
    pub git_author_name: String,
    pub git_author_email: String,
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            git_enabled: true,
            retry_backoff_ms: 1000,
            git_author_name: "shellmend".to_string(),
            git_author_email: "shellmend@localhost".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    #[validate(range(min = 1, max = 20, message = "top_n must be between 1 and 20"))]
    pub top_n: usize,
    #[validate(range(min = 1, max = 50))]
    pub results_per_provider: usize,
    pub stackexchange_url: String,
    pub google_search_url: String,
    pub google_api_key: Option<String>,
    pub google_search_engine_id: Option<String>,
    #[validate(range(min = 1, max = 10))]
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_n: 3,
            results_per_provider: 5,
            stackexchange_url: "https://api.stackexchange.com/2.3/search".to_string(),
            google_search_url: "https://www.googleapis.com/customsearch/v1".to_string(),
            google_api_key: None,
            google_search_engine_id: None,
            max_retries: 3,
            initial_retry_delay_ms: 500,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Hashing,
    OpenAI,
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub enabled: bool,
    pub store_dir: Option<PathBuf>,
    #[validate(range(min = 1, message = "flush_batch must be at least 1"))]
    pub flush_batch: usize,
    #[validate(range(min = 8, message = "dimension must be at least 8"))]
    pub dimension: usize,
    pub embedding: EmbeddingBackend,
    pub embedding_model: String,
    pub top_k: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_dir: None,
            flush_batch: 10,
            dimension: 256,
            embedding: EmbeddingBackend::Hashing,
            embedding_model: "text-embedding-3-small".to_string(),
            top_k: 5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

impl Config {
    pub fn create_default(path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())?;
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("Config path has no parent: {:?}", path))?;
        fs::create_dir_all(parent)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config at {:?}", path))?;
        config
            .validate()
            .map_err(|e| anyhow!("Config validation failed: {}", e))?;
        Ok(config)
    }

    /// Loads the config file, writing the defaults first when it does not exist yet,
    /// then applies `.env` and environment overrides.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            Self::create_default(path)?;
            tracing::info!(path = %path.display(), "created default config");
        }
        let mut config = Self::load(path)?;
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        dotenv::dotenv().ok();
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            self.ai.anthropic_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.ai.openai_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("GOOGLE_API_KEY") {
            self.search.google_api_key = Some(key);
        }
        if let Ok(id) = std::env::var("GOOGLE_SEARCH_ENGINE_ID") {
            self.search.google_search_engine_id = Some(id);
        }
    }

    pub fn knowledge_dir(&self) -> Result<PathBuf> {
        match &self.knowledge.store_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(data_dir()?.join("knowledge")),
        }
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        match &self.logging.directory {
            Some(dir) => Ok(dir.clone()),
            None => Ok(data_dir()?.join("logs")),
        }
    }

    pub fn journal_dir(&self) -> Result<PathBuf> {
        Ok(data_dir()?.join("journal"))
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "shellmend", "shellmend")
        .ok_or_else(|| anyhow!("Could not determine config directory"))
}

pub fn get_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}
