//! Configuration loading, validation, and management for ragchat.
//!
//! Loads configuration from `~/.ragchat/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.ragchat/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Display name used in logs and alerts
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Optional file that receives a copy of all log output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Knowledge base and index settings
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Inference engine settings
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Input validation bounds
    #[serde(default)]
    pub security: SecurityConfig,

    /// Caching, concurrency and prompt profile
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Health thresholds and metric windows
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// HTTP/WebSocket gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_app_name() -> String {
    "ragchat".into()
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("app_name", &self.app_name)
            .field("log_file", &self.log_file)
            .field("knowledge", &self.knowledge)
            .field("inference", &self.inference)
            .field("security", &self.security)
            .field("performance", &self.performance)
            .field("monitoring", &self.monitoring)
            .field("gateway", &self.gateway)
            .finish()
    }
}

// ── Knowledge ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Directory of `.txt` / `.md` source documents
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// JSONL passage file written by `ingest`
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Passages requested per query
    #[serde(default = "default_search_k")]
    pub search_k: usize,

    /// Embedding model; `None` means keyword search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("knowledge_base")
}
fn default_index_path() -> PathBuf {
    PathBuf::from("knowledge_index/passages.jsonl")
}
fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_search_k() -> usize {
    3
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            index_path: default_index_path(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            search_k: default_search_k(),
            embedding_model: None,
        }
    }
}

// ── Inference ─────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// OpenAI-compatible base URL (Ollama, vLLM, OpenAI)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts for the inference retry policy
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Stream answer fragments as they are generated
    #[serde(default = "default_true")]
    pub streaming: bool,
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".into()
}
fn default_model() -> String {
    "mistral".into()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    5
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1024
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            streaming: true,
        }
    }
}

impl std::fmt::Debug for InferenceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("streaming", &self.streaming)
            .finish()
    }
}

// ── Security ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_min_query_length")]
    pub min_query_length: usize,

    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
}

fn default_min_query_length() -> usize {
    2
}
fn default_max_query_length() -> usize {
    2000
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            min_query_length: default_min_query_length(),
            max_query_length: default_max_query_length(),
        }
    }
}

// ── Performance ───────────────────────────────────────────────────────────

/// Which prompt template and context budget to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptProfile {
    /// Larger context, richer instructions
    #[default]
    Enhanced,
    /// Smaller context for faster first tokens
    Streamlined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_true")]
    pub enable_caching: bool,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Seconds to wait for an inference slot; 0 waits forever
    #[serde(default = "default_admission_timeout_secs")]
    pub admission_timeout_secs: u64,

    #[serde(default)]
    pub prompt_profile: PromptProfile,
}

fn default_cache_ttl_secs() -> u64 {
    1800
}
fn default_max_concurrent_requests() -> usize {
    4
}
fn default_admission_timeout_secs() -> u64 {
    30
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            cache_ttl_secs: default_cache_ttl_secs(),
            max_concurrent_requests: default_max_concurrent_requests(),
            admission_timeout_secs: default_admission_timeout_secs(),
            prompt_profile: PromptProfile::default(),
        }
    }
}

// ── Monitoring ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Process memory above this forces an unhealthy status
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: f64,

    /// Samples kept for the average response time
    #[serde(default = "default_response_window")]
    pub response_window: usize,
}

fn default_memory_limit_mb() -> f64 {
    1000.0
}
fn default_response_window() -> usize {
    100
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: default_memory_limit_mb(),
            response_window: default_response_window(),
        }
    }
}

// ── Gateway ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl GatewayConfig {
    /// `http://host:port`, the base URL health checks talk to.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from the default path with environment overrides.
    ///
    /// Order of precedence (highest first):
    /// 1. Environment variables (`RAGCHAT_API_KEY`, `RAGCHAT_BASE_URL`, ...)
    /// 2. Config file (`~/.ragchat/config.toml`)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from an explicit path, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("RAGCHAT_API_KEY") {
            self.inference.api_key = Some(key);
        }
        if let Some(url) = lookup("RAGCHAT_BASE_URL") {
            self.inference.base_url = url;
        }
        if let Some(model) = lookup("RAGCHAT_MODEL") {
            self.inference.model = model;
        }
        if let Some(file) = lookup("RAGCHAT_LOG_FILE") {
            self.log_file = Some(PathBuf::from(file));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ragchat")
    }

    /// Validate every bounded setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let k = &self.knowledge;
        check_range("knowledge.chunk_size", k.chunk_size, 100, 2000)?;
        check_range("knowledge.chunk_overlap", k.chunk_overlap, 0, 200)?;
        if k.chunk_overlap >= k.chunk_size {
            return Err(ConfigError::ValidationError(
                "knowledge.chunk_overlap must be smaller than knowledge.chunk_size".into(),
            ));
        }
        check_range("knowledge.search_k", k.search_k, 1, 10)?;

        let i = &self.inference;
        check_range("inference.timeout_secs", i.timeout_secs, 5, 300)?;
        check_range("inference.max_retries", i.max_retries, 1, 10)?;
        if !(0.0..=2.0).contains(&i.temperature) {
            return Err(ConfigError::ValidationError(
                "inference.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if i.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError("inference.base_url must not be empty".into()));
        }

        let s = &self.security;
        check_range("security.min_query_length", s.min_query_length, 1, 10)?;
        check_range("security.max_query_length", s.max_query_length, 10, 5000)?;
        if s.max_query_length <= s.min_query_length {
            return Err(ConfigError::ValidationError(
                "security.max_query_length must be greater than security.min_query_length".into(),
            ));
        }

        let p = &self.performance;
        check_range("performance.cache_ttl_secs", p.cache_ttl_secs, 60, 86_400)?;
        check_range("performance.max_concurrent_requests", p.max_concurrent_requests, 1, 50)?;

        if self.monitoring.response_window == 0 {
            return Err(ConfigError::ValidationError(
                "monitoring.response_window must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.inference.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn check_range<T>(field: &str, value: T, min: T, max: T) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(ConfigError::ValidationError(format!(
            "{field} must be between {min} and {max} (got {value})"
        )));
    }
    Ok(())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            log_file: None,
            knowledge: KnowledgeConfig::default(),
            inference: InferenceConfig::default(),
            security: SecurityConfig::default(),
            performance: PerformanceConfig::default(),
            monitoring: MonitoringConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
