//! Configuration types for the completion client, the executor and the
//! row store.
//!
//! Configuration is resolved once at startup (usually via
//! [`ForgeConfig::from_env`]) and then passed explicitly into constructors.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{DataforgeError, DataforgeResult};
use crate::pipeline::RetryConfig;

/// Environment variable holding the completion API key.
pub const ENV_API_KEY: &str = "CLI_DF_API_KEY";
/// Environment variable holding the completion base URL.
pub const ENV_BASE_URL: &str = "CLI_DF_BASE_URL";
/// Environment variable holding the model name.
pub const ENV_MODEL: &str = "CLI_DF_MODEL";

/// Configuration for the chat-completion endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Model identifier sent with every request.
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL of the OpenAI-compatible API (without `/chat/completions`).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token for the API.
    #[serde(default)]
    pub api_key: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on generated tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: f64,
    /// Application name, sent as `X-Title`.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Optional site URL, sent as `HTTP-Referer`.
    #[serde(default)]
    pub site_url: Option<String>,
    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_base_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_temperature() -> f32 {
    1.2
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_request_timeout() -> f64 {
    120.0
}

fn default_app_name() -> String {
    "cliDataForge".to_string()
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_seconds: default_request_timeout(),
            app_name: default_app_name(),
            site_url: None,
            retry: RetryConfig::default(),
        }
    }
}

impl CompletionConfig {
    /// Creates a configuration with defaults and the given API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the max token budget.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.request_timeout_seconds = seconds;
        self
    }

    /// Sets the site URL sent as `HTTP-Referer`.
    #[must_use]
    pub fn with_site_url(mut self, url: impl Into<String>) -> Self {
        self.site_url = Some(url.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Full URL of the chat-completions endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Gets the request timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_seconds.max(0.0))
    }
}

impl std::fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("app_name", &self.app_name)
            .field("site_url", &self.site_url)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Configuration for the pipeline executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Number of parallel workers per cycle.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Minimum wall-clock duration of one cycle, in seconds.
    #[serde(default = "default_min_cycle_seconds")]
    pub min_cycle_seconds: f64,
    /// Total completion attempts per row (initial call included).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    /// Consecutive cycles in which every claim attempt failed before the
    /// last claim error stops the run.
    #[serde(default = "default_max_claim_error_cycles")]
    pub max_claim_error_cycles: usize,
}

fn default_threads() -> usize {
    1
}

fn default_min_cycle_seconds() -> f64 {
    15.0
}

fn default_retry_attempts() -> usize {
    3
}

fn default_max_claim_error_cycles() -> usize {
    5
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            min_cycle_seconds: default_min_cycle_seconds(),
            retry_attempts: default_retry_attempts(),
            max_claim_error_cycles: default_max_claim_error_cycles(),
        }
    }
}

impl ExecutorConfig {
    /// Creates a new executor configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the minimum cycle duration.
    #[must_use]
    pub fn with_min_cycle_seconds(mut self, seconds: f64) -> Self {
        self.min_cycle_seconds = seconds;
        self
    }

    /// Sets the number of completion attempts.
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: usize) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Sets how many error-only cycles in a row are tolerated.
    #[must_use]
    pub fn with_max_claim_error_cycles(mut self, cycles: usize) -> Self {
        self.max_claim_error_cycles = cycles;
        self
    }

    /// Gets the minimum cycle duration.
    #[must_use]
    pub fn min_cycle(&self) -> Duration {
        Duration::from_secs_f64(self.min_cycle_seconds.max(0.0))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DataforgeResult<()> {
        if self.threads == 0 {
            return Err(DataforgeError::Config("threads must be at least 1".into()));
        }
        if !self.min_cycle_seconds.is_finite() || self.min_cycle_seconds < 0.0 {
            return Err(DataforgeError::Config(
                "min_cycle_seconds must be a non-negative number".into(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(DataforgeError::Config(
                "retry_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for the PostgreSQL row store.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    #[serde(default = "default_db_host")]
    pub host: String,
    /// Database port.
    #[serde(default = "default_db_port")]
    pub port: u16,
    /// Database name.
    #[serde(default = "default_db_name")]
    pub name: String,
    /// Database user.
    #[serde(default = "default_db_user")]
    pub user: String,
    /// Database password.
    #[serde(default)]
    pub password: Option<String>,
    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
    /// Table holding system prompts.
    #[serde(default = "default_prompt_table")]
    pub prompt_table: String,
    /// Integer primary key column of processing tables.
    #[serde(default = "default_key_column")]
    pub key_column: String,
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "llmdata".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_prompt_table() -> String {
    "cliDataForgeSystem".to_string()
}

fn default_key_column() -> String {
    "index".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            name: default_db_name(),
            user: default_db_user(),
            password: None,
            max_connections: default_max_connections(),
            acquire_timeout_seconds: default_acquire_timeout(),
            prompt_table: default_prompt_table(),
            key_column: default_key_column(),
        }
    }
}

impl DatabaseConfig {
    /// Sets the prompt table.
    #[must_use]
    pub fn with_prompt_table(mut self, table: impl Into<String>) -> Self {
        self.prompt_table = table.into();
        self
    }

    /// Sets the key column.
    #[must_use]
    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    /// Gets the pool acquire timeout.
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("max_connections", &self.max_connections)
            .field("prompt_table", &self.prompt_table)
            .field("key_column", &self.key_column)
            .finish_non_exhaustive()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeConfig {
    /// Completion client settings.
    #[serde(default)]
    pub completion: CompletionConfig,
    /// Executor settings.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Row store settings.
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl ForgeConfig {
    /// Builds a configuration from the process environment.
    ///
    /// Reads `CLI_DF_API_KEY`, `CLI_DF_BASE_URL`, `CLI_DF_MODEL` and the
    /// `DB_*` connection variables. Missing variables fall back to defaults.
    pub fn from_env() -> DataforgeResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> DataforgeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(key) = lookup(ENV_API_KEY) {
            config.completion.api_key = key;
        }
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            config.completion.base_url = url;
        }
        if let Some(model) = lookup(ENV_MODEL).filter(|v| !v.trim().is_empty()) {
            config.completion.model = model;
        }

        let db = &mut config.database;
        if let Some(name) = lookup("DB_NAME") {
            db.name = name;
        }
        if let Some(user) = lookup("DB_USER") {
            db.user = user;
        }
        db.password = lookup("DB_PASSWORD");
        if let Some(host) = lookup("DB_HOST") {
            db.host = host;
        }
        if let Some(port) = lookup("DB_PORT") {
            db.port = port
                .trim()
                .parse()
                .map_err(|_| DataforgeError::Config(format!("DB_PORT is not a port number: {port}")))?;
        }

        Ok(config)
    }

    /// Sets the executor configuration.
    #[must_use]
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Completion settings with the executor's attempt budget applied.
    #[must_use]
    pub fn effective_completion(&self) -> CompletionConfig {
        let mut completion = self.completion.clone();
        completion.retry.max_attempts = self.executor.retry_attempts;
        completion
    }

    /// Validates the whole configuration.
    pub fn validate(&self) -> DataforgeResult<()> {
        self.executor.validate()?;
        if self.completion.api_key.trim().is_empty() {
            return Err(DataforgeError::Config(format!(
                "API key not found; set {ENV_API_KEY}"
            )));
        }
        if self.completion.model.trim().is_empty() {
            return Err(DataforgeError::Config("model must not be empty".into()));
        }
        Ok(())
    }
}
