use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration structure for the coverage agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Coverage percentage at which the loop stops (0-100)
    #[serde(default = "default_target_coverage")]
    pub target_coverage: f64,

    /// Hard ceiling on session iterations
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Where the resumable session state is written
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Generation backend configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Retry policy for transient backend failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Client-side request pacing
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Artifact validation policy
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Version-control snapshots of passing artifacts
    #[serde(default)]
    pub vcs: VcsConfig,
}

const fn default_target_coverage() -> f64 {
    80.0
}

const fn default_max_iterations() -> u32 {
    100
}

fn default_state_file() -> PathBuf {
    PathBuf::from(".coverage-agent-state.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_coverage: default_target_coverage(),
            max_iterations: default_max_iterations(),
            state_file: default_state_file(),
            logging: LoggingConfig::default(),
            generation: GenerationConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            validation: ValidationConfig::default(),
            vcs: VcsConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json, pretty or compact
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stderr only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Generation backend configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GenerationConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request HTTP timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Wait applied to a throttled response that carries no retry-after
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: u64,

    /// Backend credential. Never serialized.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("default_retry_after_secs", &self.default_retry_after_secs)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

const fn default_max_tokens() -> u32 {
    8000
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

const fn default_timeout_secs() -> u64 {
    120
}

const fn default_retry_after_secs() -> u64 {
    60
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            default_retry_after_secs: default_retry_after_secs(),
            api_key: None,
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_initial_backoff_ms() -> u64 {
    2000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

const fn default_requests_per_minute() -> u32 {
    50
}

const fn default_burst_size() -> u32 {
    5
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst_size: default_burst_size(),
        }
    }
}

/// What to do when the toolchain itself cannot run during validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorPolicy {
    /// Stop the session and surface the error
    #[default]
    FailFast,
    /// Record the unit as failed and move on
    MarkAndContinue,
}

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ValidationConfig {
    /// Repairs attempted per artifact before the unit is marked failed
    #[serde(default = "default_max_repair_retries")]
    pub max_repair_retries: u32,

    /// Timeout for every toolchain invocation
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    #[serde(default)]
    pub on_tool_error: ToolErrorPolicy,

    /// Restore an artifact's previous contents when it does not pass
    #[serde(default = "default_true")]
    pub rollback_failed_artifacts: bool,
}

const fn default_max_repair_retries() -> u32 {
    2
}

const fn default_tool_timeout_secs() -> u64 {
    600
}

const fn default_true() -> bool {
    true
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_repair_retries: default_max_repair_retries(),
            tool_timeout_secs: default_tool_timeout_secs(),
            on_tool_error: ToolErrorPolicy::default(),
            rollback_failed_artifacts: default_true(),
        }
    }
}

/// Version-control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VcsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Create a dedicated branch when a new session starts
    #[serde(default = "default_true")]
    pub create_branch: bool,

    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

fn default_branch_prefix() -> String {
    "test-coverage-agent".to_string()
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            create_branch: default_true(),
            branch_prefix: default_branch_prefix(),
        }
    }
}
