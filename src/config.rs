//! Process-wide pipeline configuration.
//!
//! All tunables are resolved once at startup (environment first, then
//! defaults) into an immutable [`PipelineConfig`] that is injected into
//! the orchestrator factory. Nothing in here is mutated after startup.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

/// Hard upper bound on Writer-revise → Judge-reverify passes.
pub const MAX_REVISION_CYCLES: u32 = 2;

/// Minimum similarity score a chunk must reach to enter the context.
pub const RETRIEVAL_THRESHOLD: f64 = 0.3;

/// Maximum number of chunks assembled into the context block.
pub const RETRIEVAL_LIMIT: usize = 15;

/// Number of streamed deltas between two progress-record writes.
pub const STREAM_UPDATE_EVERY: usize = 10;

/// Conversation history is clamped to this many trailing messages.
pub const HISTORY_MESSAGE_CAP: usize = 12;

/// Evidence coverage required to accept a response on cycles 0 and 1.
pub const COVERAGE_TARGET_DEFAULT: f64 = 0.85;

/// Relaxed acceptance ceiling applied on the final revision cycle.
pub const COVERAGE_TARGET_RELAXED: f64 = 0.70;

/// Unsupported-claim rate above which a revision is forced.
pub const UNSUPPORTED_RATE_LIMIT: f64 = 0.05;

const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_WRITER_MODEL: &str = "anthropic/claude-sonnet-4";
const DEFAULT_SKEPTIC_MODEL: &str = "openai/gpt-4o-mini";
const DEFAULT_JUDGE_MODEL: &str = "openai/gpt-4o";

/// Errors raised while resolving configuration at startup.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("missing required environment variable: {name}")]
    #[diagnostic(
        code(veriweave::config::missing_var),
        help("Set {name} in the environment or a .env file before starting.")
    )]
    MissingVar { name: &'static str },

    #[error("invalid value for {name}: {value}")]
    #[diagnostic(
        code(veriweave::config::invalid_var),
        help("Check that {name} parses as the expected numeric type.")
    )]
    InvalidVar { name: &'static str, value: String },
}

/// Immutable configuration for the verification pipeline.
///
/// Built once via [`PipelineConfig::from_env`] and shared by reference;
/// secrets (the API key, attribution headers) live here for the whole
/// process lifetime.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Bearer token for the model backend.
    pub api_key: String,
    /// Base URL of the OpenRouter-compatible chat-completion endpoint.
    pub api_base_url: String,
    /// Attribution header `HTTP-Referer`.
    pub http_referer: String,
    /// Attribution header `X-Title`.
    pub app_title: String,
    pub writer_model: String,
    pub skeptic_model: String,
    pub judge_model: String,
    pub max_revision_cycles: u32,
    pub retrieval_threshold: f64,
    pub retrieval_limit: usize,
    pub stream_update_every: usize,
    pub history_message_cap: usize,
    pub coverage_target_default: f64,
    pub coverage_target_relaxed: f64,
    pub unsupported_rate_limit: f64,
    /// Total wall-clock budget for one session.
    pub session_timeout: Duration,
    /// Maximum concurrently running sessions; `None` means unbounded.
    pub admission_limit: Option<usize>,
}

impl PipelineConfig {
    /// Resolve configuration from the environment (a `.env` file is
    /// honored if present). `MODEL_API_KEY` is the only required value.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_key = std::env::var("MODEL_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingVar {
                name: "MODEL_API_KEY",
            })?;

        Ok(Self {
            api_key,
            api_base_url: env_or("MODEL_API_BASE_URL", "https://openrouter.ai/api/v1"),
            http_referer: env_or("MODEL_HTTP_REFERER", "https://veriweave.dev"),
            app_title: env_or("MODEL_APP_TITLE", "veriweave"),
            writer_model: env_or("WRITER_MODEL", DEFAULT_WRITER_MODEL),
            skeptic_model: env_or("SKEPTIC_MODEL", DEFAULT_SKEPTIC_MODEL),
            judge_model: env_or("JUDGE_MODEL", DEFAULT_JUDGE_MODEL),
            max_revision_cycles: parse_or("MAX_REVISION_CYCLES", MAX_REVISION_CYCLES)?,
            retrieval_threshold: parse_or("RETRIEVAL_THRESHOLD", RETRIEVAL_THRESHOLD)?,
            retrieval_limit: parse_or("RETRIEVAL_LIMIT", RETRIEVAL_LIMIT)?,
            stream_update_every: parse_or("STREAM_UPDATE_EVERY", STREAM_UPDATE_EVERY)?,
            history_message_cap: parse_or("HISTORY_MESSAGE_CAP", HISTORY_MESSAGE_CAP)?,
            coverage_target_default: parse_or("COVERAGE_TARGET_DEFAULT", COVERAGE_TARGET_DEFAULT)?,
            coverage_target_relaxed: parse_or("COVERAGE_TARGET_RELAXED", COVERAGE_TARGET_RELAXED)?,
            unsupported_rate_limit: UNSUPPORTED_RATE_LIMIT,
            session_timeout: Duration::from_secs(parse_or(
                "SESSION_TIMEOUT_SECS",
                DEFAULT_SESSION_TIMEOUT_SECS,
            )?),
            admission_limit: match parse_or("ADMISSION_LIMIT", 0usize)? {
                0 => None,
                n => Some(n),
            },
        })
    }

    /// A configuration suitable for tests: no real secrets, default
    /// tunables, no admission limit.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            api_key: "test-key".into(),
            api_base_url: "http://127.0.0.1:0".into(),
            http_referer: "https://veriweave.dev".into(),
            app_title: "veriweave".into(),
            writer_model: DEFAULT_WRITER_MODEL.into(),
            skeptic_model: DEFAULT_SKEPTIC_MODEL.into(),
            judge_model: DEFAULT_JUDGE_MODEL.into(),
            max_revision_cycles: MAX_REVISION_CYCLES,
            retrieval_threshold: RETRIEVAL_THRESHOLD,
            retrieval_limit: RETRIEVAL_LIMIT,
            stream_update_every: STREAM_UPDATE_EVERY,
            history_message_cap: HISTORY_MESSAGE_CAP,
            coverage_target_default: COVERAGE_TARGET_DEFAULT,
            coverage_target_relaxed: COVERAGE_TARGET_RELAXED,
            unsupported_rate_limit: UNSUPPORTED_RATE_LIMIT,
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            admission_limit: None,
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidVar {
                    name,
                    value: raw.clone(),
                })
        }
        _ => Ok(default),
    }
}
