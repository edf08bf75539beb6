//! Application Configuration Module
//!
//! Loads the interview service settings from environment variables (and a
//! `.env` file when present) into a single struct that `main` hands out to
//! the pieces it wires together.

use interview_core::OrchestratorConfig;
use secrecy::SecretString;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Which interviewer answers the candidate.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterviewerProvider {
    Gemini,
    /// Offline, fixed question list. Needs no API key.
    Scripted,
}

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: InterviewerProvider,
    pub gemini_api_key: Option<SecretString>,
    pub model: String,
    pub max_questions: u32,
    pub retry_backoff: Duration,
    pub remote_timeout: Duration,
    pub persist_timeout: Duration,
    /// `None` retries failed interviewer calls forever.
    pub max_consecutive_failures: Option<u32>,
    pub sessions_dir: PathBuf,
    pub prompts_dir: Option<PathBuf>,
    /// Simulated speaking time per word of interviewer text.
    pub speech_ms_per_word: Duration,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {var}: {value}")]
    InvalidNumber { var: String, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `INTERVIEWER_PROVIDER`: "gemini" or "scripted". Defaults to "gemini".
    // *   `GEMINI_API_KEY`: Required if provider is "gemini".
    // *   `INTERVIEWER_MODEL`: (Optional) Gemini model. Defaults to "gemini-2.0-flash".
    // *   `MAX_QUESTIONS`: (Optional) Questions before the interviewer wraps up. Defaults to 5.
    // *   `RETRY_BACKOFF_MS`: (Optional) Pause before listening again after a failed call. Defaults to 2000.
    // *   `REMOTE_TIMEOUT_SECS`: (Optional) Limit on each interviewer call. Defaults to 30.
    // *   `MAX_CONSECUTIVE_FAILURES`: (Optional) Failed calls in a row before giving up; 0 never gives up. Defaults to 5.
    // *   `SESSIONS_DIR`: (Optional) Where finished sessions are written. Defaults to "sessions".
    // *   `PROMPTS_DIR`: (Optional) Directory of `.md` templates overriding the built-in prompts.
    // *   `SPEECH_MS_PER_WORD`: (Optional) Simulated speaking time per word. Defaults to 0.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let provider = match lookup("INTERVIEWER_PROVIDER")
            .unwrap_or_else(|| "gemini".to_string())
            .to_lowercase()
            .as_str()
        {
            "scripted" => InterviewerProvider::Scripted,
            // Default to Gemini for "gemini" or any other value
            _ => InterviewerProvider::Gemini,
        };

        let gemini_api_key = lookup("GEMINI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from);
        let model = lookup("INTERVIEWER_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string());

        let max_questions = number(&lookup, "MAX_QUESTIONS", 5u32)?;
        let retry_backoff = Duration::from_millis(number(&lookup, "RETRY_BACKOFF_MS", 2000u64)?);
        let remote_timeout = Duration::from_secs(number(&lookup, "REMOTE_TIMEOUT_SECS", 30u64)?);
        let max_consecutive_failures =
            match number(&lookup, "MAX_CONSECUTIVE_FAILURES", 5u32)? {
                0 => None,
                n => Some(n),
            };
        let speech_ms_per_word =
            Duration::from_millis(number(&lookup, "SPEECH_MS_PER_WORD", 0u64)?);

        let sessions_dir = lookup("SESSIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("sessions"));
        let prompts_dir = lookup("PROMPTS_DIR").map(PathBuf::from);

        // Configure logging level from RUST_LOG, with a sensible default.
        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        let config = Self {
            provider,
            gemini_api_key,
            model,
            max_questions,
            retry_backoff,
            remote_timeout,
            persist_timeout: OrchestratorConfig::default().persist_timeout,
            max_consecutive_failures,
            sessions_dir,
            prompts_dir,
            speech_ms_per_word,
            log_level,
        };

        if config.provider == InterviewerProvider::Gemini && config.gemini_api_key.is_none() {
            return Err(ConfigError::MissingVar(
                "GEMINI_API_KEY must be set for gemini provider".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            retry_backoff: self.retry_backoff,
            remote_timeout: self.remote_timeout,
            persist_timeout: self.persist_timeout,
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

fn number<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            var: var.to_string(),
            value,
        }),
    }
}
