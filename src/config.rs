//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// System prompt that frames every job conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You're an autonomous system administrator managing a server non-interactively. \
Your objective is to print the next command to run to complete the task and NOTHING ELSE! \
You MUST FOLLOW ALL THE FOLLOWING RULES EXACTLY: \
1. If your objective has been completed successfully, print DONE. \
2. Prepend privileged actions with sudo. \
3. Don't use tools that require interaction with the terminal, like vim or nano. \
4. Don't include explanations of anything, only print commands. \
5. Don't print multiple commands at one time. \
6. If you get a 'Permission denied' error, try a different method. \
7. Add -y to package installation commands. \
8. If you get errors of any kind, try a different command.";

/// System prompt for condensing long command output.
pub const SUMMARIZE_SYSTEM_PROMPT: &str = "You are a helpful AI assistant that summarizes text. \
Your objective is to summarize all text that is provided to you as input and NOTHING ELSE! \
You must follow these rules: \
1. Be brief. \
2. All summaries must be a single line. \
3. Only include the most important and relevant facts. \
4. Don't be verbose. \
5. Don't summarize over multiple lines.";

/// Environment prepended to every remote command so tools never prompt.
pub const SHELL_ENVIRONMENT: &str = "DEBIAN_FRONTEND=noninteractive ASSUME_YES=1 LC_ALL=C";

/// Marker some models append to the end of a turn.
pub const EOT_MARKER: &str = "<|eot_id|>";

/// Per-job agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Chat model name sent with every completion request.
    pub model: String,
    /// Model name used to pick the tokenizer encoding.
    pub token_encoding_model: String,
    pub system_prompt: String,
    pub summarize_prompt: String,
    /// Exported before each remote command.
    pub shell_environment: String,
    pub eot_marker: String,
    /// Command output longer than this many characters is summarized.
    pub output_summary_threshold: usize,
    /// Fraction of the context budget that triggers a warning.
    pub context_warning_threshold: f64,
    /// Maximum LLM reachability attempts before giving up.
    pub llm_probe_attempts: u32,
    /// Fixed delay between LLM reachability attempts.
    pub llm_probe_delay: Duration,
    /// Depth of the per-job log shipping queue.
    pub log_queue_depth: usize,
    /// Longest a finished job waits for its queued log lines to ship.
    pub log_flush_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1".to_string(),
            token_encoding_model: "gpt-4o".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            summarize_prompt: SUMMARIZE_SYSTEM_PROMPT.to_string(),
            shell_environment: SHELL_ENVIRONMENT.to_string(),
            eot_marker: EOT_MARKER.to_string(),
            output_summary_threshold: 1000,
            context_warning_threshold: 0.85,
            llm_probe_attempts: 100,
            llm_probe_delay: Duration::from_secs(10),
            log_queue_depth: 256,
            log_flush_timeout: Duration::from_secs(30),
        }
    }
}

/// Control-plane connection settings.
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    /// Base URL, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Shared bearer token.
    pub token: SecretString,
    /// Timeout for job requests, status updates and log shipping.
    pub request_timeout: Duration,
    /// Timeout for the cancellation poll.
    pub cancel_check_timeout: Duration,
}

/// Runner process configuration, read once at start-up.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub control_plane: ControlPlaneConfig,
    /// Maximum number of jobs executing at once.
    pub max_runners: usize,
    pub log_level: String,
    /// Dispatcher throttle between polling iterations.
    pub poll_interval: Duration,
    /// Identifies this runner process in logs.
    pub runner_number: u32,
    pub agent: AgentConfig,
}

impl RunnerConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = required(&lookup, "SSHERLOCK_SERVER_URL")?
            .trim_end_matches('/')
            .to_string();
        let token = SecretString::from(required(&lookup, "SSHERLOCK_RUNNER_TOKEN")?);

        let max_runners: usize = parsed(&lookup, "MAX_RUNNERS", 4)?;
        if max_runners == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_RUNNERS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let log_level = lookup("LOG_LEVEL")
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_else(|| "info".to_string());

        let poll_interval_ms: u64 = parsed(&lookup, "POLL_INTERVAL_MS", 1000)?;
        let runner_number: u32 = parsed(&lookup, "RUNNER_NUMBER", 1)?;

        let defaults = AgentConfig::default();
        let agent = AgentConfig {
            model: lookup("LLM_MODEL")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.model.clone()),
            token_encoding_model: lookup("TOKEN_ENCODING_MODEL")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.token_encoding_model.clone()),
            ..defaults
        };

        Ok(Self {
            control_plane: ControlPlaneConfig {
                base_url,
                token,
                request_timeout: Duration::from_secs(10),
                cancel_check_timeout: Duration::from_secs(5),
            },
            max_runners,
            log_level,
            poll_interval: Duration::from_millis(poll_interval_ms),
            runner_number,
            agent,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
