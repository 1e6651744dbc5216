//! Error types for the runner.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the runner.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    #[error("Remote execution error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Connectivity error: {0}")]
    Connectivity(#[from] ConnectivityError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// LLM endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The endpoint answered but the model or server is not ready yet (HTTP 5xx).
    #[error("LLM server at {base_url} not ready (HTTP {status})")]
    NotReady { base_url: String, status: u16 },

    #[error("Request to {base_url} failed: {reason}")]
    RequestFailed { base_url: String, reason: String },

    #[error("Invalid response from {base_url}: {reason}")]
    InvalidResponse { base_url: String, reason: String },

    #[error("Authentication failed for {base_url}")]
    AuthFailed { base_url: String },

    #[error("Tokenizer for model {model} unavailable: {reason}")]
    Tokenizer { model: String, reason: String },
}

/// Control-plane HTTP errors. Never escalated past the client except from `request_job`.
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("HTTP error calling {path}: {reason}")]
    Http { path: String, reason: String },

    #[error("Unexpected status {status} from {path}")]
    UnexpectedStatus { path: String, status: u16 },

    #[error("Invalid job payload: {0}")]
    InvalidPayload(#[from] JobError),
}

/// Remote command execution errors (transport, authentication, channel).
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Authentication rejected for {user}@{host}")]
    AuthRejected { user: String, host: String },

    #[error("Failed to load private key {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    #[error("Failed to open gateway tunnel through {bastion} to {target}: {reason}")]
    Gateway {
        bastion: String,
        target: String,
        reason: String,
    },

    #[error("Channel error on {host}: {reason}")]
    Channel { host: String, reason: String },
}

/// Reachability failures that abort a job before the interaction loop.
#[derive(Debug, thiserror::Error)]
pub enum ConnectivityError {
    #[error("Target server {host} cannot be reached")]
    TargetUnreachable { host: String },

    #[error("Timed out waiting for LLM server to become available after {attempts} attempts ({delay:?} apart)")]
    LlmTimeout { attempts: u32, delay: Duration },
}

/// Job-related errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job payload is invalid: {0}")]
    InvalidPayload(String),

    #[error("Job {id} already finished as {state}")]
    AlreadyFinished { id: Uuid, state: String },

    #[error("Job {id} in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: String,
        target: String,
    },
}

/// Result type alias for the runner.
pub type Result<T> = std::result::Result<T, Error>;
