//! Job data model.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

/// Default SSH port when the control plane does not send one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Status of a job as seen by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
    /// Reserved by the control plane; the agent never enters it.
    ContextExceeded,
}

impl JobStatus {
    /// Check whether the agent may move a job from this status to `target`.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Canceled)
                | (Running, Failed)
                // Reachability checks fail before the job ever starts running.
                | (Pending, Failed)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::ContextExceeded
        )
    }

    /// Wire name used by the control-plane API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
            Self::ContextExceeded => "ContextExceeded",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            "contextexceeded" => Ok(Self::ContextExceeded),
            _ => Err(JobError::InvalidPayload(format!("unknown job status '{s}'"))),
        }
    }
}

impl TryFrom<String> for JobStatus {
    type Error = JobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Serialize for JobStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// How to authenticate against a host.
#[derive(Debug, Clone)]
pub enum HostAuth {
    Password(SecretString),
    KeyFile(PathBuf),
}

/// Connection descriptor for a target or bastion host.
#[derive(Debug, Clone)]
pub struct HostDescriptor {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub auth: HostAuth,
}

impl HostDescriptor {
    /// `user@host:port` for log lines (never includes secrets).
    pub fn display_addr(&self) -> String {
        format!("{}@{}:{}", self.username, self.hostname, self.port)
    }
}

/// Read-only snapshot of one job, held by the agent for a single execution.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub llm_api_base_url: String,
    pub llm_api_key: SecretString,
    pub instructions: String,
    pub target: HostDescriptor,
    pub sudo_password: Option<SecretString>,
    pub bastion: Option<HostDescriptor>,
    /// Model context budget in tokens (0 = unbounded/unchecked).
    pub model_context_size: usize,
    pub status: JobStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Job JSON as returned by `GET /request_job`.
///
/// Every field except `id` may be absent or `null`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct JobPayload {
    pub id: String,
    #[serde(default)]
    pub llm_api_baseurl: Option<String>,
    #[serde(default)]
    pub llm_api_api_key: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub target_host_hostname: Option<String>,
    #[serde(default)]
    pub target_host_port: Option<u16>,
    #[serde(default)]
    pub credentials_for_target_hosts_username: Option<String>,
    #[serde(default)]
    pub credentials_for_target_hosts_password: Option<String>,
    #[serde(default)]
    pub credentials_for_target_hosts_keyfile: Option<String>,
    #[serde(default)]
    pub credentials_for_target_hosts_sudo_password: Option<String>,
    #[serde(default)]
    pub bastion_host_hostname: Option<String>,
    #[serde(default)]
    pub bastion_host_port: Option<u16>,
    #[serde(default)]
    pub credentials_for_bastion_host_username: Option<String>,
    #[serde(default)]
    pub credentials_for_bastion_host_password: Option<String>,
    #[serde(default)]
    pub credentials_for_bastion_host_keyfile: Option<String>,
    #[serde(default)]
    pub model_context_size: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "creation_date")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "start_date")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "stop_date")]
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Treat empty strings the same as absent fields.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn auth_from(password: Option<String>, keyfile: Option<String>) -> HostAuth {
    match non_empty(keyfile) {
        Some(path) => HostAuth::KeyFile(PathBuf::from(path)),
        None => HostAuth::Password(SecretString::from(password.unwrap_or_default())),
    }
}

impl JobPayload {
    /// Validate the payload and turn it into a `Job` snapshot.
    pub fn into_job(self) -> Result<Job, JobError> {
        let id = Uuid::parse_str(self.id.trim())
            .map_err(|e| JobError::InvalidPayload(format!("job id '{}': {e}", self.id)))?;

        let llm_api_base_url = non_empty(self.llm_api_baseurl)
            .ok_or_else(|| JobError::InvalidPayload("llm_api_baseurl is missing".to_string()))?;
        let hostname = non_empty(self.target_host_hostname).ok_or_else(|| {
            JobError::InvalidPayload("target_host_hostname is missing".to_string())
        })?;
        let username = non_empty(self.credentials_for_target_hosts_username).ok_or_else(|| {
            JobError::InvalidPayload("credentials_for_target_hosts_username is missing".to_string())
        })?;

        let target = HostDescriptor {
            hostname,
            port: self.target_host_port.unwrap_or(DEFAULT_SSH_PORT),
            username,
            auth: auth_from(
                self.credentials_for_target_hosts_password,
                self.credentials_for_target_hosts_keyfile,
            ),
        };

        let bastion = match non_empty(self.bastion_host_hostname) {
            Some(hostname) => {
                let username = non_empty(self.credentials_for_bastion_host_username)
                    .ok_or_else(|| {
                        JobError::InvalidPayload(
                            "bastion host given without credentials_for_bastion_host_username"
                                .to_string(),
                        )
                    })?;
                Some(HostDescriptor {
                    hostname,
                    port: self.bastion_host_port.unwrap_or(DEFAULT_SSH_PORT),
                    username,
                    auth: auth_from(
                        self.credentials_for_bastion_host_password,
                        self.credentials_for_bastion_host_keyfile,
                    ),
                })
            }
            None => None,
        };

        let status = match non_empty(self.status) {
            Some(s) => s.parse()?,
            None => JobStatus::Pending,
        };

        Ok(Job {
            id,
            llm_api_base_url,
            llm_api_key: SecretString::from(self.llm_api_api_key.unwrap_or_default()),
            instructions: self.instructions.unwrap_or_default(),
            target,
            sudo_password: non_empty(self.credentials_for_target_hosts_sudo_password)
                .map(SecretString::from),
            bastion,
            model_context_size: self.model_context_size.unwrap_or(0) as usize,
            status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            stopped_at: self.stopped_at,
        })
    }
}
