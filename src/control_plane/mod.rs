//! Control-plane client.
//!
//! The control plane hands out jobs and receives status updates and log lines.
//! Everything except `request_job` is best-effort: failures are logged and
//! swallowed so reporting can never stall or abort a job.

pub mod events;
mod http;

pub use events::{JobEventSink, NullEventSink, ShippingSink};
pub use http::HttpControlPlane;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ControlPlaneError;
use crate::job::{Job, JobStatus};

/// Operations the runner needs from the control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch the next pending job, `Ok(None)` when nothing is pending.
    async fn request_job(&self) -> Result<Option<Job>, ControlPlaneError>;

    /// Report a status change. Fire-and-forget: never retried, never escalated.
    async fn update_job_status(&self, job_id: Uuid, status: JobStatus);

    /// Whether the job has been canceled. Fails open: errors read as not canceled.
    async fn is_job_canceled(&self, job_id: Uuid) -> bool;

    /// Append one line to the job's log. Best-effort.
    async fn ship_log(&self, job_id: Uuid, line: &str);
}
