//! HTTP implementation of the control-plane API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::ControlPlaneConfig;
use crate::control_plane::ControlPlane;
use crate::error::ControlPlaneError;
use crate::job::{Job, JobPayload, JobStatus};

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

/// Bearer-token authenticated client for the control-plane HTTP API.
#[derive(Clone)]
pub struct HttpControlPlane {
    base_url: String,
    token: SecretString,
    client: reqwest::Client,
    request_timeout: Duration,
    cancel_check_timeout: Duration,
}

impl HttpControlPlane {
    pub fn new(config: &ControlPlaneConfig) -> Result<Self, ControlPlaneError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ControlPlaneError::Http {
                path: config.base_url.clone(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
            request_timeout: config.request_timeout,
            cancel_check_timeout: config.cancel_check_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Read the job's current status as the control plane sees it.
    pub async fn get_job_status(&self, job_id: Uuid) -> Result<JobStatus, ControlPlaneError> {
        let path = format!("/get_job_status/{job_id}");
        let response = self
            .client
            .get(self.url(&path))
            .bearer_auth(self.token.expose_secret())
            .timeout(self.cancel_check_timeout)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Http {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ControlPlaneError::UnexpectedStatus {
                path,
                status: response.status().as_u16(),
            });
        }

        let body: StatusResponse = response.json().await.map_err(|e| ControlPlaneError::Http {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(body.status.parse()?)
    }

    async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<(), ControlPlaneError> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(self.token.expose_secret())
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Http {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ControlPlaneError::UnexpectedStatus {
                path: path.to_string(),
                status: response.status().as_u16(),
            })
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn request_job(&self) -> Result<Option<Job>, ControlPlaneError> {
        let path = "/request_job";
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(self.token.expose_secret())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Http {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("No pending jobs");
                Ok(None)
            }
            status if status.is_success() => {
                let payload: JobPayload =
                    response.json().await.map_err(|e| ControlPlaneError::Http {
                        path: path.to_string(),
                        reason: format!("Failed to decode job: {e}"),
                    })?;
                let job = payload.into_job()?;
                debug!(job_id = %job.id, "Received job");
                Ok(Some(job))
            }
            status => Err(ControlPlaneError::UnexpectedStatus {
                path: path.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    async fn update_job_status(&self, job_id: Uuid, status: JobStatus) {
        let path = format!("/update_job_status/{job_id}");
        match self
            .post_json(&path, json!({ "status": status.as_str() }))
            .await
        {
            Ok(()) => debug!(job_id = %job_id, status = %status, "Job status updated"),
            Err(e) => error!(
                job_id = %job_id,
                status = %status,
                error = %e,
                "Failed to update job status"
            ),
        }
    }

    async fn is_job_canceled(&self, job_id: Uuid) -> bool {
        match self.get_job_status(job_id).await {
            Ok(status) => status == JobStatus::Canceled,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Error checking job status");
                false
            }
        }
    }

    async fn ship_log(&self, job_id: Uuid, line: &str) {
        let path = format!("/log_job_data/{job_id}");
        if let Err(e) = self.post_json(&path, json!({ "log": line })).await {
            warn!(job_id = %job_id, error = %e, "Failed to ship log line");
        }
    }
}
