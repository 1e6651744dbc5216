//! Wires a received job to a fully equipped `Agent`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Level, error, info};

use crate::agent::agent_loop::{Agent, AgentDeps};
use crate::agent::conversation::TokenCounter;
use crate::config::AgentConfig;
use crate::control_plane::{ControlPlane, JobEventSink, ShippingSink};
use crate::dispatcher::JobRunner;
use crate::job::{Job, JobStatus};
use crate::llm::OpenAiCompatClient;
use crate::remote::SshShell;

/// Runs each job with the OpenAI-compatible client and SSH transport.
pub struct AgentJobRunner {
    control_plane: Arc<dyn ControlPlane>,
    config: AgentConfig,
    tokens: Arc<dyn TokenCounter>,
}

impl AgentJobRunner {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        config: AgentConfig,
        tokens: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            control_plane,
            config,
            tokens,
        }
    }
}

#[async_trait]
impl JobRunner for AgentJobRunner {
    async fn run_job(&self, job: Job) {
        let job_id = job.id;
        let events: Arc<dyn JobEventSink> = Arc::new(
            ShippingSink::spawn(
                self.control_plane.clone(),
                job_id,
                self.config.log_queue_depth,
            )
            .with_flush_timeout(self.config.log_flush_timeout),
        );

        let llm = match OpenAiCompatClient::new(
            job.llm_api_base_url.clone(),
            job.llm_api_key.clone(),
            self.config.model.clone(),
        ) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                error!(error = %e, "Cannot build LLM client");
                events.emit(Level::ERROR, &format!("Job failed: {e}"));
                self.control_plane
                    .update_job_status(job_id, JobStatus::Failed)
                    .await;
                events.flush().await;
                return;
            }
        };

        let deps = AgentDeps {
            llm,
            shell: Arc::new(SshShell::for_job(&job)),
            control_plane: self.control_plane.clone(),
            events,
            tokens: self.tokens.clone(),
        };

        let run = Agent::new(job, self.config.clone(), deps).run().await;
        info!(
            status = %run.status,
            commands = run.commands_run,
            elapsed = ?run.elapsed(),
            "Job finished"
        );
    }
}
