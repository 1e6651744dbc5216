//! Per-job agent: the LLM -> command -> LLM interaction loop.
//!
//! One `Agent` is built from one job snapshot and consumed by [`Agent::run`].
//! It gates on target and LLM reachability, opens a single remote session for
//! the whole job, and then asks the model for one command at a time until the
//! model answers `DONE`, the control plane cancels the job, or something fails.
//! Status changes go to the control plane as they happen; the operator log goes
//! through the injected `JobEventSink`.

use std::sync::Arc;

use tracing::{Level, debug, error, info, warn};

use crate::agent::conversation::{
    ConversationContext, TokenCounter, is_done, is_string_too_long, summarize_string,
};
use crate::agent::probe::ConnectivityProbe;
use crate::config::AgentConfig;
use crate::control_plane::{ControlPlane, JobEventSink};
use crate::error::{ConnectivityError, Error};
use crate::job::{Job, JobRun, JobStatus};
use crate::llm::{LlmProvider, strip_eot_marker};
use crate::remote::{RemoteSession, RemoteShell, run_remote};

/// Collaborators of one agent.
pub struct AgentDeps {
    pub llm: Arc<dyn LlmProvider>,
    pub shell: Arc<dyn RemoteShell>,
    pub control_plane: Arc<dyn ControlPlane>,
    pub events: Arc<dyn JobEventSink>,
    pub tokens: Arc<dyn TokenCounter>,
}

/// How the interaction loop ended without an error.
struct LoopExit {
    status: JobStatus,
    reason: &'static str,
}

pub struct Agent {
    job: Job,
    config: AgentConfig,
    deps: AgentDeps,
    run: JobRun,
}

impl Agent {
    pub fn new(job: Job, config: AgentConfig, deps: AgentDeps) -> Self {
        let run = JobRun::new(job.id);
        Self {
            job,
            config,
            deps,
            run,
        }
    }

    /// Execute the job to a terminal status and return the local run record.
    pub async fn run(mut self) -> JobRun {
        self.log(
            Level::INFO,
            &format!(
                "Starting job {} against {}",
                self.job.id,
                self.job.target.display_addr()
            ),
        );

        if let Err(e) = self.initialize().await {
            self.fail(&e).await;
            return self.finish().await;
        }

        let mut conversation = ConversationContext::new(
            &self.config.system_prompt,
            &self.job.instructions,
            self.job.model_context_size,
            self.deps.tokens.clone(),
        );

        let mut session = match self.deps.shell.connect().await {
            Ok(session) => session,
            Err(e) => {
                self.fail(&Error::from(e)).await;
                return self.finish().await;
            }
        };

        self.report(JobStatus::Running, None).await;

        let outcome = self
            .interaction_loop(&mut conversation, session.as_mut())
            .await;
        session.close().await;

        match outcome {
            Ok(exit) => {
                self.log(Level::INFO, &format!("Job {}: {}", exit.status, exit.reason));
                self.report(exit.status, Some(exit.reason.to_string())).await;
            }
            Err(e) => self.fail(&e).await,
        }

        self.finish().await
    }

    async fn initialize(&self) -> Result<(), Error> {
        let probe = ConnectivityProbe::new(
            self.deps.llm.clone(),
            self.deps.shell.clone(),
            self.deps.events.clone(),
            self.config.llm_probe_attempts,
            self.config.llm_probe_delay,
            self.config.eot_marker.clone(),
        );

        if !probe.can_target_server_be_reached().await {
            return Err(ConnectivityError::TargetUnreachable {
                host: self.job.target.display_addr(),
            }
            .into());
        }
        self.log(Level::INFO, "Target host is reachable");

        probe.wait_for_llm_to_become_available().await
    }

    async fn interaction_loop(
        &mut self,
        conversation: &mut ConversationContext,
        session: &mut dyn RemoteSession,
    ) -> Result<LoopExit, Error> {
        loop {
            let raw = self.deps.llm.complete(conversation.messages()).await?;
            let reply = strip_eot_marker(&raw, &self.config.eot_marker).to_string();
            self.log(Level::INFO, &format!("LLM reply: {reply}"));

            if is_done(&reply) {
                return Ok(LoopExit {
                    status: JobStatus::Completed,
                    reason: "model reported the task done",
                });
            }

            // Cancellation is only observed here, between a finished command and
            // the next query.
            if self.deps.control_plane.is_job_canceled(self.job.id).await {
                return Ok(LoopExit {
                    status: JobStatus::Canceled,
                    reason: "canceled by the control plane",
                });
            }

            let output = self.handle_command(session, &reply).await?;
            conversation.append_turn(&reply, &output);

            if conversation.context_size_warning_check(self.config.context_warning_threshold) {
                self.log(
                    Level::WARN,
                    &format!(
                        "Conversation uses {} tokens, over {:.0}% of the {}-token context",
                        conversation.count_tokens(),
                        self.config.context_warning_threshold * 100.0,
                        self.job.model_context_size
                    ),
                );
            }
        }
    }

    /// Run the model's reply and return what goes back into the conversation.
    async fn handle_command(
        &mut self,
        session: &mut dyn RemoteSession,
        command: &str,
    ) -> Result<String, Error> {
        let output = run_remote(
            session,
            command,
            &self.config.shell_environment,
            self.job.sudo_password.as_ref(),
        )
        .await?;
        self.run.commands_run += 1;
        self.log(Level::INFO, &format!("Command output: {output}"));

        if !is_string_too_long(&output, self.config.output_summary_threshold) {
            return Ok(output);
        }

        let summary = summarize_string(
            self.deps.llm.as_ref(),
            &self.config.summarize_prompt,
            &output,
            &self.config.eot_marker,
        )
        .await?;
        self.log(Level::INFO, &format!("Summarized output: {summary}"));
        Ok(summary)
    }

    async fn report(&mut self, status: JobStatus, reason: Option<String>) {
        if let Err(e) = self.run.transition_to(status, reason) {
            error!(error = %e, "Refusing status change");
            return;
        }
        self.deps
            .control_plane
            .update_job_status(self.job.id, status)
            .await;
    }

    async fn fail(&mut self, err: &Error) {
        self.log(Level::ERROR, &format!("Job failed: {err}"));
        self.report(JobStatus::Failed, Some(err.to_string())).await;
    }

    async fn finish(self) -> JobRun {
        self.deps.events.flush().await;
        self.run
    }

    fn log(&self, level: Level, message: &str) {
        if level == Level::ERROR {
            error!("{message}");
        } else if level == Level::WARN {
            warn!("{message}");
        } else if level == Level::INFO {
            info!("{message}");
        } else {
            debug!("{message}");
        }
        self.deps.events.emit(level, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::NullEventSink;
    use crate::error::{ControlPlaneError, LlmError, RemoteError};
    use crate::job::{HostAuth, HostDescriptor};
    use crate::llm::ChatMessage;
    use crate::remote::CommandOutput;
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct CountingTokens;

    impl TokenCounter for CountingTokens {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    struct FixedLlm(&'static str);

    #[async_trait]
    impl LlmProvider for FixedLlm {
        fn model_name(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingSession;

    #[async_trait]
    impl RemoteSession for FailingSession {
        async fn exec(
            &mut self,
            command: &str,
            _stdin: Option<&str>,
        ) -> Result<CommandOutput, RemoteError> {
            if command == "true" {
                return Ok(CommandOutput::default());
            }
            Err(RemoteError::Channel {
                host: "target".to_string(),
                reason: "connection reset".to_string(),
            })
        }
        async fn close(&mut self) {}
    }

    struct FailingShell;

    #[async_trait]
    impl RemoteShell for FailingShell {
        async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
            Ok(Box::new(FailingSession))
        }
    }

    #[derive(Default)]
    struct StatusLog {
        statuses: Mutex<Vec<JobStatus>>,
    }

    #[async_trait]
    impl ControlPlane for StatusLog {
        async fn request_job(&self) -> Result<Option<Job>, ControlPlaneError> {
            Ok(None)
        }
        async fn update_job_status(&self, _job_id: Uuid, status: JobStatus) {
            self.statuses.lock().unwrap().push(status);
        }
        async fn is_job_canceled(&self, _job_id: Uuid) -> bool {
            false
        }
        async fn ship_log(&self, _job_id: Uuid, _line: &str) {}
    }

    fn job() -> Job {
        Job {
            id: Uuid::new_v4(),
            llm_api_base_url: "http://llm".to_string(),
            llm_api_key: SecretString::from(""),
            instructions: "Install nginx".to_string(),
            target: HostDescriptor {
                hostname: "target".to_string(),
                port: 22,
                username: "root".to_string(),
                auth: HostAuth::Password(SecretString::from("pw")),
            },
            sudo_password: None,
            bastion: None,
            model_context_size: 0,
            status: JobStatus::Pending,
            created_at: None,
            started_at: None,
            completed_at: None,
            stopped_at: None,
        }
    }

    #[tokio::test]
    async fn command_failure_ends_job_failed() {
        let control_plane = Arc::new(StatusLog::default());
        let agent = Agent::new(
            job(),
            AgentConfig::default(),
            AgentDeps {
                llm: Arc::new(FixedLlm("uname -a")),
                shell: Arc::new(FailingShell),
                control_plane: control_plane.clone(),
                events: Arc::new(NullEventSink),
                tokens: Arc::new(CountingTokens),
            },
        );

        let run = agent.run().await;

        assert_eq!(run.status, JobStatus::Failed);
        assert_eq!(run.commands_run, 0);
        assert_eq!(
            *control_plane.statuses.lock().unwrap(),
            vec![JobStatus::Running, JobStatus::Failed]
        );
    }
}
