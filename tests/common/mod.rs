//! Stub collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::Level;
use uuid::Uuid;

use ssherlock_runner::agent::TokenCounter;
use ssherlock_runner::control_plane::{ControlPlane, JobEventSink};
use ssherlock_runner::error::{ControlPlaneError, LlmError, RemoteError};
use ssherlock_runner::job::{Job, JobPayload, JobStatus};
use ssherlock_runner::llm::{ChatMessage, LlmProvider};
use ssherlock_runner::remote::{CommandOutput, RemoteSession, RemoteShell};

pub fn job() -> Job {
    job_from(serde_json::json!({}))
}

/// Build a job from the default payload with `overrides` merged on top.
pub fn job_from(overrides: serde_json::Value) -> Job {
    let mut payload = serde_json::json!({
        "id": Uuid::new_v4().to_string(),
        "llm_api_baseurl": "http://llm.example.com/v1",
        "llm_api_api_key": "",
        "instructions": "Install nginx",
        "target_host_hostname": "target.example.com",
        "credentials_for_target_hosts_username": "admin",
        "credentials_for_target_hosts_password": "pw",
    });
    if let (Some(base), Some(extra)) = (payload.as_object_mut(), overrides.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value::<JobPayload>(payload)
        .unwrap()
        .into_job()
        .unwrap()
}

/// One token per whitespace-separated word.
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// LLM that answers the probe with "GOOD", the summarizer with a fixed line,
/// and the main conversation from a script.
pub struct ScriptedLlm {
    probe_failures: Mutex<u32>,
    failing_turn: Option<usize>,
    summarizer_fails: bool,
    replies: Mutex<VecDeque<String>>,
    pub conversation_calls: Mutex<Vec<Vec<ChatMessage>>>,
    pub probe_calls: Mutex<usize>,
    pub summarize_calls: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            probe_failures: Mutex::new(0),
            failing_turn: None,
            summarizer_fails: false,
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            conversation_calls: Mutex::new(Vec::new()),
            probe_calls: Mutex::new(0),
            summarize_calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer the first `n` probes with "not ready".
    pub fn with_probe_failures(self, n: u32) -> Self {
        *self.probe_failures.lock().unwrap() = n;
        self
    }

    /// Fail the `n`th conversation query (1-based) with a request error.
    pub fn failing_at_turn(mut self, n: usize) -> Self {
        self.failing_turn = Some(n);
        self
    }

    /// Fail every summarization request.
    pub fn with_failing_summarizer(mut self) -> Self {
        self.summarizer_fails = true;
        self
    }

    pub fn total_calls(&self) -> usize {
        *self.probe_calls.lock().unwrap()
            + self.conversation_calls.lock().unwrap().len()
            + self.summarize_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");

        if system.starts_with("You're a helpful AI assistant") {
            *self.probe_calls.lock().unwrap() += 1;
            let mut failures = self.probe_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(LlmError::NotReady {
                    base_url: "http://llm.example.com/v1".to_string(),
                    status: 503,
                });
            }
            return Ok("GOOD<|eot_id|>".to_string());
        }

        if system.starts_with("You are a helpful AI assistant that summarizes") {
            let text = messages.get(1).map(|m| m.content.clone()).unwrap_or_default();
            self.summarize_calls.lock().unwrap().push(text);
            if self.summarizer_fails {
                return Err(LlmError::RequestFailed {
                    base_url: "http://llm.example.com/v1".to_string(),
                    reason: "connection reset by peer".to_string(),
                });
            }
            return Ok("summary: lots of output<|eot_id|>".to_string());
        }

        let turn = {
            let mut calls = self.conversation_calls.lock().unwrap();
            calls.push(messages.to_vec());
            calls.len()
        };
        if self.failing_turn == Some(turn) {
            return Err(LlmError::RequestFailed {
                base_url: "http://llm.example.com/v1".to_string(),
                reason: "operation timed out".to_string(),
            });
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "DONE".to_string());
        Ok(format!("{reply}<|eot_id|>"))
    }
}

/// Everything the remote side saw.
#[derive(Default)]
pub struct RemoteLog {
    pub connects: usize,
    pub commands: Vec<(String, Option<String>)>,
    pub closes: usize,
}

/// Remote shell whose sessions answer each command with a canned output.
pub struct StubShell {
    pub log: Arc<Mutex<RemoteLog>>,
    reachable: bool,
    outputs: Arc<Mutex<VecDeque<Result<CommandOutput, RemoteError>>>>,
}

impl StubShell {
    pub fn reachable() -> Self {
        Self {
            log: Arc::new(Mutex::new(RemoteLog::default())),
            reachable: true,
            outputs: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::reachable()
        }
    }

    /// Queue the result of the next non-probe command.
    pub fn push_output(&self, stdout: &str) {
        self.outputs.lock().unwrap().push_back(Ok(CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_status: Some(0),
        }));
    }

    pub fn push_error(&self, err: RemoteError) {
        self.outputs.lock().unwrap().push_back(Err(err));
    }

    /// Commands run by the agent, excluding the reachability no-op.
    pub fn agent_commands(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .commands
            .iter()
            .map(|(c, _)| c.clone())
            .filter(|c| c != "true")
            .collect()
    }
}

#[async_trait]
impl RemoteShell for StubShell {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        if !self.reachable {
            return Err(RemoteError::Connect {
                host: "target.example.com".to_string(),
                port: 22,
                reason: "No route to host".to_string(),
            });
        }
        self.log.lock().unwrap().connects += 1;
        Ok(Box::new(StubSession {
            log: self.log.clone(),
            outputs: self.outputs.clone(),
        }))
    }
}

struct StubSession {
    log: Arc<Mutex<RemoteLog>>,
    outputs: Arc<Mutex<VecDeque<Result<CommandOutput, RemoteError>>>>,
}

#[async_trait]
impl RemoteSession for StubSession {
    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, RemoteError> {
        self.log
            .lock()
            .unwrap()
            .commands
            .push((command.to_string(), stdin.map(str::to_string)));
        if command == "true" {
            return Ok(CommandOutput::default());
        }
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CommandOutput::default()))
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().closes += 1;
    }
}

/// Control plane that records statuses and cancels after a given number of
/// cancellation checks.
pub struct RecordingPlane {
    pub statuses: Mutex<Vec<JobStatus>>,
    pub cancel_checks: Mutex<usize>,
    cancel_after_checks: Option<usize>,
    pub log_lines: Mutex<Vec<String>>,
}

impl RecordingPlane {
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(Vec::new()),
            cancel_checks: Mutex::new(0),
            cancel_after_checks: None,
            log_lines: Mutex::new(Vec::new()),
        }
    }

    /// Report `Canceled` from the `n`th cancellation check on (1-based).
    pub fn canceling_at_check(n: usize) -> Self {
        Self {
            cancel_after_checks: Some(n),
            ..Self::new()
        }
    }

    pub fn statuses(&self) -> Vec<JobStatus> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControlPlane for RecordingPlane {
    async fn request_job(&self) -> Result<Option<Job>, ControlPlaneError> {
        Ok(None)
    }

    async fn update_job_status(&self, _job_id: Uuid, status: JobStatus) {
        self.statuses.lock().unwrap().push(status);
    }

    async fn is_job_canceled(&self, _job_id: Uuid) -> bool {
        let mut checks = self.cancel_checks.lock().unwrap();
        *checks += 1;
        self.cancel_after_checks.is_some_and(|n| *checks >= n)
    }

    async fn ship_log(&self, _job_id: Uuid, line: &str) {
        self.log_lines.lock().unwrap().push(line.to_string());
    }
}

/// Event sink that keeps every record.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(Level, String)>>,
    pub flushes: Mutex<usize>,
}

impl RecordingSink {
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

#[async_trait]
impl JobEventSink for RecordingSink {
    fn emit(&self, level: Level, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }

    async fn flush(&self) {
        *self.flushes.lock().unwrap() += 1;
    }
}
