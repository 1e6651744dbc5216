//! Reachability checks run before a job's conversation starts.

use std::sync::Arc;
use std::time::Duration;

use tracing::{Level, debug, error, info, warn};

use crate::control_plane::JobEventSink;
use crate::error::{ConnectivityError, Error, LlmError};
use crate::llm::{ChatMessage, LlmProvider, strip_eot_marker};
use crate::remote::RemoteShell;

const PROBE_SYSTEM_PROMPT: &str = "You're a helpful AI assistant.";
const PROBE_USER_PROMPT: &str = "Print GOOD and nothing else.";

/// Checks that the target host and the LLM endpoint can be used.
pub struct ConnectivityProbe {
    llm: Arc<dyn LlmProvider>,
    shell: Arc<dyn RemoteShell>,
    events: Arc<dyn JobEventSink>,
    attempts: u32,
    delay: Duration,
    eot_marker: String,
}

impl ConnectivityProbe {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        shell: Arc<dyn RemoteShell>,
        events: Arc<dyn JobEventSink>,
        attempts: u32,
        delay: Duration,
        eot_marker: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            shell,
            events,
            attempts,
            delay,
            eot_marker: eot_marker.into(),
        }
    }

    /// Send a trivial prompt.
    ///
    /// `Ok(false)` means the server answered "not ready"; every other failure is
    /// returned to the caller.
    pub async fn can_llm_be_reached(&self) -> Result<bool, LlmError> {
        let messages = [
            ChatMessage::system(PROBE_SYSTEM_PROMPT),
            ChatMessage::user(PROBE_USER_PROMPT),
        ];
        match self.llm.complete(&messages).await {
            Ok(reply) => {
                debug!(reply = %strip_eot_marker(&reply, &self.eot_marker), "LLM probe answered");
                Ok(true)
            }
            Err(LlmError::NotReady { status, .. }) => {
                debug!(status, "LLM not ready");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Retry [`can_llm_be_reached`](Self::can_llm_be_reached) with a fixed delay
    /// between attempts.
    pub async fn wait_for_llm_to_become_available(&self) -> Result<(), Error> {
        for attempt in 1..=self.attempts {
            if self.can_llm_be_reached().await? {
                self.record(Level::INFO, "LLM is available");
                return Ok(());
            }
            self.record(
                Level::WARN,
                &format!(
                    "LLM not ready (attempt {attempt}/{}), retrying in {:?}",
                    self.attempts, self.delay
                ),
            );
            if attempt < self.attempts {
                tokio::time::sleep(self.delay).await;
            }
        }

        Err(ConnectivityError::LlmTimeout {
            attempts: self.attempts,
            delay: self.delay,
        }
        .into())
    }

    /// Open a session, run a no-op, and close it again.
    pub async fn can_target_server_be_reached(&self) -> bool {
        let mut session = match self.shell.connect().await {
            Ok(session) => session,
            Err(e) => {
                self.record(Level::ERROR, &format!("Target host unreachable: {e}"));
                return false;
            }
        };

        let reachable = match session.exec("true", None).await {
            Ok(_) => true,
            Err(e) => {
                self.record(Level::ERROR, &format!("Target host unusable: {e}"));
                false
            }
        };
        session.close().await;
        reachable
    }

    fn record(&self, level: Level, message: &str) {
        if level == Level::ERROR {
            error!("{message}");
        } else if level == Level::WARN {
            warn!("{message}");
        } else {
            info!("{message}");
        }
        self.events.emit(level, message);
    }
}
