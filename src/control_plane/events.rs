//! Per-job event sink.
//!
//! The agent writes its operator-facing log through a `JobEventSink` instead of
//! relying on a global logger hook. `ShippingSink` forwards INFO-and-above
//! lines to the control plane in order, through a bounded queue drained by a
//! single background task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Level, warn};
use uuid::Uuid;

use crate::control_plane::ControlPlane;

const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives the agent's log records for one job.
#[async_trait]
pub trait JobEventSink: Send + Sync {
    /// Record one event. Must not block.
    fn emit(&self, level: Level, message: &str);

    /// Wait until previously emitted events have been delivered (or dropped).
    async fn flush(&self) {}
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

#[async_trait]
impl JobEventSink for NullEventSink {
    fn emit(&self, _level: Level, _message: &str) {}
}

/// Ships INFO-and-above events to the control plane's job log.
pub struct ShippingSink {
    job_id: Uuid,
    flush_timeout: Duration,
    tx: Mutex<Option<mpsc::Sender<String>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl ShippingSink {
    /// Start the background forwarder for `job_id`.
    pub fn spawn(control_plane: Arc<dyn ControlPlane>, job_id: Uuid, depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(depth.max(1));

        let forwarder = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                control_plane.ship_log(job_id, &line).await;
            }
        });

        Self {
            job_id,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            tx: Mutex::new(Some(tx)),
            forwarder: Mutex::new(Some(forwarder)),
        }
    }

    /// Cap how long [`flush`](JobEventSink::flush) waits for the queue to drain.
    /// Lines still queued when it expires are dropped.
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    fn format_line(level: Level, message: &str) -> String {
        format!(
            "{} {} {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            message
        )
    }
}

#[async_trait]
impl JobEventSink for ShippingSink {
    fn emit(&self, level: Level, message: &str) {
        // Level ordering is by verbosity: ERROR < WARN < INFO < DEBUG < TRACE.
        if level > Level::INFO {
            return;
        }

        let guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = guard.as_ref() else {
            return;
        };

        if let Err(e) = tx.try_send(Self::format_line(level, message)) {
            warn!(job_id = %self.job_id, error = %e, "Dropping job log line");
        }
    }

    async fn flush(&self) {
        // Closing the queue lets the forwarder drain what is left and exit.
        let tx = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(tx);

        let forwarder = match self.forwarder.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(mut handle) = forwarder else {
            return;
        };
        match tokio::time::timeout(self.flush_timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(job_id = %self.job_id, error = %e, "Log forwarder task failed");
            }
            Err(_) => {
                handle.abort();
                warn!(
                    job_id = %self.job_id,
                    timeout = ?self.flush_timeout,
                    "Gave up shipping remaining job log lines"
                );
            }
        }
    }
}
