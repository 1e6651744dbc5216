//! Job dispatcher.
//!
//! Polls the control plane for pending jobs and runs each one in its own tokio
//! task, never more than `MAX_RUNNERS` at a time. A worker panic is contained
//! to its task; the dispatcher only reaps it and keeps polling. Job outcomes
//! are reported by the agent itself, never by the dispatcher.

mod slots;

pub use slots::{SlotTracker, WorkerSlot};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::RunnerConfig;
use crate::control_plane::ControlPlane;
use crate::job::Job;

/// Executes one job to completion. Implementations report the job's outcome
/// themselves.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run_job(&self, job: Job);
}

/// Hand-off from the dispatcher to a freshly spawned worker.
#[derive(Debug)]
pub enum WorkerMessage {
    Start(Box<Job>),
}

/// Counters collected over one `Dispatcher::run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Polling iterations completed.
    pub polls: u64,
    pub jobs_started: u64,
    /// `request_job` failures, each treated as "no job this round".
    pub poll_errors: u64,
    pub worker_panics: u64,
}

pub struct Dispatcher {
    control_plane: Arc<dyn ControlPlane>,
    runner: Arc<dyn JobRunner>,
    tracker: Arc<SlotTracker>,
    poll_interval: Duration,
    runner_number: u32,
    max_polls: Option<u64>,
}

impl Dispatcher {
    pub fn new(
        config: &RunnerConfig,
        control_plane: Arc<dyn ControlPlane>,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        Self {
            control_plane,
            runner,
            tracker: SlotTracker::new(config.max_runners),
            poll_interval: config.poll_interval,
            runner_number: config.runner_number,
            max_polls: None,
        }
    }

    /// Stop after `polls` iterations, then drain as on a stop signal.
    pub fn with_max_polls(mut self, polls: u64) -> Self {
        self.max_polls = Some(polls);
        self
    }

    /// Live workers right now.
    pub fn active_workers(&self) -> usize {
        self.tracker.active_count()
    }

    /// Poll until `shutdown` resolves (or the poll limit is hit), then wait for
    /// every live worker to exit.
    pub async fn run<F>(&self, shutdown: F) -> DispatcherStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut workers = JoinSet::new();
        let mut stats = DispatcherStats::default();

        info!(
            runner = self.runner_number,
            max_runners = self.tracker.max(),
            "Dispatcher started"
        );

        loop {
            // A full house skips the request entirely; the control plane is
            // never told.
            if let Some(slot) = self.tracker.try_acquire() {
                match self.control_plane.request_job().await {
                    Ok(Some(job)) => {
                        stats.jobs_started += 1;
                        self.spawn_worker(&mut workers, slot, job, stats.jobs_started)
                            .await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        stats.poll_errors += 1;
                        warn!(error = %e, "Job request failed");
                    }
                }
            }

            while let Some(result) = workers.try_join_next() {
                record_exit(result, &mut stats);
            }

            stats.polls += 1;
            if self.max_polls.is_some_and(|max| stats.polls >= max) {
                debug!(polls = stats.polls, "Poll limit reached");
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = &mut shutdown => {
                    info!("Stop signal received");
                    break;
                }
            }
        }

        info!(live = workers.len(), "Waiting for running jobs to finish");
        while let Some(result) = workers.join_next().await {
            record_exit(result, &mut stats);
        }
        info!(
            polls = stats.polls,
            jobs = stats.jobs_started,
            "Dispatcher stopped"
        );
        stats
    }

    async fn spawn_worker(
        &self,
        workers: &mut JoinSet<()>,
        slot: WorkerSlot,
        job: Job,
        worker: u64,
    ) {
        let span = info_span!(
            "job",
            job_id = %job.id,
            runner = self.runner_number,
            worker
        );
        let (tx, mut rx) = mpsc::channel::<WorkerMessage>(1);
        let runner = Arc::clone(&self.runner);

        workers.spawn(
            async move {
                let _slot = slot;
                match rx.recv().await {
                    Some(WorkerMessage::Start(job)) => runner.run_job(*job).await,
                    None => debug!("Worker closed before receiving a job"),
                }
            }
            .instrument(span),
        );

        info!(job_id = %job.id, worker, "Starting job worker");
        if tx.send(WorkerMessage::Start(Box::new(job))).await.is_err() {
            error!(worker, "Worker exited before its job was handed over");
        }
    }
}

fn record_exit(result: Result<(), JoinError>, stats: &mut DispatcherStats) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_panic() => {
            stats.worker_panics += 1;
            error!(error = %e, "Job worker panicked");
        }
        Err(e) => error!(error = %e, "Job worker did not finish"),
    }
}
