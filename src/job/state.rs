//! Local bookkeeping for one job execution.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::JobError;
use crate::job::model::JobStatus;

/// Cap on the transition history kept per run.
const MAX_TRANSITIONS: usize = 50;

/// A status transition event.
#[derive(Debug, Clone, Serialize)]
pub struct StatusTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Status, timestamps and transition history of the job this agent is running.
///
/// The control plane owns the authoritative job record; this is the agent's
/// own view, which can diverge when status reports are lost.
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the job reaches `Completed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when the job ends any other way.
    pub stopped_at: Option<DateTime<Utc>>,
    /// Commands executed on the target so far.
    pub commands_run: usize,
    pub transitions: Vec<StatusTransition>,
}

impl JobRun {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            stopped_at: None,
            commands_run: 0,
            transitions: Vec::new(),
        }
    }

    /// Move to a new status, recording the transition.
    pub fn transition_to(
        &mut self,
        target: JobStatus,
        reason: Option<String>,
    ) -> Result<(), JobError> {
        if self.status.is_terminal() {
            return Err(JobError::AlreadyFinished {
                id: self.job_id,
                state: self.status.to_string(),
            });
        }
        if !self.status.can_transition_to(target) {
            return Err(JobError::InvalidTransition {
                id: self.job_id,
                state: self.status.to_string(),
                target: target.to_string(),
            });
        }

        let now = Utc::now();
        self.transitions.push(StatusTransition {
            from: self.status,
            to: target,
            timestamp: now,
            reason,
        });
        if self.transitions.len() > MAX_TRANSITIONS {
            let drain_count = self.transitions.len() - MAX_TRANSITIONS;
            self.transitions.drain(..drain_count);
        }

        self.status = target;

        match target {
            JobStatus::Running if self.started_at.is_none() => self.started_at = Some(now),
            JobStatus::Completed => self.completed_at = Some(now),
            JobStatus::Failed | JobStatus::Canceled => self.stopped_at = Some(now),
            _ => {}
        }

        Ok(())
    }

    /// Wall-clock time since the run started.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            let end = self
                .completed_at
                .or(self.stopped_at)
                .unwrap_or_else(Utc::now);
            let duration = end.signed_duration_since(start);
            Duration::from_secs(duration.num_seconds().max(0) as u64)
        })
    }

    /// Statuses entered so far, in order.
    pub fn status_history(&self) -> Vec<JobStatus> {
        self.transitions.iter().map(|t| t.to).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_then_completed_sets_timestamps() {
        let mut run = JobRun::new(Uuid::new_v4());
        assert_eq!(run.status, JobStatus::Pending);

        run.transition_to(JobStatus::Running, None).unwrap();
        assert!(run.started_at.is_some());
        assert!(run.elapsed().is_some());

        run.transition_to(JobStatus::Completed, Some("DONE".to_string()))
            .unwrap();
        assert!(run.completed_at.is_some());
        assert!(run.stopped_at.is_none());
        assert_eq!(
            run.status_history(),
            vec![JobStatus::Running, JobStatus::Completed]
        );
    }

    #[test]
    fn failure_before_start_is_allowed() {
        let mut run = JobRun::new(Uuid::new_v4());
        run.transition_to(JobStatus::Failed, Some("unreachable".to_string()))
            .unwrap();
        assert!(run.stopped_at.is_some());
        assert!(run.started_at.is_none());
    }

    #[test]
    fn terminal_status_is_final() {
        let mut run = JobRun::new(Uuid::new_v4());
        run.transition_to(JobStatus::Running, None).unwrap();
        run.transition_to(JobStatus::Canceled, None).unwrap();

        let err = run.transition_to(JobStatus::Running, None).unwrap_err();
        assert!(matches!(err, JobError::AlreadyFinished { .. }));
        let err = run.transition_to(JobStatus::Failed, None).unwrap_err();
        assert!(matches!(err, JobError::AlreadyFinished { .. }));
        assert_eq!(run.status, JobStatus::Canceled);
        assert_eq!(run.transitions.len(), 2);
    }

    #[test]
    fn context_exceeded_is_never_entered() {
        let mut run = JobRun::new(Uuid::new_v4());
        run.transition_to(JobStatus::Running, None).unwrap();
        let err = run
            .transition_to(JobStatus::ContextExceeded, None)
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
    }
}
