//! Async job lifecycle: submit -> queue -> run -> terminal state, with
//! durable state, polling, cancellation, and retention reaping.

mod memory;
mod store;

pub use memory::MemoryJobStore;
pub use store::JobStore;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::batch::{BatchCoordinator, ProgressCallback};
use crate::config::JobConfig;
use crate::correlation::{CorrelationId, RequestContext};
use crate::error::{ErrorKind, JobError, StoreError};
use crate::graph::CancelFlag;
use crate::model::{EvaluationItem, EvaluationResult};

/// Job lifecycle states. Transitions follow the DAG
/// SUBMITTED -> QUEUED -> RUNNING -> {COMPLETED | FAILED | CANCELLED};
/// any non-terminal state may be moved to EXPIRED by the reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled | JobState::Expired
        )
    }

    /// Wire spelling used by the status endpoint.
    pub fn as_wire(&self) -> &'static str {
        match self {
            JobState::Submitted => "submitted",
            JobState::Queued => "queued",
            JobState::Running => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "error",
            JobState::Cancelled => "cancelled",
            JobState::Expired => "expired",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Submitted => "SUBMITTED",
            JobState::Queued => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
            JobState::Expired => "EXPIRED",
        };
        f.write_str(name)
    }
}

/// The async-mode container for one submitted batch.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub state: JobState,
    pub correlation_id: CorrelationId,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: u8,
    pub items: Vec<EvaluationItem>,
    /// Populated iff `state == Completed`.
    pub results: Option<Vec<EvaluationResult>>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    /// Reaped once this instant passes.
    pub retention_until: Option<DateTime<Utc>>,
}

/// Server-assigned job id: 128 random bits, hex encoded.
pub fn new_job_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Read model for the status endpoint.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    pub progress: u8,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub correlation_id: CorrelationId,
}

pub struct JobManager {
    store: Arc<dyn JobStore>,
    coordinator: Arc<BatchCoordinator>,
    config: JobConfig,
    /// Cancel flags for jobs currently known to a worker.
    cancel_flags: Mutex<HashMap<String, CancelFlag>>,
    work_available: Notify,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        coordinator: Arc<BatchCoordinator>,
        config: JobConfig,
    ) -> Self {
        Self {
            store,
            coordinator,
            config,
            cancel_flags: Mutex::new(HashMap::new()),
            work_available: Notify::new(),
        }
    }

    /// Persist and enqueue a new job. Returns the id and an estimated
    /// duration in seconds (linear in item count).
    pub async fn submit(
        &self,
        items: Vec<EvaluationItem>,
        ctx: &RequestContext,
    ) -> Result<(String, u64), JobError> {
        let depth = self.store.queue_depth().await?;
        if depth >= self.config.max_queue_depth {
            return Err(JobError::Busy { depth });
        }

        let job_id = new_job_id();
        let estimate = self.config.per_item_estimate.as_secs() * items.len() as u64;
        let job = Job {
            job_id: job_id.clone(),
            state: JobState::Submitted,
            correlation_id: ctx.correlation_id.clone(),
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            items,
            results: None,
            error_kind: None,
            error_message: None,
            retention_until: None,
        };

        self.store.put(job.clone()).await?;

        let queued = Job {
            state: JobState::Queued,
            ..job
        };
        self.store
            .compare_and_set(&job_id, JobState::Submitted, queued)
            .await?;
        self.store.enqueue(&job_id).await?;
        self.work_available.notify_one();

        tracing::info!(
            correlation_id = %ctx.correlation_id,
            job_id = %job_id,
            estimate_secs = estimate,
            "job submitted"
        );
        Ok((job_id, estimate.max(1)))
    }

    /// Pure read of job status.
    pub async fn status(&self, job_id: &str) -> Result<JobStatus, JobError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound {
                job_id: job_id.to_string(),
            })?;
        Ok(JobStatus {
            job_id: job.job_id,
            state: job.state,
            progress: job.progress,
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            correlation_id: job.correlation_id,
        })
    }

    /// Results, only once the job is COMPLETED.
    pub async fn results(&self, job_id: &str) -> Result<Vec<EvaluationResult>, JobError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound {
                job_id: job_id.to_string(),
            })?;

        match job.state {
            JobState::Completed => Ok(job.results.unwrap_or_default()),
            JobState::Failed => Err(JobError::Failed {
                job_id: job.job_id,
                kind: job.error_kind.unwrap_or(ErrorKind::Internal),
                message: job.error_message.unwrap_or_default(),
            }),
            JobState::Cancelled => Err(JobError::Failed {
                job_id: job.job_id,
                kind: ErrorKind::Cancelled,
                message: "job cancelled".to_string(),
            }),
            JobState::Expired => Err(JobError::Failed {
                job_id: job.job_id,
                kind: ErrorKind::Timeout,
                message: "job expired before completing".to_string(),
            }),
            state => Err(JobError::NotReady {
                job_id: job.job_id,
                state: state.as_wire().to_string(),
            }),
        }
    }

    /// Request cancellation. Queued jobs cancel immediately; running jobs
    /// observe the flag at the next task boundary.
    pub async fn cancel(&self, job_id: &str) -> Result<(), JobError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound {
                job_id: job_id.to_string(),
            })?;

        match job.state {
            JobState::Submitted | JobState::Queued => {
                self.flag_for(job_id).cancel();
                let expected = job.state;
                let cancelled = self.finalize(job, JobState::Cancelled, None, None);
                self.store
                    .compare_and_set(job_id, expected, cancelled)
                    .await?;
                tracing::info!(job_id, "job cancelled before start");
                Ok(())
            }
            JobState::Running => {
                self.flag_for(job_id).cancel();
                tracing::info!(job_id, "cancel flag set for running job");
                Ok(())
            }
            state => Err(JobError::CancelNotPermitted {
                state: state.to_string(),
            }),
        }
    }

    /// Worker loop: dequeue, run via the batch coordinator, persist the
    /// terminal state. Store failures back off exponentially and resume.
    pub async fn run_worker(self: Arc<Self>) {
        let mut backoff = Duration::from_millis(500);
        loop {
            match self.store.dequeue().await {
                Err(e) => {
                    tracing::warn!(error = %e, "job store unavailable, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                }
                Ok(None) => {
                    backoff = Duration::from_millis(500);
                    let _ = tokio::time::timeout(
                        Duration::from_millis(500),
                        self.work_available.notified(),
                    )
                    .await;
                }
                Ok(Some(job_id)) => {
                    backoff = Duration::from_millis(500);
                    if let Err(e) = self.process(&job_id).await {
                        tracing::error!(job_id = %job_id, error = %e, "job processing failed");
                    }
                }
            }
        }
    }

    async fn process(&self, job_id: &str) -> Result<(), JobError> {
        let Some(job) = self.store.get(job_id).await? else {
            tracing::debug!(job_id, "dequeued job no longer exists");
            return Ok(());
        };
        if job.state != JobState::Queued {
            // Cancelled (or already claimed) between enqueue and dequeue.
            tracing::debug!(job_id, state = %job.state, "skipping dequeued job");
            return Ok(());
        }

        let running = Job {
            state: JobState::Running,
            started_at: Some(Utc::now()),
            ..job.clone()
        };
        match self
            .store
            .compare_and_set(job_id, JobState::Queued, running.clone())
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) | Err(StoreError::NotFound { .. }) => {
                tracing::debug!(job_id, "lost claim race for job");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let cancel = self.flag_for(job_id);
        let ctx = RequestContext::new(running.correlation_id.clone());
        let deadline = tokio::time::Instant::now() + self.config.job_timeout;

        let progress_cb: ProgressCallback = {
            let manager_store = Arc::clone(&self.store);
            let job_id = job_id.to_string();
            Arc::new(move |percent, _| {
                let store = Arc::clone(&manager_store);
                let job_id = job_id.clone();
                // Fire-and-forget: progress is advisory and monotonic. The
                // compare_and_set keeps a late write from clobbering a
                // terminal state.
                tokio::spawn(async move {
                    if let Ok(Some(mut job)) = store.get(&job_id).await {
                        if job.state == JobState::Running && percent > job.progress {
                            job.progress = percent;
                            let _ = store
                                .compare_and_set(&job_id, JobState::Running, job)
                                .await;
                        }
                    }
                });
            })
        };

        let batch_outcome = self
            .coordinator
            .run_batch(
                running.items.clone(),
                &ctx,
                &cancel,
                Some(deadline),
                Some(progress_cb),
            )
            .await;

        let outcome = match batch_outcome {
            // No partial results for cancelled jobs.
            _ if cancel.is_cancelled() => self.finalize(running, JobState::Cancelled, None, None),
            Ok(results) => self.finalize(running, JobState::Completed, Some(results), None),
            Err(e) => {
                tracing::error!(job_id, error = %e, "batch execution failed, marking job FAILED");
                self.finalize(
                    running,
                    JobState::Failed,
                    None,
                    Some((e.kind(), e.to_string())),
                )
            }
        };

        match self
            .store
            .compare_and_set(job_id, JobState::Running, outcome)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict { found, .. }) => {
                tracing::warn!(job_id, found, "lost terminal-state race, discarding result");
            }
            Err(e) => return Err(e.into()),
        }

        self.cancel_flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id);
        Ok(())
    }

    /// Reaper loop: remove jobs past retention, expire orphaned RUNNING
    /// jobs older than the hard ceiling (twice the job timeout).
    pub async fn run_reaper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.reaper_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.reap_once().await {
                tracing::warn!(error = %e, "reaper pass failed");
            }
        }
    }

    async fn reap_once(&self) -> Result<(), JobError> {
        let now = Utc::now();

        for job_id in self.store.list_expired(now).await? {
            tracing::info!(job_id = %job_id, "reaping job past retention");
            self.store.delete(&job_id).await?;
        }

        let ceiling = chrono::Duration::from_std(self.config.job_timeout * 2)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        for job_id in self.store.list_stale_running(now - ceiling).await? {
            let Some(job) = self.store.get(&job_id).await? else {
                continue;
            };
            tracing::warn!(job_id = %job_id, "expiring orphaned running job");
            let expired = self.finalize(job, JobState::Expired, None, None);
            let _ = self
                .store
                .compare_and_set(&job_id, JobState::Running, expired)
                .await;
        }
        Ok(())
    }

    fn finalize(
        &self,
        job: Job,
        state: JobState,
        results: Option<Vec<EvaluationResult>>,
        error: Option<(ErrorKind, String)>,
    ) -> Job {
        let completed_at = Utc::now();
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        let (error_kind, error_message) = match error {
            Some((kind, message)) => (Some(kind), Some(message)),
            None => (None, None),
        };
        Job {
            progress: if state == JobState::Completed { 100 } else { job.progress },
            state,
            completed_at: Some(completed_at),
            retention_until: Some(completed_at + retention),
            results,
            error_kind,
            error_message,
            ..job
        }
    }

    fn flag_for(&self, job_id: &str) -> CancelFlag {
        self.cancel_flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(job_id.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_shape() {
        let id = new_job_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_job_id());
    }

    #[test]
    fn wire_state_spelling() {
        assert_eq!(JobState::Running.as_wire(), "processing");
        assert_eq!(JobState::Failed.as_wire(), "error");
        assert!(JobState::Expired.is_terminal());
        assert!(!JobState::Queued.is_terminal());
    }
}
