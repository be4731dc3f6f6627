//! Durable job store abstraction.
//!
//! The job manager needs only this narrow interface; swapping the
//! in-memory implementation for a cloud table + queue never touches the
//! manager. All state mutations go through `compare_and_set` or the queue
//! primitives, which is what gives terminal states at-most-once semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::jobs::{Job, JobState};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or overwrite a job record.
    async fn put(&self, job: Job) -> Result<(), StoreError>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Replace the record only if its current state matches `expected`.
    ///
    /// Returns `Conflict` otherwise; a worker that loses this race must
    /// discard its result.
    async fn compare_and_set(
        &self,
        job_id: &str,
        expected: JobState,
        new_job: Job,
    ) -> Result<(), StoreError>;

    /// Append the job id to the FIFO work queue.
    async fn enqueue(&self, job_id: &str) -> Result<(), StoreError>;

    /// Pop the oldest pending job id, if any.
    async fn dequeue(&self) -> Result<Option<String>, StoreError>;

    async fn delete(&self, job_id: &str) -> Result<(), StoreError>;

    /// Jobs whose retention window has passed.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError>;

    /// RUNNING jobs that started before `cutoff` (orphan candidates).
    async fn list_stale_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError>;

    /// Number of ids currently queued.
    async fn queue_depth(&self) -> Result<usize, StoreError>;
}
