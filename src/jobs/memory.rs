//! In-memory job store: a mutex-protected map plus a FIFO queue.
//!
//! Used by tests and single-node deployments. Locks are held only for the
//! duration of a map operation, never across an await point.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::jobs::store::JobStore;
use crate::jobs::{Job, JobState};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
    queue: Mutex<VecDeque<String>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put(&self, job: Job) -> Result<(), StoreError> {
        self.jobs().insert(job.job_id.clone(), job);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs().get(job_id).cloned())
    }

    async fn compare_and_set(
        &self,
        job_id: &str,
        expected: JobState,
        new_job: Job,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs();
        let current = jobs.get(job_id).ok_or_else(|| StoreError::NotFound {
            job_id: job_id.to_string(),
        })?;
        if current.state != expected {
            return Err(StoreError::Conflict {
                job_id: job_id.to_string(),
                expected: expected.to_string(),
                found: current.state.to_string(),
            });
        }
        jobs.insert(job_id.to_string(), new_job);
        Ok(())
    }

    async fn enqueue(&self, job_id: &str) -> Result<(), StoreError> {
        self.queue().push_back(job_id.to_string());
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<String>, StoreError> {
        Ok(self.queue().pop_front())
    }

    async fn delete(&self, job_id: &str) -> Result<(), StoreError> {
        self.jobs().remove(job_id);
        Ok(())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        Ok(self
            .jobs()
            .values()
            .filter(|j| j.retention_until.is_some_and(|t| t < now))
            .map(|j| j.job_id.clone())
            .collect())
    }

    async fn list_stale_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        Ok(self
            .jobs()
            .values()
            .filter(|j| {
                j.state == JobState::Running && j.started_at.is_some_and(|t| t < cutoff)
            })
            .map(|j| j.job_id.clone())
            .collect())
    }

    async fn queue_depth(&self) -> Result<usize, StoreError> {
        Ok(self.queue().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;

    fn job(id: &str, state: JobState) -> Job {
        Job {
            job_id: id.to_string(),
            state,
            correlation_id: CorrelationId::generate(),
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            items: Vec::new(),
            results: None,
            error_kind: None,
            error_message: None,
            retention_until: None,
        }
    }

    #[tokio::test]
    async fn put_get_delete() {
        let store = MemoryJobStore::new();
        store.put(job("j1", JobState::Submitted)).await.unwrap();
        assert!(store.get("j1").await.unwrap().is_some());
        store.delete("j1").await.unwrap();
        assert!(store.get("j1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fifo_queue_ordering() {
        let store = MemoryJobStore::new();
        store.enqueue("a").await.unwrap();
        store.enqueue("b").await.unwrap();
        assert_eq!(store.queue_depth().await.unwrap(), 2);
        assert_eq!(store.dequeue().await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.dequeue().await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.dequeue().await.unwrap(), None);
    }

    #[tokio::test]
    async fn compare_and_set_guards_terminal_states() {
        let store = MemoryJobStore::new();
        store.put(job("j1", JobState::Running)).await.unwrap();

        // First worker wins.
        store
            .compare_and_set("j1", JobState::Running, job("j1", JobState::Completed))
            .await
            .unwrap();

        // Second worker loses the race and must discard its result.
        let err = store
            .compare_and_set("j1", JobState::Running, job("j1", JobState::Failed))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(
            store.get("j1").await.unwrap().unwrap().state,
            JobState::Completed
        );
    }

    #[tokio::test]
    async fn compare_and_set_missing_job() {
        let store = MemoryJobStore::new();
        let err = store
            .compare_and_set("ghost", JobState::Queued, job("ghost", JobState::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn expired_and_stale_listing() {
        let store = MemoryJobStore::new();

        let mut done = job("done", JobState::Completed);
        done.retention_until = Some(Utc::now() - chrono::Duration::seconds(5));
        store.put(done).await.unwrap();

        let mut stuck = job("stuck", JobState::Running);
        stuck.started_at = Some(Utc::now() - chrono::Duration::hours(3));
        store.put(stuck).await.unwrap();

        store.put(job("fresh", JobState::Queued)).await.unwrap();

        assert_eq!(store.list_expired(Utc::now()).await.unwrap(), vec!["done"]);
        assert_eq!(
            store
                .list_stale_running(Utc::now() - chrono::Duration::hours(1))
                .await
                .unwrap(),
            vec!["stuck"]
        );
    }
}
