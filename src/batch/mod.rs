//! Concurrent batch evaluation with a bounded worker pool.
//!
//! Items run independently, up to `max_concurrent_evaluations` in flight.
//! On success the output vector has the same length and order as the
//! input: one result per item, success or failure folded into that item's
//! result. A per-item timeout plus a batch-level sum-guard keep a slow
//! item from starving its siblings past the job deadline. Only a failure
//! that cannot be attributed to any item (a panicked worker) surfaces as
//! a [`BatchError`]; the job manager maps that to the job-level FAILED
//! state.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::Settings;
use crate::correlation::RequestContext;
use crate::error::{BatchError, ErrorKind};
use crate::graph::{CancelFlag, GraphRunner};
use crate::model::{EvaluationItem, EvaluationResult};

/// Progress observer: `(percent 0..=100, completed item index)`.
pub type ProgressCallback = Arc<dyn Fn(u8, usize) + Send + Sync>;

pub struct BatchCoordinator {
    runner: Arc<GraphRunner>,
    max_concurrent: usize,
    item_timeout: Duration,
}

impl BatchCoordinator {
    pub fn new(runner: Arc<GraphRunner>, settings: &Settings) -> Self {
        Self {
            runner,
            max_concurrent: settings.batch.max_concurrent_evaluations.max(1),
            item_timeout: settings.orchestrator.item_timeout,
        }
    }

    /// Evaluate a batch. `batch_deadline` is the sum-guard; items that
    /// cannot start (or finish) before it yield TIMEOUT results.
    pub async fn run_batch(
        &self,
        items: Vec<EvaluationItem>,
        ctx: &RequestContext,
        cancel: &CancelFlag,
        batch_deadline: Option<Instant>,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<EvaluationResult>, BatchError> {
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut join_set: JoinSet<(usize, EvaluationResult)> = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let permits = Arc::clone(&permits);
            let completed = Arc::clone(&completed);
            let runner = Arc::clone(&self.runner);
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            let progress = progress.clone();
            let item_timeout = self.item_timeout;

            join_set.spawn(async move {
                // Pool-closure cannot happen while the JoinSet is alive.
                let _permit = match permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            EvaluationResult::failed(
                                &item.id,
                                ErrorKind::Internal,
                                "worker pool closed",
                            ),
                        );
                    }
                };

                let budget = match batch_deadline {
                    Some(deadline) => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            return (
                                index,
                                EvaluationResult::failed(
                                    &item.id,
                                    ErrorKind::Timeout,
                                    "batch deadline exceeded before item started",
                                ),
                            );
                        }
                        item_timeout.min(remaining)
                    }
                    None => item_timeout,
                };

                let result = match tokio::time::timeout(
                    budget,
                    runner.run_item(&item, &ctx, &cancel),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => EvaluationResult::failed(
                        &item.id,
                        ErrorKind::Timeout,
                        format!("item evaluation exceeded {}s", budget.as_secs()),
                    ),
                };

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(ref progress) = progress {
                    let percent = ((done * 100) / total).min(100) as u8;
                    progress(percent, index);
                }

                (index, result)
            });
        }

        let mut slots: Vec<Option<EvaluationResult>> = (0..total).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => {
                    // A panicked worker loses its index, so the result can
                    // no longer be attributed to an item. Dropping the set
                    // aborts the remaining workers.
                    tracing::error!(error = %e, "batch worker panicked");
                    return Err(BatchError::WorkerPanic {
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut results = Vec::with_capacity(total);
        for slot in slots {
            match slot {
                Some(result) => results.push(result),
                None => {
                    return Err(BatchError::WorkerPanic {
                        reason: "worker terminated without reporting a result".to_string(),
                    });
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmProvider;
    use crate::ocr::NoneOcrClient;

    fn items(n: usize) -> Vec<EvaluationItem> {
        (0..n)
            .map(|i| EvaluationItem {
                id: format!("IC-{i:03}"),
                category: "ops".into(),
                control_description: "daily backup is verified".into(),
                test_procedure: "inspect backup log".into(),
                evidence_link: String::new(),
                evidence_files: Vec::new(),
            })
            .collect()
    }

    fn coordinator(llm: MockLlmProvider) -> BatchCoordinator {
        let settings = Settings::for_tests();
        let runner = Arc::new(GraphRunner::new(
            Arc::new(llm),
            Arc::new(NoneOcrClient),
            settings.clone(),
        ));
        BatchCoordinator::new(runner, &settings)
    }

    #[tokio::test]
    async fn order_and_completeness_preserved() {
        let coordinator = coordinator(MockLlmProvider::new());
        let ctx = RequestContext::generate();
        let batch = items(7);
        let expected: Vec<String> = batch.iter().map(|i| i.id.clone()).collect();

        let results = coordinator
            .run_batch(batch, &ctx, &CancelFlag::new(), None, None)
            .await
            .unwrap();

        assert_eq!(results.len(), 7);
        let got: Vec<String> = results.iter().map(|r| r.id.clone()).collect();
        assert_eq!(got, expected);
        assert!(results.iter().all(|r| r.evaluation_result == Some(true)));
    }

    #[tokio::test]
    async fn slow_item_times_out_sibling_succeeds() {
        let slow = MockLlmProvider::new().with_delay(Duration::from_secs(5));
        let settings = {
            let mut s = Settings::for_tests();
            s.orchestrator.item_timeout = Duration::from_millis(100);
            s
        };
        let runner = Arc::new(GraphRunner::new(
            Arc::new(slow),
            Arc::new(NoneOcrClient),
            settings.clone(),
        ));
        let coordinator = BatchCoordinator::new(runner, &settings);

        let ctx = RequestContext::generate();
        let results = coordinator
            .run_batch(items(2), &ctx, &CancelFlag::new(), None, None)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        for result in &results {
            let failure = result.error.as_ref().expect("expected timeout");
            assert_eq!(failure.kind, ErrorKind::Timeout);
        }
    }

    #[tokio::test]
    async fn progress_reaches_one_hundred() {
        let coordinator = coordinator(MockLlmProvider::new());
        let ctx = RequestContext::generate();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);

        let progress: ProgressCallback = Arc::new(move |percent, _| {
            seen_cb.lock().unwrap().push(percent);
        });

        coordinator
            .run_batch(items(4), &ctx, &CancelFlag::new(), None, Some(progress))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(*seen.last().unwrap(), 100);
    }

    #[tokio::test]
    async fn expired_batch_deadline_fails_fast() {
        let coordinator = coordinator(MockLlmProvider::new());
        let ctx = RequestContext::generate();
        let past = Instant::now() - Duration::from_secs(1);

        let results = coordinator
            .run_batch(items(3), &ctx, &CancelFlag::new(), Some(past), None)
            .await
            .unwrap();

        assert!(results
            .iter()
            .all(|r| r.error.as_ref().map(|f| f.kind) == Some(ErrorKind::Timeout)));
    }

    #[tokio::test]
    async fn empty_batch_yields_empty_results() {
        let coordinator = coordinator(MockLlmProvider::new());
        let ctx = RequestContext::generate();
        let results = coordinator
            .run_batch(Vec::new(), &ctx, &CancelFlag::new(), None, None)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    /// A backend that panics instead of answering; drives the worker-panic
    /// path that cannot be attributed to any single item.
    struct PanickingLlm;

    #[async_trait::async_trait]
    impl crate::llm::LlmProvider for PanickingLlm {
        async fn complete(
            &self,
            _req: crate::llm::CompletionRequest,
        ) -> Result<crate::llm::CompletionResponse, crate::error::LlmError> {
            panic!("provider blew up");
        }

        fn provider_name(&self) -> &str {
            "panicking"
        }

        fn model_name(&self) -> &str {
            "panicking"
        }

        fn cost_per_token(&self) -> (rust_decimal::Decimal, rust_decimal::Decimal) {
            (rust_decimal::Decimal::ZERO, rust_decimal::Decimal::ZERO)
        }
    }

    #[tokio::test]
    async fn panicked_worker_surfaces_batch_error() {
        let settings = Settings::for_tests();
        let runner = Arc::new(GraphRunner::new(
            Arc::new(PanickingLlm),
            Arc::new(NoneOcrClient),
            settings.clone(),
        ));
        let coordinator = BatchCoordinator::new(runner, &settings);

        let ctx = RequestContext::generate();
        let err = coordinator
            .run_batch(items(2), &ctx, &CancelFlag::new(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::WorkerPanic { .. }));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
