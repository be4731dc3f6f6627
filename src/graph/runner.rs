//! The per-item evaluation state machine.
//!
//! Drives one item through plan -> plan review -> execute -> judge ->
//! judgment review -> (reflect) -> done. Nodes receive the scratch
//! [`GraphState`] by exclusive reference; the driver is strictly
//! sequential so reasoning stays deterministic and cost attribution per
//! item stays simple.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::Instrument;

use crate::config::Settings;
use crate::correlation::RequestContext;
use crate::error::GraphError;
use crate::evidence::{ExtractedEvidence, build_artifacts, extract_all};
use crate::graph::judge;
use crate::graph::planner;
use crate::graph::retry::{RetryPolicy, retry};
use crate::graph::state::{Finding, GraphState};
use crate::llm::LlmProvider;
use crate::model::{EvaluationItem, EvaluationResult};
use crate::ocr::OcrClient;
use crate::tasks::{TaskContext, run_task};

/// Cooperative cancellation flag, observed at every task boundary.
///
/// In-flight provider calls are not aborted; their output is discarded
/// when the flag is observed at the next boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs the evaluation state machine for single items.
pub struct GraphRunner {
    llm: Arc<dyn LlmProvider>,
    ocr: Arc<dyn OcrClient>,
    settings: Settings,
    retry_policy: RetryPolicy,
}

impl GraphRunner {
    pub fn new(llm: Arc<dyn LlmProvider>, ocr: Arc<dyn OcrClient>, settings: Settings) -> Self {
        Self {
            llm,
            ocr,
            settings,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Override the transient-failure retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Evaluate one item. Always produces a result; failures are embedded.
    ///
    /// The whole evaluation runs inside a span carrying the correlation id,
    /// so every log record underneath inherits it.
    pub async fn run_item(
        &self,
        item: &EvaluationItem,
        ctx: &RequestContext,
        cancel: &CancelFlag,
    ) -> EvaluationResult {
        let span = tracing::info_span!(
            "evaluate_item",
            correlation_id = %ctx.correlation_id,
            item = %item.id,
        );

        match self.drive(item, ctx, cancel).instrument(span).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    correlation_id = %ctx.correlation_id,
                    item = %item.id,
                    error = %e,
                    "item evaluation failed"
                );
                EvaluationResult::failed(&item.id, e.kind(), e.to_string())
            }
        }
    }

    async fn drive(
        &self,
        item: &EvaluationItem,
        ctx: &RequestContext,
        cancel: &CancelFlag,
    ) -> Result<EvaluationResult, GraphError> {
        self.check_cancel(cancel)?;

        let extracted = extract_all(
            &item.evidence_files,
            self.ocr.as_ref(),
            &self.settings.evidence,
            &self.settings.ocr.language,
        )
        .await;

        let mut state = GraphState::default();

        self.plan_phase(item, &extracted, &mut state, cancel).await?;
        self.execute_phase(item, &extracted, &mut state, cancel).await?;
        self.judge_phase(item, &mut state, cancel).await?;

        if self.settings.orchestrator.self_reflection_enabled {
            self.reflect_phase(item, &mut state).await;
        }

        // Judgment is present after judge_phase; the unwrap-free pattern
        // keeps the compiler honest about it.
        let Some(judgment) = state.judgment.take() else {
            return Err(GraphError::AllTasksFailed {
                count: state.findings.len(),
                last: "no judgment produced".to_string(),
            });
        };

        let mut basis = judgment.basis.clone();
        if let Some(ref reflection) = state.self_reflection {
            if !reflection.is_empty() {
                basis.push_str("\n\nReflection: ");
                basis.push_str(reflection);
            }
        }

        let artifacts = build_artifacts(
            &item.evidence_files,
            &extracted,
            &judgment.document_reference,
            &item.evidence_link,
        );

        Ok(EvaluationResult {
            id: item.id.clone(),
            evaluation_result: Some(judgment.verdict),
            execution_plan_summary: state.plan_summary(),
            judgment_basis: basis,
            document_reference: judgment.document_reference,
            file_name: item
                .evidence_files
                .first()
                .map(|f| f.file_name.clone())
                .unwrap_or_default(),
            evidence_files: artifacts,
            error: None,
        })
    }

    /// S_PLAN and S_PLAN_REVIEW.
    async fn plan_phase(
        &self,
        item: &EvaluationItem,
        extracted: &ExtractedEvidence,
        state: &mut GraphState,
        cancel: &CancelFlag,
    ) -> Result<(), GraphError> {
        let orchestrator = &self.settings.orchestrator;

        if orchestrator.skip_plan_creation {
            state.plan = planner::default_plan();
            return Ok(());
        }

        self.check_cancel(cancel)?;
        state.plan = self.plan_once(item, extracted, None).await?;

        if state.plan.is_empty() {
            // Zero tasks is a planning failure; one retry, then the
            // mechanical default.
            tracing::warn!(item = %item.id, "plan contained zero tasks, retrying once");
            state.plan = self
                .plan_once(
                    item,
                    extracted,
                    Some("The previous plan contained zero tasks. Select at least one task."),
                )
                .await
                .unwrap_or_default();
            if state.plan.is_empty() {
                tracing::warn!(item = %item.id, "planning failed twice, using default plan");
                state.plan = planner::default_plan();
                return Ok(());
            }
        }

        while state.plan_revision_count < orchestrator.max_plan_revisions {
            self.check_cancel(cancel)?;
            let gaps = match planner::review_plan(item, &state.plan, self.llm.as_ref()).await {
                Ok(gaps) => gaps,
                Err(e) => {
                    tracing::warn!(item = %item.id, error = %e, "plan review failed, accepting plan");
                    break;
                }
            };
            if gaps.is_empty() {
                break;
            }

            state.plan_revision_count += 1;
            tracing::info!(
                item = %item.id,
                revision = state.plan_revision_count,
                gaps = gaps.len(),
                "revising plan from review feedback"
            );
            let feedback = gaps.join("\n");
            match self.plan_once(item, extracted, Some(&feedback)).await {
                Ok(revised) if !revised.is_empty() => state.plan = revised,
                Ok(_) | Err(_) => break,
            }
        }

        Ok(())
    }

    async fn plan_once(
        &self,
        item: &EvaluationItem,
        extracted: &ExtractedEvidence,
        feedback: Option<&str>,
    ) -> Result<Vec<crate::tasks::TaskKind>, GraphError> {
        retry(
            self.retry_policy,
            None,
            |e: &crate::error::LlmError| e.is_transient(),
            || planner::create_plan(item, extracted, self.llm.as_ref(), feedback),
        )
        .await
        .map_err(GraphError::Llm)
    }

    /// S_EXECUTE: strictly ordered by the plan; task-level errors become
    /// negative findings unless every task fails.
    async fn execute_phase(
        &self,
        item: &EvaluationItem,
        extracted: &ExtractedEvidence,
        state: &mut GraphState,
        cancel: &CancelFlag,
    ) -> Result<(), GraphError> {
        let task_ctx = TaskContext {
            item,
            evidence: extracted,
        };

        for kind in state.plan.clone() {
            self.check_cancel(cancel)?;

            let outcome = retry(
                self.retry_policy,
                None,
                |e: &crate::error::TaskError| e.is_transient(),
                || run_task(kind, &task_ctx, self.llm.as_ref()),
            )
            .await;

            match outcome {
                Ok(result) => state.findings.push(Finding::from_result(&result)),
                Err(e) => {
                    tracing::warn!(item = %item.id, task = kind.tag(), error = %e, "task failed permanently");
                    state.findings.push(Finding::failed(kind, e.to_string()));
                }
            }
        }

        if state.all_tasks_failed() {
            let last = state
                .findings
                .last()
                .map(|f| f.summary.clone())
                .unwrap_or_default();
            return Err(GraphError::AllTasksFailed {
                count: state.findings.len(),
                last,
            });
        }

        Ok(())
    }

    /// S_JUDGE and S_JUDGE_REVIEW.
    async fn judge_phase(
        &self,
        item: &EvaluationItem,
        state: &mut GraphState,
        cancel: &CancelFlag,
    ) -> Result<(), GraphError> {
        self.check_cancel(cancel)?;

        let mut judgment = retry(
            self.retry_policy,
            None,
            |e: &crate::error::LlmError| e.is_transient(),
            || judge::render_judgment(item, state, self.llm.as_ref(), None),
        )
        .await
        .map_err(GraphError::Llm)?;

        while state.judgment_revision_count < self.settings.orchestrator.max_judgment_revisions {
            self.check_cancel(cancel)?;
            match judge::review_judgment(&judgment, state, self.llm.as_ref()).await {
                Ok((true, _)) => break,
                Ok((false, assessment)) => {
                    state.judgment_revision_count += 1;
                    tracing::info!(
                        item = %item.id,
                        revision = state.judgment_revision_count,
                        "revising judgment from review feedback"
                    );
                    judgment = retry(
                        self.retry_policy,
                        None,
                        |e: &crate::error::LlmError| e.is_transient(),
                        || {
                            judge::render_judgment(
                                item,
                                state,
                                self.llm.as_ref(),
                                Some(&assessment),
                            )
                        },
                    )
                    .await
                    .map_err(GraphError::Llm)?;
                }
                Err(e) => {
                    tracing::warn!(item = %item.id, error = %e, "judgment review failed, accepting verdict");
                    break;
                }
            }
        }

        state.judgment = Some(judgment);
        Ok(())
    }

    /// S_REFLECT: annotate only; the verdict is already final.
    async fn reflect_phase(&self, item: &EvaluationItem, state: &mut GraphState) {
        let Some(ref judgment) = state.judgment else {
            return;
        };
        match judge::reflect(item, judgment, state, self.llm.as_ref()).await {
            Ok(annotation) if !annotation.is_empty() => {
                state.self_reflection = Some(annotation);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(item = %item.id, error = %e, "self-reflection failed, continuing");
            }
        }
    }

    fn check_cancel(&self, cancel: &CancelFlag) -> Result<(), GraphError> {
        if cancel.is_cancelled() {
            Err(GraphError::Cancelled)
        } else {
            Ok(())
        }
    }
}
