//! Per-item working memory for the evaluation state machine.
//!
//! One `GraphState` is created per item and passed by exclusive reference
//! through the node functions; no node retains a reference past its return.
//! The state is discarded once the item's result is produced.

use crate::tasks::{TaskKind, TaskResult};

/// Outcome of one executed task, success or permanent failure.
#[derive(Debug, Clone)]
pub struct Finding {
    pub task: TaskKind,
    pub success: bool,
    /// Task summary on success, failure description otherwise.
    pub summary: String,
}

impl Finding {
    pub fn from_result(result: &TaskResult) -> Self {
        Self {
            task: result.task,
            success: true,
            summary: result.summary.clone(),
        }
    }

    pub fn failed(task: TaskKind, reason: impl Into<String>) -> Self {
        Self {
            task,
            success: false,
            summary: format!("{} failed: {}", task.label(), reason.into()),
        }
    }
}

/// The final judgment for an item.
#[derive(Debug, Clone)]
pub struct Judgment {
    pub verdict: bool,
    /// The verdict word as the model produced it, pre-mapping.
    pub raw_verdict: String,
    pub basis: String,
    pub document_reference: String,
}

/// Scratch state threaded through the state machine.
#[derive(Debug, Default)]
pub struct GraphState {
    pub plan: Vec<TaskKind>,
    pub plan_revision_count: u32,
    pub findings: Vec<Finding>,
    pub judgment_revision_count: u32,
    pub judgment: Option<Judgment>,
    pub self_reflection: Option<String>,
}

impl GraphState {
    /// Summary of the executed plan for the result payload.
    pub fn plan_summary(&self) -> String {
        self.plan
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Findings rendered for the judgment prompt.
    pub fn findings_digest(&self) -> String {
        self.findings
            .iter()
            .map(|f| {
                format!(
                    "[{}] {}: {}",
                    if f.success { "ok" } else { "failed" },
                    f.task.tag(),
                    f.summary
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn all_tasks_failed(&self) -> bool {
        !self.findings.is_empty() && self.findings.iter().all(|f| !f.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_summary_ordering() {
        let state = GraphState {
            plan: vec![TaskKind::SemanticSearch, TaskKind::SemanticReasoning],
            ..Default::default()
        };
        assert_eq!(
            state.plan_summary(),
            "A1 (semantic search) -> A5 (semantic reasoning)"
        );
    }

    #[test]
    fn all_tasks_failed_requires_findings() {
        let mut state = GraphState::default();
        assert!(!state.all_tasks_failed());

        state.findings.push(Finding::failed(TaskKind::SemanticReasoning, "boom"));
        assert!(state.all_tasks_failed());

        state.findings.push(Finding {
            task: TaskKind::SemanticSearch,
            success: true,
            summary: "found it".into(),
        });
        assert!(!state.all_tasks_failed());
    }
}
