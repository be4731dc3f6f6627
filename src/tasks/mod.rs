//! The reasoning task library.
//!
//! Eight specialized tasks compose into an evaluation plan. Each task is a
//! pure function over `(TaskContext, LlmProvider)`: a prompt template, one
//! completion, and post-parsing of a JSON block from the model output.
//! Tasks are idempotent given identical inputs and share no state.

use serde_json::Value;

use crate::error::TaskError;
use crate::evidence::ExtractedEvidence;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::model::EvaluationItem;

/// The closed set of reasoning tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// A1: semantic search over evidence text.
    SemanticSearch,
    /// A2: image recognition over visual evidence.
    ImageRecognition,
    /// A3: structured data extraction from tables.
    StructuredExtraction,
    /// A4: stepwise numeric/procedural reasoning.
    StepwiseReasoning,
    /// A5: semantic reasoning over control description plus evidence.
    SemanticReasoning,
    /// A6: multi-document consolidation.
    MultiDocConsolidation,
    /// A7: pattern analysis over logs and record sets.
    PatternAnalysis,
    /// A8: segregation-of-duties conflict detection.
    DutySegregation,
}

impl TaskKind {
    pub fn all() -> [TaskKind; 8] {
        [
            TaskKind::SemanticSearch,
            TaskKind::ImageRecognition,
            TaskKind::StructuredExtraction,
            TaskKind::StepwiseReasoning,
            TaskKind::SemanticReasoning,
            TaskKind::MultiDocConsolidation,
            TaskKind::PatternAnalysis,
            TaskKind::DutySegregation,
        ]
    }

    /// Stable tag used in plans and logs.
    pub fn tag(&self) -> &'static str {
        match self {
            TaskKind::SemanticSearch => "A1",
            TaskKind::ImageRecognition => "A2",
            TaskKind::StructuredExtraction => "A3",
            TaskKind::StepwiseReasoning => "A4",
            TaskKind::SemanticReasoning => "A5",
            TaskKind::MultiDocConsolidation => "A6",
            TaskKind::PatternAnalysis => "A7",
            TaskKind::DutySegregation => "A8",
        }
    }

    pub fn from_tag(tag: &str) -> Option<TaskKind> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "A1" => Some(TaskKind::SemanticSearch),
            "A2" => Some(TaskKind::ImageRecognition),
            "A3" => Some(TaskKind::StructuredExtraction),
            "A4" => Some(TaskKind::StepwiseReasoning),
            "A5" => Some(TaskKind::SemanticReasoning),
            "A6" => Some(TaskKind::MultiDocConsolidation),
            "A7" => Some(TaskKind::PatternAnalysis),
            "A8" => Some(TaskKind::DutySegregation),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::SemanticSearch => "semantic search",
            TaskKind::ImageRecognition => "image recognition",
            TaskKind::StructuredExtraction => "structured extraction",
            TaskKind::StepwiseReasoning => "stepwise reasoning",
            TaskKind::SemanticReasoning => "semantic reasoning",
            TaskKind::MultiDocConsolidation => "multi-document consolidation",
            TaskKind::PatternAnalysis => "pattern analysis",
            TaskKind::DutySegregation => "segregation-of-duties detection",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.tag(), self.label())
    }
}

/// Read-only inputs shared by every task in one item's plan.
pub struct TaskContext<'a> {
    pub item: &'a EvaluationItem,
    pub evidence: &'a ExtractedEvidence,
}

/// Outcome of one task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task: TaskKind,
    /// One-paragraph finding used by the judgment prompt.
    pub summary: String,
    /// Parsed structured detail.
    pub detail: Value,
}

/// Run one task against the item.
pub async fn run_task(
    kind: TaskKind,
    ctx: &TaskContext<'_>,
    llm: &dyn LlmProvider,
) -> Result<TaskResult, TaskError> {
    let (instruction, expected_key) = match kind {
        TaskKind::SemanticSearch => (
            format!(
                "Find passages in the evidence that bear on this test procedure.\n\
                 Query: {}\n\nRespond with JSON: {{\"passages\": [{{\"text\": \"...\", \"score\": 0.0}}]}}",
                ctx.item.test_procedure
            ),
            "passages",
        ),
        TaskKind::ImageRecognition => (
            "Describe the image evidence and report whether the expected features \
             (signatures, dates, stamps, approval marks) are present.\n\
             Respond with JSON: {\"description\": \"...\", \"features\": {\"signature\": true}}"
                .to_string(),
            "description",
        ),
        TaskKind::StructuredExtraction => (
            "Extract structured records from the tabular evidence relevant to the control.\n\
             Respond with JSON: {\"records\": [{\"field\": \"...\", \"value\": \"...\"}]}"
                .to_string(),
            "records",
        ),
        TaskKind::StepwiseReasoning => (
            format!(
                "Work through the procedure step by step and state each intermediate conclusion.\n\
                 Procedure: {}\n\nRespond with JSON: {{\"steps\": [\"...\"], \"conclusion\": \"...\"}}",
                ctx.item.test_procedure
            ),
            "conclusion",
        ),
        TaskKind::SemanticReasoning => (
            format!(
                "Infer whether the evidence satisfies the control.\n\
                 Control: {}\n\nRespond with JSON: {{\"inference\": \"...\", \"supported\": true}}",
                ctx.item.control_description
            ),
            "inference",
        ),
        TaskKind::MultiDocConsolidation => (
            "Consolidate the document extractions into one unified summary, noting \
             agreements and contradictions between documents.\n\
             Respond with JSON: {\"summary\": \"...\"}"
                .to_string(),
            "summary",
        ),
        TaskKind::PatternAnalysis => (
            "Analyze the records for anomalies: gaps in sequences, out-of-period \
             entries, unusual values.\n\
             Respond with JSON: {\"anomalies\": [\"...\"], \"assessment\": \"...\"}"
                .to_string(),
            "assessment",
        ),
        TaskKind::DutySegregation => (
            "Inspect the role and approval records for segregation-of-duties conflicts \
             (the same person preparing and approving).\n\
             Respond with JSON: {\"conflicts\": [\"...\"], \"assessment\": \"...\"}"
                .to_string(),
            "assessment",
        ),
    };

    let system = format!(
        "You are the {} step of a control-test evaluation pipeline. \
         Base every statement strictly on the provided evidence; answer with the requested JSON only.",
        kind.label()
    );
    let user = format!(
        "{instruction}\n\nControl category: {}\nControl description: {}\n\nEvidence:\n{}",
        ctx.item.category,
        ctx.item.control_description,
        bounded_evidence(ctx.evidence)
    );

    let request = CompletionRequest::new(vec![
        ChatMessage::system(system),
        ChatMessage::user(user),
    ])
    .with_max_tokens(1024)
    .with_temperature(0.1);

    let response = llm.complete(request).await?;
    let detail = parse_task_json(kind, &response.content, expected_key)?;
    let summary = summarize(kind, &detail, expected_key);

    Ok(TaskResult {
        task: kind,
        summary,
        detail,
    })
}

/// Evidence text is already capped per file at extraction; this guards the
/// total prompt against many-file items.
fn bounded_evidence(evidence: &ExtractedEvidence) -> String {
    const PROMPT_EVIDENCE_CAP: usize = 120_000;
    let combined = evidence.combined_text();
    if combined.is_empty() {
        return "(no evidence attached; reason from the control description and test procedure)"
            .to_string();
    }
    if combined.chars().count() <= PROMPT_EVIDENCE_CAP {
        return combined;
    }
    let kept: String = combined.chars().take(PROMPT_EVIDENCE_CAP).collect();
    format!("{kept}\n[truncated: exceeded {PROMPT_EVIDENCE_CAP} characters]")
}

fn parse_task_json(kind: TaskKind, content: &str, expected_key: &str) -> Result<Value, TaskError> {
    let json_str = extract_json(content).unwrap_or(content);
    let value: Value = serde_json::from_str(json_str).map_err(|e| TaskError::ParseFailed {
        task: kind.tag().to_string(),
        reason: format!("not valid JSON: {e}"),
    })?;
    if value.get(expected_key).is_none() {
        return Err(TaskError::ParseFailed {
            task: kind.tag().to_string(),
            reason: format!("missing '{expected_key}' key"),
        });
    }
    Ok(value)
}

fn summarize(kind: TaskKind, detail: &Value, expected_key: &str) -> String {
    let core = match &detail[expected_key] {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            if items.is_empty() {
                "no findings".to_string()
            } else {
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("; ")
            }
        }
        other => other.to_string(),
    };
    format!("{}: {}", kind.label(), core)
}

/// Extract the JSON object embedded in model output that may contain prose.
pub(crate) fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start < end { Some(&text[start..=end]) } else { None }
}
