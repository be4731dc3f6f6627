//! Deterministic mock LLM backend.
//!
//! Serves two purposes: the test backbone for the whole pipeline, and the
//! graceful-degradation path when no credentials are configured. Responses
//! are canned per reasoning step, keyed on marker phrases the prompt
//! templates carry. Tests can additionally script delays and failure
//! injection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::LlmError;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Usage,
};

/// Which failure the mock injects when scripted to fail.
#[derive(Debug, Clone, Copy)]
pub enum MockFailure {
    Unavailable,
    RateLimited,
    Timeout,
    InvalidRequest,
}

pub struct MockLlmProvider {
    /// Artificial latency before every response.
    delay: Option<Duration>,
    /// When set, `delay` applies only to prompts containing this marker.
    delay_marker: Option<String>,
    /// Inject failures for prompts containing this marker.
    fail_marker: Option<String>,
    /// How many matching calls fail before succeeding. u32::MAX = always.
    fail_remaining: AtomicU32,
    fail_kind: MockFailure,
    /// Verdict word the judgment response carries.
    verdict: String,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            delay: None,
            delay_marker: None,
            fail_marker: None,
            fail_remaining: AtomicU32::new(0),
            fail_kind: MockFailure::Unavailable,
            verdict: "effective".to_string(),
        }
    }

    /// Sleep this long before every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleep only before responses whose prompt contains `marker`.
    pub fn with_delay_matching(mut self, marker: impl Into<String>, delay: Duration) -> Self {
        self.delay = Some(delay);
        self.delay_marker = Some(marker.into());
        self
    }

    /// Fail the first `times` calls whose prompt contains `marker`.
    pub fn with_failures(mut self, marker: impl Into<String>, times: u32, kind: MockFailure) -> Self {
        self.fail_marker = Some(marker.into());
        self.fail_remaining = AtomicU32::new(times);
        self.fail_kind = kind;
        self
    }

    /// Override the canned verdict (default "effective").
    pub fn with_verdict(mut self, verdict: impl Into<String>) -> Self {
        self.verdict = verdict.into();
        self
    }

    fn make_failure(&self) -> LlmError {
        match self.fail_kind {
            MockFailure::Unavailable => LlmError::Unavailable {
                provider: "mock".into(),
                reason: "scripted failure".into(),
            },
            MockFailure::RateLimited => LlmError::RateLimited {
                provider: "mock".into(),
                retry_after: Some(Duration::from_millis(1)),
            },
            MockFailure::Timeout => LlmError::Timeout {
                provider: "mock".into(),
                elapsed: Duration::from_secs(0),
            },
            MockFailure::InvalidRequest => LlmError::InvalidRequest {
                provider: "mock".into(),
                reason: "scripted failure".into(),
            },
        }
    }

    fn canned_response(&self, prompt: &str) -> String {
        if prompt.contains("Select the reasoning tasks") {
            return r#"{"tasks": ["A1", "A5"], "rationale": "Search the evidence for the approval, then reason over the control description."}"#.to_string();
        }
        if prompt.contains("Review the proposed plan") {
            return r#"{"gaps": [], "assessment": "The plan covers evidence search and reasoning."}"#.to_string();
        }
        if prompt.contains("Render a verdict") {
            return format!(
                r#"{{"verdict": "{}", "basis": "The signed monthly reconciliation report shows reviewer approval within the period.\nNo exceptions were noted in the sampled evidence.", "documentReference": "monthly reconciliation approved by CFO on 2026-03-31"}}"#,
                self.verdict
            );
        }
        if prompt.contains("Check whether the verdict") {
            return r#"{"supported": true, "assessment": "The verdict follows from the recorded findings."}"#.to_string();
        }
        if prompt.contains("Reflect on the completed evaluation") {
            return r#"{"annotation": "Judgment consistent across findings; no contrary evidence observed."}"#.to_string();
        }
        if prompt.contains("Find passages in the evidence") {
            return r#"{"passages": [{"text": "monthly reconciliation approved by CFO on 2026-03-31", "score": 0.92}]}"#.to_string();
        }
        if prompt.contains("Describe the image evidence") {
            return r#"{"description": "A signed approval form with a visible signature block.", "features": {"signature": true, "date": true}}"#.to_string();
        }
        if prompt.contains("Extract structured records") {
            return r#"{"records": [{"field": "approver", "value": "CFO"}, {"field": "date", "value": "2026-03-31"}]}"#.to_string();
        }
        if prompt.contains("Work through the procedure step by step") {
            return r#"{"steps": ["Identify the reconciliation period", "Locate the approval signature", "Compare dates"], "conclusion": "The approval precedes the close deadline."}"#.to_string();
        }
        if prompt.contains("Infer whether the evidence satisfies") {
            return r#"{"inference": "The evidence demonstrates the control operated in the period.", "supported": true}"#.to_string();
        }
        if prompt.contains("Consolidate the document extractions") {
            return r#"{"summary": "All documents describe the same approved reconciliation cycle."}"#.to_string();
        }
        if prompt.contains("Analyze the records for anomalies") {
            return r#"{"anomalies": [], "assessment": "No irregular entries in the event log."}"#.to_string();
        }
        if prompt.contains("segregation-of-duties conflicts") {
            return r#"{"conflicts": [], "assessment": "Preparer and approver are distinct."}"#.to_string();
        }
        // Unknown prompt shape: echo something inert but parseable.
        r#"{"note": "mock response"}"#.to_string()
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt: String = req
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if let Some(delay) = self.delay {
            let applies = self
                .delay_marker
                .as_ref()
                .is_none_or(|marker| prompt.contains(marker.as_str()));
            if applies {
                tokio::time::sleep(delay).await;
            }
        }

        if let Some(ref marker) = self.fail_marker {
            if prompt.contains(marker.as_str()) {
                let remaining = self.fail_remaining.load(Ordering::SeqCst);
                if remaining > 0 {
                    if remaining != u32::MAX {
                        self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
                    }
                    return Err(self.make_failure());
                }
            }
        }

        let content = self.canned_response(&prompt);
        Ok(CompletionResponse {
            content,
            finish_reason: FinishReason::Stop,
            usage: Usage {
                input_tokens: (prompt.len() / 4) as u32,
                output_tokens: 64,
            },
        })
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::ChatMessage;

    #[tokio::test]
    async fn plan_prompt_gets_plan_json() {
        let mock = MockLlmProvider::new();
        let req = CompletionRequest::new(vec![ChatMessage::user(
            "Select the reasoning tasks for this item.",
        )]);
        let resp = mock.complete(req).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&resp.content).unwrap();
        assert!(parsed["tasks"].is_array());
    }

    #[tokio::test]
    async fn scripted_failures_then_success() {
        let mock = MockLlmProvider::new().with_failures("Render a verdict", 2, MockFailure::Unavailable);
        let req = CompletionRequest::new(vec![ChatMessage::user("Render a verdict now.")]);

        assert!(mock.complete(req.clone()).await.is_err());
        assert!(mock.complete(req.clone()).await.is_err());
        assert!(mock.complete(req).await.is_ok());
    }

    #[tokio::test]
    async fn failure_scoped_to_marker() {
        let mock = MockLlmProvider::new().with_failures("Render a verdict", u32::MAX, MockFailure::Unavailable);
        let other = CompletionRequest::new(vec![ChatMessage::user(
            "Find passages in the evidence matching the query.",
        )]);
        assert!(mock.complete(other).await.is_ok());
    }

    #[tokio::test]
    async fn verdict_override() {
        let mock = MockLlmProvider::new().with_verdict("deficient");
        let req = CompletionRequest::new(vec![ChatMessage::user("Render a verdict now.")]);
        let resp = mock.complete(req).await.unwrap();
        assert!(resp.content.contains("\"deficient\""));
    }
}
