//! Judgment, automated judgment review, and self-reflection.

use serde_json::Value;

use crate::error::LlmError;
use crate::graph::state::{GraphState, Judgment};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::model::EvaluationItem;
use crate::tasks::extract_json;

/// Map a free-form verdict word onto the boolean verdict.
///
/// Recognized affirmatives: `effective`, `有効`, `true`, `1`, `pass`.
/// Everything else maps to deficient.
pub fn map_verdict(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "effective" | "有効" | "true" | "1" | "pass"
    )
}

/// Render the boolean verdict plus basis and document reference.
pub async fn render_judgment(
    item: &EvaluationItem,
    state: &GraphState,
    llm: &dyn LlmProvider,
    feedback: Option<&str>,
) -> Result<Judgment, LlmError> {
    let mut user = format!(
        "Render a verdict on whether this control operated effectively.\n\n\
         Control description: {}\nTest procedure: {}\n\nFindings:\n{}\n\n\
         Respond with JSON: {{\"verdict\": \"effective|deficient\", \
         \"basis\": \"...\", \"documentReference\": \"direct quotation from the evidence\"}}",
        item.control_description,
        item.test_procedure,
        state.findings_digest(),
    );
    if let Some(feedback) = feedback {
        user.push_str(&format!("\n\nReviewer feedback on the previous verdict:\n{feedback}"));
    }

    let request = CompletionRequest::new(vec![
        ChatMessage::system(
            "You are the judgment step of a control-test evaluation pipeline. \
             Base the verdict strictly on the recorded findings and quote evidence verbatim.",
        ),
        ChatMessage::user(user),
    ])
    .with_max_tokens(1024)
    .with_temperature(0.1);

    let response = llm.complete(request).await?;
    parse_judgment(llm.provider_name(), &response.content)
}

fn parse_judgment(provider: &str, content: &str) -> Result<Judgment, LlmError> {
    let json_str = extract_json(content).unwrap_or(content);
    let value: Value = serde_json::from_str(json_str).map_err(|e| LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: format!("judgment is not valid JSON: {e}"),
    })?;

    let raw_verdict = match &value["verdict"] {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => {
            return Err(LlmError::InvalidResponse {
                provider: provider.to_string(),
                reason: "judgment missing 'verdict'".to_string(),
            });
        }
    };

    let verdict = map_verdict(&raw_verdict);
    if raw_verdict.trim().to_ascii_lowercase() != "effective"
        && raw_verdict.trim().to_ascii_lowercase() != "deficient"
    {
        tracing::info!(raw = %raw_verdict, mapped = verdict, "mapped non-canonical verdict");
    }

    Ok(Judgment {
        verdict,
        raw_verdict,
        basis: value["basis"].as_str().unwrap_or_default().to_string(),
        document_reference: value["documentReference"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
    })
}

/// Automated critique: is the verdict supported by the findings?
pub async fn review_judgment(
    judgment: &Judgment,
    state: &GraphState,
    llm: &dyn LlmProvider,
) -> Result<(bool, String), LlmError> {
    let request = CompletionRequest::new(vec![
        ChatMessage::system(
            "You are the judgment critique step of a control-test evaluation pipeline.",
        ),
        ChatMessage::user(format!(
            "Check whether the verdict is supported by the findings.\n\n\
             Verdict: {}\nBasis: {}\n\nFindings:\n{}\n\n\
             Respond with JSON: {{\"supported\": true, \"assessment\": \"...\"}}",
            if judgment.verdict { "effective" } else { "deficient" },
            judgment.basis,
            state.findings_digest(),
        )),
    ])
    .with_max_tokens(512)
    .with_temperature(0.1);

    let response = llm.complete(request).await?;
    let json_str = extract_json(&response.content).unwrap_or(&response.content);
    let value: Value = serde_json::from_str(json_str).map_err(|e| LlmError::InvalidResponse {
        provider: llm.provider_name().to_string(),
        reason: format!("judgment review is not valid JSON: {e}"),
    })?;

    let supported = value["supported"].as_bool().unwrap_or(true);
    let assessment = value["assessment"].as_str().unwrap_or_default().to_string();
    Ok((supported, assessment))
}

/// Self-reflection pass. Annotates the verdict; never flips it.
pub async fn reflect(
    item: &EvaluationItem,
    judgment: &Judgment,
    state: &GraphState,
    llm: &dyn LlmProvider,
) -> Result<String, LlmError> {
    let request = CompletionRequest::new(vec![
        ChatMessage::system(
            "You are the self-reflection step of a control-test evaluation pipeline. \
             You may annotate the verdict but not change it.",
        ),
        ChatMessage::user(format!(
            "Reflect on the completed evaluation: note residual uncertainty or \
             evidence that deserves a second look.\n\n\
             Control: {}\nVerdict: {}\nBasis: {}\n\nFindings:\n{}\n\n\
             Respond with JSON: {{\"annotation\": \"...\"}}",
            item.control_description,
            if judgment.verdict { "effective" } else { "deficient" },
            judgment.basis,
            state.findings_digest(),
        )),
    ])
    .with_max_tokens(512)
    .with_temperature(0.2);

    let response = llm.complete(request).await?;
    let json_str = extract_json(&response.content).unwrap_or(&response.content);
    let value: Value = serde_json::from_str(json_str).map_err(|e| LlmError::InvalidResponse {
        provider: llm.provider_name().to_string(),
        reason: format!("reflection is not valid JSON: {e}"),
    })?;

    Ok(value["annotation"].as_str().unwrap_or_default().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_mapping_table() {
        for affirmative in ["effective", "有効", "true", "1", "pass", " Effective ", "PASS"] {
            assert!(map_verdict(affirmative), "expected true for {affirmative:?}");
        }
        for negative in ["deficient", "ineffective", "false", "0", "fail", "", "maybe"] {
            assert!(!map_verdict(negative), "expected false for {negative:?}");
        }
    }

    #[test]
    fn parse_judgment_maps_non_boolean_verdicts() {
        let judgment = parse_judgment(
            "mock",
            r#"{"verdict": "pass", "basis": "b", "documentReference": "q"}"#,
        )
        .unwrap();
        assert!(judgment.verdict);
        assert_eq!(judgment.raw_verdict, "pass");

        let judgment = parse_judgment(
            "mock",
            r#"{"verdict": "inconclusive", "basis": "b", "documentReference": "q"}"#,
        )
        .unwrap();
        assert!(!judgment.verdict);
    }

    #[test]
    fn parse_judgment_accepts_bool_and_number() {
        assert!(parse_judgment("mock", r#"{"verdict": true}"#).unwrap().verdict);
        assert!(parse_judgment("mock", r#"{"verdict": 1}"#).unwrap().verdict);
        assert!(!parse_judgment("mock", r#"{"verdict": 0}"#).unwrap().verdict);
        assert!(parse_judgment("mock", r#"{"nothing": 1}"#).is_err());
    }
}
