//! LLM backend selection and the uniform invocation contract.
//!
//! Backends are drawn from a closed enumeration (see
//! [`crate::config::LlmProviderKind`]); all remote ones speak the
//! OpenAI-compatible chat wire shape and differ in URL/auth shaping only.

mod metered;
mod mock;
mod openai_compat;
mod provider;

pub use metered::{MeteredLlm, UsageSnapshot};
pub use mock::{MockFailure, MockLlmProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role, ToolSpec,
    Usage,
};

use std::sync::Arc;

use crate::config::{LlmConfig, LlmProviderKind};
use crate::error::LlmError;

/// Create an LLM provider based on configuration.
///
/// Remote providers without credentials degrade to the MOCK backend with a
/// warning instead of failing construction; a misconfigured remote endpoint
/// is still fatal.
pub fn create_llm_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider {
        LlmProviderKind::Mock => {
            tracing::info!("using MOCK LLM backend (deterministic canned responses)");
            Ok(Arc::new(MockLlmProvider::new()))
        }
        kind if !config.configured() => {
            tracing::warn!(
                provider = kind.as_str(),
                "LLM credentials absent; degrading to MOCK backend"
            );
            Ok(Arc::new(MockLlmProvider::new()))
        }
        kind => {
            tracing::info!(provider = kind.as_str(), model = %config.model, "using remote LLM backend");
            Ok(Arc::new(OpenAiCompatProvider::from_config(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn missing_credentials_degrade_to_mock() {
        let mut config = Settings::for_tests().llm;
        config.provider = LlmProviderKind::Azure;
        config.endpoint = None;
        config.api_key = None;

        let provider = create_llm_provider(&config).unwrap();
        assert_eq!(provider.provider_name(), "mock");
    }

    #[test]
    fn remote_with_credentials_selected() {
        let mut config = Settings::for_tests().llm;
        config.provider = LlmProviderKind::Local;
        config.endpoint = Some("http://127.0.0.1:8000".to_string());

        let provider = create_llm_provider(&config).unwrap();
        assert_eq!(provider.provider_name(), "local");
    }
}
