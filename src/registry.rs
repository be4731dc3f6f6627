//! The provider registry.
//!
//! Constructed once at process start from settings and passed by reference
//! to the facade and workers; there is no process-global provider state.
//! Construction failure is fatal. The LLM client handed out is wrapped in
//! the metering facade, so cost accounting and the global in-flight call
//! bound apply to every consumer.

use std::sync::Arc;

use crate::config::Settings;
use crate::error::{LlmError, OcrError};
use crate::llm::{LlmProvider, MeteredLlm, UsageSnapshot, create_llm_provider};
use crate::ocr::{OcrClient, create_ocr_client};

/// Registry construction failures; fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Ocr(#[from] OcrError),
}

pub struct ProviderRegistry {
    llm: Arc<MeteredLlm>,
    ocr: Arc<dyn OcrClient>,
}

impl ProviderRegistry {
    /// Build the configured backends.
    pub fn from_settings(settings: &Settings) -> Result<Self, RegistryError> {
        let llm = create_llm_provider(&settings.llm)?;
        let llm = Arc::new(MeteredLlm::new(llm, settings.llm.max_concurrent_calls));
        let ocr = create_ocr_client(&settings.ocr)?;
        Ok(Self { llm, ocr })
    }

    /// Assemble a registry from pre-built clients (tests inject scripted
    /// mocks this way).
    pub fn with_clients(
        llm: Arc<dyn LlmProvider>,
        ocr: Arc<dyn OcrClient>,
        max_concurrent_calls: usize,
    ) -> Self {
        Self {
            llm: Arc::new(MeteredLlm::new(llm, max_concurrent_calls)),
            ocr,
        }
    }

    pub fn llm(&self) -> Arc<dyn LlmProvider> {
        self.llm.clone() as Arc<dyn LlmProvider>
    }

    pub fn ocr(&self) -> Arc<dyn OcrClient> {
        Arc::clone(&self.ocr)
    }

    /// Accumulated token usage and cost across all provider calls.
    pub fn usage(&self) -> UsageSnapshot {
        self.llm.usage()
    }
}
