//! Cost-reporting and throughput-bounding facade over an LLM backend.
//!
//! Wraps any [`LlmProvider`]: a semaphore caps the number of in-flight
//! provider calls across all items and jobs, and a ledger accumulates token
//! usage plus dollar cost from the backend's per-token rates.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Semaphore;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Accumulated usage across the process lifetime.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct UsageSnapshot {
    pub calls: u64,
    pub failed_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: Decimal,
}

pub struct MeteredLlm {
    inner: Arc<dyn LlmProvider>,
    permits: Semaphore,
    ledger: std::sync::Mutex<UsageSnapshot>,
}

impl MeteredLlm {
    pub fn new(inner: Arc<dyn LlmProvider>, max_concurrent_calls: usize) -> Self {
        Self {
            inner,
            permits: Semaphore::new(max_concurrent_calls.max(1)),
            ledger: std::sync::Mutex::new(UsageSnapshot::default()),
        }
    }

    pub fn usage(&self) -> UsageSnapshot {
        *self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LlmProvider for MeteredLlm {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        // Closed-semaphore acquire cannot fail; the permit pool lives as long
        // as self.
        let _permit = self.permits.acquire().await.map_err(|_| LlmError::Unavailable {
            provider: self.inner.provider_name().to_string(),
            reason: "provider call limiter closed".to_string(),
        })?;

        let result = self.inner.complete(req).await;

        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger.calls += 1;
        match &result {
            Ok(resp) => {
                let (in_rate, out_rate) = self.inner.cost_per_token();
                ledger.input_tokens += u64::from(resp.usage.input_tokens);
                ledger.output_tokens += u64::from(resp.usage.output_tokens);
                ledger.cost_usd += in_rate * Decimal::from(resp.usage.input_tokens)
                    + out_rate * Decimal::from(resp.usage.output_tokens);
            }
            Err(_) => ledger.failed_calls += 1,
        }
        drop(ledger);

        result
    }

    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        self.inner.cost_per_token()
    }
}
