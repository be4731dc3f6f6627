//! Shared chat-completions client for the remote LLM backends.
//!
//! All remote providers in the registry speak the OpenAI-compatible chat
//! completions wire shape; they differ only in URL shaping and the
//! authentication header scheme. One engine serves them all.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::{LlmConfig, LlmProviderKind};
use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role, Usage,
};

/// How the backend expects credentials.
enum AuthScheme {
    /// Azure OpenAI: `api-key` header.
    ApiKeyHeader(SecretString),
    /// Bearer token.
    Bearer(SecretString),
    /// Gemini OpenAI-compat: both `Authorization: Bearer` and `x-goog-api-key`.
    GoogleDual(SecretString),
    /// Local servers.
    Anonymous,
}

/// Chat-completions client over one remote backend.
pub struct OpenAiCompatProvider {
    client: Client,
    provider_name: &'static str,
    url: String,
    model: String,
    auth: AuthScheme,
    timeout: Duration,
}

fn join_url(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl OpenAiCompatProvider {
    /// Build the client for a remote provider kind.
    ///
    /// Fails when the kind requires credentials that are absent; the factory
    /// decides whether that is fatal or degrades to MOCK.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider_name = match config.provider {
            LlmProviderKind::AzureFoundry => "azure_foundry",
            LlmProviderKind::Azure => "azure",
            LlmProviderKind::Gcp => "gcp",
            LlmProviderKind::Aws => "aws",
            LlmProviderKind::Local => "local",
            LlmProviderKind::Mock => {
                return Err(LlmError::InvalidRequest {
                    provider: "mock".into(),
                    reason: "MOCK is not an HTTP backend".into(),
                });
            }
        };

        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| LlmError::AuthFailed {
                provider: provider_name.to_string(),
            })?;

        let key = || {
            config.api_key.clone().ok_or(LlmError::AuthFailed {
                provider: provider_name.to_string(),
            })
        };

        let api_version = config.api_version.as_deref().unwrap_or("2024-10-21");

        let (url, auth) = match config.provider {
            LlmProviderKind::Azure => (
                format!(
                    "{}?api-version={}",
                    join_url(
                        endpoint,
                        &format!("openai/deployments/{}/chat/completions", config.model)
                    ),
                    api_version
                ),
                AuthScheme::ApiKeyHeader(key()?),
            ),
            LlmProviderKind::AzureFoundry => (
                format!(
                    "{}?api-version={}",
                    join_url(endpoint, "models/chat/completions"),
                    api_version
                ),
                AuthScheme::Bearer(key()?),
            ),
            LlmProviderKind::Gcp => (
                join_url(endpoint, "chat/completions"),
                AuthScheme::GoogleDual(key()?),
            ),
            LlmProviderKind::Aws => (
                join_url(endpoint, "chat/completions"),
                AuthScheme::Bearer(key()?),
            ),
            LlmProviderKind::Local => (
                join_url(endpoint, "v1/chat/completions"),
                AuthScheme::Anonymous,
            ),
            LlmProviderKind::Mock => unreachable!(),
        };

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Unavailable {
                provider: provider_name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            provider_name,
            url,
            model: config.model.clone(),
            auth,
            timeout: config.timeout,
        })
    }

    async fn send_request(&self, body: &ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError> {
        tracing::debug!(provider = self.provider_name, url = %self.url, "sending chat completion");

        let mut request = self.client.post(&self.url).json(body);
        request = match &self.auth {
            AuthScheme::ApiKeyHeader(key) => request.header("api-key", key.expose_secret()),
            AuthScheme::Bearer(key) => {
                request.header("Authorization", format!("Bearer {}", key.expose_secret()))
            }
            AuthScheme::GoogleDual(key) => request
                .header("Authorization", format!("Bearer {}", key.expose_secret()))
                .header("x-goog-api-key", key.expose_secret()),
            AuthScheme::Anonymous => request,
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    provider: self.provider_name.to_string(),
                    elapsed: self.timeout,
                }
            } else {
                LlmError::Unavailable {
                    provider: self.provider_name.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let response_text = response.text().await.unwrap_or_default();

        tracing::debug!(provider = self.provider_name, %status, "chat completion response");

        if !status.is_success() {
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(LlmError::AuthFailed {
                    provider: self.provider_name.to_string(),
                });
            }
            if status.as_u16() == 429 {
                let retry_after = headers
                    .get("retry-after")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(LlmError::RateLimited {
                    provider: self.provider_name.to_string(),
                    retry_after,
                });
            }
            if status.is_client_error() {
                return Err(LlmError::InvalidRequest {
                    provider: self.provider_name.to_string(),
                    reason: format!("HTTP {}: {}", status, response_text),
                });
            }
            return Err(LlmError::Unavailable {
                provider: self.provider_name.to_string(),
                reason: format!("HTTP {}: {}", status, response_text),
            });
        }

        serde_json::from_str(&response_text).map_err(|e| LlmError::InvalidResponse {
            provider: self.provider_name.to_string(),
            reason: format!("JSON parse error: {}", e),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let messages: Vec<WireMessage> = req.messages.into_iter().map(WireMessage::from).collect();
        let tools: Vec<WireTool> = req
            .tools
            .into_iter()
            .map(|t| WireTool {
                tool_type: "function".to_string(),
                function: WireFunction {
                    name: t.name,
                    description: Some(t.description),
                    parameters: Some(t.parameters),
                },
            })
            .collect();

        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stop: req.stop_sequences,
            tools: if tools.is_empty() { None } else { Some(tools) },
        };

        let response = self.send_request(&body).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: self.provider_name.to_string(),
                reason: "no choices in response".to_string(),
            })?;

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        };

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            finish_reason,
            usage: Usage {
                input_tokens: response.usage.prompt_tokens,
                output_tokens: response.usage.completion_tokens,
            },
        })
    }

    fn provider_name(&self) -> &str {
        self.provider_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        // Conservative blended estimate; overridable per deployment later.
        (dec!(0.0000025), dec!(0.00001))
    }
}

// OpenAI-compatible wire types (re-implemented for local use)

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl From<ChatMessage> for WireMessage {
    fn from(msg: ChatMessage) -> Self {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: msg.content,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
