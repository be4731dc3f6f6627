//! Textract-shaped OCR backend behind a bearer-authenticated gateway.
//!
//! The core never signs SigV4 itself; deployments front Textract with a
//! gateway that accepts a bearer token (the same seam the AWS LLM backend
//! uses). Wire shapes follow `DetectDocumentText`.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::config::OcrConfig;
use crate::error::OcrError;
use crate::ocr::{OcrClient, OcrOutcome, TextBlock};

pub struct AwsTextractClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
}

impl AwsTextractClient {
    pub fn new(config: &OcrConfig) -> Result<Self, OcrError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| OcrError::RequestFailed {
                provider: "aws".to_string(),
                reason: "endpoint not configured".to_string(),
            })?;
        let api_key = config.api_key.clone().ok_or_else(|| OcrError::RequestFailed {
            provider: "aws".to_string(),
            reason: "api key not configured".to_string(),
        })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OcrError::RequestFailed {
                provider: "aws".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl OcrClient for AwsTextractClient {
    async fn extract(
        &self,
        bytes: &[u8],
        _mime_type: &str,
        _language: &str,
    ) -> Result<OcrOutcome, OcrError> {
        let url = format!(
            "{}/detect-document-text",
            self.endpoint.trim_end_matches('/')
        );

        let body = json!({ "Document": { "Bytes": BASE64.encode(bytes) } });

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| OcrError::RequestFailed {
                provider: "aws".to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(OcrError::RequestFailed {
                provider: "aws".to_string(),
                reason: format!("HTTP {status}: {text}"),
            });
        }

        let envelope: DetectEnvelope =
            response.json().await.map_err(|e| OcrError::InvalidResponse {
                provider: "aws".to_string(),
                reason: e.to_string(),
            })?;

        let mut text = String::new();
        let mut blocks = Vec::new();
        for block in envelope.blocks {
            if block.block_type != "LINE" {
                continue;
            }
            let Some(line) = block.text else { continue };
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&line);
            blocks.push(TextBlock {
                text: line,
                page: block.page,
                bounding_box: block.geometry.map(|g| {
                    [
                        g.bounding_box.left,
                        g.bounding_box.top,
                        g.bounding_box.width,
                        g.bounding_box.height,
                    ]
                }),
            });
        }

        Ok(OcrOutcome { text, blocks })
    }

    fn provider_name(&self) -> &str {
        "aws"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DetectEnvelope {
    #[serde(default)]
    blocks: Vec<Block>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Block {
    block_type: String,
    text: Option<String>,
    page: Option<u32>,
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Geometry {
    bounding_box: BoundingBox,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BoundingBox {
    left: f32,
    top: f32,
    width: f32,
    height: f32,
}
