//! Azure AI Vision Read OCR backend.
//!
//! Submits the document to the Read 3.2 analyze endpoint, then polls the
//! `Operation-Location` until the analysis succeeds or times out.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::OcrConfig;
use crate::error::OcrError;
use crate::ocr::{OcrClient, OcrOutcome, TextBlock};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct AzureReadClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    timeout: Duration,
}

impl AzureReadClient {
    pub fn new(config: &OcrConfig) -> Result<Self, OcrError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| OcrError::RequestFailed {
                provider: "azure".to_string(),
                reason: "endpoint not configured".to_string(),
            })?;
        let api_key = config.api_key.clone().ok_or_else(|| OcrError::RequestFailed {
            provider: "azure".to_string(),
            reason: "api key not configured".to_string(),
        })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OcrError::RequestFailed {
                provider: "azure".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            timeout: config.timeout,
        })
    }

    fn analyze_url(&self, language: &str) -> String {
        format!(
            "{}/vision/v3.2/read/analyze?language={}",
            self.endpoint.trim_end_matches('/'),
            language
        )
    }
}

#[async_trait]
impl OcrClient for AzureReadClient {
    async fn extract(
        &self,
        bytes: &[u8],
        mime_type: &str,
        language: &str,
    ) -> Result<OcrOutcome, OcrError> {
        let submit = self
            .client
            .post(self.analyze_url(language))
            .header("Ocp-Apim-Subscription-Key", self.api_key.expose_secret())
            .header("Content-Type", mime_type.to_string())
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| OcrError::RequestFailed {
                provider: "azure".to_string(),
                reason: e.to_string(),
            })?;

        if !submit.status().is_success() {
            let status = submit.status();
            let body = submit.text().await.unwrap_or_default();
            return Err(OcrError::RequestFailed {
                provider: "azure".to_string(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let operation_url = submit
            .headers()
            .get("Operation-Location")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| OcrError::InvalidResponse {
                provider: "azure".to_string(),
                reason: "missing Operation-Location header".to_string(),
            })?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(OcrError::Timeout {
                    provider: "azure".to_string(),
                    elapsed: self.timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            let poll = self
                .client
                .get(&operation_url)
                .header("Ocp-Apim-Subscription-Key", self.api_key.expose_secret())
                .send()
                .await
                .map_err(|e| OcrError::RequestFailed {
                    provider: "azure".to_string(),
                    reason: e.to_string(),
                })?;

            let result: ReadResultEnvelope =
                poll.json().await.map_err(|e| OcrError::InvalidResponse {
                    provider: "azure".to_string(),
                    reason: e.to_string(),
                })?;

            match result.status.as_str() {
                "succeeded" => {
                    let mut text = String::new();
                    let mut blocks = Vec::new();
                    if let Some(analyze) = result.analyze_result {
                        for page in analyze.read_results {
                            for line in page.lines {
                                if !text.is_empty() {
                                    text.push('\n');
                                }
                                text.push_str(&line.text);
                                blocks.push(TextBlock {
                                    text: line.text,
                                    page: Some(page.page),
                                    bounding_box: bounding_box_from_polygon(&line.bounding_box),
                                });
                            }
                        }
                    }
                    return Ok(OcrOutcome { text, blocks });
                }
                "failed" => {
                    return Err(OcrError::RequestFailed {
                        provider: "azure".to_string(),
                        reason: "read analysis failed".to_string(),
                    });
                }
                _ => continue,
            }
        }
    }

    fn provider_name(&self) -> &str {
        "azure"
    }
}

/// The Read API reports an 8-value quadrilateral; reduce it to `[x, y, w, h]`.
fn bounding_box_from_polygon(polygon: &[f32]) -> Option<[f32; 4]> {
    if polygon.len() < 8 {
        return None;
    }
    let xs: Vec<f32> = polygon.iter().step_by(2).copied().collect();
    let ys: Vec<f32> = polygon.iter().skip(1).step_by(2).copied().collect();
    let min_x = xs.iter().copied().fold(f32::INFINITY, f32::min);
    let max_x = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let min_y = ys.iter().copied().fold(f32::INFINITY, f32::min);
    let max_y = ys.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    Some([min_x, min_y, max_x - min_x, max_y - min_y])
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadResultEnvelope {
    status: String,
    analyze_result: Option<AnalyzeResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
    read_results: Vec<PageResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageResult {
    page: u32,
    lines: Vec<LineResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineResult {
    text: String,
    #[serde(default)]
    bounding_box: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_reduction() {
        let quad = [1.0, 1.0, 5.0, 1.0, 5.0, 3.0, 1.0, 3.0];
        assert_eq!(bounding_box_from_polygon(&quad), Some([1.0, 1.0, 4.0, 2.0]));
        assert_eq!(bounding_box_from_polygon(&[1.0, 2.0]), None);
    }
}
