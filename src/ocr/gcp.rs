//! GCP Vision OCR backend (`images:annotate` with `TEXT_DETECTION`).

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

pub struct GcpVisionClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
}

impl GcpVisionClient {
    pub fn new(config: &OcrConfig) -> Result<Self, OcrError> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://vision.googleapis.com".to_string());
        let api_key = config.api_key.clone().ok_or_else(|| OcrError::RequestFailed {
            provider: "gcp".to_string(),
            reason: "api key not configured".to_string(),
        })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OcrError::RequestFailed {
                provider: "gcp".to_string(),
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
impl OcrClient for GcpVisionClient {
    async fn extract(
        &self,
        bytes: &[u8],
        _mime_type: &str,
        language: &str,
    ) -> Result<OcrOutcome, OcrError> {
        let url = format!(
            "{}/v1/images:annotate?key={}",
            self.endpoint.trim_end_matches('/'),
            self.api_key.expose_secret()
        );

        let body = json!({
            "requests": [{
                "image": { "content": BASE64.encode(bytes) },
                "features": [{ "type": "TEXT_DETECTION" }],
                "imageContext": { "languageHints": [language] },
            }]
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| OcrError::RequestFailed {
                provider: "gcp".to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(OcrError::RequestFailed {
                provider: "gcp".to_string(),
                reason: format!("HTTP {status}: {text}"),
            });
        }

        let envelope: AnnotateEnvelope =
            response.json().await.map_err(|e| OcrError::InvalidResponse {
                provider: "gcp".to_string(),
                reason: e.to_string(),
            })?;

        let Some(first) = envelope.responses.into_iter().next() else {
            return Ok(OcrOutcome::default());
        };

        if let Some(err) = first.error {
            return Err(OcrError::RequestFailed {
                provider: "gcp".to_string(),
                reason: err.message,
            });
        }

        let text = first
            .full_text_annotation
            .map(|a| a.text)
            .unwrap_or_default();

        // textAnnotations[0] is the whole-image summary; per-word entries follow.
        let blocks = first
            .text_annotations
            .into_iter()
            .skip(1)
            .map(|a| TextBlock {
                bounding_box: bounding_box_from_vertices(&a.bounding_poly.vertices),
                text: a.description,
                page: Some(1),
            })
            .collect();

        Ok(OcrOutcome { text, blocks })
    }

    fn provider_name(&self) -> &str {
        "gcp"
    }
}

fn bounding_box_from_vertices(vertices: &[Vertex]) -> Option<[f32; 4]> {
    if vertices.is_empty() {
        return None;
    }
    let min_x = vertices.iter().map(|v| v.x).fold(f32::INFINITY, f32::min);
    let max_x = vertices.iter().map(|v| v.x).fold(f32::NEG_INFINITY, f32::max);
    let min_y = vertices.iter().map(|v| v.y).fold(f32::INFINITY, f32::min);
    let max_y = vertices.iter().map(|v| v.y).fold(f32::NEG_INFINITY, f32::max);
    Some([min_x, min_y, max_x - min_x, max_y - min_y])
}

#[derive(Debug, Deserialize)]
struct AnnotateEnvelope {
    #[serde(default)]
    responses: Vec<AnnotateResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResponse {
    full_text_annotation: Option<FullTextAnnotation>,
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct FullTextAnnotation {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextAnnotation {
    description: String,
    #[serde(default)]
    bounding_poly: BoundingPoly,
}

#[derive(Debug, Default, Deserialize)]
struct BoundingPoly {
    #[serde(default)]
    vertices: Vec<Vertex>,
}

#[derive(Debug, Deserialize)]
struct Vertex {
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}
