//! OCR backend selection and the uniform extraction contract.

mod aws;
mod azure;
mod gcp;
mod none;
mod tesseract;

pub use aws::AwsTextractClient;
pub use azure::AzureReadClient;
pub use gcp::GcpVisionClient;
pub use none::NoneOcrClient;
pub use tesseract::TesseractClient;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{OcrConfig, OcrProviderKind};
use crate::error::OcrError;

/// A region of recognized text with its location in the source document.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TextBlock {
    pub text: String,
    /// 1-based page index, where the backend reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Normalized or pixel bounding box `[x, y, width, height]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<[f32; 4]>,
}

/// Result of one OCR extraction.
#[derive(Debug, Clone, Default)]
pub struct OcrOutcome {
    /// Full recognized text, reading order.
    pub text: String,
    /// Structured regions, where the backend provides them.
    pub blocks: Vec<TextBlock>,
}

/// The uniform extraction contract every OCR backend implements.
#[async_trait]
pub trait OcrClient: Send + Sync {
    async fn extract(
        &self,
        bytes: &[u8],
        mime_type: &str,
        language: &str,
    ) -> Result<OcrOutcome, OcrError>;

    fn provider_name(&self) -> &str;
}

/// Create an OCR client based on configuration.
///
/// Remote providers without credentials degrade to the NONE backend with a
/// warning; TESSERACT and NONE never need credentials.
pub fn create_ocr_client(config: &OcrConfig) -> Result<Arc<dyn OcrClient>, OcrError> {
    match config.provider {
        OcrProviderKind::None => Ok(Arc::new(NoneOcrClient)),
        OcrProviderKind::Tesseract => {
            tracing::info!(command = %config.command_path, "using local tesseract OCR backend");
            Ok(Arc::new(TesseractClient::new(config)))
        }
        kind if !config.configured() => {
            tracing::warn!(
                provider = kind.as_str(),
                "OCR credentials absent; degrading to NONE backend"
            );
            Ok(Arc::new(NoneOcrClient))
        }
        OcrProviderKind::Azure => {
            tracing::info!("using Azure Read OCR backend");
            Ok(Arc::new(AzureReadClient::new(config)?))
        }
        OcrProviderKind::Gcp => {
            tracing::info!("using GCP Vision OCR backend");
            Ok(Arc::new(GcpVisionClient::new(config)?))
        }
        OcrProviderKind::Aws => {
            tracing::info!("using AWS Textract-gateway OCR backend");
            Ok(Arc::new(AwsTextractClient::new(config)?))
        }
    }
}
