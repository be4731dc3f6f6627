//! Local OCR via the tesseract command-line binary.
//!
//! Bytes go in on stdin, recognized text comes back on stdout. No bounding
//! boxes; the outcome carries text only.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::OcrConfig;
use crate::error::OcrError;
use crate::ocr::{OcrClient, OcrOutcome};

pub struct TesseractClient {
    command_path: String,
    timeout: Duration,
}

impl TesseractClient {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command_path: config.command_path.clone(),
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl OcrClient for TesseractClient {
    async fn extract(
        &self,
        bytes: &[u8],
        _mime_type: &str,
        language: &str,
    ) -> Result<OcrOutcome, OcrError> {
        let mut child = Command::new(&self.command_path)
            .args(["stdin", "stdout", "-l", language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OcrError::CommandFailed {
                command: self.command_path.clone(),
                reason: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(bytes)
                .await
                .map_err(|e| OcrError::CommandFailed {
                    command: self.command_path.clone(),
                    reason: format!("writing stdin: {e}"),
                })?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| OcrError::Timeout {
                provider: "tesseract".to_string(),
                elapsed: self.timeout,
            })?
            .map_err(|e| OcrError::CommandFailed {
                command: self.command_path.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(OcrError::CommandFailed {
                command: self.command_path.clone(),
                reason: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(OcrOutcome {
            text,
            blocks: Vec::new(),
        })
    }

    fn provider_name(&self) -> &str {
        "tesseract"
    }
}
