//! Service configuration.
//!
//! Settings are sourced from environment variables (loaded via `dotenvy` in
//! the binary) and parsed into a typed tree. Secrets are held in
//! [`SecretString`] and never leave the process unredacted: the `/config`
//! endpoint and all `Debug` output go through [`Settings::redacted`].

use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use crate::error::ErrorKind;

/// LLM backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    AzureFoundry,
    Azure,
    Gcp,
    Aws,
    Local,
    Mock,
}

impl LlmProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProviderKind::AzureFoundry => "AZURE_FOUNDRY",
            LlmProviderKind::Azure => "AZURE",
            LlmProviderKind::Gcp => "GCP",
            LlmProviderKind::Aws => "AWS",
            LlmProviderKind::Local => "LOCAL",
            LlmProviderKind::Mock => "MOCK",
        }
    }
}

impl FromStr for LlmProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AZURE_FOUNDRY" | "AZURE-FOUNDRY" | "FOUNDRY" => Ok(LlmProviderKind::AzureFoundry),
            "AZURE" => Ok(LlmProviderKind::Azure),
            "GCP" | "GOOGLE" => Ok(LlmProviderKind::Gcp),
            "AWS" => Ok(LlmProviderKind::Aws),
            "LOCAL" => Ok(LlmProviderKind::Local),
            "MOCK" => Ok(LlmProviderKind::Mock),
            other => Err(ConfigError::InvalidValue {
                field: "LLM_PROVIDER".into(),
                message: format!("unknown provider '{other}'"),
            }),
        }
    }
}

/// OCR backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrProviderKind {
    Azure,
    Aws,
    Gcp,
    Tesseract,
    None,
}

impl OcrProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrProviderKind::Azure => "AZURE",
            OcrProviderKind::Aws => "AWS",
            OcrProviderKind::Gcp => "GCP",
            OcrProviderKind::Tesseract => "TESSERACT",
            OcrProviderKind::None => "NONE",
        }
    }
}

impl FromStr for OcrProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AZURE" => Ok(OcrProviderKind::Azure),
            "AWS" => Ok(OcrProviderKind::Aws),
            "GCP" | "GOOGLE" => Ok(OcrProviderKind::Gcp),
            "TESSERACT" => Ok(OcrProviderKind::Tesseract),
            "NONE" | "" => Ok(OcrProviderKind::None),
            other => Err(ConfigError::InvalidValue {
                field: "OCR_PROVIDER".into(),
                message: format!("unknown provider '{other}'"),
            }),
        }
    }
}

/// Configuration loading and validation errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config field: {field}")]
    MissingField { field: String },

    #[error("invalid value for config field '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// LLM backend configuration.
#[derive(Clone)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub api_version: Option<String>,
    /// Per-call wall-clock budget.
    pub timeout: Duration,
    /// Global bound on in-flight provider calls.
    pub max_concurrent_calls: usize,
}

impl LlmConfig {
    pub fn configured(&self) -> bool {
        match self.provider {
            LlmProviderKind::Mock => true,
            LlmProviderKind::Local => self.endpoint.is_some(),
            _ => self.api_key.is_some() && self.endpoint.is_some(),
        }
    }

    pub fn api_key_str(&self) -> Option<&str> {
        self.api_key.as_ref().map(|k| k.expose_secret())
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// OCR backend configuration.
#[derive(Clone)]
pub struct OcrConfig {
    pub provider: OcrProviderKind,
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub language: String,
    /// Local OCR binary, used by the TESSERACT backend.
    pub command_path: String,
    pub timeout: Duration,
}

impl OcrConfig {
    pub fn configured(&self) -> bool {
        match self.provider {
            OcrProviderKind::None | OcrProviderKind::Tesseract => true,
            _ => self.api_key.is_some() && self.endpoint.is_some(),
        }
    }

    pub fn api_key_str(&self) -> Option<&str> {
        self.api_key.as_ref().map(|k| k.expose_secret())
    }
}

impl std::fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrConfig")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("language", &self.language)
            .field("command_path", &self.command_path)
            .finish()
    }
}

/// Graph orchestrator knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 0 disables the plan review loop.
    pub max_plan_revisions: u32,
    /// 0 disables the judgment review loop.
    pub max_judgment_revisions: u32,
    pub skip_plan_creation: bool,
    pub self_reflection_enabled: bool,
    /// Per-item wall-clock cap.
    pub item_timeout: Duration,
}

/// Batch coordinator knobs.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_concurrent_evaluations: usize,
    pub max_sync_batch_size: usize,
    /// Facade guard for the synchronous endpoint, tuned below gateway limits.
    pub sync_wall_clock: Duration,
}

/// Job manager knobs.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub retention: Duration,
    pub job_timeout: Duration,
    pub reaper_interval: Duration,
    pub max_queue_depth: usize,
    /// Linear duration estimate returned from submit.
    pub per_item_estimate: Duration,
}

/// Evidence ingestion knobs.
#[derive(Debug, Clone)]
pub struct EvidenceConfig {
    /// Cap on a single decoded attachment.
    pub max_file_bytes: usize,
    /// Cap on extracted text per file before the truncation marker.
    pub max_extracted_chars: usize,
    /// PDFs whose embedded text layer is shorter than this fall back to OCR.
    pub ocr_fallback_threshold: usize,
}

/// HTTP server knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request body cap; sized for base64 evidence payloads.
    pub max_body_bytes: usize,
}

/// Full settings tree.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub ocr: OcrConfig,
    pub orchestrator: OrchestratorConfig,
    pub batch: BatchConfig,
    pub jobs: JobConfig,
    pub evidence: EvidenceConfig,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env_var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: name.into(),
            message: format!("cannot parse '{raw}'"),
        }),
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match env_var(name) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                field: name.into(),
                message: format!("cannot parse '{other}' as bool"),
            }),
        },
    }
}

fn env_secs(name: &str, default_secs: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(env_parse(name, default_secs)?))
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let llm_provider = match env_var("LLM_PROVIDER") {
            Some(raw) => raw.parse()?,
            None => LlmProviderKind::Mock,
        };
        let ocr_provider = match env_var("OCR_PROVIDER") {
            Some(raw) => raw.parse()?,
            None => OcrProviderKind::None,
        };

        let llm = LlmConfig {
            provider: llm_provider,
            endpoint: env_var("LLM_ENDPOINT"),
            api_key: env_var("LLM_API_KEY").map(SecretString::from),
            model: env_var("LLM_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            api_version: env_var("LLM_API_VERSION"),
            timeout: env_secs("LLM_TIMEOUT_SECONDS", 60)?,
            max_concurrent_calls: env_parse("MAX_CONCURRENT_PROVIDER_CALLS", 20usize)?,
        };

        let ocr = OcrConfig {
            provider: ocr_provider,
            endpoint: env_var("OCR_ENDPOINT"),
            api_key: env_var("OCR_API_KEY").map(SecretString::from),
            language: env_var("OCR_LANGUAGE").unwrap_or_else(|| "en".to_string()),
            command_path: env_var("OCR_COMMAND_PATH").unwrap_or_else(|| "tesseract".to_string()),
            timeout: env_secs("OCR_TIMEOUT_SECONDS", 60)?,
        };

        Ok(Self {
            server: ServerConfig {
                host: env_var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: env_parse("PORT", 8080u16)?,
                max_body_bytes: env_parse("MAX_BODY_BYTES", 64 * 1024 * 1024usize)?,
            },
            llm,
            ocr,
            orchestrator: OrchestratorConfig {
                max_plan_revisions: env_parse("MAX_PLAN_REVISIONS", 1u32)?,
                max_judgment_revisions: env_parse("MAX_JUDGMENT_REVISIONS", 1u32)?,
                skip_plan_creation: env_bool("SKIP_PLAN_CREATION", false)?,
                self_reflection_enabled: env_bool("SELF_REFLECTION_ENABLED", false)?,
                item_timeout: env_secs("FUNCTION_TIMEOUT_SECONDS", 300)?,
            },
            batch: BatchConfig {
                max_concurrent_evaluations: env_parse("MAX_CONCURRENT_EVALUATIONS", 10usize)?,
                max_sync_batch_size: env_parse("MAX_SYNC_BATCH_SIZE", 50usize)?,
                sync_wall_clock: env_secs("SYNC_WALL_CLOCK_SECONDS", 25)?,
            },
            jobs: JobConfig {
                retention: env_secs("JOB_RETENTION_SECONDS", 604_800)?,
                job_timeout: env_secs("JOB_TIMEOUT_SECONDS", 1800)?,
                reaper_interval: env_secs("REAPER_INTERVAL_SECONDS", 60)?,
                max_queue_depth: env_parse("MAX_QUEUE_DEPTH", 100usize)?,
                per_item_estimate: env_secs("PER_ITEM_ESTIMATE_SECONDS", 45)?,
            },
            evidence: EvidenceConfig {
                max_file_bytes: env_parse("MAX_EVIDENCE_BYTES", 20 * 1024 * 1024usize)?,
                max_extracted_chars: env_parse("MAX_EXTRACTED_CHARS", 40_000usize)?,
                ocr_fallback_threshold: env_parse("OCR_FALLBACK_THRESHOLD", 64usize)?,
            },
        })
    }

    /// Settings for tests: mock LLM, no OCR, tight defaults.
    pub fn for_tests() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                max_body_bytes: 64 * 1024 * 1024,
            },
            llm: LlmConfig {
                provider: LlmProviderKind::Mock,
                endpoint: None,
                api_key: None,
                model: "mock-model".to_string(),
                api_version: None,
                timeout: Duration::from_secs(5),
                max_concurrent_calls: 20,
            },
            ocr: OcrConfig {
                provider: OcrProviderKind::None,
                endpoint: None,
                api_key: None,
                language: "en".to_string(),
                command_path: "tesseract".to_string(),
                timeout: Duration::from_secs(5),
            },
            orchestrator: OrchestratorConfig {
                max_plan_revisions: 1,
                max_judgment_revisions: 1,
                skip_plan_creation: false,
                self_reflection_enabled: false,
                item_timeout: Duration::from_secs(30),
            },
            batch: BatchConfig {
                max_concurrent_evaluations: 4,
                max_sync_batch_size: 50,
                sync_wall_clock: Duration::from_secs(25),
            },
            jobs: JobConfig {
                retention: Duration::from_secs(600),
                job_timeout: Duration::from_secs(60),
                reaper_interval: Duration::from_secs(1),
                max_queue_depth: 16,
                per_item_estimate: Duration::from_secs(45),
            },
            evidence: EvidenceConfig {
                max_file_bytes: 1024 * 1024,
                max_extracted_chars: 10_000,
                ocr_fallback_threshold: 64,
            },
        }
    }

    /// Settings tree for the `/config` endpoint, secrets redacted.
    pub fn redacted(&self) -> serde_json::Value {
        json!({
            "llm": {
                "provider": self.llm.provider.as_str(),
                "model": self.llm.model,
                "endpoint": self.llm.endpoint,
                "apiKey": self.llm.api_key.as_ref().map(|_| "***"),
                "apiVersion": self.llm.api_version,
                "timeoutSeconds": self.llm.timeout.as_secs(),
            },
            "ocr": {
                "provider": self.ocr.provider.as_str(),
                "endpoint": self.ocr.endpoint,
                "apiKey": self.ocr.api_key.as_ref().map(|_| "***"),
                "language": self.ocr.language,
            },
            "orchestrator": {
                "maxPlanRevisions": self.orchestrator.max_plan_revisions,
                "maxJudgmentRevisions": self.orchestrator.max_judgment_revisions,
                "skipPlanCreation": self.orchestrator.skip_plan_creation,
                "selfReflectionEnabled": self.orchestrator.self_reflection_enabled,
                "functionTimeoutSeconds": self.orchestrator.item_timeout.as_secs(),
            },
            "batch": {
                "maxConcurrentEvaluations": self.batch.max_concurrent_evaluations,
                "maxSyncBatchSize": self.batch.max_sync_batch_size,
                "syncWallClockSeconds": self.batch.sync_wall_clock.as_secs(),
            },
            "jobs": {
                "jobRetentionSeconds": self.jobs.retention.as_secs(),
                "jobTimeoutSeconds": self.jobs.job_timeout.as_secs(),
                "reaperIntervalSeconds": self.jobs.reaper_interval.as_secs(),
                "maxQueueDepth": self.jobs.max_queue_depth,
            },
            "evidence": {
                "maxEvidenceBytes": self.evidence.max_file_bytes,
                "maxExtractedChars": self.evidence.max_extracted_chars,
                "ocrFallbackThreshold": self.evidence.ocr_fallback_threshold,
            },
        })
    }
}

/// Wire-visible kind for settings errors; always a client/server boundary 500.
impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parsing() {
        assert_eq!(
            "AZURE_FOUNDRY".parse::<LlmProviderKind>().unwrap(),
            LlmProviderKind::AzureFoundry
        );
        assert_eq!("mock".parse::<LlmProviderKind>().unwrap(), LlmProviderKind::Mock);
        assert!("WATSON".parse::<LlmProviderKind>().is_err());

        assert_eq!(
            "tesseract".parse::<OcrProviderKind>().unwrap(),
            OcrProviderKind::Tesseract
        );
        assert_eq!("NONE".parse::<OcrProviderKind>().unwrap(), OcrProviderKind::None);
    }

    #[test]
    fn mock_is_always_configured() {
        let settings = Settings::for_tests();
        assert!(settings.llm.configured());
        assert!(settings.ocr.configured());
    }

    #[test]
    fn redacted_hides_secrets() {
        let mut settings = Settings::for_tests();
        settings.llm.api_key = Some(SecretString::from("super-secret".to_string()));
        let redacted = settings.redacted();
        let dumped = redacted.to_string();
        assert!(!dumped.contains("super-secret"));
        assert_eq!(redacted["llm"]["apiKey"], "***");
    }
}
