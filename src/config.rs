//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: the same structs are read from TOML, environment and defaults
//! - **Option<T>**: secrets are optional; absence means the backend is off
//! - **Result<T, E>**: loading and validation report what went wrong
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special-case variables: HOST, PORT, ASSEMBLYAI_API_KEY
//! 2. Environment variables (APP_SERVER__PORT, APP_SPEECH__ENGINE, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore so that field names
//! containing underscores (`max_upload_bytes`) stay intact.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub speech: SpeechConfig,
    pub tools: ToolsConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Local model settings.
///
/// ## Fields:
/// - `whisper_model`: size of the local Whisper model ("tiny" .. "large"),
///   only loaded when `speech.engine = "local"`
/// - `embedding_model`: HuggingFace id of the sentence encoder behind `/embed`
/// - `device`: "auto", "cpu", "cuda" or "metal"
/// - `embeddings_enabled`: load the sentence encoder at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub whisper_model: String,
    pub embedding_model: String,
    pub device: String,
    pub embeddings_enabled: bool,
}

/// Which speech engine serves audio and video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechEngineKind {
    /// Remote backends tried in order
    Cloud,
    /// In-process Whisper
    Local,
}

/// Speech backend settings.
///
/// The primary backend is any OpenAI-compatible transcription endpoint. The
/// secondary (AssemblyAI) joins the fallback chain only when its key is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub engine: SpeechEngineKind,
    pub primary_url: String,
    pub primary_model: String,
    #[serde(default)]
    pub primary_api_key: Option<String>,
    pub secondary_url: String,
    #[serde(default)]
    pub secondary_api_key: Option<String>,
    /// Reported when the engine does not detect the language itself
    pub language: String,
    /// Seconds between status reads of a secondary transcript job
    #[serde(default = "default_poll_interval_secs")]
    pub secondary_poll_interval_secs: u64,
    /// Status reads before a secondary transcript job is abandoned
    #[serde(default = "default_max_polls")]
    pub secondary_max_polls: u32,
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_max_polls() -> u32 {
    30
}

/// External command-line tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub ffmpeg_path: String,
    pub tesseract_path: String,
    pub tesseract_lang: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Largest accepted upload, in bytes
    pub max_upload_bytes: usize,
    /// Parent directory for per-request scratch directories (system temp if unset)
    #[serde(default)]
    pub scratch_dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            models: ModelsConfig {
                whisper_model: "base".to_string(),
                embedding_model: crate::engines::embedding::DEFAULT_MODEL.to_string(),
                device: "auto".to_string(),
                embeddings_enabled: true,
            },
            speech: SpeechConfig {
                engine: SpeechEngineKind::Cloud,
                primary_url: "https://api.openai.com/v1".to_string(),
                primary_model: "whisper-1".to_string(),
                primary_api_key: None,
                secondary_url: "https://api.assemblyai.com/v2".to_string(),
                secondary_api_key: None,
                language: "en".to_string(),
                secondary_poll_interval_secs: default_poll_interval_secs(),
                secondary_max_polls: default_max_polls(),
            },
            tools: ToolsConfig {
                ffmpeg_path: "ffmpeg".to_string(),
                tesseract_path: "tesseract".to_string(),
                tesseract_lang: "eng".to_string(),
            },
            performance: PerformanceConfig {
                max_upload_bytes: 100 * 1024 * 1024,
                scratch_dir: None,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_SPEECH__ENGINE=local`: Transcribe with the in-process model
    /// - `APP_TOOLS__TESSERACT_LANG=deu`: OCR language
    /// - `HOST`, `PORT`: Special cases for deployment platforms
    /// - `ASSEMBLYAI_API_KEY`: Enables the secondary speech backend
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("ASSEMBLYAI_API_KEY") {
            if !key.trim().is_empty() {
                settings = settings.set_override("speech.secondary_api_key", key)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_upload_bytes == 0 {
            return Err(anyhow!("Max upload size must be greater than 0"));
        }

        if self.tools.ffmpeg_path.trim().is_empty() {
            return Err(anyhow!("ffmpeg path cannot be empty"));
        }

        if self.tools.tesseract_path.trim().is_empty() {
            return Err(anyhow!("tesseract path cannot be empty"));
        }

        if self.speech.secondary_max_polls == 0 {
            return Err(anyhow!("speech.secondary_max_polls must be greater than 0"));
        }

        if self.speech.engine == SpeechEngineKind::Cloud && self.speech.primary_url.trim().is_empty() {
            return Err(anyhow!("speech.primary_url is required when the cloud engine is selected"));
        }

        Ok(())
    }

    /// Configuration as shown by `GET /api/v1/config`: API keys are replaced
    /// by whether they are set.
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(speech) = value.get_mut("speech").and_then(|s| s.as_object_mut()) {
            for key in ["primary_api_key", "secondary_api_key"] {
                let configured = speech.get(key).map(|v| !v.is_null()).unwrap_or(false);
                speech.insert(
                    key.to_string(),
                    serde_json::Value::String(if configured { "configured" } else { "not configured" }.to_string()),
                );
            }
        }
        value
    }
}
