//! # Extraction Core
//!
//! Turns an uploaded file plus a declared modality into an [`ExtractionResult`].
//!
//! ## Module Organization:
//! - **transcript**: the uniform output schema and its assembler
//! - **confidence**: per-strategy confidence rules
//! - **document / image / speech**: the modality strategies
//! - **orchestrator**: strategy selection and failure classification
//! - **scratch**: request-scoped temp files handed to file-based engines

pub mod confidence;
pub mod document;
pub mod image;
pub mod orchestrator;
pub mod scratch;
pub mod speech;
pub mod transcript;

pub use orchestrator::{ExtractionOutcome, Extractor};
pub use transcript::{BoundingBox, Locator, Transcript, TranscriptMetadata, TranscriptUnit};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The declared input kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Document,
    Image,
    Audio,
    Video,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Document => "document",
            Modality::Image => "image",
            Modality::Audio => "audio",
            Modality::Video => "video",
        }
    }

    /// Extension used for the staged upload when the client sent no file name.
    pub fn default_extension(&self) -> &'static str {
        match self {
            Modality::Document => "pdf",
            Modality::Image => "png",
            Modality::Audio => "bin",
            Modality::Video => "mp4",
        }
    }
}

impl std::str::FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "document" | "pdf" => Ok(Modality::Document),
            "image" => Ok(Modality::Image),
            "audio" => Ok(Modality::Audio),
            "video" => Ok(Modality::Video),
            _ => Err(format!("Unknown modality: {}", s)),
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One extraction call. Created per request and dropped after it.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub modality: Modality,
    /// `None` or empty means nothing was uploaded
    pub payload: Option<Vec<u8>>,
    /// Optional sub-path hint, e.g. `"ocr"` for documents
    pub sub_format: Option<String>,
    /// Original upload name, used for logging and the staged file's extension
    pub file_name: Option<String>,
}

impl ExtractionRequest {
    pub fn new(modality: Modality, payload: Option<Vec<u8>>) -> Self {
        Self {
            modality,
            payload,
            sub_format: None,
            file_name: None,
        }
    }

    pub fn with_sub_format(mut self, sub_format: Option<String>) -> Self {
        self.sub_format = sub_format;
        self
    }

    pub fn with_file_name(mut self, file_name: Option<String>) -> Self {
        self.file_name = file_name;
        self
    }
}

/// What every extraction returns, success or not.
///
/// `id` is fresh per request and exists only so clients can correlate logs.
/// When `error` is set, `transcript` is `None` and `text` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub id: Uuid,
    pub modality: String,
    pub transcript: Option<Transcript>,
    pub text: String,
    pub error: Option<String>,
}
