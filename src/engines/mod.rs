//! # Engine Bindings
//!
//! The extraction core never talks to lopdf, Tesseract, ffmpeg, a speech API or
//! a Candle model directly. It talks to the traits defined here, and each
//! submodule provides one concrete binding.
//!
//! ## Key Rust Concepts:
//! - **Trait objects**: `Arc<dyn OcrEngine>` lets the orchestrator hold any
//!   implementation chosen at startup (or an in-memory fake in tests)
//! - **async_trait**: async methods in object-safe traits
//! - **Send + Sync**: every engine is shared across actix worker threads
//!
//! ## Collaborators:
//! - **DocumentEngine**: pages (text layer + embedded images) and properties
//! - **OcrEngine**: plain text and word-level output for one raster image
//! - **MediaConverter**: any audio/video file to canonical 16 kHz mono WAV
//! - **SpeechBackend**: one remote recognizer in the backend-fallback chain
//! - **LocalTranscriber**: an in-process segmenting model
//! - **Embedder**: sentence embeddings, outside the transcript pipeline

pub mod cloud_speech;
pub mod embedding;
pub mod ffmpeg;
pub mod hub;
pub mod pdf;
pub mod tesseract;
pub mod whisper;

#[cfg(test)]
pub mod fakes;

use crate::extraction::scratch::Scratch;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

/// Failures raised by document, OCR and local model engines.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to parse document: {0}")]
    Document(String),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("Model failed: {0}")]
    Model(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a single speech backend attempt failed.
///
/// The split matters: the fallback chain moves on after `RequestFailed`
/// but stops immediately on `Unintelligible`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpeechError {
    /// Transport error, non-2xx status, bad payload, timeout
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The backend answered but recognized nothing
    #[error("audio could not be understood")]
    Unintelligible,
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("could not run converter: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("converter exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Failed to load embedding model: {0}")]
    ModelLoad(String),

    #[error("Embedding inference failed: {0}")]
    Inference(String),
}

/// One page as the document engine sees it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageContent {
    /// 1-based page number
    pub number: u32,
    /// Native text layer, possibly empty
    pub text: String,
    /// Encoded raster images (JPEG or PNG) placed on the page, in resource order
    pub images: Vec<Vec<u8>>,
}

/// One word of Tesseract-style word-level output.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f64,
    pub block_id: i64,
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

/// One segment of a local model's transcription.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: Option<f64>,
}

/// Everything a local model returns for one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTranscription {
    pub language: String,
    pub segments: Vec<SpeechSegment>,
}

#[async_trait]
pub trait DocumentEngine: Send + Sync {
    /// Pages in page-number order.
    async fn pages(&self, document: &[u8]) -> Result<Vec<PageContent>, EngineError>;

    /// Flat property map (title, author, ...), empty values already dropped.
    async fn metadata(&self, document: &[u8]) -> Result<BTreeMap<String, String>, EngineError>;
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Whole-image plain text. Files the engine needs go into `scratch`.
    async fn recognize_text(&self, image: &[u8], scratch: &Scratch) -> Result<String, EngineError>;

    /// Word-level output in the order the engine returns it.
    async fn recognize_words(&self, image: &[u8], scratch: &Scratch) -> Result<Vec<OcrWord>, EngineError>;
}

#[async_trait]
pub trait MediaConverter: Send + Sync {
    /// Convert `input` into canonical 16 kHz mono 16-bit PCM WAV at `output`.
    async fn to_waveform(&self, input: &Path, output: &Path) -> Result<(), ConversionError>;
}

#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Name reported as `service_used` when this backend produces the result.
    fn name(&self) -> &str;

    async fn recognize(&self, waveform: &[u8]) -> Result<String, SpeechError>;
}

#[async_trait]
pub trait LocalTranscriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<LocalTranscription, EngineError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, same order.
    async fn encode(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}
