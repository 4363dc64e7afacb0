//! # Audio/Video Speech Strategy
//!
//! Every input is first converted to canonical 16 kHz mono WAV. After that,
//! one of two engine bindings runs, chosen at startup:
//!
//! - **Cloud**: an ordered chain of remote backends (see [`BackendChain`])
//!   producing a single unit that spans the whole clip
//! - **Local**: an in-process segmenting model whose segments become units verbatim
//!
//! Video goes through exactly the same path; the converter drops the video stream.

use super::confidence;
use super::scratch::Scratch;
use super::transcript::{Locator, Transcript, TranscriptMetadata, TranscriptUnit};
use crate::engines::{LocalTranscriber, MediaConverter, SpeechBackend, SpeechError};
use crate::error::ExtractionError;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Placeholder text for a clip the primary backend could not understand.
pub const UNINTELLIGIBLE_TEXT: &str = "Could not understand audio";

/// `service_used` value when no backend produced a transcript.
pub const RECOGNITION_FAILED: &str = "Recognition failed";

/// Ordered list of speech backends.
///
/// State machine: try each backend in turn. A `RequestFailed` moves on to the
/// next backend; `Unintelligible` stops the chain immediately (a later
/// backend is not asked to second-guess the audio); success stops it too.
pub struct BackendChain {
    backends: Vec<Arc<dyn SpeechBackend>>,
}

/// How a run of the chain ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Recognized { backend: String, text: String },
    Unintelligible { backend: String },
    /// Every backend failed at the request level. `(backend, reason)` per attempt.
    Exhausted { failures: Vec<(String, String)> },
}

impl BackendChain {
    pub fn new(primary: Arc<dyn SpeechBackend>) -> Self {
        Self {
            backends: vec![primary],
        }
    }

    /// Append a backend tried only after everything before it failed at the request level.
    pub fn with_fallback(mut self, backend: Arc<dyn SpeechBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub async fn run(&self, waveform: &[u8]) -> ChainOutcome {
        let mut failures = Vec::new();

        for backend in &self.backends {
            let name = backend.name().to_string();
            match backend.recognize(waveform).await {
                Ok(text) => {
                    info!(backend = %name, chars = text.len(), "Speech recognized");
                    return ChainOutcome::Recognized { backend: name, text };
                }
                Err(SpeechError::Unintelligible) => {
                    info!(backend = %name, "Audio classified as unintelligible, not falling back");
                    return ChainOutcome::Unintelligible { backend: name };
                }
                Err(SpeechError::RequestFailed(reason)) => {
                    warn!(backend = %name, error = %reason, "Speech backend request failed");
                    failures.push((name, reason));
                }
            }
        }

        ChainOutcome::Exhausted { failures }
    }
}

/// The configured speech engine binding.
pub enum SpeechEngine {
    Cloud(BackendChain),
    Local(Arc<dyn LocalTranscriber>),
}

impl SpeechEngine {
    pub fn describe(&self) -> String {
        match self {
            SpeechEngine::Cloud(chain) => format!("cloud({})", chain.backend_names().join(" -> ")),
            SpeechEngine::Local(_) => "local-whisper".to_string(),
        }
    }
}

/// Convert `media` to a waveform and run the configured speech engine.
///
/// `started` is taken by the caller before conversion, so the reported
/// processing time covers conversion plus recognition. `language` is reported
/// for cloud results, which carry no language of their own.
pub async fn transcribe_media(
    engine: &SpeechEngine,
    converter: &dyn MediaConverter,
    scratch: &Scratch,
    media: &[u8],
    extension: &str,
    language: &str,
    started: Instant,
) -> Result<Transcript, ExtractionError> {
    let input = scratch
        .write(extension, media)
        .await
        .map_err(|e| ExtractionError::EngineFailure(format!("Failed to stage upload: {}", e)))?;
    let waveform_path = scratch.reserve("wav");

    converter
        .to_waveform(&input, &waveform_path)
        .await
        .map_err(|e| ExtractionError::EngineFailure(format!("Audio conversion failed: {}", e)))?;

    match engine {
        SpeechEngine::Cloud(chain) => {
            let waveform = tokio::fs::read(&waveform_path).await.map_err(|e| {
                ExtractionError::EngineFailure(format!("Failed to read converted audio: {}", e))
            })?;
            let outcome = chain.run(&waveform).await;
            Ok(cloud_transcript(outcome, language, started.elapsed().as_secs_f64()))
        }
        SpeechEngine::Local(model) => local_transcript(model.as_ref(), &waveform_path, started).await,
    }
}

/// Single unit spanning `[0, processing_time]`. The span end is a timing
/// proxy, not the clip's real duration.
pub fn cloud_transcript(outcome: ChainOutcome, language: &str, processing_time: f64) -> Transcript {
    let (text, unit_confidence, service_used) = match outcome {
        ChainOutcome::Recognized { backend, text } => (text, confidence::CLOUD_SPEECH, backend),
        ChainOutcome::Unintelligible { backend } => {
            (UNINTELLIGIBLE_TEXT.to_string(), confidence::SPEECH_FAILED, backend)
        }
        ChainOutcome::Exhausted { failures } => {
            warn!(attempts = failures.len(), "All speech backends failed");
            (String::new(), confidence::SPEECH_FAILED, RECOGNITION_FAILED.to_string())
        }
    };

    let unit = TranscriptUnit::new(
        text,
        unit_confidence,
        Locator::Span {
            start: 0.0,
            end: processing_time,
        },
    );

    Transcript::assemble(
        vec![unit],
        Some(TranscriptMetadata::Speech {
            language: language.to_string(),
            processing_time,
            service_used,
        }),
    )
}

async fn local_transcript(
    model: &dyn LocalTranscriber,
    waveform_path: &Path,
    started: Instant,
) -> Result<Transcript, ExtractionError> {
    let transcription = model
        .transcribe(waveform_path)
        .await
        .map_err(|e| ExtractionError::EngineFailure(e.to_string()))?;

    let units = transcription
        .segments
        .into_iter()
        .map(|segment| {
            TranscriptUnit::new(
                segment.text,
                confidence::local_segment(segment.confidence),
                Locator::Span {
                    start: segment.start,
                    end: segment.end,
                },
            )
        })
        .collect();

    Ok(Transcript::assemble(
        units,
        Some(TranscriptMetadata::Speech {
            language: transcription.language,
            processing_time: started.elapsed().as_secs_f64(),
            service_used: "local-whisper".to_string(),
        }),
    ))
}
