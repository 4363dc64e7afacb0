//! # Extraction Orchestrator
//!
//! [`Extractor::extract`] is the single entry point of the core. It never
//! fails: whatever goes wrong is classified into an [`ExtractionError`] and
//! returned as an [`ExtractionOutcome`] with a status code and the request's id.
//!
//! ## Responsibilities:
//! 1. Generate the correlation id before anything else can fail
//! 2. Reject missing payloads without touching any engine
//! 3. Dispatch to the strategy for the declared modality and sub-format
//! 4. Own the scratch directory for the request (deleted when it goes out of scope)
//!
//! Engine handles are constructed once at startup and injected here; they are
//! shared read-only across concurrent requests.

use super::document::{self, DocumentPath};
use super::image;
use super::scratch::{self, Scratch};
use super::speech::{self, SpeechEngine};
use super::transcript::Transcript;
use super::{ExtractionRequest, ExtractionResult, Modality};
use crate::engines::{DocumentEngine, MediaConverter, OcrEngine};
use crate::error::ExtractionError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// An `ExtractionResult` plus the HTTP-equivalent status it should be sent with.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub status: u16,
    pub result: ExtractionResult,
}

impl ExtractionOutcome {
    fn success(id: Uuid, modality: &str, transcript: Transcript, text: String) -> Self {
        Self {
            status: 200,
            result: ExtractionResult {
                id,
                modality: modality.to_string(),
                transcript: Some(transcript),
                text,
                error: None,
            },
        }
    }

    /// Failure outcome with a fresh id. Also used by the HTTP layer for
    /// requests rejected before they reach the orchestrator.
    pub fn rejected(modality: &str, error: ExtractionError) -> Self {
        Self::failure(Uuid::new_v4(), modality, error)
    }

    fn failure(id: Uuid, modality: &str, error: ExtractionError) -> Self {
        Self {
            status: error.status_code(),
            result: ExtractionResult {
                id,
                modality: modality.to_string(),
                transcript: None,
                text: String::new(),
                error: Some(error.to_string()),
            },
        }
    }
}

pub struct Extractor {
    documents: Arc<dyn DocumentEngine>,
    ocr: Arc<dyn OcrEngine>,
    converter: Arc<dyn MediaConverter>,
    speech: SpeechEngine,
    /// Language reported for speech engines that do not detect one
    default_language: String,
    scratch_root: Option<PathBuf>,
}

impl Extractor {
    pub fn new(
        documents: Arc<dyn DocumentEngine>,
        ocr: Arc<dyn OcrEngine>,
        converter: Arc<dyn MediaConverter>,
        speech: SpeechEngine,
    ) -> Self {
        Self {
            documents,
            ocr,
            converter,
            speech,
            default_language: "en".to_string(),
            scratch_root: None,
        }
    }

    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    /// Place scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: Option<PathBuf>) -> Self {
        self.scratch_root = root;
        self
    }

    /// Short description of the configured speech binding, for health output.
    pub fn speech_engine(&self) -> String {
        self.speech.describe()
    }

    pub async fn extract(&self, request: ExtractionRequest) -> ExtractionOutcome {
        let id = Uuid::new_v4();
        let modality = request.modality;
        let bytes = request.payload.as_ref().map(Vec::len).unwrap_or(0);
        let span = info_span!(
            "extract",
            %id,
            modality = %modality,
            bytes,
            file = request.file_name.as_deref().unwrap_or("-"),
        );

        async move {
            let started = Instant::now();
            match self.run(request).await {
                Ok((transcript, text)) => {
                    info!(
                        units = transcript.units.len(),
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Extraction completed"
                    );
                    ExtractionOutcome::success(id, modality.as_str(), transcript, text)
                }
                Err(e) => {
                    match &e {
                        ExtractionError::EngineFailure(_) => error!(kind = e.kind(), "Extraction failed: {}", e),
                        _ => warn!(kind = e.kind(), "Extraction rejected: {}", e),
                    }
                    ExtractionOutcome::failure(id, modality.as_str(), e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Returns the transcript and the result's top-level `text`.
    async fn run(&self, request: ExtractionRequest) -> Result<(Transcript, String), ExtractionError> {
        let payload = match request.payload {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return Err(ExtractionError::InputMissing),
        };

        if request.modality != Modality::Document {
            single_path(request.modality, request.sub_format.as_deref())?;
        }

        match request.modality {
            Modality::Document => {
                let path = DocumentPath::from_sub_format(request.sub_format.as_deref())?;
                info!(strategy = ?path, "Running document strategy");
                let transcript = match path {
                    DocumentPath::TextLayer => {
                        document::extract_text_layer(self.documents.as_ref(), &payload).await?
                    }
                    DocumentPath::OcrFallback => {
                        let scratch = self.scratch()?;
                        document::extract_with_ocr_fallback(
                            self.documents.as_ref(),
                            self.ocr.as_ref(),
                            &scratch,
                            &payload,
                        )
                        .await?
                    }
                };
                let text = transcript.full_text.clone();
                Ok((transcript, text))
            }
            Modality::Image => {
                let scratch = self.scratch()?;
                let extraction = image::extract_image(self.ocr.as_ref(), &scratch, &payload).await?;
                Ok((extraction.transcript, extraction.plain_text))
            }
            Modality::Audio | Modality::Video => {
                let started = Instant::now();
                let scratch = self.scratch()?;
                let extension = scratch::extension_for(
                    request.file_name.as_deref(),
                    request.modality.default_extension(),
                );
                info!(engine = %self.speech.describe(), "Running speech strategy");
                let transcript = speech::transcribe_media(
                    &self.speech,
                    self.converter.as_ref(),
                    &scratch,
                    &payload,
                    &extension,
                    &self.default_language,
                    started,
                )
                .await?;
                let text = transcript.full_text.clone();
                Ok((transcript, text))
            }
        }
    }

    fn scratch(&self) -> Result<Scratch, ExtractionError> {
        Scratch::new_in(self.scratch_root.as_deref()).map_err(|e| {
            ExtractionError::EngineFailure(format!("Failed to create scratch directory: {}", e))
        })
    }
}

/// Image, audio and video have one strategy each; any other declared
/// sub-path is not implemented.
fn single_path(modality: Modality, sub_format: Option<&str>) -> Result<(), ExtractionError> {
    match sub_format.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => Ok(()),
        Some(name) if name == modality.as_str() => Ok(()),
        Some(other) => Err(ExtractionError::UnsupportedModality(format!(
            "{} sub-format '{}' is not implemented",
            modality.as_str(),
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::fakes::{FakeConverter, FakeDocument, FakeOcr, FakeSpeech};
    use crate::engines::{OcrWord, PageContent, SpeechError};
    use crate::extraction::speech::BackendChain;
    use std::sync::atomic::Ordering;

    struct Harness {
        documents: Arc<FakeDocument>,
        ocr: Arc<FakeOcr>,
        converter: Arc<FakeConverter>,
        speech_calls: Arc<std::sync::atomic::AtomicUsize>,
        extractor: Extractor,
    }

    fn harness(documents: FakeDocument, ocr: FakeOcr, converter: FakeConverter) -> Harness {
        let documents = Arc::new(documents);
        let ocr = Arc::new(ocr);
        let converter = Arc::new(converter);
        let speech = FakeSpeech::new("whisper-api", Ok("spoken words".into()));
        let speech_calls = speech.counter();

        let extractor = Extractor::new(
            documents.clone(),
            ocr.clone(),
            converter.clone(),
            SpeechEngine::Cloud(BackendChain::new(Arc::new(speech))),
        );

        Harness {
            documents,
            ocr,
            converter,
            speech_calls,
            extractor,
        }
    }

    fn default_harness() -> Harness {
        harness(
            FakeDocument::with_pages(vec![PageContent {
                number: 1,
                text: "page one".into(),
                images: vec![],
            }]),
            FakeOcr::default(),
            FakeConverter::default(),
        )
    }

    #[tokio::test]
    async fn test_missing_payload_invokes_no_engine() {
        let h = default_harness();

        for modality in [Modality::Document, Modality::Image, Modality::Audio, Modality::Video] {
            for payload in [None, Some(Vec::new())] {
                let outcome = h
                    .extractor
                    .extract(ExtractionRequest::new(modality, payload))
                    .await;
                assert_eq!(outcome.status, 400);
                assert_eq!(outcome.result.error.as_deref(), Some("No file uploaded"));
                assert!(outcome.result.transcript.is_none());
            }
        }

        assert_eq!(h.documents.calls(), 0);
        assert_eq!(h.ocr.calls(), 0);
        assert_eq!(h.converter.calls(), 0);
        assert_eq!(h.speech_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_document_text_success() {
        let h = default_harness();
        let outcome = h
            .extractor
            .extract(ExtractionRequest::new(Modality::Document, Some(b"%PDF-1.4".to_vec())))
            .await;

        assert_eq!(outcome.status, 200);
        assert!(outcome.result.error.is_none());
        assert_eq!(outcome.result.text, "page one");
        assert_eq!(outcome.result.modality, "document");
    }

    #[tokio::test]
    async fn test_unknown_document_sub_format_is_501() {
        let h = default_harness();
        let request = ExtractionRequest::new(Modality::Document, Some(b"%PDF".to_vec()))
            .with_sub_format(Some("epub".into()));

        let outcome = h.extractor.extract(request).await;

        assert_eq!(outcome.status, 501);
        assert_eq!(h.documents.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_media_sub_format_is_501() {
        let h = default_harness();

        for modality in [Modality::Image, Modality::Audio, Modality::Video] {
            let request = ExtractionRequest::new(modality, Some(b"RIFF".to_vec()))
                .with_sub_format(Some("docx".into()));
            let outcome = h.extractor.extract(request).await;

            assert_eq!(outcome.status, 501);
            assert!(outcome.result.error.unwrap().contains("'docx'"));
        }

        assert_eq!(h.ocr.calls(), 0);
        assert_eq!(h.converter.calls(), 0);
        assert_eq!(h.speech_calls.load(Ordering::SeqCst), 0);

        let request = ExtractionRequest::new(Modality::Audio, Some(b"RIFF".to_vec()))
            .with_sub_format(Some("Audio".into()));
        assert_eq!(h.extractor.extract(request).await.status, 200);
    }

    #[tokio::test]
    async fn test_engine_failure_is_500_with_id() {
        let h = harness(
            FakeDocument {
                fail_pages: Some("xref table broken".into()),
                ..Default::default()
            },
            FakeOcr::default(),
            FakeConverter::default(),
        );

        let outcome = h
            .extractor
            .extract(ExtractionRequest::new(Modality::Document, Some(b"junk".to_vec())))
            .await;

        assert_eq!(outcome.status, 500);
        assert!(outcome.result.error.unwrap().contains("xref table broken"));
        assert!(outcome.result.transcript.is_none());
        assert!(!outcome.result.id.is_nil());
    }

    #[tokio::test]
    async fn test_video_conversion_failure_is_terminal() {
        let h = harness(FakeDocument::default(), FakeOcr::default(), FakeConverter::failing());

        let request = ExtractionRequest::new(Modality::Video, Some(b"\x00\x00\x00\x18ftyp".to_vec()))
            .with_file_name(Some("lecture.mp4".into()));
        let outcome = h.extractor.extract(request).await;

        assert_eq!(outcome.status, 500);
        assert!(outcome.result.error.unwrap().starts_with("Audio conversion failed"));
        assert_eq!(h.converter.calls(), 1);
        assert_eq!(h.speech_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_audio_uses_speech_chain() {
        let h = default_harness();
        let outcome = h
            .extractor
            .extract(ExtractionRequest::new(Modality::Audio, Some(b"RIFF".to_vec())))
            .await;

        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.result.text, "spoken words");
        assert_eq!(h.speech_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scratch_removed_on_success_and_failure() {
        let root = tempfile::tempdir().unwrap();

        let ok = harness(FakeDocument::default(), FakeOcr::default(), FakeConverter::default())
            .extractor
            .with_scratch_root(Some(root.path().to_path_buf()));
        let outcome = ok
            .extract(ExtractionRequest::new(Modality::Audio, Some(b"RIFF".to_vec())))
            .await;
        assert_eq!(outcome.status, 200);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);

        let failing = harness(FakeDocument::default(), FakeOcr::default(), FakeConverter::failing())
            .extractor
            .with_scratch_root(Some(root.path().to_path_buf()));
        let outcome = failing
            .extract(ExtractionRequest::new(Modality::Audio, Some(b"RIFF".to_vec())))
            .await;
        assert_eq!(outcome.status, 500);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_speech_unintelligible_is_success() {
        let extractor = Extractor::new(
            Arc::new(FakeDocument::default()),
            Arc::new(FakeOcr::default()),
            Arc::new(FakeConverter::default()),
            SpeechEngine::Cloud(BackendChain::new(Arc::new(FakeSpeech::new(
                "primary",
                Err(SpeechError::Unintelligible),
            )))),
        );

        let outcome = extractor
            .extract(ExtractionRequest::new(Modality::Audio, Some(b"RIFF".to_vec())))
            .await;

        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.result.text, "Could not understand audio");
    }

    #[tokio::test]
    async fn test_image_text_is_plain_ocr_string() {
        let png = {
            let img = ::image::GrayImage::new(2, 2);
            let mut out = std::io::Cursor::new(Vec::new());
            img.write_to(&mut out, ::image::ImageFormat::Png).unwrap();
            out.into_inner()
        };
        let mut ocr = FakeOcr::with_texts(&[(png.as_slice(), "Total: 12\n\n")]);
        ocr.words = vec![OcrWord {
            text: "Total:".into(),
            confidence: 91.0,
            block_id: 1,
            left: 0,
            top: 0,
            width: 2,
            height: 2,
        }];
        let h = harness(FakeDocument::default(), ocr, FakeConverter::default());

        let outcome = h
            .extractor
            .extract(ExtractionRequest::new(Modality::Image, Some(png)))
            .await;

        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.result.text, "Total: 12\n\n");
        assert_eq!(outcome.result.transcript.unwrap().full_text, "Total:");
    }
}
