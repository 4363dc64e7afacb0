//! In-memory engines for tests. Each one counts how often it was called.

use super::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct FakeDocument {
    pub pages: Vec<PageContent>,
    pub properties: BTreeMap<String, String>,
    pub fail_pages: Option<String>,
    pub fail_metadata: bool,
    pub calls: AtomicUsize,
}

impl FakeDocument {
    pub fn with_pages(pages: Vec<PageContent>) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentEngine for FakeDocument {
    async fn pages(&self, _document: &[u8]) -> Result<Vec<PageContent>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_pages {
            Some(msg) => Err(EngineError::Document(msg.clone())),
            None => Ok(self.pages.clone()),
        }
    }

    async fn metadata(&self, _document: &[u8]) -> Result<BTreeMap<String, String>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_metadata {
            return Err(EngineError::Document("no trailer".into()));
        }
        Ok(self.properties.clone())
    }
}

/// OCR fake keyed by image bytes; unknown images read as empty.
#[derive(Default)]
pub struct FakeOcr {
    pub texts: HashMap<Vec<u8>, String>,
    pub words: Vec<OcrWord>,
    pub fail: Option<String>,
    pub calls: AtomicUsize,
}

impl FakeOcr {
    pub fn with_texts<B: AsRef<[u8]>>(texts: &[(B, &str)]) -> Self {
        Self {
            texts: texts
                .iter()
                .map(|(image, text)| (image.as_ref().to_vec(), text.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    async fn recognize_text(&self, image: &[u8], _scratch: &Scratch) -> Result<String, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = &self.fail {
            return Err(EngineError::Ocr(msg.clone()));
        }
        Ok(self.texts.get(image).cloned().unwrap_or_default())
    }

    async fn recognize_words(&self, _image: &[u8], _scratch: &Scratch) -> Result<Vec<OcrWord>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = &self.fail {
            return Err(EngineError::Ocr(msg.clone()));
        }
        Ok(self.words.clone())
    }
}

/// Copies the input to the output, or fails with a fixed stderr.
#[derive(Default)]
pub struct FakeConverter {
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl FakeConverter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaConverter for FakeConverter {
    async fn to_waveform(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ConversionError::Failed {
                status: "exit status: 1".into(),
                stderr: "Invalid data found when processing input".into(),
            });
        }
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

pub struct FakeSpeech {
    pub name: String,
    pub result: Result<String, SpeechError>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeSpeech {
    pub fn new(name: &str, result: Result<String, SpeechError>) -> Self {
        Self {
            name: name.to_string(),
            result,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter that outlives the backend once it is boxed into a chain.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl SpeechBackend for FakeSpeech {
    fn name(&self) -> &str {
        &self.name
    }

    async fn recognize(&self, _waveform: &[u8]) -> Result<String, SpeechError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

pub struct FakeLocal {
    pub transcription: LocalTranscription,
    pub calls: AtomicUsize,
}

impl FakeLocal {
    pub fn new(transcription: LocalTranscription) -> Self {
        Self {
            transcription,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LocalTranscriber for FakeLocal {
    async fn transcribe(&self, _audio_path: &Path) -> Result<LocalTranscription, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.transcription.clone())
    }
}

/// Embeds each string as `[len, index]`.
pub struct FakeEmbedder;

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn encode(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(inputs
            .iter()
            .enumerate()
            .map(|(i, text)| vec![text.len() as f32, i as f32])
            .collect())
    }
}
