//! # Local Whisper Transcriber
//!
//! Runs a Candle Whisper model in-process over the canonical 16 kHz WAV.
//!
//! ## Transcription Process:
//! 1. Read the WAV file and mix down to mono `f32` samples
//! 2. Split into 30-second windows (the model's maximum input length)
//! 3. Detect the spoken language on the first window
//! 4. Greedy-decode each window; every non-empty window becomes one segment
//!
//! ## Thread Safety:
//! The decoder keeps a KV cache, so the model is not reentrant. All calls go
//! through a mutex and run on the blocking pool so they do not stall the
//! async workers.

use super::{hub, EngineError, LocalTranscriber, LocalTranscription, SpeechSegment};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;

/// Repository that publishes precomputed 80-bin mel filter banks.
const MEL_FILTER_REPO: &str = "FL33TW00D-HF/whisper-base";
const MEL_FILTER_FILE: &str = "melfilters.bytes";

/// Upper bound on decoded tokens per 30 s window.
const MAX_TOKENS_PER_WINDOW: usize = 224;

/// Language codes Whisper has dedicated tokens for (`<|en|>`, `<|de|>`, ...).
const LANGUAGES: &[&str] = &[
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv", "it",
    "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no", "th", "ur",
    "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr", "az", "sl", "kn",
    "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw", "gl", "mr", "pa", "si",
    "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu", "am", "yi", "lo", "uz", "fo",
    "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl", "mg", "as", "tt", "haw", "ln", "ha",
    "ba", "jw", "su",
];

/// Available Whisper model sizes.
///
/// ## Trade-offs:
/// - **Size vs Accuracy**: Larger models are more accurate but slower
/// - **Memory vs Speed**: More memory usage for better performance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// HuggingFace repository holding the weights.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Everything the decoder needs, guarded together by one mutex.
struct WhisperState {
    model: m::model::Whisper,
    config: Config,
    tokenizer: Tokenizer,
    device: Device,
    mel_filters: Vec<f32>,
    /// Reported when the tokenizer has no language tokens to detect with
    fallback_language: String,
}

pub struct LocalWhisper {
    state: Arc<Mutex<WhisperState>>,
}

impl LocalWhisper {
    /// Download (or reuse cached) weights and build the model on `device`.
    pub async fn load(size: ModelSize, device: Device, fallback_language: String) -> Result<Self> {
        tracing::info!("Loading Whisper {} model...", size);
        let start_time = std::time::Instant::now();

        let api = hub::api()?;
        let config_path = hub::fetch(&api, size.repo_name(), "config.json").await?;
        let tokenizer_path = hub::fetch(&api, size.repo_name(), "tokenizer.json").await?;
        let weights_path = hub::fetch(&api, size.repo_name(), "model.safetensors").await?;
        let mel_path = hub::fetch(&api, MEL_FILTER_REPO, MEL_FILTER_FILE).await?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_path)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let mel_filters = read_mel_filters(&std::fs::read(mel_path)?, config.num_mel_bins)?;

        // SAFETY: safetensors files are memory-mapped read-only
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        tracing::info!(
            "Whisper {} model loaded on {} in {:.2}s",
            size,
            crate::device::DeviceManager::get_device_info(&device),
            start_time.elapsed().as_secs_f64()
        );

        Ok(Self {
            state: Arc::new(Mutex::new(WhisperState {
                model,
                config,
                tokenizer,
                device,
                mel_filters,
                fallback_language,
            })),
        })
    }
}

#[async_trait]
impl LocalTranscriber for LocalWhisper {
    async fn transcribe(&self, audio_path: &Path) -> Result<LocalTranscription, EngineError> {
        let path = audio_path.to_path_buf();
        let state = Arc::clone(&self.state);

        tokio::task::spawn_blocking(move || {
            let pcm = read_pcm(&path)?;
            let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            state
                .transcribe(&pcm)
                .map_err(|e| EngineError::Model(e.to_string()))
        })
        .await
        .map_err(|e| EngineError::Model(format!("transcription worker panicked: {}", e)))?
    }
}

impl WhisperState {
    fn transcribe(&mut self, pcm: &[f32]) -> Result<LocalTranscription> {
        let started = std::time::Instant::now();
        let duration = pcm.len() as f64 / m::SAMPLE_RATE as f64;
        let window_seconds = m::N_SAMPLES as f64 / m::SAMPLE_RATE as f64;

        let mut language: Option<String> = None;
        let mut segments = Vec::new();

        for (i, chunk) in pcm.chunks(m::N_SAMPLES).enumerate() {
            let mel = m::audio::pcm_to_mel(&self.config, chunk, &self.mel_filters);
            let n_mels = self.config.num_mel_bins;
            let n_frames = mel.len() / n_mels;
            let mel = Tensor::from_vec(mel, (1, n_mels, n_frames), &self.device)?
                .narrow(2, 0, n_frames.min(m::N_FRAMES))?;

            let features = self.model.encoder.forward(&mel, true)?;
            if language.is_none() {
                language = Some(self.detect_language(&features)?);
            }

            let text = self.decode_window(&features, language.as_deref())?;
            if text.is_empty() {
                continue;
            }

            let start = i as f64 * window_seconds;
            segments.push(SpeechSegment {
                start,
                end: (start + window_seconds).min(duration),
                text,
                confidence: None,
            });
        }

        let language = language.unwrap_or_else(|| self.fallback_language.clone());

        tracing::debug!(
            "Transcribed {:.2}s of audio in {:.2}s ({} segments, language {})",
            duration,
            started.elapsed().as_secs_f64(),
            segments.len(),
            language
        );

        Ok(LocalTranscription {
            language,
            segments,
        })
    }

    fn token(&self, token: &str) -> Result<u32> {
        self.tokenizer
            .token_to_id(token)
            .ok_or_else(|| anyhow!("token not found: {}", token))
    }

    /// Most likely language code for one window's encoder output.
    fn detect_language(&mut self, features: &Tensor) -> Result<String> {
        let candidates: Vec<(&str, u32)> = LANGUAGES
            .iter()
            .filter_map(|code| {
                self.tokenizer
                    .token_to_id(&format!("<|{}|>", code))
                    .map(|id| (*code, id))
            })
            .collect();
        if candidates.is_empty() {
            return Ok(self.fallback_language.clone());
        }

        let sot = self.token(m::SOT_TOKEN)?;
        let tokens = Tensor::new(&[[sot]], &self.device)?;
        let ids: Vec<u32> = candidates.iter().map(|(_, id)| *id).collect();
        let ids = Tensor::new(ids.as_slice(), &self.device)?;

        let ys = self.model.decoder.forward(&tokens, features, true)?;
        let logits = self.model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
        let logits = logits.index_select(&ids, 0)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec1::<f32>()?;
        self.model.reset_kv_cache();

        let best = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| candidates[idx].0)
            .unwrap_or("en");
        Ok(best.to_string())
    }

    /// Greedy decode of one window.
    fn decode_window(&mut self, features: &Tensor, language: Option<&str>) -> Result<String> {
        let sot = self.token(m::SOT_TOKEN)?;
        let transcribe = self.token(m::TRANSCRIBE_TOKEN)?;
        let no_timestamps = self.token(m::NO_TIMESTAMPS_TOKEN)?;
        let eot = self.token(m::EOT_TOKEN)?;

        let mut tokens = vec![sot];
        if let Some(id) = language.and_then(|code| self.tokenizer.token_to_id(&format!("<|{}|>", code))) {
            tokens.push(id);
        }
        tokens.push(transcribe);
        tokens.push(no_timestamps);
        let prompt_len = tokens.len();

        for step in 0..MAX_TOKENS_PER_WINDOW {
            let input = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&input, features, step == 0)?;
            let logits = self.model.decoder.final_linear(&ys.squeeze(0)?)?;
            let seq_len = logits.dim(0)?;
            let next = logits.get(seq_len - 1)?.argmax(0)?.to_scalar::<u32>()?;
            if next == eot {
                break;
            }
            tokens.push(next);
        }
        self.model.reset_kv_cache();

        let text = self
            .tokenizer
            .decode(&tokens[prompt_len..], true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;
        Ok(text.trim().to_string())
    }
}

/// Little-endian f32 filter bank, `num_mel_bins * (N_FFT / 2 + 1)` values.
fn read_mel_filters(bytes: &[u8], num_mel_bins: usize) -> Result<Vec<f32>> {
    let expected = num_mel_bins * (m::N_FFT / 2 + 1);
    if bytes.len() < expected * 4 {
        return Err(anyhow!(
            "mel filters file too small: {} bytes, expected at least {}",
            bytes.len(),
            expected * 4
        ));
    }
    let mut filters = vec![0f32; expected];
    LittleEndian::read_f32_into(&bytes[..expected * 4], &mut filters);
    Ok(filters)
}

/// Mono `f32` samples from a 16 kHz WAV file.
fn read_pcm(path: &Path) -> Result<Vec<f32>, EngineError> {
    let mut file = std::fs::File::open(path)?;
    let (header, data) = wav::read(&mut file)?;

    if header.sampling_rate != m::SAMPLE_RATE as u32 {
        return Err(EngineError::Model(format!(
            "expected {} Hz audio, got {} Hz",
            m::SAMPLE_RATE,
            header.sampling_rate
        )));
    }

    let interleaved: Vec<f32> = match data {
        wav::BitDepth::Eight(samples) => samples.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
        wav::BitDepth::Sixteen(samples) => samples.iter().map(|&s| s as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(samples) => samples.iter().map(|&s| s as f32 / 8_388_608.0).collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        wav::BitDepth::Empty => Vec::new(),
    };

    Ok(downmix(&interleaved, header.channel_count.max(1) as usize))
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("medium".parse::<ModelSize>().unwrap(), ModelSize::Medium);
        assert_eq!("LARGE".parse::<ModelSize>().unwrap(), ModelSize::Large);
        assert!("invalid".parse::<ModelSize>().is_err());
        assert_eq!(ModelSize::Base.repo_name(), "openai/whisper-base");
    }

    #[test]
    fn test_read_mel_filters_length_check() {
        let expected = 80 * (m::N_FFT / 2 + 1);
        let bytes = vec![0u8; expected * 4];
        assert_eq!(read_mel_filters(&bytes, 80).unwrap().len(), expected);
        assert!(read_mel_filters(&bytes[..100], 80).is_err());
    }

    #[test]
    fn test_downmix_stereo() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.25, -0.25], 1), vec![0.25, -0.25]);
    }

    #[test]
    fn test_read_pcm_from_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, 1, 16_000, 16);
        let samples = wav::BitDepth::Sixteen(vec![0, 16384, -16384, 32767]);
        let mut file = std::fs::File::create(&path).unwrap();
        wav::write(header, &samples, &mut file).unwrap();
        drop(file);

        let pcm = read_pcm(&path).unwrap();
        assert_eq!(pcm.len(), 4);
        assert_eq!(pcm[1], 0.5);
        assert_eq!(pcm[2], -0.5);
    }

    #[test]
    fn test_read_pcm_rejects_other_rates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cd.wav");
        let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, 1, 44_100, 16);
        let mut file = std::fs::File::create(&path).unwrap();
        wav::write(header, &wav::BitDepth::Sixteen(vec![0; 8]), &mut file).unwrap();
        drop(file);

        assert!(matches!(read_pcm(&path), Err(EngineError::Model(_))));
    }
}
