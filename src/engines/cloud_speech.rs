//! # Cloud Speech Backends
//!
//! Two remote recognizers for the backend-fallback chain:
//!
//! - **WhisperApiBackend**: any OpenAI-compatible `/audio/transcriptions` endpoint
//! - **AssemblyAiBackend**: upload, create a transcript job, poll until it settles
//!
//! Both classify failures the same way: anything wrong with the exchange
//! itself is `RequestFailed` (the chain may try the next backend), while a
//! well-formed answer with no text is `Unintelligible` (the chain stops).

use super::{SpeechBackend, SpeechError};
use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub struct WhisperApiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperApiResponse {
    #[serde(default)]
    text: String,
}

impl WhisperApiBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        }
    }
}

#[async_trait]
impl SpeechBackend for WhisperApiBackend {
    fn name(&self) -> &str {
        "whisper-api"
    }

    async fn recognize(&self, waveform: &[u8]) -> Result<String, SpeechError> {
        let url = format!("{}/audio/transcriptions", self.base_url);

        let file_part = multipart::Part::bytes(waveform.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| SpeechError::RequestFailed(format!("mime: {}", e)))?;
        let form = multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "json")
            .part("file", file_part);

        debug!(model = %self.model, bytes = waveform.len(), "Sending audio to Whisper API");

        let mut request = self.client.post(&url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SpeechError::RequestFailed(format!("request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(SpeechError::RequestFailed(format!("status {}: {}", status, body)));
        }

        let body: WhisperApiResponse = response
            .json()
            .await
            .map_err(|e| SpeechError::RequestFailed(format!("body: {}", e)))?;

        non_empty(body.text)
    }
}

/// Polling schedule for asynchronous transcript jobs.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_polls: 30,
        }
    }
}

pub struct AssemblyAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    poll: PollPolicy,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptJob {
    id: String,
    status: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Where a transcript job stands after one status read.
#[derive(Debug, PartialEq)]
enum JobState {
    Pending,
    Done(Result<String, SpeechError>),
}

impl TranscriptJob {
    fn state(&self) -> JobState {
        match self.status.as_str() {
            "completed" => JobState::Done(non_empty(self.text.clone().unwrap_or_default())),
            "error" => {
                debug!(job = %self.id, error = ?self.error, "Transcript job ended in error");
                JobState::Done(Err(SpeechError::Unintelligible))
            }
            _ => JobState::Pending,
        }
    }
}

impl AssemblyAiBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            poll: PollPolicy::default(),
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, SpeechError> {
        let response = request
            .header("authorization", &self.api_key)
            .send()
            .await
            .map_err(|e| SpeechError::RequestFailed(format!("{}: {}", what, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::RequestFailed(format!("{}: status {}: {}", what, status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| SpeechError::RequestFailed(format!("{}: body: {}", what, e)))
    }
}

#[async_trait]
impl SpeechBackend for AssemblyAiBackend {
    fn name(&self) -> &str {
        "assemblyai"
    }

    async fn recognize(&self, waveform: &[u8]) -> Result<String, SpeechError> {
        let upload: UploadResponse = self
            .send_json(
                self.client
                    .post(format!("{}/upload", self.base_url))
                    .body(waveform.to_vec()),
                "upload",
            )
            .await?;

        let mut job: TranscriptJob = self
            .send_json(
                self.client
                    .post(format!("{}/transcript", self.base_url))
                    .json(&serde_json::json!({ "audio_url": upload.upload_url })),
                "create transcript",
            )
            .await?;

        for attempt in 0..self.poll.max_polls {
            if let JobState::Done(result) = job.state() {
                return result;
            }
            tokio::time::sleep(self.poll.interval).await;
            debug!(job = %job.id, attempt, "Polling transcript job");
            job = self
                .send_json(
                    self.client.get(format!("{}/transcript/{}", self.base_url, job.id)),
                    "poll transcript",
                )
                .await?;
        }

        match job.state() {
            JobState::Done(result) => result,
            JobState::Pending => Err(SpeechError::RequestFailed(format!(
                "transcript {} still '{}' after {} polls",
                job.id, job.status, self.poll.max_polls
            ))),
        }
    }
}

fn non_empty(text: String) -> Result<String, SpeechError> {
    let text = text.trim();
    if text.is_empty() {
        Err(SpeechError::Unintelligible)
    } else {
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(status: &str, text: Option<&str>) -> TranscriptJob {
        TranscriptJob {
            id: "t-1".into(),
            status: status.into(),
            text: text.map(String::from),
            error: None,
        }
    }

    #[test]
    fn test_job_states() {
        assert_eq!(job("queued", None).state(), JobState::Pending);
        assert_eq!(job("processing", None).state(), JobState::Pending);
        assert_eq!(job("completed", Some(" hi ")).state(), JobState::Done(Ok("hi".into())));
        assert_eq!(
            job("completed", Some("")).state(),
            JobState::Done(Err(SpeechError::Unintelligible))
        );
        assert_eq!(job("error", None).state(), JobState::Done(Err(SpeechError::Unintelligible)));
    }

    #[test]
    fn test_whisper_response_without_text_is_unintelligible() {
        let body: WhisperApiResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(non_empty(body.text), Err(SpeechError::Unintelligible));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_failure() {
        // port 9 (discard) is closed on test machines
        let backend = WhisperApiBackend::new("http://127.0.0.1:9/v1", "whisper-1", None);
        let err = backend.recognize(b"RIFF").await.unwrap_err();
        assert!(matches!(err, SpeechError::RequestFailed(_)));

        let backend = AssemblyAiBackend::new("http://127.0.0.1:9/v2", "key");
        let err = backend.recognize(b"RIFF").await.unwrap_err();
        assert!(matches!(err, SpeechError::RequestFailed(_)));
    }
}
