//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - Every actix worker holds a clone of `AppState`; the clones share the same
//!   configuration, engines and metrics
//!
//! ### RwLock (Reader-Writer Lock)
//! - Metrics are written by every request (middleware) and read by the
//!   health and metrics endpoints
//! - A poisoned lock is recovered rather than propagated: counters are still
//!   meaningful after a panicking writer
//!
//! ### RAII guards
//! - [`ActiveExtraction`] bumps the in-flight counter on creation and lowers
//!   it on `Drop`, so early returns and errors cannot leak a count

use crate::config::AppConfig;
use crate::engines::Embedder;
use crate::extraction::Extractor;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Effective configuration, fixed at startup
    pub config: Arc<AppConfig>,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    /// The extraction core with its engine handles
    pub extractor: Arc<Extractor>,

    /// Sentence encoder behind `/embed`; `None` when disabled
    pub embedder: Option<Arc<dyn Embedder>>,

    /// What was wired up at startup, for `/health`
    pub engines: EngineInventory,
}

/// Names of the engine bindings in use.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineInventory {
    pub document: String,
    pub ocr: String,
    pub converter: String,
    pub speech: String,
    pub embedding: Option<String>,
}

/// Performance metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Extractions currently being processed
    pub active_extractions: u32,
    /// Extractions finished since start, by outcome status
    pub extractions_by_status: HashMap<u16, u64>,
    /// Key: endpoint name (e.g., "POST /extract/pdf")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        extractor: Arc<Extractor>,
        embedder: Option<Arc<dyn Embedder>>,
        engines: EngineInventory,
    ) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            extractor,
            embedder,
            engines,
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    /// Called for every 4xx/5xx response.
    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Mark one extraction as in flight until the returned guard is dropped.
    pub fn begin_extraction(&self) -> ActiveExtraction {
        self.write_metrics().active_extractions += 1;
        ActiveExtraction {
            metrics: Arc::clone(&self.metrics),
        }
    }

    pub fn record_extraction_status(&self, status: u16) {
        *self.write_metrics().extractions_by_status.entry(status).or_default() += 1;
    }

    /// Consistent copy of the metrics, taken under one read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Guard returned by [`AppState::begin_extraction`].
pub struct ActiveExtraction {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for ActiveExtraction {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        metrics.active_extractions = metrics.active_extractions.saturating_sub(1);
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engines::fakes::{FakeConverter, FakeDocument, FakeEmbedder, FakeOcr, FakeSpeech};
    use crate::extraction::speech::{BackendChain, SpeechEngine};

    /// State wired to in-memory fakes, shared with the handler tests.
    pub(crate) fn fake_state() -> AppState {
        let speech = SpeechEngine::Cloud(BackendChain::new(Arc::new(FakeSpeech::new(
            "fake-speech",
            Ok("hello there".to_string()),
        ))));
        fake_state_with(
            Extractor::new(
                Arc::new(FakeDocument::default()),
                Arc::new(FakeOcr::default()),
                Arc::new(FakeConverter::default()),
                speech,
            ),
            Some(Arc::new(FakeEmbedder)),
        )
    }

    pub(crate) fn fake_state_with(extractor: Extractor, embedder: Option<Arc<dyn Embedder>>) -> AppState {
        let engines = EngineInventory {
            document: "fake".to_string(),
            ocr: "fake".to_string(),
            converter: "fake".to_string(),
            speech: extractor.speech_engine(),
            embedding: embedder.as_ref().map(|_| "fake".to_string()),
        };
        AppState::new(AppConfig::default(), Arc::new(extractor), embedder, engines)
    }

    #[test]
    fn test_active_extraction_guard() {
        let state = fake_state();
        {
            let _first = state.begin_extraction();
            let _second = state.begin_extraction();
            assert_eq!(state.get_metrics_snapshot().active_extractions, 2);
        }
        assert_eq!(state.get_metrics_snapshot().active_extractions, 0);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = fake_state();
        state.record_endpoint_request("POST /extract/pdf", 30, false);
        state.record_endpoint_request("POST /extract/pdf", 10, true);
        state.record_extraction_status(200);
        state.record_extraction_status(200);
        state.record_extraction_status(501);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["POST /extract/pdf"];
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
        assert_eq!(snapshot.extractions_by_status[&200], 2);
        assert_eq!(snapshot.extractions_by_status[&501], 1);
        assert_eq!(EndpointMetric::default().error_rate(), 0.0);
    }
}
