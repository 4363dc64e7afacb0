//! # Media Extract Backend - Main Application Entry Point
//!
//! HTTP service that turns uploaded documents, images, audio and video into
//! a uniform, confidence-scored transcript.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: The entire application is asynchronous
//! - **Trait objects**: engines are chosen from configuration at startup and
//!   handed to the extraction core as `Arc<dyn Trait>`
//! - **Result<T, E>**: startup failures propagate to `main` with `?`
//! - **static**: the shutdown flag lives for the whole program
//!
//! ## Application Architecture:
//! - **config**: TOML file + environment variables
//! - **state**: shared state, engines and metrics
//! - **extraction**: the core (strategies, confidence model, orchestrator)
//! - **engines**: lopdf, Tesseract, ffmpeg, speech backends, Candle models
//! - **device**: compute device selection for the local models
//! - **health**: health and metrics endpoints
//! - **middleware**: request logging and metrics
//! - **handlers**: extraction, embedding and config endpoints
//! - **error**: HTTP error envelope and the extraction failure taxonomy

mod config;
mod device;
mod engines;
mod error;
mod extraction;
mod handlers;
mod health;
mod middleware;
mod state;

use crate::config::{AppConfig, SpeechEngineKind};
use crate::engines::cloud_speech::{AssemblyAiBackend, PollPolicy, WhisperApiBackend};
use crate::engines::embedding::CandleEmbedder;
use crate::engines::ffmpeg::FfmpegConverter;
use crate::engines::pdf::LopdfEngine;
use crate::engines::tesseract::TesseractCli;
use crate::engines::whisper::{LocalWhisper, ModelSize};
use crate::engines::Embedder;
use crate::error::AppError;
use crate::extraction::speech::{BackendChain, SpeechEngine};
use crate::extraction::Extractor;
use crate::state::{AppState, EngineInventory};
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGTERM or SIGINT arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting media-extract-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let app_state = build_state(config.clone()).await?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let json_limit = config.performance.max_upload_bytes;

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let json_config = web::JsonConfig::default()
            .limit(json_limit)
            .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into());

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(json_config)
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .configure(extraction_routes),
            )
            // Unversioned paths used by existing clients
            .route("/health", web::get().to(health::health_check))
            .configure(extraction_routes)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Extraction and embedding routes, mounted both under `/api/v1` and at the root.
fn extraction_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/extract/pdf", web::post().to(handlers::extract_pdf))
        .route("/extract/pdf-ocr", web::post().to(handlers::extract_pdf_ocr))
        .route("/extract/image", web::post().to(handlers::extract_image))
        .route("/extract/audio", web::post().to(handlers::extract_audio))
        .route("/extract/video", web::post().to(handlers::extract_video))
        .route("/extract/{modality}", web::post().to(handlers::extract_by_modality))
        .route("/embed", web::post().to(handlers::embed));
}

/// Construct every engine once and wire them into the shared state.
async fn build_state(config: AppConfig) -> Result<AppState> {
    let tools = &config.tools;

    let speech = match config.speech.engine {
        SpeechEngineKind::Cloud => SpeechEngine::Cloud(speech_chain(&config)),
        SpeechEngineKind::Local => {
            let size: ModelSize = config.models.whisper_model.parse()?;
            let device = device::create_device_from_string(&config.models.device);
            let model = LocalWhisper::load(size, device, config.speech.language.clone()).await?;
            SpeechEngine::Local(Arc::new(model))
        }
    };
    info!("Speech engine: {}", speech.describe());

    let embedder: Option<Arc<dyn Embedder>> = if config.models.embeddings_enabled {
        let device = device::create_device_from_string(&config.models.device);
        match CandleEmbedder::load(&config.models.embedding_model, device).await {
            Ok(model) => Some(Arc::new(model)),
            Err(e) => {
                warn!("Embedding model unavailable, /embed will answer 501: {}", e);
                None
            }
        }
    } else {
        info!("Embeddings disabled by configuration");
        None
    };

    let extractor = Extractor::new(
        Arc::new(LopdfEngine::new()),
        Arc::new(TesseractCli::new(&tools.tesseract_path, &tools.tesseract_lang)),
        Arc::new(FfmpegConverter::new(&tools.ffmpeg_path)),
        speech,
    )
    .with_default_language(config.speech.language.clone())
    .with_scratch_root(config.performance.scratch_dir.as_ref().map(PathBuf::from));

    let engines = EngineInventory {
        document: "lopdf".to_string(),
        ocr: format!("tesseract ({})", tools.tesseract_lang),
        converter: "ffmpeg".to_string(),
        speech: extractor.speech_engine(),
        embedding: embedder.as_ref().map(|_| config.models.embedding_model.clone()),
    };

    Ok(AppState::new(config, Arc::new(extractor), embedder, engines))
}

/// Primary Whisper-compatible endpoint, then AssemblyAI when a key is configured.
fn speech_chain(config: &AppConfig) -> BackendChain {
    let speech = &config.speech;
    let mut chain = BackendChain::new(Arc::new(WhisperApiBackend::new(
        &speech.primary_url,
        &speech.primary_model,
        speech.primary_api_key.clone(),
    )));

    match speech.secondary_api_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => {
            let poll = PollPolicy {
                interval: Duration::from_secs(speech.secondary_poll_interval_secs),
                max_polls: speech.secondary_max_polls,
            };
            let backend = AssemblyAiBackend::new(&speech.secondary_url, key).with_poll_policy(poll);
            chain = chain.with_fallback(Arc::new(backend));
        }
        _ => info!("No secondary speech backend configured"),
    }

    chain
}

/// Set up structured logging.
///
/// `RUST_LOG` controls what gets logged; if unset the default is
/// `media_extract_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_extract_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize tracing: {}", e))
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag.
///
/// If a handler cannot be installed the server keeps running without
/// graceful shutdown for that signal.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Resolves once the shutdown flag is set, checking every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
