//! # Extraction Endpoints
//!
//! Thin HTTP wrappers around [`Extractor::extract`](crate::extraction::Extractor::extract).
//!
//! ## Request Format:
//! `multipart/form-data` with
//! - `file`: the upload (required; missing or empty gives 400 "No file uploaded")
//! - `format`: optional sub-format, e.g. `ocr` for documents
//!
//! ## Response:
//! Always the serialized `ExtractionResult`, sent with the outcome's status:
//! ```json
//! {
//!   "id": "6f1c...",
//!   "modality": "image",
//!   "transcript": { "units": [...], "full_text": "...", "metadata": {...} },
//!   "text": "...",
//!   "error": null
//! }
//! ```
//!
//! Only malformed multipart bodies and oversized uploads fall back to the
//! `AppError` envelope.

use crate::error::{AppError, ExtractionError};
use crate::extraction::{ExtractionOutcome, ExtractionRequest, Modality};
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{http::StatusCode, web, HttpResponse};
use futures_util::stream::StreamExt;
use tracing::debug;

/// Longest accepted `format` value.
const MAX_FORMAT_BYTES: usize = 64;

/// The parts of a multipart upload the extraction endpoints read.
#[derive(Debug, Default)]
pub struct Upload {
    pub file: Option<Vec<u8>>,
    pub file_name: Option<String>,
    pub format: Option<String>,
}

pub async fn extract_pdf(state: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, AppError> {
    extract_upload(state, Modality::Document, Some("text"), payload).await
}

pub async fn extract_pdf_ocr(state: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, AppError> {
    extract_upload(state, Modality::Document, Some("ocr"), payload).await
}

pub async fn extract_image(state: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, AppError> {
    extract_upload(state, Modality::Image, None, payload).await
}

pub async fn extract_audio(state: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, AppError> {
    extract_upload(state, Modality::Audio, None, payload).await
}

pub async fn extract_video(state: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, AppError> {
    extract_upload(state, Modality::Video, None, payload).await
}

/// `POST /extract/{modality}`: modality from the path, sub-format from the form.
pub async fn extract_by_modality(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let requested = path.into_inner();
    match requested.parse::<Modality>() {
        Ok(modality) => extract_upload(state, modality, None, payload).await,
        Err(reason) => {
            let outcome = ExtractionOutcome::rejected(&requested, ExtractionError::UnsupportedModality(reason));
            state.record_extraction_status(outcome.status);
            respond(outcome)
        }
    }
}

/// Read the form, run the extraction and send the result with its status.
///
/// `fixed_format` wins over the form's `format` field.
async fn extract_upload(
    state: web::Data<AppState>,
    modality: Modality,
    fixed_format: Option<&str>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let upload = read_upload(payload, state.get_config().performance.max_upload_bytes).await?;

    let request = ExtractionRequest::new(modality, upload.file)
        .with_sub_format(fixed_format.map(str::to_string).or(upload.format))
        .with_file_name(upload.file_name);

    let outcome = {
        let _active = state.begin_extraction();
        state.extractor.extract(request).await
    };
    state.record_extraction_status(outcome.status);

    respond(outcome)
}

fn respond(outcome: ExtractionOutcome) -> Result<HttpResponse, AppError> {
    let status = StatusCode::from_u16(outcome.status)
        .map_err(|e| AppError::Internal(format!("invalid outcome status {}: {}", outcome.status, e)))?;
    Ok(HttpResponse::build(status).json(outcome.result))
}

/// Collect the `file` and `format` fields; any other field is skipped.
pub async fn read_upload(mut payload: Multipart, max_upload_bytes: usize) -> Result<Upload, AppError> {
    let mut upload = Upload::default();

    while let Some(item) = payload.next().await {
        let mut field: Field = item?;

        let (name, file_name) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().unwrap_or_default().to_string(),
                cd.get_filename().map(str::to_string),
            ),
            None => (String::new(), None),
        };

        match name.as_str() {
            "file" => {
                let bytes = read_field(&mut field, max_upload_bytes).await?;
                debug!(file = ?file_name, bytes = bytes.len(), "Received upload");
                upload.file_name = file_name;
                upload.file = Some(bytes);
            }
            "format" => {
                let bytes = read_field(&mut field, MAX_FORMAT_BYTES).await?;
                let value = String::from_utf8_lossy(&bytes).trim().to_lowercase();
                upload.format = (!value.is_empty()).then_some(value);
            }
            other => {
                debug!(field = other, "Skipping unexpected form field");
                read_field(&mut field, max_upload_bytes).await?;
            }
        }
    }

    Ok(upload)
}

/// Whole field body, refusing to buffer more than `limit` bytes.
async fn read_field(field: &mut Field, limit: usize) -> Result<Vec<u8>, AppError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::BadRequest(format!("Upload exceeds {} bytes", limit)));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::tests::fake_state;
    use actix_web::{http::header, test, App};
    use std::sync::Arc;

    const BOUNDARY: &str = "----extract-test-boundary";

    /// Multipart body from `(name, file_name, bytes)` parts.
    fn form(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, file_name, bytes) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match file_name {
                Some(file) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        name, file
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn post(uri: &str, body: Vec<u8>) -> actix_web::test::TestRequest {
        test::TestRequest::post()
            .uri(uri)
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    fn routes(cfg: &mut web::ServiceConfig) {
        cfg.route("/extract/pdf", web::post().to(extract_pdf))
            .route("/extract/audio", web::post().to(extract_audio))
            .route("/extract/{modality}", web::post().to(extract_by_modality));
    }

    #[actix_web::test]
    async fn test_audio_upload_round_trip() {
        let state = fake_state();
        let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(routes)).await;

        let body = form(&[("file", Some("clip.mp3"), b"ID3 fake audio")]);
        let resp = test::call_service(&app, post("/extract/audio", body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["modality"], "audio");
        assert_eq!(json["text"], "hello there");
        assert_eq!(json["error"], serde_json::Value::Null);
        assert_eq!(json["transcript"]["metadata"]["kind"], "speech");
        assert_eq!(json["transcript"]["metadata"]["service_used"], "fake-speech");
        assert_eq!(json["transcript"]["units"][0]["confidence"], 0.8);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_extractions, 0);
        assert_eq!(metrics.extractions_by_status[&200], 1);
    }

    #[actix_web::test]
    async fn test_missing_file_is_400_with_id() {
        let app = test::init_service(App::new().app_data(web::Data::new(fake_state())).configure(routes)).await;

        let body = form(&[("format", None, b"ocr")]);
        let resp = test::call_service(&app, post("/extract/pdf", body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["error"], "No file uploaded");
        assert_eq!(json["transcript"], serde_json::Value::Null);
        assert!(json["id"].as_str().map(|id| id.len() == 36).unwrap_or(false));
    }

    #[actix_web::test]
    async fn test_unknown_modality_is_501() {
        let app = test::init_service(App::new().app_data(web::Data::new(fake_state())).configure(routes)).await;

        let body = form(&[("file", Some("sheet.xlsx"), b"PK\x03\x04")]);
        let resp = test::call_service(&app, post("/extract/spreadsheet", body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);

        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["modality"], "spreadsheet");
        assert!(json["error"].as_str().unwrap_or_default().contains("spreadsheet"));
    }

    #[actix_web::test]
    async fn test_unknown_document_format_is_501() {
        let app = test::init_service(App::new().app_data(web::Data::new(fake_state())).configure(routes)).await;

        let body = form(&[("format", None, b"docx"), ("file", Some("a.pdf"), b"%PDF-1.4")]);
        let resp = test::call_service(&app, post("/extract/document", body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[actix_web::test]
    async fn test_oversized_upload_is_rejected() {
        let mut config = AppConfig::default();
        config.performance.max_upload_bytes = 8;
        let state = AppState {
            config: Arc::new(config),
            ..fake_state()
        };
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(routes)).await;

        let body = form(&[("file", Some("big.mp3"), b"0123456789abcdef")]);
        let resp = test::call_service(&app, post("/extract/audio", body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["error"]["type"], "bad_request");
    }
}
