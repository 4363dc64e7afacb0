//! # Error Handling
//!
//! Two layers of errors live here:
//!
//! - **AppError**: HTTP-level failures (malformed multipart bodies, bad JSON,
//!   configuration problems). These become the JSON error envelope below.
//! - **ExtractionError**: the classification every extraction failure is folded
//!   into before it leaves the orchestrator. These never become exceptions; they
//!   are turned into an `ExtractionResult` with an `error` field and a status code.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: Each enum variant represents a different kind of error
//! - **Data**: Each variant can hold additional information (String, numbers, etc.)
//! - **Pattern matching**: Use `match` to handle different error types
//!
//! ### Traits for Error Conversion
//! - **From trait**: Automatically converts between error types
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **thiserror**: Derives `Display` and `std::error::Error` from attributes

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// HTTP-level error types for the application.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **NotImplemented**: Capability switched off in configuration (501 errors)
///
/// ## Usage Example:
/// ```ignore
/// return Err(AppError::BadRequest("Invalid JSON".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (engine crashes, I/O failures, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// The requested capability is disabled in this deployment
    NotImplemented(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
        }
    }
}

/// Converts our errors into HTTP responses that clients can understand.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "bad_request",
///     "message": "Upload exceeds 104857600 bytes",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "bad_request",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "config_error",
                msg.clone(),
            ),
            AppError::NotImplemented(msg) => (
                actix_web::http::StatusCode::NOT_IMPLEMENTED,  // 501
                "not_implemented",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,           // Machine-readable error type
                "message": message,           // Human-readable error message
                "timestamp": chrono::Utc::now().to_rfc3339()  // When the error occurred
            }
        }))
    }
}

/// When you use `?` with an anyhow::Error, it automatically becomes an AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always due to the client sending malformed data,
/// so they result in a 400 (Bad Request) response.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// A broken multipart stream is the client's fault (truncated upload, bad boundary).
impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Multipart error: {}", err))
    }
}

/// Classification of everything that can go wrong while extracting a transcript.
///
/// ## Status Code Mapping:
/// - **InputMissing** → 400: no payload supplied, no engine was invoked
/// - **EngineFailure** → 500: an underlying parser/OCR/ASR engine failed
/// - **UnsupportedModality** → 501: declared modality or sub-path not implemented
///
/// "Speech engine understood nothing" is not a variant: it is a
/// successful result carrying placeholder text (see `extraction::speech`).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    #[error("No file uploaded")]
    InputMissing,

    #[error("{0}")]
    EngineFailure(String),

    #[error("{0}")]
    UnsupportedModality(String),
}

impl ExtractionError {
    /// HTTP-equivalent status code for this failure class.
    pub fn status_code(&self) -> u16 {
        match self {
            ExtractionError::InputMissing => 400,
            ExtractionError::EngineFailure(_) => 500,
            ExtractionError::UnsupportedModality(_) => 501,
        }
    }

    /// Short machine-readable name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::InputMissing => "input_missing",
            ExtractionError::EngineFailure(_) => "engine_failure",
            ExtractionError::UnsupportedModality(_) => "unsupported_modality",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_extraction_error_status_codes() {
        assert_eq!(ExtractionError::InputMissing.status_code(), 400);
        assert_eq!(ExtractionError::EngineFailure("boom".into()).status_code(), 500);
        assert_eq!(ExtractionError::UnsupportedModality("x".into()).status_code(), 501);
    }

    #[test]
    fn test_input_missing_message() {
        assert_eq!(ExtractionError::InputMissing.to_string(), "No file uploaded");
    }

    #[test]
    fn test_app_error_response_status() {
        let response = AppError::BadRequest("bad".into()).error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::NotImplemented("off".into()).error_response();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
