use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/config`: the effective configuration with API keys redacted.
///
/// Configuration is fixed at startup; change it through `config.toml` or
/// `APP_*` variables and restart.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": state.get_config().redacted()
    })))
}
