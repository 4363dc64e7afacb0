//! `POST /embed`: sentence embeddings for a batch of strings.
//!
//! Request `{"inputs": ["first", "second"]}`, response
//! `{"embeddings": [[...], [...]]}` in input order.

use crate::engines::EmbeddingError;
use crate::error::AppError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct EmbedRequest {
    pub inputs: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
}

impl From<EmbeddingError> for AppError {
    fn from(err: EmbeddingError) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub async fn embed(
    state: web::Data<AppState>,
    body: web::Json<EmbedRequest>,
) -> Result<HttpResponse, AppError> {
    let embedder = state
        .embedder
        .as_ref()
        .ok_or_else(|| AppError::NotImplemented("Embedding model is disabled".to_string()))?;

    let inputs = body.into_inner().inputs;
    let embeddings = embedder.encode(&inputs).await?;
    tracing::debug!(inputs = inputs.len(), "Computed embeddings");

    Ok(HttpResponse::Ok().json(EmbedResponse { embeddings }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::fakes::{FakeConverter, FakeDocument, FakeOcr, FakeSpeech};
    use crate::extraction::speech::{BackendChain, SpeechEngine};
    use crate::extraction::Extractor;
    use crate::state::tests::{fake_state, fake_state_with};
    use actix_web::{http::StatusCode, test, App};
    use serde_json::json;
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_embed_preserves_order() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(fake_state()))
                .route("/embed", web::post().to(embed)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/embed")
            .set_json(json!({ "inputs": ["abc", "hello"] }))
            .to_request();
        let body: EmbedResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body.embeddings, vec![vec![3.0, 0.0], vec![5.0, 1.0]]);
    }

    #[actix_web::test]
    async fn test_embed_disabled_is_501() {
        let extractor = Extractor::new(
            Arc::new(FakeDocument::default()),
            Arc::new(FakeOcr::default()),
            Arc::new(FakeConverter::default()),
            SpeechEngine::Cloud(BackendChain::new(Arc::new(FakeSpeech::new("s", Ok("x".into()))))),
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(fake_state_with(extractor, None)))
                .route("/embed", web::post().to(embed)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/embed")
            .set_json(json!({ "inputs": ["abc"] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
