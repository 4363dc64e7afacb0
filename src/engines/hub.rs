//! HuggingFace Hub access for the local models.
//!
//! ## Environment Variables:
//! - `HF_TOKEN`: access token for gated or private repositories
//! - `HF_HUB_CACHE`: cache directory (takes priority)
//! - `HF_HOME`: cache root; files go to `$HF_HOME/hub`

use anyhow::{anyhow, Result};
use hf_hub::api::tokio::{Api, ApiBuilder};
use std::path::PathBuf;
use tracing::{debug, info};

/// Build a Hub client configured from the environment.
pub fn api() -> Result<Api> {
    let mut builder = ApiBuilder::new();

    if let Ok(token) = std::env::var("HF_TOKEN") {
        debug!("Using HF token (length: {})", token.len());
        builder = builder.with_token(Some(token));
    } else {
        builder = builder.with_token(None);
    }

    if let Some(cache_dir) = cache_dir() {
        debug!("Using HF cache dir: {:?}", cache_dir);
        builder = builder.with_cache_dir(cache_dir);
    }

    builder
        .with_progress(false)
        .build()
        .map_err(|e| anyhow!("Failed to initialize HuggingFace API: {}", e))
}

fn cache_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("HF_HUB_CACHE") {
        return Some(PathBuf::from(dir));
    }
    std::env::var("HF_HOME")
        .ok()
        .map(|home| PathBuf::from(home).join("hub"))
}

/// Download (or reuse from cache) one file of a model repository.
pub async fn fetch(api: &Api, repo: &str, file: &str) -> Result<PathBuf> {
    let path = api
        .model(repo.to_string())
        .get(file)
        .await
        .map_err(|e| anyhow!("Failed to download {} from {}: {}", file, repo, e))?;
    info!("Fetched {}/{} -> {:?}", repo, file, path);
    Ok(path)
}
