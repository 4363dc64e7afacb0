//! Request-scoped scratch directory.
//!
//! Engines that only accept file paths (Tesseract, ffmpeg, the local model)
//! get their input through a `Scratch`. The directory and everything in it
//! is removed when the `Scratch` is dropped, on success and error paths alike.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

pub struct Scratch {
    dir: TempDir,
    next: AtomicUsize,
}

impl Scratch {
    #[cfg(test)]
    pub fn new() -> io::Result<Self> {
        Self::new_in(None)
    }

    /// Create under `root`, or the system temp directory when `None`.
    pub fn new_in(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("media-extract-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        tracing::trace!(path = %dir.path().display(), "Created scratch directory");
        Ok(Self {
            dir,
            next: AtomicUsize::new(0),
        })
    }

    /// A fresh, unused path inside the directory with the given extension.
    pub fn reserve(&self, extension: &str) -> PathBuf {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        self.dir.path().join(format!("item-{}.{}", n, extension))
    }

    /// Write `bytes` to a fresh file and return its path.
    pub async fn write(&self, extension: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.reserve(extension);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

/// File extension to use for an upload, taken from its original name when it
/// has a sane one.
pub fn extension_for(file_name: Option<&str>, fallback: &str) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| fallback.to_string())
}
