//! Tesseract OCR through its command-line interface.
//!
//! Images are written into the request's scratch directory and handed to
//! `tesseract` by path; output is read from stdout.

use super::{EngineError, OcrEngine, OcrWord};
use crate::extraction::scratch::Scratch;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// TSV `level` value for word rows.
const WORD_LEVEL: &str = "5";

pub struct TesseractCli {
    binary: PathBuf,
    language: String,
}

impl TesseractCli {
    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
        }
    }

    async fn run(&self, image: &Path, extra: &[&str]) -> Result<String, EngineError> {
        let output = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .args(extra)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EngineError::Ocr(format!("could not run {}: {}", self.binary.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Ocr(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn stage(&self, image: &[u8], scratch: &Scratch) -> Result<PathBuf, EngineError> {
        let extension = image::guess_format(image)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("png");
        Ok(scratch.write(extension, image).await?)
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn recognize_text(&self, image: &[u8], scratch: &Scratch) -> Result<String, EngineError> {
        let path = self.stage(image, scratch).await?;
        self.run(&path, &[]).await
    }

    async fn recognize_words(&self, image: &[u8], scratch: &Scratch) -> Result<Vec<OcrWord>, EngineError> {
        let path = self.stage(image, scratch).await?;
        let tsv = self.run(&path, &["tsv"]).await?;
        parse_tsv(&tsv)
    }
}

/// Parse `tesseract ... tsv` output into word rows.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num, left,
/// top, width, height, conf, text. Only level-5 rows are words.
pub fn parse_tsv(tsv: &str) -> Result<Vec<OcrWord>, EngineError> {
    let mut words = Vec::new();

    for (line_no, line) in tsv.lines().enumerate() {
        if line_no == 0 && line.starts_with("level") {
            continue;
        }
        let cols: Vec<&str> = line.splitn(12, '\t').collect();
        if cols.len() < 11 || cols[0] != WORD_LEVEL {
            continue;
        }

        let int = |idx: usize| -> Result<i64, EngineError> {
            cols[idx].trim().parse::<i64>().map_err(|e| {
                EngineError::Ocr(format!("bad TSV value '{}' on line {}: {}", cols[idx], line_no + 1, e))
            })
        };
        let confidence = cols[10].trim().parse::<f64>().map_err(|e| {
            EngineError::Ocr(format!("bad confidence '{}' on line {}: {}", cols[10], line_no + 1, e))
        })?;

        words.push(OcrWord {
            text: cols.get(11).copied().unwrap_or("").to_string(),
            confidence,
            block_id: int(2)?,
            left: int(6)? as i32,
            top: int(7)? as i32,
            width: int(8)? as i32,
            height: int(9)? as i32,
        });
    }

    Ok(words)
}
