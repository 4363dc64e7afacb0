//! # Document Strategies
//!
//! Two ways of turning a PDF into page units:
//!
//! - **Text layer**: trust whatever the native text layer holds. Every page
//!   scores 1.0, even when it is blank, since the score means "layer
//!   extraction ran", not "text was found".
//! - **OCR fallback**: use the text layer where it has content, otherwise OCR
//!   every embedded image on the page and join the results.
//!
//! Pages are processed one at a time in page order.

use super::confidence;
use super::scratch::Scratch;
use super::transcript::{Locator, Transcript, TranscriptMetadata, TranscriptUnit};
use crate::engines::{DocumentEngine, OcrEngine};
use crate::error::ExtractionError;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Which document strategy a request selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentPath {
    TextLayer,
    OcrFallback,
}

impl DocumentPath {
    /// Map the optional declared sub-format onto a strategy.
    ///
    /// No sub-format means the text layer. Anything unrecognized is a
    /// declared-but-unimplemented path.
    pub fn from_sub_format(sub_format: Option<&str>) -> Result<Self, ExtractionError> {
        match sub_format.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("text") | Some("pdf") => Ok(DocumentPath::TextLayer),
            Some("ocr") | Some("pdf-ocr") => Ok(DocumentPath::OcrFallback),
            Some(other) => Err(ExtractionError::UnsupportedModality(format!(
                "Document sub-format '{}' is not implemented",
                other
            ))),
        }
    }
}

/// Text-layer strategy.
pub async fn extract_text_layer(
    engine: &dyn DocumentEngine,
    document: &[u8],
) -> Result<Transcript, ExtractionError> {
    let pages = engine
        .pages(document)
        .await
        .map_err(|e| ExtractionError::EngineFailure(e.to_string()))?;

    let units: Vec<TranscriptUnit> = pages
        .iter()
        .map(|page| {
            TranscriptUnit::new(
                layer_text(&page.text),
                confidence::TEXT_LAYER,
                Locator::Page { number: page.number },
            )
        })
        .collect();

    let metadata = document_metadata(engine, document, units.len()).await;
    Ok(Transcript::assemble(units, Some(metadata)))
}

/// Text layer first, OCR over the page's embedded images when the layer is empty.
pub async fn extract_with_ocr_fallback(
    engine: &dyn DocumentEngine,
    ocr: &dyn OcrEngine,
    scratch: &Scratch,
    document: &[u8],
) -> Result<Transcript, ExtractionError> {
    let pages = engine
        .pages(document)
        .await
        .map_err(|e| ExtractionError::EngineFailure(e.to_string()))?;

    let mut units = Vec::with_capacity(pages.len());
    for page in &pages {
        let layer = layer_text(&page.text);
        if !layer.is_empty() {
            units.push(TranscriptUnit::new(
                layer,
                confidence::document_page(layer, ""),
                Locator::Page { number: page.number },
            ));
            continue;
        }

        debug!(
            page = page.number,
            images = page.images.len(),
            "Empty text layer, falling back to OCR"
        );

        let mut recognized = Vec::new();
        for image in &page.images {
            let text = ocr
                .recognize_text(image, scratch)
                .await
                .map_err(|e| ExtractionError::EngineFailure(e.to_string()))?;
            let text = text.trim();
            if !text.is_empty() {
                recognized.push(text.to_string());
            }
        }
        let ocr_text = recognized.join("\n");

        units.push(TranscriptUnit::new(
            ocr_text.clone(),
            confidence::document_page(layer, &ocr_text),
            Locator::Page { number: page.number },
        ));
    }

    let metadata = document_metadata(engine, document, units.len()).await;
    Ok(Transcript::assemble(units, Some(metadata)))
}

/// The page's text layer as extracted, or empty when it holds only whitespace.
fn layer_text(text: &str) -> &str {
    if text.trim().is_empty() {
        ""
    } else {
        text
    }
}

/// Properties are best effort: a broken `/Info` dictionary should not cost
/// the caller the page text.
async fn document_metadata(
    engine: &dyn DocumentEngine,
    document: &[u8],
    page_count: usize,
) -> TranscriptMetadata {
    let properties = match engine.metadata(document).await {
        Ok(props) => props
            .into_iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .collect(),
        Err(e) => {
            warn!("Document metadata unavailable: {}", e);
            BTreeMap::new()
        }
    };

    TranscriptMetadata::Document {
        properties,
        page_count,
    }
}
