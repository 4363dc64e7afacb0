//! # Unified Transcript Schema
//!
//! Every strategy, whatever the modality, ends up producing the same shape:
//! an ordered list of units (text + confidence + locator), a flattened
//! `full_text`, and optional modality-specific metadata.
//!
//! ## Key Rust Concepts:
//! - **Tagged enums**: `#[serde(tag = "kind")]` turns an enum variant into a
//!   JSON object with a `"kind"` discriminator, so clients can switch on it
//! - **Constructors that enforce invariants**: `full_text` is never set by
//!   hand; `Transcript::assemble` always derives it from the units

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Axis-aligned rectangle in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Where in the source a unit came from.
///
/// ## Variants:
/// - **Page**: 1-based page number (documents)
/// - **Region**: OCR block id plus bounding box (images)
/// - **Span**: start/end offsets in seconds (audio and video)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    Page { number: u32 },
    Region { block: i64, bbox: BoundingBox },
    Span { start: f64, end: f64 },
}

/// One piece of extracted text. Order within a transcript is reading order
/// (documents, images) or chronological order (speech).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptUnit {
    pub text: String,
    pub confidence: f64,
    pub locator: Locator,
}

impl TranscriptUnit {
    pub fn new(text: impl Into<String>, confidence: f64, locator: Locator) -> Self {
        Self {
            text: text.into(),
            confidence,
            locator,
        }
    }
}

/// Modality-specific data passed through the assembler untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptMetadata {
    Document {
        /// Document properties (title, author, ...), empty values omitted
        properties: BTreeMap<String, String>,
        page_count: usize,
    },
    Image {
        width: u32,
        height: u32,
        /// Plain whole-image OCR output, independent of the block grouping
        ocr_text: String,
    },
    Speech {
        language: String,
        /// Wall-clock seconds spent converting and recognizing
        processing_time: f64,
        /// Backend that produced the text, or "Recognition failed"
        service_used: String,
    },
}

/// The uniform structured output of every extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub units: Vec<TranscriptUnit>,
    pub full_text: String,
    pub metadata: Option<TranscriptMetadata>,
}

impl Transcript {
    /// Build a transcript from units in their final order.
    ///
    /// Unit order is preserved as given and `full_text` is the unit texts
    /// joined with `\n`. Metadata is stored as-is.
    pub fn assemble(units: Vec<TranscriptUnit>, metadata: Option<TranscriptMetadata>) -> Self {
        let full_text = join_lines(&units);
        Self {
            units,
            full_text,
            metadata,
        }
    }
}

fn join_lines(units: &[TranscriptUnit]) -> String {
    units
        .iter()
        .map(|unit| unit.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: u32, text: &str) -> TranscriptUnit {
        TranscriptUnit::new(text, 1.0, Locator::Page { number: n })
    }

    #[test]
    fn test_full_text_joins_units_in_order() {
        let transcript = Transcript::assemble(
            vec![page(1, "first"), page(2, ""), page(3, "third")],
            None,
        );
        assert_eq!(transcript.full_text, "first\n\nthird");

        let split: Vec<&str> = transcript.full_text.split('\n').collect();
        let texts: Vec<&str> = transcript.units.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(split, texts);
    }

    #[test]
    fn test_empty_transcript() {
        let transcript = Transcript::assemble(Vec::new(), None);
        assert!(transcript.units.is_empty());
        assert_eq!(transcript.full_text, "");
    }

    #[test]
    fn test_locator_serializes_with_kind_tag() {
        let value = serde_json::to_value(Locator::Span { start: 0.0, end: 1.5 }).unwrap();
        assert_eq!(value["kind"], "span");
        assert_eq!(value["end"], 1.5);

        let value = serde_json::to_value(Locator::Region {
            block: 2,
            bbox: BoundingBox { left: 1, top: 2, right: 3, bottom: 4 },
        })
        .unwrap();
        assert_eq!(value["kind"], "region");
        assert_eq!(value["bbox"]["right"], 3);
    }

    #[test]
    fn test_metadata_passes_through_unchanged() {
        let metadata = TranscriptMetadata::Speech {
            language: "en".into(),
            processing_time: 0.25,
            service_used: "whisper-api".into(),
        };
        let transcript = Transcript::assemble(vec![], Some(metadata.clone()));
        assert_eq!(transcript.metadata, Some(metadata));
    }
}
