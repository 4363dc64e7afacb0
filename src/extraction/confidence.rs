//! Confidence rules, one per strategy. No cross-strategy normalization.

use crate::engines::OcrWord;

/// Text layer extraction ran; trusted regardless of what it found.
pub const TEXT_LAYER: f64 = 1.0;

/// A page's text came from OCR over its embedded images.
pub const OCR_FALLBACK: f64 = 0.8;

/// Neither the text layer nor OCR produced anything.
pub const NOTHING_FOUND: f64 = 0.0;

/// A cloud speech backend recognized the clip.
pub const CLOUD_SPEECH: f64 = 0.8;

/// The clip was unintelligible or every backend failed.
pub const SPEECH_FAILED: f64 = 0.0;

/// Local model segments without their own score.
pub const LOCAL_SEGMENT_DEFAULT: f64 = 1.0;

/// Three-tier rule for a document page that may have gone through OCR.
pub fn document_page(text_layer: &str, ocr_text: &str) -> f64 {
    if !text_layer.trim().is_empty() {
        TEXT_LAYER
    } else if !ocr_text.is_empty() {
        OCR_FALLBACK
    } else {
        NOTHING_FOUND
    }
}

/// Sum of all positive word confidences across the whole image.
pub fn positive_confidence_sum(words: &[OcrWord]) -> f64 {
    words
        .iter()
        .map(|word| word.confidence)
        .filter(|confidence| *confidence > 0.0)
        .sum()
}

/// Block confidence: the image-wide positive sum divided by this block's
/// word count. Not clamped to [0, 1]; existing consumers rely on the raw value.
pub fn image_block(image_positive_sum: f64, block_word_count: usize) -> f64 {
    if block_word_count == 0 {
        return NOTHING_FOUND;
    }
    image_positive_sum / block_word_count as f64
}

pub fn local_segment(reported: Option<f64>) -> f64 {
    reported.unwrap_or(LOCAL_SEGMENT_DEFAULT)
}
