//! # Image OCR Strategy
//!
//! Groups Tesseract's word-level output into blocks. Two quantities are
//! deliberately image-global rather than per-block:
//!
//! - the confidence numerator (sum of every positive word confidence in the image)
//! - the bounding box (union over every word in the image)
//!
//! so every block of one image reports the same box, and block confidence is
//! `global_positive_sum / words_in_block`, which can exceed 1.0.

use super::confidence;
use super::scratch::Scratch;
use super::transcript::{BoundingBox, Locator, Transcript, TranscriptMetadata, TranscriptUnit};
use crate::engines::{OcrEngine, OcrWord};
use crate::error::ExtractionError;

/// Accumulator threaded through the grouping fold.
#[derive(Debug, Default)]
struct Grouping<'a> {
    closed: Vec<(i64, Vec<&'a OcrWord>)>,
    open: Option<(i64, Vec<&'a OcrWord>)>,
}

impl<'a> Grouping<'a> {
    fn push(mut self, word: &'a OcrWord) -> Self {
        if word.text.trim().is_empty() {
            return self;
        }
        match self.open.take() {
            Some((block, mut words)) if block == word.block_id => {
                words.push(word);
                self.open = Some((block, words));
            }
            Some(finished) => {
                self.closed.push(finished);
                self.open = Some((word.block_id, vec![word]));
            }
            None => self.open = Some((word.block_id, vec![word])),
        }
        self
    }

    fn finish(mut self) -> Vec<(i64, Vec<&'a OcrWord>)> {
        if let Some(last) = self.open.take() {
            self.closed.push(last);
        }
        self.closed
    }
}

/// Split words into consecutive same-block runs, skipping blank words.
pub fn group_blocks(words: &[OcrWord]) -> Vec<(i64, Vec<&OcrWord>)> {
    words
        .iter()
        .fold(Grouping::default(), Grouping::push)
        .finish()
}

/// Union box over all words; `None` for an empty list.
pub fn union_bbox(words: &[OcrWord]) -> Option<BoundingBox> {
    words.iter().fold(None, |acc: Option<BoundingBox>, w| {
        let right = w.left + w.width;
        let bottom = w.top + w.height;
        Some(match acc {
            None => BoundingBox {
                left: w.left,
                top: w.top,
                right,
                bottom,
            },
            Some(b) => BoundingBox {
                left: b.left.min(w.left),
                top: b.top.min(w.top),
                right: b.right.max(right),
                bottom: b.bottom.max(bottom),
            },
        })
    })
}

/// Turn word-level OCR output into one unit per block.
pub fn blocks_to_units(words: &[OcrWord]) -> Vec<TranscriptUnit> {
    let positive_sum = confidence::positive_confidence_sum(words);
    let bbox = union_bbox(words).unwrap_or(BoundingBox {
        left: 0,
        top: 0,
        right: 0,
        bottom: 0,
    });

    group_blocks(words)
        .into_iter()
        .map(|(block, block_words)| {
            let text = block_words
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            TranscriptUnit::new(
                text,
                confidence::image_block(positive_sum, block_words.len()),
                Locator::Region { block, bbox },
            )
        })
        .collect()
}

/// Output of the image strategy: the block transcript plus the plain
/// whole-image OCR string that becomes the result's `text`.
#[derive(Debug)]
pub struct ImageExtraction {
    pub transcript: Transcript,
    pub plain_text: String,
}

pub async fn extract_image(
    ocr: &dyn OcrEngine,
    scratch: &Scratch,
    image: &[u8],
) -> Result<ImageExtraction, ExtractionError> {
    let (width, height) = image_dimensions(image)?;

    let plain_text = ocr
        .recognize_text(image, scratch)
        .await
        .map_err(|e| ExtractionError::EngineFailure(e.to_string()))?;
    let words = ocr
        .recognize_words(image, scratch)
        .await
        .map_err(|e| ExtractionError::EngineFailure(e.to_string()))?;

    tracing::debug!(words = words.len(), width, height, "OCR word output received");

    let units = blocks_to_units(&words);
    let metadata = TranscriptMetadata::Image {
        width,
        height,
        ocr_text: plain_text.clone(),
    };

    Ok(ImageExtraction {
        transcript: Transcript::assemble(units, Some(metadata)),
        plain_text,
    })
}

/// Width and height from the image header; pixel data is left to the OCR engine.
fn image_dimensions(image: &[u8]) -> Result<(u32, u32), ExtractionError> {
    let reader = image::ImageReader::new(std::io::Cursor::new(image))
        .with_guessed_format()
        .map_err(|e| ExtractionError::EngineFailure(format!("Failed to read image: {}", e)))?;
    reader
        .into_dimensions()
        .map_err(|e| ExtractionError::EngineFailure(format!("Failed to decode image: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::fakes::FakeOcr;
    use std::io::Cursor;

    fn word(text: &str, confidence: f64, block_id: i64, left: i32, top: i32) -> OcrWord {
        OcrWord {
            text: text.into(),
            confidence,
            block_id,
            left,
            top,
            width: 10,
            height: 5,
        }
    }

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbImage::new(4, 3);
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_hello_world_bye_scenario() {
        let words = vec![
            word("hello", 90.0, 0, 0, 0),
            word("world", 80.0, 0, 20, 0),
            word("bye", 70.0, 1, 0, 40),
        ];

        let units = blocks_to_units(&words);

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].text, "hello world");
        assert_eq!(units[0].confidence, 120.0);
        assert_eq!(units[1].text, "bye");
        assert_eq!(units[1].confidence, 240.0);
    }

    #[test]
    fn test_bbox_is_image_global() {
        let words = vec![
            word("a", 50.0, 0, 5, 5),
            word("b", 50.0, 1, 100, 2),
            word("c", 50.0, 2, 1, 60),
        ];

        let units = blocks_to_units(&words);
        let expected = BoundingBox { left: 1, top: 2, right: 110, bottom: 65 };

        assert_eq!(units.len(), 3);
        for unit in &units {
            match unit.locator {
                Locator::Region { bbox, .. } => assert_eq!(bbox, expected),
                ref other => panic!("unexpected locator {:?}", other),
            }
        }
    }

    #[test]
    fn test_blank_words_neither_open_nor_close_blocks() {
        let words = vec![
            word("one", 10.0, 0, 0, 0),
            word("  ", 99.0, 1, 0, 0),
            word("two", 10.0, 0, 0, 0),
            word("", -1.0, 2, 0, 0),
        ];

        let groups = group_blocks(&words);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1.len(), 2);

        // blank words still count toward the global positive sum
        let units = blocks_to_units(&words);
        assert_eq!(units[0].confidence, (10.0 + 99.0 + 10.0) / 2.0);
    }

    #[test]
    fn test_returning_block_id_starts_new_block() {
        let words = vec![
            word("a", 1.0, 0, 0, 0),
            word("b", 1.0, 1, 0, 0),
            word("c", 1.0, 0, 0, 0),
        ];
        let blocks: Vec<i64> = group_blocks(&words).iter().map(|(b, _)| *b).collect();
        assert_eq!(blocks, vec![0, 1, 0]);
    }

    #[test]
    fn test_no_words_no_units() {
        assert!(blocks_to_units(&[]).is_empty());
        assert!(union_bbox(&[]).is_none());
    }

    #[tokio::test]
    async fn test_extract_image_reports_dimensions_and_plain_text() {
        let png = tiny_png();
        let mut ocr = FakeOcr::with_texts(&[(png.as_slice(), "hello world\n")]);
        ocr.words = vec![word("hello", 90.0, 0, 0, 0), word("world", 80.0, 0, 20, 0)];
        let scratch = Scratch::new().unwrap();

        let result = extract_image(&ocr, &scratch, &png).await.unwrap();

        assert_eq!(result.plain_text, "hello world\n");
        assert_eq!(result.transcript.full_text, "hello world");
        match result.transcript.metadata {
            Some(TranscriptMetadata::Image { width, height, .. }) => {
                assert_eq!((width, height), (4, 3));
            }
            other => panic!("unexpected metadata {:?}", other),
        }
    }

    #[test]
    fn test_dimensions_read_from_header_only() {
        let mut png = tiny_png();
        // drop IEND and the tail of the pixel data
        png.truncate(png.len() - 16);

        assert_eq!(image_dimensions(&png).unwrap(), (4, 3));
    }

    #[tokio::test]
    async fn test_undecodable_image_is_engine_failure() {
        let ocr = FakeOcr::default();
        let scratch = Scratch::new().unwrap();
        let err = extract_image(&ocr, &scratch, b"not an image").await.unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert_eq!(ocr.calls(), 0);
    }
}
