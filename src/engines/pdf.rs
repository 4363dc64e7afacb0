//! # PDF Document Engine (lopdf)
//!
//! Reads the native text layer page by page, collects raster images placed on
//! each page, and reads document properties from the trailer `/Info` dictionary.
//!
//! ## Image Handling:
//! - `DCTDecode` streams are already JPEG files and are passed through as-is
//! - 8-bit `DeviceRGB` / `DeviceGray` samples (raw or Flate) are re-encoded as PNG
//! - anything else (CCITT, JBIG2, indexed colour, 1-bit masks) is skipped
//!
//! lopdf is synchronous, so all parsing happens on the blocking pool.

use super::{DocumentEngine, EngineError, PageContent};
use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;
use std::io::Cursor;
use tracing::debug;

/// Depth limit when walking `/Parent` links looking for inherited resources.
const MAX_PARENT_DEPTH: usize = 32;

#[derive(Debug, Default, Clone)]
pub struct LopdfEngine;

impl LopdfEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentEngine for LopdfEngine {
    async fn pages(&self, document: &[u8]) -> Result<Vec<PageContent>, EngineError> {
        let bytes = document.to_vec();
        tokio::task::spawn_blocking(move || {
            let doc = load(&bytes)?;
            Ok(read_pages(&doc))
        })
        .await
        .map_err(|e| EngineError::Document(format!("PDF worker panicked: {}", e)))?
    }

    async fn metadata(&self, document: &[u8]) -> Result<BTreeMap<String, String>, EngineError> {
        let bytes = document.to_vec();
        tokio::task::spawn_blocking(move || {
            let doc = load(&bytes)?;
            Ok(read_info(&doc))
        })
        .await
        .map_err(|e| EngineError::Document(format!("PDF worker panicked: {}", e)))?
    }
}

fn load(bytes: &[u8]) -> Result<Document, EngineError> {
    Document::load_mem(bytes).map_err(|e| EngineError::Document(format!("Failed to load PDF: {}", e)))
}

fn read_pages(doc: &Document) -> Vec<PageContent> {
    // BTreeMap keeps page numbers sorted
    doc.get_pages()
        .into_iter()
        .map(|(number, page_id)| {
            let text = match doc.extract_text(&[number]) {
                Ok(text) => text,
                Err(e) => {
                    debug!(page = number, "No usable text layer: {}", e);
                    String::new()
                }
            };
            PageContent {
                number,
                text,
                images: page_images(doc, page_id),
            }
        })
        .collect()
}

/// Follow a reference, or return the object itself.
fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, object)? {
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

/// The `/XObject` dictionary that applies to a page, inherited through `/Parent` if needed.
fn page_xobjects(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_object(page_id).ok()?;
    for _ in 0..MAX_PARENT_DEPTH {
        let dict = match node {
            Object::Dictionary(dict) => dict,
            _ => return None,
        };
        let xobjects = dict
            .get(b"Resources")
            .ok()
            .and_then(|res| resolve_dict(doc, res))
            .and_then(|res| res.get(b"XObject").ok())
            .and_then(|x| resolve_dict(doc, x));
        if xobjects.is_some() {
            return xobjects;
        }
        node = resolve(doc, dict.get(b"Parent").ok()?)?;
    }
    None
}

fn page_images(doc: &Document, page_id: ObjectId) -> Vec<Vec<u8>> {
    let Some(xobjects) = page_xobjects(doc, page_id) else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(name, object)| {
            let stream = match resolve(doc, object)? {
                Object::Stream(stream) => stream,
                _ => return None,
            };
            if name_of(stream.dict.get(b"Subtype").ok()) != Some(b"Image".as_slice()) {
                return None;
            }
            let encoded = encode_image(doc, stream);
            if encoded.is_none() {
                debug!(xobject = %String::from_utf8_lossy(name), "Skipping unsupported image encoding");
            }
            encoded
        })
        .collect()
}

fn name_of(object: Option<&Object>) -> Option<&[u8]> {
    match object? {
        Object::Name(name) => Some(name.as_slice()),
        _ => None,
    }
}

fn integer_of(object: Option<&Object>) -> Option<i64> {
    match object? {
        Object::Integer(n) => Some(*n),
        _ => None,
    }
}

fn filters(stream: &Stream) -> Vec<Vec<u8>> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Object::Name(name) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn encode_image(doc: &Document, stream: &Stream) -> Option<Vec<u8>> {
    let filters = filters(stream);

    if filters.last().map(Vec::as_slice) == Some(b"DCTDecode".as_slice()) {
        if filters.len() == 1 {
            return Some(stream.content.clone());
        }
        return None;
    }

    let samples = match filters.as_slice() {
        [] => stream.content.clone(),
        [only] if only.as_slice() == b"FlateDecode" => stream.decompressed_content().ok()?,
        _ => return None,
    };

    let width = u32::try_from(integer_of(stream.dict.get(b"Width").ok())?).ok()?;
    let height = u32::try_from(integer_of(stream.dict.get(b"Height").ok())?).ok()?;
    if integer_of(stream.dict.get(b"BitsPerComponent").ok()) != Some(8) {
        return None;
    }

    let color_space = stream
        .dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|cs| resolve(doc, cs));
    let decoded = match name_of(color_space) {
        Some(b"DeviceRGB") => {
            let needed = (width as usize) * (height as usize) * 3;
            let data = samples.get(..needed)?.to_vec();
            image::DynamicImage::ImageRgb8(image::RgbImage::from_raw(width, height, data)?)
        }
        Some(b"DeviceGray") => {
            let needed = (width as usize) * (height as usize);
            let data = samples.get(..needed)?.to_vec();
            image::DynamicImage::ImageLuma8(image::GrayImage::from_raw(width, height, data)?)
        }
        _ => return None,
    };

    let mut png = Cursor::new(Vec::new());
    decoded.write_to(&mut png, image::ImageFormat::Png).ok()?;
    Some(png.into_inner())
}

/// Every string-valued entry of the trailer `/Info` dictionary.
fn read_info(doc: &Document) -> BTreeMap<String, String> {
    let Some(info) = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|info| resolve_dict(doc, info))
    else {
        return BTreeMap::new();
    };

    info.iter()
        .filter_map(|(key, value)| {
            let bytes = match resolve(doc, value)? {
                Object::String(bytes, _) => bytes,
                _ => return None,
            };
            let value = decode_pdf_string(bytes);
            if value.is_empty() {
                return None;
            }
            Some((String::from_utf8_lossy(key).to_ascii_lowercase(), value))
        })
        .collect()
}

/// Decode a PDF text string: UTF-16BE with BOM, UTF-8, or PDFDocEncoding
/// (approximated as Latin-1).
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    let decoded = if bytes.starts_with(&[0xFE, 0xFF]) {
        let body = &bytes[2..];
        let units: Vec<u16> = body.chunks_exact(2).map(BigEndian::read_u16).collect();
        String::from_utf16_lossy(&units)
    } else if let Ok(text) = std::str::from_utf8(bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes)) {
        text.to_string()
    } else {
        bytes.iter().map(|&b| b as char).collect()
    };

    decoded.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string()
}
