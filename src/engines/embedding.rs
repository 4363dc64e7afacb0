//! # Sentence Embeddings
//!
//! BERT-family sentence encoder (default
//! `sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2`) loaded
//! from the HuggingFace Hub and run with Candle.
//!
//! Vectors are mean-pooled over the attention mask and returned as-is,
//! without normalization, so they match what sentence-transformers emits for
//! this model.

use super::{hub, Embedder, EmbeddingError};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use std::sync::Arc;
use tokenizers::Tokenizer;

pub const DEFAULT_MODEL: &str = "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2";

struct EncoderParts {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

pub struct CandleEmbedder {
    parts: Arc<EncoderParts>,
}

impl CandleEmbedder {
    pub async fn load(model_id: &str, device: Device) -> Result<Self, EmbeddingError> {
        tracing::info!(model = model_id, device = ?device, "Loading embedding model");

        let api = hub::api().map_err(|e| load_err("hub", &e))?;
        let config_path = hub::fetch(&api, model_id, "config.json")
            .await
            .map_err(|e| load_err("config.json", &e))?;
        let tokenizer_path = hub::fetch(&api, model_id, "tokenizer.json")
            .await
            .map_err(|e| load_err("tokenizer.json", &e))?;
        let weights_path = hub::fetch(&api, model_id, "model.safetensors")
            .await
            .map_err(|e| load_err("model.safetensors", &e))?;

        let config_contents = std::fs::read_to_string(&config_path).map_err(|e| load_err("read config", &e))?;
        let config: BertConfig = serde_json::from_str(&config_contents).map_err(|e| load_err("parse config", &e))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| load_err("tokenizer", &e))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: config.max_position_embeddings,
                ..Default::default()
            }))
            .map_err(|e| load_err("truncation config", &e))?;

        // SAFETY: safetensors files are memory-mapped read-only
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
                .map_err(|e| load_err("weights", &e))?
        };
        let model = BertModel::load(vb, &config).map_err(|e| load_err("model", &e))?;

        tracing::info!(model = model_id, "Embedding model loaded");

        Ok(Self {
            parts: Arc::new(EncoderParts {
                model,
                tokenizer,
                device,
            }),
        })
    }
}

fn load_err(what: &str, e: &dyn std::fmt::Display) -> EmbeddingError {
    EmbeddingError::ModelLoad(format!("{}: {}", what, e))
}

fn inference(e: impl std::fmt::Display) -> EmbeddingError {
    EmbeddingError::Inference(e.to_string())
}

/// Right-pad every row with zeros to the longest row; returns the flat
/// buffer and the padded width.
fn pad_rows(rows: &[&[u32]]) -> (Vec<u32>, usize) {
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let mut flat = Vec::with_capacity(rows.len() * width);
    for row in rows {
        flat.extend_from_slice(row);
        flat.extend(std::iter::repeat(0u32).take(width - row.len()));
    }
    (flat, width)
}

impl EncoderParts {
    fn encode(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let batch = inputs.len();
        let encodings = self.tokenizer.encode_batch(inputs, true).map_err(inference)?;

        let ids: Vec<&[u32]> = encodings.iter().map(|e| e.get_ids()).collect();
        let type_ids: Vec<&[u32]> = encodings.iter().map(|e| e.get_type_ids()).collect();
        let mask: Vec<&[u32]> = encodings.iter().map(|e| e.get_attention_mask()).collect();

        let (ids, width) = pad_rows(&ids);
        let (type_ids, _) = pad_rows(&type_ids);
        let (mask, _) = pad_rows(&mask);

        let input_ids = Tensor::from_vec(ids, (batch, width), &self.device).map_err(inference)?;
        let token_type_ids = Tensor::from_vec(type_ids, (batch, width), &self.device).map_err(inference)?;
        let attention_mask = Tensor::from_vec(mask, (batch, width), &self.device).map_err(inference)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .and_then(|t| t.to_dtype(DType::F32))
            .map_err(inference)?;

        // Mean pooling over real tokens only
        let mask = attention_mask.to_dtype(DType::F32).map_err(inference)?;
        let summed = hidden
            .broadcast_mul(&mask.unsqueeze(2).map_err(inference)?)
            .and_then(|t| t.sum(1))
            .map_err(inference)?;
        let counts = mask.sum(1).and_then(|t| t.unsqueeze(1)).map_err(inference)?;
        let pooled = summed.broadcast_div(&counts).map_err(inference)?;

        pooled.to_vec2::<f32>().map_err(inference)
    }
}

#[async_trait]
impl Embedder for CandleEmbedder {
    async fn encode(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let parts = Arc::clone(&self.parts);
        let inputs = inputs.to_vec();
        tokio::task::spawn_blocking(move || parts.encode(inputs))
            .await
            .map_err(|e| EmbeddingError::Inference(format!("embedding worker panicked: {}", e)))?
    }
}
