//! Local embeddings via a BERT sentence encoder running on Candle
//!
//! The model is fetched from the HuggingFace Hub on construction. Inference
//! runs on a blocking thread so the async pipeline is never stalled.

use anyhow::Context;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::sync::Arc;
use tokenizers::Tokenizer;

use crate::errors::{Result, SearchError};
use crate::providers::Embedder;

/// Default sentence encoder
pub const DEFAULT_LOCAL_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

struct EncoderInner {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// Embedder backed by a locally executed BERT model
#[derive(Clone)]
pub struct LocalEmbedder {
    inner: Arc<EncoderInner>,
    model_id: String,
}

impl LocalEmbedder {
    /// Download (or reuse the cached) model and load it on CPU
    pub fn load(model_id: &str) -> Result<Self> {
        let inner = load_encoder(model_id).map_err(|e| {
            SearchError::Config(format!("Failed to load local embedding model {}: {:#}", model_id, e))
        })?;

        Ok(Self {
            inner: Arc::new(inner),
            model_id: model_id.to_string(),
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let inner = self.inner.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || encode(&inner, &text))
            .await
            .map_err(|e| SearchError::Embedding(format!("Embedding task failed: {}", e)))?
            .map_err(|e| SearchError::Embedding(format!("{:#}", e)))
    }
}

fn load_encoder(model_id: &str) -> anyhow::Result<EncoderInner> {
    let device = Device::Cpu;

    let api = Api::new().context("Failed to create HuggingFace API client")?;
    let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

    let config_path = repo.get("config.json").context("Failed to download model config")?;
    let tokenizer_path = repo.get("tokenizer.json").context("Failed to download tokenizer")?;
    let weights_path = repo
        .get("model.safetensors")
        .context("Failed to download model weights")?;

    let config_contents =
        std::fs::read_to_string(config_path).context("Failed to read model config")?;
    let config: Config =
        serde_json::from_str(&config_contents).context("Failed to parse model config")?;

    let tokenizer = Tokenizer::from_file(tokenizer_path)
        .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

    // SAFETY: the safetensors file is owned by the hf-hub cache and not mutated while mapped
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
            .context("Failed to load model weights")?
    };
    let model = BertModel::load(vb, &config).context("Failed to create BERT model")?;

    Ok(EncoderInner {
        model,
        tokenizer,
        device,
    })
}

fn encode(inner: &EncoderInner, text: &str) -> anyhow::Result<Vec<f32>> {
    let encoding = inner
        .tokenizer
        .encode(text, true)
        .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

    let ids = encoding.get_ids().to_vec();
    let mask = encoding.get_attention_mask().to_vec();
    let len = ids.len();

    let token_ids = Tensor::from_vec(ids, (1, len), &inner.device)?;
    let attention_mask = Tensor::from_vec(mask, (1, len), &inner.device)?;
    let token_type_ids = token_ids.zeros_like()?;

    let hidden = inner
        .model
        .forward(&token_ids, &token_type_ids, Some(&attention_mask))?;

    let pooled = mean_pool(&hidden, &attention_mask)?;
    let embedding = pooled.squeeze(0)?.to_vec1::<f32>()?;

    Ok(l2_normalize(embedding))
}

/// Mean pooling over the sequence, ignoring padding
fn mean_pool(hidden: &Tensor, attention_mask: &Tensor) -> anyhow::Result<Tensor> {
    let mask = attention_mask
        .unsqueeze(2)?
        .to_dtype(hidden.dtype())?
        .broadcast_as(hidden.shape().clone())?;

    let summed = (hidden * &mask)?.sum(1)?;
    let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;

    Ok(summed.broadcast_div(&counts)?)
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}
