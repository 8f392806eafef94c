//! Local sentence-transformers encoder using candle.

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{GraderError, Result};
use anyhow::Context;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};
use tracing::info;

/// Mean-pooled, L2-normalized BERT sentence encoder.
///
/// Loaded once per process and shared read-only; inference takes `&self`.
pub struct SbertModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl SbertModel {
    /// Load the model named in `config` from the Hugging Face Hub.
    ///
    /// Any failure here means no grading can happen, so it is reported as
    /// [`GraderError::ModelUnavailable`].
    pub fn load(config: &EmbeddingConfig) -> Result<Self> {
        Self::try_load(config).map_err(|e| GraderError::ModelUnavailable(format!("{:#}", e)))
    }

    fn try_load(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let device = Device::cuda_if_available(0).context("Failed to select device")?;

        let api = Api::new().context("Failed to create HF Hub API")?;
        let repo = api.repo(Repo::new(config.model_id.clone(), RepoType::Model));

        // Download model files
        let config_path = repo
            .get("config.json")
            .context("Failed to get config.json")?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .context("Failed to get tokenizer.json")?;
        let weights_path = repo
            .get("model.safetensors")
            .context("Failed to get model weights")?;

        let bert_config: BertConfig =
            serde_json::from_str(&std::fs::read_to_string(&config_path)?)
                .context("Failed to parse config")?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_seq_len,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {}", e))?;
        tokenizer.with_padding(Some(PaddingParams::default()));

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .context("Failed to load model weights")?
        };

        let model = BertModel::load(vb, &bert_config).context("Failed to load BERT model")?;

        info!(model_id = %config.model_id, ?device, "Loaded sentence encoder");

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Padding is configured on the tokenizer, so every encoding has the
        // batch's longest length.
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let batch_size = encodings.len();
        let seq_len = encodings.first().map(|e| e.len()).unwrap_or(0);

        let mut input_ids = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask = Vec::with_capacity(batch_size * seq_len);
        for encoding in &encodings {
            input_ids.extend_from_slice(encoding.get_ids());
            attention_mask.extend_from_slice(encoding.get_attention_mask());
        }

        let input_ids = Tensor::from_vec(input_ids, (batch_size, seq_len), &self.device)?;
        let attention_mask =
            Tensor::from_vec(attention_mask, (batch_size, seq_len), &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Mean pooling over unmasked tokens; the denominator is floored so an
        // all-padding row cannot divide by zero.
        let mask = attention_mask
            .unsqueeze(2)?
            .to_dtype(output.dtype())?
            .broadcast_as(output.shape())?;
        let summed = (output * &mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
        let pooled = (summed / counts)?;

        let norms = pooled.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12, f64::MAX)?;
        let normalized = pooled.broadcast_div(&norms)?;

        Ok(normalized.to_vec2::<f32>()?)
    }
}

impl Embedder for SbertModel {
    fn embed(&self, sentences: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(sentences)
            .map_err(|e| GraderError::Embedding(format!("{:#}", e)))
    }
}
