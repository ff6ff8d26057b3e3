use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;

use crate::error::{Error, Result};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "CODESIFT_MODEL";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
pub(crate) fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Resolve the model id from an explicit choice, then `CODESIFT_MODEL`,
/// then `fallback`.
pub fn resolve_model_id(explicit: Option<&str>, fallback: &str) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var(MODEL_ENV_VAR).ok())
        .unwrap_or_else(|| fallback.to_string())
}

/// A model that embeds text into one vector per input, with distinct
/// encodings for stored documents and for queries.
pub trait TextEncoder: Send {
    fn model_id(&self) -> &str;

    /// Make sure the model is usable, loading it if needed.
    fn warm_up(&mut self) -> Result<()>;

    fn encode_document(&mut self, text: &str) -> Result<Vec<f32>>;

    fn encode_query(&mut self, text: &str) -> Result<Vec<f32>>;
}

/// Manages the ColBERT model lifecycle, supporting lazy loading on first use.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl ModelManager {
    pub fn with_model_id(model_id: impl Into<String>) -> Self {
        Self {
            model: None,
            model_id: model_id.into(),
        }
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        if self.model.is_none() {
            let device = default_device();
            tracing::info!(model = %self.model_id, ?device, "loading ColBERT model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(device)
                .try_into()
                .map_err(|e| {
                    Error::Model(format!(
                        "failed to load {}: {e}",
                        self.model_id
                    ))
                })?;
            self.model = Some(colbert);
        }

        self.model
            .as_mut()
            .ok_or_else(|| Error::Model("model failed to load".to_string()))
    }

    fn encode_pooled(&mut self, text: &str, is_query: bool) -> Result<Vec<f32>> {
        let model = self.ensure_loaded()?;
        let tokens = model
            .encode(&[text.to_string()], is_query)
            .map_err(|e| Error::Model(format!("encoding failed: {e}")))?;
        pool(&tokens)
    }
}

/// Mean-pool `[1, T, D]` token embeddings into one normalised `D` vector.
fn pool(tokens: &Tensor) -> Result<Vec<f32>> {
    let pooled = tokens.mean(1)?;
    let norm = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
    let normalized = pooled.broadcast_div(&norm)?.squeeze(0)?;
    Ok(normalized.to_vec1::<f32>()?)
}

impl TextEncoder for ModelManager {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn warm_up(&mut self) -> Result<()> {
        self.ensure_loaded().map(|_| ())
    }

    fn encode_document(&mut self, text: &str) -> Result<Vec<f32>> {
        self.encode_pooled(text, false)
    }

    fn encode_query(&mut self, text: &str) -> Result<Vec<f32>> {
        self.encode_pooled(text, true)
    }
}
