//! Embedding capability used by the flat index and the token-budget
//! chunker.

use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::{Encoding, Tokenizer};

use crate::{
    error::{Error, Result},
    model_manager::default_device,
};

/// Default model for the flat backend.
pub const DEFAULT_EMBEDDING_MODEL: &str =
    "sentence-transformers/all-MiniLM-L6-v2";

/// Longest input, in tokens, fed to the model. Longer inputs are cut.
pub const MAX_INPUT_TOKENS: usize = 512;

/// Counts tokens the way an embedding model would see them.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens the model sees for `text`, special tokens such as
    /// `[CLS]` and `[SEP]` included.
    fn token_count(&self, text: &str) -> Result<usize>;
}

/// Turns text into a fixed-length vector.
///
/// Implementations must be deterministic for a given model, and safe to
/// call from several threads at once.
pub trait Embedder: TokenCounter {
    fn model_name(&self) -> &str;

    /// Embed `text`. Every call on the same embedder returns vectors of
    /// the same length.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

fn fetch(repo_id: &str, file: &str) -> Result<PathBuf> {
    let api = hf_hub::api::sync::Api::new().map_err(|e| {
        Error::Model(format!("failed to create Hugging Face API client: {e}"))
    })?;
    api.model(repo_id.to_string()).get(file).map_err(|e| {
        Error::Model(format!("failed to download {file} from {repo_id}: {e}"))
    })
}

fn load_tokenizer(repo_id: &str) -> Result<Tokenizer> {
    let path = fetch(repo_id, "tokenizer.json")?;
    Tokenizer::from_file(&path)
        .map_err(|e| Error::Model(format!("failed to load tokenizer: {e}")))
}

fn count_tokens(tokenizer: &Tokenizer, text: &str) -> Result<usize> {
    let encoding = tokenizer
        .encode(text, true)
        .map_err(|e| Error::Model(format!("tokenizer encode failed: {e}")))?;
    Ok(encoding.len())
}

/// Ids fed to the model: at most `max_len`, keeping a closing special
/// token such as `[SEP]` when the input is cut.
fn model_input_ids(encoding: &Encoding, max_len: usize) -> Vec<u32> {
    let ids = encoding.get_ids();
    if ids.len() <= max_len {
        return ids.to_vec();
    }

    let closes_with_special =
        encoding.get_special_tokens_mask().last() == Some(&1);
    if closes_with_special {
        let mut kept = ids[..max_len.saturating_sub(1)].to_vec();
        kept.push(ids[ids.len() - 1]);
        kept
    } else {
        ids[..max_len].to_vec()
    }
}

/// A tokenizer fetched from the Hugging Face hub, used on its own when
/// the embedding happens elsewhere.
pub struct HubTokenizer {
    tokenizer: Tokenizer,
}

impl HubTokenizer {
    /// # Errors
    ///
    /// Returns [`Error::Model`] if `tokenizer.json` cannot be fetched or
    /// parsed.
    pub fn from_pretrained(repo_id: &str) -> Result<Self> {
        Ok(Self {
            tokenizer: load_tokenizer(repo_id)?,
        })
    }
}

impl TokenCounter for HubTokenizer {
    fn token_count(&self, text: &str) -> Result<usize> {
        count_tokens(&self.tokenizer, text)
    }
}

/// Sentence embeddings from a BERT checkpoint: mean pooling over the
/// last hidden state, then L2 normalisation.
pub struct BertEmbedder {
    model_name: String,
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl std::fmt::Debug for BertEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BertEmbedder")
            .field("model_name", &self.model_name)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl BertEmbedder {
    /// Download (or reuse from the hub cache) and load `repo_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] if any model file is missing or invalid.
    pub fn load(repo_id: &str) -> Result<Self> {
        let device = default_device();
        tracing::info!(model = repo_id, ?device, "loading embedding model");

        let config_path = fetch(repo_id, "config.json")?;
        let weights_path = fetch(repo_id, "model.safetensors")?;
        let tokenizer = load_tokenizer(repo_id)?;

        let config: BertConfig =
            serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;

        // SAFETY: the safetensors file comes from the hub cache and is not
        // modified while the model is alive.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(
                &[weights_path],
                DType::F32,
                &device,
            )?
        };
        let model = BertModel::load(vb, &config)
            .map_err(|e| Error::Model(format!("failed to load BERT: {e}")))?;

        Ok(Self {
            model_name: repo_id.to_string(),
            model,
            tokenizer,
            device,
        })
    }
}

impl TokenCounter for BertEmbedder {
    fn token_count(&self, text: &str) -> Result<usize> {
        count_tokens(&self.tokenizer, text)
    }
}

impl Embedder for BertEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| Error::Model(format!("tokenizer encode failed: {e}")))?;

        let ids = model_input_ids(&encoding, MAX_INPUT_TOKENS);
        let type_ids = vec![0u32; ids.len()];

        let input_ids = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let token_type_ids =
            Tensor::new(type_ids.as_slice(), &self.device)?.unsqueeze(0)?;

        let hidden = self.model.forward(&input_ids, &token_type_ids, None)?;

        // [1, T, D] -> [1, D]
        let seq_len = hidden.dim(1)?;
        let pooled = (hidden.sum(1)? / seq_len as f64)?;
        let norm = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
        let normalized = pooled.broadcast_div(&norm)?.squeeze(0)?;

        Ok(normalized.to_vec1::<f32>()?)
    }
}
