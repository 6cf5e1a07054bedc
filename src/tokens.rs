//! BPE token counting for usage reconciliation.

use std::sync::Arc;

use dashmap::DashMap;
use tiktoken_rs::CoreBPE;

use crate::relay::TokenCounter;

/// Counts tokens with the tokenizer each model was trained with.
///
/// Tokenizers are built once per model name and cached. Models tiktoken does
/// not know fall back to `cl100k_base`.
pub struct TiktokenCounter {
    encoders: DashMap<String, Arc<CoreBPE>>,
    fallback: Arc<CoreBPE>,
}

impl TiktokenCounter {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            encoders: DashMap::new(),
            fallback: Arc::new(tiktoken_rs::cl100k_base()?),
        })
    }

    fn encoder(&self, model: &str) -> Arc<CoreBPE> {
        if let Some(bpe) = self.encoders.get(model) {
            return bpe.value().clone();
        }

        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => Arc::new(bpe),
            Err(e) => {
                tracing::debug!(model = %model, error = %e, "Unknown model, counting with cl100k_base");
                self.fallback.clone()
            }
        };
        // Built outside the entry lock; the first insert for a model wins.
        self.encoders
            .entry(model.to_string())
            .or_insert(bpe)
            .value()
            .clone()
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, text: &str, model: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        let tokens = self.encoder(model).encode_with_special_tokens(text).len();
        u32::try_from(tokens).unwrap_or(u32::MAX)
    }
}

impl std::fmt::Debug for TiktokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenCounter")
            .field("cached_models", &self.encoders.len())
            .finish_non_exhaustive()
    }
}
