use crate::error::EngineError;
use crate::types::GopResult;

/// Hidden-state and logit sequences emitted by one inference call over a
/// mono sample buffer (batch size 1): `hidden` is T×D, `logits` T×V.
#[derive(Debug, Clone)]
pub struct AcousticOutput {
    pub hidden: Vec<Vec<f32>>,
    pub logits: Vec<Vec<f32>>,
}

impl AcousticOutput {
    pub fn frames(&self) -> usize {
        self.hidden.len()
    }
}

/// Opaque acoustic model. Any invocation may fail; callers degrade to an
/// empty scoring result instead of propagating mid-session.
pub trait InferenceBackend: Send + Sync {
    fn infer(&self, samples: &[f32]) -> Result<AcousticOutput, EngineError>;

    /// `(hidden_dim, vocab_size)` advertised by the loaded model.
    fn output_dims(&self) -> Result<(usize, usize), EngineError>;

    fn device_label(&self) -> String;
}

/// Opaque byte-to-token mapping with the special tokens the scorer needs.
pub trait ScoringTokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, EngineError>;
    fn decode(&self, ids: &[u32]) -> Result<String, EngineError>;
    fn token_to_id(&self, token: &str) -> Option<u32>;
    fn id_to_token(&self, id: u32) -> Option<String>;
}

/// Goodness-of-pronunciation scoring over an audio buffer.
///
/// Both calls are infallible by contract: scoring failures surface as a
/// zero-score empty-word result so the evaluation stream stays alive.
pub trait GopScorer: Send + Sync {
    fn score_text(&self, samples: &[f32], text: &str) -> GopResult;

    fn score_with_context(
        &self,
        samples: &[f32],
        target_text: &str,
        context_before: &str,
        context_after: &str,
        target_index: Option<usize>,
    ) -> GopResult;
}
