use serde::{Deserialize, Serialize};

use crate::token::Token;

/// Knobs for one generation run. Backends should treat these as *desired*
/// settings; unsupported options must be gracefully ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionParams {
    /// Max tokens to generate.
    pub n_predict: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
    /// Wall-clock budget for the whole run; 0 disables the check.
    pub timeout_ms: u32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            n_predict: 256,
            temperature: 0.8,
            top_p: 0.95,
            top_k: 40,
            repeat_penalty: 1.1,
            timeout_ms: 0,
        }
    }
}

/// Sampling state for one generation run.
///
/// Implementations own whatever history their penalties need; `sample`
/// selects the next token from caller-supplied logits and never touches
/// the model itself.
pub trait Sampler {
    fn sample(&mut self, logits: &[f32]) -> Token;

    /// Inform the sampler that a token was committed to the stream.
    fn accept(&mut self, token: Token);
}
