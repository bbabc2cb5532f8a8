use crate::batch::DecodeBatch;
use crate::sampling::{CompletionParams, Sampler};
use crate::token::{Pos, SeqId, Token};

/// Vocabulary-level attributes reported by the model for a single token.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenAttrs {
    pub control: bool,
    pub special: bool,
}

/// Sizing knobs for a fresh model session.
#[derive(Debug, Clone, Copy)]
pub struct SessionOpts {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: u32,
}

impl Default for SessionOpts {
    fn default() -> Self {
        Self {
            n_ctx: 2048,
            n_batch: 512,
            n_threads: 4,
        }
    }
}

/// Model-level interface for inference runtimes.
///
/// One `ModelAdapter` wraps one set of loaded weights; every session
/// created from it shares those weights but owns its own attention cache.
pub trait ModelAdapter {
    type Session: ModelSession;

    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>, String>;

    /// Decode a single token ID into its raw piece bytes.
    fn detokenize_piece(&self, token: Token) -> Result<Vec<u8>, String>;

    fn vocab_size(&self) -> usize;

    fn token_attrs(&self, token: Token) -> TokenAttrs;

    /// Model's beginning-of-sequence token.
    fn is_bos(&self, token: Token) -> bool;

    /// True for any end-of-generation token.
    fn is_eog(&self, token: Token) -> bool;

    /// Allocate a fresh session (attention cache + logits slot) over the
    /// shared weights.
    fn create_session(&self, opts: &SessionOpts) -> Result<Self::Session, String>;
}

/// Per-session interface: one attention cache, one logits readout.
///
/// Range parameters follow the cache convention: a negative `start`/`end`
/// means the range is open on that side, and `seq < 0` addresses every
/// sequence.
pub trait ModelSession {
    /// Drop the entire cache, all sequences.
    fn cache_clear(&mut self);

    /// Remove cached entries for `seq` in `[start, end)`.
    fn cache_remove(&mut self, seq: SeqId, start: Pos, end: Pos);

    /// Duplicate `src`'s cached range into `dst`.
    fn cache_copy(&mut self, src: SeqId, dst: SeqId, start: Pos, end: Pos);

    /// Shift cached positions in `[start, end)` by `delta`.
    fn cache_shift(&mut self, seq: SeqId, start: Pos, end: Pos, delta: Pos);

    /// Run one forward pass over the batch. Failure means the batch did
    /// not fit (cache exhausted or runtime error); the cache contents for
    /// already-decoded positions are unspecified afterwards.
    fn decode(&mut self, batch: &DecodeBatch) -> Result<(), String>;

    /// View of the logits produced by the most recent decode that
    /// requested them. Length == vocab size.
    fn logits(&self) -> &[f32];

    /// Size in bytes of the serialized session state.
    fn state_size(&self) -> usize;

    /// Serialize cache + logits state into `buf`; returns bytes written.
    /// `buf` must be at least `state_size()` long.
    fn state_save(&self, buf: &mut [u8]) -> Result<usize, String>;

    /// Replay a blob produced by `state_save` on a session of the same
    /// model.
    fn state_load(&mut self, buf: &[u8]) -> Result<(), String>;

    /// Build a sampler for one generation run.
    fn make_sampler(&self, params: &CompletionParams) -> Box<dyn Sampler>;
}
