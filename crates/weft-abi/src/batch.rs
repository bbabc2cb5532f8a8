// CPU-side description of one decode call. Adapters translate this into
// whatever their runtime's batch type looks like; the core never sees
// backend batch memory.

use crate::token::{Pos, SeqId, Token};

/// A batch of tokens to run through the model in one forward pass.
///
/// Positions are absolute stream positions; the logits mask selects which
/// slots the session must produce logits for (normally only the last).
#[derive(Debug, Clone, Default)]
pub struct DecodeBatch {
    tokens: Vec<Token>,
    positions: Vec<Pos>,
    seq_ids: Vec<SeqId>,
    logits: Vec<bool>,
}

impl DecodeBatch {
    pub fn with_capacity(n_tokens: usize) -> Self {
        Self {
            tokens: Vec::with_capacity(n_tokens),
            positions: Vec::with_capacity(n_tokens),
            seq_ids: Vec::with_capacity(n_tokens),
            logits: Vec::with_capacity(n_tokens),
        }
    }

    /// Append one token.
    /// - `pos` should be `n_past + index` for sequential decodes.
    /// - set `logits=true` only for slots whose logits you will read
    ///   (or call [`DecodeBatch::mark_last_for_logits`] once at the end).
    pub fn add(&mut self, token: Token, pos: Pos, seq: SeqId, logits: bool) {
        self.tokens.push(token);
        self.positions.push(pos);
        self.seq_ids.push(seq);
        self.logits.push(logits);
    }

    /// Ensure only the last slot is marked for logits.
    pub fn mark_last_for_logits(&mut self) {
        if self.logits.is_empty() {
            return;
        }
        for flag in self.logits.iter_mut() {
            *flag = false;
        }
        *self.logits.last_mut().unwrap() = true;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    #[inline]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    #[inline]
    pub fn positions(&self) -> &[Pos] {
        &self.positions
    }

    #[inline]
    pub fn seq_ids(&self) -> &[SeqId] {
        &self.seq_ids
    }

    #[inline]
    pub fn logits_mask(&self) -> &[bool] {
        &self.logits
    }
}
