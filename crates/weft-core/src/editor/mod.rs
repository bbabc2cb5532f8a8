//! Token editor façade: buffer + history + sequences + cache coordination
//! over one model session.

use std::sync::Arc;

use weft_abi::{
    CompletionParams, ModelAdapter, ModelSession, Pos, Sampler, SeqId, Token, TokenFlags,
};

use crate::buffer::{TokenBuffer, TokenRange};
use crate::editlog::EditLog;
use crate::error::EditError;
use crate::seq::SequenceRegistry;

// Child modules (private to this crate). They can access private fields here.
mod edit;
mod history;
mod inspect;
mod io;
mod kv;
mod snapshot;

pub use snapshot::Snapshot;

/// Fired when a single token is overwritten: `(pos, old, new)`.
pub type TokenChangeFn = Box<dyn FnMut(Pos, Token, Token) + Send>;
/// Fired when a range of tokens changes shape or content.
pub type RangeChangeFn = Box<dyn FnMut(TokenRange) + Send>;

/// Editor = {one model session} + {token buffer} + {edit history}.
/// Every mutation of the session's logical token stream goes through here.
pub struct TokenEditor<A: ModelAdapter> {
    model: Arc<A>,
    session: A::Session,
    buffer: TokenBuffer,
    log: EditLog,
    sequences: SequenceRegistry,
    readonly: bool,

    // ========== observers ==========
    on_token_change: Option<TokenChangeFn>,
    on_range_change: Option<RangeChangeFn>,
}

impl<A: ModelAdapter> TokenEditor<A> {
    /// Wrap a fresh session of `model`. The editor owns the session for
    /// its whole life; the weights stay shared behind the `Arc`.
    pub fn new(model: Arc<A>, session: A::Session) -> Self {
        Self {
            model,
            session,
            buffer: TokenBuffer::new(),
            log: EditLog::new(),
            sequences: SequenceRegistry::new(),
            readonly: false,
            on_token_change: None,
            on_range_change: None,
        }
    }

    // ─────────────────────────────────────────────
    // State accessors
    // ─────────────────────────────────────────────

    #[inline]
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    #[inline]
    pub fn set_readonly(&mut self, readonly: bool) {
        self.readonly = readonly;
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.buffer.is_dirty()
    }

    #[inline]
    pub fn logits_valid(&self) -> bool {
        self.buffer.logits_valid()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    #[inline]
    pub fn history_len(&self) -> usize {
        self.log.history_len()
    }

    #[inline]
    pub fn redo_len(&self) -> usize {
        self.log.redo_len()
    }

    /// Bound on retained history entries (0 = unbounded).
    #[inline]
    pub fn set_history_limit(&mut self, limit: usize) {
        self.log.set_limit(limit);
    }

    /// Drop undo history and redo stack. The buffer is untouched.
    pub fn clear_history(&mut self) {
        self.log.clear();
    }

    pub fn set_on_token_change(&mut self, cb: Option<TokenChangeFn>) {
        self.on_token_change = cb;
    }

    pub fn set_on_range_change(&mut self, cb: Option<RangeChangeFn>) {
        self.on_range_change = cb;
    }

    /// True for any end-of-generation token of the underlying model.
    #[inline]
    pub fn is_eog(&self, token: Token) -> bool {
        self.model.is_eog(token)
    }

    // ─────────────────────────────────────────────
    // Vocabulary bridging
    // ─────────────────────────────────────────────

    /// Tokenize without touching the buffer.
    pub fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>, EditError> {
        self.model
            .tokenize(text, add_bos)
            .map_err(|_| EditError::BufferTooSmall)
    }

    /// Per-token piece concatenation.
    pub fn detokenize(&self, tokens: &[Token]) -> Result<String, EditError> {
        let mut bytes = Vec::new();
        for &tok in tokens {
            let piece = self
                .model
                .detokenize_piece(tok)
                .map_err(|_| EditError::InvalidToken)?;
            bytes.extend_from_slice(&piece);
        }
        String::from_utf8(bytes).map_err(|_| EditError::InvalidToken)
    }

    /// Piece text of a single token.
    pub fn token_text(&self, token: Token) -> Result<String, EditError> {
        self.detokenize(std::slice::from_ref(&token))
    }

    /// The whole buffer as text.
    pub fn text(&self) -> Result<String, EditError> {
        let tokens = self.buffer.tokens().to_vec();
        self.detokenize(&tokens)
    }

    /// Clear the buffer and load `prompt` (with BOS).
    pub fn set_prompt(&mut self, prompt: &str) -> Result<(), EditError> {
        self.clear(0)?;
        let tokens = self.tokenize(prompt, true)?;
        self.insert_tokens(0, 0, &tokens)
    }

    /// Tokenize `text` (no BOS) and append it.
    pub fn append_prompt(&mut self, text: &str) -> Result<(), EditError> {
        let tokens = self.tokenize(text, false)?;
        let at = self.buffer.len() as Pos;
        self.insert_tokens(at, 0, &tokens)
    }

    // ─────────────────────────────────────────────
    // Sequence management
    // ─────────────────────────────────────────────

    /// Allocate a new sequence id (max of the live ids, plus one).
    pub fn create_sequence(&mut self) -> SeqId {
        self.sequences.create()
    }

    /// Drop a sequence and every cache entry it owns.
    pub fn delete_sequence(&mut self, seq: SeqId) -> Result<(), EditError> {
        self.sequences.remove(seq)?;
        self.session.cache_remove(seq, -1, -1);
        Ok(())
    }

    /// Duplicate `src`'s cache entries into `dst`.
    pub fn copy_sequence(&mut self, src: SeqId, dst: SeqId) -> Result<(), EditError> {
        self.session.cache_copy(src, dst, -1, -1);
        Ok(())
    }

    /// Allocate a sequence and copy `src` into it.
    pub fn fork_sequence(&mut self, src: SeqId) -> Result<SeqId, EditError> {
        let dst = self.create_sequence();
        match self.copy_sequence(src, dst) {
            Ok(()) => Ok(dst),
            Err(e) => {
                let _ = self.sequences.remove(dst);
                Err(e)
            }
        }
    }

    #[inline]
    pub fn active_sequences(&self) -> &[SeqId] {
        self.sequences.active()
    }

    // ─────────────────────────────────────────────
    // Crate-internal plumbing for the environment
    // ─────────────────────────────────────────────

    pub(crate) fn make_sampler(&self, params: &CompletionParams) -> Box<dyn Sampler> {
        self.session.make_sampler(params)
    }

    pub(crate) fn raw_logits(&self) -> &[f32] {
        self.session.logits()
    }

    pub(crate) fn load_session_state(&mut self, blob: &[u8]) -> Result<(), String> {
        self.session.state_load(blob)
    }

    pub(crate) fn mark_coherent(&mut self, logits_valid: bool) {
        self.buffer.mark_clean(logits_valid);
    }

    /// Vocabulary-derived classification of `token`.
    pub(crate) fn token_flags(&self, token: Token) -> TokenFlags {
        let mut flags = TokenFlags::empty();
        if self.model.is_bos(token) {
            flags |= TokenFlags::BOS;
        }
        if self.model.is_eog(token) {
            flags |= TokenFlags::EOS;
        }
        let attrs = self.model.token_attrs(token);
        if attrs.control {
            flags |= TokenFlags::CONTROL;
        }
        if attrs.special {
            flags |= TokenFlags::SPECIAL;
        }
        flags
    }

    fn check_writable(&self) -> Result<(), EditError> {
        if self.readonly {
            Err(EditError::Readonly)
        } else {
            Ok(())
        }
    }
}

// NOTE: The heavy lifting lives in child modules as `impl TokenEditor<A>`:
//
// - edit.rs:     set/insert/delete/replace/clear mutators
// - history.rs:  undo/redo replay
// - inspect.rs:  reads, search, top-k, logit lookup
// - kv.rs:       cache coordination (sync, invalidate, shift)
// - snapshot.rs: create/restore snapshots
// - io.rs:       JSON/binary export + binary import
