// Cache coordination. Contract: the attention cache is coherent with the
// buffer iff the dirty flag is clear. Coherence is re-established lazily,
// on the first read that needs logits.

use weft_abi::{DecodeBatch, ModelAdapter, ModelSession, Pos, SeqId};

use super::TokenEditor;
use crate::buffer::TokenRange;
use crate::error::EditError;

impl<A: ModelAdapter> TokenEditor<A> {
    /// Rebuild the session cache from the buffer. Idempotent when clean:
    /// clears the cache and decodes the whole stream in one batch with
    /// logits requested only for the final position. On decode failure the
    /// editor stays consistent but dirty.
    pub fn sync_kv_cache(&mut self) -> Result<(), EditError> {
        if !self.buffer.is_dirty() {
            return Ok(());
        }
        self.session.cache_clear();

        if self.buffer.is_empty() {
            self.buffer.mark_clean(false);
            return Ok(());
        }

        let mut batch = DecodeBatch::with_capacity(self.buffer.len());
        for (i, &tok) in self.buffer.tokens().iter().enumerate() {
            batch.add(tok, i as Pos, 0, false);
        }
        batch.mark_last_for_logits();
        self.session
            .decode(&batch)
            .map_err(EditError::KvCacheFull)?;
        self.buffer.mark_clean(true);
        Ok(())
    }

    /// Decode only the final token (driver fast path after an append),
    /// leaving the buffer coherent.
    pub(crate) fn decode_last(&mut self) -> Result<(), EditError> {
        let len = self.buffer.len();
        if len == 0 {
            return Ok(());
        }
        let tok = self.buffer.tokens()[len - 1];
        let mut batch = DecodeBatch::with_capacity(1);
        batch.add(tok, (len - 1) as Pos, 0, true);
        self.session
            .decode(&batch)
            .map_err(EditError::KvCacheFull)?;
        self.buffer.mark_clean(true);
        Ok(())
    }

    /// Drop cache entries for `range` and mark the buffer dirty.
    pub fn invalidate_kv_range(&mut self, range: TokenRange) {
        self.session
            .cache_remove(range.seq_id, range.start, range.end);
        self.buffer.mark_dirty();
    }

    /// Wholesale cache clear; `seq_id < 0` clears every sequence.
    pub fn clear_kv_cache(&mut self, seq_id: SeqId) {
        if seq_id < 0 {
            self.session.cache_clear();
        } else {
            self.session.cache_remove(seq_id, -1, -1);
        }
        self.buffer.mark_dirty();
    }

    /// Shift cached positions for a sliding window. Delegation only; the
    /// buffer itself is not rewritten.
    pub fn shift_kv_cache(&mut self, seq_id: SeqId, delta: Pos) {
        self.session.cache_shift(seq_id, 0, -1, delta);
    }

    /// Explicit coherence point: make sure logits for the final position
    /// are valid.
    pub fn compute_logits(&mut self) -> Result<(), EditError> {
        if self.buffer.is_dirty() {
            self.sync_kv_cache()?;
        }
        Ok(())
    }
}
