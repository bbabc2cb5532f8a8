//! Growable token buffer with per-token metadata.
//!
//! The buffer is the single logical stream behind one editor. Capacity is
//! a power of two grown by doubling from a fixed floor; contents in
//! `[0, len)` are defined. The dirty flag records that the session cache
//! no longer matches the stream; `logits_valid` that a decode with logits
//! on the final position has completed and nothing mutated since.

use weft_abi::{Pos, SeqId, Token, TokenFlags, TokenInfo};

use crate::error::EditError;

/// Capacity floor; growth doubles from here.
pub const INITIAL_CAPACITY: usize = 4096;

/// Half-open token range `[start, end)`. `seq_id = -1` addresses all
/// sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRange {
    pub start: Pos,
    pub end: Pos,
    pub seq_id: SeqId,
}

impl TokenRange {
    #[inline]
    pub fn new(start: Pos, end: Pos) -> Self {
        Self {
            start,
            end,
            seq_id: -1,
        }
    }

    #[inline]
    pub fn with_seq(start: Pos, end: Pos, seq_id: SeqId) -> Self {
        Self { start, end, seq_id }
    }

    #[inline]
    pub fn len(&self) -> usize {
        (self.end - self.start).max(0) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Token sequence + parallel metadata array.
#[derive(Debug)]
pub struct TokenBuffer {
    tokens: Vec<Token>,
    info: Vec<TokenInfo>,
    capacity: usize,
    dirty: bool,
    logits_valid: bool,
}

impl Default for TokenBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenBuffer {
    pub fn new() -> Self {
        Self {
            tokens: Vec::with_capacity(INITIAL_CAPACITY),
            info: Vec::with_capacity(INITIAL_CAPACITY),
            capacity: INITIAL_CAPACITY,
            dirty: false,
            logits_valid: false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Logical capacity (power of two, ≥ the initial floor).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn logits_valid(&self) -> bool {
        self.logits_valid
    }

    /// A mutation happened: the cache is stale and any logits are garbage.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.logits_valid = false;
    }

    /// The cache was just rebuilt. `logits` records whether the decode
    /// requested logits for the final position.
    #[inline]
    pub fn mark_clean(&mut self, logits: bool) {
        self.dirty = false;
        self.logits_valid = logits;
    }

    #[inline]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    #[inline]
    pub fn info(&self) -> &[TokenInfo] {
        &self.info
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<Token> {
        self.tokens.get(idx).copied()
    }

    /// Grow to the next power-of-two capacity that fits `required`.
    /// Capacity grown before a later failure stays grown.
    pub fn ensure_capacity(&mut self, required: usize) -> Result<(), EditError> {
        if required <= self.capacity {
            return Ok(());
        }
        let mut cap = self.capacity * 2;
        while cap < required {
            cap *= 2;
        }
        self.tokens
            .try_reserve_exact(cap - self.tokens.len())
            .map_err(|_| EditError::AllocationFailed)?;
        self.info
            .try_reserve_exact(cap - self.info.len())
            .map_err(|_| EditError::AllocationFailed)?;
        self.capacity = cap;
        Ok(())
    }

    /// Splice `tokens`/`info` in at `idx` (bounds already checked by the
    /// caller) and renumber positions from `idx` on.
    pub fn insert_at(
        &mut self,
        idx: usize,
        tokens: &[Token],
        info: &[TokenInfo],
    ) -> Result<(), EditError> {
        debug_assert_eq!(tokens.len(), info.len());
        self.ensure_capacity(self.tokens.len() + tokens.len())?;
        self.tokens.splice(idx..idx, tokens.iter().copied());
        self.info.splice(idx..idx, info.iter().copied());
        self.renumber_from(idx);
        Ok(())
    }

    /// Remove `[start, end)` and return the removed tokens.
    pub fn remove_range(&mut self, start: usize, end: usize) -> Vec<Token> {
        let removed: Vec<Token> = self.tokens.drain(start..end).collect();
        self.info.drain(start..end);
        self.renumber_from(start);
        removed
    }

    /// Replace `[start, end)` with `tokens`, returning the prior contents.
    pub fn replace_range(
        &mut self,
        start: usize,
        end: usize,
        tokens: &[Token],
        info: &[TokenInfo],
    ) -> Result<Vec<Token>, EditError> {
        debug_assert_eq!(tokens.len(), info.len());
        self.ensure_capacity(self.tokens.len() - (end - start) + tokens.len())?;
        let old: Vec<Token> = self
            .tokens
            .splice(start..end, tokens.iter().copied())
            .collect();
        self.info.splice(start..end, info.iter().copied());
        self.renumber_from(start);
        Ok(old)
    }

    /// Overwrite one slot in place.
    pub fn set(&mut self, idx: usize, token: Token, flags: TokenFlags) {
        self.tokens[idx] = token;
        let info = &mut self.info[idx];
        info.id = token;
        info.flags = flags;
        info.has_logit = false;
    }

    /// Replace the whole stream (snapshot restore, binary import).
    pub fn overwrite_all(
        &mut self,
        tokens: &[Token],
        info: &[TokenInfo],
    ) -> Result<(), EditError> {
        debug_assert_eq!(tokens.len(), info.len());
        self.ensure_capacity(tokens.len())?;
        self.tokens.clear();
        self.tokens.extend_from_slice(tokens);
        self.info.clear();
        self.info.extend_from_slice(info);
        Ok(())
    }

    fn renumber_from(&mut self, idx: usize) {
        for (i, inf) in self.info.iter_mut().enumerate().skip(idx) {
            inf.pos = i as Pos;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_for(tokens: &[Token]) -> Vec<TokenInfo> {
        tokens
            .iter()
            .map(|&t| TokenInfo::new(t, 0, 0, TokenFlags::empty()))
            .collect()
    }

    #[test]
    fn starts_at_the_floor() {
        let buf = TokenBuffer::new();
        assert_eq!(buf.capacity(), INITIAL_CAPACITY);
        assert_eq!(buf.len(), 0);
        assert!(!buf.is_dirty());
        assert!(!buf.logits_valid());
    }

    #[test]
    fn capacity_doubles_to_fit() {
        let mut buf = TokenBuffer::new();
        let tokens: Vec<Token> = (0..5000).map(Token).collect();
        buf.insert_at(0, &tokens, &info_for(&tokens)).unwrap();
        assert_eq!(buf.capacity(), 8192);
        assert!(buf.capacity() >= buf.len());
        assert!(buf.capacity() < 2 * buf.len());

        let more: Vec<Token> = (0..4000).map(Token).collect();
        buf.insert_at(0, &more, &info_for(&more)).unwrap();
        assert_eq!(buf.capacity(), 16384);
    }

    #[test]
    fn insert_then_remove_restores_contents() {
        let mut buf = TokenBuffer::new();
        let base: Vec<Token> = vec![Token(10), Token(20), Token(30)];
        buf.insert_at(0, &base, &info_for(&base)).unwrap();

        let mid = vec![Token(99), Token(98)];
        buf.insert_at(1, &mid, &info_for(&mid)).unwrap();
        assert_eq!(
            buf.tokens(),
            &[Token(10), Token(99), Token(98), Token(20), Token(30)]
        );

        let removed = buf.remove_range(1, 3);
        assert_eq!(removed, mid);
        assert_eq!(buf.tokens(), &base[..]);
        for (i, inf) in buf.info().iter().enumerate() {
            assert_eq!(inf.pos, i as i32);
            assert_eq!(inf.id, buf.tokens()[i]);
        }
    }

    #[test]
    fn replace_returns_prior_contents() {
        let mut buf = TokenBuffer::new();
        let base: Vec<Token> = vec![Token(1), Token(2), Token(3)];
        buf.insert_at(0, &base, &info_for(&base)).unwrap();

        let new = vec![Token(7)];
        let old = buf.replace_range(1, 3, &new, &info_for(&new)).unwrap();
        assert_eq!(old, vec![Token(2), Token(3)]);
        assert_eq!(buf.tokens(), &[Token(1), Token(7)]);
        assert_eq!(buf.info()[1].pos, 1);
    }
}
