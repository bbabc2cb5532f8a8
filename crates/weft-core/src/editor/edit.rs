// Mutators. Each successful call records exactly one edit op (unless the
// log is suppressed for replay), marks the buffer dirty, and fires the
// matching observer.

use weft_abi::{ModelAdapter, Pos, SeqId, Token, TokenFlags, TokenInfo};

use super::TokenEditor;
use crate::buffer::TokenRange;
use crate::editlog::EditOp;
use crate::error::EditError;

impl<A: ModelAdapter> TokenEditor<A> {
    /// Overwrite the token at `pos`.
    pub fn set_token(&mut self, pos: Pos, seq_id: SeqId, token: Token) -> Result<(), EditError> {
        self.check_writable()?;
        let len = self.buffer.len();
        if pos < 0 || pos as usize >= len {
            return Err(EditError::InvalidPosition { pos, len });
        }
        let idx = pos as usize;
        let old = self.buffer.tokens()[idx];

        let range = TokenRange::with_seq(pos, pos + 1, seq_id);
        self.log.record(EditOp::Replace {
            range,
            old: vec![old],
            new: vec![token],
        });

        let flags = self.token_flags(token);
        self.buffer.set(idx, token, flags);
        self.buffer.mark_dirty();

        if let Some(cb) = self.on_token_change.as_mut() {
            cb(pos, old, token);
        }
        Ok(())
    }

    /// Insert `tokens` at `pos ∈ [0, len]`. Empty payload is a no-op.
    pub fn insert_tokens(
        &mut self,
        pos: Pos,
        seq_id: SeqId,
        tokens: &[Token],
    ) -> Result<(), EditError> {
        self.check_writable()?;
        let len = self.buffer.len();
        if pos < 0 || pos as usize > len {
            return Err(EditError::InvalidPosition { pos, len });
        }
        if tokens.is_empty() {
            return Ok(());
        }
        self.insert_with_origin(pos, seq_id, tokens, TokenFlags::USER_DATA)
    }

    /// Driver-side append: insert at the end, stamped GENERATED instead of
    /// USER_DATA.
    pub fn push_generated(&mut self, token: Token) -> Result<(), EditError> {
        self.check_writable()?;
        let at = self.buffer.len() as Pos;
        self.insert_with_origin(at, 0, std::slice::from_ref(&token), TokenFlags::GENERATED)
    }

    fn insert_with_origin(
        &mut self,
        pos: Pos,
        seq_id: SeqId,
        tokens: &[Token],
        origin: TokenFlags,
    ) -> Result<(), EditError> {
        let seq = if seq_id >= 0 { seq_id } else { 0 };
        let info: Vec<TokenInfo> = tokens
            .iter()
            .map(|&t| TokenInfo::new(t, 0, seq, self.token_flags(t) | origin))
            .collect();
        self.buffer.insert_at(pos as usize, tokens, &info)?;
        self.buffer.mark_dirty();

        self.log.record(EditOp::Insert {
            at: pos,
            seq_id,
            tokens: tokens.to_vec(),
        });

        if let Some(cb) = self.on_range_change.as_mut() {
            cb(TokenRange::with_seq(
                pos,
                pos + tokens.len() as Pos,
                seq_id,
            ));
        }
        Ok(())
    }

    /// Delete `[start, end)`, clamped to the buffer. Empty after clamping
    /// is a no-op.
    pub fn delete_tokens(&mut self, range: TokenRange) -> Result<(), EditError> {
        self.check_writable()?;
        let len = self.buffer.len() as Pos;
        let start = range.start.max(0);
        let end = range.end.min(len);
        if start >= end {
            return Ok(());
        }

        let removed = self.buffer.remove_range(start as usize, end as usize);
        self.log.record(EditOp::Delete {
            range: TokenRange::with_seq(start, end, range.seq_id),
            tokens: removed,
        });
        self.buffer.mark_dirty();

        if let Some(cb) = self.on_range_change.as_mut() {
            cb(range);
        }
        Ok(())
    }

    /// Replace `[start, end)` with `tokens` in one move, recorded as a
    /// single Replace carrying both payloads.
    pub fn replace_tokens(
        &mut self,
        range: TokenRange,
        tokens: &[Token],
    ) -> Result<(), EditError> {
        self.check_writable()?;
        let len = self.buffer.len() as Pos;
        let start = range.start.clamp(0, len);
        let end = range.end.min(len).max(start);
        let seq = if range.seq_id >= 0 { range.seq_id } else { 0 };

        let info: Vec<TokenInfo> = tokens
            .iter()
            .map(|&t| TokenInfo::new(t, 0, seq, self.token_flags(t) | TokenFlags::USER_DATA))
            .collect();
        let old = self
            .buffer
            .replace_range(start as usize, end as usize, tokens, &info)?;
        self.buffer.mark_dirty();

        self.log.record(EditOp::Replace {
            range: TokenRange::with_seq(start, end, range.seq_id),
            old,
            new: tokens.to_vec(),
        });

        if let Some(cb) = self.on_range_change.as_mut() {
            cb(TokenRange::with_seq(
                start,
                start + tokens.len() as Pos,
                range.seq_id,
            ));
        }
        Ok(())
    }

    /// Tokenize `text` (no BOS) and replace `range` with the result.
    pub fn replace_text(&mut self, range: TokenRange, text: &str) -> Result<(), EditError> {
        let tokens = self.tokenize(text, false)?;
        self.replace_tokens(range, &tokens)
    }

    /// Delete everything: equivalent to a delete over `[0, len)`.
    pub fn clear(&mut self, seq_id: SeqId) -> Result<(), EditError> {
        self.check_writable()?;
        let len = self.buffer.len() as Pos;
        self.delete_tokens(TokenRange::with_seq(0, len, seq_id))
    }
}
