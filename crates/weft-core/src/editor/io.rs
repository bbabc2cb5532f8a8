// Token-stream export/import.
//
// Binary layout: little-endian u32 count, then count × 4-byte
// little-endian token IDs. Total size exactly 4 + 4·N; no magic, no
// version. JSON is `{"tokens":[...]}` with nothing else.

use weft_abi::{ModelAdapter, Pos, Token, TokenInfo};

use super::TokenEditor;
use crate::error::EditError;

impl<A: ModelAdapter> TokenEditor<A> {
    /// Compact JSON dump of the token IDs.
    pub fn export_json(&self) -> String {
        let ids: Vec<i32> = self.buffer.tokens().iter().map(|t| t.0).collect();
        serde_json::json!({ "tokens": ids }).to_string()
    }

    /// Binary token stream.
    pub fn export_binary(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 4 * self.buffer.len());
        out.extend_from_slice(&(self.buffer.len() as u32).to_le_bytes());
        for t in self.buffer.tokens() {
            out.extend_from_slice(&t.0.to_le_bytes());
        }
        out
    }

    /// Symmetric import: clears the buffer (recorded as a delete), loads
    /// the stream, recomputes vocabulary flags, and leaves the cache
    /// dirty.
    pub fn import_binary(&mut self, buf: &[u8]) -> Result<(), EditError> {
        self.check_writable()?;
        if buf.len() < 4 {
            return Err(EditError::BufferTooSmall);
        }
        let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        if buf.len() < 4 + count * 4 {
            return Err(EditError::BufferTooSmall);
        }

        self.clear(-1)?;

        let tokens: Vec<Token> = buf[4..4 + count * 4]
            .chunks_exact(4)
            .map(|c| Token(i32::from_le_bytes(c.try_into().unwrap())))
            .collect();
        let info: Vec<TokenInfo> = tokens
            .iter()
            .enumerate()
            .map(|(i, &t)| TokenInfo::new(t, i as Pos, 0, self.token_flags(t)))
            .collect();

        self.buffer.overwrite_all(&tokens, &info)?;
        self.buffer.mark_dirty();
        Ok(())
    }
}
