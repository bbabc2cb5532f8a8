// Reads, search, and logit inspection. Reads never mutate the stream;
// top-k and logit lookup may trigger a lazy re-decode to reach coherence.

use weft_abi::{ModelAdapter, ModelSession, Pos, SeqId, Token, TokenFlags, TokenInfo};

use super::TokenEditor;
use crate::buffer::TokenRange;
use crate::error::EditError;

impl<A: ModelAdapter> TokenEditor<A> {
    /// Token at `pos`, or `None` out of range. Pure read.
    pub fn get_token(&self, pos: Pos, _seq_id: SeqId) -> Option<Token> {
        if pos < 0 {
            return None;
        }
        self.buffer.get(pos as usize)
    }

    /// Metadata for `pos`. Vocabulary flags are recomputed at read time so
    /// they reflect the current model; origin bits are preserved.
    pub fn get_token_info(&self, pos: Pos, seq_id: SeqId) -> Result<TokenInfo, EditError> {
        let len = self.buffer.len();
        if pos < 0 || pos as usize >= len {
            return Err(EditError::InvalidPosition { pos, len });
        }
        let mut info = self.buffer.info()[pos as usize];
        info.id = self.buffer.tokens()[pos as usize];
        info.pos = pos;
        info.seq_id = if seq_id >= 0 { seq_id } else { 0 };
        let origin = info.flags & (TokenFlags::USER_DATA | TokenFlags::GENERATED);
        info.flags = self.token_flags(info.id) | origin;
        Ok(info)
    }

    /// Copy of `[max(start, 0), min(end, len))`.
    pub fn get_tokens(&self, range: TokenRange) -> Vec<Token> {
        let len = self.buffer.len() as Pos;
        let start = range.start.max(0);
        let end = range.end.min(len);
        if start >= end {
            return Vec::new();
        }
        self.buffer.tokens()[start as usize..end as usize].to_vec()
    }

    /// Tokens currently buffered. The sequence is ignored: the buffer is a
    /// single logical stream.
    #[inline]
    pub fn get_token_count(&self, _seq_id: SeqId) -> usize {
        self.buffer.len()
    }

    /// Every position holding `token`, ascending.
    pub fn find_token(&self, token: Token) -> Vec<Pos> {
        self.buffer
            .tokens()
            .iter()
            .enumerate()
            .filter(|(_, &t)| t == token)
            .map(|(i, _)| i as Pos)
            .collect()
    }

    /// Token offsets of every tokenized-substring match of `text`.
    /// Naive O(n·m) scan.
    pub fn find_text(&self, text: &str) -> Result<Vec<Pos>, EditError> {
        let needle = self.tokenize(text, false)?;
        let hay = self.buffer.tokens();
        let mut out = Vec::new();
        if needle.is_empty() || hay.len() < needle.len() {
            return Ok(out);
        }
        for i in 0..=hay.len() - needle.len() {
            if hay[i..i + needle.len()] == needle[..] {
                out.push(i as Pos);
            }
        }
        Ok(out)
    }

    /// The `k` highest-logit tokens at the coherence point, logit
    /// descending. Probabilities are left unnormalized (0.0).
    pub fn get_top_k(
        &mut self,
        pos: Pos,
        seq_id: SeqId,
        k: usize,
    ) -> Result<Vec<TokenInfo>, EditError> {
        self.compute_logits()?;
        let mut candidates: Vec<(Token, f32)> = self
            .session
            .logits()
            .iter()
            .enumerate()
            .map(|(i, &logit)| (Token(i as i32), logit))
            .collect();

        let k = k.min(candidates.len());
        let mut out = Vec::with_capacity(k);
        // k partial selection passes; k is tiny next to the vocab.
        for i in 0..k {
            let mut max_idx = i;
            for j in i + 1..candidates.len() {
                if candidates[j].1 > candidates[max_idx].1 {
                    max_idx = j;
                }
            }
            candidates.swap(i, max_idx);

            let (id, logit) = candidates[i];
            let mut info = TokenInfo::new(
                id,
                pos,
                if seq_id >= 0 { seq_id } else { 0 },
                self.token_flags(id),
            );
            info.logit = logit;
            info.has_logit = true;
            out.push(info);
        }
        Ok(out)
    }

    /// Raw logit of `token` at the coherence point (not a normalized
    /// probability).
    pub fn token_logit(
        &mut self,
        _pos: Pos,
        _seq_id: SeqId,
        token: Token,
    ) -> Result<f32, EditError> {
        self.compute_logits()?;
        let logits = self.session.logits();
        if token.0 < 0 || token.0 as usize >= logits.len() {
            return Err(EditError::InvalidToken);
        }
        Ok(logits[token.0 as usize])
    }
}
