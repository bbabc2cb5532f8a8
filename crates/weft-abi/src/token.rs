use bitflags::bitflags;

/// Wrapper for a model token (ID). Using a newtype avoids accidental
/// mixing with unrelated `i32`s and keeps conversions explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Token(pub i32);

impl From<i32> for Token {
    #[inline]
    fn from(value: i32) -> Self {
        Token(value)
    }
}

impl From<Token> for i32 {
    #[inline]
    fn from(token: Token) -> i32 {
        token.0
    }
}

/// Signed position index into an editor buffer. Valid insertion points are
/// `[0, n_tokens]`; valid read positions are `[0, n_tokens)`.
pub type Pos = i32;

/// Names a parallel attention-cache stream inside one model session.
/// Sequence 0 is always present; `-1` in a range parameter means "all
/// sequences".
pub type SeqId = i32;

bitflags! {
    /// Per-token classification bits. BOS/EOS/SPECIAL/CONTROL are derived
    /// from the model vocabulary; USER_DATA and GENERATED record whether a
    /// token entered the buffer via an edit or via the generation driver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TokenFlags: u32 {
        const BOS       = 1 << 0;
        const EOS       = 1 << 1;
        const SPECIAL   = 1 << 2;
        const CONTROL   = 1 << 3;
        const USER_DATA = 1 << 4;
        const GENERATED = 1 << 5;
    }
}

/// Per-position metadata carried alongside each buffered token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenInfo {
    pub id: Token,
    pub pos: Pos,
    pub seq_id: SeqId,
    /// Raw log-odds from the last decode, when available.
    pub logit: f32,
    /// Normalized probability. Left at 0.0 unless a caller runs softmax.
    pub prob: f32,
    pub has_logit: bool,
    pub flags: TokenFlags,
}

impl TokenInfo {
    /// Metadata for a token that has never been through a decode.
    pub fn new(id: Token, pos: Pos, seq_id: SeqId, flags: TokenFlags) -> Self {
        Self {
            id,
            pos,
            seq_id,
            logit: 0.0,
            prob: 0.0,
            has_logit: false,
            flags,
        }
    }
}
