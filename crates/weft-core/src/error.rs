use thiserror::Error;

use crate::env::CtxId;
use weft_abi::{Pos, SeqId};

/// Editor-level failures. These codes are the stable boundary for every
/// editor operation; adapter `String` errors are wrapped at the call site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("position {pos} out of range (buffer holds {len} tokens)")]
    InvalidPosition { pos: Pos, len: usize },

    #[error("invalid token")]
    InvalidToken,

    #[error("buffer too small")]
    BufferTooSmall,

    #[error("kv cache rejected decode: {0}")]
    KvCacheFull(String),

    #[error("sequence {0} not found")]
    SequenceNotFound(SeqId),

    #[error("allocation failed")]
    AllocationFailed,

    #[error("editor is read-only")]
    Readonly,
}

/// Environment-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("max tree depth reached")]
    MaxDepth,

    #[error("context pool is full")]
    MaxContexts,

    #[error("unknown or dead context {0}")]
    InvalidContext(CtxId),

    #[error("operation requires a parent context")]
    InvalidParent,

    #[error("context is busy")]
    ContextBusy,

    #[error("recursion limit reached")]
    RecursionLimit,

    #[error("out of memory (mailbox or pool)")]
    Memory,

    #[error("model error: {0}")]
    Model(String),

    #[error("deadlock detected")]
    Deadlock,

    #[error("timed out")]
    Timeout,

    /// Editor failure surfaced through an environment operation.
    #[error(transparent)]
    Edit(#[from] EditError),
}
