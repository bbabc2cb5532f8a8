//! Weft core: token editor + recursive context environment.
//!
//! The editor exposes one model session's prompt window as a random-access,
//! undoable sequence of tokens; the environment arranges editors into a
//! tree of cooperating contexts that share model weights, inherit state
//! from their parents, and talk by message.

pub mod buffer;
pub mod editlog;
pub mod editor;
pub mod env;
pub mod error;
pub mod seq;

pub use buffer::{TokenBuffer, TokenRange};
pub use editlog::{EditLog, EditOp};
pub use editor::{Snapshot, TokenEditor};
pub use env::{
    ContextHandle, ContextNode, ContextState, CtxConfig, CtxId, EnvConfig, EnvStats, Environment,
    Message, MessageKind, Relation, ShareMode,
};
pub use error::{EditError, EnvError};

pub use weft_abi::{CompletionParams, Token, TokenFlags, TokenInfo};
