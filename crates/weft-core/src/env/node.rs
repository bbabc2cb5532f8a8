//! One vertex of the context tree.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use weft_abi::{CompletionParams, ModelAdapter, Token};

use crate::editor::TokenEditor;
use crate::env::message::{Mailbox, Message, MAILBOX_CAPACITY};

/// Identifies a context inside one environment. Carried by value across
/// trees; never an owning reference.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CtxId(pub u32);

impl fmt::Display for CtxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a node relates to the tree around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    Root,
    Child,
    Fork,
    Peer,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Relation::Root => "root",
            Relation::Child => "child",
            Relation::Fork => "fork",
            Relation::Peer => "peer",
        })
    }
}

/// Execution state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextState {
    Idle,
    Running,
    Waiting,
    Complete,
    Error,
    Suspended,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContextState::Idle => "idle",
            ContextState::Running => "running",
            ContextState::Waiting => "waiting",
            ContextState::Complete => "complete",
            ContextState::Error => "error",
            ContextState::Suspended => "suspended",
        })
    }
}

/// What a child bootstraps from its parent. The `Read` modes currently
/// behave like their `Copy` counterparts; they stay distinct for a future
/// copy-on-write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShareMode {
    #[default]
    None,
    KvRead,
    KvCopy,
    TokensRead,
    TokensCopy,
    Full,
}

/// Per-context configuration. Zero-valued sizing fields inherit from the
/// parent (or the environment defaults for roots) at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtxConfig {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: u32,
    pub share_mode: ShareMode,
    pub completion: CompletionParams,
}

impl Default for CtxConfig {
    fn default() -> Self {
        Self {
            n_ctx: 2048,
            n_batch: 512,
            n_threads: 4,
            share_mode: ShareMode::None,
            completion: CompletionParams::default(),
        }
    }
}

/// Fired once per generated token.
pub type TokenCallback = Box<dyn FnMut(Token) + Send>;
/// Fired when a completion run finishes normally.
pub type CompleteCallback = Box<dyn FnMut(ContextState) + Send>;
/// Fired when a message lands in this node's mailbox.
pub type MessageCallback = Box<dyn FnMut(&Message) + Send>;

/// One node: an editor, its place in the tree, and a mailbox.
///
/// Nodes are owned by the environment pool and mutated only under their
/// own lock; parent/child links are ids, so acquaintance never extends a
/// lifetime.
pub struct ContextNode<A: ModelAdapter> {
    pub(crate) id: CtxId,
    pub(crate) relation: Relation,
    pub(crate) state: ContextState,
    pub(crate) parent: Option<CtxId>,
    pub(crate) children: Vec<CtxId>,
    pub(crate) depth: u32,
    pub(crate) config: CtxConfig,
    pub(crate) editor: TokenEditor<A>,
    pub(crate) mailbox: Mailbox,
    pub(crate) next_msg_seq: u32,

    // ========== execution bookkeeping ==========
    pub(crate) start_time: Option<Instant>,
    pub(crate) end_time: Option<Instant>,
    pub(crate) tokens_generated: u32,

    pub(crate) on_token: Option<TokenCallback>,
    pub(crate) on_complete: Option<CompleteCallback>,
    pub(crate) on_message: Option<MessageCallback>,
}

impl<A: ModelAdapter> ContextNode<A> {
    pub(crate) fn new(
        id: CtxId,
        relation: Relation,
        config: CtxConfig,
        editor: TokenEditor<A>,
    ) -> Self {
        Self {
            id,
            relation,
            state: ContextState::Idle,
            parent: None,
            children: Vec::new(),
            depth: 0,
            config,
            editor,
            mailbox: Mailbox::new(MAILBOX_CAPACITY),
            next_msg_seq: 0,
            start_time: None,
            end_time: None,
            tokens_generated: 0,
            on_token: None,
            on_complete: None,
            on_message: None,
        }
    }

    #[inline]
    pub fn id(&self) -> CtxId {
        self.id
    }

    #[inline]
    pub fn relation(&self) -> Relation {
        self.relation
    }

    #[inline]
    pub fn state(&self) -> ContextState {
        self.state
    }

    #[inline]
    pub fn parent(&self) -> Option<CtxId> {
        self.parent
    }

    #[inline]
    pub fn children(&self) -> &[CtxId] {
        &self.children
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn config(&self) -> &CtxConfig {
        &self.config
    }

    #[inline]
    pub fn editor(&self) -> &TokenEditor<A> {
        &self.editor
    }

    #[inline]
    pub fn editor_mut(&mut self) -> &mut TokenEditor<A> {
        &mut self.editor
    }

    /// Tokens produced by the most recent completion run.
    #[inline]
    pub fn tokens_generated(&self) -> u32 {
        self.tokens_generated
    }

    /// Wall-clock duration of the last finished run, if any.
    pub fn last_run_duration(&self) -> Option<std::time::Duration> {
        match (self.start_time, self.end_time) {
            (Some(s), Some(e)) => Some(e.duration_since(s)),
            _ => None,
        }
    }
}
