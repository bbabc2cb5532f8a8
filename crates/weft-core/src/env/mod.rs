//! Recursive context environment: a tree of editors over one shared model.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use weft_abi::ModelAdapter;

use crate::editor::TokenEditor;
use crate::error::EnvError;

// Child modules (private to this crate). They can access private fields here.
mod complete;
mod message;
mod node;
mod spawn;
mod tree;

pub use message::{Message, MessageKind, MAILBOX_CAPACITY};
pub use node::{
    CompleteCallback, ContextNode, ContextState, CtxConfig, CtxId, MessageCallback, Relation,
    ShareMode, TokenCallback,
};

/// Environment-wide limits and session defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Any node's depth stays strictly below this.
    pub max_depth: u32,
    /// Total live nodes across all trees.
    pub max_contexts: usize,
    pub default_n_ctx: u32,
    pub default_n_batch: u32,
    pub default_n_threads: u32,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_contexts: 64,
            default_n_ctx: 2048,
            default_n_batch: 512,
            default_n_threads: 4,
        }
    }
}

/// Monotonic counters; `peak_depth` never decreases.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EnvStats {
    pub total_tokens_processed: u64,
    pub total_contexts_created: u64,
    pub total_recursions: u64,
    pub peak_depth: u64,
}

pub(crate) type NodeRef<A> = Arc<Mutex<ContextNode<A>>>;

/// Shareable handle to one context. Cheap to clone; the node stays owned
/// by the environment pool.
pub struct ContextHandle<A: ModelAdapter> {
    pub(crate) id: CtxId,
    pub(crate) node: NodeRef<A>,
}

impl<A: ModelAdapter> Clone for ContextHandle<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            node: self.node.clone(),
        }
    }
}

impl<A: ModelAdapter> std::fmt::Debug for ContextHandle<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ContextHandle").field(&self.id).finish()
    }
}

impl<A: ModelAdapter> ContextHandle<A> {
    #[inline]
    pub fn id(&self) -> CtxId {
        self.id
    }

    pub fn state(&self) -> ContextState {
        self.node.lock().unwrap().state
    }

    pub fn relation(&self) -> Relation {
        self.node.lock().unwrap().relation
    }

    pub fn depth(&self) -> u32 {
        self.node.lock().unwrap().depth
    }

    pub fn parent(&self) -> Option<CtxId> {
        self.node.lock().unwrap().parent
    }

    pub fn children(&self) -> Vec<CtxId> {
        self.node.lock().unwrap().children.clone()
    }

    pub fn token_count(&self) -> usize {
        self.node.lock().unwrap().editor.get_token_count(0)
    }

    /// Tokens produced by the most recent completion run.
    pub fn tokens_generated(&self) -> u32 {
        self.node.lock().unwrap().tokens_generated
    }

    /// Run `f` against this node's editor under the node lock.
    pub fn with_editor<R>(&self, f: impl FnOnce(&mut TokenEditor<A>) -> R) -> R {
        f(&mut self.node.lock().unwrap().editor)
    }

    /// Clear the buffer and load `prompt` (with BOS).
    pub fn set_prompt(&self, prompt: &str) -> Result<(), EnvError> {
        self.node
            .lock()
            .unwrap()
            .editor
            .set_prompt(prompt)
            .map_err(Into::into)
    }

    /// Tokenize `text` and append it to the buffer.
    pub fn append_prompt(&self, text: &str) -> Result<(), EnvError> {
        self.node
            .lock()
            .unwrap()
            .editor
            .append_prompt(text)
            .map_err(Into::into)
    }

    /// The node's current buffer as text.
    pub fn text(&self) -> Result<String, EnvError> {
        self.node.lock().unwrap().editor.text().map_err(Into::into)
    }

    pub fn set_on_token(&self, cb: Option<TokenCallback>) {
        self.node.lock().unwrap().on_token = cb;
    }

    pub fn set_on_complete(&self, cb: Option<CompleteCallback>) {
        self.node.lock().unwrap().on_complete = cb;
    }

    pub fn set_on_message(&self, cb: Option<MessageCallback>) {
        self.node.lock().unwrap().on_message = cb;
    }
}

/// Fired when a context enters the pool.
pub type CreateCallback = Box<dyn FnMut(CtxId) + Send>;
/// Fired for each context leaving the pool (post-order on destroy).
pub type DestroyCallback = Box<dyn FnMut(CtxId) + Send>;
/// Fired when a child is spawned: `(parent, child)`.
pub type RecursionCallback = Box<dyn FnMut(CtxId, CtxId) + Send>;

#[derive(Default)]
struct EnvCallbacks {
    on_context_create: Option<CreateCallback>,
    on_context_destroy: Option<DestroyCallback>,
    on_recursion: Option<RecursionCallback>,
}

pub(crate) struct EnvInner<A: ModelAdapter> {
    pub(crate) contexts: HashMap<CtxId, NodeRef<A>>,
    pub(crate) roots: Vec<CtxId>,
    pub(crate) next_id: u32,
    pub(crate) stats: EnvStats,
}

/// The container of all context nodes sharing one model.
///
/// The inner mutex guards pool, roots, and counters during creation and
/// destruction; each node has its own lock for everything else.
pub struct Environment<A: ModelAdapter> {
    pub(crate) model: Arc<A>,
    pub(crate) config: EnvConfig,
    pub(crate) inner: Mutex<EnvInner<A>>,
    callbacks: Mutex<EnvCallbacks>,
}

impl<A: ModelAdapter> Environment<A> {
    pub fn new(model: Arc<A>, config: EnvConfig) -> Self {
        tracing::debug!(
            max_depth = config.max_depth,
            max_contexts = config.max_contexts,
            "initialized environment"
        );
        Self {
            model,
            config,
            inner: Mutex::new(EnvInner {
                contexts: HashMap::new(),
                roots: Vec::new(),
                next_id: 0,
                stats: EnvStats::default(),
            }),
            callbacks: Mutex::new(EnvCallbacks::default()),
        }
    }

    #[inline]
    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn stats(&self) -> EnvStats {
        self.inner.lock().unwrap().stats
    }

    /// Live nodes across all trees.
    pub fn context_count(&self) -> usize {
        self.inner.lock().unwrap().contexts.len()
    }

    /// Look a live context up by id.
    pub fn get_context(&self, id: CtxId) -> Option<ContextHandle<A>> {
        self.inner
            .lock()
            .unwrap()
            .contexts
            .get(&id)
            .map(|node| ContextHandle {
                id,
                node: node.clone(),
            })
    }

    /// Ids of every root, creation order.
    pub fn roots(&self) -> Vec<CtxId> {
        self.inner.lock().unwrap().roots.clone()
    }

    pub fn set_on_context_create(&self, cb: Option<CreateCallback>) {
        self.callbacks.lock().unwrap().on_context_create = cb;
    }

    pub fn set_on_context_destroy(&self, cb: Option<DestroyCallback>) {
        self.callbacks.lock().unwrap().on_context_destroy = cb;
    }

    pub fn set_on_recursion(&self, cb: Option<RecursionCallback>) {
        self.callbacks.lock().unwrap().on_recursion = cb;
    }

    pub(crate) fn fire_create(&self, id: CtxId) {
        if let Some(cb) = self.callbacks.lock().unwrap().on_context_create.as_mut() {
            cb(id);
        }
    }

    pub(crate) fn fire_destroy(&self, id: CtxId) {
        if let Some(cb) = self.callbacks.lock().unwrap().on_context_destroy.as_mut() {
            cb(id);
        }
    }

    pub(crate) fn fire_recursion(&self, parent: CtxId, child: CtxId) {
        if let Some(cb) = self.callbacks.lock().unwrap().on_recursion.as_mut() {
            cb(parent, child);
        }
    }

    pub(crate) fn add_tokens_stat(&self, generated: u32) {
        if generated > 0 {
            self.inner.lock().unwrap().stats.total_tokens_processed += generated as u64;
        }
    }
}
