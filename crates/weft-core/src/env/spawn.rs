// Node creation and destruction. Creation takes the environment lock for
// pool bookkeeping; inheritance reads the parent under its own lock.
// Destruction is post-order: children leave the pool before their parent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;
use weft_abi::{ModelAdapter, Pos, SessionOpts};

use crate::buffer::TokenRange;
use crate::editor::TokenEditor;
use crate::env::node::{ContextNode, CtxConfig, CtxId, Relation, ShareMode};
use crate::env::{ContextHandle, Environment, NodeRef};
use crate::error::EnvError;

fn session_opts(config: &CtxConfig) -> SessionOpts {
    SessionOpts {
        n_ctx: config.n_ctx,
        n_batch: config.n_batch,
        n_threads: config.n_threads,
    }
}

/// Zero-valued sizing fields fall back to the parent's.
fn inherit(mut config: CtxConfig, parent: &CtxConfig) -> CtxConfig {
    if config.n_ctx == 0 {
        config.n_ctx = parent.n_ctx;
    }
    if config.n_batch == 0 {
        config.n_batch = parent.n_batch;
    }
    if config.n_threads == 0 {
        config.n_threads = parent.n_threads;
    }
    config
}

impl<A: ModelAdapter> Environment<A> {
    /// Create a root context with a fresh session.
    pub fn create_root(&self, mut config: CtxConfig) -> Result<ContextHandle<A>, EnvError> {
        if config.n_ctx == 0 {
            config.n_ctx = self.config.default_n_ctx;
        }
        if config.n_batch == 0 {
            config.n_batch = self.config.default_n_batch;
        }
        if config.n_threads == 0 {
            config.n_threads = self.config.default_n_threads;
        }

        let handle = {
            let mut inner = self.inner.lock().unwrap();
            if inner.contexts.len() >= self.config.max_contexts {
                return Err(EnvError::MaxContexts);
            }
            let session = self
                .model
                .create_session(&session_opts(&config))
                .map_err(EnvError::Model)?;
            let editor = TokenEditor::new(self.model.clone(), session);

            let id = CtxId(inner.next_id);
            inner.next_id += 1;
            let node = Arc::new(Mutex::new(ContextNode::new(
                id,
                Relation::Root,
                config,
                editor,
            )));
            inner.contexts.insert(id, node.clone());
            inner.roots.push(id);
            inner.stats.total_contexts_created += 1;
            ContextHandle { id, node }
        };

        debug!(id = %handle.id, "created root context");
        self.fire_create(handle.id);
        Ok(handle)
    }

    /// Spawn a child of `parent`, bootstrapping state per the config's
    /// share mode. Fails before any allocation when the depth or pool
    /// limit would be violated.
    pub fn spawn_child(
        &self,
        parent: &ContextHandle<A>,
        config: CtxConfig,
    ) -> Result<ContextHandle<A>, EnvError> {
        let (handle, depth) = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.contexts.contains_key(&parent.id) {
                return Err(EnvError::InvalidContext(parent.id));
            }
            let (p_depth, p_config) = {
                let p = parent.node.lock().unwrap();
                (p.depth, p.config.clone())
            };
            if p_depth + 1 >= self.config.max_depth {
                debug!(max_depth = self.config.max_depth, "refused spawn at depth limit");
                return Err(EnvError::MaxDepth);
            }
            if inner.contexts.len() >= self.config.max_contexts {
                return Err(EnvError::MaxContexts);
            }

            let config = inherit(config, &p_config);
            let session = self
                .model
                .create_session(&session_opts(&config))
                .map_err(EnvError::Model)?;
            let mut editor = TokenEditor::new(self.model.clone(), session);

            // Bootstrap from the parent. Read modes are promoted to copies.
            let share = config.share_mode;
            if matches!(
                share,
                ShareMode::KvRead | ShareMode::KvCopy | ShareMode::Full
            ) {
                let blob = parent.node.lock().unwrap().editor.save_session_state();
                if let Some(blob) = blob {
                    editor.load_session_state(&blob).map_err(EnvError::Model)?;
                }
            }
            let mut parent_logits = false;
            if matches!(
                share,
                ShareMode::TokensRead | ShareMode::TokensCopy | ShareMode::Full
            ) {
                let (tokens, logits_valid) = {
                    let p = parent.node.lock().unwrap();
                    let count = p.editor.get_token_count(0) as Pos;
                    (
                        p.editor.get_tokens(TokenRange::new(0, count)),
                        p.editor.logits_valid(),
                    )
                };
                parent_logits = logits_valid;
                if !tokens.is_empty() {
                    editor.insert_tokens(0, 0, &tokens)?;
                }
            }
            if share == ShareMode::Full {
                // Cache and stream both came over; the child starts coherent.
                editor.mark_coherent(parent_logits);
            }

            let id = CtxId(inner.next_id);
            inner.next_id += 1;
            let mut node = ContextNode::new(id, Relation::Child, config, editor);
            node.parent = Some(parent.id);
            node.depth = p_depth + 1;
            let node = Arc::new(Mutex::new(node));
            inner.contexts.insert(id, node.clone());
            parent.node.lock().unwrap().children.push(id);

            inner.stats.total_contexts_created += 1;
            inner.stats.total_recursions += 1;
            inner.stats.peak_depth = inner.stats.peak_depth.max((p_depth + 1) as u64);

            (ContextHandle { id, node }, p_depth + 1)
        };

        debug!(id = %handle.id, parent = %parent.id, depth, "spawned child context");
        self.fire_create(handle.id);
        self.fire_recursion(parent.id, handle.id);
        Ok(handle)
    }

    /// Fork: spawn against the source's parent with full sharing. A root
    /// has no parent to fork against.
    pub fn fork(&self, source: &ContextHandle<A>) -> Result<ContextHandle<A>, EnvError> {
        let (src_parent, mut config) = {
            let s = source.node.lock().unwrap();
            (s.parent, s.config.clone())
        };
        let parent_id = src_parent.ok_or(EnvError::InvalidParent)?;
        let parent = self
            .get_context(parent_id)
            .ok_or(EnvError::InvalidContext(parent_id))?;

        config.share_mode = ShareMode::Full;
        let handle = self.spawn_child(&parent, config)?;
        handle.node.lock().unwrap().relation = Relation::Fork;

        debug!(id = %handle.id, source = %source.id, "forked context");
        Ok(handle)
    }

    /// Create a sibling of `reference` with independent state. A peer of a
    /// root becomes a new root, keeping every node reachable.
    pub fn create_peer(
        &self,
        reference: &ContextHandle<A>,
        config: CtxConfig,
    ) -> Result<ContextHandle<A>, EnvError> {
        let handle = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.contexts.contains_key(&reference.id) {
                return Err(EnvError::InvalidContext(reference.id));
            }
            if inner.contexts.len() >= self.config.max_contexts {
                return Err(EnvError::MaxContexts);
            }
            let (r_depth, r_parent, r_config) = {
                let r = reference.node.lock().unwrap();
                (r.depth, r.parent, r.config.clone())
            };

            let config = inherit(config, &r_config);
            let session = self
                .model
                .create_session(&session_opts(&config))
                .map_err(EnvError::Model)?;
            let editor = TokenEditor::new(self.model.clone(), session);

            let id = CtxId(inner.next_id);
            inner.next_id += 1;
            let mut node = ContextNode::new(id, Relation::Peer, config, editor);
            node.depth = r_depth;
            node.parent = r_parent;
            let node = Arc::new(Mutex::new(node));
            inner.contexts.insert(id, node.clone());
            match r_parent {
                Some(pid) => {
                    if let Some(p) = inner.contexts.get(&pid) {
                        p.lock().unwrap().children.push(id);
                    }
                }
                None => inner.roots.push(id),
            }
            inner.stats.total_contexts_created += 1;
            ContextHandle { id, node }
        };

        debug!(id = %handle.id, reference = %reference.id, "created peer context");
        self.fire_create(handle.id);
        Ok(handle)
    }

    /// Destroy `id` and its whole subtree. Children leave the pool first;
    /// the destroy callback fires once per node, post-order.
    pub fn destroy(&self, id: CtxId) -> Result<(), EnvError> {
        let doomed: Vec<(CtxId, NodeRef<A>)> = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.contexts.contains_key(&id) {
                return Err(EnvError::InvalidContext(id));
            }
            let mut order = Vec::new();
            collect_post_order(&inner.contexts, id, &mut order);

            let parent = inner.contexts[&id].lock().unwrap().parent;
            if let Some(pid) = parent {
                if let Some(p) = inner.contexts.get(&pid) {
                    p.lock().unwrap().children.retain(|c| *c != id);
                }
            }
            inner.roots.retain(|r| *r != id);

            order
                .iter()
                .filter_map(|nid| inner.contexts.remove(nid).map(|n| (*nid, n)))
                .collect()
        };

        debug!(id = %id, nodes = doomed.len(), "destroyed context subtree");
        for (nid, node) in doomed {
            self.fire_destroy(nid);
            drop(node);
        }
        Ok(())
    }
}

fn collect_post_order<A: ModelAdapter>(
    map: &HashMap<CtxId, NodeRef<A>>,
    id: CtxId,
    out: &mut Vec<CtxId>,
) {
    let children: Vec<CtxId> = map
        .get(&id)
        .map(|n| n.lock().unwrap().children.clone())
        .unwrap_or_default();
    for child in children {
        collect_post_order(map, child, out);
    }
    out.push(id);
}
