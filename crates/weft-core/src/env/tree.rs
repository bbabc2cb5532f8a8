// Tree traversal and debug rendering.

use std::fmt::Write as _;

use weft_abi::ModelAdapter;

use crate::env::node::{ContextNode, CtxId};
use crate::env::{ContextHandle, Environment, NodeRef};

impl<A: ModelAdapter> Environment<A> {
    /// Depth-first pre-order walk from `root`. The visitor sees each node
    /// under its lock together with its absolute depth.
    pub fn walk_tree<F>(&self, root: CtxId, mut visitor: F)
    where
        F: FnMut(&ContextNode<A>, u32),
    {
        if let Some(start) = self.get_context(root) {
            self.walk_node(&start.node, &mut visitor);
        }
    }

    fn walk_node<F>(&self, node: &NodeRef<A>, visitor: &mut F)
    where
        F: FnMut(&ContextNode<A>, u32),
    {
        let children: Vec<CtxId> = {
            let n = node.lock().unwrap();
            visitor(&n, n.depth);
            n.children.clone()
        };
        for child in children {
            if let Some(handle) = self.get_context(child) {
                self.walk_node(&handle.node, visitor);
            }
        }
    }

    /// First node (pre-order) for which `predicate` holds.
    pub fn find_context<F>(&self, root: CtxId, mut predicate: F) -> Option<ContextHandle<A>>
    where
        F: FnMut(&ContextNode<A>) -> bool,
    {
        let start = self.get_context(root)?;
        self.find_node(&start, &mut predicate)
    }

    fn find_node<F>(&self, handle: &ContextHandle<A>, predicate: &mut F) -> Option<ContextHandle<A>>
    where
        F: FnMut(&ContextNode<A>) -> bool,
    {
        let children: Vec<CtxId> = {
            let n = handle.node.lock().unwrap();
            if predicate(&n) {
                return Some(handle.clone());
            }
            n.children.clone()
        };
        for child in children {
            if let Some(child_handle) = self.get_context(child) {
                if let Some(found) = self.find_node(&child_handle, predicate) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Number of nodes strictly below `ctx` (the node itself is not
    /// counted).
    pub fn count_descendants(&self, ctx: CtxId) -> usize {
        let children = match self.get_context(ctx) {
            Some(handle) => handle.node.lock().unwrap().children.clone(),
            None => return 0,
        };
        children
            .into_iter()
            .map(|c| 1 + self.count_descendants(c))
            .sum()
    }

    /// Walk parent links up to the root of `ctx`'s tree.
    pub fn root_of(&self, ctx: CtxId) -> Option<CtxId> {
        let mut current = self.get_context(ctx)?;
        loop {
            let parent = current.node.lock().unwrap().parent;
            match parent.and_then(|pid| self.get_context(pid)) {
                Some(next) => current = next,
                None => return Some(current.id),
            }
        }
    }

    /// Render the subtree, one node per line, indented by depth:
    /// `[id] relation (leaf|has children) - N tokens, state: s`.
    pub fn render_tree(&self, root: CtxId) -> String {
        let mut out = String::new();
        self.walk_tree(root, |node, depth| {
            for _ in 0..depth {
                out.push_str("  ");
            }
            let _ = writeln!(
                out,
                "[{}] {} ({}) - {} tokens, state: {}",
                node.id(),
                node.relation(),
                if node.children().is_empty() {
                    "leaf"
                } else {
                    "has children"
                },
                node.editor().get_token_count(0),
                node.state(),
            );
        });
        out
    }

    /// Print the subtree to stdout (debug convenience).
    pub fn print_tree(&self, root: CtxId) {
        println!("=== Context Tree ===");
        print!("{}", self.render_tree(root));
        println!("====================");
    }
}
