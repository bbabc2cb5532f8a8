// Generation driver and the recursive evaluation patterns layered on it.

use std::time::{Duration, Instant};

use tracing::{debug, warn};
use weft_abi::{CompletionParams, ModelAdapter, Pos};

use crate::buffer::TokenRange;
use crate::env::node::{ContextNode, ContextState};
use crate::env::{ContextHandle, Environment};
use crate::error::EnvError;

impl<A: ModelAdapter> Environment<A> {
    /// Run a synchronous decode loop on `ctx`, appending each sampled
    /// token to its editor. Rejects with `ContextBusy` when the node is
    /// already running (or locked by another caller).
    pub fn complete(
        &self,
        ctx: &ContextHandle<A>,
        params: &CompletionParams,
    ) -> Result<(), EnvError> {
        let mut node = ctx.node.try_lock().map_err(|_| EnvError::ContextBusy)?;
        if node.state == ContextState::Running {
            return Err(EnvError::ContextBusy);
        }
        let outcome = self.run_completion(&mut node, params);
        let generated = node.tokens_generated;
        drop(node);
        self.add_tokens_stat(generated);
        outcome
    }

    /// `complete`, then detokenize only the newly generated suffix.
    pub fn complete_sync(
        &self,
        ctx: &ContextHandle<A>,
        params: &CompletionParams,
    ) -> Result<String, EnvError> {
        let mut node = ctx.node.try_lock().map_err(|_| EnvError::ContextBusy)?;
        if node.state == ContextState::Running {
            return Err(EnvError::ContextBusy);
        }
        let outcome = self.run_sync(&mut node, params);
        let generated = node.tokens_generated;
        drop(node);
        self.add_tokens_stat(generated);
        outcome
    }

    fn run_sync(
        &self,
        node: &mut ContextNode<A>,
        params: &CompletionParams,
    ) -> Result<String, EnvError> {
        let before = node.editor.get_token_count(0);
        self.run_completion(node, params)?;
        let after = node.editor.get_token_count(0);
        if after <= before {
            return Ok(String::new());
        }
        let suffix = node
            .editor
            .get_tokens(TokenRange::new(before as Pos, after as Pos));
        Ok(node.editor.detokenize(&suffix)?)
    }

    /// The decode loop proper. On entry the node must not be running.
    fn run_completion(
        &self,
        node: &mut ContextNode<A>,
        params: &CompletionParams,
    ) -> Result<(), EnvError> {
        node.state = ContextState::Running;
        node.start_time = Some(Instant::now());
        node.end_time = None;
        node.tokens_generated = 0;
        debug!(id = %node.id, n_predict = params.n_predict, "starting completion");

        if let Err(e) = node.editor.sync_kv_cache() {
            node.state = ContextState::Error;
            return Err(EnvError::Model(e.to_string()));
        }

        let mut sampler = node.editor.make_sampler(params);
        let started = node.start_time.unwrap_or_else(Instant::now);
        let budget = Duration::from_millis(params.timeout_ms as u64);

        for _ in 0..params.n_predict {
            if params.timeout_ms > 0 && started.elapsed() >= budget {
                node.state = ContextState::Error;
                warn!(id = %node.id, timeout_ms = params.timeout_ms, "completion timed out");
                return Err(EnvError::Timeout);
            }

            let token = sampler.sample(node.editor.raw_logits());
            sampler.accept(token);

            if node.editor.is_eog(token) {
                break;
            }

            if let Err(e) = node.editor.push_generated(token) {
                node.state = ContextState::Error;
                return Err(EnvError::Model(e.to_string()));
            }
            // Decode the new token right away so the cache stays coherent
            // with the buffer for the next sample.
            if let Err(e) = node.editor.decode_last() {
                node.state = ContextState::Error;
                return Err(EnvError::Model(e.to_string()));
            }
            node.tokens_generated += 1;

            if let Some(cb) = node.on_token.as_mut() {
                cb(token);
            }
        }

        node.state = ContextState::Complete;
        node.end_time = Some(Instant::now());
        debug!(id = %node.id, generated = node.tokens_generated, "completion finished");
        if let Some(cb) = node.on_complete.as_mut() {
            cb(ContextState::Complete);
        }
        Ok(())
    }

    /// Evaluate the node's own output: snapshot, wrap the current text in
    /// an evaluation frame, complete, then restore the pre-eval state.
    pub fn self_eval(
        &self,
        ctx: &ContextHandle<A>,
        eval_prompt: &str,
        params: &CompletionParams,
    ) -> Result<String, EnvError> {
        let mut node = ctx.node.try_lock().map_err(|_| EnvError::ContextBusy)?;
        if node.state == ContextState::Running {
            return Err(EnvError::ContextBusy);
        }

        let text = node.editor.text()?;
        let snapshot = node.editor.create_snapshot();
        let framed = format!(
            "[Context]\n{}\n\n[Evaluation Prompt]\n{}\n\n[Evaluation]",
            text, eval_prompt
        );
        node.editor.set_prompt(&framed)?;

        let outcome = self.run_sync(&mut node, params);
        let restored = node.editor.restore_snapshot(&snapshot);
        let generated = node.tokens_generated;
        drop(node);
        self.add_tokens_stat(generated);

        let out = outcome?;
        restored?;
        Ok(out)
    }

    /// Iterative refinement: complete, consult `should_continue` with the
    /// full output, and append the refinement prompt between passes. The
    /// last output wins at the iteration cap.
    pub fn refine<F>(
        &self,
        ctx: &ContextHandle<A>,
        refine_prompt: &str,
        max_iterations: u32,
        mut should_continue: F,
    ) -> Result<String, EnvError>
    where
        F: FnMut(&str) -> bool,
    {
        let mut node = ctx.node.try_lock().map_err(|_| EnvError::ContextBusy)?;
        if node.state == ContextState::Running {
            return Err(EnvError::ContextBusy);
        }

        let params = node.config.completion.clone();
        let mut generated_total: u32 = 0;
        let mut result = Ok(String::new());

        for iter in 0..max_iterations {
            if let Err(e) = self.run_completion(&mut node, &params) {
                result = Err(e);
                break;
            }
            generated_total += node.tokens_generated;

            let output = match node.editor.text() {
                Ok(o) => o,
                Err(e) => {
                    result = Err(e.into());
                    break;
                }
            };
            if !should_continue(&output) || iter + 1 == max_iterations {
                result = Ok(output);
                break;
            }
            if let Err(e) = node
                .editor
                .append_prompt(&format!("\n\n{}\n", refine_prompt))
            {
                result = Err(e.into());
                break;
            }
        }

        drop(node);
        self.add_tokens_stat(generated_total);
        result
    }

    /// Run `prompt` in a throwaway `ShareMode::None` child of `parent`
    /// and return its output. The parent is left untouched.
    pub fn eval_in_child(
        &self,
        parent: &ContextHandle<A>,
        prompt: &str,
        params: &CompletionParams,
    ) -> Result<String, EnvError> {
        let mut config = parent.node.lock().unwrap().config.clone();
        config.share_mode = crate::env::ShareMode::None;

        let child = self.spawn_child(parent, config)?;
        let result = child
            .set_prompt(prompt)
            .and_then(|_| self.complete_sync(&child, params));
        let _ = self.destroy(child.id());
        result
    }
}
