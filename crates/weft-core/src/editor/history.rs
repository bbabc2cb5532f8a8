// Undo/redo replay. The log is suppressed while an op is replayed so the
// replaying mutators do not record fresh entries.

use weft_abi::{ModelAdapter, Pos};

use super::TokenEditor;
use crate::buffer::TokenRange;
use crate::editlog::EditOp;
use crate::error::EditError;

impl<A: ModelAdapter> TokenEditor<A> {
    /// Reverse the most recent committed edit. Returns `false` when the
    /// history is empty.
    pub fn undo(&mut self) -> Result<bool, EditError> {
        let Some(op) = self.log.pop_history() else {
            return Ok(false);
        };

        let was = self.log.suppressed();
        self.log.set_suppressed(true);
        let result = match &op {
            EditOp::Insert { at, seq_id, tokens } => self.delete_tokens(TokenRange::with_seq(
                *at,
                *at + tokens.len() as Pos,
                *seq_id,
            )),
            EditOp::Delete { range, tokens } => {
                self.insert_tokens(range.start, range.seq_id, tokens)
            }
            EditOp::Replace { range, old, new } => {
                // The buffer currently holds `new` where `old` used to be.
                let current = TokenRange::with_seq(
                    range.start,
                    range.start + new.len() as Pos,
                    range.seq_id,
                );
                self.replace_tokens(current, old)
            }
        };
        self.log.set_suppressed(was);

        match result {
            Ok(()) => {
                self.log.push_redo(op);
                Ok(true)
            }
            Err(e) => {
                self.log.restore_to_history(op);
                Err(e)
            }
        }
    }

    /// Re-apply the most recently undone edit. Returns `false` when the
    /// redo stack is empty.
    pub fn redo(&mut self) -> Result<bool, EditError> {
        let Some(op) = self.log.pop_redo() else {
            return Ok(false);
        };

        let was = self.log.suppressed();
        self.log.set_suppressed(true);
        let result = match &op {
            EditOp::Insert { at, seq_id, tokens } => self.insert_tokens(*at, *seq_id, tokens),
            EditOp::Delete { range, .. } => self.delete_tokens(*range),
            EditOp::Replace { range, old, new } => {
                // Undo put `old` back; swap in `new` again.
                let current = TokenRange::with_seq(
                    range.start,
                    range.start + old.len() as Pos,
                    range.seq_id,
                );
                self.replace_tokens(current, new)
            }
        };
        self.log.set_suppressed(was);

        match result {
            Ok(()) => {
                self.log.restore_to_history(op);
                Ok(true)
            }
            Err(e) => {
                self.log.push_redo(op);
                Err(e)
            }
        }
    }
}
