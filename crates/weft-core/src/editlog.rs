//! Linear undo history with a redo stack.

use std::collections::VecDeque;

use weft_abi::{Pos, SeqId, Token};

use crate::buffer::TokenRange;

/// Default bound on retained history entries. 0 means unbounded.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// One committed mutation, carrying exactly what is needed to invert it.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOp {
    /// Tokens were inserted at `at`; undo deletes `[at, at + tokens.len())`.
    Insert {
        at: Pos,
        seq_id: SeqId,
        tokens: Vec<Token>,
    },
    /// `tokens` were removed from `range`; undo re-inserts them at
    /// `range.start`.
    Delete {
        range: TokenRange,
        tokens: Vec<Token>,
    },
    /// `old` at `range` became `new`. Both payloads are kept so undo and
    /// redo are exact inverses.
    Replace {
        range: TokenRange,
        old: Vec<Token>,
        new: Vec<Token>,
    },
}

/// Chronological history + LIFO redo stack.
///
/// Recording is suspended while the editor replays ops, so undo/redo do
/// not spawn new entries.
#[derive(Debug)]
pub struct EditLog {
    history: VecDeque<EditOp>,
    redo: Vec<EditOp>,
    limit: usize,
    suppress: bool,
}

impl Default for EditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EditLog {
    pub fn new() -> Self {
        Self {
            history: VecDeque::new(),
            redo: Vec::new(),
            limit: DEFAULT_HISTORY_LIMIT,
            suppress: false,
        }
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Set the history bound (0 = unbounded). Takes effect on the next
    /// record.
    #[inline]
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    #[inline]
    pub fn suppressed(&self) -> bool {
        self.suppress
    }

    #[inline]
    pub fn set_suppressed(&mut self, suppress: bool) {
        self.suppress = suppress;
    }

    /// Commit an op: append to history, drop the redo stack, trim the
    /// oldest entries past the limit. No-op while suppressed.
    pub fn record(&mut self, op: EditOp) {
        if self.suppress {
            return;
        }
        self.history.push_back(op);
        self.redo.clear();
        self.trim();
    }

    /// Move the newest history entry out (undo path).
    #[inline]
    pub fn pop_history(&mut self) -> Option<EditOp> {
        self.history.pop_back()
    }

    /// Return an op to history without touching the redo stack (redo
    /// path, or undo rollback).
    pub fn restore_to_history(&mut self, op: EditOp) {
        self.history.push_back(op);
        self.trim();
    }

    #[inline]
    pub fn push_redo(&mut self, op: EditOp) {
        self.redo.push(op);
    }

    #[inline]
    pub fn pop_redo(&mut self) -> Option<EditOp> {
        self.redo.pop()
    }

    #[inline]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    #[inline]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Drop both history and redo stack.
    pub fn clear(&mut self) {
        self.history.clear();
        self.redo.clear();
    }

    fn trim(&mut self) {
        if self.limit == 0 {
            return;
        }
        while self.history.len() > self.limit {
            self.history.pop_front();
        }
    }
}
