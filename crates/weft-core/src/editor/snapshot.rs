// Point-in-time capture of buffer + metadata + serialized session state.

use weft_abi::{ModelAdapter, ModelSession, Token, TokenInfo};

use super::TokenEditor;
use crate::error::EditError;

/// Deep copy of an editor's observable state. Restoring re-establishes
/// both the token stream and the attention cache; undo/redo history is
/// not part of a snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    tokens: Vec<Token>,
    info: Vec<TokenInfo>,
    state: Option<Vec<u8>>,
}

impl Snapshot {
    #[inline]
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the session state blob was captured.
    #[inline]
    pub fn has_state(&self) -> bool {
        self.state.is_some()
    }
}

impl<A: ModelAdapter> TokenEditor<A> {
    /// Capture tokens, metadata, and the session's opaque state blob. A
    /// failed state save degrades to a tokens-only snapshot.
    pub fn create_snapshot(&self) -> Snapshot {
        Snapshot {
            tokens: self.buffer.tokens().to_vec(),
            info: self.buffer.info().to_vec(),
            state: self.save_session_state(),
        }
    }

    /// Overwrite the buffer from `snapshot` and replay its state blob into
    /// the session. With a blob the editor comes back coherent; without
    /// one it comes back dirty and re-decodes on the next coherence point.
    pub fn restore_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), EditError> {
        self.buffer.overwrite_all(&snapshot.tokens, &snapshot.info)?;
        match &snapshot.state {
            Some(blob) => {
                self.session
                    .state_load(blob)
                    .map_err(EditError::KvCacheFull)?;
                self.buffer.mark_clean(true);
            }
            None => self.buffer.mark_dirty(),
        }
        Ok(())
    }

    pub(crate) fn save_session_state(&self) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; self.session.state_size()];
        match self.session.state_save(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Some(buf)
            }
            Err(_) => None,
        }
    }
}
