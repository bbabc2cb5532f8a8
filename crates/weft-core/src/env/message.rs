//! Inter-context messaging: bounded per-node mailboxes, FIFO per sender.

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use weft_abi::{ModelAdapter, Token};

use crate::env::node::CtxId;
use crate::env::{ContextHandle, Environment};
use crate::error::EnvError;

/// Mailbox slot count. The ring discipline keeps one slot open, so at
/// most `MAILBOX_CAPACITY - 1` messages are resident.
pub const MAILBOX_CAPACITY: usize = 32;

/// Polling interval while a receiver waits on an empty mailbox.
const RECV_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Tokens,
    Text,
    Completion,
    Embedding,
    Control,
    Query,
    Response,
}

/// A message delivered to one node. `data` is copied on send; receiving
/// hands ownership to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub sender: CtxId,
    pub receiver: CtxId,
    pub seq_num: u32,
    pub data: Vec<u8>,
}

impl Message {
    /// Interpret `data` as UTF-8 text.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Interpret `data` as a little-endian token stream.
    pub fn as_tokens(&self) -> Option<Vec<Token>> {
        if self.data.len() % 4 != 0 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|c| Token(i32::from_le_bytes(c.try_into().unwrap())))
                .collect(),
        )
    }

    pub(crate) fn encode_tokens(tokens: &[Token]) -> Vec<u8> {
        let mut out = Vec::with_capacity(tokens.len() * 4);
        for t in tokens {
            out.extend_from_slice(&t.0.to_le_bytes());
        }
        out
    }
}

/// Bounded FIFO mailbox.
#[derive(Debug)]
pub struct Mailbox {
    queue: VecDeque<Message>,
    capacity: usize,
}

impl Mailbox {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Enqueue; hands the message back when the ring is full.
    pub(crate) fn push(&mut self, msg: Message) -> Result<(), Message> {
        if self.queue.len() + 1 >= self.capacity {
            return Err(msg);
        }
        self.queue.push_back(msg);
        Ok(())
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    #[inline]
    pub(crate) fn back(&self) -> Option<&Message> {
        self.queue.back()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

impl<A: ModelAdapter> Environment<A> {
    /// Deliver a message into `to`'s mailbox, copying `data`. Fails with
    /// `Memory` when the ring is full. Delivery is FIFO per sender.
    pub fn send_message(
        &self,
        from: &ContextHandle<A>,
        to: &ContextHandle<A>,
        kind: MessageKind,
        data: &[u8],
    ) -> Result<(), EnvError> {
        if from.id == to.id {
            let mut node = from.node.lock().unwrap();
            let seq_num = node.next_msg_seq;
            node.next_msg_seq += 1;
            let msg = Message {
                kind,
                sender: from.id,
                receiver: to.id,
                seq_num,
                data: data.to_vec(),
            };
            node.mailbox.push(msg).map_err(|_| EnvError::Memory)?;
            let delivered = node.mailbox.back().cloned();
            if let (Some(cb), Some(msg)) = (node.on_message.as_mut(), delivered.as_ref()) {
                cb(msg);
            }
            return Ok(());
        }

        let seq_num = {
            let mut sender = from.node.lock().unwrap();
            let s = sender.next_msg_seq;
            sender.next_msg_seq += 1;
            s
        };
        let msg = Message {
            kind,
            sender: from.id,
            receiver: to.id,
            seq_num,
            data: data.to_vec(),
        };

        let mut node = to.node.lock().unwrap();
        node.mailbox.push(msg).map_err(|_| EnvError::Memory)?;
        let delivered = node.mailbox.back().cloned();
        if let (Some(cb), Some(msg)) = (node.on_message.as_mut(), delivered.as_ref()) {
            cb(msg);
        }
        Ok(())
    }

    pub fn send_tokens(
        &self,
        from: &ContextHandle<A>,
        to: &ContextHandle<A>,
        tokens: &[Token],
    ) -> Result<(), EnvError> {
        self.send_message(from, to, MessageKind::Tokens, &Message::encode_tokens(tokens))
    }

    pub fn send_text(
        &self,
        from: &ContextHandle<A>,
        to: &ContextHandle<A>,
        text: &str,
    ) -> Result<(), EnvError> {
        self.send_message(from, to, MessageKind::Text, text.as_bytes())
    }

    /// Blocking receive with fine-grained polling. `timeout_ms == 0` waits
    /// indefinitely.
    pub fn recv_message(
        &self,
        ctx: &ContextHandle<A>,
        timeout_ms: u32,
    ) -> Result<Message, EnvError> {
        let start = Instant::now();
        loop {
            if let Some(msg) = ctx.node.lock().unwrap().mailbox.pop() {
                return Ok(msg);
            }
            if timeout_ms > 0 && start.elapsed() >= Duration::from_millis(timeout_ms as u64) {
                return Err(EnvError::Timeout);
            }
            thread::sleep(RECV_POLL);
        }
    }

    /// Non-blocking pending check.
    pub fn has_messages(&self, ctx: &ContextHandle<A>) -> bool {
        !ctx.node.lock().unwrap().mailbox.is_empty()
    }

    /// Messages currently queued for `ctx`.
    pub fn message_count(&self, ctx: &ContextHandle<A>) -> usize {
        ctx.node.lock().unwrap().mailbox.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: u32) -> Message {
        Message {
            kind: MessageKind::Control,
            sender: CtxId(0),
            receiver: CtxId(1),
            seq_num: n,
            data: Vec::new(),
        }
    }

    #[test]
    fn mailbox_keeps_one_slot_open() {
        let mut mb = Mailbox::new(4);
        assert!(mb.push(msg(0)).is_ok());
        assert!(mb.push(msg(1)).is_ok());
        assert!(mb.push(msg(2)).is_ok());
        // Fourth slot is the open one.
        assert!(mb.push(msg(3)).is_err());
        assert_eq!(mb.len(), 3);
    }

    #[test]
    fn mailbox_is_fifo() {
        let mut mb = Mailbox::new(8);
        for n in 0..3 {
            mb.push(msg(n)).unwrap();
        }
        assert_eq!(mb.pop().unwrap().seq_num, 0);
        assert_eq!(mb.pop().unwrap().seq_num, 1);
        assert_eq!(mb.pop().unwrap().seq_num, 2);
        assert!(mb.pop().is_none());
    }

    #[test]
    fn tokens_round_trip_through_data() {
        let toks = vec![Token(5), Token(-1), Token(70000)];
        let mut m = msg(0);
        m.data = Message::encode_tokens(&toks);
        assert_eq!(m.as_tokens().unwrap(), toks);
    }
}
