//! Deterministic in-memory model adapter.
//!
//! Vocabulary: token `i` detokenizes to byte `(i + 97) mod 256`, so token
//! 0 is `a` and tokenizing inverts the rotation losslessly. Tokens 256 and
//! 257 are the BOS/EOS specials. Logits after a decode are a fixed
//! function of the last decoded token with a clear argmax at its rotation
//! successor, so generation and top-k are fully reproducible. Samplers pop
//! from a shared script queue first and fall back to greedy argmax.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use weft_abi::{
    CompletionParams, DecodeBatch, ModelAdapter, ModelSession, Pos, Sampler, SeqId, SessionOpts,
    Token, TokenAttrs,
};

/// Number of byte-mapped tokens; the specials sit above them.
const BYTE_TOKENS: i32 = 256;
pub const BOS: Token = Token(BYTE_TOKENS);
pub const EOS: Token = Token(BYTE_TOKENS + 1);
const VOCAB_SIZE: usize = (BYTE_TOKENS + 2) as usize;

type Script = Arc<Mutex<VecDeque<Token>>>;

/// Shared-weights stand-in. Hand an `Arc<MockModel>` to everything that
/// would share one set of real weights.
#[derive(Debug, Default)]
pub struct MockModel {
    /// Tokens handed out by samplers before they fall back to argmax.
    script: Script,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue tokens for future samplers, drained in order across every
    /// session of this model.
    pub fn push_script(&self, tokens: &[Token]) {
        self.script.lock().unwrap().extend(tokens.iter().copied());
    }

    /// Remaining scripted tokens.
    pub fn script_len(&self) -> usize {
        self.script.lock().unwrap().len()
    }

    fn byte_for(token: Token) -> Option<u8> {
        if (0..BYTE_TOKENS).contains(&token.0) {
            Some(((token.0 + 97) % 256) as u8)
        } else {
            None
        }
    }

    fn token_for(byte: u8) -> Token {
        Token((byte as i32 - 97).rem_euclid(BYTE_TOKENS))
    }
}

impl ModelAdapter for MockModel {
    type Session = MockSession;

    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>, String> {
        let mut out = Vec::with_capacity(text.len() + usize::from(add_bos));
        if add_bos {
            out.push(BOS);
        }
        out.extend(text.bytes().map(Self::token_for));
        Ok(out)
    }

    fn detokenize_piece(&self, token: Token) -> Result<Vec<u8>, String> {
        if token == BOS || token == EOS {
            return Ok(Vec::new());
        }
        match Self::byte_for(token) {
            Some(b) => Ok(vec![b]),
            None => Err(format!("token {} outside vocabulary", token.0)),
        }
    }

    fn vocab_size(&self) -> usize {
        VOCAB_SIZE
    }

    fn token_attrs(&self, token: Token) -> TokenAttrs {
        if token == BOS || token == EOS {
            TokenAttrs {
                control: true,
                special: true,
            }
        } else {
            TokenAttrs::default()
        }
    }

    fn is_bos(&self, token: Token) -> bool {
        token == BOS
    }

    fn is_eog(&self, token: Token) -> bool {
        token == EOS
    }

    fn create_session(&self, opts: &SessionOpts) -> Result<Self::Session, String> {
        Ok(MockSession {
            seqs: HashMap::new(),
            logits: vec![0.0; VOCAB_SIZE],
            n_ctx: opts.n_ctx as usize,
            script: self.script.clone(),
        })
    }
}

/// One attention-cache stand-in: per-sequence decoded `(pos, token)`
/// lists plus the logits of the last slot that requested them.
#[derive(Debug)]
pub struct MockSession {
    seqs: HashMap<SeqId, Vec<(Pos, Token)>>,
    logits: Vec<f32>,
    n_ctx: usize,
    script: Script,
}

impl MockSession {
    /// Cached entries for `seq` (test hook).
    pub fn cached_len(&self, seq: SeqId) -> usize {
        self.seqs.get(&seq).map_or(0, Vec::len)
    }

    fn fill_logits(&mut self, last: Token) {
        // Deterministic spread with the argmax at the rotation successor.
        for (i, slot) in self.logits.iter_mut().enumerate() {
            *slot = ((last.0 as i64 * 31 + i as i64).rem_euclid(97)) as f32 / 97.0;
        }
        let next = (last.0 + 1).rem_euclid(BYTE_TOKENS) as usize;
        self.logits[next] = 2.0;
    }

    fn in_range(pos: Pos, start: Pos, end: Pos) -> bool {
        let lo = if start < 0 { Pos::MIN } else { start };
        let hi = if end < 0 { Pos::MAX } else { end };
        pos >= lo && pos < hi
    }
}

impl ModelSession for MockSession {
    fn cache_clear(&mut self) {
        self.seqs.clear();
    }

    fn cache_remove(&mut self, seq: SeqId, start: Pos, end: Pos) {
        if seq < 0 {
            for entries in self.seqs.values_mut() {
                entries.retain(|&(p, _)| !Self::in_range(p, start, end));
            }
        } else if let Some(entries) = self.seqs.get_mut(&seq) {
            entries.retain(|&(p, _)| !Self::in_range(p, start, end));
        }
    }

    fn cache_copy(&mut self, src: SeqId, dst: SeqId, start: Pos, end: Pos) {
        let copied: Vec<(Pos, Token)> = self
            .seqs
            .get(&src)
            .map(|entries| {
                entries
                    .iter()
                    .copied()
                    .filter(|&(p, _)| Self::in_range(p, start, end))
                    .collect()
            })
            .unwrap_or_default();
        self.seqs.entry(dst).or_default().extend(copied);
    }

    fn cache_shift(&mut self, seq: SeqId, start: Pos, end: Pos, delta: Pos) {
        if let Some(entries) = self.seqs.get_mut(&seq) {
            for (p, _) in entries.iter_mut() {
                if Self::in_range(*p, start, end) {
                    *p += delta;
                }
            }
        }
    }

    fn decode(&mut self, batch: &DecodeBatch) -> Result<(), String> {
        let mut logits_token = None;
        for (i, &tok) in batch.tokens().iter().enumerate() {
            let seq = batch.seq_ids()[i];
            let entries = self.seqs.entry(seq).or_default();
            if entries.len() + 1 > self.n_ctx {
                return Err(format!("kv cache full (n_ctx = {})", self.n_ctx));
            }
            entries.push((batch.positions()[i], tok));
            if batch.logits_mask()[i] {
                logits_token = Some(tok);
            }
        }
        if let Some(tok) = logits_token {
            self.fill_logits(tok);
        }
        Ok(())
    }

    fn logits(&self) -> &[f32] {
        &self.logits
    }

    fn state_size(&self) -> usize {
        let seqs: usize = self.seqs.values().map(|e| 8 + e.len() * 8).sum();
        4 + seqs + VOCAB_SIZE * 4
    }

    fn state_save(&self, buf: &mut [u8]) -> Result<usize, String> {
        let needed = self.state_size();
        if buf.len() < needed {
            return Err(format!("state buffer too small ({needed} bytes needed)"));
        }

        let mut ids: Vec<SeqId> = self.seqs.keys().copied().collect();
        ids.sort_unstable();

        let mut off = 0;
        put(buf, &mut off, &(ids.len() as u32).to_le_bytes());
        for id in ids {
            let entries = &self.seqs[&id];
            put(buf, &mut off, &id.to_le_bytes());
            put(buf, &mut off, &(entries.len() as u32).to_le_bytes());
            for &(p, t) in entries {
                put(buf, &mut off, &p.to_le_bytes());
                put(buf, &mut off, &t.0.to_le_bytes());
            }
        }
        for &l in &self.logits {
            put(buf, &mut off, &l.to_le_bytes());
        }
        Ok(off)
    }

    fn state_load(&mut self, buf: &[u8]) -> Result<(), String> {
        let mut off = 0;

        let n_seqs = take_u32(buf, &mut off)?;
        let mut seqs = HashMap::new();
        for _ in 0..n_seqs {
            let id = take_i32(buf, &mut off)?;
            let n = take_u32(buf, &mut off)?;
            let mut entries = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let p = take_i32(buf, &mut off)?;
                let t = take_i32(buf, &mut off)?;
                entries.push((p, Token(t)));
            }
            seqs.insert(id, entries);
        }
        let mut logits = Vec::with_capacity(VOCAB_SIZE);
        for _ in 0..VOCAB_SIZE {
            logits.push(f32::from_bits(take_u32(buf, &mut off)?));
        }

        self.seqs = seqs;
        self.logits = logits;
        Ok(())
    }

    fn make_sampler(&self, _params: &CompletionParams) -> Box<dyn Sampler> {
        Box::new(MockSampler {
            script: self.script.clone(),
        })
    }
}

fn put(buf: &mut [u8], off: &mut usize, bytes: &[u8]) {
    buf[*off..*off + bytes.len()].copy_from_slice(bytes);
    *off += bytes.len();
}

fn take_u32(buf: &[u8], off: &mut usize) -> Result<u32, String> {
    if *off + 4 > buf.len() {
        return Err("truncated state blob".into());
    }
    let v = u32::from_le_bytes(buf[*off..*off + 4].try_into().unwrap());
    *off += 4;
    Ok(v)
}

fn take_i32(buf: &[u8], off: &mut usize) -> Result<i32, String> {
    take_u32(buf, off).map(|v| v as i32)
}

/// Pops scripted tokens first; greedy argmax once the script is drained.
struct MockSampler {
    script: Script,
}

impl Sampler for MockSampler {
    fn sample(&mut self, logits: &[f32]) -> Token {
        if let Some(tok) = self.script.lock().unwrap().pop_front() {
            return tok;
        }
        let mut best = 0usize;
        let mut best_v = f32::NEG_INFINITY;
        for (i, &v) in logits.iter().enumerate() {
            if v > best_v {
                best_v = v;
                best = i;
            }
        }
        Token(best as i32)
    }

    fn accept(&mut self, _token: Token) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_round_trips_all_bytes() {
        let model = MockModel::new();
        let text = "Hello, weft! \u{1F9F5}";
        let tokens = model.tokenize(text, false).unwrap();
        let mut bytes = Vec::new();
        for t in tokens {
            bytes.extend(model.detokenize_piece(t).unwrap());
        }
        assert_eq!(String::from_utf8(bytes).unwrap(), text);
    }

    #[test]
    fn token_zero_is_lowercase_a() {
        let model = MockModel::new();
        assert_eq!(model.detokenize_piece(Token(0)).unwrap(), b"a");
        assert_eq!(model.tokenize("a", false).unwrap(), vec![Token(0)]);
    }

    #[test]
    fn decode_sets_argmax_at_successor() {
        let model = MockModel::new();
        let mut sess = model.create_session(&SessionOpts::default()).unwrap();
        let mut batch = DecodeBatch::with_capacity(1);
        batch.add(Token(4), 0, 0, true);
        sess.decode(&batch).unwrap();

        let logits = sess.logits();
        let best = (0..logits.len())
            .max_by(|&a, &b| logits[a].total_cmp(&logits[b]))
            .unwrap();
        assert_eq!(best, 5);
    }

    #[test]
    fn state_round_trips() {
        let model = MockModel::new();
        let mut sess = model.create_session(&SessionOpts::default()).unwrap();
        let mut batch = DecodeBatch::with_capacity(3);
        for (i, t) in [7, 8, 9].into_iter().enumerate() {
            batch.add(Token(t), i as Pos, 0, false);
        }
        batch.mark_last_for_logits();
        sess.decode(&batch).unwrap();

        let mut blob = vec![0u8; sess.state_size()];
        let n = sess.state_save(&mut blob).unwrap();
        assert_eq!(n, blob.len());

        let mut other = model.create_session(&SessionOpts::default()).unwrap();
        other.state_load(&blob).unwrap();
        assert_eq!(other.cached_len(0), 3);
        assert_eq!(other.logits(), sess.logits());
    }

    #[test]
    fn decode_rejects_past_capacity() {
        let model = MockModel::new();
        let mut sess = model
            .create_session(&SessionOpts {
                n_ctx: 2,
                ..SessionOpts::default()
            })
            .unwrap();
        let mut batch = DecodeBatch::with_capacity(3);
        for i in 0..3 {
            batch.add(Token(i), i, 0, false);
        }
        assert!(sess.decode(&batch).is_err());
    }
}
