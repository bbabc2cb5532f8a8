// End-to-end editor behavior against the mock backend: edit semantics,
// undo/redo, snapshots, search, top-k, and the wire formats.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{editor, editor_with_opts, model};
use weft_abi::{SessionOpts, Token, TokenFlags};
use weft_core::{EditError, TokenRange};

fn toks(ids: &[i32]) -> Vec<Token> {
    ids.iter().map(|&i| Token(i)).collect()
}

#[test]
fn insert_and_detokenize() {
    let mut ed = editor();
    ed.insert_tokens(0, 0, &toks(&[0, 1, 2])).unwrap();
    assert_eq!(ed.text().unwrap(), "abc");
    assert_eq!(ed.get_token_count(0), 3);
    assert!(ed.is_dirty());
}

#[test]
fn edit_undo_redo_walkthrough() {
    // The full scenario chain: insert, mid-insert, undo, redo, delete.
    let mut ed = editor();
    ed.insert_tokens(0, 0, &toks(&[0, 1, 2])).unwrap();
    assert_eq!(ed.text().unwrap(), "abc");

    ed.insert_tokens(1, 0, &toks(&[7, 7])).unwrap();
    assert_eq!(ed.text().unwrap(), "ahhbc");

    assert!(ed.undo().unwrap());
    assert_eq!(ed.text().unwrap(), "abc");

    assert!(ed.redo().unwrap());
    assert_eq!(ed.text().unwrap(), "ahhbc");

    ed.delete_tokens(TokenRange::new(1, 3)).unwrap();
    assert_eq!(ed.text().unwrap(), "abc");
}

#[test]
fn undo_is_an_exact_inverse() {
    let cases: Vec<Box<dyn Fn(&mut weft_core::TokenEditor<weft_mock::MockModel>)>> = vec![
        Box::new(|ed| ed.insert_tokens(2, 0, &toks(&[9, 9])).unwrap()),
        Box::new(|ed| ed.delete_tokens(TokenRange::new(1, 3)).unwrap()),
        Box::new(|ed| {
            ed.replace_tokens(TokenRange::new(1, 3), &toks(&[20, 21, 22]))
                .unwrap()
        }),
        Box::new(|ed| ed.set_token(0, 0, Token(12)).unwrap()),
        Box::new(|ed| ed.clear(0).unwrap()),
    ];

    for apply in cases {
        let mut ed = editor();
        ed.insert_tokens(0, 0, &toks(&[0, 1, 2, 3])).unwrap();
        let before = ed.get_tokens(TokenRange::new(0, 10));

        apply(&mut ed);
        let after = ed.get_tokens(TokenRange::new(0, 10));

        assert!(ed.undo().unwrap());
        assert_eq!(ed.get_tokens(TokenRange::new(0, 10)), before);

        assert!(ed.redo().unwrap());
        assert_eq!(ed.get_tokens(TokenRange::new(0, 10)), after);
    }
}

#[test]
fn repeated_undo_redo_does_not_oscillate() {
    // Replace records both payloads, so undo/redo cycles are stable.
    let mut ed = editor();
    ed.insert_tokens(0, 0, &toks(&[0, 1, 2])).unwrap();
    ed.replace_tokens(TokenRange::new(0, 2), &toks(&[5])).unwrap();
    let replaced = ed.get_tokens(TokenRange::new(0, 10));
    assert_eq!(replaced, toks(&[5, 2]));

    for _ in 0..3 {
        ed.undo().unwrap();
        assert_eq!(ed.get_tokens(TokenRange::new(0, 10)), toks(&[0, 1, 2]));
        ed.redo().unwrap();
        assert_eq!(ed.get_tokens(TokenRange::new(0, 10)), replaced);
    }
}

#[test]
fn undo_redo_stack_accounting() {
    let mut ed = editor();
    assert_eq!(ed.history_len(), 0);

    ed.insert_tokens(0, 0, &toks(&[1])).unwrap();
    ed.insert_tokens(1, 0, &toks(&[2])).unwrap();
    assert_eq!((ed.history_len(), ed.redo_len()), (2, 0));

    ed.undo().unwrap();
    assert_eq!((ed.history_len(), ed.redo_len()), (1, 1));

    ed.redo().unwrap();
    assert_eq!((ed.history_len(), ed.redo_len()), (2, 0));

    ed.undo().unwrap();
    // A fresh mutation empties the redo stack.
    ed.insert_tokens(0, 0, &toks(&[3])).unwrap();
    assert_eq!((ed.history_len(), ed.redo_len()), (2, 0));

    // Undo/redo on empty stacks are quiet no-ops.
    let mut fresh = editor();
    assert!(!fresh.undo().unwrap());
    assert!(!fresh.redo().unwrap());
}

#[test]
fn history_limit_keeps_most_recent() {
    let mut ed = editor();
    ed.set_history_limit(3);
    for i in 0..5 {
        ed.insert_tokens(i, 0, &toks(&[i])).unwrap();
    }
    assert_eq!(ed.history_len(), 3);

    // Only the three newest edits can be unwound.
    assert!(ed.undo().unwrap());
    assert!(ed.undo().unwrap());
    assert!(ed.undo().unwrap());
    assert!(!ed.undo().unwrap());
    assert_eq!(ed.get_tokens(TokenRange::new(0, 10)), toks(&[0, 1]));
}

#[test]
fn insert_then_delete_restores_buffer_and_flags() {
    let mut ed = editor();
    ed.insert_tokens(0, 0, &toks(&[0, 1, 2, 3])).unwrap();
    let before: Vec<_> = (0..4).map(|p| ed.get_token_info(p, 0).unwrap()).collect();

    ed.insert_tokens(2, 0, &toks(&[30, 31, 32])).unwrap();
    ed.delete_tokens(TokenRange::new(2, 5)).unwrap();

    let after: Vec<_> = (0..4).map(|p| ed.get_token_info(p, 0).unwrap()).collect();
    assert_eq!(before, after);
}

#[test]
fn reads_clamp_and_bounds_check() {
    let mut ed = editor();
    ed.insert_tokens(0, 0, &toks(&[4, 5, 6])).unwrap();

    assert_eq!(ed.get_token(1, 0), Some(Token(5)));
    assert_eq!(ed.get_token(-1, 0), None);
    assert_eq!(ed.get_token(3, 0), None);

    assert!(matches!(
        ed.get_token_info(3, 0),
        Err(EditError::InvalidPosition { pos: 3, len: 3 })
    ));

    // Negative start clamps to 0, end clamps to len.
    assert_eq!(ed.get_tokens(TokenRange::new(-5, 99)), toks(&[4, 5, 6]));
    assert!(ed.get_tokens(TokenRange::new(2, 1)).is_empty());

    // Deleting an empty or fully out-of-range span is a no-op success.
    ed.delete_tokens(TokenRange::new(10, 20)).unwrap();
    assert_eq!(ed.get_token_count(0), 3);
}

#[test]
fn insert_position_is_validated() {
    let mut ed = editor();
    ed.insert_tokens(0, 0, &toks(&[1])).unwrap();
    assert!(matches!(
        ed.insert_tokens(5, 0, &toks(&[2])),
        Err(EditError::InvalidPosition { .. })
    ));
    // Appending exactly at len is allowed; an empty payload is a no-op.
    ed.insert_tokens(1, 0, &toks(&[2])).unwrap();
    ed.insert_tokens(0, 0, &[]).unwrap();
    assert_eq!(ed.history_len(), 2);
}

#[test]
fn readonly_blocks_every_mutator() {
    let mut ed = editor();
    ed.insert_tokens(0, 0, &toks(&[1, 2])).unwrap();
    ed.set_readonly(true);

    assert_eq!(ed.insert_tokens(0, 0, &toks(&[3])), Err(EditError::Readonly));
    assert_eq!(ed.set_token(0, 0, Token(3)), Err(EditError::Readonly));
    assert_eq!(
        ed.delete_tokens(TokenRange::new(0, 1)),
        Err(EditError::Readonly)
    );
    assert_eq!(
        ed.replace_tokens(TokenRange::new(0, 1), &toks(&[3])),
        Err(EditError::Readonly)
    );
    assert_eq!(ed.clear(0), Err(EditError::Readonly));

    // Reads still work.
    assert_eq!(ed.get_token(0, 0), Some(Token(1)));

    ed.set_readonly(false);
    ed.set_token(0, 0, Token(3)).unwrap();
}

#[test]
fn capacity_doubles_from_the_floor() {
    let mut ed = editor();
    assert_eq!(ed.capacity(), 4096);

    let many: Vec<Token> = (0..5000).map(|i| Token(i % 256)).collect();
    ed.insert_tokens(0, 0, &many).unwrap();
    let n = ed.get_token_count(0);
    assert!(ed.capacity() >= n);
    assert!(ed.capacity() < 2 * n);
    assert_eq!(ed.capacity(), 8192);
}

#[test]
fn replace_text_tokenizes_then_replaces() {
    let mut ed = editor();
    ed.insert_tokens(0, 0, &toks(&[0, 1, 2])).unwrap();
    ed.replace_text(TokenRange::new(1, 2), "zz").unwrap();
    assert_eq!(ed.text().unwrap(), "azzc");

    ed.undo().unwrap();
    assert_eq!(ed.text().unwrap(), "abc");
}

#[test]
fn prompt_helpers_round_trip() {
    let mut ed = editor();
    ed.set_prompt("ab").unwrap();
    // BOS + two bytes; BOS renders as nothing.
    assert_eq!(ed.get_token_count(0), 3);
    assert_eq!(ed.text().unwrap(), "ab");
    let info = ed.get_token_info(0, 0).unwrap();
    assert!(info.flags.contains(TokenFlags::BOS));
    assert!(info.flags.contains(TokenFlags::USER_DATA));

    ed.append_prompt("c").unwrap();
    assert_eq!(ed.text().unwrap(), "abc");

    // set_prompt replaces wholesale.
    ed.set_prompt("xy").unwrap();
    assert_eq!(ed.text().unwrap(), "xy");
}

#[test]
fn tokenize_detokenize_round_trips() {
    let ed = editor();
    for text in ["", "hello", "Hello, world!", "line\nbreaks\tand спец"] {
        let tokens = ed.tokenize(text, false).unwrap();
        assert_eq!(ed.detokenize(&tokens).unwrap(), text);
    }
}

#[test]
fn search_by_token_and_text() {
    let mut ed = editor();
    // "abcabc"
    ed.insert_tokens(0, 0, &toks(&[0, 1, 2, 0, 1, 2])).unwrap();

    assert_eq!(ed.find_token(Token(1)), vec![1, 4]);
    assert!(ed.find_token(Token(9)).is_empty());

    assert_eq!(ed.find_text("bc").unwrap(), vec![1, 4]);
    assert_eq!(ed.find_text("abcabc").unwrap(), vec![0]);
    assert!(ed.find_text("zz").unwrap().is_empty());
    assert!(ed.find_text("").unwrap().is_empty());
}

#[test]
fn callbacks_observe_edits() {
    let mut ed = editor();
    ed.insert_tokens(0, 0, &toks(&[0, 1, 2])).unwrap();

    let token_changes = Arc::new(AtomicUsize::new(0));
    let range_changes = Arc::new(AtomicUsize::new(0));
    let tc = token_changes.clone();
    let rc = range_changes.clone();
    ed.set_on_token_change(Some(Box::new(move |pos, old, new| {
        assert_eq!((pos, old, new), (1, Token(1), Token(9)));
        tc.fetch_add(1, Ordering::SeqCst);
    })));
    ed.set_on_range_change(Some(Box::new(move |_range| {
        rc.fetch_add(1, Ordering::SeqCst);
    })));

    ed.set_token(1, 0, Token(9)).unwrap();
    ed.insert_tokens(0, 0, &toks(&[5])).unwrap();
    ed.delete_tokens(TokenRange::new(0, 1)).unwrap();

    assert_eq!(token_changes.load(Ordering::SeqCst), 1);
    assert_eq!(range_changes.load(Ordering::SeqCst), 2);
}

#[test]
fn top_k_is_sorted_and_deterministic() {
    let mut ed = editor();
    ed.insert_tokens(0, 0, &toks(&[0, 1, 2])).unwrap();

    let top = ed.get_top_k(2, 0, 5).unwrap();
    assert_eq!(top.len(), 5);
    // The mock puts the argmax at the successor of the last decoded token.
    assert_eq!(top[0].id, Token(3));
    assert!((top[0].logit - 2.0).abs() < f32::EPSILON);
    for pair in top.windows(2) {
        assert!(pair[0].logit >= pair[1].logit);
    }
    for info in &top {
        assert!(info.has_logit);
        assert_eq!(info.prob, 0.0);
    }

    // Reaching the coherence point cleared the dirty flag.
    assert!(!ed.is_dirty());
    assert!(ed.logits_valid());

    assert!((ed.token_logit(2, 0, Token(3)).unwrap() - 2.0).abs() < f32::EPSILON);
    assert_eq!(ed.token_logit(2, 0, Token(-4)), Err(EditError::InvalidToken));
}

#[test]
fn decode_failure_surfaces_and_leaves_editor_dirty() {
    let model = model();
    let mut ed = editor_with_opts(
        &model,
        &SessionOpts {
            n_ctx: 2,
            ..SessionOpts::default()
        },
    );
    ed.insert_tokens(0, 0, &toks(&[0, 1, 2])).unwrap();

    assert!(matches!(
        ed.get_top_k(0, 0, 1),
        Err(EditError::KvCacheFull(_))
    ));
    assert!(ed.is_dirty());
    // The buffer itself is intact.
    assert_eq!(ed.get_token_count(0), 3);
}

#[test]
fn snapshot_restores_tokens_and_distribution() {
    let mut ed = editor();
    ed.insert_tokens(0, 0, &toks(&[0, 1, 2])).unwrap();
    let top_before = ed.get_top_k(2, 0, 4).unwrap();

    let snapshot = ed.create_snapshot();
    assert!(snapshot.has_state());
    assert_eq!(snapshot.token_count(), 3);

    ed.insert_tokens(3, 0, &toks(&[40, 41])).unwrap();
    ed.get_top_k(4, 0, 1).unwrap();

    ed.restore_snapshot(&snapshot).unwrap();
    assert_eq!(ed.text().unwrap(), "abc");
    assert!(!ed.is_dirty());
    assert!(ed.logits_valid());
    // Same distribution as before the mutation, with no re-decode.
    assert_eq!(ed.get_top_k(2, 0, 4).unwrap(), top_before);
}

#[test]
fn snapshot_leaves_history_alone() {
    let mut ed = editor();
    ed.insert_tokens(0, 0, &toks(&[1, 2])).unwrap();
    let snapshot = ed.create_snapshot();
    ed.insert_tokens(2, 0, &toks(&[3])).unwrap();
    assert_eq!(ed.history_len(), 2);

    ed.restore_snapshot(&snapshot).unwrap();
    assert_eq!(ed.history_len(), 2);
}

#[test]
fn export_binary_layout() {
    let mut ed = editor();
    assert_eq!(ed.export_binary(), vec![0, 0, 0, 0]);

    ed.insert_tokens(0, 0, &toks(&[5])).unwrap();
    assert_eq!(ed.export_binary(), vec![1, 0, 0, 0, 5, 0, 0, 0]);
}

#[test]
fn export_json_is_a_bare_token_array() {
    let mut ed = editor();
    assert_eq!(ed.export_json(), r#"{"tokens":[]}"#);
    ed.insert_tokens(0, 0, &toks(&[0, 1, 2])).unwrap();
    assert_eq!(ed.export_json(), r#"{"tokens":[0,1,2]}"#);
}

#[test]
fn binary_round_trip_recomputes_flags() {
    let model = model();
    let mut src = common::editor_for(&model);
    src.insert_tokens(0, 0, &toks(&[0, 1, 2])).unwrap();
    let blob = src.export_binary();

    let mut dst = common::editor_for(&model);
    dst.insert_tokens(0, 0, &toks(&[9, 9, 9, 9])).unwrap();
    dst.import_binary(&blob).unwrap();

    assert_eq!(dst.text().unwrap(), "abc");
    assert!(dst.is_dirty());
    let info = dst.get_token_info(0, 0).unwrap();
    assert_eq!(info.id, Token(0));
    assert!(!info.flags.contains(TokenFlags::USER_DATA));
}

#[test]
fn binary_import_rejects_truncation() {
    let mut ed = editor();
    assert_eq!(ed.import_binary(&[1, 0]), Err(EditError::BufferTooSmall));
    // Count claims more payload than provided.
    assert_eq!(
        ed.import_binary(&[2, 0, 0, 0, 5, 0, 0, 0]),
        Err(EditError::BufferTooSmall)
    );
    assert_eq!(ed.get_token_count(0), 0);
}

#[test]
fn sequences_create_copy_delete() {
    let mut ed = editor();
    assert_eq!(ed.active_sequences(), &[0]);

    let s1 = ed.create_sequence();
    assert_eq!(s1, 1);
    let s2 = ed.fork_sequence(0).unwrap();
    assert_eq!(s2, 2);
    assert_eq!(ed.active_sequences(), &[0, 1, 2]);

    ed.delete_sequence(s1).unwrap();
    assert_eq!(
        ed.delete_sequence(s1),
        Err(EditError::SequenceNotFound(s1))
    );
    assert_eq!(ed.active_sequences(), &[0, 2]);
}

#[test]
fn cache_coordination_flags() {
    let mut ed = editor();
    ed.insert_tokens(0, 0, &toks(&[0, 1, 2])).unwrap();

    // Sync is idempotent once clean.
    ed.sync_kv_cache().unwrap();
    assert!(!ed.is_dirty());
    assert!(ed.logits_valid());
    ed.sync_kv_cache().unwrap();

    ed.invalidate_kv_range(TokenRange::new(1, 2));
    assert!(ed.is_dirty());
    assert!(!ed.logits_valid());
    ed.sync_kv_cache().unwrap();

    ed.clear_kv_cache(-1);
    assert!(ed.is_dirty());
    ed.compute_logits().unwrap();
    assert!(ed.logits_valid());

    // Positional shift delegates without invalidating the buffer.
    ed.shift_kv_cache(0, -1);
    assert!(!ed.is_dirty());

    // Syncing an empty buffer leaves logits invalid.
    let mut empty = editor();
    empty.clear_kv_cache(-1);
    empty.sync_kv_cache().unwrap();
    assert!(!empty.is_dirty());
    assert!(!empty.logits_valid());
}

#[test]
fn clear_history_drops_both_stacks() {
    let mut ed = editor();
    ed.insert_tokens(0, 0, &toks(&[1])).unwrap();
    ed.undo().unwrap();
    assert_eq!((ed.history_len(), ed.redo_len()), (0, 1));

    ed.insert_tokens(0, 0, &toks(&[2])).unwrap();
    ed.clear_history();
    assert_eq!((ed.history_len(), ed.redo_len()), (0, 0));
    // The buffer is untouched.
    assert_eq!(ed.get_token_count(0), 1);
}
