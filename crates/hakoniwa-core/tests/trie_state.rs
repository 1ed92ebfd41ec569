//! どこで: trie結合テスト / 何を: checkpoint境界と履歴root参照 / なぜ: revertの土台となる性質を固定するため

use hakoniwa_core::trie::{ordered_index_root, Trie, EMPTY_ROOT};
use hakoniwa_db::stable_state::init_stable_state;

#[test]
fn empty_trie_has_canonical_empty_root() {
    init_stable_state(1);
    let trie = Trie::new();
    assert_eq!(trie.root(), EMPTY_ROOT);
}

#[test]
fn put_get_del_roundtrip() {
    init_stable_state(1);
    let mut trie = Trie::new();
    trie.put(b"alpha", b"one");
    trie.put(b"beta", b"two");
    assert_eq!(trie.get(b"alpha").as_deref(), Some(&b"one"[..]));
    assert_eq!(trie.get(b"beta").as_deref(), Some(&b"two"[..]));
    assert_eq!(trie.get(b"gamma"), None);

    trie.del(b"alpha");
    assert_eq!(trie.get(b"alpha"), None);
    assert_eq!(trie.get(b"beta").as_deref(), Some(&b"two"[..]));
}

#[test]
fn same_operations_reach_same_root() {
    init_stable_state(1);
    let mut first = Trie::new();
    first.put(b"k1", b"v1");
    first.put(b"k2", b"v2");
    first.put(b"k3", b"v3");

    let mut second = Trie::new();
    // 挿入順が違っても最終内容が同じならrootは一致する
    second.put(b"k3", b"v3");
    second.put(b"k1", b"v1");
    second.put(b"k2", b"v2");

    assert_eq!(first.root(), second.root());
    assert_ne!(first.root(), EMPTY_ROOT);
}

#[test]
fn revert_restores_checkpoint_entry_root() {
    init_stable_state(1);
    let mut trie = Trie::new();
    trie.put(b"base", b"committed");
    let base_root = trie.root();

    trie.checkpoint();
    trie.put(b"scratch", b"pending");
    assert_ne!(trie.root(), base_root);
    trie.revert().expect("open checkpoint");
    assert_eq!(trie.root(), base_root);
    assert_eq!(trie.get(b"scratch"), None);
    assert_eq!(trie.get(b"base").as_deref(), Some(&b"committed"[..]));
}

#[test]
fn nested_checkpoints_merge_into_parent_on_commit() {
    init_stable_state(1);
    let mut trie = Trie::new();
    trie.checkpoint();
    trie.put(b"outer", b"1");
    trie.checkpoint();
    trie.put(b"inner", b"2");
    trie.commit().expect("inner commit");
    trie.commit().expect("outer commit");
    assert!(!trie.has_open_checkpoint());
    assert_eq!(trie.get(b"outer").as_deref(), Some(&b"1"[..]));
    assert_eq!(trie.get(b"inner").as_deref(), Some(&b"2"[..]));
}

#[test]
fn historical_root_remains_readable_after_updates() {
    init_stable_state(1);
    let mut trie = Trie::new();
    trie.put(b"account", b"old");
    let old_root = trie.root();
    trie.put(b"account", b"new");
    let new_root = trie.root();

    // content-addressedなので旧rootの値も引き続き参照できる
    assert_eq!(trie.get_at(old_root, b"account").as_deref(), Some(&b"old"[..]));
    assert_eq!(trie.get_at(new_root, b"account").as_deref(), Some(&b"new"[..]));
}

#[test]
fn set_root_rejected_while_checkpoint_open() {
    init_stable_state(1);
    let mut trie = Trie::new();
    trie.put(b"x", b"y");
    let root = trie.root();
    trie.checkpoint();
    assert!(trie.set_root(root).is_err());
    trie.revert().expect("open checkpoint");
    assert!(trie.set_root(EMPTY_ROOT).is_ok());
    assert_eq!(trie.get(b"x"), None);
    assert!(trie.set_root(root).is_ok());
    assert_eq!(trie.get(b"x").as_deref(), Some(&b"y"[..]));
}

#[test]
fn many_keys_survive_commit_and_lookup() {
    init_stable_state(1);
    let mut trie = Trie::new();
    trie.checkpoint();
    for index in 0u32..64 {
        trie.put(&index.to_be_bytes(), format!("value-{index}").as_bytes());
    }
    trie.commit().expect("commit");
    for index in 0u32..64 {
        assert_eq!(
            trie.get(&index.to_be_bytes()),
            Some(format!("value-{index}").into_bytes()),
            "key {index} lost"
        );
    }
}

#[test]
fn ordered_index_root_distinguishes_content() {
    let empty = ordered_index_root(&[]);
    assert_eq!(empty, EMPTY_ROOT);
    let one = ordered_index_root(&[b"tx-a".to_vec()]);
    let two = ordered_index_root(&[b"tx-a".to_vec(), b"tx-b".to_vec()]);
    let swapped = ordered_index_root(&[b"tx-b".to_vec(), b"tx-a".to_vec()]);
    assert_ne!(one, two);
    assert_ne!(two, swapped);
}
