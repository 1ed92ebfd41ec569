//! どこで: world stateのMerkle Patricia Trie / 何を: checkpoint付きget/put/delとroot計算 / なぜ: revertでrootを巻き戻せる履歴保持のため
//!
//! ノードはRLPのkeccakをキーにしたcontent-addressed列に置く。古いrootの
//! ノードは上書きされないので、snapshot revertは rootを差し替えるだけで済む。

use crate::hash::keccak256;
use alloy_primitives::B256;
use alloy_rlp::{Decodable, Encodable};
use alloy_trie::nodes::{BranchNode, ExtensionNode, LeafNode, RlpNode, TrieNode};
use alloy_trie::{HashBuilder, Nibbles, TrieMask, EMPTY_ROOT_HASH};
use hakoniwa_db::chain_data::{HashKey, NodeRecord};
use hakoniwa_db::stable_state::{with_state, with_state_mut, StableState};
use smallvec::SmallVec;
use std::collections::BTreeMap;

pub const EMPTY_ROOT: [u8; 32] = EMPTY_ROOT_HASH.0;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrieError {
    OpenCheckpoint,
    NoCheckpoint,
}

/// 1チェックポイント分のステージ領域。
struct Layer {
    entry_root: Option<RlpNode>,
    nodes: BTreeMap<HashKey, Vec<u8>>,
}

pub struct Trie {
    root_ptr: Option<RlpNode>,
    layers: Vec<Layer>,
}

/// 下位trieへ流し込む1件分の操作。valueがNoneなら削除。
#[derive(Clone, Debug)]
pub struct TrieOp {
    pub path: Nibbles,
    pub value: Option<SmallVec<[u8; 40]>>,
}

impl Trie {
    pub fn new() -> Self {
        Self {
            root_ptr: None,
            layers: Vec::new(),
        }
    }

    pub fn from_root(root: [u8; 32]) -> Self {
        Self {
            root_ptr: root_to_ptr(B256::from(root)),
            layers: Vec::new(),
        }
    }

    pub fn root(&self) -> [u8; 32] {
        ptr_to_root(self.root_ptr.as_ref()).0
    }

    /// revert専用。checkpointが開いたままの差し替えは拒否する。
    pub fn set_root(&mut self, root: [u8; 32]) -> Result<(), TrieError> {
        if !self.layers.is_empty() {
            return Err(TrieError::OpenCheckpoint);
        }
        self.root_ptr = root_to_ptr(B256::from(root));
        Ok(())
    }

    pub fn checkpoint(&mut self) {
        self.layers.push(Layer {
            entry_root: self.root_ptr.clone(),
            nodes: BTreeMap::new(),
        });
    }

    pub fn has_open_checkpoint(&self) -> bool {
        !self.layers.is_empty()
    }

    /// 最上位のcheckpointを閉じる。最外殻なら蓄積ノードをDBへ流す。
    pub fn commit(&mut self) -> Result<(), TrieError> {
        let layer = self.layers.pop().ok_or(TrieError::NoCheckpoint)?;
        match self.layers.last_mut() {
            Some(parent) => parent.nodes.extend(layer.nodes),
            None => {
                with_state_mut(|state| {
                    for (key, rlp) in layer.nodes {
                        state.trie_nodes.insert(key, NodeRecord(rlp));
                    }
                    self.record_root(state);
                });
            }
        }
        Ok(())
    }

    /// ブロック保存バッチの内側で使うcommit。ノード書き込みを同一スコープに載せる。
    pub fn commit_into(&mut self, state: &mut StableState) -> Result<(), TrieError> {
        let layer = self.layers.pop().ok_or(TrieError::NoCheckpoint)?;
        match self.layers.last_mut() {
            Some(parent) => parent.nodes.extend(layer.nodes),
            None => {
                for (key, rlp) in layer.nodes {
                    state.trie_nodes.insert(key, NodeRecord(rlp));
                }
                self.record_root(state);
            }
        }
        Ok(())
    }

    pub fn revert(&mut self) -> Result<(), TrieError> {
        let layer = self.layers.pop().ok_or(TrieError::NoCheckpoint)?;
        self.root_ptr = layer.entry_root;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.lookup(self.root_ptr.as_ref(), &secure_path(key))
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        let path = secure_path(key);
        self.root_ptr = self.apply(self.root_ptr.clone(), &path, Some(value));
        self.flush_if_unscoped();
    }

    pub fn del(&mut self, key: &[u8]) {
        let path = secure_path(key);
        self.root_ptr = self.apply(self.root_ptr.clone(), &path, None);
        self.flush_if_unscoped();
    }

    /// 任意rootの読み取り。過去ブロックのstate viewとstorage trieが使う。
    pub fn get_at(&self, root: [u8; 32], key: &[u8]) -> Option<Vec<u8>> {
        let ptr = root_to_ptr(B256::from(root));
        self.lookup(ptr.as_ref(), &secure_path(key))
    }

    /// account配下のstorage trieへ一括適用し、新しいstorage rootを返す。
    /// ノードはworld trieと同じステージ領域に積まれる。
    pub fn apply_subtree(&mut self, subtree_root: [u8; 32], mut ops: Vec<TrieOp>) -> [u8; 32] {
        ops.sort_by(|a, b| a.path.cmp(&b.path));
        let mut current = root_to_ptr(B256::from(subtree_root));
        for op in ops {
            current = self.apply(current, &op.path, op.value.as_deref());
        }
        let root = ptr_to_root(current.as_ref());
        self.record_subtree_root(root, current.as_ref());
        self.flush_if_unscoped();
        root.0
    }

    // --- ノード解決とステージ ---

    fn resolve(&self, ptr: &RlpNode) -> Option<TrieNode> {
        let raw_owned: Vec<u8>;
        if let Some(hash) = ptr.as_hash() {
            let key = HashKey(hash.0);
            if let Some(raw) = self.staged(&key) {
                raw_owned = raw;
            } else if let Some(record) = with_state(|state| state.trie_nodes.get(&key)) {
                raw_owned = record.0;
            } else {
                return None;
            }
            let mut slice = raw_owned.as_slice();
            TrieNode::decode(&mut slice).ok()
        } else {
            let mut slice = ptr.as_ref();
            TrieNode::decode(&mut slice).ok()
        }
    }

    fn staged(&self, key: &HashKey) -> Option<Vec<u8>> {
        for layer in self.layers.iter().rev() {
            if let Some(raw) = layer.nodes.get(key) {
                return Some(raw.clone());
            }
        }
        None
    }

    fn emit(&mut self, node: TrieNode) -> RlpNode {
        let mut raw = Vec::with_capacity(96);
        let ptr = node.rlp(&mut raw);
        if let Some(hash) = ptr.as_hash() {
            let key = HashKey(hash.0);
            match self.layers.last_mut() {
                Some(layer) => {
                    layer.nodes.entry(key).or_insert(raw);
                }
                None => {
                    with_state_mut(|state| {
                        if state.trie_nodes.get(&key).is_none() {
                            state.trie_nodes.insert(key, NodeRecord(raw));
                        }
                    });
                }
            }
        }
        ptr
    }

    /// rootノードのRLPが32byte未満でもhash引きできるよう明示レコードを残す。
    fn record_root(&self, state: &mut StableState) {
        let root = ptr_to_root(self.root_ptr.as_ref());
        if root == EMPTY_ROOT_HASH {
            return;
        }
        let key = HashKey(root.0);
        if state.trie_nodes.get(&key).is_some() {
            return;
        }
        if let Some(ptr) = self.root_ptr.as_ref() {
            if ptr.as_hash().is_none() {
                state.trie_nodes.insert(key, NodeRecord(ptr.as_ref().to_vec()));
            }
        }
    }

    fn record_subtree_root(&mut self, root: B256, ptr: Option<&RlpNode>) {
        if root == EMPTY_ROOT_HASH {
            return;
        }
        let Some(ptr) = ptr else { return };
        if ptr.as_hash().is_some() {
            return;
        }
        let key = HashKey(root.0);
        let raw = ptr.as_ref().to_vec();
        match self.layers.last_mut() {
            Some(layer) => {
                layer.nodes.entry(key).or_insert(raw);
            }
            None => {
                with_state_mut(|state| {
                    if state.trie_nodes.get(&key).is_none() {
                        state.trie_nodes.insert(key, NodeRecord(raw));
                    }
                });
            }
        }
    }

    fn flush_if_unscoped(&self) {
        if self.layers.is_empty() {
            with_state_mut(|state| self.record_root(state));
        }
    }

    // --- 参照 ---

    fn lookup(&self, root_ptr: Option<&RlpNode>, path: &Nibbles) -> Option<Vec<u8>> {
        let mut current = root_ptr?.clone();
        let mut depth = 0usize;
        loop {
            let node = self.resolve(&current)?;
            match node {
                TrieNode::EmptyRoot => return None,
                TrieNode::Leaf(leaf) => {
                    if leaf.key == path.slice(depth..) {
                        return Some(leaf.value);
                    }
                    return None;
                }
                TrieNode::Extension(ext) => {
                    let rest = path.slice(depth..);
                    let common = ext.key.common_prefix_length(&rest);
                    if common != ext.key.len() {
                        return None;
                    }
                    depth = depth.saturating_add(common);
                    current = ext.child;
                }
                TrieNode::Branch(branch) => {
                    if depth >= path.len() {
                        return None;
                    }
                    let nibble = path.get(depth)?;
                    let child = branch_child(&branch, nibble)?;
                    depth = depth.saturating_add(1);
                    current = child;
                }
            }
        }
    }

    // --- 更新 ---

    fn apply(
        &mut self,
        root: Option<RlpNode>,
        path: &Nibbles,
        value: Option<&[u8]>,
    ) -> Option<RlpNode> {
        self.update_at(root.as_ref(), path, 0, value)
    }

    fn update_at(
        &mut self,
        node_ptr: Option<&RlpNode>,
        path: &Nibbles,
        depth: usize,
        value: Option<&[u8]>,
    ) -> Option<RlpNode> {
        let rest = path.slice(depth..);
        let Some(ptr) = node_ptr else {
            return value.map(|v| self.emit(TrieNode::Leaf(LeafNode::new(rest, v.to_vec()))));
        };
        let Some(node) = self.resolve(ptr) else {
            // 解決不能ノードは触らない。書き込みは迷子になるよりno-opが安全。
            return node_ptr.cloned();
        };

        match node {
            TrieNode::EmptyRoot => {
                value.map(|v| self.emit(TrieNode::Leaf(LeafNode::new(rest, v.to_vec()))))
            }
            TrieNode::Leaf(leaf) => self.update_leaf(leaf, &rest, value),
            TrieNode::Extension(ext) => self.update_extension(ext, path, depth, value),
            TrieNode::Branch(branch) => self.update_branch(branch, path, depth, value),
        }
    }

    fn update_leaf(
        &mut self,
        leaf: LeafNode,
        rest: &Nibbles,
        value: Option<&[u8]>,
    ) -> Option<RlpNode> {
        let common = leaf.key.common_prefix_length(rest);
        if common == leaf.key.len() && common == rest.len() {
            let v = value?;
            if leaf.value.as_slice() == v {
                return Some(self.emit(TrieNode::Leaf(leaf)));
            }
            return Some(self.emit(TrieNode::Leaf(LeafNode::new(leaf.key, v.to_vec()))));
        }

        let mut children: [Option<RlpNode>; 16] = std::array::from_fn(|_| None);
        let old_suffix = leaf.key.slice(common..);
        if !old_suffix.is_empty() {
            let old_idx = old_suffix.get(0).unwrap_or(0) as usize;
            let old_tail = old_suffix.slice(1..);
            let old_child = self.emit(TrieNode::Leaf(LeafNode::new(old_tail, leaf.value)));
            children[old_idx] = Some(old_child);
        }

        if let Some(v) = value {
            let new_suffix = rest.slice(common..);
            if !new_suffix.is_empty() {
                let new_idx = new_suffix.get(0).unwrap_or(0) as usize;
                let new_tail = new_suffix.slice(1..);
                let new_child = self.emit(TrieNode::Leaf(LeafNode::new(new_tail, v.to_vec())));
                children[new_idx] = Some(new_child);
            }
        }

        let collapsed = self.collapse_children(children)?;

        if common > 0 {
            let prefix = rest.slice(0..common);
            Some(self.emit(TrieNode::Extension(ExtensionNode::new(prefix, collapsed))))
        } else {
            Some(collapsed)
        }
    }

    fn update_extension(
        &mut self,
        ext: ExtensionNode,
        path: &Nibbles,
        depth: usize,
        value: Option<&[u8]>,
    ) -> Option<RlpNode> {
        let rest = path.slice(depth..);
        let common = ext.key.common_prefix_length(&rest);

        if common == ext.key.len() {
            let child_next = self.update_at(Some(&ext.child), path, depth + common, value)?;
            if ext.key.is_empty() {
                return Some(child_next);
            }
            return Some(self.emit(TrieNode::Extension(ExtensionNode::new(ext.key, child_next))));
        }

        let mut children: [Option<RlpNode>; 16] = std::array::from_fn(|_| None);

        let old_suffix = ext.key.slice(common..);
        let old_idx = old_suffix.get(0).unwrap_or(0) as usize;
        let old_tail = old_suffix.slice(1..);
        let old_child = if old_tail.is_empty() {
            ext.child
        } else {
            self.emit(TrieNode::Extension(ExtensionNode::new(old_tail, ext.child)))
        };
        children[old_idx] = Some(old_child);

        if let Some(v) = value {
            let new_suffix = rest.slice(common..);
            if !new_suffix.is_empty() {
                let new_idx = new_suffix.get(0).unwrap_or(0) as usize;
                let new_tail = new_suffix.slice(1..);
                let new_child = self.emit(TrieNode::Leaf(LeafNode::new(new_tail, v.to_vec())));
                children[new_idx] = Some(new_child);
            }
        }

        let collapsed = self.collapse_children(children)?;
        if common > 0 {
            Some(self.emit(TrieNode::Extension(ExtensionNode::new(
                rest.slice(0..common),
                collapsed,
            ))))
        } else {
            Some(collapsed)
        }
    }

    fn update_branch(
        &mut self,
        branch: BranchNode,
        path: &Nibbles,
        depth: usize,
        value: Option<&[u8]>,
    ) -> Option<RlpNode> {
        if depth >= path.len() {
            return Some(self.emit(TrieNode::Branch(branch)));
        }

        let mut children = branch_children(&branch);
        let index = path.get(depth).unwrap_or(0) as usize;
        let next_child = self.update_at(children[index].as_ref(), path, depth + 1, value);
        children[index] = next_child;

        self.collapse_children(children)
    }

    /// 分岐の残り子が1つならleaf/extensionへ畳む。0ならNone。
    fn collapse_children(&mut self, children: [Option<RlpNode>; 16]) -> Option<RlpNode> {
        let mut present: Vec<(u8, RlpNode)> = Vec::new();
        for (idx, child) in children.into_iter().enumerate() {
            if let Some(child) = child {
                present.push((idx as u8, child));
            }
        }

        match present.len() {
            0 => None,
            1 => {
                let (idx, child) = present.remove(0);
                let prefix = Nibbles::from_nibbles_unchecked([idx]);
                let Some(child_node) = self.resolve(&child) else {
                    return Some(
                        self.emit(TrieNode::Extension(ExtensionNode::new(prefix, child))),
                    );
                };
                match child_node {
                    TrieNode::Leaf(leaf) => {
                        let key = prefix.join(&leaf.key);
                        Some(self.emit(TrieNode::Leaf(LeafNode::new(key, leaf.value))))
                    }
                    TrieNode::Extension(ext) => {
                        let key = prefix.join(&ext.key);
                        Some(self.emit(TrieNode::Extension(ExtensionNode::new(key, ext.child))))
                    }
                    _ => Some(self.emit(TrieNode::Extension(ExtensionNode::new(prefix, child)))),
                }
            }
            _ => {
                let mut stack = Vec::with_capacity(present.len());
                let mut mask = TrieMask::default();
                for (idx, child) in present {
                    mask.set_bit(idx);
                    stack.push(child);
                }
                Some(self.emit(TrieNode::Branch(BranchNode::new(stack, mask))))
            }
        }
    }
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

fn secure_path(key: &[u8]) -> Nibbles {
    Nibbles::unpack(keccak256(key))
}

fn root_to_ptr(root: B256) -> Option<RlpNode> {
    if root == EMPTY_ROOT_HASH {
        None
    } else {
        Some(RlpNode::word_rlp(&root))
    }
}

fn ptr_to_root(ptr: Option<&RlpNode>) -> B256 {
    match ptr {
        Some(ptr) => {
            if let Some(hash) = ptr.as_hash() {
                hash
            } else {
                B256::from(keccak256(ptr.as_ref()))
            }
        }
        None => EMPTY_ROOT_HASH,
    }
}

fn branch_children(branch: &BranchNode) -> [Option<RlpNode>; 16] {
    let mut out: [Option<RlpNode>; 16] = std::array::from_fn(|_| None);
    let mut pos = 0usize;
    for idx in 0..16u8 {
        if branch.state_mask.is_bit_set(idx) {
            out[idx as usize] = branch.stack.get(pos).cloned();
            pos = pos.saturating_add(1);
        }
    }
    out
}

fn branch_child(branch: &BranchNode, nibble: u8) -> Option<RlpNode> {
    if !branch.state_mask.is_bit_set(nibble) {
        return None;
    }
    let mut pos = 0usize;
    for idx in 0..16u8 {
        if idx == nibble {
            return branch.stack.get(pos).cloned();
        }
        if branch.state_mask.is_bit_set(idx) {
            pos = pos.saturating_add(1);
        }
    }
    None
}

/// block headerのtransactions_root/receipts_root用。キーはrlp(index)で
/// ハッシュしない（Ethereumの索引trieと同じ規則）。
pub fn ordered_index_root(values: &[Vec<u8>]) -> [u8; 32] {
    if values.is_empty() {
        return EMPTY_ROOT;
    }
    let mut entries: Vec<(Nibbles, &Vec<u8>)> = Vec::with_capacity(values.len());
    for (index, value) in values.iter().enumerate() {
        let mut key = Vec::with_capacity(4);
        index.encode(&mut key);
        entries.push((Nibbles::unpack(&key), value));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let mut builder = HashBuilder::default();
    for (path, value) in entries {
        builder.add_leaf(path, value);
    }
    builder.root().0
}
