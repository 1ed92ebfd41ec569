//! どこで: StableBTreeMapの結線 / 何を: 全カラムの初期化とアクセサ / なぜ: 単一オーナースレッドに状態を閉じ込めるため

use crate::chain_data::{
    BlockLogs, ChainMeta, CodeVal, HashKey, HeadRef, NodeRecord, StoredBlock, StoredReceipt,
    StoredTx,
};
use crate::memory::{get_memory, reset_memory, ColumnId, VMem};
use ic_stable_structures::{StableBTreeMap, StableCell};
use std::cell::RefCell;

pub type TrieNodes = StableBTreeMap<HashKey, NodeRecord, VMem>;
pub type Codes = StableBTreeMap<HashKey, CodeVal, VMem>;
pub type Blocks = StableBTreeMap<u64, StoredBlock, VMem>;
pub type BlockHashIndex = StableBTreeMap<HashKey, u64, VMem>;
pub type Transactions = StableBTreeMap<HashKey, StoredTx, VMem>;
pub type Receipts = StableBTreeMap<HashKey, StoredReceipt, VMem>;
pub type BlockLogsStore = StableBTreeMap<u64, BlockLogs, VMem>;

pub struct StableState {
    pub trie_nodes: TrieNodes,
    pub codes: Codes,
    pub blocks: Blocks,
    pub block_hash_index: BlockHashIndex,
    pub transactions: Transactions,
    pub receipts: Receipts,
    pub block_logs: BlockLogsStore,
    pub head: StableCell<HeadRef, VMem>,
    pub earliest: StableCell<HeadRef, VMem>,
    pub chain_meta: StableCell<ChainMeta, VMem>,
}

thread_local! {
    static STABLE_STATE: RefCell<Option<StableState>> = const { RefCell::new(None) };
}

pub fn init_stable_state(chain_id: u64) {
    let trie_nodes = StableBTreeMap::init(get_memory(ColumnId::TrieNodes));
    let codes = StableBTreeMap::init(get_memory(ColumnId::Codes));
    let blocks = StableBTreeMap::init(get_memory(ColumnId::Blocks));
    let block_hash_index = StableBTreeMap::init(get_memory(ColumnId::BlockHashIndex));
    let transactions = StableBTreeMap::init(get_memory(ColumnId::Transactions));
    let receipts = StableBTreeMap::init(get_memory(ColumnId::Receipts));
    let block_logs = StableBTreeMap::init(get_memory(ColumnId::BlockLogs));
    let head = StableCell::init(get_memory(ColumnId::Head), HeadRef::zero());
    let earliest = StableCell::init(get_memory(ColumnId::Earliest), HeadRef::zero());
    let chain_meta = StableCell::init(get_memory(ColumnId::Meta), ChainMeta::new(chain_id));
    STABLE_STATE.with(|s| {
        *s.borrow_mut() = Some(StableState {
            trie_nodes,
            codes,
            blocks,
            block_hash_index,
            transactions,
            receipts,
            block_logs,
            head,
            earliest,
            chain_meta,
        });
    });
}

/// 現スレッドの状態を破棄して空のカラムから作り直す。
pub fn reset_stable_state(chain_id: u64) {
    STABLE_STATE.with(|s| {
        *s.borrow_mut() = None;
    });
    reset_memory();
    init_stable_state(chain_id);
}

pub fn with_state<R>(f: impl FnOnce(&StableState) -> R) -> R {
    STABLE_STATE.with(|s| {
        let borrowed = s.borrow();
        let state = borrowed
            .as_ref()
            .unwrap_or_else(|| panic!("stable_state: not initialized"));
        f(state)
    })
}

/// 単一の書き込みバッチ境界。1ブロック分の保存はこのスコープ1回に収める。
pub fn with_state_mut<R>(f: impl FnOnce(&mut StableState) -> R) -> R {
    STABLE_STATE.with(|s| {
        let mut borrowed = s.borrow_mut();
        let state = borrowed
            .as_mut()
            .unwrap_or_else(|| panic!("stable_state: not initialized"));
        f(state)
    })
}
