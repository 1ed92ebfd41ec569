//! どこで: record storeの入口 / 何を: blocks/tx/receipts/logsのget・put・del / なぜ: バッチ境界の書き込みを一箇所に集約するため

use crate::chain_data::block::{HeadRef, StoredBlock};
use crate::chain_data::block_logs::BlockLogs;
use crate::chain_data::receipt::StoredReceipt;
use crate::chain_data::trie_node::HashKey;
use crate::chain_data::tx::StoredTx;
use crate::stable_state::StableState;

// blocks: number引きが主、hash引きは二次索引経由。

pub fn put_block(state: &mut StableState, block: &StoredBlock) {
    state.blocks.insert(block.number, block.clone());
    state
        .block_hash_index
        .insert(HashKey(block.block_hash), block.number);
}

pub fn get_block_by_number(state: &StableState, number: u64) -> Option<StoredBlock> {
    state.blocks.get(&number)
}

pub fn get_block_by_hash(state: &StableState, hash: [u8; 32]) -> Option<StoredBlock> {
    let number = state.block_hash_index.get(&HashKey(hash))?;
    state.blocks.get(&number)
}

pub fn del_block(state: &mut StableState, number: u64) -> Option<StoredBlock> {
    let block = state.blocks.remove(&number)?;
    state.block_hash_index.remove(&HashKey(block.block_hash));
    Some(block)
}

pub fn put_transaction(state: &mut StableState, tx: &StoredTx) {
    state.transactions.insert(HashKey(tx.hash), tx.clone());
}

pub fn get_transaction(state: &StableState, hash: [u8; 32]) -> Option<StoredTx> {
    state.transactions.get(&HashKey(hash))
}

pub fn del_transaction(state: &mut StableState, hash: [u8; 32]) {
    state.transactions.remove(&HashKey(hash));
}

pub fn put_receipt(state: &mut StableState, receipt: &StoredReceipt) {
    state.receipts.insert(HashKey(receipt.tx_hash), receipt.clone());
}

pub fn get_receipt(state: &StableState, tx_hash: [u8; 32]) -> Option<StoredReceipt> {
    state.receipts.get(&HashKey(tx_hash))
}

pub fn del_receipt(state: &mut StableState, tx_hash: [u8; 32]) {
    state.receipts.remove(&HashKey(tx_hash));
}

pub fn put_block_logs(state: &mut StableState, logs: &BlockLogs) {
    state.block_logs.insert(logs.block_number, logs.clone());
}

pub fn get_block_logs(state: &StableState, block_number: u64) -> Option<BlockLogs> {
    state.block_logs.get(&block_number)
}

pub fn del_block_logs(state: &mut StableState, block_number: u64) {
    state.block_logs.remove(&block_number);
}

pub fn head(state: &StableState) -> HeadRef {
    *state.head.get()
}

pub fn set_head(state: &mut StableState, head: HeadRef) {
    state.head.set(head);
}

pub fn earliest(state: &StableState) -> HeadRef {
    *state.earliest.get()
}

pub fn set_earliest(state: &mut StableState, earliest: HeadRef) {
    state.earliest.set(earliest);
}
