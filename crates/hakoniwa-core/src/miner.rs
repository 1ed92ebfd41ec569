//! どこで: miner / 何を: executable集合からの候補ブロック組み立て / なぜ: gas上限と失敗分類を一箇所で守るため

use crate::exec::{execute_tx, BlockExecContext, ExecError};
use crate::pool::TxPool;
use crate::state_db::{commit_diffs, TrieDb};
use crate::trie::{ordered_index_root, Trie};
use crate::tx::PooledTx;
use alloy_primitives::{Bloom, Log};
use revm::database::CacheDB;
use revm::state::EvmState;
use std::collections::BTreeSet;

#[derive(Clone, Debug)]
pub struct ExecutedTx {
    pub tx: PooledTx,
    pub status: u8,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub logs: Vec<Log>,
    pub logs_bloom: [u8; 256],
    pub contract_address: Option<[u8; 20]>,
    pub return_data: Vec<u8>,
    pub failure: Option<String>,
}

/// 1候補ブロックの実行結果。trieのcheckpointは開いたまま返し、
/// 保存バッチ側がcommit（失敗時はrevert）する。
#[derive(Clone, Debug)]
pub struct MinedBlockData {
    pub executed: Vec<ExecutedTx>,
    pub gas_used: u64,
    pub state_root: [u8; 32],
    pub transactions_root: [u8; 32],
    pub receipts_root: [u8; 32],
    /// gas境界の先にまだexecutableが残っているか。
    pub more_ready: bool,
}

#[derive(Debug, Default)]
pub struct Miner {
    paused: bool,
}

impl Miner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// poolのexecutable集合から1ブロック分を実行する。
    /// 戻りがNoneなら今回は何も採掘していない（pause中か対象なし）。
    pub fn mine(
        &mut self,
        trie: &mut Trie,
        pool: &mut TxPool,
        ctx: &BlockExecContext,
        max_transactions: Option<usize>,
    ) -> Option<MinedBlockData> {
        if self.paused {
            return None;
        }
        if !pool.has_executable() {
            return None;
        }
        if matches!(max_transactions, Some(0)) {
            return None;
        }

        trie.checkpoint();
        let parent_root = trie.root();

        let mut executed: Vec<ExecutedTx> = Vec::new();
        let mut staged_diffs: Vec<EvmState> = Vec::new();
        let mut deferred: Vec<PooledTx> = Vec::new();
        let mut deferred_senders: BTreeSet<[u8; 20]> = BTreeSet::new();
        let mut block_gas_used = 0u64;
        let mut dropped = 0u64;

        {
            let mut exec_db = CacheDB::new(TrieDb::new(trie, parent_root));
            loop {
                if let Some(max) = max_transactions {
                    if executed.len() >= max {
                        break;
                    }
                }
                let Some(tx) = pool.pop_best() else {
                    break;
                };
                // 繰り越し対象senderの後続nonceは実行できない
                if deferred_senders.contains(&tx.from) {
                    deferred.push(tx);
                    continue;
                }
                // intrinsic gasが残り容量に入らないtxは捨てず次ブロックへ繰り越す
                let remaining = ctx.gas_limit.saturating_sub(block_gas_used);
                if tx.intrinsic_gas() > remaining {
                    deferred_senders.insert(tx.from);
                    deferred.push(tx);
                    continue;
                }

                match execute_tx(&mut exec_db, &tx, ctx) {
                    Ok((outcome, state_diff)) => {
                        revm::database_interface::DatabaseCommit::commit(
                            &mut exec_db,
                            state_diff.clone(),
                        );
                        staged_diffs.push(state_diff);
                        block_gas_used = block_gas_used.saturating_add(outcome.gas_used);
                        let mut bloom = Bloom::default();
                        for log in outcome.logs.iter() {
                            bloom.accrue_log(log);
                        }
                        let cumulative_gas_used = block_gas_used;
                        executed.push(ExecutedTx {
                            tx,
                            status: outcome.status,
                            gas_used: outcome.gas_used,
                            cumulative_gas_used,
                            logs: outcome.logs,
                            logs_bloom: bloom.0 .0,
                            contract_address: outcome.contract_address,
                            return_data: outcome.return_data,
                            failure: outcome.failure,
                        });
                    }
                    Err(err) => {
                        // gas未消費の実行前エラー。txは落とし、残りの列はgapになるので降格。
                        let reason = match err {
                            ExecError::Invalid(reason) => reason,
                            ExecError::ExecutionFailed => "execution failed".to_string(),
                        };
                        dropped = dropped.saturating_add(1);
                        tracing::warn!(
                            tx_hash = %hex::encode(tx.hash),
                            reason,
                            "transaction dropped during block assembly"
                        );
                        pool.demote_sender(tx.from);
                    }
                }
            }
        }

        // 繰り越し分をnonce順のまま先頭へ戻す
        for tx in deferred.into_iter().rev() {
            pool.requeue_front(tx);
        }

        if executed.is_empty() {
            // 何も載らなかったらcheckpointを畳んで無かったことにする
            let _ = trie.revert();
            if dropped > 0 {
                tracing::debug!(dropped, "assembly produced no block");
            }
            return None;
        }

        commit_diffs(trie, &staged_diffs);
        let state_root = trie.root();

        let tx_leaves: Vec<Vec<u8>> = executed.iter().map(|item| tx_leaf(&item.tx)).collect();
        let receipt_leaves: Vec<Vec<u8>> = executed.iter().map(receipt_leaf).collect();

        Some(MinedBlockData {
            gas_used: block_gas_used,
            state_root,
            transactions_root: ordered_index_root(&tx_leaves),
            receipts_root: ordered_index_root(&receipt_leaves),
            more_ready: pool.has_executable(),
            executed,
        })
    }
}

/// transactions_rootのリーフ。確定コンテキストを含まない合意フィールドのみ。
fn tx_leaf(tx: &PooledTx) -> Vec<u8> {
    let mut out = Vec::with_capacity(128 + tx.input.len());
    out.extend_from_slice(&tx.nonce.to_be_bytes());
    out.extend_from_slice(&tx.gas_price.to_be_bytes());
    out.extend_from_slice(&tx.gas_limit.to_be_bytes());
    match tx.to {
        Some(to) => {
            out.push(1);
            out.extend_from_slice(&to);
        }
        None => out.push(0),
    }
    out.extend_from_slice(&tx.value.to_be_bytes::<32>());
    out.extend_from_slice(&tx.input);
    out.extend_from_slice(&tx.v.to_be_bytes());
    out.extend_from_slice(&tx.r);
    out.extend_from_slice(&tx.s);
    out
}

/// receipts_rootのリーフ。block hashへ依存させない（hashがrootに依存するため）。
fn receipt_leaf(item: &ExecutedTx) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 8 + 256);
    out.push(item.status);
    out.extend_from_slice(&item.cumulative_gas_used.to_be_bytes());
    out.extend_from_slice(&item.logs_bloom);
    for log in item.logs.iter() {
        out.extend_from_slice(log.address.as_slice());
        for topic in log.data.topics() {
            out.extend_from_slice(topic.as_slice());
        }
        out.extend_from_slice(log.data.data.as_ref());
    }
    out
}
