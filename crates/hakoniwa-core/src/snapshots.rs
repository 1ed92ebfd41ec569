//! どこで: snapshot manager / 何を: (head, clock offset)の捕捉とrevert巻き戻し / なぜ: chain全体を読み直さずに復元経路を持つため

use crate::clock::Clock;
use crate::trie::Trie;
use hakoniwa_db::chain_data::{ops, HeadRef};
use hakoniwa_db::stable_state::with_state_mut;

#[derive(Clone, Copy, Debug)]
pub struct SnapshotEntry {
    pub head: HeadRef,
    pub time_offset_ms: i64,
}

/// 保持は無制限（既知の制限）。プロセス終了かrevertでのみ解放される。
#[derive(Debug, Default)]
pub struct SnapshotManager {
    snaps: Vec<SnapshotEntry>,
    /// 最古のliveなsnapshot以降に足されたblock hash。新しいものが末尾。
    blocks: Vec<[u8; 32]>,
}

impl SnapshotManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1始まりのidを返す。
    pub fn take(&mut self, head: HeadRef, time_offset_ms: i64) -> u64 {
        self.snaps.push(SnapshotEntry {
            head,
            time_offset_ms,
        });
        tracing::debug!(
            id = self.snaps.len(),
            head_number = head.number,
            "snapshot taken"
        );
        self.snaps.len() as u64
    }

    pub fn live_count(&self) -> usize {
        self.snaps.len()
    }

    pub fn is_valid(&self, id: u64) -> bool {
        id >= 1 && id <= self.snaps.len() as u64
    }

    /// block保存時に呼ぶ。liveなsnapshotが無ければ何も記録しない。
    pub fn observe_block(&mut self, block_hash: [u8; 32]) {
        if self.snaps.is_empty() {
            return;
        }
        self.blocks.push(block_hash);
    }

    /// 巻き戻し本体。呼び出し側がpool/minerを止め、trieのcheckpointが
    /// 閉じていることを保証する。戻り値は復元したhead。
    pub fn revert(
        &mut self,
        id: u64,
        trie: &mut Trie,
        clock: &mut Clock,
    ) -> Option<HeadRef> {
        if !self.is_valid(id) {
            return None;
        }
        let entry = self.snaps[(id - 1) as usize];
        self.snaps.truncate((id - 1) as usize);

        let unwound = with_state_mut(|state| {
            let head = ops::head(state);
            let mut removed = 0u64;
            if head.block_hash != entry.head.block_hash {
                // 新しい方からsnapshotのheadまで剥がす。全削除は同一バッチ内。
                while let Some(hash) = self.blocks.pop() {
                    if hash == entry.head.block_hash {
                        self.blocks.push(hash);
                        break;
                    }
                    if let Some(block) = ops::get_block_by_hash(state, hash) {
                        for tx_hash in block.tx_hashes.iter() {
                            ops::del_transaction(state, *tx_hash);
                            ops::del_receipt(state, *tx_hash);
                        }
                        ops::del_block_logs(state, block.number);
                        ops::del_block(state, block.number);
                        removed = removed.saturating_add(1);
                    }
                }
            }
            ops::set_head(state, entry.head);
            let mut meta = *state.chain_meta.get();
            meta.time_offset_ms = entry.time_offset_ms;
            state.chain_meta.set(meta);
            removed
        });

        // controllerがcheckpoint無しを保証しているのでset_rootは成功する
        if trie.set_root(entry.head.state_root).is_err() {
            tracing::error!("revert attempted with an open trie checkpoint");
            return None;
        }
        clock.set_offset_ms(entry.time_offset_ms);

        if self.snaps.is_empty() {
            self.blocks.clear();
        }
        tracing::info!(
            id,
            unwound,
            head_number = entry.head.number,
            "chain reverted to snapshot"
        );
        Some(entry.head)
    }
}
