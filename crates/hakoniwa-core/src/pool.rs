//! どこで: transaction pool / 何を: pending/executableの分桶と昇格・順序付け / なぜ: nonce連続性とfee優先順を両立するため

use crate::error::ValidationError;
use crate::tx::PooledTx;
use alloy_primitives::U256;
use hakoniwa_db::chain_data::constants::MAX_TX_INPUT;
use std::collections::{BTreeMap, VecDeque};

/// 送信者の現在状態。controllerがhead stateのtrieから引いて渡す。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SenderAccount {
    pub nonce: u64,
    pub balance: U256,
}

pub trait AccountView {
    fn sender_account(&self, address: [u8; 20]) -> SenderAccount;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddOutcome {
    pub hash: [u8; 32],
    /// このtx自体が即実行可能な桶に入ったか。
    pub executable: bool,
    /// 追加でexecutable集合が空→非空になったか（instamineのdrain信号）。
    pub drained: bool,
}

/// executable先頭の横断順序。gas価格降順、同値は到着seq昇順、最後はhashで安定化。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct ReadyKey {
    price_inv: u128,
    seq: u64,
    hash: [u8; 32],
}

impl ReadyKey {
    fn new(tx: &PooledTx) -> Self {
        Self {
            price_inv: u128::MAX.saturating_sub(tx.gas_price),
            seq: tx.seq,
            hash: tx.hash,
        }
    }
}

pub struct TxPool {
    /// nonce gapのある待機分。(sender, nonce)引き。
    pending: BTreeMap<([u8; 20], u64), PooledTx>,
    /// account nonceから連続する実行可能列。先頭がready索引に載る。
    executable: BTreeMap<[u8; 20], VecDeque<PooledTx>>,
    ready: BTreeMap<ReadyKey, [u8; 20]>,
    next_seq: u64,
    paused: bool,
    min_gas_price: u128,
    block_gas_limit: u64,
}

impl TxPool {
    pub fn new(min_gas_price: u128, block_gas_limit: u64) -> Self {
        Self {
            pending: BTreeMap::new(),
            executable: BTreeMap::new(),
            ready: BTreeMap::new(),
            next_seq: 0,
            paused: false,
            min_gas_price,
            block_gas_limit,
        }
    }

    pub fn add(
        &mut self,
        mut tx: PooledTx,
        view: &dyn AccountView,
    ) -> Result<AddOutcome, ValidationError> {
        let account = view.sender_account(tx.from);
        self.validate(&tx, &account)?;
        tx.seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);

        let had_ready = self.has_executable();
        let hash = tx.hash;
        if self.paused {
            self.insert_pending(tx)?;
            return Ok(AddOutcome {
                hash,
                executable: false,
                drained: false,
            });
        }

        let sender = tx.from;
        let expected_next = account
            .nonce
            .saturating_add(self.executable_len(sender) as u64);
        let executable = if tx.nonce == expected_next {
            self.push_executable(tx);
            self.promote_sender(account.nonce, sender);
            true
        } else if tx.nonce > expected_next {
            self.insert_pending(tx)?;
            false
        } else {
            // account.nonce <= nonce < expected_next: 既存executableの置換
            self.replace_executable(tx, account.nonce)?;
            true
        };
        Ok(AddOutcome {
            hash,
            executable,
            drained: !had_ready && self.has_executable(),
        })
    }

    fn validate(
        &self,
        tx: &PooledTx,
        account: &SenderAccount,
    ) -> Result<(), ValidationError> {
        // storeのdecode上限と同じ境界で入口側が弾く。通過後のtxは必ず往復できる。
        if tx.input.len() > MAX_TX_INPUT {
            return Err(ValidationError::TxTooLarge {
                max_bytes: MAX_TX_INPUT,
                got: tx.input.len(),
            });
        }
        if tx.gas_price < self.min_gas_price {
            return Err(ValidationError::GasPriceTooLow {
                minimum: self.min_gas_price,
                got: tx.gas_price,
            });
        }
        if tx.gas_limit > self.block_gas_limit {
            return Err(ValidationError::GasLimitExceedsBlock {
                block_gas_limit: self.block_gas_limit,
                got: tx.gas_limit,
            });
        }
        let intrinsic = tx.intrinsic_gas();
        if intrinsic > tx.gas_limit {
            return Err(ValidationError::IntrinsicGasTooHigh {
                intrinsic,
                gas_limit: tx.gas_limit,
            });
        }
        if tx.nonce < account.nonce {
            return Err(ValidationError::NonceTooLow {
                expected: account.nonce,
                got: tx.nonce,
            });
        }
        if account.balance < tx.upfront_cost() {
            return Err(ValidationError::InsufficientFunds);
        }
        Ok(())
    }

    fn insert_pending(&mut self, tx: PooledTx) -> Result<(), ValidationError> {
        let key = (tx.from, tx.nonce);
        if let Some(existing) = self.pending.get(&key) {
            if tx.gas_price <= existing.gas_price {
                return Err(ValidationError::UnderpricedReplacement);
            }
        }
        self.pending.insert(key, tx);
        Ok(())
    }

    fn push_executable(&mut self, tx: PooledTx) {
        let sender = tx.from;
        let queue = self.executable.entry(sender).or_default();
        let was_empty = queue.is_empty();
        queue.push_back(tx);
        if was_empty {
            if let Some(head) = self.executable.get(&sender).and_then(|q| q.front()) {
                self.ready.insert(ReadyKey::new(head), sender);
            }
        }
    }

    fn replace_executable(
        &mut self,
        tx: PooledTx,
        account_nonce: u64,
    ) -> Result<(), ValidationError> {
        let sender = tx.from;
        let Some(queue) = self.executable.get_mut(&sender) else {
            return Err(ValidationError::NonceTooLow {
                expected: account_nonce,
                got: tx.nonce,
            });
        };
        let position = (tx.nonce - account_nonce) as usize;
        let Some(existing) = queue.get(position) else {
            return Err(ValidationError::NonceTooLow {
                expected: account_nonce,
                got: tx.nonce,
            });
        };
        if tx.gas_price <= existing.gas_price {
            return Err(ValidationError::UnderpricedReplacement);
        }
        let replacing_head = position == 0;
        if replacing_head {
            if let Some(head) = queue.front() {
                let key = ReadyKey::new(head);
                self.ready.remove(&key);
            }
        }
        queue[position] = tx;
        if replacing_head {
            if let Some(head) = queue.front() {
                self.ready.insert(ReadyKey::new(head), sender);
            }
        }
        Ok(())
    }

    /// senderのpendingから連続分をexecutableへ引き上げる。
    fn promote_sender(&mut self, account_nonce: u64, sender: [u8; 20]) {
        loop {
            let expected = account_nonce.saturating_add(self.executable_len(sender) as u64);
            let Some(tx) = self.pending.remove(&(sender, expected)) else {
                break;
            };
            self.push_executable(tx);
        }
    }

    /// ブロック確定後やresume後に全senderの昇格を試す。
    /// 戻り値はexecutableが空→非空へ遷移したか。
    pub fn promote_all(&mut self, view: &dyn AccountView) -> bool {
        if self.paused {
            return false;
        }
        let had_ready = self.has_executable();
        let senders: Vec<[u8; 20]> = {
            let mut out: Vec<[u8; 20]> = self.pending.keys().map(|(s, _)| *s).collect();
            out.dedup();
            out
        };
        for sender in senders {
            let account = view.sender_account(sender);
            // account nonceが進んで古いpendingが無効化されていたら捨てる
            let stale: Vec<u64> = self
                .pending
                .range((sender, 0)..=(sender, u64::MAX))
                .filter(|((_, nonce), _)| *nonce < account.nonce)
                .map(|((_, nonce), _)| *nonce)
                .collect();
            for nonce in stale {
                self.pending.remove(&(sender, nonce));
            }
            self.promote_sender(account.nonce, sender);
        }
        !had_ready && self.has_executable()
    }

    /// fee順で最良のexecutable先頭を取り出す。次のnonceがあれば新しい先頭になる。
    pub fn pop_best(&mut self) -> Option<PooledTx> {
        let (key, sender) = self.ready.iter().next().map(|(k, s)| (*k, *s))?;
        self.ready.remove(&key);
        let queue = self.executable.get_mut(&sender)?;
        let tx = queue.pop_front()?;
        if let Some(head) = queue.front() {
            self.ready.insert(ReadyKey::new(head), sender);
        } else {
            self.executable.remove(&sender);
        }
        Some(tx)
    }

    /// block gasに収まらなかったtxを先頭へ戻す（破棄ではなく繰り越し）。
    pub fn requeue_front(&mut self, tx: PooledTx) {
        let sender = tx.from;
        if let Some(queue) = self.executable.get(&sender) {
            if let Some(head) = queue.front() {
                self.ready.remove(&ReadyKey::new(head));
            }
        }
        let queue = self.executable.entry(sender).or_default();
        queue.push_front(tx);
        if let Some(head) = queue.front() {
            self.ready.insert(ReadyKey::new(head), sender);
        }
    }

    /// 実行前エラーでtxを落とした後、残りの列はnonce連続性を失うのでpendingへ降格する。
    pub fn demote_sender(&mut self, sender: [u8; 20]) {
        if let Some(queue) = self.executable.remove(&sender) {
            if let Some(head) = queue.front() {
                self.ready.remove(&ReadyKey::new(head));
            }
            for tx in queue {
                self.pending.insert((sender, tx.nonce), tx);
            }
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.executable.clear();
        self.ready.clear();
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// 再開。昇格はpromote_allを別途呼ぶこと。
    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn has_executable(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn executable_len(&self, sender: [u8; 20]) -> usize {
        self.executable.get(&sender).map(|q| q.len()).unwrap_or(0)
    }

    pub fn executable_total(&self) -> usize {
        self.executable.values().map(|q| q.len()).sum()
    }

    pub fn pending_total(&self) -> usize {
        self.pending.len()
    }

    pub fn content(&self) -> (Vec<PooledTx>, Vec<PooledTx>) {
        let pending = self.pending.values().cloned().collect();
        let executable = self
            .executable
            .values()
            .flat_map(|q| q.iter().cloned())
            .collect();
        (pending, executable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedView {
        nonce: u64,
        balance: U256,
    }

    impl AccountView for FixedView {
        fn sender_account(&self, _address: [u8; 20]) -> SenderAccount {
            SenderAccount {
                nonce: self.nonce,
                balance: self.balance,
            }
        }
    }

    fn tx(from: u8, nonce: u64, gas_price: u128) -> PooledTx {
        PooledTx {
            hash: [from.wrapping_add(nonce as u8).wrapping_add(gas_price as u8); 32],
            from: [from; 20],
            nonce,
            gas_price,
            gas_limit: 21_000,
            to: Some([0xee; 20]),
            value: U256::ZERO,
            input: Vec::new(),
            v: 27,
            r: [1u8; 32],
            s: [1u8; 32],
            seq: 0,
        }
    }

    fn rich_view() -> FixedView {
        FixedView {
            nonce: 0,
            balance: U256::MAX,
        }
    }

    #[test]
    fn contiguous_nonce_is_executable_with_drain_signal() {
        let mut pool = TxPool::new(1, 12_000_000);
        let outcome = pool.add(tx(1, 0, 10), &rich_view()).unwrap();
        assert!(outcome.executable);
        assert!(outcome.drained);
        let outcome = pool.add(tx(1, 1, 10), &rich_view()).unwrap();
        assert!(outcome.executable);
        assert!(!outcome.drained);
        assert_eq!(pool.executable_total(), 2);
    }

    #[test]
    fn nonce_gap_parks_in_pending_until_promoted() {
        let mut pool = TxPool::new(1, 12_000_000);
        let outcome = pool.add(tx(1, 2, 10), &rich_view()).unwrap();
        assert!(!outcome.executable);
        assert!(!outcome.drained);
        assert_eq!(pool.pending_total(), 1);
        assert_eq!(pool.executable_total(), 0);

        let outcome = pool.add(tx(1, 0, 10), &rich_view()).unwrap();
        assert!(outcome.drained);
        let outcome = pool.add(tx(1, 1, 10), &rich_view()).unwrap();
        assert!(!outcome.drained);
        // nonce 2 が昇格して全て実行可能
        assert_eq!(pool.pending_total(), 0);
        assert_eq!(pool.executable_total(), 3);
    }

    #[test]
    fn pop_best_orders_by_gas_price_then_arrival() {
        let mut pool = TxPool::new(1, 12_000_000);
        pool.add(tx(1, 0, 10), &rich_view()).unwrap();
        pool.add(tx(2, 0, 30), &rich_view()).unwrap();
        pool.add(tx(3, 0, 30), &rich_view()).unwrap();

        let first = pool.pop_best().unwrap();
        assert_eq!(first.from, [2u8; 20]);
        let second = pool.pop_best().unwrap();
        assert_eq!(second.from, [3u8; 20]);
        let third = pool.pop_best().unwrap();
        assert_eq!(third.from, [1u8; 20]);
        assert!(pool.pop_best().is_none());
    }

    #[test]
    fn sender_nonce_order_beats_gas_price_within_sender() {
        let mut pool = TxPool::new(1, 12_000_000);
        pool.add(tx(1, 0, 10), &rich_view()).unwrap();
        pool.add(tx(1, 1, 99), &rich_view()).unwrap();

        let first = pool.pop_best().unwrap();
        assert_eq!(first.nonce, 0);
        let second = pool.pop_best().unwrap();
        assert_eq!(second.nonce, 1);
    }

    #[test]
    fn nonce_too_low_is_rejected() {
        let mut pool = TxPool::new(1, 12_000_000);
        let view = FixedView {
            nonce: 5,
            balance: U256::MAX,
        };
        let err = pool.add(tx(1, 4, 10), &view).unwrap_err();
        assert!(matches!(err, ValidationError::NonceTooLow { .. }));
    }

    #[test]
    fn oversized_input_is_rejected_at_admission() {
        let mut pool = TxPool::new(1, 12_000_000);
        let mut oversized = tx(1, 0, 10);
        oversized.input = vec![0u8; MAX_TX_INPUT + 1];
        let err = pool.add(oversized, &rich_view()).unwrap_err();
        assert!(matches!(err, ValidationError::TxTooLarge { .. }));
        assert_eq!(pool.pending_total(), 0);
        assert_eq!(pool.executable_total(), 0);
    }

    #[test]
    fn insufficient_balance_is_rejected() {
        let mut pool = TxPool::new(1, 12_000_000);
        let view = FixedView {
            nonce: 0,
            balance: U256::from(1_000u64),
        };
        let err = pool.add(tx(1, 0, 10), &view).unwrap_err();
        assert_eq!(err, ValidationError::InsufficientFunds);
    }

    #[test]
    fn replacement_requires_higher_price() {
        let mut pool = TxPool::new(1, 12_000_000);
        pool.add(tx(1, 0, 10), &rich_view()).unwrap();
        let err = pool.add(tx(1, 0, 10), &rich_view()).unwrap_err();
        assert_eq!(err, ValidationError::UnderpricedReplacement);
        pool.add(tx(1, 0, 20), &rich_view()).unwrap();
        let best = pool.pop_best().unwrap();
        assert_eq!(best.gas_price, 20);
    }

    #[test]
    fn paused_pool_admits_without_drain() {
        let mut pool = TxPool::new(1, 12_000_000);
        pool.pause();
        let outcome = pool.add(tx(1, 0, 10), &rich_view()).unwrap();
        assert!(!outcome.drained);
        assert!(!pool.has_executable());

        pool.resume();
        let drained = pool.promote_all(&rich_view());
        assert!(drained);
        assert_eq!(pool.executable_total(), 1);
    }

    #[test]
    fn requeue_front_restores_mining_order() {
        let mut pool = TxPool::new(1, 12_000_000);
        pool.add(tx(1, 0, 10), &rich_view()).unwrap();
        pool.add(tx(1, 1, 10), &rich_view()).unwrap();
        let head = pool.pop_best().unwrap();
        pool.requeue_front(head.clone());
        let again = pool.pop_best().unwrap();
        assert_eq!(again, head);
    }

    #[test]
    fn clear_drops_everything() {
        let mut pool = TxPool::new(1, 12_000_000);
        pool.add(tx(1, 0, 10), &rich_view()).unwrap();
        pool.add(tx(1, 5, 10), &rich_view()).unwrap();
        pool.clear();
        assert_eq!(pool.pending_total(), 0);
        assert_eq!(pool.executable_total(), 0);
        assert!(pool.pop_best().is_none());
    }
}
