//! どこで: blockchain controller / 何を: 単一消費者のワーカとコマンド面 / なぜ: fill→save→emitを直列化しheadの書き手を1つにするため
//!
//! ワーカスレッドがstable stateとtrieを占有し、全操作はコマンドとして
//! 直列に流れる。intervalマイニングは受信デッドラインのタイムアウトで刻む。

use crate::accounts::{self, AccountSeed, AccountState};
use crate::clock::Clock;
use crate::config::{ConfigError, SimulatorOptions};
use crate::error::{ChainError, ValidationError};
use crate::events::{ChainEvent, EventHub};
use crate::exec::{call, BlockExecContext, CallRequest, ExecError};
use crate::miner::{MinedBlockData, Miner};
use crate::pool::{AccountView, SenderAccount, TxPool};
use crate::snapshots::SnapshotManager;
use crate::state_db::TrieDb;
use crate::trie::{Trie, EMPTY_ROOT};
use crate::tx::{decode_raw_transaction, sign_request, PooledTx, TransactionRequest};
use crate::{config, hash};
use alloy_primitives::U256;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use hakoniwa_db::chain_data::{
    ops, BlockLogEntry, BlockLogs, HeadRef, StoredBlock, StoredReceipt, StoredTx, TxBlockContext,
};
use hakoniwa_db::stable_state::{init_stable_state, with_state, with_state_mut};
use revm::database::CacheDB;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockSelector {
    Latest,
    Earliest,
    Number(u64),
    Hash([u8; 32]),
}

enum Command {
    QueueRequest {
        request: TransactionRequest,
        secret_key: Option<[u8; 32]>,
        reply: Sender<Result<[u8; 32], ChainError>>,
    },
    QueueRaw {
        raw: Vec<u8>,
        reply: Sender<Result<[u8; 32], ChainError>>,
    },
    Mine {
        max_transactions: Option<usize>,
        timestamp: Option<u64>,
        only_one_block: bool,
        reply: Sender<Result<usize, ChainError>>,
    },
    Simulate {
        request: CallRequest,
        block: BlockSelector,
        reply: Sender<Result<Vec<u8>, ChainError>>,
    },
    Snapshot {
        reply: Sender<u64>,
    },
    Revert {
        id: u64,
        reply: Sender<bool>,
    },
    Pause {
        reply: Sender<()>,
    },
    Resume {
        reply: Sender<()>,
    },
    IncreaseTime {
        seconds: u64,
        reply: Sender<i64>,
    },
    SetTime {
        timestamp_ms: u64,
        reply: Sender<i64>,
    },
    GetBlock {
        selector: BlockSelector,
        reply: Sender<Option<StoredBlock>>,
    },
    GetTransaction {
        hash: [u8; 32],
        reply: Sender<Option<StoredTx>>,
    },
    GetReceipt {
        hash: [u8; 32],
        reply: Sender<Option<StoredReceipt>>,
    },
    GetBlockLogs {
        number: u64,
        reply: Sender<Option<BlockLogs>>,
    },
    GetAccount {
        address: [u8; 20],
        block: BlockSelector,
        reply: Sender<Option<AccountState>>,
    },
    GetStorageAt {
        address: [u8; 20],
        slot: [u8; 32],
        block: BlockSelector,
        reply: Sender<[u8; 32]>,
    },
    GetCode {
        address: [u8; 20],
        block: BlockSelector,
        reply: Sender<Vec<u8>>,
    },
    PoolContent {
        reply: Sender<(Vec<PooledTx>, Vec<PooledTx>)>,
    },
    Stop {
        reply: Sender<()>,
    },
}

/// RPC層へ渡すハンドル。全呼び出しはワーカへのコマンド送信に直列化される。
pub struct Blockchain {
    commands: Sender<Command>,
    events: EventHub,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Blockchain {
    pub fn start(options: SimulatorOptions) -> Result<Self, ChainError> {
        let (chain, _events) = Self::start_with_events(options)?;
        Ok(chain)
    }

    /// start前に購読を張るための入口。`Started`イベントを取りこぼさない。
    pub fn start_with_events(
        options: SimulatorOptions,
    ) -> Result<(Self, Receiver<ChainEvent>), ChainError> {
        options.validate().map_err(ChainError::Config)?;
        let events = EventHub::new();
        let receiver = events.subscribe();
        let (command_tx, command_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded::<Result<(), ChainError>>(1);
        let worker_events = events.clone();
        let handle = std::thread::Builder::new()
            .name("hakoniwa-chain".to_string())
            .spawn(move || {
                let mut worker = match Worker::bootstrap(options, command_rx, worker_events) {
                    Ok(worker) => {
                        let _ = ready_tx.send(Ok(()));
                        worker
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                worker.run();
            })
            .map_err(|err| ChainError::Storage(format!("worker spawn failed: {err}")))?;
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = handle.join();
                return Err(err);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(ChainError::Lifecycle("worker died during start"));
            }
        }
        Ok((
            Self {
                commands: command_tx,
                events,
                worker: Mutex::new(Some(handle)),
                stopped: AtomicBool::new(false),
            },
            receiver,
        ))
    }

    pub fn subscribe(&self) -> Receiver<ChainEvent> {
        self.events.subscribe()
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Result<T, ChainError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ChainError::Lifecycle("blockchain is stopped"));
        }
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(build(reply_tx))
            .map_err(|_| ChainError::Lifecycle("blockchain is stopped"))?;
        reply_rx
            .recv()
            .map_err(|_| ChainError::Lifecycle("blockchain is stopped"))
    }

    /// 未署名リクエストを供給鍵で署名して投入する。返るhashは署名後に確定した値。
    pub fn queue_transaction(
        &self,
        request: TransactionRequest,
        secret_key: Option<[u8; 32]>,
    ) -> Result<[u8; 32], ChainError> {
        self.request(|reply| Command::QueueRequest {
            request,
            secret_key,
            reply,
        })?
    }

    pub fn queue_raw_transaction(&self, raw: Vec<u8>) -> Result<[u8; 32], ChainError> {
        self.request(|reply| Command::QueueRaw { raw, reply })?
    }

    /// on-demandマイニング。直前のsaveはコマンド直列化で完了済み。
    /// 戻り値は作られたブロック数。
    pub fn mine(
        &self,
        max_transactions: Option<usize>,
        timestamp: Option<u64>,
        only_one_block: bool,
    ) -> Result<usize, ChainError> {
        self.request(|reply| Command::Mine {
            max_transactions,
            timestamp,
            only_one_block,
            reply,
        })?
    }

    pub fn simulate_transaction(
        &self,
        request: CallRequest,
        block: BlockSelector,
    ) -> Result<Vec<u8>, ChainError> {
        self.request(|reply| Command::Simulate {
            request,
            block,
            reply,
        })?
    }

    pub fn snapshot(&self) -> Result<u64, ChainError> {
        self.request(|reply| Command::Snapshot { reply })
    }

    pub fn revert(&self, id: u64) -> Result<bool, ChainError> {
        self.request(|reply| Command::Revert { id, reply })
    }

    pub fn pause(&self) -> Result<(), ChainError> {
        self.request(|reply| Command::Pause { reply })
    }

    pub fn resume(&self) -> Result<(), ChainError> {
        self.request(|reply| Command::Resume { reply })
    }

    /// 戻り値は調整後オフセット合計(秒)。
    pub fn increase_time(&self, seconds: u64) -> Result<i64, ChainError> {
        self.request(|reply| Command::IncreaseTime { seconds, reply })
    }

    pub fn set_time(&self, timestamp_ms: u64) -> Result<i64, ChainError> {
        self.request(|reply| Command::SetTime {
            timestamp_ms,
            reply,
        })
    }

    pub fn get_block(&self, selector: BlockSelector) -> Result<Option<StoredBlock>, ChainError> {
        self.request(|reply| Command::GetBlock { selector, reply })
    }

    pub fn latest_block(&self) -> Result<StoredBlock, ChainError> {
        self.get_block(BlockSelector::Latest)?
            .ok_or(ChainError::Lifecycle("chain has no head block"))
    }

    pub fn get_transaction(&self, hash: [u8; 32]) -> Result<Option<StoredTx>, ChainError> {
        self.request(|reply| Command::GetTransaction { hash, reply })
    }

    pub fn get_receipt(&self, hash: [u8; 32]) -> Result<Option<StoredReceipt>, ChainError> {
        self.request(|reply| Command::GetReceipt { hash, reply })
    }

    pub fn get_block_logs(&self, number: u64) -> Result<Option<BlockLogs>, ChainError> {
        self.request(|reply| Command::GetBlockLogs { number, reply })
    }

    pub fn get_account(
        &self,
        address: [u8; 20],
        block: BlockSelector,
    ) -> Result<Option<AccountState>, ChainError> {
        self.request(|reply| Command::GetAccount {
            address,
            block,
            reply,
        })
    }

    pub fn get_storage_at(
        &self,
        address: [u8; 20],
        slot: [u8; 32],
        block: BlockSelector,
    ) -> Result<[u8; 32], ChainError> {
        self.request(|reply| Command::GetStorageAt {
            address,
            slot,
            block,
            reply,
        })
    }

    pub fn get_code(
        &self,
        address: [u8; 20],
        block: BlockSelector,
    ) -> Result<Vec<u8>, ChainError> {
        self.request(|reply| Command::GetCode {
            address,
            block,
            reply,
        })
    }

    pub fn pool_content(&self) -> Result<(Vec<PooledTx>, Vec<PooledTx>), ChainError> {
        self.request(|reply| Command::PoolContent { reply })
    }

    /// stopイベントを流してワーカを畳む。二度目以降はLifecycleエラー。
    pub fn stop(&self) -> Result<(), ChainError> {
        let result = self.request(|reply| Command::Stop { reply });
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            let _ = handle.join();
        }
        result
    }
}

impl Drop for Blockchain {
    fn drop(&mut self) {
        // joinしない: 落ちるプロセスをワーカが引き留めないこと。
        if !self.stopped.load(Ordering::SeqCst) {
            let (reply, _) = bounded(1);
            let _ = self.commands.send(Command::Stop { reply });
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

/// trieの現rootで口座を引くpool用ビュー。
struct HeadView<'a> {
    trie: &'a Trie,
}

impl AccountView for HeadView<'_> {
    fn sender_account(&self, address: [u8; 20]) -> SenderAccount {
        match accounts::get_account(self.trie, self.trie.root(), address) {
            Some(account) => SenderAccount {
                nonce: account.nonce,
                balance: account.balance,
            },
            None => SenderAccount {
                nonce: 0,
                balance: U256::ZERO,
            },
        }
    }
}

struct Worker {
    options: SimulatorOptions,
    coinbase: [u8; 20],
    trie: Trie,
    pool: TxPool,
    miner: Miner,
    snapshots: SnapshotManager,
    clock: Clock,
    events: EventHub,
    commands: Receiver<Command>,
    paused: bool,
    /// legacy instamine中の確定通知。hash -> 実行失敗なら(reason, return_data)。
    finalized: HashMap<[u8; 32], Option<(String, Vec<u8>)>>,
}

impl Worker {
    fn bootstrap(
        options: SimulatorOptions,
        commands: Receiver<Command>,
        events: EventHub,
    ) -> Result<Self, ChainError> {
        init_stable_state(options.chain.chain_id);
        let mut clock = Clock::default();
        if let Some(time_ms) = options.chain.time {
            clock.set_time(time_ms);
        } else {
            let stored = with_state(|state| state.chain_meta.get().time_offset_ms);
            clock.set_offset_ms(stored);
        }

        let coinbase = options.resolved_coinbase();
        let pool = TxPool::new(options.miner.gas_price, options.miner.block_gas_limit);
        let mut worker = Self {
            trie: Trie::new(),
            pool,
            miner: Miner::new(),
            snapshots: SnapshotManager::new(),
            clock,
            events,
            commands,
            paused: false,
            coinbase,
            finalized: HashMap::new(),
            options,
        };
        worker.load_or_create_genesis()?;
        worker.events.publish(ChainEvent::Started);
        tracing::info!(
            chain_id = worker.options.chain.chain_id,
            block_time = worker.options.miner.block_time,
            "blockchain started"
        );
        Ok(worker)
    }

    fn load_or_create_genesis(&mut self) -> Result<(), ChainError> {
        if with_state(|state| ops::get_block_by_number(state, 0)).is_some() {
            let head = with_state(ops::head);
            self.trie = Trie::from_root(head.state_root);
            tracing::debug!(head_number = head.number, "adopted existing chain");
            return Ok(());
        }

        self.trie.checkpoint();
        let seeds: Vec<AccountSeed> = self
            .options
            .chain
            .initial_accounts
            .iter()
            .map(|account| {
                let address = config::parse_address(&account.address).ok_or_else(|| {
                    ChainError::Config(ConfigError::InvalidAddress(account.address.clone()))
                })?;
                Ok(AccountSeed {
                    address,
                    balance: account.balance,
                    nonce: account.nonce,
                    code: account.code.clone(),
                })
            })
            .collect::<Result<_, ChainError>>()?;
        for seed in seeds.iter() {
            accounts::put_account(&mut self.trie, seed);
        }

        let timestamp = self.clock.now_sec();
        let state_root_after_seed = self.trie.root();
        let block_hash = hash::block_hash(
            [0u8; 32],
            0,
            timestamp,
            EMPTY_ROOT,
            EMPTY_ROOT,
            state_root_after_seed,
        );
        let genesis = StoredBlock {
            number: 0,
            block_hash,
            parent_hash: [0u8; 32],
            coinbase: self.coinbase,
            timestamp,
            gas_limit: self.options.miner.block_gas_limit,
            gas_used: 0,
            state_root: state_root_after_seed,
            transactions_root: EMPTY_ROOT,
            receipts_root: EMPTY_ROOT,
            extra_data: self.options.miner.extra_data.clone(),
            tx_hashes: Vec::new(),
        };
        let head = HeadRef {
            number: 0,
            block_hash,
            state_root: state_root_after_seed,
            timestamp,
        };
        let trie = &mut self.trie;
        with_state_mut(|state| {
            trie.commit_into(state)
                .map_err(|_| ChainError::Storage("genesis trie commit failed".to_string()))?;
            ops::put_block(state, &genesis);
            ops::set_head(state, head);
            ops::set_earliest(state, head);
            let mut meta = *state.chain_meta.get();
            meta.time_offset_ms = self.clock.offset_ms();
            state.chain_meta.set(meta);
            Ok(())
        })
    }

    fn run(&mut self) {
        let block_time = self.options.miner.block_time;
        let interval = (block_time > 0).then(|| Duration::from_secs(block_time));
        let mut next_tick = interval.map(|period| Instant::now() + period);

        loop {
            let command = match next_tick {
                Some(deadline) => match self.commands.recv_deadline(deadline) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => {
                        self.interval_tick();
                        next_tick = interval.map(|period| Instant::now() + period);
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.commands.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                },
            };
            if let Some(command) = command {
                if matches!(self.handle(command), Flow::Stop) {
                    break;
                }
            }
        }
        tracing::debug!("chain worker exited");
    }

    /// intervalモードの1刻み。そのとき実行可能な全txで1ブロック。
    fn interval_tick(&mut self) {
        if self.paused {
            return;
        }
        let mined = self.mine_blocks(None, None, true, None);
        if mined > 0 {
            tracing::debug!(blocks = mined, "interval tick mined");
        }
    }

    fn handle(&mut self, command: Command) -> Flow {
        match command {
            Command::QueueRequest {
                request,
                secret_key,
                reply,
            } => {
                self.handle_queue(QueueInput::Request(request, secret_key), reply);
            }
            Command::QueueRaw { raw, reply } => {
                self.handle_queue(QueueInput::Raw(raw), reply);
            }
            Command::Mine {
                max_transactions,
                timestamp,
                only_one_block,
                reply,
            } => {
                let mined = self.mine_blocks(max_transactions, timestamp, only_one_block, None);
                let _ = reply.send(Ok(mined));
            }
            Command::Simulate {
                request,
                block,
                reply,
            } => {
                let _ = reply.send(self.simulate(request, block));
            }
            Command::Snapshot { reply } => {
                let head = with_state(ops::head);
                let id = self.snapshots.take(head, self.clock.offset_ms());
                let _ = reply.send(id);
            }
            Command::Revert { id, reply } => {
                let _ = reply.send(self.revert_to_snapshot(id));
            }
            Command::Pause { reply } => {
                self.paused = true;
                self.miner.pause();
                self.pool.pause();
                let _ = reply.send(());
            }
            Command::Resume { reply } => {
                self.paused = false;
                self.miner.resume();
                self.pool.resume();
                let drained = self.pool.promote_all(&HeadView { trie: &self.trie });
                let _ = reply.send(());
                if (drained || self.pool.has_executable()) && self.options.instamine() {
                    self.drain_instamine(None);
                }
            }
            Command::IncreaseTime { seconds, reply } => {
                let offset = self.clock.increase_time(seconds);
                self.persist_time_offset();
                let _ = reply.send(offset);
            }
            Command::SetTime {
                timestamp_ms,
                reply,
            } => {
                let offset = self.clock.set_time(timestamp_ms);
                self.persist_time_offset();
                let _ = reply.send(offset);
            }
            Command::GetBlock { selector, reply } => {
                let _ = reply.send(self.resolve_block(selector));
            }
            Command::GetTransaction { hash, reply } => {
                let _ = reply.send(with_state(|state| ops::get_transaction(state, hash)));
            }
            Command::GetReceipt { hash, reply } => {
                let _ = reply.send(with_state(|state| ops::get_receipt(state, hash)));
            }
            Command::GetBlockLogs { number, reply } => {
                let _ = reply.send(with_state(|state| ops::get_block_logs(state, number)));
            }
            Command::GetAccount {
                address,
                block,
                reply,
            } => {
                let root = self.state_root_of(block);
                let account =
                    root.and_then(|root| accounts::get_account(&self.trie, root, address));
                let _ = reply.send(account);
            }
            Command::GetStorageAt {
                address,
                slot,
                block,
                reply,
            } => {
                let value = self
                    .state_root_of(block)
                    .map(|root| accounts::get_storage_at(&self.trie, root, address, slot))
                    .unwrap_or([0u8; 32]);
                let _ = reply.send(value);
            }
            Command::GetCode {
                address,
                block,
                reply,
            } => {
                let code = self
                    .state_root_of(block)
                    .map(|root| accounts::get_code(&self.trie, root, address))
                    .unwrap_or_default();
                let _ = reply.send(code);
            }
            Command::PoolContent { reply } => {
                let _ = reply.send(self.pool.content());
            }
            Command::Stop { reply } => {
                self.events.publish(ChainEvent::Stopped);
                tracing::info!("blockchain stopped");
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    // --- submit ---

    fn handle_queue(
        &mut self,
        input: QueueInput,
        reply: Sender<Result<[u8; 32], ChainError>>,
    ) {
        let pooled = match self.build_pooled(input) {
            Ok(pooled) => pooled,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };
        let outcome = {
            let view = HeadView { trie: &self.trie };
            self.pool.add(pooled.clone(), &view)
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                let _ = reply.send(Err(ChainError::Validation(err)));
                return;
            }
        };
        self.events
            .publish(ChainEvent::PendingTransaction(stored_tx_of(&pooled, None)));

        let legacy = self.options.miner.legacy_instamine;
        if !legacy {
            let _ = reply.send(Ok(outcome.hash));
            if outcome.drained && self.options.instamine() && !self.paused {
                self.drain_instamine(None);
            }
            return;
        }

        // legacy instamine: 採掘完了までhashを返さない。イベントは返答後に流す。
        let mut deferred_events: Vec<(BlockLogs, StoredBlock)> = Vec::new();
        if self.options.instamine() && !self.paused {
            self.drain_instamine(Some(&mut deferred_events));
        }
        let result = match self.finalized.remove(&outcome.hash) {
            Some(None) => Ok(outcome.hash),
            Some(Some((reason, return_data))) => {
                if self.options.chain.vm_errors_on_rpc_response {
                    Err(ChainError::Runtime {
                        reason,
                        return_data,
                    })
                } else {
                    Ok(outcome.hash)
                }
            }
            // 採掘に載らなかった（pause中など）。確定を待てないのでhashだけ返す。
            None => Ok(outcome.hash),
        };
        let _ = reply.send(result);
        for (logs, block) in deferred_events {
            self.events.publish(ChainEvent::BlockLogs(logs));
            self.events.publish(ChainEvent::Block(block));
        }
    }

    fn build_pooled(&self, input: QueueInput) -> Result<PooledTx, ChainError> {
        match input {
            QueueInput::Raw(raw) => {
                decode_raw_transaction(&raw, self.options.chain.chain_id)
                    .map_err(ChainError::Validation)
            }
            QueueInput::Request(request, secret_key) => {
                let Some(secret_key) = secret_key else {
                    return Err(ChainError::Validation(ValidationError::MissingSender));
                };
                let from_hint = request.from;
                let nonce = match request.nonce {
                    Some(nonce) => nonce,
                    None => {
                        // 未指定nonceはpool内の連続分も数えて次を割り当てる
                        let sender = from_hint.unwrap_or_else(|| {
                            crate::tx::sign_request(
                                &request,
                                &secret_key,
                                self.options.chain.chain_id,
                                0,
                                self.options.miner.default_transaction_gas_limit,
                                self.options.miner.gas_price,
                            )
                            .map(|tx| tx.from)
                            .unwrap_or([0u8; 20])
                        });
                        let view = HeadView { trie: &self.trie };
                        let account = view.sender_account(sender);
                        account
                            .nonce
                            .saturating_add(self.pool.executable_len(sender) as u64)
                    }
                };
                sign_request(
                    &request,
                    &secret_key,
                    self.options.chain.chain_id,
                    nonce,
                    self.options.miner.default_transaction_gas_limit,
                    self.options.miner.gas_price,
                )
                .map_err(ChainError::Validation)
            }
        }
    }

    /// instamine: drainごとに1tx=1ブロックを、executableが尽きるまで繰り返す。
    fn drain_instamine(&mut self, mut defer: Option<&mut Vec<(BlockLogs, StoredBlock)>>) {
        while self.pool.has_executable() && !self.miner.is_paused() {
            let mined = self.mine_blocks(Some(1), None, true, defer.as_deref_mut());
            if mined == 0 {
                break;
            }
        }
    }

    // --- mining & save ---

    fn mine_blocks(
        &mut self,
        max_transactions: Option<usize>,
        timestamp_override: Option<u64>,
        only_one_block: bool,
        mut defer: Option<&mut Vec<(BlockLogs, StoredBlock)>>,
    ) -> usize {
        let mut mined_count = 0usize;
        loop {
            let parent = with_state(ops::head);
            let timestamp = timestamp_override
                .unwrap_or_else(|| parent.timestamp.saturating_add(1).max(self.clock.now_sec()));
            let ctx = self.exec_context(parent.number.saturating_add(1), timestamp);
            let Some(mined) =
                self.miner
                    .mine(&mut self.trie, &mut self.pool, &ctx, max_transactions)
            else {
                break;
            };
            let more_ready = mined.more_ready;
            let (logs_event, block_event) = self.save_block(&parent, timestamp, mined);
            match defer.as_deref_mut() {
                Some(buffer) => buffer.push((logs_event, block_event)),
                None => {
                    self.events.publish(ChainEvent::BlockLogs(logs_event));
                    self.events.publish(ChainEvent::Block(block_event));
                }
            }
            mined_count = mined_count.saturating_add(1);
            if only_one_block || !more_ready {
                break;
            }
        }
        mined_count
    }

    /// fill→saveの本体。1ブロックの全書き込みを単一バッチに収め、
    /// blockLogs→blockの順でイベントを返す。
    fn save_block(
        &mut self,
        parent: &HeadRef,
        timestamp: u64,
        mined: MinedBlockData,
    ) -> (BlockLogs, StoredBlock) {
        let number = parent.number.saturating_add(1);
        let block_hash = hash::block_hash(
            parent.block_hash,
            number,
            timestamp,
            mined.transactions_root,
            mined.receipts_root,
            mined.state_root,
        );

        let mut tx_hashes = Vec::with_capacity(mined.executed.len());
        let mut stored_txs = Vec::with_capacity(mined.executed.len());
        let mut receipts = Vec::with_capacity(mined.executed.len());
        let mut log_entries = Vec::new();
        for (index, item) in mined.executed.iter().enumerate() {
            let tx_index = index as u32;
            tx_hashes.push(item.tx.hash);
            let context = TxBlockContext {
                block_hash,
                block_number: number,
                tx_index,
            };
            stored_txs.push(stored_tx_of(&item.tx, Some(context)));
            receipts.push(StoredReceipt {
                tx_hash: item.tx.hash,
                block_hash,
                block_number: number,
                tx_index,
                status: item.status,
                gas_used: item.gas_used,
                cumulative_gas_used: item.cumulative_gas_used,
                contract_address: item.contract_address,
                logs_bloom: item.logs_bloom,
                logs: item.logs.clone(),
            });
            for log in item.logs.iter() {
                log_entries.push(BlockLogEntry {
                    tx_index,
                    tx_hash: item.tx.hash,
                    log: log.clone(),
                });
            }
        }

        let block = StoredBlock {
            number,
            block_hash,
            parent_hash: parent.block_hash,
            coinbase: self.coinbase,
            timestamp,
            gas_limit: self.options.miner.block_gas_limit,
            gas_used: mined.gas_used,
            state_root: mined.state_root,
            transactions_root: mined.transactions_root,
            receipts_root: mined.receipts_root,
            extra_data: self.options.miner.extra_data.clone(),
            tx_hashes,
        };
        let block_logs = BlockLogs {
            block_hash,
            block_number: number,
            entries: log_entries,
        };
        let head = HeadRef {
            number,
            block_hash,
            state_root: mined.state_root,
            timestamp,
        };

        let trie = &mut self.trie;
        with_state_mut(|state| {
            if trie.commit_into(state).is_err() {
                // checkpointはminerが必ず開けている。ここに来たら保存不能。
                panic!("block save without an open trie checkpoint");
            }
            for tx in stored_txs.iter() {
                ops::put_transaction(state, tx);
            }
            for receipt in receipts.iter() {
                ops::put_receipt(state, receipt);
            }
            ops::put_block_logs(state, &block_logs);
            ops::put_block(state, &block);
            ops::set_head(state, head);
        });

        self.snapshots.observe_block(block_hash);
        if self.options.miner.legacy_instamine {
            for item in mined.executed.iter() {
                let failure = item
                    .failure
                    .clone()
                    .map(|reason| (reason, item.return_data.clone()));
                self.finalized.insert(item.tx.hash, failure);
            }
        }
        // 取り込みでnonceが進んだ分、pendingの昇格を試す
        let view = HeadView { trie: &self.trie };
        self.pool.promote_all(&view);

        tracing::info!(
            number,
            txs = block.tx_hashes.len(),
            gas_used = mined.gas_used,
            "block saved"
        );
        (block_logs, block)
    }

    fn exec_context(&self, number: u64, timestamp: u64) -> BlockExecContext {
        BlockExecContext {
            number,
            timestamp,
            gas_limit: self.options.miner.block_gas_limit,
            coinbase: self.coinbase,
            chain_id: self.options.chain.chain_id,
            spec: self.options.chain.hardfork.spec_id(),
            allow_unlimited_contract_size: self.options.chain.allow_unlimited_contract_size,
        }
    }

    // --- simulate ---

    fn simulate(
        &mut self,
        request: CallRequest,
        block: BlockSelector,
    ) -> Result<Vec<u8>, ChainError> {
        let Some(state_root) = self.state_root_of(block) else {
            return Err(ChainError::Lifecycle("unknown block for simulation"));
        };
        let gas_limit = request.gas.unwrap_or(self.options.miner.call_gas_limit);
        let intrinsic = crate::tx::intrinsic_gas(&request.data, request.to.is_none());
        if intrinsic > gas_limit {
            return Err(ChainError::OutOfGas);
        }
        let parent = with_state(ops::head);
        let timestamp = parent.timestamp.saturating_add(1).max(self.clock.now_sec());
        let ctx = self.exec_context(parent.number.saturating_add(1), timestamp);
        // CacheDBに閉じ込めるのでhead状態・pool・DBは汚れない
        let mut db = CacheDB::new(TrieDb::new(&self.trie, state_root));
        // callのgas価格既定は0。巨大なcall_gas_limitに残高検査を掛けさせない。
        let outcome = call(
            &mut db,
            &request,
            &ctx,
            self.options.miner.call_gas_limit,
            0,
        )
        .map_err(|err| match err {
            ExecError::Invalid(reason) => ChainError::Runtime {
                reason,
                return_data: Vec::new(),
            },
            ExecError::ExecutionFailed => ChainError::Lifecycle("vm execution failed"),
        })?;
        match outcome.failure {
            Some(reason) if self.options.chain.vm_errors_on_rpc_response => {
                Err(ChainError::Runtime {
                    reason,
                    return_data: outcome.return_data,
                })
            }
            _ => Ok(outcome.return_data),
        }
    }

    // --- snapshot/revert ---

    fn revert_to_snapshot(&mut self, id: u64) -> bool {
        if !self.snapshots.is_valid(id) {
            return false;
        }
        // save直列化は済んでいる。poolとminerを止めてから巻き戻す。
        self.pool.pause();
        self.miner.pause();
        self.pool.clear();
        let restored = self
            .snapshots
            .revert(id, &mut self.trie, &mut self.clock)
            .is_some();
        self.miner.resume();
        self.pool.resume();
        restored
    }

    // --- reads ---

    fn resolve_block(&self, selector: BlockSelector) -> Option<StoredBlock> {
        with_state(|state| match selector {
            BlockSelector::Latest => ops::get_block_by_number(state, ops::head(state).number),
            BlockSelector::Earliest => {
                ops::get_block_by_number(state, ops::earliest(state).number)
            }
            BlockSelector::Number(number) => ops::get_block_by_number(state, number),
            BlockSelector::Hash(hash) => ops::get_block_by_hash(state, hash),
        })
    }

    fn state_root_of(&self, selector: BlockSelector) -> Option<[u8; 32]> {
        match selector {
            BlockSelector::Latest => Some(with_state(ops::head).state_root),
            _ => self.resolve_block(selector).map(|block| block.state_root),
        }
    }

    fn persist_time_offset(&self) {
        let offset = self.clock.offset_ms();
        with_state_mut(|state| {
            let mut meta = *state.chain_meta.get();
            meta.time_offset_ms = offset;
            state.chain_meta.set(meta);
        });
    }
}

enum QueueInput {
    Request(TransactionRequest, Option<[u8; 32]>),
    Raw(Vec<u8>),
}

fn stored_tx_of(tx: &PooledTx, context: Option<TxBlockContext>) -> StoredTx {
    StoredTx {
        hash: tx.hash,
        from: tx.from,
        nonce: tx.nonce,
        gas_price: tx.gas_price,
        gas_limit: tx.gas_limit,
        to: tx.to,
        value: tx.value.to_be_bytes::<32>(),
        input: tx.input.clone(),
        v: tx.v,
        r: tx.r,
        s: tx.s,
        tx_type: 0,
        context,
    }
}
