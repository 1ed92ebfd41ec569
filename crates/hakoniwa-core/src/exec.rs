//! どこで: REVM実行の境界 / 何を: TxEnv組み立てとtransact結果の写像 / なぜ: 状態更新をEVM経由に限定するため

use crate::tx::{intrinsic_gas, PooledTx};
use alloy_primitives::Log;
use revm::context::{BlockEnv, TxEnv};
use revm::context_interface::result::ExecutionResult;
use revm::database_interface::Database;
use revm::handler::ExecuteEvm;
use revm::primitives::hardfork::SpecId;
use revm::primitives::{Address, Bytes, TxKind, U256};
use revm::state::EvmState;
use revm::{Context, MainBuilder, MainContext};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExecError {
    /// 実行前に弾かれた（nonce/残高/ガス等）。ガスは消費されない。
    Invalid(String),
    ExecutionFailed,
}

#[derive(Clone, Debug)]
pub struct BlockExecContext {
    pub number: u64,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub coinbase: [u8; 20],
    pub chain_id: u64,
    pub spec: SpecId,
    pub allow_unlimited_contract_size: bool,
}

#[derive(Clone, Debug)]
pub struct ExecOutcome {
    pub status: u8,
    pub gas_used: u64,
    pub return_data: Vec<u8>,
    pub logs: Vec<Log>,
    pub contract_address: Option<[u8; 20]>,
    /// revert/halt時の分類ラベル。receiptには載らず呼び出し側の通知にだけ使う。
    pub failure: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct CallRequest {
    pub from: Option<[u8; 20]>,
    pub to: Option<[u8; 20]>,
    pub gas: Option<u64>,
    pub gas_price: Option<u128>,
    pub value: U256,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct CallOutcome {
    pub status: u8,
    pub gas_used: u64,
    pub return_data: Vec<u8>,
    pub failure: Option<String>,
}

/// pool経由のトランザクションを1件実行する。commitは呼び出し側。
pub fn execute_tx<DB>(
    db: &mut DB,
    tx: &PooledTx,
    ctx: &BlockExecContext,
) -> Result<(ExecOutcome, EvmState), ExecError>
where
    DB: Database,
{
    let tx_env = TxEnv {
        caller: Address::from(tx.from),
        gas_limit: tx.gas_limit,
        gas_price: tx.gas_price,
        kind: match tx.to {
            Some(to) => TxKind::Call(Address::from(to)),
            None => TxKind::Create,
        },
        value: tx.value,
        data: Bytes::from(tx.input.clone()),
        nonce: tx.nonce,
        chain_id: Some(ctx.chain_id),
        access_list: Default::default(),
        gas_priority_fee: None,
        blob_hashes: Default::default(),
        max_fee_per_blob_gas: 0,
        authorization_list: Default::default(),
        tx_type: 0,
    };
    transact(db, tx_env, ctx, false)
}

/// simulate用の読み取り実行。nonce検査を外し、stateへは何も書かない。
pub fn call<DB>(
    db: &mut DB,
    request: &CallRequest,
    ctx: &BlockExecContext,
    call_gas_limit: u64,
    default_gas_price: u128,
) -> Result<CallOutcome, ExecError>
where
    DB: Database,
{
    let gas_limit = request.gas.unwrap_or(call_gas_limit);
    let is_create = request.to.is_none();
    let intrinsic = intrinsic_gas(&request.data, is_create);
    if intrinsic > gas_limit {
        return Err(ExecError::Invalid(format!(
            "base fee exceeds gas limit: intrinsic={intrinsic} gas={gas_limit}"
        )));
    }
    let tx_env = TxEnv {
        caller: Address::from(request.from.unwrap_or([0u8; 20])),
        gas_limit,
        gas_price: request.gas_price.unwrap_or(default_gas_price),
        kind: match request.to {
            Some(to) => TxKind::Call(Address::from(to)),
            None => TxKind::Create,
        },
        value: request.value,
        data: Bytes::from(request.data.clone()),
        nonce: 0,
        chain_id: Some(ctx.chain_id),
        access_list: Default::default(),
        gas_priority_fee: None,
        blob_hashes: Default::default(),
        max_fee_per_blob_gas: 0,
        authorization_list: Default::default(),
        tx_type: 0,
    };
    let (outcome, _) = transact(db, tx_env, ctx, true)?;
    Ok(CallOutcome {
        status: outcome.status,
        gas_used: outcome.gas_used,
        return_data: outcome.return_data,
        failure: outcome.failure,
    })
}

fn transact<DB>(
    db: &mut DB,
    tx_env: TxEnv,
    ctx: &BlockExecContext,
    relax_checks: bool,
) -> Result<(ExecOutcome, EvmState), ExecError>
where
    DB: Database,
{
    let mut evm_ctx = Context::mainnet().with_db(&mut *db);
    evm_ctx.block = BlockEnv {
        number: U256::from(ctx.number),
        timestamp: U256::from(ctx.timestamp),
        gas_limit: ctx.gas_limit,
        beneficiary: Address::from(ctx.coinbase),
        basefee: 0,
        ..Default::default()
    };
    evm_ctx.cfg.chain_id = ctx.chain_id;
    evm_ctx.cfg.spec = ctx.spec;
    if ctx.allow_unlimited_contract_size {
        evm_ctx.cfg.limit_contract_code_size = Some(usize::MAX);
    }
    if relax_checks {
        // callはheadの口座状態と無関係に通す。call_gas_limitはblock gasを超えてよい。
        evm_ctx.cfg.disable_nonce_check = true;
        evm_ctx.cfg.disable_block_gas_limit = true;
    }
    let mut evm = evm_ctx.build_mainnet();
    let result = evm
        .transact(tx_env)
        .map_err(|err| ExecError::Invalid(format!("{err:?}")))?;
    let state = result.state;

    let outcome = match result.result {
        ExecutionResult::Success {
            gas_used,
            output,
            logs,
            ..
        } => {
            let contract_address = output.address().map(|address| address.0 .0);
            ExecOutcome {
                status: 1,
                gas_used,
                return_data: output.data().as_ref().to_vec(),
                logs,
                contract_address,
                failure: None,
            }
        }
        ExecutionResult::Revert { gas_used, output } => ExecOutcome {
            status: 0,
            gas_used,
            return_data: output.to_vec(),
            logs: Vec::new(),
            contract_address: None,
            failure: Some("Revert".to_string()),
        },
        ExecutionResult::Halt { gas_used, reason } => ExecOutcome {
            status: 0,
            gas_used,
            return_data: Vec::new(),
            logs: Vec::new(),
            contract_address: None,
            failure: Some(format!("Halt:{reason:?}")),
        },
    };
    Ok((outcome, state))
}
