//! どこで: エラー分類 / 何を: validation/runtime/lifecycleの区別 / なぜ: 呼び出し側の扱いを揃えるため

use std::fmt;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ValidationError {
    InvalidSignature,
    MalformedTransaction,
    TxTooLarge { max_bytes: usize, got: usize },
    WrongChainId,
    NonceTooLow { expected: u64, got: u64 },
    InsufficientFunds,
    GasPriceTooLow { minimum: u128, got: u128 },
    GasLimitExceedsBlock { block_gas_limit: u64, got: u64 },
    IntrinsicGasTooHigh { intrinsic: u64, gas_limit: u64 },
    UnderpricedReplacement,
    MissingSender,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChainError {
    Config(crate::config::ConfigError),
    Validation(ValidationError),
    /// VMがrevert/haltした。vm_errors_on_rpc_response時のみ呼び出し側へ浮上する。
    Runtime {
        reason: String,
        return_data: Vec<u8>,
    },
    /// intrinsic gasが供給gasを超えた（実行前）。
    OutOfGas,
    Lifecycle(&'static str),
    Storage(String),
}

impl From<ValidationError> for ChainError {
    fn from(err: ValidationError) -> Self {
        ChainError::Validation(err)
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Config(err) => write!(f, "config: {err:?}"),
            ChainError::Validation(err) => write!(f, "validation: {err:?}"),
            ChainError::Runtime { reason, .. } => write!(f, "vm exception: {reason}"),
            ChainError::OutOfGas => write!(f, "base fee exceeds gas limit"),
            ChainError::Lifecycle(what) => write!(f, "lifecycle: {what}"),
            ChainError::Storage(what) => write!(f, "storage: {what}"),
        }
    }
}

impl std::error::Error for ChainError {}
