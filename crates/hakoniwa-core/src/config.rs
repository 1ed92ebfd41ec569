//! どこで: 起動オプション / 何を: miner/chain設定の既定値と検証 / なぜ: 未知キーと矛盾設定を起動前に弾くため

use alloy_primitives::U256;
use revm::primitives::hardfork::SpecId;
use serde::Deserialize;

pub const DEFAULT_GAS_PRICE: u128 = 2_000_000_000;
pub const DEFAULT_BLOCK_GAS_LIMIT: u64 = 12_000_000;
pub const DEFAULT_TRANSACTION_GAS_LIMIT: u64 = 90_000;
pub const DEFAULT_CALL_GAS_LIMIT: u64 = (1u64 << 53) - 1;
pub const DEFAULT_CHAIN_ID: u64 = 1337;
pub const MAX_EXTRA_DATA: usize = 32;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    ExtraDataTooLong { len: usize },
    LegacyInstamineRequiresInstamine,
    CoinbaseIndexOutOfRange { index: usize },
    InvalidAddress(String),
    ZeroBlockGasLimit,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Coinbase {
    /// initial_accounts の添字。
    AccountIndex(usize),
    /// 0xプレフィクス付き20byteアドレス。
    Address(String),
}

impl Default for Coinbase {
    fn default() -> Self {
        Coinbase::AccountIndex(usize::MAX)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Hardfork {
    Merge,
    Shanghai,
    Cancun,
    #[default]
    Prague,
}

impl Hardfork {
    pub fn spec_id(self) -> SpecId {
        match self {
            Hardfork::Merge => SpecId::MERGE,
            Hardfork::Shanghai => SpecId::SHANGHAI,
            Hardfork::Cancun => SpecId::CANCUN,
            Hardfork::Prague => SpecId::PRAGUE,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
pub struct MinerOptions {
    /// 秒。0でinstamine、正でintervalマイニング。
    pub block_time: u64,
    pub gas_price: u128,
    pub block_gas_limit: u64,
    pub default_transaction_gas_limit: u64,
    pub call_gas_limit: u64,
    pub coinbase: Coinbase,
    pub extra_data: Vec<u8>,
    pub legacy_instamine: bool,
}

impl Default for MinerOptions {
    fn default() -> Self {
        Self {
            block_time: 0,
            gas_price: DEFAULT_GAS_PRICE,
            block_gas_limit: DEFAULT_BLOCK_GAS_LIMIT,
            default_transaction_gas_limit: DEFAULT_TRANSACTION_GAS_LIMIT,
            call_gas_limit: DEFAULT_CALL_GAS_LIMIT,
            coinbase: Coinbase::default(),
            extra_data: Vec::new(),
            legacy_instamine: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct GenesisAccount {
    pub address: String,
    pub balance: U256,
    #[serde(default)]
    pub nonce: u64,
    #[serde(default)]
    pub code: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
pub struct ChainOptions {
    pub chain_id: u64,
    pub vm_errors_on_rpc_response: bool,
    pub allow_unlimited_contract_size: bool,
    /// 起動時刻(ms)。指定するとclockオフセットの初期値になる。
    pub time: Option<u64>,
    pub hardfork: Hardfork,
    pub initial_accounts: Vec<GenesisAccount>,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            vm_errors_on_rpc_response: false,
            allow_unlimited_contract_size: false,
            time: None,
            hardfork: Hardfork::default(),
            initial_accounts: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
pub struct SimulatorOptions {
    pub miner: MinerOptions,
    pub chain: ChainOptions,
}

impl SimulatorOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.miner.extra_data.len() > MAX_EXTRA_DATA {
            return Err(ConfigError::ExtraDataTooLong {
                len: self.miner.extra_data.len(),
            });
        }
        if self.miner.legacy_instamine && self.miner.block_time != 0 {
            return Err(ConfigError::LegacyInstamineRequiresInstamine);
        }
        if self.miner.block_gas_limit == 0 {
            return Err(ConfigError::ZeroBlockGasLimit);
        }
        if let Coinbase::AccountIndex(index) = self.miner.coinbase {
            if index != usize::MAX && index >= self.chain.initial_accounts.len() {
                return Err(ConfigError::CoinbaseIndexOutOfRange { index });
            }
        }
        Ok(())
    }

    /// coinbase設定を20byteアドレスへ解決する。既定はゼロアドレス。
    pub fn resolved_coinbase(&self) -> [u8; 20] {
        match &self.miner.coinbase {
            Coinbase::AccountIndex(index) => {
                if *index == usize::MAX {
                    return [0u8; 20];
                }
                self.chain
                    .initial_accounts
                    .get(*index)
                    .and_then(|account| parse_address(&account.address))
                    .unwrap_or([0u8; 20])
            }
            Coinbase::Address(raw) => parse_address(raw).unwrap_or([0u8; 20]),
        }
    }

    pub fn instamine(&self) -> bool {
        self.miner.block_time == 0
    }
}

pub fn parse_address(raw: &str) -> Option<[u8; 20]> {
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(stripped).ok()?;
    if bytes.len() != 20 {
        return None;
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Some(out)
}
