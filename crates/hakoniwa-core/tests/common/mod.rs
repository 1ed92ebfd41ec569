//! どこで: hakoniwa-core integration tests / 何を: テスト補助関数 / なぜ: 重複を減らし変更点を1箇所に集約するため

#![allow(dead_code)]

use alloy_primitives::U256;
use alloy_signer_local::PrivateKeySigner;
use crossbeam_channel::Receiver;
use hakoniwa_core::config::{GenesisAccount, SimulatorOptions};
use hakoniwa_core::events::ChainEvent;
use hakoniwa_core::tx::TransactionRequest;
use hakoniwa_db::chain_data::StoredBlock;
use std::time::Duration;

pub const GWEI: u128 = 1_000_000_000;

/// RUST_LOG付きで流すと経緯が追える。テスト間で1回だけ初期化。
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .try_init();
    });
}

/// 42を返すだけのruntime code。
pub const RETURN_42_CODE: [u8; 10] = [0x60, 0x2a, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];
/// 常にREVERT(0,0)。
pub const REVERTER_CODE: [u8; 5] = [0x60, 0x00, 0x60, 0x00, 0xfd];
/// LOG0を1本吐いて正常終了。
pub const LOGGER_CODE: [u8; 6] = [0x60, 0x00, 0x60, 0x00, 0xa0, 0x00];

pub fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::from(10u64).pow(U256::from(18u64))
}

pub fn dev_signer(seed: u8) -> ([u8; 32], [u8; 20]) {
    let secret = [seed; 32];
    let signer = PrivateKeySigner::from_slice(&secret).expect("test secret must be a valid key");
    (secret, signer.address().0 .0)
}

pub fn hex_address(address: [u8; 20]) -> String {
    format!("0x{}", hex::encode(address))
}

/// balance 100 etherの口座を1つ持つinstamine構成。
pub fn single_account_options(address: [u8; 20]) -> SimulatorOptions {
    let mut options = SimulatorOptions::default();
    options.chain.initial_accounts = vec![GenesisAccount {
        address: hex_address(address),
        balance: ether(100),
        nonce: 0,
        code: None,
    }];
    options
}

pub fn with_contract(
    mut options: SimulatorOptions,
    address: [u8; 20],
    code: &[u8],
) -> SimulatorOptions {
    options.chain.initial_accounts.push(GenesisAccount {
        address: hex_address(address),
        balance: U256::ZERO,
        nonce: 0,
        code: Some(code.to_vec()),
    });
    options
}

pub fn transfer(to: [u8; 20], value: U256, gas_price_gwei: u128) -> TransactionRequest {
    TransactionRequest {
        to: Some(to),
        gas: Some(21_000),
        gas_price: Some(gas_price_gwei * GWEI),
        value,
        ..Default::default()
    }
}

/// Blockイベントを1件待つ。intervalマイニングのテストが使う。
pub fn wait_for_block(events: &Receiver<ChainEvent>, timeout: Duration) -> Option<StoredBlock> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.checked_duration_since(std::time::Instant::now())?;
        match events.recv_timeout(remaining) {
            Ok(ChainEvent::Block(block)) => return Some(block),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}
