//! どこで: intervalマイニングテスト / 何を: 刻み毎の一括取り込み / なぜ: instamineと排他のもう一方の規律を固定するため

use hakoniwa_core::Blockchain;
use std::time::Duration;

mod common;
use common::{dev_signer, ether, single_account_options, transfer, wait_for_block};

#[test]
fn interval_tick_batches_all_executable_transactions() {
    common::init_tracing();
    let (secret, sender) = dev_signer(0x31);
    let (_, recipient) = dev_signer(0x32);
    let mut options = single_account_options(sender);
    options.miner.block_time = 1;

    let (chain, events) = Blockchain::start_with_events(options).expect("start");

    // 1刻みの間に3件積む。どれも即時には採掘されない。
    for _ in 0..3 {
        chain
            .queue_transaction(transfer(recipient, ether(1), 20), Some(secret))
            .expect("queue");
    }
    assert_eq!(chain.latest_block().expect("latest").number, 0);

    let block = wait_for_block(&events, Duration::from_secs(5)).expect("tick mines");
    assert_eq!(block.number, 1);
    assert_eq!(block.tx_hashes.len(), 3);

    // nonce昇順で取り込まれている
    let mut nonces = Vec::new();
    for hash in block.tx_hashes.iter() {
        let tx = chain.get_transaction(*hash).expect("read").expect("stored");
        nonces.push(tx.nonce);
    }
    assert_eq!(nonces, vec![0, 1, 2]);

    let (pending, executable) = chain.pool_content().expect("pool");
    assert!(pending.is_empty());
    assert!(executable.is_empty());
    chain.stop().expect("stop");
}

#[test]
fn paused_interval_chain_skips_ticks_until_resume() {
    let (secret, sender) = dev_signer(0x33);
    let (_, recipient) = dev_signer(0x34);
    let mut options = single_account_options(sender);
    options.miner.block_time = 1;

    let (chain, events) = Blockchain::start_with_events(options).expect("start");
    chain.pause().expect("pause");
    chain
        .queue_transaction(transfer(recipient, ether(1), 20), Some(secret))
        .expect("queue");

    // pause中は刻みが来てもブロックは出ない
    assert!(wait_for_block(&events, Duration::from_millis(2_500)).is_none());
    assert_eq!(chain.latest_block().expect("latest").number, 0);

    chain.resume().expect("resume");
    let block = wait_for_block(&events, Duration::from_secs(5)).expect("resumed tick");
    assert_eq!(block.number, 1);
    assert_eq!(block.tx_hashes.len(), 1);
    chain.stop().expect("stop");
}
