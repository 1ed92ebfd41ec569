//! どこで: legacy instamineテスト / 何を: 確定後にhashが返る同期送信 / なぜ: 旧来の同期的なRPC体験を固定するため

use hakoniwa_core::error::ChainError;
use hakoniwa_core::Blockchain;

mod common;
use common::{dev_signer, ether, single_account_options, transfer, with_contract, REVERTER_CODE};

const REVERTER_ADDRESS: [u8; 20] = [0x66u8; 20];

#[test]
fn legacy_submission_returns_after_receipt_exists() {
    let (secret, sender) = dev_signer(0x61);
    let (_, recipient) = dev_signer(0x62);
    let mut options = single_account_options(sender);
    options.miner.legacy_instamine = true;
    let chain = Blockchain::start(options).expect("start");

    let hash = chain
        .queue_transaction(transfer(recipient, ether(1), 20), Some(secret))
        .expect("queue");

    // 返答時点でreceiptが既に引ける
    let receipt = chain.get_receipt(hash).expect("read").expect("receipt");
    assert_eq!(receipt.status, 1);
    assert_eq!(receipt.block_number, 1);
    chain.stop().expect("stop");
}

#[test]
fn legacy_submission_surfaces_vm_errors_when_configured() {
    let (secret, sender) = dev_signer(0x63);
    let mut options = with_contract(
        single_account_options(sender),
        REVERTER_ADDRESS,
        &REVERTER_CODE,
    );
    options.miner.legacy_instamine = true;
    options.chain.vm_errors_on_rpc_response = true;
    let chain = Blockchain::start(options).expect("start");

    let mut request = transfer(REVERTER_ADDRESS, ether(0), 20);
    request.gas = Some(50_000);
    let err = chain
        .queue_transaction(request, Some(secret))
        .expect_err("revert must surface");
    assert!(matches!(err, ChainError::Runtime { .. }));

    // それでもブロックには載っている（gasを消費した失敗は取り込み対象）
    let latest = chain.latest_block().expect("latest");
    assert_eq!(latest.number, 1);
    assert_eq!(latest.tx_hashes.len(), 1);
    let receipt = chain
        .get_receipt(latest.tx_hashes[0])
        .expect("read")
        .expect("receipt");
    assert_eq!(receipt.status, 0);
    chain.stop().expect("stop");
}

#[test]
fn legacy_without_vm_errors_returns_hash_for_failed_tx() {
    let (secret, sender) = dev_signer(0x64);
    let mut options = with_contract(
        single_account_options(sender),
        REVERTER_ADDRESS,
        &REVERTER_CODE,
    );
    options.miner.legacy_instamine = true;
    let chain = Blockchain::start(options).expect("start");

    let mut request = transfer(REVERTER_ADDRESS, ether(0), 20);
    request.gas = Some(50_000);
    let hash = chain
        .queue_transaction(request, Some(secret))
        .expect("hash despite revert");
    let receipt = chain.get_receipt(hash).expect("read").expect("receipt");
    assert_eq!(receipt.status, 0);
    chain.stop().expect("stop");
}
