//! どこで: snapshot/revertテスト / 何を: 巻き戻し後のhead・store・時計の復元 / なぜ: 任意深さのrollback保証を固定するため

use hakoniwa_core::blockchain::BlockSelector;
use hakoniwa_core::Blockchain;

mod common;
use common::{dev_signer, ether, single_account_options, transfer};

#[test]
fn revert_unwinds_blocks_transactions_and_time_offset() {
    let (secret, sender) = dev_signer(0x21);
    let (_, recipient) = dev_signer(0x22);
    let chain = Blockchain::start(single_account_options(sender)).expect("start");
    let genesis = chain.latest_block().expect("latest");

    let id = chain.snapshot().expect("snapshot");
    assert_eq!(id, 1);

    let tx1 = chain
        .queue_transaction(transfer(recipient, ether(1), 20), Some(secret))
        .expect("tx1");
    let tx2 = chain
        .queue_transaction(transfer(recipient, ether(2), 20), Some(secret))
        .expect("tx2");
    assert_eq!(chain.latest_block().expect("latest").number, 2);

    let offset_before = chain.increase_time(3_600).expect("increase");
    assert!(offset_before >= 3_600);

    assert!(chain.revert(id).expect("revert"));

    let latest = chain.latest_block().expect("latest");
    assert_eq!(latest.number, 0);
    assert_eq!(latest.block_hash, genesis.block_hash);
    assert_eq!(latest.state_root, genesis.state_root);

    // 巻き戻したtx・receipt・blockは store から消えている
    assert!(chain.get_transaction(tx1).expect("read").is_none());
    assert!(chain.get_transaction(tx2).expect("read").is_none());
    assert!(chain.get_receipt(tx1).expect("read").is_none());
    assert!(chain.get_block(BlockSelector::Number(1)).expect("read").is_none());
    assert!(chain.get_block(BlockSelector::Number(2)).expect("read").is_none());

    // 時計オフセットはsnapshot時点へ戻る
    let offset_after = chain.increase_time(0).expect("offset probe");
    assert_eq!(offset_after, 0);

    // 巻き戻し後も残高はgenesisの状態
    let account = chain
        .get_account(sender, BlockSelector::Latest)
        .expect("read")
        .expect("account");
    assert_eq!(account.balance, ether(100));
    assert_eq!(account.nonce, 0);

    // 続けて採掘すると新しいblock 1がgenesisへ連なる
    let tx3 = chain
        .queue_transaction(transfer(recipient, ether(3), 20), Some(secret))
        .expect("tx3");
    let rebuilt = chain.latest_block().expect("latest");
    assert_eq!(rebuilt.number, 1);
    assert_eq!(rebuilt.parent_hash, genesis.block_hash);
    assert_eq!(rebuilt.tx_hashes, vec![tx3]);
    chain.stop().expect("stop");
}

#[test]
fn revert_discards_higher_snapshots_but_keeps_lower() {
    let (secret, sender) = dev_signer(0x23);
    let (_, recipient) = dev_signer(0x24);
    let chain = Blockchain::start(single_account_options(sender)).expect("start");

    let first = chain.snapshot().expect("snap 1");
    chain
        .queue_transaction(transfer(recipient, ether(1), 20), Some(secret))
        .expect("tx");
    let second = chain.snapshot().expect("snap 2");
    chain
        .queue_transaction(transfer(recipient, ether(1), 20), Some(secret))
        .expect("tx");
    assert_eq!(chain.latest_block().expect("latest").number, 2);

    // id=2へ戻すとblock 2だけ剥がれ、id=1はまだ有効
    assert!(chain.revert(second).expect("revert 2"));
    assert_eq!(chain.latest_block().expect("latest").number, 1);

    assert!(chain.revert(first).expect("revert 1"));
    assert_eq!(chain.latest_block().expect("latest").number, 0);

    // 消費済みidはもう使えない
    assert!(!chain.revert(second).expect("revert consumed"));
    assert!(!chain.revert(first).expect("revert consumed"));
    chain.stop().expect("stop");
}

#[test]
fn revert_with_unknown_id_is_a_no_op() {
    let (secret, sender) = dev_signer(0x25);
    let (_, recipient) = dev_signer(0x26);
    let chain = Blockchain::start(single_account_options(sender)).expect("start");

    chain.snapshot().expect("snapshot");
    chain
        .queue_transaction(transfer(recipient, ether(1), 20), Some(secret))
        .expect("tx");
    let before = chain.latest_block().expect("latest");

    assert!(!chain.revert(99).expect("unknown id"));
    assert!(!chain.revert(0).expect("id zero"));

    let after = chain.latest_block().expect("latest");
    assert_eq!(after.block_hash, before.block_hash);
    chain.stop().expect("stop");
}

#[test]
fn pending_transactions_are_cleared_by_revert() {
    let (secret, sender) = dev_signer(0x27);
    let (_, recipient) = dev_signer(0x28);
    let chain = Blockchain::start(single_account_options(sender)).expect("start");

    let id = chain.snapshot().expect("snapshot");
    // nonce gapで実行されずpoolに留まる
    let mut request = transfer(recipient, ether(1), 20);
    request.nonce = Some(5);
    chain.queue_transaction(request, Some(secret)).expect("queue");
    let (pending, _) = chain.pool_content().expect("pool");
    assert_eq!(pending.len(), 1);

    assert!(chain.revert(id).expect("revert"));
    let (pending, executable) = chain.pool_content().expect("pool");
    assert!(pending.is_empty());
    assert!(executable.is_empty());
    chain.stop().expect("stop");
}
