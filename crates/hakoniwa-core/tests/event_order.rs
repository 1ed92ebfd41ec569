//! どこで: イベント順序テスト / 何を: blockLogs→blockの順とpendingTx通知 / なぜ: filter購読者が観測する順序を固定するため

use hakoniwa_core::events::ChainEvent;
use hakoniwa_core::Blockchain;
use std::time::Duration;

mod common;
use common::{dev_signer, ether, single_account_options, transfer, with_contract, LOGGER_CODE};

const LOGGER_ADDRESS: [u8; 20] = [0x77u8; 20];

#[test]
fn started_is_the_first_event() {
    let (_, address) = dev_signer(0x51);
    let (chain, events) = Blockchain::start_with_events(single_account_options(address))
        .expect("start");
    let first = events.recv_timeout(Duration::from_secs(2)).expect("event");
    assert!(matches!(first, ChainEvent::Started));
    chain.stop().expect("stop");
}

#[test]
fn block_logs_event_precedes_block_event() {
    let (secret, sender) = dev_signer(0x52);
    let options = with_contract(
        single_account_options(sender),
        LOGGER_ADDRESS,
        &LOGGER_CODE,
    );
    let (chain, events) = Blockchain::start_with_events(options).expect("start");

    let mut request = transfer(LOGGER_ADDRESS, ether(0), 20);
    request.gas = Some(50_000);
    let hash = chain.queue_transaction(request, Some(secret)).expect("queue");

    let mut saw_pending = false;
    let mut logs_position = None;
    let mut block_position = None;
    let mut position = 0usize;
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while block_position.is_none() && std::time::Instant::now() < deadline {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(ChainEvent::PendingTransaction(tx)) => {
                assert_eq!(tx.hash, hash);
                saw_pending = true;
            }
            Ok(ChainEvent::BlockLogs(logs)) => {
                assert_eq!(logs.block_number, 1);
                assert_eq!(logs.entries.len(), 1);
                assert_eq!(logs.entries[0].tx_hash, hash);
                logs_position = Some(position);
            }
            Ok(ChainEvent::Block(block)) => {
                assert_eq!(block.number, 1);
                block_position = Some(position);
            }
            Ok(_) => {}
            Err(_) => break,
        }
        position += 1;
    }
    assert!(saw_pending, "pendingTransaction must be published");
    let logs_at = logs_position.expect("blockLogs published");
    let block_at = block_position.expect("block published");
    assert!(logs_at < block_at, "blockLogs must precede block");
    chain.stop().expect("stop");
}

#[test]
fn stop_event_is_published_on_shutdown() {
    let (_, address) = dev_signer(0x53);
    let (chain, events) = Blockchain::start_with_events(single_account_options(address))
        .expect("start");
    chain.stop().expect("stop");
    let mut saw_stopped = false;
    while let Ok(event) = events.recv_timeout(Duration::from_secs(1)) {
        if matches!(event, ChainEvent::Stopped) {
            saw_stopped = true;
            break;
        }
    }
    assert!(saw_stopped);
}
