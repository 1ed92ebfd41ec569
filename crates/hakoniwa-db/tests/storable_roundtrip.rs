//! どこで: hakoniwa-dbの保存型テスト / 何を: encode→decodeの往復一致 / なぜ: ブロック保存のbyte単位再現性を固定するため

use alloy_primitives::{Address, Bytes, Log, LogData, B256};
use hakoniwa_db::chain_data::{
    BlockLogEntry, BlockLogs, ChainMeta, HeadRef, StoredBlock, StoredReceipt, StoredTx,
    TxBlockContext,
};
use hakoniwa_db::Storable;
use std::borrow::Cow;

fn sample_log(marker: u8) -> Log {
    let data = LogData::new(
        vec![B256::from([marker; 32]), B256::from([marker + 1; 32])],
        Bytes::from(vec![marker, 0, marker]),
    )
    .expect("4 topics以内");
    Log {
        address: Address::from([marker; 20]),
        data,
    }
}

fn sample_block() -> StoredBlock {
    StoredBlock {
        number: 7,
        block_hash: [0xab; 32],
        parent_hash: [0xcd; 32],
        coinbase: [0x01; 20],
        timestamp: 1_700_000_123,
        gas_limit: 12_000_000,
        gas_used: 42_000,
        state_root: [0x11; 32],
        transactions_root: [0x22; 32],
        receipts_root: [0x33; 32],
        extra_data: b"hakoniwa".to_vec(),
        tx_hashes: vec![[0x44; 32], [0x55; 32]],
    }
}

#[test]
fn stored_block_roundtrips_byte_for_byte() {
    let block = sample_block();
    let encoded = block.to_bytes().into_owned();
    let decoded = StoredBlock::from_bytes(Cow::Owned(encoded.clone()));
    assert_eq!(decoded, block);
    // 再encodeも同一バイト列になること
    assert_eq!(decoded.to_bytes().into_owned(), encoded);
}

#[test]
fn stored_tx_roundtrips_with_and_without_context() {
    let mut tx = StoredTx {
        hash: [0x66; 32],
        from: [0x77; 20],
        nonce: 3,
        gas_price: 20_000_000_000,
        gas_limit: 21_000,
        to: Some([0x88; 20]),
        value: {
            let mut out = [0u8; 32];
            out[31] = 9;
            out
        },
        input: vec![0x00, 0x01, 0x02],
        v: 35 + 2 * 1337,
        r: [0x12; 32],
        s: [0x34; 32],
        tx_type: 0,
        context: None,
    };
    let decoded = StoredTx::from_bytes(tx.to_bytes());
    assert_eq!(decoded, tx);

    tx.context = Some(TxBlockContext {
        block_hash: [0x99; 32],
        block_number: 12,
        tx_index: 4,
    });
    let decoded = StoredTx::from_bytes(tx.to_bytes());
    assert_eq!(decoded, tx);

    // create txはtoなし
    tx.to = None;
    let decoded = StoredTx::from_bytes(tx.to_bytes());
    assert_eq!(decoded.to, None);
}

#[test]
fn stored_receipt_roundtrips_logs_and_bloom() {
    let receipt = StoredReceipt {
        tx_hash: [0x10; 32],
        block_hash: [0x20; 32],
        block_number: 5,
        tx_index: 1,
        status: 1,
        gas_used: 21_000,
        cumulative_gas_used: 42_000,
        contract_address: Some([0x30; 20]),
        logs_bloom: [0x5a; 256],
        logs: vec![sample_log(0x40), sample_log(0x50)],
    };
    let decoded = StoredReceipt::from_bytes(receipt.to_bytes());
    assert_eq!(decoded, receipt);
}

#[test]
fn block_logs_preserve_entry_order() {
    let logs = BlockLogs {
        block_hash: [0x61; 32],
        block_number: 9,
        entries: vec![
            BlockLogEntry {
                tx_index: 0,
                tx_hash: [0x62; 32],
                log: sample_log(0x63),
            },
            BlockLogEntry {
                tx_index: 1,
                tx_hash: [0x64; 32],
                log: sample_log(0x65),
            },
        ],
    };
    let decoded = BlockLogs::from_bytes(logs.to_bytes());
    assert_eq!(decoded, logs);
    assert_eq!(decoded.entries[0].tx_index, 0);
    assert_eq!(decoded.entries[1].tx_index, 1);
}

#[test]
fn head_ref_and_chain_meta_are_fixed_size() {
    let head = HeadRef {
        number: 8,
        block_hash: [0x71; 32],
        state_root: [0x72; 32],
        timestamp: 1_700_000_999,
    };
    assert_eq!(head.to_bytes().len(), 80);
    assert_eq!(HeadRef::from_bytes(head.to_bytes()), head);

    let mut meta = ChainMeta::new(1337);
    meta.time_offset_ms = -12_345;
    assert_eq!(meta.to_bytes().len(), 20);
    assert_eq!(ChainMeta::from_bytes(meta.to_bytes()), meta);
}

#[test]
fn truncated_block_decodes_to_fallback_not_panic() {
    let failures_before = hakoniwa_db::chain_data::codec::decode_failure_count();
    let encoded = sample_block().to_bytes().into_owned();
    let truncated = &encoded[..encoded.len() - 7];
    let decoded = StoredBlock::from_bytes(Cow::Borrowed(truncated));
    assert_eq!(decoded.number, 0);
    assert!(decoded.tx_hashes.is_empty());
    assert!(hakoniwa_db::chain_data::codec::decode_failure_count() > failures_before);
}
