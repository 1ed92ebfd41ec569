//! どこで: hakoniwa-db codec性質テスト / 何を: roundtripと破損入力の乱択検証 / なぜ: decodeの見逃しとpanicを減らすため

use hakoniwa_db::chain_data::{HashKey, HeadRef, StoredBlock, StoredTx, TxBlockContext};
use hakoniwa_db::Storable;
use proptest::prelude::*;
use std::borrow::Cow;

fn stored_tx_strategy() -> impl Strategy<Value = StoredTx> {
    (
        any::<[u8; 32]>(),
        any::<[u8; 20]>(),
        any::<u64>(),
        any::<u128>(),
        any::<u64>(),
        proptest::option::of(any::<[u8; 20]>()),
        any::<[u8; 32]>(),
        proptest::collection::vec(any::<u8>(), 0..256),
        (any::<u64>(), any::<[u8; 32]>(), any::<[u8; 32]>()),
        proptest::option::of((any::<[u8; 32]>(), any::<u64>(), any::<u32>())),
    )
        .prop_map(
            |(hash, from, nonce, gas_price, gas_limit, to, value, input, sig, context)| StoredTx {
                hash,
                from,
                nonce,
                gas_price,
                gas_limit,
                to,
                value,
                input,
                v: sig.0,
                r: sig.1,
                s: sig.2,
                tx_type: 0,
                context: context.map(|(block_hash, block_number, tx_index)| TxBlockContext {
                    block_hash,
                    block_number,
                    tx_index,
                }),
            },
        )
}

fn stored_block_strategy() -> impl Strategy<Value = StoredBlock> {
    (
        any::<u64>(),
        any::<[u8; 32]>(),
        any::<[u8; 32]>(),
        any::<[u8; 20]>(),
        any::<u64>(),
        (any::<u64>(), any::<u64>()),
        (any::<[u8; 32]>(), any::<[u8; 32]>(), any::<[u8; 32]>()),
        proptest::collection::vec(any::<u8>(), 0..=32),
        proptest::collection::vec(any::<[u8; 32]>(), 0..16),
    )
        .prop_map(
            |(number, block_hash, parent_hash, coinbase, timestamp, gas, roots, extra, txs)| {
                StoredBlock {
                    number,
                    block_hash,
                    parent_hash,
                    coinbase,
                    timestamp,
                    gas_limit: gas.0,
                    gas_used: gas.1,
                    state_root: roots.0,
                    transactions_root: roots.1,
                    receipts_root: roots.2,
                    extra_data: extra,
                    tx_hashes: txs,
                }
            },
        )
}

proptest! {
    #[test]
    fn stored_tx_roundtrip_property(tx in stored_tx_strategy()) {
        let encoded = tx.to_bytes().into_owned();
        let decoded = StoredTx::from_bytes(Cow::Owned(encoded));
        prop_assert_eq!(decoded, tx);
    }

    #[test]
    fn stored_block_roundtrip_property(block in stored_block_strategy()) {
        let encoded = block.to_bytes().into_owned();
        let decoded = StoredBlock::from_bytes(Cow::Owned(encoded));
        prop_assert_eq!(decoded, block);
    }

    #[test]
    fn stored_block_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = StoredBlock::from_bytes(Cow::Owned(bytes));
    }

    #[test]
    fn stored_tx_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = StoredTx::from_bytes(Cow::Owned(bytes));
    }

    #[test]
    fn head_ref_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        let _ = HeadRef::from_bytes(Cow::Owned(bytes));
    }

    #[test]
    fn hash_key_decode_falls_back_on_bad_length(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let key = HashKey::from_bytes(Cow::Owned(bytes.clone()));
        if bytes.len() == 32 {
            prop_assert_eq!(&key.0[..], &bytes[..]);
        }
    }
}
