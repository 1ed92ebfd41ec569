//! どこで: ブロックモデル / 何を: StoredBlockとHeadRef / なぜ: 決定的なブロック保存のため

use crate::chain_data::codec::{encode_guarded, mark_decode_failure};
use crate::chain_data::constants::{
    ADDRESS_LEN, HASH_LEN, HEAD_REF_SIZE, HEAD_REF_SIZE_U32, MAX_BLOCK_SIZE_U32, MAX_EXTRA_DATA,
    MAX_TXS_PER_BLOCK,
};
use crate::decode::{read_array, read_u32, read_u64, read_vec};
use ic_stable_structures::storable::Bound;
use ic_stable_structures::Storable;
use std::borrow::Cow;

/// 確定済みブロック。保存後は一切書き換えない（revertで丸ごと消すのみ）。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredBlock {
    pub number: u64,
    pub block_hash: [u8; HASH_LEN],
    pub parent_hash: [u8; HASH_LEN],
    pub coinbase: [u8; ADDRESS_LEN],
    pub timestamp: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub state_root: [u8; HASH_LEN],
    pub transactions_root: [u8; HASH_LEN],
    pub receipts_root: [u8; HASH_LEN],
    pub extra_data: Vec<u8>,
    pub tx_hashes: Vec<[u8; HASH_LEN]>,
}

impl StoredBlock {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            8 + HASH_LEN * 5 + ADDRESS_LEN + 8 * 3 + 4 + self.extra_data.len() + 4
                + self.tx_hashes.len() * HASH_LEN,
        );
        out.extend_from_slice(&self.number.to_be_bytes());
        out.extend_from_slice(&self.block_hash);
        out.extend_from_slice(&self.parent_hash);
        out.extend_from_slice(&self.coinbase);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.gas_limit.to_be_bytes());
        out.extend_from_slice(&self.gas_used.to_be_bytes());
        out.extend_from_slice(&self.state_root);
        out.extend_from_slice(&self.transactions_root);
        out.extend_from_slice(&self.receipts_root);
        let extra_len = u32::try_from(self.extra_data.len()).unwrap_or(u32::MAX);
        out.extend_from_slice(&extra_len.to_be_bytes());
        out.extend_from_slice(&self.extra_data);
        let tx_len = u32::try_from(self.tx_hashes.len()).unwrap_or(u32::MAX);
        out.extend_from_slice(&tx_len.to_be_bytes());
        for hash in self.tx_hashes.iter() {
            out.extend_from_slice(hash);
        }
        out
    }

    fn corrupt() -> Self {
        mark_decode_failure("stored_block");
        StoredBlock {
            number: 0,
            block_hash: [0u8; HASH_LEN],
            parent_hash: [0u8; HASH_LEN],
            coinbase: [0u8; ADDRESS_LEN],
            timestamp: 0,
            gas_limit: 0,
            gas_used: 0,
            state_root: [0u8; HASH_LEN],
            transactions_root: [0u8; HASH_LEN],
            receipts_root: [0u8; HASH_LEN],
            extra_data: Vec::new(),
            tx_hashes: Vec::new(),
        }
    }
}

impl Storable for StoredBlock {
    fn to_bytes(&self) -> Cow<'_, [u8]> {
        encode_guarded("stored_block", self.encode(), MAX_BLOCK_SIZE_U32)
    }

    fn into_bytes(self) -> Vec<u8> {
        self.encode()
    }

    fn from_bytes(bytes: Cow<'_, [u8]>) -> Self {
        let data = bytes.as_ref();
        let mut offset = 0usize;
        let Some(number) = read_u64(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(block_hash) = read_array::<HASH_LEN>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(parent_hash) = read_array::<HASH_LEN>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(coinbase) = read_array::<ADDRESS_LEN>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(timestamp) = read_u64(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(gas_limit) = read_u64(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(gas_used) = read_u64(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(state_root) = read_array::<HASH_LEN>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(transactions_root) = read_array::<HASH_LEN>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(receipts_root) = read_array::<HASH_LEN>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(extra_len) = read_u32(data, &mut offset) else {
            return Self::corrupt();
        };
        if extra_len as usize > MAX_EXTRA_DATA {
            return Self::corrupt();
        }
        let Some(extra_data) = read_vec(data, &mut offset, extra_len as usize) else {
            return Self::corrupt();
        };
        let Some(tx_len) = read_u32(data, &mut offset) else {
            return Self::corrupt();
        };
        if tx_len as usize > MAX_TXS_PER_BLOCK {
            return Self::corrupt();
        }
        let mut tx_hashes = Vec::with_capacity(tx_len as usize);
        for _ in 0..tx_len {
            let Some(hash) = read_array::<HASH_LEN>(data, &mut offset) else {
                return Self::corrupt();
            };
            tx_hashes.push(hash);
        }
        if offset != data.len() {
            return Self::corrupt();
        }
        Self {
            number,
            block_hash,
            parent_hash,
            coinbase,
            timestamp,
            gas_limit,
            gas_used,
            state_root,
            transactions_root,
            receipts_root,
            extra_data,
            tx_hashes,
        }
    }

    const BOUND: Bound = Bound::Bounded {
        max_size: MAX_BLOCK_SIZE_U32,
        is_fixed_size: false,
    };
}

/// head/earliestセルの値。ブロック全体を読まずに先端へ触れるためのメモ。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeadRef {
    pub number: u64,
    pub block_hash: [u8; HASH_LEN],
    pub state_root: [u8; HASH_LEN],
    pub timestamp: u64,
}

impl HeadRef {
    pub fn zero() -> Self {
        Self {
            number: 0,
            block_hash: [0u8; HASH_LEN],
            state_root: [0u8; HASH_LEN],
            timestamp: 0,
        }
    }
}

impl Storable for HeadRef {
    fn to_bytes(&self) -> Cow<'_, [u8]> {
        let mut out = [0u8; HEAD_REF_SIZE];
        out[0..8].copy_from_slice(&self.number.to_be_bytes());
        out[8..40].copy_from_slice(&self.block_hash);
        out[40..72].copy_from_slice(&self.state_root);
        out[72..80].copy_from_slice(&self.timestamp.to_be_bytes());
        encode_guarded("head_ref", out.to_vec(), HEAD_REF_SIZE_U32)
    }

    fn into_bytes(self) -> Vec<u8> {
        self.to_bytes().into_owned()
    }

    fn from_bytes(bytes: Cow<'_, [u8]>) -> Self {
        let data = bytes.as_ref();
        if data.len() != HEAD_REF_SIZE {
            mark_decode_failure("head_ref");
            return HeadRef::zero();
        }
        let mut offset = 0usize;
        let number = read_u64(data, &mut offset).unwrap_or(0);
        let block_hash = read_array::<HASH_LEN>(data, &mut offset).unwrap_or([0u8; HASH_LEN]);
        let state_root = read_array::<HASH_LEN>(data, &mut offset).unwrap_or([0u8; HASH_LEN]);
        let timestamp = read_u64(data, &mut offset).unwrap_or(0);
        Self {
            number,
            block_hash,
            state_root,
            timestamp,
        }
    }

    const BOUND: Bound = Bound::Bounded {
        max_size: HEAD_REF_SIZE_U32,
        is_fixed_size: true,
    };
}
