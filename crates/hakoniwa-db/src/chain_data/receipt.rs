//! どこで: Receiptモデル / 何を: 実行結果とlogs/bloomの保存 / なぜ: hash引き観測のため

use crate::chain_data::codec::{decode_log, encode_guarded, encode_log, mark_decode_failure};
use crate::chain_data::constants::{
    ADDRESS_LEN, BLOOM_LEN, HASH_LEN, MAX_LOGS_PER_TX, MAX_RECEIPT_SIZE_U32,
};
use crate::decode::{read_array, read_u32, read_u64, read_u8};
use alloy_primitives::Log;
use ic_stable_structures::storable::Bound;
use ic_stable_structures::Storable;
use std::borrow::Cow;

#[derive(Clone, Debug, PartialEq)]
pub struct StoredReceipt {
    pub tx_hash: [u8; HASH_LEN],
    pub block_hash: [u8; HASH_LEN],
    pub block_number: u64,
    pub tx_index: u32,
    pub status: u8,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub contract_address: Option<[u8; ADDRESS_LEN]>,
    pub logs_bloom: [u8; BLOOM_LEN],
    pub logs: Vec<Log>,
}

impl StoredReceipt {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HASH_LEN * 2 + 8 + 4 + 1 + 8 + 8 + 1 + ADDRESS_LEN + BLOOM_LEN + 4);
        out.extend_from_slice(&self.tx_hash);
        out.extend_from_slice(&self.block_hash);
        out.extend_from_slice(&self.block_number.to_be_bytes());
        out.extend_from_slice(&self.tx_index.to_be_bytes());
        out.push(self.status);
        out.extend_from_slice(&self.gas_used.to_be_bytes());
        out.extend_from_slice(&self.cumulative_gas_used.to_be_bytes());
        match self.contract_address {
            Some(addr) => {
                out.push(1);
                out.extend_from_slice(&addr);
            }
            None => {
                out.push(0);
                out.extend_from_slice(&[0u8; ADDRESS_LEN]);
            }
        }
        out.extend_from_slice(&self.logs_bloom);
        let logs_len = u32::try_from(self.logs.len()).unwrap_or(u32::MAX);
        out.extend_from_slice(&logs_len.to_be_bytes());
        for log in self.logs.iter() {
            encode_log(&mut out, log);
        }
        out
    }

    fn corrupt() -> Self {
        mark_decode_failure("stored_receipt");
        StoredReceipt {
            tx_hash: [0u8; HASH_LEN],
            block_hash: [0u8; HASH_LEN],
            block_number: 0,
            tx_index: 0,
            status: 0,
            gas_used: 0,
            cumulative_gas_used: 0,
            contract_address: None,
            logs_bloom: [0u8; BLOOM_LEN],
            logs: Vec::new(),
        }
    }
}

impl Storable for StoredReceipt {
    fn to_bytes(&self) -> Cow<'_, [u8]> {
        encode_guarded("stored_receipt", self.encode(), MAX_RECEIPT_SIZE_U32)
    }

    fn into_bytes(self) -> Vec<u8> {
        self.encode()
    }

    fn from_bytes(bytes: Cow<'_, [u8]>) -> Self {
        let data = bytes.as_ref();
        let mut offset = 0usize;
        let Some(tx_hash) = read_array::<HASH_LEN>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(block_hash) = read_array::<HASH_LEN>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(block_number) = read_u64(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(tx_index) = read_u32(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(status) = read_u8(data, &mut offset) else {
            return Self::corrupt();
        };
        if status > 1 {
            return Self::corrupt();
        }
        let Some(gas_used) = read_u64(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(cumulative_gas_used) = read_u64(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(has_contract) = read_u8(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(contract_raw) = read_array::<ADDRESS_LEN>(data, &mut offset) else {
            return Self::corrupt();
        };
        let contract_address = if has_contract == 1 {
            Some(contract_raw)
        } else {
            None
        };
        let Some(logs_bloom) = read_array::<BLOOM_LEN>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(logs_len) = read_u32(data, &mut offset) else {
            return Self::corrupt();
        };
        if logs_len as usize > MAX_LOGS_PER_TX {
            return Self::corrupt();
        }
        let mut logs = Vec::with_capacity(logs_len as usize);
        for _ in 0..logs_len {
            let Some(log) = decode_log(data, &mut offset) else {
                return Self::corrupt();
            };
            logs.push(log);
        }
        if offset != data.len() {
            return Self::corrupt();
        }
        Self {
            tx_hash,
            block_hash,
            block_number,
            tx_index,
            status,
            gas_used,
            cumulative_gas_used,
            contract_address,
            logs_bloom,
            logs,
        }
    }

    const BOUND: Bound = Bound::Bounded {
        max_size: MAX_RECEIPT_SIZE_U32,
        is_fixed_size: false,
    };
}
