//! どこで: ブロック単位のログ集約 / 何を: (tx_index, tx_hash, log) の順序付き列 / なぜ: filter購読をnumber引きにするため

use crate::chain_data::codec::{decode_log, encode_guarded, encode_log, mark_decode_failure};
use crate::chain_data::constants::{HASH_LEN, MAX_BLOCK_LOGS_SIZE_U32, MAX_LOG_ENTRIES_PER_BLOCK};
use crate::decode::{read_array, read_u32, read_u64};
use alloy_primitives::Log;
use ic_stable_structures::storable::Bound;
use ic_stable_structures::Storable;
use std::borrow::Cow;

#[derive(Clone, Debug, PartialEq)]
pub struct BlockLogEntry {
    pub tx_index: u32,
    pub tx_hash: [u8; HASH_LEN],
    pub log: Log,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlockLogs {
    pub block_hash: [u8; HASH_LEN],
    pub block_number: u64,
    pub entries: Vec<BlockLogEntry>,
}

impl BlockLogs {
    pub fn empty(block_hash: [u8; HASH_LEN], block_number: u64) -> Self {
        Self {
            block_hash,
            block_number,
            entries: Vec::new(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HASH_LEN + 8 + 4 + self.entries.len() * 96);
        out.extend_from_slice(&self.block_hash);
        out.extend_from_slice(&self.block_number.to_be_bytes());
        let entries_len = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        out.extend_from_slice(&entries_len.to_be_bytes());
        for entry in self.entries.iter() {
            out.extend_from_slice(&entry.tx_index.to_be_bytes());
            out.extend_from_slice(&entry.tx_hash);
            encode_log(&mut out, &entry.log);
        }
        out
    }

    fn corrupt() -> Self {
        mark_decode_failure("block_logs");
        BlockLogs::empty([0u8; HASH_LEN], 0)
    }
}

impl Storable for BlockLogs {
    fn to_bytes(&self) -> Cow<'_, [u8]> {
        encode_guarded("block_logs", self.encode(), MAX_BLOCK_LOGS_SIZE_U32)
    }

    fn into_bytes(self) -> Vec<u8> {
        self.encode()
    }

    fn from_bytes(bytes: Cow<'_, [u8]>) -> Self {
        let data = bytes.as_ref();
        let mut offset = 0usize;
        let Some(block_hash) = read_array::<HASH_LEN>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(block_number) = read_u64(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(entries_len) = read_u32(data, &mut offset) else {
            return Self::corrupt();
        };
        if entries_len as usize > MAX_LOG_ENTRIES_PER_BLOCK {
            return Self::corrupt();
        }
        let mut entries = Vec::with_capacity(entries_len as usize);
        for _ in 0..entries_len {
            let Some(tx_index) = read_u32(data, &mut offset) else {
                return Self::corrupt();
            };
            let Some(tx_hash) = read_array::<HASH_LEN>(data, &mut offset) else {
                return Self::corrupt();
            };
            let Some(log) = decode_log(data, &mut offset) else {
                return Self::corrupt();
            };
            entries.push(BlockLogEntry {
                tx_index,
                tx_hash,
                log,
            });
        }
        if offset != data.len() {
            return Self::corrupt();
        }
        Self {
            block_hash,
            block_number,
            entries,
        }
    }

    const BOUND: Bound = Bound::Bounded {
        max_size: MAX_BLOCK_LOGS_SIZE_U32,
        is_fixed_size: false,
    };
}
