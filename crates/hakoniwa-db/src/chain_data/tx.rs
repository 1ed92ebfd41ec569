//! どこで: トランザクションモデル / 何を: StoredTxと確定コンテキスト / なぜ: hash引きの完全復元のため

use crate::chain_data::codec::{encode_guarded, mark_decode_failure};
use crate::chain_data::constants::{
    ADDRESS_LEN, HASH_LEN, MAX_STORED_TX_SIZE_U32, MAX_TX_INPUT,
};
use crate::decode::{read_array, read_u128, read_u32, read_u64, read_u8, read_vec};
use ic_stable_structures::storable::Bound;
use ic_stable_structures::Storable;
use std::borrow::Cow;

/// 取り込み済みブロックの位置。poolにいる間はNone。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxBlockContext {
    pub block_hash: [u8; HASH_LEN],
    pub block_number: u64,
    pub tx_index: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredTx {
    pub hash: [u8; HASH_LEN],
    pub from: [u8; ADDRESS_LEN],
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Option<[u8; ADDRESS_LEN]>,
    pub value: [u8; 32],
    pub input: Vec<u8>,
    pub v: u64,
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub tx_type: u8,
    pub context: Option<TxBlockContext>,
}

impl StoredTx {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            HASH_LEN + ADDRESS_LEN + 8 + 16 + 8 + 1 + ADDRESS_LEN + 32 + 4 + self.input.len()
                + 8 + 32 + 32 + 1 + 1 + HASH_LEN + 8 + 4,
        );
        out.extend_from_slice(&self.hash);
        out.extend_from_slice(&self.from);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.gas_price.to_be_bytes());
        out.extend_from_slice(&self.gas_limit.to_be_bytes());
        match self.to {
            Some(to) => {
                out.push(1);
                out.extend_from_slice(&to);
            }
            None => {
                out.push(0);
                out.extend_from_slice(&[0u8; ADDRESS_LEN]);
            }
        }
        out.extend_from_slice(&self.value);
        let input_len = u32::try_from(self.input.len()).unwrap_or(u32::MAX);
        out.extend_from_slice(&input_len.to_be_bytes());
        out.extend_from_slice(&self.input);
        out.extend_from_slice(&self.v.to_be_bytes());
        out.extend_from_slice(&self.r);
        out.extend_from_slice(&self.s);
        out.push(self.tx_type);
        match self.context {
            Some(ctx) => {
                out.push(1);
                out.extend_from_slice(&ctx.block_hash);
                out.extend_from_slice(&ctx.block_number.to_be_bytes());
                out.extend_from_slice(&ctx.tx_index.to_be_bytes());
            }
            None => {
                out.push(0);
                out.extend_from_slice(&[0u8; HASH_LEN]);
                out.extend_from_slice(&0u64.to_be_bytes());
                out.extend_from_slice(&0u32.to_be_bytes());
            }
        }
        out
    }

    fn corrupt() -> Self {
        mark_decode_failure("stored_tx");
        StoredTx {
            hash: [0u8; HASH_LEN],
            from: [0u8; ADDRESS_LEN],
            nonce: 0,
            gas_price: 0,
            gas_limit: 0,
            to: None,
            value: [0u8; 32],
            input: Vec::new(),
            v: 0,
            r: [0u8; 32],
            s: [0u8; 32],
            tx_type: 0,
            context: None,
        }
    }
}

impl Storable for StoredTx {
    fn to_bytes(&self) -> Cow<'_, [u8]> {
        encode_guarded("stored_tx", self.encode(), MAX_STORED_TX_SIZE_U32)
    }

    fn into_bytes(self) -> Vec<u8> {
        self.encode()
    }

    fn from_bytes(bytes: Cow<'_, [u8]>) -> Self {
        let data = bytes.as_ref();
        let mut offset = 0usize;
        let Some(hash) = read_array::<HASH_LEN>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(from) = read_array::<ADDRESS_LEN>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(nonce) = read_u64(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(gas_price) = read_u128(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(gas_limit) = read_u64(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(has_to) = read_u8(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(to_raw) = read_array::<ADDRESS_LEN>(data, &mut offset) else {
            return Self::corrupt();
        };
        let to = if has_to == 1 { Some(to_raw) } else { None };
        let Some(value) = read_array::<32>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(input_len) = read_u32(data, &mut offset) else {
            return Self::corrupt();
        };
        if input_len as usize > MAX_TX_INPUT {
            return Self::corrupt();
        }
        let Some(input) = read_vec(data, &mut offset, input_len as usize) else {
            return Self::corrupt();
        };
        let Some(v) = read_u64(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(r) = read_array::<32>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(s) = read_array::<32>(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(tx_type) = read_u8(data, &mut offset) else {
            return Self::corrupt();
        };
        let Some(has_context) = read_u8(data, &mut offset) else {
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
        if offset != data.len() {
            return Self::corrupt();
        }
        let context = if has_context == 1 {
            Some(TxBlockContext {
                block_hash,
                block_number,
                tx_index,
            })
        } else {
            None
        };
        Self {
            hash,
            from,
            nonce,
            gas_price,
            gas_limit,
            to,
            value,
            input,
            v,
            r,
            s,
            tx_type,
            context,
        }
    }

    const BOUND: Bound = Bound::Bounded {
        max_size: MAX_STORED_TX_SIZE_U32,
        is_fixed_size: false,
    };
}
