//! どこで: チェーンメタセル / 何を: schema/chain_id/clock offset / なぜ: 固定サイズの最小メタ保持のため

use crate::chain_data::codec::{encode_guarded, mark_decode_failure};
use crate::chain_data::constants::{CHAIN_META_SIZE, CHAIN_META_SIZE_U32};
use crate::decode::{read_i64, read_u32, read_u64};
use ic_stable_structures::storable::Bound;
use ic_stable_structures::Storable;
use std::borrow::Cow;

pub const CHAIN_META_SCHEMA: u32 = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChainMeta {
    pub schema_version: u32,
    pub chain_id: u64,
    /// ブロックタイムスタンプに足す符号付きオフセット(ms)。snapshotが捕捉/復元する。
    pub time_offset_ms: i64,
}

impl ChainMeta {
    pub fn new(chain_id: u64) -> Self {
        Self {
            schema_version: CHAIN_META_SCHEMA,
            chain_id,
            time_offset_ms: 0,
        }
    }
}

impl Storable for ChainMeta {
    fn to_bytes(&self) -> Cow<'_, [u8]> {
        let mut out = [0u8; CHAIN_META_SIZE];
        out[0..4].copy_from_slice(&self.schema_version.to_be_bytes());
        out[4..12].copy_from_slice(&self.chain_id.to_be_bytes());
        out[12..20].copy_from_slice(&self.time_offset_ms.to_be_bytes());
        encode_guarded("chain_meta", out.to_vec(), CHAIN_META_SIZE_U32)
    }

    fn into_bytes(self) -> Vec<u8> {
        self.to_bytes().into_owned()
    }

    fn from_bytes(bytes: Cow<'_, [u8]>) -> Self {
        let data = bytes.as_ref();
        if data.len() != CHAIN_META_SIZE {
            mark_decode_failure("chain_meta");
            return ChainMeta::new(0);
        }
        let mut offset = 0usize;
        let schema_version = read_u32(data, &mut offset).unwrap_or(CHAIN_META_SCHEMA);
        let chain_id = read_u64(data, &mut offset).unwrap_or(0);
        let time_offset_ms = read_i64(data, &mut offset).unwrap_or(0);
        Self {
            schema_version,
            chain_id,
            time_offset_ms,
        }
    }

    const BOUND: Bound = Bound::Bounded {
        max_size: CHAIN_META_SIZE_U32,
        is_fixed_size: true,
    };
}
