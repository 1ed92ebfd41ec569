//! どこで: trieカラムのキーと値 / 何を: node hashキーとRLPレコード / なぜ: content-addressedな履歴保持のため

use crate::chain_data::codec::{encode_guarded, mark_decode_failure};
use crate::chain_data::constants::{HASH_LEN, HASH_LEN_U32};
use crate::decode::hash_to_array;
use ic_stable_structures::storable::Bound;
use ic_stable_structures::Storable;
use std::borrow::Cow;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct HashKey(pub [u8; HASH_LEN]);

impl Storable for HashKey {
    fn to_bytes(&self) -> Cow<'_, [u8]> {
        encode_guarded("hash_key", self.0.to_vec(), HASH_LEN_U32)
    }

    fn into_bytes(self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn from_bytes(bytes: Cow<'_, [u8]>) -> Self {
        let data = bytes.as_ref();
        if data.len() != HASH_LEN {
            mark_decode_failure("hash_key");
            return HashKey(hash_to_array("hash_key".as_bytes(), data));
        }
        let mut buf = [0u8; HASH_LEN];
        buf.copy_from_slice(data);
        Self(buf)
    }

    const BOUND: Bound = Bound::Bounded {
        max_size: HASH_LEN_U32,
        is_fixed_size: true,
    };
}

/// RLPエンコード済みtrieノード。ハッシュがキーなので値は生bytesのまま。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeRecord(pub Vec<u8>);

impl Storable for NodeRecord {
    fn to_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.0)
    }

    fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    fn from_bytes(bytes: Cow<'_, [u8]>) -> Self {
        Self(bytes.into_owned())
    }

    const BOUND: Bound = Bound::Unbounded;
}

/// コントラクトコード。allow_unlimited_contract_size対応のため上限はchain層が見る。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CodeVal(pub Vec<u8>);

impl Storable for CodeVal {
    fn to_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.0)
    }

    fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    fn from_bytes(bytes: Cow<'_, [u8]>) -> Self {
        Self(bytes.into_owned())
    }

    const BOUND: Bound = Bound::Unbounded;
}
