//! どこで: ハッシュ規則 / 何を: block_hashとdomain分離keccak / なぜ: 決定性を保証するため

use alloy_primitives::keccak256 as alloy_keccak256;

pub const HASH_LEN: usize = 32;

pub fn keccak256(data: &[u8]) -> [u8; HASH_LEN] {
    alloy_keccak256(data).0
}

pub fn block_hash(
    parent_hash: [u8; HASH_LEN],
    number: u64,
    timestamp: u64,
    transactions_root: [u8; HASH_LEN],
    receipts_root: [u8; HASH_LEN],
    state_root: [u8; HASH_LEN],
) -> [u8; HASH_LEN] {
    let mut buf = Vec::with_capacity(1 + HASH_LEN + 8 + 8 + HASH_LEN * 3);
    buf.push(0x01);
    buf.extend_from_slice(&parent_hash);
    buf.extend_from_slice(&number.to_be_bytes());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(&transactions_root);
    buf.extend_from_slice(&receipts_root);
    buf.extend_from_slice(&state_root);
    keccak256(&buf)
}
