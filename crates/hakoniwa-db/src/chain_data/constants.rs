//! どこで: chain_data共通定数 / 何を: サイズ上限とキー長 / なぜ: Boundと検証を一箇所に集約するため

pub const HASH_LEN: usize = 32;
pub const HASH_LEN_U32: u32 = 32;
pub const ADDRESS_LEN: usize = 20;
pub const BLOOM_LEN: usize = 256;

pub const MAX_EXTRA_DATA: usize = 32;
pub const MAX_TXS_PER_BLOCK: usize = 4_096;
pub const MAX_TX_INPUT: usize = 1024 * 1024;
pub const MAX_LOGS_PER_TX: usize = 4_096;
pub const MAX_LOG_TOPICS: usize = 4;
pub const MAX_LOG_DATA: usize = 1024 * 1024;
pub const MAX_LOG_ENTRIES_PER_BLOCK: usize = 65_536;

pub const HEAD_REF_SIZE: usize = 8 + HASH_LEN + HASH_LEN + 8;
pub const HEAD_REF_SIZE_U32: u32 = 80;
pub const CHAIN_META_SIZE: usize = 4 + 8 + 8;
pub const CHAIN_META_SIZE_U32: u32 = 20;

pub const MAX_BLOCK_SIZE_U32: u32 = 256 * 1024;
pub const MAX_STORED_TX_SIZE_U32: u32 = 2 * 1024 * 1024;
pub const MAX_RECEIPT_SIZE_U32: u32 = 8 * 1024 * 1024;
pub const MAX_BLOCK_LOGS_SIZE_U32: u32 = 16 * 1024 * 1024;
