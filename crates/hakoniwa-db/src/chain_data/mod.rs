//! どこで: 保存型の集約 / 何を: Block/Tx/Receipt/Logsの公開 / なぜ: 依存の簡略化

pub mod block;
pub mod block_logs;
pub mod chain_meta;
pub mod codec;
pub mod constants;
pub mod ops;
pub mod receipt;
pub mod trie_node;
pub mod tx;

pub use block::{HeadRef, StoredBlock};
pub use block_logs::{BlockLogEntry, BlockLogs};
pub use chain_meta::ChainMeta;
pub use constants::{ADDRESS_LEN, BLOOM_LEN, HASH_LEN, MAX_EXTRA_DATA, MAX_TXS_PER_BLOCK};
pub use receipt::StoredReceipt;
pub use trie_node::{CodeVal, HashKey, NodeRecord};
pub use tx::{StoredTx, TxBlockContext};
