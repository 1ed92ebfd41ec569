//! どこで: メモリ領域の割当 / 何を: MemoryIdの凍結とMemoryManager初期化 / なぜ: カラム配置を固定するため

use ic_stable_structures::memory_manager::{MemoryId, MemoryManager, VirtualMemory};
use ic_stable_structures::DefaultMemoryImpl;
use std::cell::RefCell;

pub type VMem = VirtualMemory<DefaultMemoryImpl>;

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColumnId {
    Meta = 0,
    TrieNodes = 1,
    Codes = 2,
    Blocks = 3,
    BlockHashIndex = 4,
    Transactions = 5,
    Receipts = 6,
    BlockLogs = 7,
    Head = 8,
    Earliest = 9,
}

impl ColumnId {
    pub fn as_u8(self) -> u8 {
        match self {
            ColumnId::Meta => 0,
            ColumnId::TrieNodes => 1,
            ColumnId::Codes => 2,
            ColumnId::Blocks => 3,
            ColumnId::BlockHashIndex => 4,
            ColumnId::Transactions => 5,
            ColumnId::Receipts => 6,
            ColumnId::BlockLogs => 7,
            ColumnId::Head => 8,
            ColumnId::Earliest => 9,
        }
    }

    pub fn as_memory_id(self) -> MemoryId {
        MemoryId::new(self.as_u8())
    }
}

thread_local! {
    static MEMORY_MANAGER: RefCell<MemoryManager<DefaultMemoryImpl>> =
        RefCell::new(MemoryManager::init(DefaultMemoryImpl::default()));
}

pub fn get_memory(id: ColumnId) -> VMem {
    MEMORY_MANAGER.with(|m| m.borrow().get(id.as_memory_id()))
}

/// 全カラムを作り直す。テストとチェーン再作成専用。
pub fn reset_memory() {
    MEMORY_MANAGER.with(|m| {
        *m.borrow_mut() = MemoryManager::init(DefaultMemoryImpl::default());
    });
}
