//! どこで: REVMとtrieの接続 / 何を: state rootに束縛したDatabaseとdiffの書き戻し / なぜ: 実行エンジンと世界状態を繋ぐため

use crate::accounts::{decode_account, encode_account, get_code_by_hash};
use crate::hash::keccak256;
use crate::trie::{Trie, TrieOp, EMPTY_ROOT};
use alloy_primitives::{B256, U256 as AlloyU256};
use alloy_rlp::Encodable;
use alloy_trie::{Nibbles, TrieAccount, KECCAK_EMPTY};
use hakoniwa_db::chain_data::{CodeVal, HashKey};
use hakoniwa_db::stable_state::{with_state, with_state_mut};
use revm::database_interface::{Database, DatabaseRef};
use revm::primitives::{Address, StorageKey, StorageValue, B256 as RevmB256, U256};
use revm::state::{AccountInfo, Bytecode, EvmState};
use smallvec::SmallVec;

/// 指定state rootへ束縛した読み取りビュー。simulate用にも過去rootで使える。
#[derive(Clone, Copy)]
pub struct TrieDb<'a> {
    trie: &'a Trie,
    state_root: [u8; 32],
}

impl<'a> TrieDb<'a> {
    pub fn new(trie: &'a Trie, state_root: [u8; 32]) -> Self {
        Self { trie, state_root }
    }

    fn basic_inner(&self, address: Address) -> Option<AccountInfo> {
        let raw = self.trie.get_at(self.state_root, address.as_slice())?;
        let account = decode_account(&raw)?;
        let mut info = AccountInfo::default();
        info.balance = account.balance;
        info.nonce = account.nonce;
        info.code_hash = B256::from(account.code_hash);
        Some(info)
    }

    fn storage_inner(&self, address: Address, index: StorageKey) -> StorageValue {
        let Some(raw) = self.trie.get_at(self.state_root, address.as_slice()) else {
            return U256::ZERO;
        };
        let Some(account) = decode_account(&raw) else {
            return U256::ZERO;
        };
        let slot = index.to_be_bytes::<32>();
        let Some(value_raw) = self.trie.get_at(account.storage_root, &slot) else {
            return U256::ZERO;
        };
        let mut slice = value_raw.as_slice();
        <AlloyU256 as alloy_rlp::Decodable>::decode(&mut slice).unwrap_or(AlloyU256::ZERO)
    }

    fn code_inner(&self, code_hash: RevmB256) -> Bytecode {
        if code_hash == RevmB256::from(KECCAK_EMPTY.0) {
            return Bytecode::default();
        }
        let bytes = get_code_by_hash(code_hash.0);
        if bytes.is_empty() {
            Bytecode::default()
        } else {
            Bytecode::new_legacy(bytes.into())
        }
    }

    fn block_hash_inner(&self, number: u64) -> RevmB256 {
        let hash = with_state(|state| {
            hakoniwa_db::chain_data::ops::get_block_by_number(state, number)
                .map(|block| block.block_hash)
        });
        RevmB256::from(hash.unwrap_or([0u8; 32]))
    }
}

impl Database for TrieDb<'_> {
    type Error = core::convert::Infallible;

    fn basic(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        Ok(self.basic_inner(address))
    }

    fn code_by_hash(&mut self, code_hash: RevmB256) -> Result<Bytecode, Self::Error> {
        Ok(self.code_inner(code_hash))
    }

    fn storage(
        &mut self,
        address: Address,
        index: StorageKey,
    ) -> Result<StorageValue, Self::Error> {
        Ok(self.storage_inner(address, index))
    }

    fn block_hash(&mut self, number: u64) -> Result<RevmB256, Self::Error> {
        Ok(self.block_hash_inner(number))
    }
}

impl DatabaseRef for TrieDb<'_> {
    type Error = core::convert::Infallible;

    fn basic_ref(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        Ok(self.basic_inner(address))
    }

    fn code_by_hash_ref(&self, code_hash: RevmB256) -> Result<Bytecode, Self::Error> {
        Ok(self.code_inner(code_hash))
    }

    fn storage_ref(
        &self,
        address: Address,
        index: StorageKey,
    ) -> Result<StorageValue, Self::Error> {
        Ok(self.storage_inner(address, index))
    }

    fn block_hash_ref(&self, number: u64) -> Result<RevmB256, Self::Error> {
        Ok(self.block_hash_inner(number))
    }
}

/// ブロック実行で溜めたdiff列をtrieへ流し、順序通りに世界状態を進める。
/// 呼び出し側がcheckpointを開いていること。
pub fn commit_diffs(trie: &mut Trie, diffs: &[EvmState]) {
    for diff in diffs.iter() {
        for (address, account) in diff.iter() {
            if !account.is_touched() {
                continue;
            }
            let addr = address.as_slice();
            if account.is_selfdestructed() || account.is_empty() {
                trie.del(addr);
                continue;
            }

            let existing = trie
                .get(addr)
                .and_then(|raw| decode_account(&raw));
            let old_storage_root = existing
                .map(|account| account.storage_root)
                .unwrap_or(EMPTY_ROOT);

            let mut ops: Vec<TrieOp> = Vec::new();
            for (slot, entry) in account.changed_storage_slots() {
                let slot_bytes = slot.to_be_bytes::<32>();
                let path = Nibbles::unpack(keccak256(&slot_bytes));
                let present = entry.present_value;
                let value = if present.is_zero() {
                    None
                } else {
                    Some(encode_u256_rlp(present))
                };
                ops.push(TrieOp { path, value });
            }
            let storage_root = if ops.is_empty() {
                old_storage_root
            } else {
                trie.apply_subtree(old_storage_root, ops)
            };

            let info = &account.info;
            if let Some(code) = info.code.clone() {
                let bytes = code.original_byte_slice().to_vec();
                if !bytes.is_empty() {
                    with_state_mut(|state| {
                        state.codes.insert(HashKey(info.code_hash.0), CodeVal(bytes));
                    });
                }
            }

            let trie_account = TrieAccount {
                nonce: info.nonce,
                balance: info.balance,
                storage_root: B256::from(storage_root),
                code_hash: normalize_code_hash(info.code_hash),
            };
            if is_empty_trie_account(&trie_account) {
                trie.del(addr);
            } else {
                trie.put(addr, &encode_account(&trie_account));
            }
        }
    }
}

fn normalize_code_hash(code_hash: B256) -> B256 {
    if code_hash == B256::ZERO {
        KECCAK_EMPTY
    } else {
        code_hash
    }
}

fn is_empty_trie_account(account: &TrieAccount) -> bool {
    account.nonce == 0
        && account.balance.is_zero()
        && account.code_hash == KECCAK_EMPTY
        && account.storage_root.0 == EMPTY_ROOT
}

fn encode_u256_rlp(value: U256) -> SmallVec<[u8; 40]> {
    let mut out = Vec::with_capacity(33);
    value.encode(&mut out);
    SmallVec::from_vec(out)
}
