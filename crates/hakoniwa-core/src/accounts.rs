//! どこで: account manager / 何を: trie経由のaccount/storage/code読み出し / なぜ: state rootを唯一の真実にするため

use crate::hash::keccak256;
use crate::trie::Trie;
use alloy_primitives::{B256, U256};
use alloy_rlp::{Decodable, Encodable};
use alloy_trie::{TrieAccount, EMPTY_ROOT_HASH, KECCAK_EMPTY};
use hakoniwa_db::chain_data::{CodeVal, HashKey};
use hakoniwa_db::stable_state::{with_state, with_state_mut};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: [u8; 32],
    pub code_hash: [u8; 32],
}

impl AccountState {
    pub fn empty() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            storage_root: EMPTY_ROOT_HASH.0,
            code_hash: KECCAK_EMPTY.0,
        }
    }

    pub fn has_code(&self) -> bool {
        self.code_hash != KECCAK_EMPTY.0
    }
}

/// genesis seeding入力。storageは持たない（コードと残高のみ）。
#[derive(Clone, Debug)]
pub struct AccountSeed {
    pub address: [u8; 20],
    pub balance: U256,
    pub nonce: u64,
    pub code: Option<Vec<u8>>,
}

pub fn get_account(trie: &Trie, state_root: [u8; 32], address: [u8; 20]) -> Option<AccountState> {
    let raw = trie.get_at(state_root, &address)?;
    decode_account(&raw)
}

pub fn get_storage_at(
    trie: &Trie,
    state_root: [u8; 32],
    address: [u8; 20],
    slot: [u8; 32],
) -> [u8; 32] {
    let Some(account) = get_account(trie, state_root, address) else {
        return [0u8; 32];
    };
    let Some(raw) = trie.get_at(account.storage_root, &slot) else {
        return [0u8; 32];
    };
    let mut slice = raw.as_slice();
    match U256::decode(&mut slice) {
        Ok(value) => value.to_be_bytes::<32>(),
        Err(_) => [0u8; 32],
    }
}

pub fn get_code(trie: &Trie, state_root: [u8; 32], address: [u8; 20]) -> Vec<u8> {
    let Some(account) = get_account(trie, state_root, address) else {
        return Vec::new();
    };
    get_code_by_hash(account.code_hash)
}

pub fn get_code_by_hash(code_hash: [u8; 32]) -> Vec<u8> {
    if code_hash == KECCAK_EMPTY.0 {
        return Vec::new();
    }
    with_state(|state| state.codes.get(&HashKey(code_hash)))
        .map(|CodeVal(bytes)| bytes)
        .unwrap_or_default()
}

/// genesis専用の書き込み。通常運転でaccountを直接触るのはVM commitだけ。
pub(crate) fn put_account(trie: &mut Trie, seed: &AccountSeed) {
    let code_hash = match seed.code.as_deref() {
        Some(code) if !code.is_empty() => {
            let hash = keccak256(code);
            with_state_mut(|state| {
                state.codes.insert(HashKey(hash), CodeVal(code.to_vec()));
            });
            hash
        }
        _ => KECCAK_EMPTY.0,
    };
    let account = TrieAccount {
        nonce: seed.nonce,
        balance: seed.balance,
        storage_root: EMPTY_ROOT_HASH,
        code_hash: B256::from(code_hash),
    };
    trie.put(&seed.address, &encode_account(&account));
}

pub(crate) fn encode_account(account: &TrieAccount) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    account.encode(&mut out);
    out
}

pub(crate) fn decode_account(raw: &[u8]) -> Option<AccountState> {
    let mut slice = raw;
    let account = TrieAccount::decode(&mut slice).ok()?;
    Some(AccountState {
        nonce: account.nonce,
        balance: account.balance,
        storage_root: account.storage_root.0,
        code_hash: account.code_hash.0,
    })
}
