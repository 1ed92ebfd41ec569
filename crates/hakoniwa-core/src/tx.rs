//! どこで: pool直前のトランザクション境界 / 何を: 署名復元・鍵署名・intrinsic gas / なぜ: alloy依存を1箇所に隔離するため

use crate::error::ValidationError;
use alloy_consensus::transaction::SignerRecoverable;
use alloy_consensus::{SignableTransaction, Transaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;

pub const TX_BASE_GAS: u64 = 21_000;
pub const TX_CREATE_GAS: u64 = 32_000;
pub const TX_DATA_ZERO_GAS: u64 = 4;
pub const TX_DATA_NONZERO_GAS: u64 = 16;

/// pool/minerが扱う正規化済みトランザクション。legacy形のみ受け付ける
/// （固定gas価格の開発チェーンなのでfee market系タイプは対象外）。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PooledTx {
    pub hash: [u8; 32],
    pub from: [u8; 20],
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Option<[u8; 20]>,
    pub value: U256,
    pub input: Vec<u8>,
    pub v: u64,
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// pool到着順。送信者間の同値タイブレークに使う。
    pub seq: u64,
}

impl PooledTx {
    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    pub fn intrinsic_gas(&self) -> u64 {
        intrinsic_gas(&self.input, self.is_create())
    }

    /// 送信者が最低限持つべき残高: value + gas_limit * gas_price。
    pub fn upfront_cost(&self) -> U256 {
        let gas_cost = U256::from(self.gas_limit).saturating_mul(U256::from(self.gas_price));
        self.value.saturating_add(gas_cost)
    }
}

/// 未署名の受け付け形。欠けたフィールドは設定既定で埋める。
#[derive(Clone, Debug, Default)]
pub struct TransactionRequest {
    pub from: Option<[u8; 20]>,
    pub to: Option<[u8; 20]>,
    pub gas: Option<u64>,
    pub gas_price: Option<u128>,
    pub value: U256,
    pub data: Vec<u8>,
    pub nonce: Option<u64>,
}

pub fn intrinsic_gas(input: &[u8], is_create: bool) -> u64 {
    let mut gas = TX_BASE_GAS;
    if is_create {
        gas = gas.saturating_add(TX_CREATE_GAS);
    }
    for byte in input.iter() {
        gas = gas.saturating_add(if *byte == 0 {
            TX_DATA_ZERO_GAS
        } else {
            TX_DATA_NONZERO_GAS
        });
    }
    gas
}

/// raw署名済みトランザクションを復元する。chain idは付いていれば一致を要求、
/// EIP-155以前の無保護legacyは開発チェーンとして受け入れる。
pub fn decode_raw_transaction(raw: &[u8], chain_id: u64) -> Result<PooledTx, ValidationError> {
    let envelope =
        TxEnvelope::decode_2718_exact(raw).map_err(|_| ValidationError::MalformedTransaction)?;
    if let Some(tx_chain_id) = envelope.chain_id() {
        if tx_chain_id != chain_id {
            return Err(ValidationError::WrongChainId);
        }
    }
    let from = envelope
        .recover_signer()
        .map_err(|_| ValidationError::InvalidSignature)?;
    let TxEnvelope::Legacy(signed) = envelope else {
        return Err(ValidationError::MalformedTransaction);
    };
    let hash = signed.hash().0;
    let tx = signed.tx();
    let signature = signed.signature();
    let to = match tx.kind() {
        TxKind::Call(address) => Some(address.0 .0),
        TxKind::Create => None,
    };
    Ok(PooledTx {
        hash,
        from: from.0 .0,
        nonce: tx.nonce,
        gas_price: tx.gas_price,
        gas_limit: tx.gas_limit,
        to,
        value: tx.value,
        input: tx.input.to_vec(),
        v: legacy_v(signature.v(), tx.chain_id),
        r: signature.r().to_be_bytes::<32>(),
        s: signature.s().to_be_bytes::<32>(),
        seq: 0,
    })
}

/// 供給された秘密鍵でlegacyトランザクションを組んで署名する。
/// 署名で初めてhashが確定するので、呼び出し側はこの戻りのhashを使うこと。
pub fn sign_request(
    request: &TransactionRequest,
    secret_key: &[u8; 32],
    chain_id: u64,
    nonce: u64,
    default_gas_limit: u64,
    default_gas_price: u128,
) -> Result<PooledTx, ValidationError> {
    let signer = PrivateKeySigner::from_bytes(&B256::from(*secret_key))
        .map_err(|_| ValidationError::InvalidSignature)?;
    let from = signer.address();
    if let Some(declared) = request.from {
        if declared != from.0 .0 {
            return Err(ValidationError::InvalidSignature);
        }
    }
    let tx = TxLegacy {
        chain_id: Some(chain_id),
        nonce,
        gas_price: request.gas_price.unwrap_or(default_gas_price),
        gas_limit: request.gas.unwrap_or(default_gas_limit),
        to: match request.to {
            Some(to) => TxKind::Call(Address::from(to)),
            None => TxKind::Create,
        },
        value: request.value,
        input: Bytes::from(request.data.clone()),
    };
    let signature_hash = tx.signature_hash();
    let signature = signer
        .sign_hash_sync(&signature_hash)
        .map_err(|_| ValidationError::InvalidSignature)?;
    let signed = tx.into_signed(signature);
    let hash = signed.hash().0;
    let tx = signed.tx();
    let to = match tx.kind() {
        TxKind::Call(address) => Some(address.0 .0),
        TxKind::Create => None,
    };
    Ok(PooledTx {
        hash,
        from: from.0 .0,
        nonce: tx.nonce,
        gas_price: tx.gas_price,
        gas_limit: tx.gas_limit,
        to,
        value: tx.value,
        input: tx.input.to_vec(),
        v: legacy_v(signature.v(), tx.chain_id),
        r: signature.r().to_be_bytes::<32>(),
        s: signature.s().to_be_bytes::<32>(),
        seq: 0,
    })
}

/// EIP-155のv値。chain id付きは replay protected 形、無しは27/28。
fn legacy_v(y_parity: bool, chain_id: Option<u64>) -> u64 {
    let parity = u64::from(y_parity);
    match chain_id {
        Some(id) => parity + 35 + id.saturating_mul(2),
        None => parity + 27,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsic_gas_counts_data_bytes() {
        assert_eq!(intrinsic_gas(&[], false), 21_000);
        assert_eq!(intrinsic_gas(&[0x00, 0x01], false), 21_000 + 4 + 16);
        assert_eq!(intrinsic_gas(&[], true), 53_000);
    }

    #[test]
    fn sign_then_decode_round_trips_sender_and_hash() {
        let secret = [0x11u8; 32];
        let request = TransactionRequest {
            to: Some([0x22u8; 20]),
            value: U256::from(1u64),
            ..Default::default()
        };
        let signed = sign_request(&request, &secret, 1337, 0, 90_000, 2_000_000_000).unwrap();
        assert_eq!(signed.nonce, 0);
        assert_eq!(signed.gas_limit, 90_000);
        assert!(signed.v >= 35 + 2 * 1337);
        assert_ne!(signed.hash, [0u8; 32]);
    }
}
