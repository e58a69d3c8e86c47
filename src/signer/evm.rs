//! Ethereum 交易签名（EIP-1559 typed transaction + legacy）
//!
//! sighash = keccak256(0x02 || rlp(前 9 项))，签名后把 y_parity/r/s
//! 追加成 12 项 payload。RLP 整数一律按去前导零的大端字节串编码。

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rlp::{Rlp, RlpStream};
use sha3::{Digest, Keccak256};

use crate::domain::transaction::{FeePrice, SignedTransaction, UnsignedTransaction};
use crate::error::{WalletError, WalletResult};
use crate::vault::KeyMaterial;

/// EIP-2718 交易类型前缀
const TX_TYPE_EIP1559: u8 = 0x02;

pub fn sign(
    tx: &UnsignedTransaction,
    chain_id: u64,
    material: &KeyMaterial,
) -> WalletResult<SignedTransaction> {
    match tx.fee.price {
        FeePrice::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => sign_eip1559(tx, chain_id, max_fee_per_gas, max_priority_fee_per_gas, material),
        FeePrice::Legacy { gas_price } => sign_legacy(tx, chain_id, gas_price, material),
        _ => Err(WalletError::Internal(
            "fee price kind does not match chain".into(),
        )),
    }
}

fn sign_eip1559(
    tx: &UnsignedTransaction,
    chain_id: u64,
    max_fee: u128,
    priority: u128,
    material: &KeyMaterial,
) -> WalletResult<SignedTransaction> {
    let to = decode_eth_address(&tx.to)?;
    let value = tx.value_native()?;

    let mut unsigned = RlpStream::new_list(9);
    append_u(&mut unsigned, chain_id as u128);
    append_u(&mut unsigned, tx.nonce as u128);
    append_u(&mut unsigned, priority);
    append_u(&mut unsigned, max_fee);
    append_u(&mut unsigned, tx.fee.limit as u128);
    unsigned.append(&to.to_vec());
    append_u(&mut unsigned, value);
    unsigned.append(&tx.payload);
    unsigned.begin_list(0); // access list

    let mut preimage = vec![TX_TYPE_EIP1559];
    preimage.extend_from_slice(&unsigned.out());
    let sighash: [u8; 32] = Keccak256::digest(&preimage).into();

    let (signature, recovery_id) = sign_prehash(material, &sighash)?;

    let mut signed = RlpStream::new_list(12);
    append_u(&mut signed, chain_id as u128);
    append_u(&mut signed, tx.nonce as u128);
    append_u(&mut signed, priority);
    append_u(&mut signed, max_fee);
    append_u(&mut signed, tx.fee.limit as u128);
    signed.append(&to.to_vec());
    append_u(&mut signed, value);
    signed.append(&tx.payload);
    signed.begin_list(0);
    append_u(&mut signed, recovery_id.to_byte() as u128);
    signed.append(&trim_leading_zeros(&signature.r().to_bytes()));
    signed.append(&trim_leading_zeros(&signature.s().to_bytes()));

    let mut raw = vec![TX_TYPE_EIP1559];
    raw.extend_from_slice(&signed.out());
    let tx_hash = format!("0x{}", hex::encode(Keccak256::digest(&raw)));

    Ok(SignedTransaction {
        chain: tx.chain,
        raw,
        tx_hash,
    })
}

fn sign_legacy(
    tx: &UnsignedTransaction,
    chain_id: u64,
    gas_price: u128,
    material: &KeyMaterial,
) -> WalletResult<SignedTransaction> {
    let to = decode_eth_address(&tx.to)?;
    let value = tx.value_native()?;

    // EIP-155：sighash 把 chain_id 编进末三项
    let mut unsigned = RlpStream::new_list(9);
    append_u(&mut unsigned, tx.nonce as u128);
    append_u(&mut unsigned, gas_price);
    append_u(&mut unsigned, tx.fee.limit as u128);
    unsigned.append(&to.to_vec());
    append_u(&mut unsigned, value);
    unsigned.append(&tx.payload);
    append_u(&mut unsigned, chain_id as u128);
    append_u(&mut unsigned, 0);
    append_u(&mut unsigned, 0);

    let sighash: [u8; 32] = Keccak256::digest(&unsigned.out()).into();
    let (signature, recovery_id) = sign_prehash(material, &sighash)?;

    let v = chain_id * 2 + 35 + recovery_id.to_byte() as u64;
    let mut signed = RlpStream::new_list(9);
    append_u(&mut signed, tx.nonce as u128);
    append_u(&mut signed, gas_price);
    append_u(&mut signed, tx.fee.limit as u128);
    signed.append(&to.to_vec());
    append_u(&mut signed, value);
    signed.append(&tx.payload);
    append_u(&mut signed, v as u128);
    signed.append(&trim_leading_zeros(&signature.r().to_bytes()));
    signed.append(&trim_leading_zeros(&signature.s().to_bytes()));

    let raw = signed.out().to_vec();
    let tx_hash = format!("0x{}", hex::encode(Keccak256::digest(&raw)));

    Ok(SignedTransaction {
        chain: tx.chain,
        raw,
        tx_hash,
    })
}

/// 从已签名的 0x02 交易恢复发送方地址（广播前自检用）
pub fn recover_sender(raw: &[u8]) -> WalletResult<String> {
    if raw.first() != Some(&TX_TYPE_EIP1559) {
        return Err(WalletError::Parsing("not an eip-1559 transaction".into()));
    }
    let rlp = Rlp::new(&raw[1..]);
    if rlp.item_count().map_err(decode_err)? != 12 {
        return Err(WalletError::Parsing("unexpected payload item count".into()));
    }

    // 前 9 项原样拼回 sighash preimage
    let mut unsigned = RlpStream::new_list(9);
    for i in 0..9 {
        unsigned.append_raw(rlp.at(i).map_err(decode_err)?.as_raw(), 1);
    }
    let mut preimage = vec![TX_TYPE_EIP1559];
    preimage.extend_from_slice(&unsigned.out());
    let sighash: [u8; 32] = Keccak256::digest(&preimage).into();

    let y_parity: Vec<u8> = rlp.val_at(9).map_err(decode_err)?;
    let r: Vec<u8> = rlp.val_at(10).map_err(decode_err)?;
    let s: Vec<u8> = rlp.val_at(11).map_err(decode_err)?;

    let parity = y_parity.first().copied().unwrap_or(0);
    let recovery_id = RecoveryId::from_byte(parity)
        .ok_or_else(|| WalletError::Parsing("invalid recovery id".into()))?;

    let mut sig_bytes = [0u8; 64];
    copy_right_aligned(&mut sig_bytes[..32], &r)?;
    copy_right_aligned(&mut sig_bytes[32..], &s)?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| WalletError::Parsing(format!("invalid signature: {}", e)))?;

    let verifying_key = VerifyingKey::recover_from_prehash(&sighash, &signature, recovery_id)
        .map_err(|e| WalletError::Parsing(format!("sender recovery failed: {}", e)))?;

    let public_key_point = verifying_key.to_encoded_point(false);
    let hash = Keccak256::digest(&public_key_point.as_bytes()[1..]);
    Ok(format!("0x{}", hex::encode(&hash[12..])))
}

fn sign_prehash(
    material: &KeyMaterial,
    sighash: &[u8; 32],
) -> WalletResult<(Signature, RecoveryId)> {
    let signing_key = SigningKey::from_bytes(material.as_bytes().into())
        .map_err(|e| WalletError::Internal(format!("invalid signing key: {}", e)))?;
    signing_key
        .sign_prehash_recoverable(sighash)
        .map_err(|e| WalletError::Internal(format!("signing failed: {}", e)))
}

fn decode_eth_address(address: &str) -> WalletResult<[u8; 20]> {
    let stripped = address
        .strip_prefix("0x")
        .ok_or_else(|| WalletError::InvalidAddress("missing 0x prefix".into()))?;
    let bytes = hex::decode(stripped)
        .map_err(|_| WalletError::InvalidAddress("address is not hex".into()))?;
    bytes
        .try_into()
        .map_err(|_| WalletError::InvalidAddress("address is not 20 bytes".into()))
}

/// RLP 整数编码：去前导零的大端字节串（0 编码为空串）
fn append_u(stream: &mut RlpStream, value: u128) {
    stream.append(&trim_leading_zeros(&value.to_be_bytes()));
}

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

fn copy_right_aligned(dest: &mut [u8], src: &[u8]) -> WalletResult<()> {
    if src.len() > dest.len() {
        return Err(WalletError::Parsing("scalar too long".into()));
    }
    let start = dest.len() - src.len();
    dest[start..].copy_from_slice(src);
    Ok(())
}

fn decode_err(e: rlp::DecoderError) -> WalletError {
    WalletError::Parsing(format!("rlp decode: {}", e))
}
