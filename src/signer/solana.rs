//! Solana 交易签名（System Program 转账）
//!
//! 手工构造 legacy 线格式 message：header + 账户表 + recent blockhash +
//! 指令表，数组长度用 compact-u16。单签名者即付款人。

use ed25519_dalek::{Signer as _, SigningKey};

use crate::domain::transaction::{FeePrice, SignedTransaction, UnsignedTransaction};
use crate::error::{WalletError, WalletResult};
use crate::vault::KeyMaterial;

/// System Program 地址（全零公钥）
const SYSTEM_PROGRAM_ID: [u8; 32] = [0u8; 32];
/// SystemInstruction::Transfer 的指令编号
const SYSTEM_TRANSFER_INDEX: u32 = 2;

pub fn sign(tx: &UnsignedTransaction, material: &KeyMaterial) -> WalletResult<SignedTransaction> {
    let FeePrice::Lamports { .. } = tx.fee.price else {
        return Err(WalletError::Internal(
            "fee price kind does not match chain".into(),
        ));
    };
    if tx.signing_context.len() != 32 {
        return Err(WalletError::TransactionFailed(
            "missing recent blockhash".into(),
        ));
    }

    let signing_key = SigningKey::from_bytes(material.as_bytes());
    let sender: [u8; 32] = signing_key.verifying_key().to_bytes();

    // 签名者地址必须与密钥一致
    if bs58::encode(sender).into_string() != tx.from {
        return Err(WalletError::TransactionFailed(
            "signing key does not match sender address".into(),
        ));
    }

    let recipient = decode_pubkey(&tx.to)?;
    let lamports = u64::try_from(tx.value_native()?)
        .map_err(|_| WalletError::Parsing("amount exceeds u64 lamports".into()))?;

    let message = build_transfer_message(&sender, &recipient, &tx.signing_context, lamports);
    let signature = signing_key.sign(&message);

    // wire tx = 签名数组 (compact-u16 长度) + message
    let mut raw = Vec::with_capacity(1 + 64 + message.len());
    push_compact_u16(&mut raw, 1);
    raw.extend_from_slice(&signature.to_bytes());
    raw.extend_from_slice(&message);

    Ok(SignedTransaction {
        chain: tx.chain,
        raw,
        // Solana 的交易标识就是首个签名
        tx_hash: bs58::encode(signature.to_bytes()).into_string(),
    })
}

fn build_transfer_message(
    sender: &[u8; 32],
    recipient: &[u8; 32],
    blockhash: &[u8],
    lamports: u64,
) -> Vec<u8> {
    // 自转账时账户表去重，收款方索引指回付款人
    let self_transfer = sender == recipient;
    let (accounts, recipient_index): (Vec<&[u8; 32]>, u8) = if self_transfer {
        (vec![sender, &SYSTEM_PROGRAM_ID], 0)
    } else {
        (vec![sender, recipient, &SYSTEM_PROGRAM_ID], 1)
    };
    let program_index = (accounts.len() - 1) as u8;

    let mut message = Vec::with_capacity(128);
    // header: 1 个签名者，0 个只读签名者，1 个只读非签名者（program）
    message.push(1);
    message.push(0);
    message.push(1);

    push_compact_u16(&mut message, accounts.len() as u16);
    for account in accounts {
        message.extend_from_slice(account);
    }

    message.extend_from_slice(blockhash);

    // 指令表：单条 System Transfer
    push_compact_u16(&mut message, 1);
    message.push(program_index);
    push_compact_u16(&mut message, 2);
    message.push(0); // 付款人
    message.push(recipient_index);

    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&SYSTEM_TRANSFER_INDEX.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    push_compact_u16(&mut message, data.len() as u16);
    message.extend_from_slice(&data);

    message
}

fn decode_pubkey(address: &str) -> WalletResult<[u8; 32]> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|_| WalletError::InvalidAddress("not base58".into()))?;
    bytes
        .try_into()
        .map_err(|_| WalletError::InvalidAddress("pubkey is not 32 bytes".into()))
}

fn push_compact_u16(out: &mut Vec<u8>, mut value: u16) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chain::Chain;
    use crate::domain::transaction::{Amount, FeeParams};
    use ed25519_dalek::{Verifier, VerifyingKey};

    fn material() -> KeyMaterial {
        KeyMaterial::from_bytes([0x22; 32])
    }

    fn sender_address() -> String {
        let key = SigningKey::from_bytes(material().as_bytes());
        bs58::encode(key.verifying_key().to_bytes()).into_string()
    }

    fn sample_tx() -> UnsignedTransaction {
        UnsignedTransaction {
            chain: Chain::Solana,
            from: sender_address(),
            to: bs58::encode([9u8; 32]).into_string(),
            value: Amount::parse("0.5").unwrap(),
            payload: vec![],
            nonce: 0,
            fee: FeeParams {
                limit: 1,
                price: FeePrice::Lamports {
                    per_signature: 5_000,
                    priority: 0,
                },
            },
            inputs: vec![],
            signing_context: vec![7u8; 32],
        }
    }

    #[test]
    fn test_signature_verifies_over_message() {
        let tx = sample_tx();
        let signed = sign(&tx, &material()).unwrap();

        // raw = compact_u16(1) + sig(64) + message
        assert_eq!(signed.raw[0], 1);
        let signature = ed25519_dalek::Signature::from_slice(&signed.raw[1..65]).unwrap();
        let message = &signed.raw[65..];

        let key = SigningKey::from_bytes(material().as_bytes());
        let verifying: VerifyingKey = key.verifying_key();
        assert!(verifying.verify(message, &signature).is_ok());
    }

    #[test]
    fn test_message_encodes_transfer_instruction() {
        let tx = sample_tx();
        let signed = sign(&tx, &material()).unwrap();
        let message = &signed.raw[65..];

        // header
        assert_eq!(&message[..3], &[1, 0, 1]);
        // 3 个账户
        assert_eq!(message[3], 3);
        // 指令数据尾部：编号 2 + 500000000 lamports（小端）
        let mut expected = SYSTEM_TRANSFER_INDEX.to_le_bytes().to_vec();
        expected.extend_from_slice(&500_000_000u64.to_le_bytes());
        assert!(message.ends_with(&expected));
    }

    #[test]
    fn test_missing_blockhash_rejected() {
        let mut tx = sample_tx();
        tx.signing_context = vec![];
        assert!(matches!(
            sign(&tx, &material()),
            Err(WalletError::TransactionFailed(_))
        ));
    }

    #[test]
    fn test_self_transfer_dedupes_accounts() {
        let mut tx = sample_tx();
        tx.to = tx.from.clone();
        let signed = sign(&tx, &material()).unwrap();
        let message = &signed.raw[65..];
        // 2 个账户：付款人 + system program
        assert_eq!(message[3], 2);
    }

    #[test]
    fn test_invalid_recipient_rejected() {
        let mut tx = sample_tx();
        tx.to = "0xnothex".to_string();
        assert!(matches!(
            sign(&tx, &material()),
            Err(WalletError::InvalidAddress(_))
        ));
    }
}
