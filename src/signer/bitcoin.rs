//! Bitcoin 交易签名（P2WPKH，BIP143 sighash）
//!
//! 输入全部来自同一发送方地址，逐输入计算 segwit v0 sighash 并填 witness。
//! 找零低于 dust 阈值时并入矿工费，不输出找零。

use bitcoin::hashes::Hash as _;
use bitcoin::{
    absolute,
    consensus::encode::serialize,
    ecdsa::Signature as EcdsaSignature,
    secp256k1::{Message, Secp256k1, SecretKey},
    sighash::{EcdsaSighashType, SighashCache},
    transaction, Address, Amount as BtcAmount, Network, OutPoint, PublicKey, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};

use crate::domain::transaction::{FeePrice, SignedTransaction, UnsignedTransaction};
use crate::error::{WalletError, WalletResult};
use crate::vault::KeyMaterial;

/// P2WPKH dust 阈值（sat）
const DUST_LIMIT_SAT: u64 = 546;

pub fn sign(tx: &UnsignedTransaction, material: &KeyMaterial) -> WalletResult<SignedTransaction> {
    if tx.inputs.is_empty() {
        return Err(WalletError::TransactionFailed("no inputs selected".into()));
    }
    let FeePrice::SatPerVbyte { .. } = tx.fee.price else {
        return Err(WalletError::Internal(
            "fee price kind does not match chain".into(),
        ));
    };

    let secp = Secp256k1::new();
    let secret_key = SecretKey::from_slice(material.as_bytes())
        .map_err(|e| WalletError::Internal(format!("invalid signing key: {}", e)))?;
    let public_key = PublicKey::new(secret_key.public_key(&secp));
    let wpkh = public_key
        .wpubkey_hash()
        .ok_or_else(|| WalletError::Internal("uncompressed public key".into()))?;
    let spent_script = ScriptBuf::new_p2wpkh(&wpkh);

    // 发送方地址必须与密钥一致，防止拿错 handle 花别人的 UTXO 描述
    let derived_address = Address::p2wpkh(&public_key, Network::Bitcoin)
        .map_err(|e| WalletError::Internal(format!("p2wpkh address: {}", e)))?;
    if derived_address.to_string() != tx.from {
        return Err(WalletError::TransactionFailed(
            "signing key does not match sender address".into(),
        ));
    }

    let recipient_script = parse_recipient(&tx.to)?;

    let value_sat = u64::try_from(tx.value_native()?)
        .map_err(|_| WalletError::Parsing("amount exceeds u64 satoshis".into()))?;
    let fee_sat = u64::try_from(tx.fee.max_fee_native()?)
        .map_err(|_| WalletError::Parsing("fee exceeds u64 satoshis".into()))?;
    let total_in: u64 = tx.inputs.iter().map(|i| i.value).sum();

    let spend = value_sat
        .checked_add(fee_sat)
        .ok_or(WalletError::InsufficientFunds)?;
    if total_in < spend {
        return Err(WalletError::InsufficientFunds);
    }
    let change = total_in - spend;

    let txins: Vec<TxIn> = tx
        .inputs
        .iter()
        .map(|input| {
            let txid = input
                .txid
                .parse::<Txid>()
                .map_err(|e| WalletError::Parsing(format!("invalid txid: {}", e)))?;
            Ok(TxIn {
                previous_output: OutPoint {
                    txid,
                    vout: input.vout,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
        })
        .collect::<WalletResult<_>>()?;

    let mut txouts = vec![TxOut {
        value: BtcAmount::from_sat(value_sat),
        script_pubkey: recipient_script,
    }];
    if change >= DUST_LIMIT_SAT {
        txouts.push(TxOut {
            value: BtcAmount::from_sat(change),
            script_pubkey: spent_script.clone(),
        });
    }

    let mut unsigned = Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: txins,
        output: txouts,
    };

    let mut cache = SighashCache::new(&mut unsigned);
    let mut witnesses = Vec::with_capacity(tx.inputs.len());
    for (index, input) in tx.inputs.iter().enumerate() {
        let sighash = cache
            .p2wpkh_signature_hash(
                index,
                &spent_script,
                BtcAmount::from_sat(input.value),
                EcdsaSighashType::All,
            )
            .map_err(|e| WalletError::TransactionFailed(format!("sighash: {}", e)))?;

        let message = Message::from_digest(sighash.to_byte_array());
        let signature = EcdsaSignature {
            sig: secp.sign_ecdsa(&message, &secret_key),
            hash_ty: EcdsaSighashType::All,
        };

        let mut witness = Witness::new();
        witness.push(signature.to_vec());
        witness.push(public_key.to_bytes());
        witnesses.push(witness);
    }
    drop(cache);

    for (txin, witness) in unsigned.input.iter_mut().zip(witnesses) {
        txin.witness = witness;
    }

    let tx_hash = unsigned.txid().to_string();
    Ok(SignedTransaction {
        chain: tx.chain,
        raw: serialize(&unsigned),
        tx_hash,
    })
}

fn parse_recipient(address: &str) -> WalletResult<ScriptBuf> {
    let parsed = address
        .parse::<Address<bitcoin::address::NetworkUnchecked>>()
        .map_err(|e| WalletError::InvalidAddress(format!("bitcoin address: {}", e)))?
        .require_network(Network::Bitcoin)
        .map_err(|_| WalletError::InvalidAddress("address is not mainnet".into()))?;
    Ok(parsed.script_pubkey())
}
