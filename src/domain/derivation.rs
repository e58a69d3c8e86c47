//! 钱包派生策略
//!
//! 为不同的加密曲线提供统一的钱包派生接口。派生是纯函数：
//! 同一 (助记词, 路径) 永远得到同一密钥和地址。

use bip39::{Language, Mnemonic};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::domain::chain::{Chain, CurveType};
use crate::error::{WalletError, WalletResult};
use crate::vault::KeyMaterial;

/// 派生结果
#[derive(Debug)]
pub struct DerivedWallet {
    /// 公钥 (hex 编码)
    pub public_key: String,
    /// 地址
    pub address: String,
    /// 派生路径
    pub derivation_path: String,
    /// 私钥材料（仅交给 Key Vault，别处不得缓存）
    pub material: KeyMaterial,
}

/// 钱包派生策略 trait
pub trait DerivationStrategy: Send + Sync {
    /// 从助记词派生钱包
    fn derive_wallet(
        &self,
        mnemonic: &str,
        chain: Chain,
        account: u32,
        change: u32,
        index: u32,
    ) -> WalletResult<DerivedWallet>;

    /// 从已有密钥材料恢复地址（幂等性检查用）
    fn derive_address(&self, material: &KeyMaterial, chain: Chain) -> WalletResult<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Secp256k1 策略 (Ethereum, Bitcoin)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Secp256k1Strategy;

impl DerivationStrategy for Secp256k1Strategy {
    fn derive_wallet(
        &self,
        mnemonic: &str,
        chain: Chain,
        account: u32,
        change: u32,
        index: u32,
    ) -> WalletResult<DerivedWallet> {
        let seed = seed_from_mnemonic(mnemonic)?;
        let path = chain.config().derivation_path(account, change, index);
        let material = derive_secp256k1_key(&seed[..], &path)?;

        let (public_key, address) = match chain {
            Chain::Ethereum => ethereum_keypair(&material)?,
            Chain::Bitcoin => bitcoin_keypair(&material)?,
            Chain::Solana => {
                return Err(WalletError::Internal(
                    "solana is not a secp256k1 chain".into(),
                ))
            }
        };

        Ok(DerivedWallet {
            public_key,
            address,
            derivation_path: path,
            material,
        })
    }

    fn derive_address(&self, material: &KeyMaterial, chain: Chain) -> WalletResult<String> {
        match chain {
            Chain::Ethereum => Ok(ethereum_keypair(material)?.1),
            Chain::Bitcoin => Ok(bitcoin_keypair(material)?.1),
            Chain::Solana => Err(WalletError::UnsupportedChain("solana".into())),
        }
    }
}

/// 派生 Ethereum 公钥和地址
fn ethereum_keypair(material: &KeyMaterial) -> WalletResult<(String, String)> {
    use k256::ecdsa::SigningKey;
    use sha3::{Digest, Keccak256};

    let signing_key = SigningKey::from_bytes(material.as_bytes().into())
        .map_err(|e| WalletError::Internal(format!("invalid secp256k1 key: {}", e)))?;

    let verifying_key = signing_key.verifying_key();
    let public_key_point = verifying_key.to_encoded_point(false); // 未压缩格式
    let public_key_slice = &public_key_point.as_bytes()[1..]; // 去掉 0x04 前缀

    // Keccak256 哈希取后 20 字节
    let hash = Keccak256::digest(public_key_slice);
    let address = format!("0x{}", hex::encode(&hash[12..]));

    Ok((hex::encode(public_key_slice), address))
}

/// 派生 Bitcoin P2WPKH (native segwit) 公钥和地址
fn bitcoin_keypair(material: &KeyMaterial) -> WalletResult<(String, String)> {
    use bitcoin::{
        secp256k1::{PublicKey as Secp256k1PublicKey, Secp256k1, SecretKey},
        Address, Network, PublicKey as BitcoinPublicKey,
    };

    let secp = Secp256k1::new();
    let secret_key = SecretKey::from_slice(material.as_bytes())
        .map_err(|e| WalletError::Internal(format!("invalid secp256k1 key: {}", e)))?;
    let secp_pubkey = Secp256k1PublicKey::from_secret_key(&secp, &secret_key);

    let bitcoin_pubkey = BitcoinPublicKey::new(secp_pubkey);
    let address = Address::p2wpkh(&bitcoin_pubkey, Network::Bitcoin)
        .map_err(|e| WalletError::Internal(format!("p2wpkh address: {}", e)))?
        .to_string();

    Ok((hex::encode(secp_pubkey.serialize()), address))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ed25519 策略 (Solana)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Ed25519Strategy;

impl DerivationStrategy for Ed25519Strategy {
    fn derive_wallet(
        &self,
        mnemonic: &str,
        chain: Chain,
        account: u32,
        change: u32,
        _index: u32,
    ) -> WalletResult<DerivedWallet> {
        if chain != Chain::Solana {
            return Err(WalletError::UnsupportedChain(chain.to_string()));
        }

        let seed = seed_from_mnemonic(mnemonic)?;
        let path = chain.config().derivation_path(account, change, 0);

        // 硬化路径先走 BIP32 主派生，再把结果作为 ed25519 种子。
        // 与 BIP32 同源保证确定性，路径空间与 secp256k1 链隔离。
        let material = derive_secp256k1_key(&seed[..], &path)?;

        let (public_key, address) = solana_keypair(&material);

        Ok(DerivedWallet {
            public_key,
            address,
            derivation_path: path,
            material,
        })
    }

    fn derive_address(&self, material: &KeyMaterial, chain: Chain) -> WalletResult<String> {
        if chain != Chain::Solana {
            return Err(WalletError::UnsupportedChain(chain.to_string()));
        }
        Ok(solana_keypair(material).1)
    }
}

fn solana_keypair(material: &KeyMaterial) -> (String, String) {
    use ed25519_dalek::{SigningKey, VerifyingKey};

    let signing_key = SigningKey::from_bytes(material.as_bytes());
    let verifying_key: VerifyingKey = signing_key.verifying_key();
    let public_key_bytes = verifying_key.to_bytes();

    // Solana 地址就是公钥的 Base58 编码
    let address = bs58::encode(public_key_bytes).into_string();
    (hex::encode(public_key_bytes), address)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 公共辅助
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn seed_from_mnemonic(mnemonic: &str) -> WalletResult<Zeroizing<[u8; 64]>> {
    let parsed = Mnemonic::parse_in(Language::English, mnemonic)
        .map_err(|_| WalletError::InvalidMnemonic)?;
    Ok(Zeroizing::new(parsed.to_seed("")))
}

/// BIP32 派生出 32 字节私钥
fn derive_secp256k1_key(seed: &[u8], path: &str) -> WalletResult<KeyMaterial> {
    use coins_bip32::path::DerivationPath;
    use coins_bip32::prelude::*;
    use k256::ecdsa::SigningKey;

    let derivation_path = path
        .parse::<DerivationPath>()
        .map_err(|e| WalletError::Internal(format!("invalid derivation path: {}", e)))?;

    let master_key = XPriv::root_from_seed(seed, None)
        .map_err(|e| WalletError::Internal(format!("master key derivation: {}", e)))?;

    let derived_key = master_key
        .derive_path(&derivation_path)
        .map_err(|e| WalletError::Internal(format!("path derivation: {}", e)))?;

    // XPriv 实现 AsRef<SigningKey>
    let signing_key: &SigningKey = derived_key.as_ref();
    let bytes: [u8; 32] = signing_key.to_bytes().into();
    Ok(KeyMaterial::from_bytes(bytes))
}

/// 派生服务
pub struct DerivationService;

impl DerivationService {
    pub fn new() -> Self {
        Self
    }

    /// 生成新助记词（12 或 24 词，OS 熵源）
    pub fn generate_seed_phrase(&self, word_count: u8) -> WalletResult<Zeroizing<String>> {
        let entropy_bytes = match word_count {
            12 => 16, // 128 bits
            24 => 32, // 256 bits
            _ => {
                return Err(WalletError::Internal(
                    "word count must be 12 or 24".into(),
                ))
            }
        };

        let mut entropy = Zeroizing::new(vec![0u8; entropy_bytes]);
        rand::thread_rng().fill_bytes(&mut entropy);

        let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
            .map_err(|e| WalletError::Internal(format!("mnemonic generation: {}", e)))?;
        Ok(Zeroizing::new(mnemonic.to_string()))
    }

    /// BIP39 校验（词数 + checksum）
    pub fn validate(&self, phrase: &str) -> bool {
        Mnemonic::parse_in(Language::English, phrase).is_ok()
    }

    /// 按链选择策略派生钱包
    pub fn derive_wallet(
        &self,
        mnemonic: &str,
        chain: Chain,
        account: u32,
        index: u32,
    ) -> WalletResult<DerivedWallet> {
        self.strategy_for(chain)
            .derive_wallet(mnemonic, chain, account, 0, index)
    }

    /// 从密钥材料恢复地址
    pub fn derive_address(&self, material: &KeyMaterial, chain: Chain) -> WalletResult<String> {
        self.strategy_for(chain).derive_address(material, chain)
    }

    /// 为所有支持的链派生 index 0 地址（建钱包/导入时用）
    pub fn derive_all_chains(&self, mnemonic: &str) -> WalletResult<Vec<DerivedWallet>> {
        Chain::ALL
            .iter()
            .map(|&chain| self.derive_wallet(mnemonic, chain, 0, 0))
            .collect()
    }

    fn strategy_for(&self, chain: Chain) -> &'static dyn DerivationStrategy {
        match chain.config().curve_type {
            CurveType::Secp256k1 => &Secp256k1Strategy,
            CurveType::Ed25519 => &Ed25519Strategy,
        }
    }
}

impl Default for DerivationService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_ethereum_derivation_is_deterministic() {
        let service = DerivationService::new();

        let w1 = service
            .derive_wallet(TEST_MNEMONIC, Chain::Ethereum, 0, 0)
            .unwrap();
        let w2 = service
            .derive_wallet(TEST_MNEMONIC, Chain::Ethereum, 0, 0)
            .unwrap();

        assert_eq!(w1.address, w2.address);
        assert_eq!(w1.material.as_bytes(), w2.material.as_bytes());
        assert!(w1.address.starts_with("0x"));
        assert_eq!(w1.address.len(), 42);
        assert_eq!(w1.derivation_path, "m/44'/60'/0'/0/0");
    }

    #[test]
    fn test_bitcoin_derivation() {
        let service = DerivationService::new();
        let wallet = service
            .derive_wallet(TEST_MNEMONIC, Chain::Bitcoin, 0, 0)
            .unwrap();

        assert!(wallet.address.starts_with("bc1"));
        assert_eq!(wallet.derivation_path, "m/84'/0'/0'/0/0");
    }

    #[test]
    fn test_solana_derivation() {
        let service = DerivationService::new();
        let wallet = service
            .derive_wallet(TEST_MNEMONIC, Chain::Solana, 0, 0)
            .unwrap();

        assert!(wallet.address.len() >= 32 && wallet.address.len() <= 44);
        assert_eq!(wallet.derivation_path, "m/44'/501'/0'/0'");
    }

    #[test]
    fn test_chains_get_distinct_keys() {
        let service = DerivationService::new();
        let wallets = service.derive_all_chains(TEST_MNEMONIC).unwrap();
        assert_eq!(wallets.len(), 3);

        // 不同链的派生路径互相隔离
        assert_ne!(wallets[0].material.as_bytes(), wallets[1].material.as_bytes());
        assert_ne!(wallets[0].address, wallets[1].address);
    }

    #[test]
    fn test_invalid_mnemonic_fails_closed() {
        let service = DerivationService::new();

        // 错误词数
        let result = service.derive_wallet("abandon abandon", Chain::Ethereum, 0, 0);
        assert!(matches!(result, Err(WalletError::InvalidMnemonic)));

        // 校验和错误（最后一个词换掉）
        let bad_checksum = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon";
        let result = service.derive_wallet(bad_checksum, Chain::Ethereum, 0, 0);
        assert!(matches!(result, Err(WalletError::InvalidMnemonic)));

        assert!(!service.validate(bad_checksum));
        assert!(service.validate(TEST_MNEMONIC));
    }

    #[test]
    fn test_generate_seed_phrase() {
        let service = DerivationService::new();

        let phrase12 = service.generate_seed_phrase(12).unwrap();
        assert_eq!(phrase12.split_whitespace().count(), 12);
        assert!(service.validate(&phrase12));

        let phrase24 = service.generate_seed_phrase(24).unwrap();
        assert_eq!(phrase24.split_whitespace().count(), 24);

        assert!(service.generate_seed_phrase(15).is_err());
    }

    #[test]
    fn test_address_recovery_from_material() {
        let service = DerivationService::new();
        let wallet = service
            .derive_wallet(TEST_MNEMONIC, Chain::Ethereum, 0, 0)
            .unwrap();

        let recovered = service
            .derive_address(&wallet.material, Chain::Ethereum)
            .unwrap();
        assert_eq!(recovered, wallet.address);
    }
}
