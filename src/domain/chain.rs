//! 多链配置模块
//!
//! 定义支持的区块链及其加密曲线配置。链集合是封闭的：
//! 签名路径依赖穷举 match，新增链必须显式扩展枚举。

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{WalletError, WalletResult};

/// 支持的链（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Bitcoin,
    Solana,
}

impl Chain {
    pub const ALL: [Chain; 3] = [Chain::Ethereum, Chain::Bitcoin, Chain::Solana];

    /// 规范名称（小写，用于日志和存储键）
    pub fn canonical_name(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Bitcoin => "bitcoin",
            Chain::Solana => "solana",
        }
    }

    /// 从任意别名解析（eth/ETH/Ethereum/btc/sol 等）
    pub fn parse(s: &str) -> WalletResult<Chain> {
        ALIAS_MAP
            .get(s.to_lowercase().as_str())
            .copied()
            .ok_or_else(|| WalletError::UnsupportedChain(s.to_string()))
    }

    pub fn config(&self) -> &'static ChainConfig {
        match self {
            Chain::Ethereum => &ETHEREUM_CONFIG,
            Chain::Bitcoin => &BITCOIN_CONFIG,
            Chain::Solana => &SOLANA_CONFIG,
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// 加密曲线类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveType {
    /// secp256k1 曲线 (Ethereum, Bitcoin)
    Secp256k1,
    /// ed25519 曲线 (Solana)
    Ed25519,
}

/// 地址编码格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFormat {
    /// 十六进制 0x... (Ethereum)
    Hex,
    /// Bech32 编码 (Bitcoin native segwit)
    Bech32,
    /// Base58 编码 (Solana)
    Base58,
}

/// HD 派生标准
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DerivationStandard {
    /// BIP44: m/44'/coin_type'/account'/change/index
    BIP44,
    /// BIP84: m/84'/coin_type'/account'/change/index (native segwit)
    BIP84,
    /// SLIP-0010 全硬化派生（ed25519）
    SLIP0010,
}

/// 链配置
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain: Chain,
    pub name: &'static str,
    pub symbol: &'static str,
    pub curve_type: CurveType,
    pub address_format: AddressFormat,
    pub derivation_standard: DerivationStandard,
    /// BIP44 coin type
    pub coin_type: u32,
    /// 最小单位的小数位数（wei=18, sat=8, lamport=9）
    pub decimals: u32,
}

impl ChainConfig {
    /// 生成派生路径
    ///
    /// # Arguments
    /// * `account` - 账户索引 (通常为 0)
    /// * `change` - 找零索引 (外部地址为 0)
    /// * `index` - 地址索引
    pub fn derivation_path(&self, account: u32, change: u32, index: u32) -> String {
        match self.derivation_standard {
            DerivationStandard::BIP44 => {
                format!(
                    "m/44'/{}'/{}'/{}/{}",
                    self.coin_type, account, change, index
                )
            }
            DerivationStandard::BIP84 => {
                format!(
                    "m/84'/{}'/{}'/{}/{}",
                    self.coin_type, account, change, index
                )
            }
            DerivationStandard::SLIP0010 => {
                // Solana: m/44'/501'/account'/change'
                format!("m/44'/{}'/{}'/{}'", self.coin_type, account, change)
            }
        }
    }

    /// 验证地址格式（语法层面，不做链上存在性检查）
    pub fn validate_address(&self, address: &str) -> bool {
        match self.address_format {
            AddressFormat::Hex => {
                address.starts_with("0x")
                    && address.len() == 42
                    && address[2..].chars().all(|c| c.is_ascii_hexdigit())
            }
            AddressFormat::Bech32 => address.starts_with("bc1") || address.starts_with("tb1"),
            AddressFormat::Base58 => {
                (32..=44).contains(&address.len())
                    && bs58::decode(address).into_vec().is_ok()
            }
        }
    }
}

static ETHEREUM_CONFIG: ChainConfig = ChainConfig {
    chain: Chain::Ethereum,
    name: "Ethereum",
    symbol: "ETH",
    curve_type: CurveType::Secp256k1,
    address_format: AddressFormat::Hex,
    derivation_standard: DerivationStandard::BIP44,
    coin_type: 60,
    decimals: 18,
};

static BITCOIN_CONFIG: ChainConfig = ChainConfig {
    chain: Chain::Bitcoin,
    name: "Bitcoin",
    symbol: "BTC",
    curve_type: CurveType::Secp256k1,
    address_format: AddressFormat::Bech32,
    derivation_standard: DerivationStandard::BIP84,
    coin_type: 0,
    decimals: 8,
};

static SOLANA_CONFIG: ChainConfig = ChainConfig {
    chain: Chain::Solana,
    name: "Solana",
    symbol: "SOL",
    curve_type: CurveType::Ed25519,
    address_format: AddressFormat::Base58,
    derivation_standard: DerivationStandard::SLIP0010,
    coin_type: 501,
    decimals: 9,
};

/// 链标识符别名表（统一入口处理所有外部写法）
static ALIAS_MAP: Lazy<HashMap<&'static str, Chain>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for alias in ["eth", "ether", "ethereum", "mainnet"] {
        map.insert(alias, Chain::Ethereum);
    }
    for alias in ["btc", "bitcoin"] {
        map.insert(alias, Chain::Bitcoin);
    }
    for alias in ["sol", "solana"] {
        map.insert(alias, Chain::Solana);
    }
    map
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_normalization() {
        assert_eq!(Chain::parse("ETH").unwrap(), Chain::Ethereum);
        assert_eq!(Chain::parse("Bitcoin").unwrap(), Chain::Bitcoin);
        assert_eq!(Chain::parse("sol").unwrap(), Chain::Solana);
        assert!(matches!(
            Chain::parse("dogecoin"),
            Err(WalletError::UnsupportedChain(_))
        ));
    }

    #[test]
    fn test_derivation_paths() {
        assert_eq!(
            Chain::Ethereum.config().derivation_path(0, 0, 0),
            "m/44'/60'/0'/0/0"
        );
        assert_eq!(
            Chain::Bitcoin.config().derivation_path(0, 0, 0),
            "m/84'/0'/0'/0/0"
        );
        assert_eq!(
            Chain::Solana.config().derivation_path(0, 0, 0),
            "m/44'/501'/0'/0'"
        );
    }

    #[test]
    fn test_address_validation() {
        let eth = Chain::Ethereum.config();
        assert!(eth.validate_address("0x742d35cc6634c0532925a3b844bc9e7595f0beb6"));
        assert!(!eth.validate_address("0x123"));
        assert!(!eth.validate_address("invalid"));

        let btc = Chain::Bitcoin.config();
        assert!(btc.validate_address("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"));
        assert!(!btc.validate_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"));

        let sol = Chain::Solana.config();
        assert!(sol.validate_address("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"));
        assert!(!sol.validate_address("short"));
    }

    #[test]
    fn test_decimals_per_chain() {
        assert_eq!(Chain::Ethereum.config().decimals, 18);
        assert_eq!(Chain::Bitcoin.config().decimals, 8);
        assert_eq!(Chain::Solana.config().decimals, 9);
    }
}
