//! 钱包账户模型

use serde::{Deserialize, Serialize};

use crate::domain::chain::Chain;

/// 某条链上的派生地址（派生一次后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAddress {
    pub chain: Chain,
    pub address: String,
    pub derivation_path: String,
    /// 公钥 (hex 编码)
    pub public_key: String,
    // 注意：不包含私钥。私钥只存在于 Key Vault。
}

/// 钱包账户
///
/// 稳定标识是主链（Ethereum）地址；每条支持的链各有一个派生地址。
/// 同一 seed + path 重新派生必须得到相同结果（幂等）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletAccount {
    /// 稳定标识：主链地址
    pub id: String,
    /// 展示名称
    pub display_name: String,
    pub addresses: Vec<DerivedAddress>,
}

impl WalletAccount {
    pub fn new(display_name: impl Into<String>, addresses: Vec<DerivedAddress>) -> Self {
        // 主链地址作为账户 id；派生服务保证 Ethereum 地址总在其中
        let id = addresses
            .iter()
            .find(|a| a.chain == Chain::Ethereum)
            .map(|a| a.address.clone())
            .unwrap_or_else(|| {
                addresses
                    .first()
                    .map(|a| a.address.clone())
                    .unwrap_or_default()
            });

        Self {
            id,
            display_name: display_name.into(),
            addresses,
        }
    }

    /// 指定链上的地址
    pub fn address_for(&self, chain: Chain) -> Option<&DerivedAddress> {
        self.addresses.iter().find(|a| a.chain == chain)
    }

    /// (账户, 链) 对应的 Key Vault 标识
    pub fn key_id_for(&self, chain: Chain) -> String {
        format!("{}:{}", self.id, chain.canonical_name())
    }
}
