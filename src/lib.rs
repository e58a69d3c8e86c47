//! VaultCore - 自托管多链钱包交易引擎
//!
//! 非托管模式：私钥只存在于 Key Vault，取回后活不过一次签名

pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod infrastructure;
pub mod risk;
pub mod service;
pub mod signer;
pub mod vault;

// 重新导出常用类型
pub use config::EngineConfig;
pub use error::{WalletError, WalletResult};
pub use service::{PendingSend, WalletEngine};

// 统一模块导出
pub mod prelude {
    pub use crate::{
        config::EngineConfig,
        domain::account::WalletAccount,
        domain::chain::Chain,
        domain::transaction::{Amount, FeeMode, UnsignedTransaction},
        error::{WalletError, WalletResult},
        gateway::GatewayRouter,
        service::account::{AccountHandle, AccountState},
        service::{PendingSend, WalletEngine},
        signer::TransferRequest,
        vault::{KeyHandle, KeyVault},
    };
}
