//! 统一错误类型
//!
//! 引擎对外暴露的错误分类是封闭集合：UI 层只能看到 `user_message()`
//! 的文案，内部错误描述（含地址、RPC 原文）只进日志且经过脱敏。

use thiserror::Error;

/// 钱包引擎错误分类
#[derive(Debug, Clone, Error)]
pub enum WalletError {
    /// 网络传输失败（连接、DNS、TLS 等）
    #[error("network error: {0}")]
    Network(String),

    /// 请求超时（与一般网络错误区分，刷新管线按链降级处理）
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// 地址格式非法
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// 远端节点返回了 RPC 错误对象（HTTP 200 也可能携带）
    #[error("rpc error: {0}")]
    Rpc(String),

    /// 响应解析失败
    #[error("malformed response: {0}")]
    Parsing(String),

    /// 不支持的链或 (链, 操作) 组合
    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    /// 余额不足以覆盖 value + fee
    #[error("insufficient funds")]
    InsufficientFunds,

    /// 助记词非法（词数错误或校验和失败），必须 fail closed
    #[error("invalid mnemonic")]
    InvalidMnemonic,

    /// Key Vault 中不存在该密钥（与解密失败统一呈现，防止侧信道）
    #[error("key not found")]
    KeyNotFound,

    /// 平台认证未通过或被取消（可重试）
    #[error("authentication required")]
    AuthRequired,

    /// 模拟执行失败
    #[error("simulation failed: {0}")]
    SimulationFailed(String),

    /// 交易构建/签名/广播失败
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// 风控规则阻断（critical 告警未被显式覆盖）
    #[error("blocked by risk rule: {0}")]
    RiskBlocked(String),

    /// 引擎内部错误（配置缺失、存储损坏等）
    #[error("internal error: {0}")]
    Internal(String),
}

impl WalletError {
    /// 稳定错误码（用于日志聚合与 UI 层映射）
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::Network(_) => "network",
            WalletError::Timeout(_) => "timeout",
            WalletError::InvalidAddress(_) => "invalid_address",
            WalletError::Rpc(_) => "rpc_error",
            WalletError::Parsing(_) => "parsing_error",
            WalletError::UnsupportedChain(_) => "unsupported_chain",
            WalletError::InsufficientFunds => "insufficient_funds",
            WalletError::InvalidMnemonic => "invalid_mnemonic",
            WalletError::KeyNotFound => "key_not_found",
            WalletError::AuthRequired => "auth_required",
            WalletError::SimulationFailed(_) => "simulation_failed",
            WalletError::TransactionFailed(_) => "transaction_failed",
            WalletError::RiskBlocked(_) => "risk_blocked",
            WalletError::Internal(_) => "internal",
        }
    }

    /// UI 层可见的文案（封闭集合，不携带内部细节）
    pub fn user_message(&self) -> &'static str {
        match self {
            WalletError::Network(_) => "Network unavailable. Check your connection and try again.",
            WalletError::Timeout(_) => "The network is taking too long to respond. Try again.",
            WalletError::InvalidAddress(_) => "That address doesn't look valid.",
            WalletError::Rpc(_) => "The network rejected the request. Try again later.",
            WalletError::Parsing(_) => "Received an unexpected response from the network.",
            WalletError::UnsupportedChain(_) => "This chain isn't supported yet.",
            WalletError::InsufficientFunds => "Not enough balance to cover amount and network fee.",
            WalletError::InvalidMnemonic => "That recovery phrase isn't valid. Check every word.",
            WalletError::KeyNotFound => "No signing key found for this account.",
            WalletError::AuthRequired => "Authentication is required to continue.",
            WalletError::SimulationFailed(_) => "This transaction would fail. Nothing was sent.",
            WalletError::TransactionFailed(_) => "The transaction could not be sent.",
            WalletError::RiskBlocked(_) => "Blocked for your safety. Review the warnings.",
            WalletError::Internal(_) => "Something went wrong. Please try again.",
        }
    }

    /// 是否可由用户直接重试恢复（认证/网络类）
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WalletError::Network(_)
                | WalletError::Timeout(_)
                | WalletError::AuthRequired
                | WalletError::Rpc(_)
        )
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest 不暴露配置的超时时长，这里报 0 占位
            WalletError::Timeout(0)
        } else if err.is_decode() {
            WalletError::Parsing(err.to_string())
        } else {
            WalletError::Network(err.to_string())
        }
    }
}

pub type WalletResult<T> = Result<T, WalletError>;
