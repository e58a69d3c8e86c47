//! Chain Gateway
//!
//! 引擎与各条链交互的唯一出口。每条链一个实现，统一收敛到
//! `ChainGateway` trait；上层通过 `GatewayRouter` 按链取用。
//!
//! 所有网络调用都有超时；上游返回的数据在这里完成解析和归一化，
//! 解析失败归为 `WalletError::Parsing`，绝不向上层透传裸 JSON。

pub mod bitcoin;
pub mod evm;
pub mod rpc;
pub mod solana;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::domain::chain::Chain;
use crate::domain::transaction::{Amount, FeeMode, FeeParams, SignedTransaction, TxInput};
use crate::error::{WalletError, WalletResult};

/// 某链上某地址的余额快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub chain: Chain,
    /// 用户层十进制金额
    pub amount: Amount,
    /// 链上最小单位
    pub native_units: u128,
    pub symbol: String,
}

impl Balance {
    pub fn from_native(chain: Chain, native_units: u128) -> Self {
        let config = chain.config();
        Self {
            chain,
            amount: Amount::from_native_units(native_units, config.decimals),
            native_units,
            symbol: config.symbol.to_string(),
        }
    }
}

/// 历史记录条目（展示用摘要，非完整交易）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub chain: Chain,
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: Amount,
    /// 上游缺失时间戳时为 None（pending 交易）
    pub timestamp: Option<DateTime<Utc>>,
    /// 相对查询地址的方向
    pub incoming: bool,
}

/// 费用估算请求
#[derive(Debug, Clone)]
pub struct FeeRequest {
    pub from: String,
    pub to: String,
    /// 转账金额（最小单位）
    pub value_native: u128,
    pub payload: Vec<u8>,
    /// Bitcoin：计划花费的输入数；其余链忽略
    pub input_count: usize,
}

/// 单链网关
///
/// `fetch_utxos` / `fetch_signing_context` 只有部分链需要，
/// 默认实现返回空，调用方按链约定取用。
#[async_trait]
pub trait ChainGateway: Send + Sync {
    fn chain(&self) -> Chain;

    async fn fetch_balance(&self, address: &str) -> WalletResult<Balance>;

    async fn fetch_history(
        &self,
        address: &str,
        limit: usize,
    ) -> WalletResult<Vec<TransactionSummary>>;

    /// 账户模型链的下一个 nonce；UTXO 链恒为 0
    async fn fetch_nonce(&self, address: &str) -> WalletResult<u64>;

    /// Bitcoin：可花费 UTXO 集合
    async fn fetch_utxos(&self, _address: &str) -> WalletResult<Vec<TxInput>> {
        Ok(vec![])
    }

    /// Solana：recent blockhash（32 字节）
    async fn fetch_signing_context(&self, _address: &str) -> WalletResult<Vec<u8>> {
        Ok(vec![])
    }

    /// 估算费用参数
    ///
    /// `FeeMode::Explicit` 只覆盖价格，limit 仍由网关估算；
    /// 上游返回零价格或无法取得价格时必须失败，不得默默用 0 构造交易。
    async fn estimate_fee(&self, request: &FeeRequest, mode: &FeeMode) -> WalletResult<FeeParams>;

    /// 广播已签名交易，返回链上交易哈希/签名
    async fn broadcast(&self, tx: &SignedTransaction) -> WalletResult<String>;
}

/// 按链路由的网关集合
pub struct GatewayRouter {
    gateways: HashMap<Chain, Arc<dyn ChainGateway>>,
}

impl GatewayRouter {
    pub fn new() -> Self {
        Self {
            gateways: HashMap::new(),
        }
    }

    /// 用配置里的节点地址构建全部默认网关
    pub fn from_config(config: &EngineConfig) -> WalletResult<Self> {
        let timeout = config.timeouts.request();
        let mut router = Self::new();
        router.register(Arc::new(evm::EvmGateway::new(
            &config.rpc.ethereum_rpc_url,
            config.rpc.ethereum_chain_id,
            timeout,
            config.timeouts.history_scan(),
        )?));
        router.register(Arc::new(solana::SolanaGateway::new(
            &config.rpc.solana_rpc_url,
            timeout,
        )?));
        router.register(Arc::new(bitcoin::BitcoinGateway::new(
            &config.rpc.bitcoin_api_url,
            timeout,
        )?));
        Ok(router)
    }

    pub fn register(&mut self, gateway: Arc<dyn ChainGateway>) {
        self.gateways.insert(gateway.chain(), gateway);
    }

    pub fn get(&self, chain: Chain) -> WalletResult<Arc<dyn ChainGateway>> {
        self.gateways
            .get(&chain)
            .cloned()
            .ok_or_else(|| WalletError::UnsupportedChain(chain.to_string()))
    }

    pub fn chains(&self) -> Vec<Chain> {
        self.gateways.keys().copied().collect()
    }
}

impl Default for GatewayRouter {
    fn default() -> Self {
        Self::new()
    }
}
