//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub rpc: RpcConfig,
    pub timeouts: TimeoutConfig,
    pub engine: EngineTuning,
    pub logging: LoggingConfig,
}

/// 每条链的远端端点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Ethereum JSON-RPC 端点
    pub ethereum_rpc_url: String,
    /// EIP-155 链 ID
    pub ethereum_chain_id: u64,
    /// Solana JSON-RPC 端点
    pub solana_rpc_url: String,
    /// Bitcoin esplora 风格 API 根路径
    pub bitcoin_api_url: String,
}

/// 超时分级（余额/广播用长超时，逐块历史扫描用短超时）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub request_timeout_secs: u64,
    pub history_scan_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn history_scan(&self) -> Duration {
        Duration::from_secs(self.history_scan_timeout_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// 引擎行为参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTuning {
    /// 历史记录最多返回多少条
    pub history_limit: usize,
    /// 模拟结果的有效期（秒），过期必须重新模拟
    pub simulation_ttl_secs: u64,
    /// 广播成功后等待多久再回查余额（毫秒）
    pub propagation_delay_ms: u64,
    /// 单链余额刷新超时（秒），超过即该链缺席本轮结果
    pub per_chain_refresh_timeout_secs: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig {
                ethereum_rpc_url: "http://localhost:8545".to_string(),
                ethereum_chain_id: 1,
                solana_rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
                bitcoin_api_url: "https://blockstream.info/api".to_string(),
            },
            timeouts: TimeoutConfig {
                request_timeout_secs: 30,
                history_scan_timeout_secs: 8,
                connect_timeout_secs: 10,
            },
            engine: EngineTuning {
                history_limit: 50,
                simulation_ttl_secs: 60,
                propagation_delay_ms: 1500,
                per_chain_refresh_timeout_secs: 10,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl EngineConfig {
    /// 从 TOML 文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// 从环境变量加载（.env 优先，缺省值兜底）
    ///
    /// 环境变量：
    /// - VAULTCORE_ETH_RPC_URL / VAULTCORE_ETH_CHAIN_ID
    /// - VAULTCORE_SOL_RPC_URL
    /// - VAULTCORE_BTC_API_URL
    /// - VAULTCORE_REQUEST_TIMEOUT_SECS
    /// - VAULTCORE_LOG_LEVEL / VAULTCORE_LOG_FORMAT
    pub fn from_env() -> Self {
        // .env 不存在不是错误
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        if let Ok(url) = std::env::var("VAULTCORE_ETH_RPC_URL") {
            config.rpc.ethereum_rpc_url = url;
        }
        if let Some(chain_id) = env_parse::<u64>("VAULTCORE_ETH_CHAIN_ID") {
            config.rpc.ethereum_chain_id = chain_id;
        }
        if let Ok(url) = std::env::var("VAULTCORE_SOL_RPC_URL") {
            config.rpc.solana_rpc_url = url;
        }
        if let Ok(url) = std::env::var("VAULTCORE_BTC_API_URL") {
            config.rpc.bitcoin_api_url = url;
        }
        if let Some(secs) = env_parse::<u64>("VAULTCORE_REQUEST_TIMEOUT_SECS") {
            config.timeouts.request_timeout_secs = secs;
        }
        if let Ok(level) = std::env::var("VAULTCORE_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("VAULTCORE_LOG_FORMAT") {
            config.logging.format = format;
        }

        config
    }

    /// 基本完整性校验
    pub fn validate(&self) -> Result<()> {
        if self.rpc.ethereum_rpc_url.is_empty() {
            anyhow::bail!("ethereum_rpc_url must not be empty");
        }
        if self.timeouts.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be > 0");
        }
        if self.engine.history_limit == 0 {
            anyhow::bail!("history_limit must be > 0");
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}
