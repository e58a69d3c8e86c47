//! Ethereum 网关（JSON-RPC）
//!
//! 费用估算分两步：eth_estimateGas 得 limit（加安全余量），
//! eth_maxPriorityFeePerGas + eth_gasPrice 得 EIP-1559 价格。
//! 价格来源返回 0 视为上游异常，直接失败。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::domain::chain::Chain;
use crate::domain::transaction::{FeeMode, FeeParams, FeePrice, SignedTransaction};
use crate::error::{WalletError, WalletResult};
use crate::gateway::rpc::{parse_hex_u128, parse_hex_u64, JsonRpcClient};
use crate::gateway::{Balance, ChainGateway, FeeRequest, TransactionSummary};
use crate::infrastructure::log_redact::redact_address;

/// gas limit 安全余量：估算值 × 1.2
const GAS_LIMIT_BUFFER_NUM: u64 = 12;
const GAS_LIMIT_BUFFER_DEN: u64 = 10;
/// max_fee = gas_price × 2 + priority，容忍 base fee 翻倍
const BASE_FEE_HEADROOM: u128 = 2;
/// 历史扫描的回看窗口
const HISTORY_SCAN_BLOCKS: u64 = 20;

pub struct EvmGateway {
    rpc: JsonRpcClient,
    chain_id: u64,
    /// 历史扫描的单块预算
    per_block_timeout: Duration,
}

impl EvmGateway {
    pub fn new(
        endpoint: &str,
        chain_id: u64,
        timeout: Duration,
        per_block_timeout: Duration,
    ) -> WalletResult<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(endpoint, timeout)?,
            chain_id,
            per_block_timeout,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// EIP-1559 价格对；任一来源为 0 则失败
    async fn fetch_fee_price(&self) -> WalletResult<FeePrice> {
        let priority = parse_hex_u128(
            &self
                .rpc
                .call("eth_maxPriorityFeePerGas", json!([]))
                .await?,
        )?;
        let gas_price = parse_hex_u128(&self.rpc.call("eth_gasPrice", json!([])).await?)?;

        if gas_price == 0 {
            return Err(WalletError::Rpc("node returned zero gas price".into()));
        }

        let max_fee = gas_price
            .checked_mul(BASE_FEE_HEADROOM)
            .and_then(|v| v.checked_add(priority))
            .ok_or_else(|| WalletError::Parsing("fee price overflow".into()))?;

        debug!(gas_price, priority, max_fee, "EIP-1559 fee price fetched");
        Ok(FeePrice::Eip1559 {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority,
        })
    }

    /// 在单个区块里找与地址相关的交易
    fn scan_block(
        &self,
        block: &Value,
        address_lower: &str,
        out: &mut Vec<TransactionSummary>,
        limit: usize,
    ) {
        let Some(txs) = block.get("transactions").and_then(Value::as_array) else {
            return;
        };
        let timestamp = block
            .get("timestamp")
            .and_then(|t| parse_hex_u64(t).ok())
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single());

        for tx in txs {
            if out.len() >= limit {
                return;
            }
            let from = tx.get("from").and_then(Value::as_str).unwrap_or_default();
            let to = tx.get("to").and_then(Value::as_str).unwrap_or_default();
            let from_lower = from.to_lowercase();
            let to_lower = to.to_lowercase();
            if from_lower != address_lower && to_lower != address_lower {
                continue;
            }

            let value_wei = tx
                .get("value")
                .and_then(|v| parse_hex_u128(v).ok())
                .unwrap_or(0);
            out.push(TransactionSummary {
                chain: Chain::Ethereum,
                hash: tx
                    .get("hash")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                from: from.to_string(),
                to: to.to_string(),
                value: crate::domain::transaction::Amount::from_native_units(value_wei, 18),
                timestamp,
                incoming: to_lower == address_lower,
            });
        }
    }
}

#[async_trait]
impl ChainGateway for EvmGateway {
    fn chain(&self) -> Chain {
        Chain::Ethereum
    }

    async fn fetch_balance(&self, address: &str) -> WalletResult<Balance> {
        let result = self
            .rpc
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        let wei = parse_hex_u128(&result)?;
        Ok(Balance::from_native(Chain::Ethereum, wei))
    }

    /// 回看最近若干区块扫描相关交易
    ///
    /// 单块有独立超时，超时/失败的块跳过；凑满 limit 提前退出。
    async fn fetch_history(
        &self,
        address: &str,
        limit: usize,
    ) -> WalletResult<Vec<TransactionSummary>> {
        let latest = parse_hex_u64(&self.rpc.call("eth_blockNumber", json!([])).await?)?;
        let address_lower = address.to_lowercase();
        let mut summaries = Vec::new();

        let first = latest.saturating_sub(HISTORY_SCAN_BLOCKS.saturating_sub(1));
        for number in (first..=latest).rev() {
            if summaries.len() >= limit {
                break;
            }
            let call = self.rpc.call(
                "eth_getBlockByNumber",
                json!([format!("0x{:x}", number), true]),
            );
            match tokio::time::timeout(self.per_block_timeout, call).await {
                Ok(Ok(block)) => {
                    self.scan_block(&block, &address_lower, &mut summaries, limit)
                }
                Ok(Err(e)) => {
                    warn!(block = number, error = %e, "Block fetch failed, skipping");
                }
                Err(_) => {
                    warn!(block = number, "Block fetch timed out, skipping");
                }
            }
        }

        debug!(
            address = %redact_address(address),
            count = summaries.len(),
            "EVM history scan complete"
        );
        Ok(summaries)
    }

    async fn fetch_nonce(&self, address: &str) -> WalletResult<u64> {
        // pending：把本地已广播未上链的交易也算进去
        let result = self
            .rpc
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        parse_hex_u64(&result)
    }

    async fn estimate_fee(&self, request: &FeeRequest, mode: &FeeMode) -> WalletResult<FeeParams> {
        let call_object = json!({
            "from": request.from,
            "to": request.to,
            "value": format!("0x{:x}", request.value_native),
            "data": format!("0x{}", hex::encode(&request.payload)),
        });
        let estimated = parse_hex_u64(
            &self
                .rpc
                .call("eth_estimateGas", json!([call_object]))
                .await?,
        )?;
        let limit = estimated
            .checked_mul(GAS_LIMIT_BUFFER_NUM)
            .map(|v| v / GAS_LIMIT_BUFFER_DEN)
            .ok_or_else(|| WalletError::Parsing("gas limit overflow".into()))?;

        let price = match mode {
            FeeMode::Explicit(price) => *price,
            FeeMode::UseDefault => self.fetch_fee_price().await?,
        };

        Ok(FeeParams { limit, price })
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> WalletResult<String> {
        let result = self
            .rpc
            .call_with_retry("eth_sendRawTransaction", json!([tx.raw_hex()]))
            .await?;
        let hash = result
            .as_str()
            .ok_or_else(|| WalletError::Parsing("broadcast result is not a string".into()))?
            .to_string();
        info!(tx_hash = %hash, "Ethereum transaction broadcast");
        Ok(hash)
    }
}
