//! Solana 网关（JSON-RPC）
//!
//! Solana 没有账户 nonce，签名用 recent blockhash 防重放，
//! 由 `fetch_signing_context` 提供。历史接口只返回签名列表，
//! 金额需要逐笔 getTransaction，这里不做（摘要金额记 0）。

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::domain::chain::Chain;
use crate::domain::transaction::{Amount, FeeMode, FeeParams, FeePrice, SignedTransaction};
use crate::error::{WalletError, WalletResult};
use crate::gateway::rpc::JsonRpcClient;
use crate::gateway::{Balance, ChainGateway, FeeRequest, TransactionSummary};

/// 基础签名费（lamports）
const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

pub struct SolanaGateway {
    rpc: JsonRpcClient,
}

impl SolanaGateway {
    pub fn new(endpoint: &str, timeout: Duration) -> WalletResult<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(endpoint, timeout)?,
        })
    }

    /// 最近优先费的中位数（样本为空记 0，基础费仍然收）
    async fn median_prioritization_fee(&self) -> WalletResult<u64> {
        let result = self
            .rpc
            .call("getRecentPrioritizationFees", json!([[]]))
            .await?;
        let mut fees: Vec<u64> = result
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.get("prioritizationFee").and_then(Value::as_u64))
                    .collect()
            })
            .unwrap_or_default();

        if fees.is_empty() {
            return Ok(0);
        }
        fees.sort_unstable();
        Ok(fees[fees.len() / 2])
    }
}

#[async_trait]
impl ChainGateway for SolanaGateway {
    fn chain(&self) -> Chain {
        Chain::Solana
    }

    async fn fetch_balance(&self, address: &str) -> WalletResult<Balance> {
        let result = self.rpc.call("getBalance", json!([address])).await?;
        let lamports = result
            .get("value")
            .and_then(Value::as_u64)
            .ok_or_else(|| WalletError::Parsing("getBalance missing value".into()))?;
        Ok(Balance::from_native(Chain::Solana, lamports as u128))
    }

    async fn fetch_history(
        &self,
        address: &str,
        limit: usize,
    ) -> WalletResult<Vec<TransactionSummary>> {
        let result = self
            .rpc
            .call(
                "getSignaturesForAddress",
                json!([address, { "limit": limit }]),
            )
            .await?;
        let entries = result
            .as_array()
            .ok_or_else(|| WalletError::Parsing("signature list is not an array".into()))?;

        let summaries = entries
            .iter()
            .map(|entry| {
                let timestamp = entry
                    .get("blockTime")
                    .and_then(Value::as_i64)
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
                TransactionSummary {
                    chain: Chain::Solana,
                    hash: entry
                        .get("signature")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    from: String::new(),
                    to: address.to_string(),
                    value: Amount::zero(),
                    timestamp,
                    incoming: false,
                }
            })
            .collect();
        Ok(summaries)
    }

    async fn fetch_nonce(&self, _address: &str) -> WalletResult<u64> {
        // 防重放由 recent blockhash 承担
        Ok(0)
    }

    async fn fetch_signing_context(&self, _address: &str) -> WalletResult<Vec<u8>> {
        let result = self
            .rpc
            .call("getLatestBlockhash", json!([{ "commitment": "finalized" }]))
            .await?;
        let blockhash = result
            .get("value")
            .and_then(|v| v.get("blockhash"))
            .and_then(Value::as_str)
            .ok_or_else(|| WalletError::Parsing("getLatestBlockhash missing blockhash".into()))?;

        let bytes = bs58::decode(blockhash)
            .into_vec()
            .map_err(|e| WalletError::Parsing(format!("invalid blockhash: {}", e)))?;
        if bytes.len() != 32 {
            return Err(WalletError::Parsing("blockhash is not 32 bytes".into()));
        }
        debug!("Recent blockhash fetched");
        Ok(bytes)
    }

    async fn estimate_fee(&self, _request: &FeeRequest, mode: &FeeMode) -> WalletResult<FeeParams> {
        let price = match mode {
            FeeMode::Explicit(price) => *price,
            FeeMode::UseDefault => FeePrice::Lamports {
                per_signature: LAMPORTS_PER_SIGNATURE,
                priority: self.median_prioritization_fee().await?,
            },
        };
        // 单签名转账
        Ok(FeeParams { limit: 1, price })
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> WalletResult<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&tx.raw);
        let result = self
            .rpc
            .call_with_retry(
                "sendTransaction",
                json!([encoded, { "encoding": "base64" }]),
            )
            .await?;
        let signature = result
            .as_str()
            .ok_or_else(|| WalletError::Parsing("sendTransaction result is not a string".into()))?
            .to_string();
        info!(signature = %signature, "Solana transaction broadcast");
        Ok(signature)
    }
}
