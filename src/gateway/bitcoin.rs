//! Bitcoin 网关（Esplora REST API）
//!
//! Bitcoin 没有标准 JSON-RPC 公共节点，走 Esplora 风格的 REST 接口
//! （blockstream.info 及其自建实例）。余额 = 已确认入账 - 已确认支出。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::domain::chain::Chain;
use crate::domain::transaction::{
    Amount, FeeMode, FeeParams, FeePrice, SignedTransaction, TxInput,
};
use crate::error::{WalletError, WalletResult};
use crate::gateway::{Balance, ChainGateway, FeeRequest, TransactionSummary};
use crate::infrastructure::log_redact::redact_address;

/// 费率目标：6 个区块（约 1 小时）确认
const CONFIRM_TARGET_BLOCKS: &str = "6";

/// P2WPKH 交易体积估算（vB）
const TX_OVERHEAD_VBYTES: u64 = 11;
const INPUT_VBYTES: u64 = 68;
const OUTPUT_VBYTES: u64 = 31;

#[derive(Deserialize)]
struct AddressStats {
    chain_stats: TxoStats,
}

#[derive(Deserialize)]
struct TxoStats {
    funded_txo_sum: u64,
    spent_txo_sum: u64,
}

#[derive(Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
}

#[derive(Deserialize)]
struct EsploraTx {
    txid: String,
    status: EsploraStatus,
    vin: Vec<EsploraVin>,
    vout: Vec<EsploraVout>,
}

#[derive(Deserialize)]
struct EsploraStatus {
    block_time: Option<i64>,
}

#[derive(Deserialize)]
struct EsploraVin {
    prevout: Option<EsploraVout>,
}

#[derive(Deserialize, Clone)]
struct EsploraVout {
    scriptpubkey_address: Option<String>,
    value: u64,
}

pub struct BitcoinGateway {
    http: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
}

impl BitcoinGateway {
    pub fn new(base_url: &str, timeout: Duration) -> WalletResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::Internal(format!("http client init: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> WalletResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WalletError::Network(format!(
                "esplora http status {}",
                status.as_u16()
            )));
        }
        response.json().await.map_err(|e| self.classify(e))
    }

    fn classify(&self, e: reqwest::Error) -> WalletError {
        if e.is_timeout() {
            WalletError::Timeout(self.timeout_ms)
        } else {
            e.into()
        }
    }

    fn summarize(tx: &EsploraTx, address: &str) -> TransactionSummary {
        let received: u64 = tx
            .vout
            .iter()
            .filter(|v| v.scriptpubkey_address.as_deref() == Some(address))
            .map(|v| v.value)
            .sum();
        let spent: u64 = tx
            .vin
            .iter()
            .filter_map(|v| v.prevout.as_ref())
            .filter(|p| p.scriptpubkey_address.as_deref() == Some(address))
            .map(|p| p.value)
            .sum();
        let incoming = received > spent;

        // 出账时取第一个非本人输出作为对手方
        let counterparty = if incoming {
            tx.vin
                .iter()
                .filter_map(|v| v.prevout.as_ref())
                .filter_map(|p| p.scriptpubkey_address.clone())
                .next()
                .unwrap_or_default()
        } else {
            tx.vout
                .iter()
                .filter(|v| v.scriptpubkey_address.as_deref() != Some(address))
                .filter_map(|v| v.scriptpubkey_address.clone())
                .next()
                .unwrap_or_default()
        };

        let value_sat = if incoming {
            received - spent
        } else {
            spent.saturating_sub(received)
        };

        TransactionSummary {
            chain: Chain::Bitcoin,
            hash: tx.txid.clone(),
            from: if incoming {
                counterparty.clone()
            } else {
                address.to_string()
            },
            to: if incoming {
                address.to_string()
            } else {
                counterparty
            },
            value: Amount::from_native_units(value_sat as u128, 8),
            timestamp: tx
                .status
                .block_time
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            incoming,
        }
    }
}

#[async_trait]
impl ChainGateway for BitcoinGateway {
    fn chain(&self) -> Chain {
        Chain::Bitcoin
    }

    async fn fetch_balance(&self, address: &str) -> WalletResult<Balance> {
        let stats: AddressStats = self.get_json(&format!("/address/{}", address)).await?;
        let sats = stats
            .chain_stats
            .funded_txo_sum
            .saturating_sub(stats.chain_stats.spent_txo_sum);
        Ok(Balance::from_native(Chain::Bitcoin, sats as u128))
    }

    async fn fetch_history(
        &self,
        address: &str,
        limit: usize,
    ) -> WalletResult<Vec<TransactionSummary>> {
        let txs: Vec<EsploraTx> = self.get_json(&format!("/address/{}/txs", address)).await?;
        let summaries: Vec<_> = txs
            .iter()
            .take(limit)
            .map(|tx| Self::summarize(tx, address))
            .collect();
        debug!(
            address = %redact_address(address),
            count = summaries.len(),
            "Bitcoin history fetched"
        );
        Ok(summaries)
    }

    async fn fetch_nonce(&self, _address: &str) -> WalletResult<u64> {
        // UTXO 模型没有 nonce
        Ok(0)
    }

    async fn fetch_utxos(&self, address: &str) -> WalletResult<Vec<TxInput>> {
        let utxos: Vec<EsploraUtxo> = self
            .get_json(&format!("/address/{}/utxo", address))
            .await?;
        Ok(utxos
            .into_iter()
            .map(|u| TxInput {
                txid: u.txid,
                vout: u.vout,
                value: u.value,
            })
            .collect())
    }

    async fn estimate_fee(&self, request: &FeeRequest, mode: &FeeMode) -> WalletResult<FeeParams> {
        // limit 字段承载估算体积（vB）：1 进 2 出（找零）起步
        let inputs = request.input_count.max(1) as u64;
        let vsize = TX_OVERHEAD_VBYTES + INPUT_VBYTES * inputs + OUTPUT_VBYTES * 2;

        let price = match mode {
            FeeMode::Explicit(price) => *price,
            FeeMode::UseDefault => {
                let estimates: std::collections::HashMap<String, f64> =
                    self.get_json("/fee-estimates").await?;
                let rate_f = estimates
                    .get(CONFIRM_TARGET_BLOCKS)
                    .copied()
                    .ok_or_else(|| WalletError::Rpc("fee estimates missing target".into()))?;
                let rate = rate_f.ceil() as u64;
                if rate == 0 {
                    return Err(WalletError::Rpc("fee source returned zero rate".into()));
                }
                FeePrice::SatPerVbyte { rate }
            }
        };

        Ok(FeeParams {
            limit: vsize,
            price,
        })
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> WalletResult<String> {
        let url = format!("{}/tx", self.base_url);
        let body = hex::encode(&tx.raw);

        let response = self
            .http
            .post(&url)
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "Bitcoin broadcast rejected");
            return Err(WalletError::Rpc(format!("broadcast rejected: {}", text)));
        }
        let txid = text.trim().to_string();
        info!(txid = %txid, "Bitcoin transaction broadcast");
        Ok(txid)
    }
}
