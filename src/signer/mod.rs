//! Transaction Builder & Signer
//!
//! 发送管线的编排者：`prepare` 收集链上参数构建未签名交易，
//! `sign` 在模拟结论有效、风控放行之后才触碰 Key Vault。
//! 密钥材料只在单次签名的作用域内存活，签完即 Drop。

pub mod bitcoin;
pub mod evm;
pub mod solana;

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::chain::Chain;
use crate::domain::transaction::{
    Amount, FeeMode, SignedTransaction, SimulationResult, TxInput, UnsignedTransaction,
};
use crate::error::{WalletError, WalletResult};
use crate::gateway::{ChainGateway, FeeRequest, GatewayRouter};
use crate::infrastructure::log_redact::redact_address;
use crate::risk::RiskReport;
use crate::vault::{Authenticator, KeyHandle, KeyVault, SecureStore};

/// 一次转账意图
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub chain: Chain,
    pub from: String,
    pub to: String,
    pub value: Amount,
    pub payload: Vec<u8>,
    pub fee_mode: FeeMode,
}

pub struct TransactionSigner<S: SecureStore, A: Authenticator> {
    router: Arc<GatewayRouter>,
    vault: Arc<KeyVault<S, A>>,
    eth_chain_id: u64,
}

impl<S: SecureStore, A: Authenticator> TransactionSigner<S, A> {
    pub fn new(router: Arc<GatewayRouter>, vault: Arc<KeyVault<S, A>>, eth_chain_id: u64) -> Self {
        Self {
            router,
            vault,
            eth_chain_id,
        }
    }

    /// 构建未签名交易：校验地址、取 nonce/blockhash/UTXO、敲定费用
    ///
    /// 每次发送尝试都走一遍，不复用旧的 nonce 或费用。
    pub async fn prepare(&self, request: &TransferRequest) -> WalletResult<UnsignedTransaction> {
        let config = request.chain.config();
        if !config.validate_address(&request.to) {
            return Err(WalletError::InvalidAddress(format!(
                "not a valid {} address",
                config.name
            )));
        }

        let gateway = self.router.get(request.chain)?;
        let value_native = request.value.to_native_units(config.decimals)?;

        let nonce = gateway.fetch_nonce(&request.from).await?;
        let signing_context = gateway.fetch_signing_context(&request.from).await?;

        let (inputs, fee) = match request.chain {
            Chain::Bitcoin => self.select_utxos(&*gateway, request, value_native).await?,
            _ => {
                let fee = gateway
                    .estimate_fee(
                        &FeeRequest {
                            from: request.from.clone(),
                            to: request.to.clone(),
                            value_native,
                            payload: request.payload.clone(),
                            input_count: 0,
                        },
                        &request.fee_mode,
                    )
                    .await?;
                (vec![], fee)
            }
        };

        info!(
            chain = %request.chain,
            to = %redact_address(&request.to),
            nonce,
            fee_limit = fee.limit,
            "Unsigned transaction prepared"
        );

        Ok(UnsignedTransaction {
            chain: request.chain,
            from: request.from.clone(),
            to: request.to.clone(),
            value: request.value,
            payload: request.payload.clone(),
            nonce,
            fee,
            inputs,
            signing_context,
        })
    }

    /// 签名
    ///
    /// 前置闸门按序判定：模拟结论必须针对这笔交易且未过期、必须成功；
    /// critical 风控告警默认阻断，只有 `override_critical` 显式放行。
    /// 全部通过后才触发认证并取回密钥。
    pub async fn sign(
        &self,
        tx: &UnsignedTransaction,
        handle: &KeyHandle,
        simulation: &SimulationResult,
        risk: &RiskReport,
        override_critical: bool,
    ) -> WalletResult<SignedTransaction> {
        if simulation.is_stale(tx) {
            return Err(WalletError::SimulationFailed(
                "simulation no longer matches this transaction".into(),
            ));
        }
        if !simulation.success {
            return Err(WalletError::SimulationFailed(
                simulation
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "simulated execution failed".into()),
            ));
        }
        if risk.has_critical() {
            if !override_critical {
                return Err(WalletError::RiskBlocked(
                    risk.alerts
                        .iter()
                        .map(|a| a.message.clone())
                        .collect::<Vec<_>>()
                        .join("; "),
                ));
            }
            warn!(chain = %tx.chain, "Critical risk alert overridden by user");
        }

        // 密钥材料的作用域到本函数结尾为止
        let material = self.vault.retrieve(handle).await?;
        let signed = match tx.chain {
            Chain::Ethereum => evm::sign(tx, self.eth_chain_id, &material)?,
            Chain::Bitcoin => bitcoin::sign(tx, &material)?,
            Chain::Solana => solana::sign(tx, &material)?,
        };

        info!(chain = %tx.chain, tx_hash = %signed.tx_hash, "Transaction signed");
        Ok(signed)
    }

    /// 广播已签名交易
    pub async fn broadcast(&self, signed: &SignedTransaction) -> WalletResult<String> {
        let gateway = self.router.get(signed.chain)?;
        gateway.broadcast(signed).await
    }

    /// Bitcoin：从大到小选 UTXO 直到覆盖 value + 费用
    ///
    /// 每加一个输入重估一次费用（体积变了）。
    async fn select_utxos(
        &self,
        gateway: &dyn ChainGateway,
        request: &TransferRequest,
        value_native: u128,
    ) -> WalletResult<(Vec<TxInput>, crate::domain::transaction::FeeParams)> {
        let mut available = gateway.fetch_utxos(&request.from).await?;
        available.sort_by(|a, b| b.value.cmp(&a.value));
        let mut available = available.into_iter();

        let mut selected: Vec<TxInput> = Vec::new();
        let mut total: u128 = 0;

        loop {
            let fee = gateway
                .estimate_fee(
                    &FeeRequest {
                        from: request.from.clone(),
                        to: request.to.clone(),
                        value_native,
                        payload: request.payload.clone(),
                        input_count: selected.len().max(1),
                    },
                    &request.fee_mode,
                )
                .await?;
            let needed = value_native
                .checked_add(fee.max_fee_native()?)
                .ok_or(WalletError::InsufficientFunds)?;

            if !selected.is_empty() && total >= needed {
                return Ok((selected, fee));
            }
            let Some(utxo) = available.next() else {
                return Err(WalletError::InsufficientFunds);
            };
            total += utxo.value as u128;
            selected.push(utxo);
        }
    }
}
