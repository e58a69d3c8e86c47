//! 本地预执行（模拟）
//!
//! 不依赖节点 trace 接口：用 value + 最坏费用推导发送方支出与
//! 接收方入账。合约内部转账不在结论范围内。失败的模拟不产生
//! 任何余额变化条目。

use tracing::debug;

use crate::domain::transaction::{BalanceChange, SimulationResult, UnsignedTransaction};
use crate::error::{WalletError, WalletResult};

pub struct Simulator {
    ttl_secs: u64,
}

impl Simulator {
    pub fn new(ttl_secs: u64) -> Self {
        Self { ttl_secs }
    }

    /// 基于当前可花余额推演这笔交易
    ///
    /// 结论与交易指纹绑定，TTL 过期或任何字段变化后作废。
    pub fn simulate(
        &self,
        tx: &UnsignedTransaction,
        spendable_native: u128,
    ) -> WalletResult<SimulationResult> {
        let value = tx.value_native()?;
        let max_fee = tx.fee.max_fee_native()?;
        let total = value
            .checked_add(max_fee)
            .ok_or_else(|| WalletError::Parsing("cost calculation overflow".into()))?;

        let fingerprint = tx.fingerprint();
        let expires_at = SimulationResult::ttl_from_now(self.ttl_secs);

        if total > spendable_native {
            debug!(chain = %tx.chain, "Simulation failed: insufficient funds");
            return Ok(SimulationResult {
                success: false,
                estimated_cost: total,
                balance_changes: vec![],
                failure_reason: Some(format!(
                    "insufficient funds: need {} native units, have {}",
                    total, spendable_native
                )),
                fingerprint,
                expires_at,
            });
        }

        let debit = i128::try_from(total)
            .map_err(|_| WalletError::Parsing("cost exceeds i128".into()))?;
        let credit = i128::try_from(value)
            .map_err(|_| WalletError::Parsing("value exceeds i128".into()))?;

        Ok(SimulationResult {
            success: true,
            estimated_cost: total,
            balance_changes: vec![
                BalanceChange {
                    address: tx.from.clone(),
                    delta: -debit,
                },
                BalanceChange {
                    address: tx.to.clone(),
                    delta: credit,
                },
            ],
            failure_reason: None,
            fingerprint,
            expires_at,
        })
    }
}
