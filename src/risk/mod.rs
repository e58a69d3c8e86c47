//! Risk Engine
//!
//! 签名前的本地风控管线。规则按注册顺序执行，产出告警列表；
//! 出现 critical 告警后不再执行后续规则（结论已定，省掉无谓计算）。
//! 引擎只产出告警，阻断决策在签名编排层。

pub mod rules;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::transaction::UnsignedTransaction;

/// 告警级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeverity {
    /// 仅提示，不参与阻断
    Info,
    /// 提示用户注意，不阻断
    Warning,
    /// 默认阻断签名，需显式覆盖
    Critical,
}

/// 单条风控告警
#[derive(Debug, Clone, Serialize)]
pub struct RiskAlert {
    pub rule: &'static str,
    pub severity: RiskSeverity,
    pub message: String,
    /// 给用户的辅助信息（如地址差异提示）
    pub detail: Option<String>,
}

/// 一次评估的完整结论
#[derive(Debug, Clone, Default, Serialize)]
pub struct RiskReport {
    pub alerts: Vec<RiskAlert>,
}

impl RiskReport {
    pub fn has_critical(&self) -> bool {
        self.alerts
            .iter()
            .any(|a| a.severity == RiskSeverity::Critical)
    }

    pub fn is_clean(&self) -> bool {
        self.alerts.is_empty()
    }
}

/// 规则评估的输入快照
pub struct RiskContext<'a> {
    pub tx: &'a UnsignedTransaction,
    /// 发送方当前可花余额（最小单位）
    pub spendable_native: u128,
    /// 可信地址集合：联系人 + 历史成功收款方
    pub known_addresses: &'a [String],
}

/// 单条风控规则
pub trait RiskRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, ctx: &RiskContext<'_>) -> Option<RiskAlert>;
}

/// 风控引擎：规则的有序集合
pub struct RiskEngine {
    rules: Vec<Box<dyn RiskRule>>,
}

impl RiskEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// 默认规则集，顺序即优先级
    pub fn with_default_rules() -> Self {
        let mut engine = Self::new();
        engine.register(Box::new(rules::BalanceSufficiencyRule));
        engine.register(Box::new(rules::DrainerPayloadRule));
        engine.register(Box::new(rules::AddressPoisoningRule));
        engine.register(Box::new(rules::UnknownRecipientRule));
        engine
    }

    pub fn register(&mut self, rule: Box<dyn RiskRule>) {
        self.rules.push(rule);
    }

    pub fn evaluate(&self, ctx: &RiskContext<'_>) -> RiskReport {
        let mut report = RiskReport::default();
        for rule in &self.rules {
            if let Some(alert) = rule.evaluate(ctx) {
                let is_critical = alert.severity == RiskSeverity::Critical;
                warn!(
                    rule = rule.name(),
                    severity = ?alert.severity,
                    message = %alert.message,
                    "Risk rule triggered"
                );
                report.alerts.push(alert);
                if is_critical {
                    break;
                }
            }
        }
        report
    }
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chain::Chain;
    use crate::domain::transaction::{Amount, FeeParams, FeePrice};

    pub(crate) fn eth_tx(to: &str, value: &str) -> UnsignedTransaction {
        UnsignedTransaction {
            chain: Chain::Ethereum,
            from: "0xaaa0000000000000000000000000000000000001".to_string(),
            to: to.to_string(),
            value: Amount::parse(value).unwrap(),
            payload: vec![],
            nonce: 0,
            fee: FeeParams {
                limit: 21000,
                price: FeePrice::Eip1559 {
                    max_fee_per_gas: 10_000_000_000,
                    max_priority_fee_per_gas: 1_000_000_000,
                },
            },
            inputs: vec![],
            signing_context: vec![],
        }
    }

    #[test]
    fn test_critical_short_circuits_later_rules() {
        // 余额不足（critical）后，poisoning 等规则不再执行
        let tx = eth_tx("0xbbb0000000000000000000000000000000000002", "10");
        let known = vec!["0xbbb0000000000000000000000000000000009999".to_string()];
        let ctx = RiskContext {
            tx: &tx,
            spendable_native: 0,
            known_addresses: &known,
        };

        let report = RiskEngine::with_default_rules().evaluate(&ctx);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].rule, "balance_sufficiency");
        assert!(report.has_critical());
    }

    #[test]
    fn test_clean_transaction_yields_empty_report() {
        let tx = eth_tx("0xbbb0000000000000000000000000000000000002", "0.1");
        let known = vec!["0xbbb0000000000000000000000000000000000002".to_string()];
        let ctx = RiskContext {
            tx: &tx,
            spendable_native: 10u128.pow(18),
            known_addresses: &known,
        };

        let report = RiskEngine::with_default_rules().evaluate(&ctx);
        assert!(report.is_clean());
        assert!(!report.has_critical());
    }
}
