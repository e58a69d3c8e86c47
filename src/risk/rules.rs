//! 内置风控规则
//!
//! 地址投毒检测参数公开成常量，阈值调整不用翻实现。

use crate::domain::chain::Chain;
use crate::risk::{RiskAlert, RiskContext, RiskRule, RiskSeverity};

/// 投毒判定：与可信地址前后各多少字符一致视为"肉眼难辨"
pub const PREFIX_SUFFIX_MATCH_LEN: usize = 4;
/// 短于该长度的地址不做前后缀比对（误报率太高）
pub const MIN_ADDRESS_LEN: usize = 12;

/// ERC-20 approve(address,uint256)
const SELECTOR_APPROVE: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];
/// ERC-20 increaseAllowance(address,uint256)
const SELECTOR_INCREASE_ALLOWANCE: [u8; 4] = [0x39, 0x50, 0x93, 0x51];
/// ERC-721/1155 setApprovalForAll(address,bool)
const SELECTOR_SET_APPROVAL_FOR_ALL: [u8; 4] = [0xa2, 0x2c, 0xb4, 0x65];

/// 余额是否覆盖 value + 最坏费用
pub struct BalanceSufficiencyRule;

impl RiskRule for BalanceSufficiencyRule {
    fn name(&self) -> &'static str {
        "balance_sufficiency"
    }

    fn evaluate(&self, ctx: &RiskContext<'_>) -> Option<RiskAlert> {
        // 换算失败本身就是阻断理由
        let value = match ctx.tx.value_native() {
            Ok(v) => v,
            Err(e) => {
                return Some(RiskAlert {
                    rule: self.name(),
                    severity: RiskSeverity::Critical,
                    message: "transaction amount could not be interpreted".to_string(),
                    detail: Some(e.to_string()),
                })
            }
        };
        let max_fee = ctx.tx.fee.max_fee_native().unwrap_or(u128::MAX);

        let total = value.checked_add(max_fee).unwrap_or(u128::MAX);
        if total > ctx.spendable_native {
            return Some(RiskAlert {
                rule: self.name(),
                severity: RiskSeverity::Critical,
                message: "balance does not cover amount plus worst-case fee".to_string(),
                detail: Some(format!(
                    "required {} native units, spendable {}",
                    total, ctx.spendable_native
                )),
            });
        }
        None
    }
}

/// 已知 drainer 手法的 calldata 特征
pub struct DrainerPayloadRule;

impl RiskRule for DrainerPayloadRule {
    fn name(&self) -> &'static str {
        "drainer_payload"
    }

    fn evaluate(&self, ctx: &RiskContext<'_>) -> Option<RiskAlert> {
        if ctx.tx.chain != Chain::Ethereum || ctx.tx.payload.len() < 4 {
            return None;
        }
        let selector: [u8; 4] = ctx.tx.payload[..4].try_into().ok()?;

        match selector {
            SELECTOR_APPROVE => {
                // 参数区：spender (32) + amount (32)
                let amount = ctx.tx.payload.get(36..68)?;
                if amount.iter().all(|&b| b == 0xff) {
                    return Some(RiskAlert {
                        rule: self.name(),
                        severity: RiskSeverity::Critical,
                        message: "unlimited token approval requested".to_string(),
                        detail: Some("approve amount is uint256 max".to_string()),
                    });
                }
                Some(RiskAlert {
                    rule: self.name(),
                    severity: RiskSeverity::Warning,
                    message: "transaction grants a token allowance".to_string(),
                    detail: None,
                })
            }
            SELECTOR_INCREASE_ALLOWANCE => Some(RiskAlert {
                rule: self.name(),
                severity: RiskSeverity::Critical,
                message: "allowance increase requested".to_string(),
                detail: Some("increaseAllowance is a common drainer pattern".to_string()),
            }),
            SELECTOR_SET_APPROVAL_FOR_ALL => {
                // 参数区：operator (32) + approved (32)，末字节非零即 true
                let approved = ctx.tx.payload.get(36..68)?.last().copied().unwrap_or(0);
                if approved != 0 {
                    return Some(RiskAlert {
                        rule: self.name(),
                        severity: RiskSeverity::Critical,
                        message: "collection-wide operator approval requested".to_string(),
                        detail: Some("setApprovalForAll(true) hands over every token".to_string()),
                    });
                }
                None
            }
            _ => None,
        }
    }
}

/// 地址投毒：收款地址与可信地址前后缀一致但中段不同
pub struct AddressPoisoningRule;

impl RiskRule for AddressPoisoningRule {
    fn name(&self) -> &'static str {
        "address_poisoning"
    }

    fn evaluate(&self, ctx: &RiskContext<'_>) -> Option<RiskAlert> {
        let to = normalize(ctx.tx.chain, &ctx.tx.to);
        if to.len() < MIN_ADDRESS_LEN {
            return None;
        }

        // 精确匹配任一可信地址就不是投毒，先于前后缀比对判定
        if ctx
            .known_addresses
            .iter()
            .any(|known| normalize(ctx.tx.chain, known) == to)
        {
            return None;
        }

        for known in ctx.known_addresses {
            let known = normalize(ctx.tx.chain, known);
            if known.len() != to.len() || known.len() < MIN_ADDRESS_LEN {
                continue;
            }

            let prefix_match = known[..PREFIX_SUFFIX_MATCH_LEN] == to[..PREFIX_SUFFIX_MATCH_LEN];
            let suffix_match = known[known.len() - PREFIX_SUFFIX_MATCH_LEN..]
                == to[to.len() - PREFIX_SUFFIX_MATCH_LEN..];
            if prefix_match && suffix_match {
                return Some(RiskAlert {
                    rule: self.name(),
                    severity: RiskSeverity::Critical,
                    message: "recipient mimics a trusted address".to_string(),
                    detail: Some(diff_hint(&known, &to)),
                });
            }
        }
        None
    }
}

/// 完全陌生的收款地址（提示级）
pub struct UnknownRecipientRule;

impl RiskRule for UnknownRecipientRule {
    fn name(&self) -> &'static str {
        "unknown_recipient"
    }

    fn evaluate(&self, ctx: &RiskContext<'_>) -> Option<RiskAlert> {
        let to = normalize(ctx.tx.chain, &ctx.tx.to);
        let known = ctx
            .known_addresses
            .iter()
            .any(|k| normalize(ctx.tx.chain, k) == to);
        if known {
            return None;
        }
        Some(RiskAlert {
            rule: self.name(),
            severity: RiskSeverity::Warning,
            message: "first transfer to this recipient".to_string(),
            detail: None,
        })
    }
}

/// EVM 十六进制地址大小写不敏感；Base58/Bech32 原样比较
fn normalize(chain: Chain, address: &str) -> String {
    match chain {
        Chain::Ethereum => address.to_lowercase(),
        Chain::Bitcoin | Chain::Solana => address.to_string(),
    }
}

/// 指出首个不一致的位置，帮用户核对
fn diff_hint(known: &str, to: &str) -> String {
    let pos = known
        .chars()
        .zip(to.chars())
        .position(|(a, b)| a != b)
        .unwrap_or(0);
    format!(
        "differs from trusted address {} starting at character {}",
        known, pos
    )
}
