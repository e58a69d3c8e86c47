//! 交易数据模型
//!
//! 金额一律使用十进制字符串/`Decimal` 表示，换算到链上最小单位时
//! 用 `u128` checked 运算——定宽溢出在这里是资金安全问题，不是边缘情况。

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::chain::Chain;
use crate::error::{WalletError, WalletResult};

/// 用户层金额（任意精度十进制，绝不使用浮点）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn parse(s: &str) -> WalletResult<Self> {
        let value = Decimal::from_str_exact(s.trim())
            .map_err(|e| WalletError::Parsing(format!("invalid amount '{}': {}", s, e)))?;
        if value.is_sign_negative() {
            return Err(WalletError::Parsing("amount must not be negative".into()));
        }
        Ok(Self(value))
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// 换算到链上最小单位（wei/sat/lamport）
    ///
    /// 小数位超过链精度或超出 u128 范围都视为非法输入。
    pub fn to_native_units(&self, decimals: u32) -> WalletResult<u128> {
        // decimals <= 18，10^18 仍在 u64 范围内
        let scale = Decimal::from(10u64.pow(decimals));
        let scaled = self
            .0
            .checked_mul(scale)
            .ok_or_else(|| WalletError::Parsing("amount overflows native units".into()))?;
        if scaled.fract() != Decimal::ZERO {
            return Err(WalletError::Parsing(format!(
                "amount has more than {} decimal places",
                decimals
            )));
        }
        scaled
            .to_u128()
            .ok_or_else(|| WalletError::Parsing("amount overflows u128".into()))
    }

    /// 从最小单位换算回十进制（超出 Decimal 精度的极端值饱和为最大值）
    pub fn from_native_units(units: u128, decimals: u32) -> Self {
        match Decimal::try_from_i128_with_scale(units.min(i128::MAX as u128) as i128, decimals) {
            Ok(value) => Self(value.normalize()),
            Err(_) => Self(Decimal::MAX),
        }
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 费用价格（按链区分；"未提供" 用 `FeeMode::UseDefault` 表达，不与 0 混用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeePrice {
    /// EIP-1559 双参数（wei）
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
    /// 传统 gas price（wei）
    Legacy { gas_price: u128 },
    /// Bitcoin 费率（sat/vB）
    SatPerVbyte { rate: u64 },
    /// Solana 每签名费 + 优先费（lamports）
    Lamports { per_signature: u64, priority: u64 },
}

/// 调用方的费用意图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeMode {
    /// 由 Gateway 估算
    UseDefault,
    /// 显式指定价格（仍由 Gateway 估算 limit）
    Explicit(FeePrice),
}

/// 最终确定的费用参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeParams {
    /// gas limit / 估算交易体积（vB）/ 签名数
    pub limit: u64,
    pub price: FeePrice,
}

impl FeeParams {
    /// 最坏情况总费用（最小单位），checked 运算
    pub fn max_fee_native(&self) -> WalletResult<u128> {
        let overflow = || WalletError::Parsing("fee calculation overflow".into());
        match self.price {
            FeePrice::Eip1559 {
                max_fee_per_gas, ..
            } => (self.limit as u128)
                .checked_mul(max_fee_per_gas)
                .ok_or_else(overflow),
            FeePrice::Legacy { gas_price } => (self.limit as u128)
                .checked_mul(gas_price)
                .ok_or_else(overflow),
            FeePrice::SatPerVbyte { rate } => (self.limit as u128)
                .checked_mul(rate as u128)
                .ok_or_else(overflow),
            FeePrice::Lamports {
                per_signature,
                priority,
            } => (self.limit as u128)
                .checked_mul(per_signature as u128)
                .and_then(|v| v.checked_add(priority as u128))
                .ok_or_else(overflow),
        }
    }
}

/// UTXO 输入（仅 Bitcoin；账户模型链恒为空）
///
/// P2WPKH 的 scriptPubKey 可由发送方公钥重建，这里不存脚本。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub txid: String,
    pub vout: u32,
    /// 该输出的金额（sat）
    pub value: u64,
}

/// 未签名交易
///
/// 每次发送尝试都重新构建；模拟之后任何字段变化都会改变指纹，
/// 旧的模拟结果随之失效。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub chain: Chain,
    pub from: String,
    pub to: String,
    pub value: Amount,
    pub payload: Vec<u8>,
    pub nonce: u64,
    pub fee: FeeParams,
    /// Bitcoin：被花费的 UTXO 集合
    pub inputs: Vec<TxInput>,
    /// Solana：recent blockhash（32 字节）；其余链为空
    pub signing_context: Vec<u8>,
}

impl UnsignedTransaction {
    /// 字段指纹：模拟结果与交易的 1:1 绑定依据
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.chain.canonical_name().as_bytes());
        hasher.update(self.from.as_bytes());
        hasher.update(self.to.as_bytes());
        hasher.update(self.value.to_string().as_bytes());
        hasher.update(&self.payload);
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(self.fee.limit.to_be_bytes());
        for input in &self.inputs {
            hasher.update(input.txid.as_bytes());
            hasher.update(input.vout.to_be_bytes());
            hasher.update(input.value.to_be_bytes());
        }
        hasher.update(&self.signing_context);
        // price 参与指纹：换价也必须重新模拟
        hasher.update(
            serde_json::to_vec(&self.fee.price).unwrap_or_default(),
        );
        hasher.finalize().into()
    }

    /// value 换算到最小单位
    pub fn value_native(&self) -> WalletResult<u128> {
        self.value.to_native_units(self.chain.config().decimals)
    }
}

/// 已签名交易：产生一次、广播一次、随即丢弃
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub chain: Chain,
    /// 链上线路编码（EVM: 0x02 typed tx；BTC: 共识序列化；SOL: wire tx）
    pub raw: Vec<u8>,
    pub tx_hash: String,
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

/// 模拟中观察到的余额变化（最小单位，负数为支出）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub address: String,
    pub delta: i128,
}

/// 模拟结果
///
/// 余额变化只覆盖由 value + 最坏费用推导的发送方支出和接收方入账；
/// 不要求 Gateway 提供 trace 后端，合约内部转账不在保证范围内。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub success: bool,
    /// 预估总成本（value + 最坏费用，最小单位）
    pub estimated_cost: u128,
    pub balance_changes: Vec<BalanceChange>,
    pub failure_reason: Option<String>,
    /// 绑定的交易指纹
    pub fingerprint: [u8; 32],
    pub expires_at: DateTime<Utc>,
}

impl SimulationResult {
    /// 针对给定交易是否已失效（字段变化或 TTL 过期）
    pub fn is_stale(&self, tx: &UnsignedTransaction) -> bool {
        self.fingerprint != tx.fingerprint() || Utc::now() >= self.expires_at
    }

    pub fn ttl_from_now(ttl_secs: u64) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(ttl_secs as i64)
    }
}
