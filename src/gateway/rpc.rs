//! JSON-RPC 客户端
//!
//! Ethereum 与 Solana 网关共用。约定：即使 HTTP 200，也要先检查
//! 响应体里的 error 对象，再取 result 字段。

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{WalletError, WalletResult};

/// 广播类调用的重试参数
const BROADCAST_RETRIES: u32 = 3;
const RETRY_BACKOFF_MS: u64 = 500;

pub struct JsonRpcClient {
    http: reqwest::Client,
    endpoint: String,
    timeout_ms: u64,
}

impl JsonRpcClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> WalletResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::Internal(format!("http client init: {}", e)))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    /// 单次 JSON-RPC 调用
    pub async fn call(&self, method: &str, params: Value) -> WalletResult<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WalletError::Network(format!(
                "rpc http status {}",
                status.as_u16()
            )));
        }

        let body: Value = response.json().await.map_err(|e| self.classify(e))?;

        // error 对象优先于 result
        if let Some(error) = body.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown rpc error");
            warn!(method, code, message, "RPC returned error object");
            return Err(WalletError::Rpc(format!("{} ({})", message, code)));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| WalletError::Parsing(format!("rpc response missing result: {}", method)))
    }

    /// 带退避重试的调用（网络/超时错误重试，节点明确拒绝不重试）
    pub async fn call_with_retry(&self, method: &str, params: Value) -> WalletResult<Value> {
        let mut last_err = WalletError::Network("no attempt made".into());
        for attempt in 1..=BROADCAST_RETRIES {
            match self.call(method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(e @ (WalletError::Network(_) | WalletError::Timeout(_))) => {
                    debug!(method, attempt, error = %e, "RPC call failed, will retry");
                    last_err = e;
                    if attempt < BROADCAST_RETRIES {
                        tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64))
                            .await;
                    }
                }
                // 节点明确拒绝（nonce 错误、余额不足等）重试无意义
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    fn classify(&self, e: reqwest::Error) -> WalletError {
        if e.is_timeout() {
            WalletError::Timeout(self.timeout_ms)
        } else {
            e.into()
        }
    }
}

/// 解析 "0x..." 十六进制数量
pub fn parse_hex_u128(value: &Value) -> WalletResult<u128> {
    let s = value
        .as_str()
        .ok_or_else(|| WalletError::Parsing("expected hex string".into()))?;
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    u128::from_str_radix(stripped, 16)
        .map_err(|e| WalletError::Parsing(format!("invalid hex quantity '{}': {}", s, e)))
}

pub fn parse_hex_u64(value: &Value) -> WalletResult<u64> {
    let v = parse_hex_u128(value)?;
    u64::try_from(v).map_err(|_| WalletError::Parsing("hex quantity exceeds u64".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_quantities() {
        assert_eq!(parse_hex_u128(&json!("0x0")).unwrap(), 0);
        assert_eq!(parse_hex_u128(&json!("0xde0b6b3a7640000")).unwrap(), 10u128.pow(18));
        assert_eq!(parse_hex_u64(&json!("0x15")).unwrap(), 21);

        assert!(parse_hex_u128(&json!("zzz")).is_err());
        assert!(parse_hex_u128(&json!(12)).is_err());
        // u64 溢出
        assert!(parse_hex_u64(&json!("0xffffffffffffffffff")).is_err());
    }
}
