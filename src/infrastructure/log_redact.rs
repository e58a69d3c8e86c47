//! 日志脱敏模块
//! 地址、密钥标识、原始交易等敏感值在进入日志前必须脱敏

use once_cell::sync::Lazy;
use regex::Regex;

/// 脱敏十六进制字符串（显示前缀和后缀）
pub fn redact_hex_string(hex: &str, show_chars: usize) -> String {
    if hex.len() <= show_chars * 2 {
        return "*".repeat(hex.len());
    }

    let prefix = &hex[..show_chars];
    let suffix = &hex[hex.len() - show_chars..];
    format!("{}...{}", prefix, suffix)
}

/// 脱敏地址（显示前6位和后4位）
pub fn redact_address(address: &str) -> String {
    if address.len() < 10 {
        return "*".repeat(address.len());
    }

    let prefix = &address[..6];
    let suffix = &address[address.len() - 4..];
    format!("{}...{}", prefix, suffix)
}

/// 脱敏 Key Vault 的密钥标识（id 本身含账户地址）
pub fn redact_key_id(id: &str) -> String {
    redact_address(id)
}

// 消息级兜底：捕捉嵌在自由文本里的 0x 地址和 base58 长串
static HEX_ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"0x[0-9a-fA-F]{40,}").expect("valid regex"));
static BASE58_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[1-9A-HJ-NP-Za-km-z]{32,44}\b").expect("valid regex"));

/// 清洗将进入日志的自由文本（RPC 错误原文等）
pub fn scrub_message(message: &str) -> String {
    let scrubbed = HEX_ADDRESS_RE.replace_all(message, "0x****");
    let scrubbed = BASE58_RE.replace_all(&scrubbed, "****");
    scrubbed.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_hex_string() {
        let hex = "0x1234567890abcdef1234567890abcdef12345678";
        let redacted = redact_hex_string(hex, 10);
        assert_eq!(redacted, "0x12345678...ef12345678");
    }

    #[test]
    fn test_redact_address() {
        let address = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bFd2";
        let redacted = redact_address(address);
        assert_eq!(redacted, "0x742d...bFd2");
    }

    #[test]
    fn test_scrub_message_hides_addresses() {
        let msg = "insufficient funds for 0x742d35cc6634c0532925a3b844bc9e7595f0bfd2 at block 19";
        let scrubbed = scrub_message(msg);
        assert!(!scrubbed.contains("742d35cc"));
        assert!(scrubbed.contains("0x****"));
    }

    #[test]
    fn test_scrub_message_hides_base58() {
        let msg = "account 9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin not found";
        let scrubbed = scrub_message(msg);
        assert!(!scrubbed.contains("9xQeWvG"));
    }

    #[test]
    fn test_short_values_fully_masked() {
        assert_eq!(redact_address("0x1234"), "******");
    }
}
