//! k-of-n 门限秘密分享（Shamir）
//!
//! 用于助记词/种子的分片备份：任意 k 份可恢复，k-1 份不泄露任何信息。
//! 在 GF(2^8) 上逐字节做多项式插值，x=0 处取回秘密。

use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{WalletError, WalletResult};

/// 单个分片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    /// 多项式求值点 x（1..=n，0 保留给秘密本身）
    pub index: u8,
    pub data: Vec<u8>,
}

/// 把秘密拆成 n 份、任意 k 份可恢复
pub fn split(secret: &[u8], k: u8, n: u8) -> WalletResult<Vec<Share>> {
    if k < 2 || n < k {
        return Err(WalletError::Internal(format!(
            "invalid threshold parameters: k={} n={}",
            k, n
        )));
    }
    if secret.is_empty() {
        return Err(WalletError::Internal("empty secret".into()));
    }

    let mut rng = rand::thread_rng();
    let mut shares: Vec<Share> = (1..=n)
        .map(|index| Share {
            index,
            data: Vec::with_capacity(secret.len()),
        })
        .collect();

    // 每个字节独立选一条 k-1 次多项式，a0 = 秘密字节
    let mut coeffs = Zeroizing::new(vec![0u8; k as usize]);
    for &byte in secret {
        coeffs[0] = byte;
        rng.fill_bytes(&mut coeffs[1..]);
        // 最高次系数为 0 会退化成更低门限
        while coeffs[k as usize - 1] == 0 {
            let mut top = [0u8; 1];
            rng.fill_bytes(&mut top);
            coeffs[k as usize - 1] = top[0];
        }

        for share in shares.iter_mut() {
            share.data.push(poly_eval(&coeffs, share.index));
        }
    }

    Ok(shares)
}

/// 由至少 k 份分片恢复秘密
///
/// 分片数量不足或 x 重复时失败；分片被篡改无法检测（调用方
/// 应对恢复结果做助记词校验和验证）。
pub fn combine(shares: &[Share]) -> WalletResult<Zeroizing<Vec<u8>>> {
    if shares.len() < 2 {
        return Err(WalletError::Internal(
            "need at least two shares to combine".into(),
        ));
    }

    let len = shares[0].data.len();
    if shares.iter().any(|s| s.data.len() != len) {
        return Err(WalletError::Internal("share length mismatch".into()));
    }

    let mut seen = [false; 256];
    for share in shares {
        if share.index == 0 || seen[share.index as usize] {
            return Err(WalletError::Internal("duplicate or zero share index".into()));
        }
        seen[share.index as usize] = true;
    }

    let mut secret = Zeroizing::new(vec![0u8; len]);
    for byte_idx in 0..len {
        let points: Vec<(u8, u8)> = shares
            .iter()
            .map(|s| (s.index, s.data[byte_idx]))
            .collect();
        secret[byte_idx] = lagrange_at_zero(&points);
    }

    Ok(secret)
}

/// 多项式求值：Horner 法
fn poly_eval(coeffs: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for &c in coeffs.iter().rev() {
        acc = gf_mul(acc, x) ^ c;
    }
    acc
}

/// 在 x=0 处做 Lagrange 插值
fn lagrange_at_zero(points: &[(u8, u8)]) -> u8 {
    let mut acc = 0u8;
    for (i, &(xi, yi)) in points.iter().enumerate() {
        let mut num = 1u8;
        let mut den = 1u8;
        for (j, &(xj, _)) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            num = gf_mul(num, xj);
            den = gf_mul(den, xi ^ xj);
        }
        acc ^= gf_mul(yi, gf_mul(num, gf_inv(den)));
    }
    acc
}

/// GF(2^8) 乘法，约减多项式 x^8 + x^4 + x^3 + x + 1 (AES 域)
fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut result = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            result ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    result
}

/// 乘法逆元：a^254 (费马小定理)
fn gf_inv(a: u8) -> u8 {
    debug_assert!(a != 0, "zero has no inverse in GF(256)");
    let mut result = 1u8;
    let mut base = a;
    let mut exp = 254u8;
    while exp != 0 {
        if exp & 1 != 0 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    result
}
