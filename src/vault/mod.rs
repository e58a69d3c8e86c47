//! Key Vault
//!
//! 私钥材料的唯一持有者。所有 store/retrieve 都必须先通过平台认证门；
//! 取回的密钥只能在产生一次签名所需的最小作用域内存活。

pub mod keystore;
pub mod secret_sharing;

use async_trait::async_trait;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{WalletError, WalletResult};

/// 私钥材料（32 字节，Drop 时清零）
///
/// 不实现 Serialize/Deserialize，Debug 输出不含内容。
pub struct KeyMaterial(Zeroizing<[u8; 32]>);

impl KeyMaterial {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Clone for KeyMaterial {
    fn clone(&self) -> Self {
        Self(Zeroizing::new(*self.0))
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

/// Key Vault 发出的不透明密钥引用
///
/// 每个 (账户, 链) 恰好一个。持有 handle 不等于持有密钥：
/// 真正的材料只在 `retrieve` 的返回值里短暂存在。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyHandle {
    id: String,
}

impl KeyHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// 平台认证门（生物识别或等价机制）
///
/// 依赖注入而非全局单例；每次 store/retrieve 都要重新通过。
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// 认证通过返回 Ok(())；拒绝/取消返回 AuthRequired
    async fn authenticate(&self, reason: &str) -> WalletResult<()>;
}

/// 硬件安全存储边界（平台 keychain 的抽象）
///
/// 约定："duplicate key" 与 "not found" 都是普通结果而非致命错误，
/// 上层用 delete-then-add 实现覆盖写。
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn add(&self, id: &str, value: &[u8]) -> WalletResult<()>;
    async fn query(&self, id: &str) -> WalletResult<Option<Vec<u8>>>;
    async fn remove(&self, id: &str) -> WalletResult<()>;
    async fn remove_all(&self) -> WalletResult<()>;
    async fn list_ids(&self) -> WalletResult<Vec<String>>;
}

/// Key Vault 本体
pub struct KeyVault<S: SecureStore, A: Authenticator> {
    store: S,
    authenticator: A,
}

impl<S: SecureStore, A: Authenticator> KeyVault<S, A> {
    pub fn new(store: S, authenticator: A) -> Self {
        Self {
            store,
            authenticator,
        }
    }

    /// 存入密钥材料；同 id 重复存入是原子覆盖，不产生副本
    pub async fn store(&self, handle: &KeyHandle, material: &KeyMaterial) -> WalletResult<()> {
        self.authenticator
            .authenticate("Store signing key")
            .await?;

        // 覆盖语义：先删后加；"not found" 按约定不是错误
        self.store.remove(handle.id()).await.ok();
        self.store.add(handle.id(), material.as_bytes()).await?;

        tracing::info!(
            key_id = %crate::infrastructure::log_redact::redact_key_id(handle.id()),
            "Key material stored"
        );
        Ok(())
    }

    /// 取回密钥材料
    ///
    /// 错误形态统一：无论是 id 不存在还是底层解密失败，一律返回
    /// `KeyNotFound`，避免给探测者区分信息；id 比较使用常数时间。
    pub async fn retrieve(&self, handle: &KeyHandle) -> WalletResult<KeyMaterial> {
        self.authenticator
            .authenticate("Access signing key")
            .await?;

        let ids = self.store.list_ids().await?;
        let exists = ids
            .iter()
            .fold(subtle::Choice::from(0u8), |acc, candidate| {
                acc | constant_time_id_eq(candidate, handle.id())
            });

        if exists.unwrap_u8() == 0 {
            return Err(WalletError::KeyNotFound);
        }

        let raw = self
            .store
            .query(handle.id())
            .await
            .map_err(|_| WalletError::KeyNotFound)?
            .ok_or(WalletError::KeyNotFound)?;

        let mut bytes = [0u8; 32];
        if raw.len() != 32 {
            return Err(WalletError::KeyNotFound);
        }
        bytes.copy_from_slice(&raw);
        Ok(KeyMaterial::from_bytes(bytes))
    }

    pub async fn delete(&self, handle: &KeyHandle) -> WalletResult<()> {
        self.authenticator
            .authenticate("Delete signing key")
            .await?;
        self.store.remove(handle.id()).await
    }

    /// 清空整个 vault（钱包删除/重置）
    pub async fn delete_all(&self) -> WalletResult<()> {
        self.authenticator
            .authenticate("Delete all signing keys")
            .await?;
        self.store.remove_all().await
    }
}

/// 常数时间字符串比较（先比长度哈希掉早退路径）
fn constant_time_id_eq(a: &str, b: &str) -> subtle::Choice {
    if a.len() != b.len() {
        // 长度不同必然不等；长度本身不是秘密
        return subtle::Choice::from(0u8);
    }
    a.as_bytes().ct_eq(b.as_bytes())
}

/// 总是放行的认证器（测试和开发工具用）
pub struct NoopAuthenticator;

#[async_trait]
impl Authenticator for NoopAuthenticator {
    async fn authenticate(&self, _reason: &str) -> WalletResult<()> {
        Ok(())
    }
}

/// 总是拒绝的认证器（测试认证失败路径）
pub struct DenyAuthenticator;

#[async_trait]
impl Authenticator for DenyAuthenticator {
    async fn authenticate(&self, _reason: &str) -> WalletResult<()> {
        Err(WalletError::AuthRequired)
    }
}
