//! 软件加密 keystore（SecureStore 的文件/内存实现）
//!
//! 平台 keychain 不可用时的后备实现：PBKDF2 从口令拉伸出 AES-256 密钥，
//! 每个条目独立 nonce 的 AES-256-GCM 加密后落盘。

use std::{collections::HashMap, path::PathBuf};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use crate::error::{WalletError, WalletResult};
use crate::vault::SecureStore;

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LENGTH: usize = 16;
const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;

/// 落盘格式
#[derive(Serialize, Deserialize, Default)]
struct KeystoreFile {
    salt_hex: String,
    /// id -> hex(nonce || ciphertext)
    entries: HashMap<String, String>,
}

/// 加密 keystore
pub struct EncryptedKeystore {
    /// 派生出的 AES 密钥（Drop 清零）
    key: Zeroizing<[u8; KEY_LENGTH]>,
    salt: Vec<u8>,
    entries: RwLock<HashMap<String, Vec<u8>>>,
    /// None = 纯内存（测试）
    path: Option<PathBuf>,
}

impl EncryptedKeystore {
    /// 纯内存实例（测试用）
    pub fn in_memory(passphrase: &str) -> WalletResult<Self> {
        let mut salt = vec![0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = derive_key(passphrase, &salt);
        Ok(Self {
            key,
            salt,
            entries: RwLock::new(HashMap::new()),
            path: None,
        })
    }

    /// 打开或创建文件支撑的 keystore；文件不存在不是错误（首次运行）
    pub fn open(path: impl Into<PathBuf>, passphrase: &str) -> WalletResult<Self> {
        let path = path.into();

        let file: KeystoreFile = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| WalletError::Internal(format!("corrupt keystore file: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => KeystoreFile::default(),
            Err(e) => return Err(WalletError::Internal(format!("keystore read: {}", e))),
        };

        let salt = if file.salt_hex.is_empty() {
            let mut salt = vec![0u8; SALT_LENGTH];
            rand::thread_rng().fill_bytes(&mut salt);
            salt
        } else {
            hex::decode(&file.salt_hex)
                .map_err(|e| WalletError::Internal(format!("corrupt keystore salt: {}", e)))?
        };

        let key = derive_key(passphrase, &salt);

        let mut entries = HashMap::new();
        for (id, blob_hex) in file.entries {
            let blob = hex::decode(&blob_hex)
                .map_err(|e| WalletError::Internal(format!("corrupt keystore entry: {}", e)))?;
            entries.insert(id, blob);
        }

        Ok(Self {
            key,
            salt,
            entries: RwLock::new(entries),
            path: Some(path),
        })
    }

    fn encrypt(&self, plaintext: &[u8]) -> WalletResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(self.key.as_ref())
            .map_err(|e| WalletError::Internal(format!("cipher init: {}", e)))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| WalletError::Internal(format!("encryption failed: {}", e)))?;

        // nonce (12字节) || ciphertext
        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt(&self, blob: &[u8]) -> WalletResult<Vec<u8>> {
        if blob.len() < NONCE_LENGTH {
            return Err(WalletError::KeyNotFound);
        }
        let cipher = Aes256Gcm::new_from_slice(self.key.as_ref())
            .map_err(|e| WalletError::Internal(format!("cipher init: {}", e)))?;
        let nonce = Nonce::from_slice(&blob[..NONCE_LENGTH]);
        cipher
            .decrypt(nonce, &blob[NONCE_LENGTH..])
            // 解密失败与 "不存在" 统一呈现
            .map_err(|_| WalletError::KeyNotFound)
    }

    /// 持久化当前内容（内存实例为 no-op）
    async fn persist(&self) -> WalletResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let entries = self.entries.read().await;
        let file = KeystoreFile {
            salt_hex: hex::encode(&self.salt),
            entries: entries
                .iter()
                .map(|(id, blob)| (id.clone(), hex::encode(blob)))
                .collect(),
        };
        drop(entries);

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| WalletError::Internal(format!("keystore serialize: {}", e)))?;
        std::fs::write(path, json)
            .map_err(|e| WalletError::Internal(format!("keystore write: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl SecureStore for EncryptedKeystore {
    async fn add(&self, id: &str, value: &[u8]) -> WalletResult<()> {
        let blob = self.encrypt(value)?;
        {
            let mut entries = self.entries.write().await;
            // 覆盖而非报 duplicate：上层的 delete-then-add 已经保证了语义
            entries.insert(id.to_string(), blob);
        }
        self.persist().await
    }

    async fn query(&self, id: &str) -> WalletResult<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        match entries.get(id) {
            Some(blob) => Ok(Some(self.decrypt(blob)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, id: &str) -> WalletResult<()> {
        {
            let mut entries = self.entries.write().await;
            // "not found" 是普通结果
            entries.remove(id);
        }
        self.persist().await
    }

    async fn remove_all(&self) -> WalletResult<()> {
        {
            let mut entries = self.entries.write().await;
            entries.clear();
        }
        self.persist().await
    }

    async fn list_ids(&self) -> WalletResult<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries.keys().cloned().collect())
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Zeroizing<[u8; KEY_LENGTH]> {
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, key.as_mut());
    key
}
