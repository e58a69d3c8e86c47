//! 联系人簿
//!
//! 风控的可信地址来源之一。JSON 落盘，文件不存在视为首次运行。

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::RwLock,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::chain::Chain;
use crate::error::{WalletError, WalletResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub chain: Chain,
    pub address: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Default)]
struct ContactFile {
    contacts: Vec<Contact>,
}

pub struct ContactBook {
    /// (chain, address) -> contact
    entries: RwLock<HashMap<(Chain, String), Contact>>,
    path: Option<PathBuf>,
}

impl ContactBook {
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> WalletResult<Self> {
        let path = path.into();
        let file: ContactFile = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| WalletError::Internal(format!("corrupt contact file: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ContactFile::default(),
            Err(e) => return Err(WalletError::Internal(format!("contact file read: {}", e))),
        };

        let entries = file
            .contacts
            .into_iter()
            .map(|c| ((c.chain, c.address.clone()), c))
            .collect();
        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
        })
    }

    pub fn add(&self, name: &str, chain: Chain, address: &str) -> WalletResult<()> {
        if !chain.config().validate_address(address) {
            return Err(WalletError::InvalidAddress(format!(
                "not a valid {} address",
                chain.config().name
            )));
        }
        {
            let mut entries = self
                .entries
                .write()
                .map_err(|_| WalletError::Internal("contact lock poisoned".into()))?;
            entries.insert(
                (chain, address.to_string()),
                Contact {
                    name: name.to_string(),
                    chain,
                    address: address.to_string(),
                    created_at: Utc::now(),
                },
            );
        }
        self.persist()
    }

    pub fn remove(&self, chain: Chain, address: &str) -> WalletResult<()> {
        {
            let mut entries = self
                .entries
                .write()
                .map_err(|_| WalletError::Internal("contact lock poisoned".into()))?;
            entries.remove(&(chain, address.to_string()));
        }
        self.persist()
    }

    pub fn list(&self) -> WalletResult<Vec<Contact>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| WalletError::Internal("contact lock poisoned".into()))?;
        let mut contacts: Vec<_> = entries.values().cloned().collect();
        contacts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(contacts)
    }

    /// 某条链上的全部可信地址（风控输入）
    pub fn known_addresses(&self, chain: Chain) -> WalletResult<Vec<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| WalletError::Internal("contact lock poisoned".into()))?;
        Ok(entries
            .keys()
            .filter(|(c, _)| *c == chain)
            .map(|(_, address)| address.clone())
            .collect())
    }

    fn persist(&self) -> WalletResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = ContactFile {
            contacts: self.list()?,
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| WalletError::Internal(format!("contact serialize: {}", e)))?;
        std::fs::write(path, json)
            .map_err(|e| WalletError::Internal(format!("contact file write: {}", e)))?;
        Ok(())
    }
}
