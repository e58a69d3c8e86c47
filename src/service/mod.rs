//! 引擎服务层
//!
//! `WalletEngine` 是唯一对外门面：钱包创建/导入、账户 actor 的
//! 启动、发送管线（prepare → 风控 + 模拟 → confirm）的编排都在这里。
//! 同一 (账户, 链) 同时只允许一笔在途发送，广播后保持锁定一个
//! 传播窗口，躲开节点 nonce/UTXO 视图的滞后。

pub mod account;
pub mod contacts;
pub mod simulator;

use std::{collections::HashSet, sync::Arc, time::Duration};

use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::EngineConfig;
use crate::domain::account::{DerivedAddress, WalletAccount};
use crate::domain::chain::Chain;
use crate::domain::derivation::DerivationService;
use crate::domain::transaction::{SimulationResult, UnsignedTransaction};
use crate::error::{WalletError, WalletResult};
use crate::gateway::GatewayRouter;
use crate::infrastructure::log_redact::scrub_message;
use crate::risk::{RiskContext, RiskEngine, RiskReport};
use crate::service::account::{AccountActor, AccountHandle};
use crate::service::contacts::ContactBook;
use crate::service::simulator::Simulator;
use crate::signer::{TransactionSigner, TransferRequest};
use crate::vault::{Authenticator, KeyHandle, KeyVault, SecureStore};

/// prepare 的产物：交易 + 模拟结论 + 风控结论，一起交给 UI 确认
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub tx: UnsignedTransaction,
    pub simulation: SimulationResult,
    pub risk: RiskReport,
}

pub struct WalletEngine<S: SecureStore, A: Authenticator> {
    config: EngineConfig,
    router: Arc<GatewayRouter>,
    vault: Arc<KeyVault<S, A>>,
    derivation: DerivationService,
    signer: TransactionSigner<S, A>,
    risk: RiskEngine,
    simulator: Simulator,
    contacts: ContactBook,
    /// "{account_id}:{chain}" 的在途发送集合
    in_flight: Arc<tokio::sync::Mutex<HashSet<String>>>,
}

impl<S: SecureStore, A: Authenticator> WalletEngine<S, A> {
    pub fn new(
        config: EngineConfig,
        router: Arc<GatewayRouter>,
        vault: Arc<KeyVault<S, A>>,
        contacts: ContactBook,
    ) -> Self {
        let signer = TransactionSigner::new(
            Arc::clone(&router),
            Arc::clone(&vault),
            config.rpc.ethereum_chain_id,
        );
        let simulator = Simulator::new(config.engine.simulation_ttl_secs);
        Self {
            config,
            router,
            vault,
            derivation: DerivationService::new(),
            signer,
            risk: RiskEngine::with_default_rules(),
            simulator,
            contacts,
            in_flight: Arc::new(tokio::sync::Mutex::new(HashSet::new())),
        }
    }

    pub fn contacts(&self) -> &ContactBook {
        &self.contacts
    }

    /// 生成新助记词并建立账户；助记词只返回这一次，引擎不留存
    pub async fn create_wallet(
        &self,
        display_name: &str,
        word_count: u8,
    ) -> WalletResult<(WalletAccount, Zeroizing<String>)> {
        let phrase = self.derivation.generate_seed_phrase(word_count)?;
        let account = self.import_wallet(&phrase, display_name).await?;
        Ok((account, phrase))
    }

    /// 从已有助记词导入账户：全链派生 + 密钥入库
    ///
    /// 同一助记词重复导入得到同一账户（地址和 key id 都确定）。
    pub async fn import_wallet(
        &self,
        mnemonic: &str,
        display_name: &str,
    ) -> WalletResult<WalletAccount> {
        let wallets = self.derivation.derive_all_chains(mnemonic)?;

        let addresses: Vec<DerivedAddress> = Chain::ALL
            .iter()
            .zip(wallets.iter())
            .map(|(&chain, wallet)| DerivedAddress {
                chain,
                address: wallet.address.clone(),
                derivation_path: wallet.derivation_path.clone(),
                public_key: wallet.public_key.clone(),
            })
            .collect();
        let account = WalletAccount::new(display_name, addresses);

        for (&chain, wallet) in Chain::ALL.iter().zip(wallets.iter()) {
            let handle = KeyHandle::new(account.key_id_for(chain));
            self.vault.store(&handle, &wallet.material).await?;
        }

        info!(account = %account.id, "Wallet imported");
        Ok(account)
    }

    /// 删除账户的全部密钥（不可逆）
    pub async fn delete_wallet(&self, account: &WalletAccount) -> WalletResult<()> {
        for &chain in Chain::ALL.iter() {
            let handle = KeyHandle::new(account.key_id_for(chain));
            self.vault.delete(&handle).await?;
        }
        warn!(account = %account.id, "Wallet keys deleted");
        Ok(())
    }

    /// 为账户启动状态机 actor，并在后台预热一次余额
    pub fn open_account(&self, account: WalletAccount) -> AccountHandle {
        let handle = AccountActor::spawn(
            account,
            Arc::clone(&self.router),
            self.config.engine.clone(),
        );
        let warm = handle.clone();
        tokio::spawn(async move {
            let _ = warm.refresh().await;
        });
        handle
    }

    /// 发送第一步：构建交易并给出模拟 + 风控结论
    pub async fn prepare_send(
        &self,
        account: &WalletAccount,
        handle: &AccountHandle,
        request: TransferRequest,
    ) -> WalletResult<PendingSend> {
        let derived = account
            .address_for(request.chain)
            .ok_or_else(|| WalletError::UnsupportedChain(request.chain.to_string()))?;
        if derived.address != request.from {
            return Err(WalletError::TransactionFailed(
                "sender address does not belong to this account".into(),
            ));
        }

        let tx = self.signer.prepare(&request).await?;

        let gateway = self.router.get(request.chain)?;
        let spendable = gateway.fetch_balance(&request.from).await?.native_units;

        // 可信集 = 联系人 + 历史成功转出过的收款方
        let mut known = self.contacts.known_addresses(request.chain)?;
        for entry in handle.history() {
            if entry.chain == request.chain && !entry.incoming {
                known.push(entry.to.clone());
            }
        }
        let risk = self.risk.evaluate(&RiskContext {
            tx: &tx,
            spendable_native: spendable,
            known_addresses: &known,
        });

        let simulation = self.simulator.simulate(&tx, spendable)?;

        Ok(PendingSend {
            tx,
            simulation,
            risk,
        })
    }

    /// 发送第二步：签名并广播
    ///
    /// 所有闸门（模拟时效、风控）在 signer 里按序判定；这里只负责
    /// 在途锁：同一 (账户, 链) 的上一笔发送未过传播窗口前拒绝新发送。
    pub async fn confirm_send(
        &self,
        account: &WalletAccount,
        handle: &AccountHandle,
        pending: &PendingSend,
        override_critical: bool,
    ) -> WalletResult<String> {
        let lock_key = format!("{}:{}", account.id, pending.tx.chain);
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(lock_key.clone()) {
                return Err(WalletError::TransactionFailed(
                    "a send on this chain is already in flight".into(),
                ));
            }
        }

        let key_handle = KeyHandle::new(account.key_id_for(pending.tx.chain));
        let outcome = async {
            let signed = self
                .signer
                .sign(
                    &pending.tx,
                    &key_handle,
                    &pending.simulation,
                    &pending.risk,
                    override_critical,
                )
                .await?;
            self.signer.broadcast(&signed).await
        }
        .await;

        match outcome {
            Ok(tx_hash) => {
                // 广播成功后保持锁定一个传播窗口；窗口结束解锁并刷新余额
                let in_flight = Arc::clone(&self.in_flight);
                let delay = Duration::from_millis(self.config.engine.propagation_delay_ms);
                let refresher = handle.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    in_flight.lock().await.remove(&lock_key);
                    if let Err(e) = refresher.refresh().await {
                        warn!(
                            error = %scrub_message(&e.to_string()),
                            "Post-broadcast refresh failed"
                        );
                    }
                });
                info!(tx_hash = %tx_hash, "Send confirmed and broadcast");
                Ok(tx_hash)
            }
            Err(e) => {
                // 失败立即解锁并把失败反映到账户状态
                self.in_flight.lock().await.remove(&lock_key);
                handle.report_error(e.user_message()).await;
                Err(e)
            }
        }
    }
}
