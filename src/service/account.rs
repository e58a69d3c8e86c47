//! 账户状态机（actor）
//!
//! 每个打开的账户一个 actor task，独占状态，外界只通过消息交互。
//! 余额状态经 watch 通道对外广播；刷新请求在邮箱里合并，任意数量
//! 并发请求只触发一次链上扇出。历史拉取慢，放到独立 task，
//! 不阻塞余额刷新。

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::EngineTuning;
use crate::domain::account::WalletAccount;
use crate::domain::chain::Chain;
use crate::error::{WalletError, WalletResult};
use crate::gateway::{Balance, GatewayRouter, TransactionSummary};
use crate::infrastructure::log_redact::scrub_message;

/// 账户的对外可观测状态
#[derive(Debug, Clone)]
pub enum AccountState {
    /// 尚未发起过刷新
    Idle,
    /// 刷新进行中（保留上一次的余额快照）
    Loading {
        previous: Option<HashMap<Chain, Balance>>,
    },
    /// 至少一条链刷新成功；失败的链不在 map 里
    Loaded {
        balances: HashMap<Chain, Balance>,
        refreshed_at: DateTime<Utc>,
    },
    /// 所有链都失败
    Error { message: String },
}

impl AccountState {
    pub fn balances(&self) -> Option<&HashMap<Chain, Balance>> {
        match self {
            AccountState::Loaded { balances, .. } => Some(balances),
            AccountState::Loading {
                previous: Some(balances),
            } => Some(balances),
            _ => None,
        }
    }
}

enum Command {
    Refresh {
        reply: oneshot::Sender<WalletResult<()>>,
    },
    Fail {
        message: String,
    },
    Lock,
    Shutdown,
}

/// 邮箱排空时收集到的非刷新指令，在扇出结束后按序落地
#[derive(Default)]
struct DrainedSignals {
    fail: Option<String>,
    lock: bool,
    shutdown: bool,
}

/// actor 的外部句柄；clone 后可分发给多个调用方
#[derive(Clone)]
pub struct AccountHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<AccountState>,
    history: watch::Receiver<Vec<TransactionSummary>>,
}

impl AccountHandle {
    /// 触发一次刷新并等待完成
    ///
    /// 刷新进行期间的并发调用会被合并到同一次扇出。
    pub async fn refresh(&self) -> WalletResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Refresh { reply: tx })
            .await
            .map_err(|_| WalletError::Internal("account actor stopped".into()))?;
        rx.await
            .map_err(|_| WalletError::Internal("account actor dropped reply".into()))?
    }

    /// 当前状态快照
    pub fn state(&self) -> AccountState {
        self.state.borrow().clone()
    }

    /// 状态变更订阅
    pub fn subscribe(&self) -> watch::Receiver<AccountState> {
        self.state.clone()
    }

    /// 最近一次拉取到的历史（后台更新）
    pub fn history(&self) -> Vec<TransactionSummary> {
        self.history.borrow().clone()
    }

    pub fn subscribe_history(&self) -> watch::Receiver<Vec<TransactionSummary>> {
        self.history.clone()
    }

    /// 把发送管线的失败反映到账户状态（UI 经 watch 可见）
    ///
    /// `message` 必须是 `WalletError::user_message()` 级别的封闭文案。
    pub async fn report_error(&self, message: impl Into<String>) {
        let _ = self
            .commands
            .send(Command::Fail {
                message: message.into(),
            })
            .await;
    }

    /// 锁定会话：状态回到 `Idle`，清空缓存的余额快照与历史
    pub async fn lock(&self) {
        let _ = self.commands.send(Command::Lock).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

pub struct AccountActor {
    account: WalletAccount,
    router: Arc<GatewayRouter>,
    tuning: EngineTuning,
    state_tx: watch::Sender<AccountState>,
    history_tx: Arc<watch::Sender<Vec<TransactionSummary>>>,
    commands: mpsc::Receiver<Command>,
}

impl AccountActor {
    /// 启动 actor，返回句柄
    pub fn spawn(
        account: WalletAccount,
        router: Arc<GatewayRouter>,
        tuning: EngineTuning,
    ) -> AccountHandle {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(AccountState::Idle);
        let (history_tx, history_rx) = watch::channel(Vec::new());

        let actor = AccountActor {
            account,
            router,
            tuning,
            state_tx,
            history_tx: Arc::new(history_tx),
            commands: command_rx,
        };
        tokio::spawn(actor.run());

        AccountHandle {
            commands: command_tx,
            state: state_rx,
            history: history_rx,
        }
    }

    async fn run(mut self) {
        info!(account = %self.account.id, "Account actor started");
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Refresh { reply } => {
                    // 合并邮箱里已排队的刷新请求
                    let mut replies = vec![reply];
                    let mut signals = DrainedSignals::default();
                    self.drain_mailbox(&mut replies, &mut signals);

                    let result = self.refresh_once().await;

                    // 扇出期间新到的刷新请求也挂到同一结果上
                    self.drain_mailbox(&mut replies, &mut signals);
                    debug!(
                        account = %self.account.id,
                        coalesced = replies.len(),
                        "Refresh fan-out complete"
                    );
                    for reply in replies {
                        let _ = reply.send(result.clone());
                    }
                    if let Some(message) = signals.fail {
                        self.fail_session(message);
                    }
                    if signals.lock {
                        self.lock_session();
                    }
                    if signals.shutdown {
                        break;
                    }
                }
                Command::Fail { message } => self.fail_session(message),
                Command::Lock => self.lock_session(),
                Command::Shutdown => break,
            }
        }
        info!(account = %self.account.id, "Account actor stopped");
    }

    /// 一次全链余额扇出
    ///
    /// 每条链独立超时；部分失败只在结果里缺席，不拖垮整体。
    async fn refresh_once(&mut self) -> WalletResult<()> {
        let previous = self.state_tx.borrow().balances().cloned();
        self.state_tx
            .send_replace(AccountState::Loading { previous });

        let per_chain = Duration::from_secs(self.tuning.per_chain_refresh_timeout_secs);
        let fetches = self.account.addresses.iter().map(|derived| {
            let router = Arc::clone(&self.router);
            let chain = derived.chain;
            let address = derived.address.clone();
            async move {
                let gateway = router.get(chain)?;
                match tokio::time::timeout(per_chain, gateway.fetch_balance(&address)).await {
                    Ok(result) => result.map(|b| (chain, b)),
                    Err(_) => Err(WalletError::Timeout(per_chain.as_millis() as u64)),
                }
            }
        });

        let mut balances = HashMap::new();
        let mut failures = Vec::new();
        for outcome in join_all(fetches).await {
            match outcome {
                Ok((chain, balance)) => {
                    balances.insert(chain, balance);
                }
                Err(e) => {
                    warn!(
                        account = %self.account.id,
                        error = %scrub_message(&e.to_string()),
                        "Chain refresh failed"
                    );
                    failures.push(e);
                }
            }
        }

        if balances.is_empty() {
            let cause = failures
                .into_iter()
                .next()
                .unwrap_or_else(|| WalletError::Network("no chains registered".into()));
            // watch 通道 UI 可见，只放封闭文案，原始错误进日志
            self.state_tx.send_replace(AccountState::Error {
                message: cause.user_message().to_string(),
            });
            return Err(cause);
        }

        self.state_tx.send_replace(AccountState::Loaded {
            balances,
            refreshed_at: Utc::now(),
        });

        self.spawn_history_fetch();
        Ok(())
    }

    fn drain_mailbox(
        &mut self,
        replies: &mut Vec<oneshot::Sender<WalletResult<()>>>,
        signals: &mut DrainedSignals,
    ) {
        while let Ok(next) = self.commands.try_recv() {
            match next {
                Command::Refresh { reply } => replies.push(reply),
                Command::Fail { message } => signals.fail = Some(message),
                Command::Lock => signals.lock = true,
                Command::Shutdown => {
                    signals.shutdown = true;
                    break;
                }
            }
        }
    }

    fn fail_session(&self, message: String) {
        self.state_tx.send_replace(AccountState::Error { message });
    }

    fn lock_session(&self) {
        info!(account = %self.account.id, "Account session locked");
        self.state_tx.send_replace(AccountState::Idle);
        self.history_tx.send_replace(Vec::new());
    }

    /// 历史拉取放后台，不占用刷新路径
    fn spawn_history_fetch(&self) {
        let router = Arc::clone(&self.router);
        let addresses: Vec<_> = self
            .account
            .addresses
            .iter()
            .map(|d| (d.chain, d.address.clone()))
            .collect();
        let limit = self.tuning.history_limit;
        let history_tx = Arc::clone(&self.history_tx);
        let account_id = self.account.id.clone();

        tokio::spawn(async move {
            let mut merged: Vec<TransactionSummary> = Vec::new();
            for (chain, address) in addresses {
                let Ok(gateway) = router.get(chain) else {
                    continue;
                };
                match gateway.fetch_history(&address, limit).await {
                    Ok(mut summaries) => merged.append(&mut summaries),
                    Err(e) => {
                        debug!(account = %account_id, %chain, error = %e, "History fetch failed")
                    }
                }
            }
            // 时间倒序；缺时间戳的（pending）排最后
            merged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            history_tx.send_replace(merged);
        });
    }
}
