//! 引擎端到端测试：mock 网关驱动账户状态机与发送管线

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;

use vaultcore::config::EngineConfig;
use vaultcore::domain::chain::Chain;
use vaultcore::domain::transaction::{
    Amount, FeeMode, FeeParams, FeePrice, SignedTransaction,
};
use vaultcore::error::{WalletError, WalletResult};
use vaultcore::gateway::{
    Balance, ChainGateway, FeeRequest, GatewayRouter, TransactionSummary,
};
use vaultcore::service::account::{AccountActor, AccountHandle, AccountState};
use vaultcore::service::contacts::ContactBook;
use vaultcore::service::WalletEngine;
use vaultcore::signer::TransferRequest;
use vaultcore::vault::{keystore::EncryptedKeystore, KeyVault, NoopAuthenticator};

const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

struct MockGateway {
    chain: Chain,
    balance_native: u128,
    fail_balance: bool,
    fail_broadcast: bool,
    delay_ms: u64,
    history: Vec<TransactionSummary>,
    balance_calls: AtomicUsize,
    broadcasts: AtomicUsize,
}

impl MockGateway {
    fn new(chain: Chain, balance_native: u128) -> Self {
        Self {
            chain,
            balance_native,
            fail_balance: false,
            fail_broadcast: false,
            delay_ms: 0,
            history: Vec::new(),
            balance_calls: AtomicUsize::new(0),
            broadcasts: AtomicUsize::new(0),
        }
    }

    fn failing(chain: Chain) -> Self {
        Self {
            fail_balance: true,
            ..Self::new(chain, 0)
        }
    }

    fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    fn with_broadcast_error(mut self) -> Self {
        self.fail_broadcast = true;
        self
    }

    fn with_history(mut self, history: Vec<TransactionSummary>) -> Self {
        self.history = history;
        self
    }
}

#[async_trait]
impl ChainGateway for MockGateway {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn fetch_balance(&self, _address: &str) -> WalletResult<Balance> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail_balance {
            return Err(WalletError::Network("node unreachable".into()));
        }
        Ok(Balance::from_native(self.chain, self.balance_native))
    }

    async fn fetch_history(
        &self,
        _address: &str,
        _limit: usize,
    ) -> WalletResult<Vec<TransactionSummary>> {
        Ok(self.history.clone())
    }

    async fn fetch_nonce(&self, _address: &str) -> WalletResult<u64> {
        Ok(7)
    }

    async fn estimate_fee(
        &self,
        _request: &FeeRequest,
        _mode: &FeeMode,
    ) -> WalletResult<FeeParams> {
        Ok(FeeParams {
            limit: 21000,
            price: FeePrice::Eip1559 {
                max_fee_per_gas: 2_000_000_000,
                max_priority_fee_per_gas: 1_000_000_000,
            },
        })
    }

    async fn broadcast(&self, _tx: &SignedTransaction) -> WalletResult<String> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        if self.fail_broadcast {
            return Err(WalletError::Rpc("nonce too low".into()));
        }
        Ok("0xbroadcast00".to_string())
    }
}

fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    // 测试不等真实传播窗口
    config.engine.propagation_delay_ms = 100;
    config.engine.per_chain_refresh_timeout_secs = 2;
    config
}

fn engine_with(
    config: EngineConfig,
    gateways: Vec<Arc<dyn ChainGateway>>,
) -> WalletEngine<EncryptedKeystore, NoopAuthenticator> {
    let mut router = GatewayRouter::new();
    for gateway in gateways {
        router.register(gateway);
    }
    let vault = Arc::new(KeyVault::new(
        EncryptedKeystore::in_memory("test").unwrap(),
        NoopAuthenticator,
    ));
    WalletEngine::new(config, Arc::new(router), vault, ContactBook::in_memory())
}

fn eth_request(from: &str, to: &str, value: &str) -> TransferRequest {
    TransferRequest {
        chain: Chain::Ethereum,
        from: from.to_string(),
        to: to.to_string(),
        value: Amount::parse(value).unwrap(),
        payload: vec![],
        fee_mode: FeeMode::UseDefault,
    }
}

/// 轮询账户状态直到满足条件（上限 2s）
async fn wait_for<F>(handle: &AccountHandle, pred: F) -> bool
where
    F: Fn(&AccountState) -> bool,
{
    for _ in 0..40 {
        if pred(&handle.state()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 账户状态机
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn partial_chain_failure_still_loads() {
    let config = test_config();
    let eth = Arc::new(MockGateway::new(Chain::Ethereum, 10u128.pow(18)));
    let sol = Arc::new(MockGateway::failing(Chain::Solana));
    let engine = engine_with(config, vec![eth as Arc<dyn ChainGateway>, sol]);

    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();
    let handle = engine.open_account(account);

    handle.refresh().await.unwrap();

    match handle.state() {
        AccountState::Loaded { balances, .. } => {
            // 失败的链缺席，不拖垮整体
            assert!(balances.contains_key(&Chain::Ethereum));
            assert!(!balances.contains_key(&Chain::Solana));
        }
        other => panic!("expected Loaded, got {:?}", other),
    }
    handle.shutdown().await;
}

#[tokio::test]
async fn all_chains_failing_yields_error_state() {
    let config = test_config();
    let eth = Arc::new(MockGateway::failing(Chain::Ethereum));
    let engine = engine_with(config, vec![eth as Arc<dyn ChainGateway>]);

    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();
    let handle = engine.open_account(account);

    assert!(handle.refresh().await.is_err());
    match handle.state() {
        AccountState::Error { message } => {
            // watch 通道只放封闭文案，不透传内部错误原文
            assert!(!message.contains("unreachable"));
            assert_eq!(
                message,
                WalletError::Network(String::new()).user_message()
            );
        }
        other => panic!("expected Error, got {:?}", other),
    }
    handle.shutdown().await;
}

#[tokio::test]
async fn concurrent_refreshes_coalesce() {
    let eth = Arc::new(MockGateway::new(Chain::Ethereum, 10u128.pow(18)).with_delay(200));
    let eth_probe = Arc::clone(&eth);
    let mut router = GatewayRouter::new();
    router.register(eth as Arc<dyn ChainGateway>);

    let engine = engine_with(test_config(), vec![]);
    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();
    let handle = AccountActor::spawn(account, Arc::new(router), test_config().engine);

    // 第一个刷新占住 actor，后续请求在邮箱里排队
    let first = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.refresh().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut rest = Vec::new();
    for _ in 0..4 {
        let handle = handle.clone();
        rest.push(tokio::spawn(async move { handle.refresh().await }));
    }

    first.await.unwrap().unwrap();
    for task in rest {
        task.await.unwrap().unwrap();
    }

    // 扇出进行中到达的请求全部挂到同一次结果上：5 个请求一次扇出
    let calls = eth_probe.balance_calls.load(Ordering::SeqCst);
    assert_eq!(calls, 1, "expected a single coalesced fan-out, saw {}", calls);
    handle.shutdown().await;
}

#[tokio::test]
async fn slow_chain_is_dropped_by_timeout() {
    let mut config = test_config();
    config.engine.per_chain_refresh_timeout_secs = 1;
    let eth = Arc::new(MockGateway::new(Chain::Ethereum, 10u128.pow(18)));
    // 超过单链超时
    let sol = Arc::new(MockGateway::new(Chain::Solana, 500).with_delay(3_000));
    let engine = engine_with(config, vec![eth as Arc<dyn ChainGateway>, sol]);

    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();
    let handle = engine.open_account(account);
    handle.refresh().await.unwrap();

    match handle.state() {
        AccountState::Loaded { balances, .. } => {
            assert!(balances.contains_key(&Chain::Ethereum));
            assert!(!balances.contains_key(&Chain::Solana));
        }
        other => panic!("expected Loaded, got {:?}", other),
    }
    handle.shutdown().await;
}

#[tokio::test]
async fn open_account_triggers_initial_refresh() {
    let eth = Arc::new(MockGateway::new(Chain::Ethereum, 42));
    let engine = engine_with(test_config(), vec![eth as Arc<dyn ChainGateway>]);
    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();

    // 不手动 refresh，打开账户后状态应自行离开 Idle
    let handle = engine.open_account(account);
    assert!(
        wait_for(&handle, |s| matches!(s, AccountState::Loaded { .. })).await,
        "initial refresh never happened"
    );
    handle.shutdown().await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 发送管线
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn prepare_and_confirm_send_round_trip() {
    let config = test_config();
    let eth = Arc::new(MockGateway::new(Chain::Ethereum, 10 * 10u128.pow(18)));
    let eth_probe = Arc::clone(&eth);
    let engine = engine_with(config, vec![eth as Arc<dyn ChainGateway>]);

    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();
    let handle = engine.open_account(account.clone());
    let from = account.address_for(Chain::Ethereum).unwrap().address.clone();

    let pending = engine
        .prepare_send(
            &account,
            &handle,
            eth_request(&from, "0xbbb0000000000000000000000000000000000002", "1"),
        )
        .await
        .unwrap();

    assert!(pending.simulation.success);
    assert_eq!(pending.tx.nonce, 7);
    // 陌生收款方只有提示级告警
    assert!(!pending.risk.has_critical());

    // 等预热刷新结束，之后的余额查询只能来自广播后的自动刷新
    assert!(wait_for(&handle, |s| matches!(s, AccountState::Loaded { .. })).await);
    let calls_before = eth_probe.balance_calls.load(Ordering::SeqCst);

    let tx_hash = engine
        .confirm_send(&account, &handle, &pending, false)
        .await
        .unwrap();
    assert_eq!(tx_hash, "0xbroadcast00");
    assert_eq!(eth_probe.broadcasts.load(Ordering::SeqCst), 1);

    // 传播窗口结束后引擎自动刷新余额
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(eth_probe.balance_calls.load(Ordering::SeqCst) > calls_before);
    handle.shutdown().await;
}

#[tokio::test]
async fn failed_broadcast_surfaces_on_account_state() {
    let config = test_config();
    let eth = Arc::new(
        MockGateway::new(Chain::Ethereum, 10 * 10u128.pow(18)).with_broadcast_error(),
    );
    let engine = engine_with(config, vec![eth as Arc<dyn ChainGateway>]);

    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();
    let handle = engine.open_account(account.clone());
    let from = account.address_for(Chain::Ethereum).unwrap().address.clone();

    let pending = engine
        .prepare_send(
            &account,
            &handle,
            eth_request(&from, "0xbbb0000000000000000000000000000000000002", "1"),
        )
        .await
        .unwrap();

    let result = engine.confirm_send(&account, &handle, &pending, false).await;
    assert!(matches!(result, Err(WalletError::Rpc(_))));

    // 广播失败要落到账户状态，且只携带封闭文案
    assert!(
        wait_for(&handle, |s| matches!(s, AccountState::Error { .. })).await,
        "broadcast failure never reached account state"
    );
    if let AccountState::Error { message } = handle.state() {
        assert!(!message.contains("nonce"));
    }
    handle.shutdown().await;
}

#[tokio::test]
async fn history_counterparties_join_risk_safe_set() {
    let config = test_config();
    let trusted = "0xabcd111111111111111111111111111111119999";
    let outgoing = TransactionSummary {
        chain: Chain::Ethereum,
        hash: "0xdeadbeef".to_string(),
        from: "0xaaa0000000000000000000000000000000000001".to_string(),
        to: trusted.to_string(),
        value: Amount::parse("1").unwrap(),
        timestamp: None,
        incoming: false,
    };
    let eth = Arc::new(
        MockGateway::new(Chain::Ethereum, 10 * 10u128.pow(18)).with_history(vec![outgoing]),
    );
    let engine = engine_with(config, vec![eth as Arc<dyn ChainGateway>]);

    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();
    let handle = engine.open_account(account.clone());
    let from = account.address_for(Chain::Ethereum).unwrap().address.clone();

    // 等后台历史拉取完成
    let mut seen = false;
    for _ in 0..40 {
        if !handle.history().is_empty() {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(seen, "history never arrived");

    // 与历史收款方前后缀一致的仿冒地址触发 critical
    let lookalike = "0xabcd222222222222222222222222222222229999";
    let pending = engine
        .prepare_send(&account, &handle, eth_request(&from, lookalike, "1"))
        .await
        .unwrap();
    assert!(pending.risk.has_critical());

    // 历史收款方本身是可信的
    let pending = engine
        .prepare_send(&account, &handle, eth_request(&from, trusted, "1"))
        .await
        .unwrap();
    assert!(!pending.risk.has_critical());
    handle.shutdown().await;
}

#[tokio::test]
async fn tampered_transaction_is_rejected_as_stale() {
    let config = test_config();
    let eth = Arc::new(MockGateway::new(Chain::Ethereum, 10 * 10u128.pow(18)));
    let engine = engine_with(config, vec![eth as Arc<dyn ChainGateway>]);

    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();
    let handle = engine.open_account(account.clone());
    let from = account.address_for(Chain::Ethereum).unwrap().address.clone();

    let mut pending = engine
        .prepare_send(
            &account,
            &handle,
            eth_request(&from, "0xbbb0000000000000000000000000000000000002", "1"),
        )
        .await
        .unwrap();

    // 模拟之后改金额：指纹变了，旧结论必须作废
    pending.tx.value = Amount::parse("5").unwrap();

    let result = engine.confirm_send(&account, &handle, &pending, false).await;
    assert!(matches!(result, Err(WalletError::SimulationFailed(_))));
    handle.shutdown().await;
}

#[tokio::test]
async fn insufficient_funds_simulation_blocks_send() {
    let config = test_config();
    // 余额付不起 1 ETH + gas
    let eth = Arc::new(MockGateway::new(Chain::Ethereum, 10u128.pow(18)));
    let engine = engine_with(config, vec![eth as Arc<dyn ChainGateway>]);

    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();
    let handle = engine.open_account(account.clone());
    let from = account.address_for(Chain::Ethereum).unwrap().address.clone();

    let pending = engine
        .prepare_send(
            &account,
            &handle,
            eth_request(&from, "0xbbb0000000000000000000000000000000000002", "1"),
        )
        .await
        .unwrap();

    assert!(!pending.simulation.success);
    assert!(pending.simulation.balance_changes.is_empty());

    let result = engine.confirm_send(&account, &handle, &pending, false).await;
    assert!(matches!(result, Err(WalletError::SimulationFailed(_))));
    handle.shutdown().await;
}

#[tokio::test]
async fn poisoned_recipient_blocks_until_overridden() {
    let config = test_config();
    let eth = Arc::new(MockGateway::new(Chain::Ethereum, 10 * 10u128.pow(18)));
    let eth_probe = Arc::clone(&eth);
    let engine = engine_with(config, vec![eth as Arc<dyn ChainGateway>]);

    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();
    let handle = engine.open_account(account.clone());
    let from = account.address_for(Chain::Ethereum).unwrap().address.clone();

    // 可信联系人与前后缀一致的仿冒地址
    engine
        .contacts()
        .add(
            "alice",
            Chain::Ethereum,
            "0xabcd111111111111111111111111111111119999",
        )
        .unwrap();
    let lookalike = "0xabcd222222222222222222222222222222229999";

    let pending = engine
        .prepare_send(&account, &handle, eth_request(&from, lookalike, "1"))
        .await
        .unwrap();
    assert!(pending.risk.has_critical());

    // 默认阻断
    let blocked = engine.confirm_send(&account, &handle, &pending, false).await;
    assert!(matches!(blocked, Err(WalletError::RiskBlocked(_))));
    assert_eq!(eth_probe.broadcasts.load(Ordering::SeqCst), 0);

    // 显式覆盖后放行
    let tx_hash = engine
        .confirm_send(&account, &handle, &pending, true)
        .await
        .unwrap();
    assert_eq!(tx_hash, "0xbroadcast00");
    handle.shutdown().await;
}

#[tokio::test]
async fn in_flight_lock_prevents_double_send() {
    let config = test_config();
    let eth = Arc::new(MockGateway::new(Chain::Ethereum, 10 * 10u128.pow(18)));
    let engine = engine_with(config, vec![eth as Arc<dyn ChainGateway>]);

    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();
    let handle = engine.open_account(account.clone());
    let from = account.address_for(Chain::Ethereum).unwrap().address.clone();

    let pending = engine
        .prepare_send(
            &account,
            &handle,
            eth_request(&from, "0xbbb0000000000000000000000000000000000002", "1"),
        )
        .await
        .unwrap();

    engine
        .confirm_send(&account, &handle, &pending, false)
        .await
        .unwrap();

    // 传播窗口内第二笔被拒
    let second = engine.confirm_send(&account, &handle, &pending, false).await;
    assert!(matches!(second, Err(WalletError::TransactionFailed(_))));

    // 窗口过后放行
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine
        .confirm_send(&account, &handle, &pending, false)
        .await
        .unwrap();
    handle.shutdown().await;
}

#[tokio::test]
async fn foreign_sender_address_is_rejected() {
    let config = test_config();
    let eth = Arc::new(MockGateway::new(Chain::Ethereum, 10 * 10u128.pow(18)));
    let engine = engine_with(config, vec![eth as Arc<dyn ChainGateway>]);

    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();
    let handle = engine.open_account(account.clone());

    let result = engine
        .prepare_send(
            &account,
            &handle,
            eth_request(
                "0xccc0000000000000000000000000000000000003",
                "0xbbb0000000000000000000000000000000000002",
                "1",
            ),
        )
        .await;
    assert!(matches!(result, Err(WalletError::TransactionFailed(_))));
    handle.shutdown().await;
}

// 用到了 AccountActor 的 re-export 路径，保证对外 API 不悄悄变化
#[tokio::test]
async fn actor_can_be_spawned_directly() {
    let mut router = GatewayRouter::new();
    router.register(Arc::new(MockGateway::new(Chain::Ethereum, 42)));

    let engine = engine_with(test_config(), vec![]);
    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();

    let handle = AccountActor::spawn(
        account,
        Arc::new(router),
        test_config().engine,
    );
    handle.refresh().await.unwrap();
    assert!(matches!(handle.state(), AccountState::Loaded { .. }));

    let mut map_check: HashMap<Chain, u128> = HashMap::new();
    if let AccountState::Loaded { balances, .. } = handle.state() {
        for (chain, balance) in balances {
            map_check.insert(chain, balance.native_units);
        }
    }
    assert_eq!(map_check.get(&Chain::Ethereum), Some(&42));
    handle.shutdown().await;
}

#[tokio::test]
async fn lock_resets_account_to_idle() {
    let mut router = GatewayRouter::new();
    router.register(Arc::new(MockGateway::new(Chain::Ethereum, 42)));

    let engine = engine_with(test_config(), vec![]);
    let account = engine.import_wallet(TEST_MNEMONIC, "Main").await.unwrap();

    let handle = AccountActor::spawn(account, Arc::new(router), test_config().engine);
    handle.refresh().await.unwrap();
    assert!(matches!(handle.state(), AccountState::Loaded { .. }));

    let mut watcher = handle.subscribe();
    // clone 出来的 receiver 可能带着旧版本号，先标记当前值已读
    watcher.borrow_and_update();
    handle.lock().await;
    watcher.changed().await.unwrap();
    assert!(matches!(handle.state(), AccountState::Idle));
    assert!(handle.history().is_empty());
    handle.shutdown().await;
}
