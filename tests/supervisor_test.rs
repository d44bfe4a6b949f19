//! 连接监督器状态机集成测试
//!
//! 用脚本化的 PushConnector 驱动状态机，虚拟时间下验证：
//! 指数退避序列、降级轮询、手动重试、心跳超时强制重连。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use accident_alert_monitor::{
    AlertStore, BackendClient, ConnectionState, ConnectionStatus, ConnectionSupervisor,
    EngineError, PushConnection, PushConnector, PushMessage, ReadStateTracker, Reconciler,
    Severity, SupervisorConfig, WireAlert,
};

/// 每次 connect 消耗一个脚本；耗尽后永远失败
enum Script {
    Fail,
    /// 播放消息后由对端关闭
    Open(Vec<PushMessage>),
    /// 打开后保持静默（测心跳用）
    OpenSilent,
}

struct ScriptedConnector {
    scripts: Mutex<VecDeque<Script>>,
    connects: AtomicUsize,
    sent: Arc<Mutex<Vec<PushMessage>>>,
}

impl ScriptedConnector {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            connects: AtomicUsize::new(0),
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn sent_messages(&self) -> Vec<PushMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn PushConnection>, EngineError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Fail);
        match script {
            Script::Fail => Err(EngineError::TransientNetwork(
                "connection refused".to_string(),
            )),
            Script::Open(messages) => Ok(Box::new(ScriptedConnection {
                inbound: messages.into(),
                silent: false,
                sent: self.sent.clone(),
            })),
            Script::OpenSilent => Ok(Box::new(ScriptedConnection {
                inbound: VecDeque::new(),
                silent: true,
                sent: self.sent.clone(),
            })),
        }
    }
}

struct ScriptedConnection {
    inbound: VecDeque<PushMessage>,
    silent: bool,
    sent: Arc<Mutex<Vec<PushMessage>>>,
}

#[async_trait]
impl PushConnection for ScriptedConnection {
    async fn next_message(&mut self) -> Result<Option<PushMessage>, EngineError> {
        if let Some(message) = self.inbound.pop_front() {
            return Ok(Some(message));
        }
        if self.silent {
            futures_util::future::pending::<()>().await;
            unreachable!();
        }
        Ok(None)
    }

    async fn send(&mut self, message: &PushMessage) -> Result<(), EngineError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct Harness {
    reconciler: Arc<Reconciler>,
    state_rx: watch::Receiver<ConnectionState>,
    stop_tx: watch::Sender<bool>,
    retry: Arc<tokio::sync::Notify>,
}

/// 搭一套监督器：秒级退避，降级轮询间隔 30s，长重试拉远不干扰
fn start_supervisor(
    connector: Arc<ScriptedConnector>,
    dir: &tempfile::TempDir,
) -> (Harness, tokio::task::JoinHandle<()>) {
    let store = AlertStore::open(dir.path().join("snapshot.jsonl"), 50);
    let read_state = Arc::new(Mutex::new(ReadStateTracker::open(
        dir.path().join("read_state.json"),
    )));
    let (events, _) = broadcast::channel(64);
    let reconciler = Arc::new(Reconciler::new(store, read_state, 5, events));

    // 无令牌的客户端：降级轮询立即失败，但不触网
    let client = Arc::new(
        BackendClient::new("http://127.0.0.1:9", None, Duration::from_secs(1)).unwrap(),
    );

    let config = SupervisorConfig {
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        max_attempts: 5,
        heartbeat_interval: Duration::from_secs(30),
        failed_retry_interval: Duration::from_secs(100_000),
        fallback_poll_interval: Duration::from_secs(30),
        page_size: 50,
        client_id: "aam-test".to_string(),
    };

    let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
    let (stop_tx, stop_rx) = watch::channel(false);

    let supervisor = ConnectionSupervisor::new(
        connector,
        reconciler.clone(),
        client,
        config,
        state_tx,
        stop_rx,
        None,
    );
    let retry = supervisor.retry_handle();
    let handle = tokio::spawn(supervisor.run());

    (
        Harness {
            reconciler,
            state_rx,
            stop_tx,
            retry,
        },
        handle,
    )
}

/// 小步推进虚拟时间直到条件满足
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn test_backoff_sequence_then_failed_with_fallback() {
    let connector = ScriptedConnector::new(vec![]); // 全部失败
    let dir = tempfile::TempDir::new().unwrap();
    let start = tokio::time::Instant::now();

    let (mut harness, handle) = start_supervisor(connector.clone(), &dir);

    harness
        .state_rx
        .wait_for(|s| *s == ConnectionState::Failed)
        .await
        .unwrap();

    // 退避序列 1,2,4,8,16 秒后第 6 次连接失败进入 Failed
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_secs(31) && elapsed < Duration::from_secs(32),
        "expected ~31s of backoff, got {:?}",
        elapsed
    );
    assert_eq!(connector.connect_count(), 6);
    assert_eq!(
        ConnectionStatus::from_state(*harness.state_rx.borrow()),
        ConnectionStatus::DegradedPolling
    );

    let _ = harness.stop_tx.send(true);
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_manual_retry_leaves_fallback() {
    let connector = ScriptedConnector::new(vec![]);
    let dir = tempfile::TempDir::new().unwrap();

    let (mut harness, handle) = start_supervisor(connector.clone(), &dir);
    harness
        .state_rx
        .wait_for(|s| *s == ConnectionState::Failed)
        .await
        .unwrap();
    let before = connector.connect_count();

    // 手动重试：离开降级轮询再试一次推送
    harness.retry.notify_one();
    let connector_for_wait = connector.clone();
    wait_until(move || connector_for_wait.connect_count() > before).await;

    // 重试失败后直接回到降级轮询，不再重走整个退避梯子
    harness
        .state_rx
        .wait_for(|s| *s == ConnectionState::Failed)
        .await
        .unwrap();
    assert_eq!(connector.connect_count(), before + 1);

    let _ = harness.stop_tx.send(true);
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_open_connection_reconciles_pushed_alerts() {
    let wire: WireAlert = serde_json::from_str(
        r#"{"id":"push-1","confidence":0.95,"accident_detected":true,"label":"cam-01"}"#,
    )
    .unwrap();
    let connector = ScriptedConnector::new(vec![Script::Open(vec![
        PushMessage::ConnectionAck,
        PushMessage::NewAlert { payload: wire },
    ])]);
    let dir = tempfile::TempDir::new().unwrap();

    let (harness, handle) = start_supervisor(connector.clone(), &dir);

    // 连接会在播完消息后立刻被对端关闭，状态机转瞬即逝，
    // 以合并结果为准判断推送已被消费
    let reconciler = harness.reconciler.clone();
    wait_until(move || !reconciler.snapshot().is_empty()).await;
    let snapshot = harness.reconciler.snapshot();
    assert_eq!(snapshot[0].id, "push-1");
    assert_eq!(snapshot[0].severity, Severity::High);

    // 握手成功即发送订阅消息
    let sent = connector.sent_messages();
    assert!(matches!(sent[0], PushMessage::Subscribe { .. }));

    let _ = harness.stop_tx.send(true);
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_update_alert_patches_by_id() {
    let wire: WireAlert = serde_json::from_str(
        r#"{"id":"push-1","confidence":0.5,"accident_detected":true}"#,
    )
    .unwrap();
    let patch = serde_json::from_str(r#"{"id":"push-1","confidence":0.95}"#).unwrap();
    let connector = ScriptedConnector::new(vec![Script::Open(vec![
        PushMessage::NewAlert { payload: wire },
        PushMessage::UpdateAlert { payload: patch },
    ])]);
    let dir = tempfile::TempDir::new().unwrap();

    let (harness, handle) = start_supervisor(connector, &dir);
    let reconciler = harness.reconciler.clone();
    wait_until(move || {
        reconciler
            .snapshot()
            .first()
            .map(|r| r.severity == Severity::High)
            .unwrap_or(false)
    })
    .await;

    let _ = harness.stop_tx.send(true);
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_timeout_forces_reconnect() {
    let connector = ScriptedConnector::new(vec![Script::OpenSilent]);
    let dir = tempfile::TempDir::new().unwrap();
    let start = tokio::time::Instant::now();

    let (mut harness, handle) = start_supervisor(connector.clone(), &dir);
    harness
        .state_rx
        .wait_for(|s| *s == ConnectionState::Open)
        .await
        .unwrap();

    // 静默连接：2×心跳间隔无响应后强制断开并重连
    let connector_for_wait = connector.clone();
    wait_until(move || connector_for_wait.connect_count() >= 2).await;
    assert!(start.elapsed() >= Duration::from_secs(60));

    // 断开前至少发过一次应用层心跳
    let sent = connector.sent_messages();
    assert!(sent.iter().any(|m| matches!(m, PushMessage::Heartbeat)));

    let _ = harness.stop_tx.send(true);
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_backoff_loop() {
    let connector = ScriptedConnector::new(vec![]);
    let dir = tempfile::TempDir::new().unwrap();

    let (harness, handle) = start_supervisor(connector, &dir);
    // 正处于退避等待中也能立刻停下，不留孤儿循环
    let _ = harness.stop_tx.send(true);
    tokio::time::timeout(Duration::from_secs(120), handle)
        .await
        .expect("supervisor did not stop")
        .unwrap();
}
