//! 告警引擎 - 组装全部组件并对 UI 暴露接口
//!
//! 引擎启动后台任务：轮询适配器、推送连接监督器、本地队列适配器、
//! 通知扇出循环、跨实例同步循环。UI 侧只看四样东西：有序快照、
//! 未读数、连接状态、事件订阅。确认操作乐观应用、尽力上报、
//! 失败回滚，UI 永远不等远端往返。

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alert::read_state::ReadStateTracker;
use crate::alert::reconciler::Reconciler;
use crate::alert::record::{AlertRecord, SourceKind};
use crate::alert::signal::ChangeSignal;
use crate::alert::store::AlertStore;
use crate::config::EngineConfig;
use crate::notification::channel::AlertNotification;
use crate::notification::channels::audio::{AudioChannel, AudioConfig};
use crate::notification::channels::banner::{BannerChannel, BannerConfig, BannerEvent};
use crate::notification::channels::desktop::{DesktopChannel, DesktopConfig};
use crate::notification::cooldown::NotifyCooldown;
use crate::notification::dispatcher::NotificationDispatcher;
use crate::source::local_queue::LocalQueueAdapter;
use crate::source::poll::{BackendClient, PollAdapter};
use crate::source::push::WsConnector;
use crate::source::supervisor::{
    ConnectionState, ConnectionStatus, ConnectionSupervisor, SupervisorConfig,
};

/// 引擎对外广播的事件
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// 新告警入库（UI 侧副作用用，如角标）
    AlertAdded(AlertRecord),
    /// 存储内容变化
    StoreChanged { total: usize, unread: usize },
    /// 连接状态变化
    ConnectionChanged(ConnectionStatus),
    /// 应用内横幅
    Banner(BannerEvent),
    /// 非阻塞的"无法同步"提示
    SyncFailed { message: String },
}

/// 告警引擎
pub struct AlertEngine {
    config: EngineConfig,
    reconciler: Arc<Reconciler>,
    client: Arc<BackendClient>,
    dispatcher: Arc<NotificationDispatcher>,
    cooldown: Arc<Mutex<NotifyCooldown>>,
    events: broadcast::Sender<EngineEvent>,
    conn_state_tx: watch::Sender<ConnectionState>,
    conn_state_rx: watch::Receiver<ConnectionState>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AlertEngine {
    /// 构建引擎（不启动任何后台任务）
    pub fn new(config: EngineConfig) -> Result<Self> {
        let (events, _) = broadcast::channel(256);

        let store = AlertStore::open(config.snapshot_path(), config.capacity);
        let read_state = Arc::new(Mutex::new(ReadStateTracker::open(config.read_state_path())));
        let reconciler = Arc::new(Reconciler::new(
            store,
            read_state,
            config.dedup_window_secs,
            events.clone(),
        ));

        let client = Arc::new(BackendClient::new(
            config.backend_url.clone(),
            config.token_path.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?);

        let dispatcher = Arc::new(Self::build_dispatcher(&config, events.clone()));
        let cooldown = Arc::new(Mutex::new(
            NotifyCooldown::new(Duration::from_secs(config.notify.cooldown_secs))
                .with_high_bypass(config.notify.high_bypass),
        ));

        let (conn_state_tx, conn_state_rx) = watch::channel(ConnectionState::Idle);
        let (stop_tx, stop_rx) = watch::channel(false);

        Ok(Self {
            config,
            reconciler,
            client,
            dispatcher,
            cooldown,
            events,
            conn_state_tx,
            conn_state_rx,
            stop_tx,
            stop_rx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// 按配置组装通知渠道
    fn build_dispatcher(
        config: &EngineConfig,
        events: broadcast::Sender<EngineEvent>,
    ) -> NotificationDispatcher {
        let mut dispatcher = NotificationDispatcher::new();

        dispatcher.register_channel(Arc::new(AudioChannel::new(AudioConfig {
            enabled: config.notify.audio_enabled,
            player_cmd: config.notify.audio_player.clone(),
            alert_tone: config.notify.alert_tone.clone(),
            processed_tone: config.notify.processed_tone.clone(),
            processed_enabled: config.notify.processed_tone_enabled,
        })));
        dispatcher.register_channel(Arc::new(DesktopChannel::new(DesktopConfig {
            enabled: config.notify.desktop_enabled,
            notifier_cmd: config.notify.desktop_notifier.clone(),
        })));
        dispatcher.register_channel(Arc::new(BannerChannel::new(
            BannerConfig {
                enabled: config.notify.banner_enabled,
                auto_dismiss: config
                    .notify
                    .banner_auto_dismiss_secs
                    .map(Duration::from_secs),
            },
            events,
        )));

        dispatcher
    }

    /// 启动全部后台任务
    pub fn start(&self) {
        info!(
            backend = %self.config.backend_url,
            push = %self.config.push_url,
            "Starting alert engine"
        );
        let mut tasks = self.tasks.lock().unwrap();

        // 轮询适配器
        let poll = PollAdapter::new(
            self.client.clone(),
            self.reconciler.clone(),
            Duration::from_secs(self.config.poll_interval_secs),
            self.config.page_size,
            self.events.clone(),
            self.stop_rx.clone(),
        );
        tasks.push(tokio::spawn(poll.run()));

        // 推送连接监督器（降级轮询复用同一个 REST 客户端）
        let supervisor = ConnectionSupervisor::new(
            Arc::new(WsConnector::new(self.config.push_url.clone())),
            self.reconciler.clone(),
            self.client.clone(),
            SupervisorConfig::from_connection_config(&self.config.connection, self.config.page_size),
            self.conn_state_tx.clone(),
            self.stop_rx.clone(),
            Some(ChangeSignal::new(self.config.retry_signal_path())),
        );
        tasks.push(tokio::spawn(supervisor.run()));

        // 本地检测器队列
        let queue = LocalQueueAdapter::new(
            self.config.queue_path(),
            Duration::from_secs(self.config.queue_check_interval_secs),
            self.reconciler.clone(),
            self.stop_rx.clone(),
        );
        tasks.push(tokio::spawn(queue.run()));

        // 通知扇出循环
        tasks.push(tokio::spawn(dispatch_loop(
            self.events.subscribe(),
            self.dispatcher.clone(),
            self.cooldown.clone(),
            self.stop_rx.clone(),
        )));

        // 连接状态转发
        tasks.push(tokio::spawn(status_forward_loop(
            self.conn_state_rx.clone(),
            self.events.clone(),
            self.stop_rx.clone(),
        )));

        // 跨实例同步与快照补写
        tasks.push(tokio::spawn(maintenance_loop(
            self.reconciler.clone(),
            ChangeSignal::new(AlertStore::signal_path(&self.config.snapshot_path())),
            ChangeSignal::new(ReadStateTracker::signal_path(&self.config.read_state_path())),
            Duration::from_secs(self.config.queue_check_interval_secs),
            self.stop_rx.clone(),
        )));
    }

    /// 停止全部后台任务并等待退出（落盘已随每次 reconcile 完成）
    pub async fn stop(&self) {
        info!("Stopping alert engine");
        let _ = self.stop_tx.send(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        // 若有失败的持久化，停机前再补一次
        self.reconciler.retry_persist_if_dirty();
    }

    /// 订阅引擎事件
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// 当前有序快照（无锁读取）
    pub fn snapshot(&self) -> Arc<Vec<AlertRecord>> {
        self.reconciler.snapshot()
    }

    /// 未读告警数
    pub fn unread_count(&self) -> usize {
        self.reconciler.unread_count()
    }

    /// 当前连接状态
    pub fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::from_state(*self.conn_state_rx.borrow())
    }

    /// 确认一条告警：乐观本地应用 + 尽力上报 + 失败回滚
    ///
    /// 返回 `Ok(false)` 表示 id 不在存储中。本地检测记录没有服务端
    /// 对应项，只做本地确认。
    pub async fn acknowledge(&self, alert_id: &str) -> Result<bool> {
        let Some(outcome) = self.reconciler.acknowledge_local(alert_id) else {
            return Ok(false);
        };
        if !outcome.newly_acknowledged {
            return Ok(true);
        }
        if outcome.source_kind == SourceKind::LocalDetector {
            debug!(alert_id = %alert_id, "本地检测记录，确认不上报服务端");
            return Ok(true);
        }

        match self.client.acknowledge(alert_id).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(alert_id = %alert_id, error = %e, "服务端确认失败，回滚本地已读状态");
                self.reconciler.revert_acknowledge(alert_id);
                let _ = self.events.send(EngineEvent::SyncFailed {
                    message: format!("无法同步已读状态: {}", e),
                });
                Err(anyhow!("确认告警 {} 失败: {}", alert_id, e))
            }
        }
    }

    /// 管理操作：清空全部告警（已读集合保留）
    pub fn clear_all(&self) {
        info!("Clearing all alerts");
        self.reconciler.clear_all();
    }

    /// 请求立刻重试推送通道（降级轮询期间生效）
    pub fn retry_push(&self) {
        ChangeSignal::new(self.config.retry_signal_path()).notify();
    }

    /// 引擎配置
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 合并器句柄（测试与高级用法）
    pub fn reconciler(&self) -> Arc<Reconciler> {
        self.reconciler.clone()
    }
}

/// 通知扇出循环：只消费 `AlertAdded`（合并更新绝不重复通知）
async fn dispatch_loop(
    mut events_rx: broadcast::Receiver<EngineEvent>,
    dispatcher: Arc<NotificationDispatcher>,
    cooldown: Arc<Mutex<NotifyCooldown>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            res = stop_rx.changed() => {
                if res.is_err() || *stop_rx.borrow() {
                    return;
                }
                continue;
            }
            event = events_rx.recv() => event,
        };

        match event {
            Ok(EngineEvent::AlertAdded(record)) => {
                if record.accident_detected {
                    let fire = cooldown.lock().unwrap().should_notify(&record);
                    if !fire {
                        debug!(alert_id = %record.id, "冷却窗口内，抑制本次扇出");
                        continue;
                    }
                    let notification = AlertNotification::accident(record);
                    let result = dispatcher.dispatch(&notification);
                    info!(
                        alert_id = %notification.record.id,
                        severity = %notification.record.severity,
                        delivered = ?result.delivered(),
                        "Alert fanned out"
                    );
                } else {
                    // 阴性记录只允许轻量提示，渠道自行过滤
                    dispatcher.dispatch(&AlertNotification::processed(record));
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "通知循环落后，跳过积压事件");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// 连接状态转发：watch → 事件总线（UI 的连接指示灯）
async fn status_forward_loop(
    mut state_rx: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<EngineEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut last_status = ConnectionStatus::from_state(*state_rx.borrow());
    loop {
        tokio::select! {
            res = stop_rx.changed() => {
                if res.is_err() || *stop_rx.borrow() {
                    return;
                }
            }
            res = state_rx.changed() => {
                if res.is_err() {
                    return;
                }
                let status = ConnectionStatus::from_state(*state_rx.borrow());
                if status != last_status {
                    last_status = status;
                    let _ = events.send(EngineEvent::ConnectionChanged(status));
                }
            }
        }
    }
}

/// 跨实例同步循环：监视快照/已读状态信号，顺带补写失败的持久化
async fn maintenance_loop(
    reconciler: Arc<Reconciler>,
    mut store_signal: ChangeSignal,
    mut read_state_signal: ChangeSignal,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        let stopped = tokio::select! {
            res = stop_rx.changed() => res.is_err() || *stop_rx.borrow(),
            _ = ticker.tick() => false,
        };
        if stopped {
            return;
        }

        if store_signal.changed() {
            debug!("检测到其它实例写入快照，合并磁盘状态");
            reconciler.sync_from_disk();
        }
        if read_state_signal.changed() {
            debug!("检测到已读状态变化，回放集合");
            {
                // 重新加载集合本体
                let read_state = reconciler.read_state();
                read_state.lock().unwrap().reload();
            }
            reconciler.reapply_read_state();
        }
        reconciler.retry_persist_if_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.data_dir = Some(dir.path().to_path_buf());
        // 指向无人监听的端口：连接立刻被拒绝
        config.backend_url = "http://127.0.0.1:9".to_string();
        config.push_url = "ws://127.0.0.1:9/ws/alerts".to_string();
        config.notify.audio_enabled = false;
        config.notify.desktop_enabled = false;
        config
    }

    fn record(id: &str, accident: bool) -> AlertRecord {
        AlertRecord::new(id, Utc::now(), SourceKind::Poll, 0.9, accident)
    }

    #[tokio::test]
    async fn test_snapshot_and_unread_count() {
        let dir = TempDir::new().unwrap();
        let engine = AlertEngine::new(test_config(&dir)).unwrap();

        engine
            .reconciler()
            .reconcile(vec![record("a1", true), record("a2", true)], SourceKind::Poll);

        assert_eq!(engine.snapshot().len(), 2);
        assert_eq!(engine.unread_count(), 2);
    }

    #[tokio::test]
    async fn test_acknowledge_local_detector_needs_no_server() {
        let dir = TempDir::new().unwrap();
        let engine = AlertEngine::new(test_config(&dir)).unwrap();

        let mut rec = record("det-1", true);
        rec.source_kind = SourceKind::LocalDetector;
        engine
            .reconciler()
            .reconcile(vec![rec], SourceKind::LocalDetector);

        // 本地检测记录：不触网即成功
        assert!(engine.acknowledge("det-1").await.unwrap());
        assert_eq!(engine.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_id_is_false() {
        let dir = TempDir::new().unwrap();
        let engine = AlertEngine::new(test_config(&dir)).unwrap();
        assert!(!engine.acknowledge("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_acknowledge_rollback_on_auth_failure() {
        let dir = TempDir::new().unwrap();
        // 未配置令牌：上报必然 AuthRequired，触发回滚
        let engine = AlertEngine::new(test_config(&dir)).unwrap();
        engine
            .reconciler()
            .reconcile(vec![record("a1", true)], SourceKind::Poll);

        let result = engine.acknowledge("a1").await;
        assert!(result.is_err());
        // 乐观确认已回滚
        assert_eq!(engine.unread_count(), 1);
        assert!(!engine.snapshot()[0].acknowledged);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let dir = TempDir::new().unwrap();
        let engine = AlertEngine::new(test_config(&dir)).unwrap();
        engine
            .reconciler()
            .reconcile(vec![record("a1", true)], SourceKind::Poll);

        engine.clear_all();
        assert!(engine.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_initial_connection_status_is_disconnected() {
        let dir = TempDir::new().unwrap();
        let engine = AlertEngine::new(test_config(&dir)).unwrap();
        assert_eq!(engine.connection_status(), ConnectionStatus::Disconnected);
    }
}
