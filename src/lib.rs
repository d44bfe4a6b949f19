//! Accident Alert Monitor - 事故告警聚合与实时通知引擎
//!
//! 从三个互相独立、各自不可靠的来源（推送通道、轮询接口、本地检测
//! 队列）摄取事故报告，合并成一份一致、去重、有序的告警流；已读状态
//! 跨进程持久化；合格的新告警在冷却约束下扇出到音频/桌面/横幅渠道。

pub mod alert;
pub mod config;
pub mod engine;
pub mod error;
pub mod notification;
pub mod source;

pub use alert::{
    generate_alert_id, AckOutcome, AlertPatch, AlertRecord, AlertStore, ChangeSignal,
    ReadStateTracker, ReconcileOutcome, Reconciler, Severity, SourceKind, WireAlert,
};
pub use config::{ConnectionConfig, EngineConfig, NotifyConfig};
pub use engine::{AlertEngine, EngineEvent};
pub use error::EngineError;
pub use notification::{
    AlertNotification, AudioChannel, AudioConfig, BannerChannel, BannerConfig, BannerEvent,
    DeliveryResult, DeliveryStatus, DesktopChannel, DesktopConfig, NotificationChannel,
    NotificationDispatcher, NotifyCooldown, NotifyKind,
};
pub use source::{
    backoff_delay, BackendClient, ConnectionState, ConnectionStatus, ConnectionSupervisor,
    LocalQueueAdapter, PollAdapter, PushConnection, PushConnector, PushMessage, SupervisorConfig,
    WsConnector,
};
