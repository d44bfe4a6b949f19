//! 应用内横幅渠道
//!
//! 永远可用：把横幅事件发到引擎事件总线，由 UI 层订阅渲染。
//! 样式随严重程度走，默认 5 秒自动消失（可配置关闭）。

use anyhow::Result;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::alert::record::Severity;
use crate::engine::EngineEvent;
use crate::notification::channel::{
    AlertNotification, DeliveryStatus, NotificationChannel, NotifyKind,
};

/// 横幅渠道配置
#[derive(Debug, Clone)]
pub struct BannerConfig {
    /// 渠道开关
    pub enabled: bool,
    /// 自动消失时长（None = 常驻直到手动关闭）
    pub auto_dismiss: Option<Duration>,
}

/// 发往 UI 的横幅事件
#[derive(Debug, Clone)]
pub struct BannerEvent {
    /// 对应的告警 id（点击横幅跳转用）
    pub alert_id: String,
    /// 标题
    pub title: String,
    /// 正文
    pub body: String,
    /// 严重程度（决定横幅样式）
    pub severity: Severity,
    /// 自动消失时长
    pub auto_dismiss: Option<Duration>,
}

/// 应用内横幅渠道
pub struct BannerChannel {
    config: BannerConfig,
    events: broadcast::Sender<EngineEvent>,
}

impl BannerChannel {
    pub fn new(config: BannerConfig, events: broadcast::Sender<EngineEvent>) -> Self {
        Self { config, events }
    }
}

impl NotificationChannel for BannerChannel {
    fn name(&self) -> &str {
        "banner"
    }

    fn should_send(&self, notification: &AlertNotification) -> bool {
        self.config.enabled && notification.kind == NotifyKind::Accident
    }

    fn send(&self, notification: &AlertNotification) -> Result<DeliveryStatus> {
        let banner = BannerEvent {
            alert_id: notification.record.id.clone(),
            title: notification.title(),
            body: notification.body(),
            severity: notification.record.severity,
            auto_dismiss: self.config.auto_dismiss,
        };
        // 没有订阅者不算失败（UI 可能尚未挂载）
        let _ = self.events.send(EngineEvent::Banner(banner));
        Ok(DeliveryStatus::Sent)
    }
}
