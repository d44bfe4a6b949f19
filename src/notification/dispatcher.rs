//! 通知分发器 - 把一条合格告警扇出到所有渠道
//!
//! 渠道失败彼此隔离：任何一个渠道挂掉都不会阻塞其余渠道，
//! 扇出不等待用户交互即返回。

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use super::channel::{AlertNotification, DeliveryResult, DeliveryStatus, NotificationChannel};

/// 通知分发器
pub struct NotificationDispatcher {
    /// 所有注册的渠道
    channels: Vec<Arc<dyn NotificationChannel>>,
    /// dry-run 模式：只记录不投递
    dry_run: bool,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            dry_run: false,
        }
    }

    /// 设置 dry-run 模式
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// 注册渠道
    pub fn register_channel(&mut self, channel: Arc<dyn NotificationChannel>) {
        info!(channel = channel.name(), "Registering notification channel");
        self.channels.push(channel);
    }

    /// 扇出一条通知到所有渠道
    pub fn dispatch(&self, notification: &AlertNotification) -> DeliveryResult {
        let mut outcomes = Vec::with_capacity(self.channels.len());

        for channel in &self.channels {
            let name = channel.name().to_string();

            if self.dry_run {
                outcomes.push((name, DeliveryStatus::Skipped("dry-run".to_string())));
                continue;
            }
            if !channel.should_send(notification) {
                outcomes.push((name, DeliveryStatus::Skipped("filtered".to_string())));
                continue;
            }

            let status = match channel.send(notification) {
                Ok(status) => status,
                Err(e) => {
                    warn!(channel = %name, error = %e, "Channel send failed");
                    DeliveryStatus::Failed(e.to_string())
                }
            };
            outcomes.push((name, status));
        }

        DeliveryResult { outcomes }
    }

    /// 已注册的渠道数量
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// 已注册的渠道名称
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
