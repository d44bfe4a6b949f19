//! 通知渠道 trait 定义

use anyhow::Result;

use crate::alert::record::{AlertRecord, Severity};

/// 一次待投递的通知
#[derive(Debug, Clone)]
pub struct AlertNotification {
    /// 触发通知的记录
    pub record: AlertRecord,
    /// 通知类别
    pub kind: NotifyKind,
}

/// 通知类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    /// 阳性检测：完整的告警扇出
    Accident,
    /// 阴性/正常记录：只有轻量"已处理"提示
    Processed,
}

impl AlertNotification {
    pub fn accident(record: AlertRecord) -> Self {
        Self {
            record,
            kind: NotifyKind::Accident,
        }
    }

    pub fn processed(record: AlertRecord) -> Self {
        Self {
            record,
            kind: NotifyKind::Processed,
        }
    }

    /// 通知标题
    pub fn title(&self) -> String {
        match self.kind {
            NotifyKind::Accident => match self.record.severity {
                Severity::High => "🚨 检测到严重事故".to_string(),
                Severity::Medium | Severity::Low => "⚠️ 检测到疑似事故".to_string(),
            },
            NotifyKind::Processed => "✅ 事件已处理".to_string(),
        }
    }

    /// 通知正文
    pub fn body(&self) -> String {
        let mut parts = Vec::new();
        if let Some(location) = &self.record.location {
            parts.push(format!("位置: {}", location));
        }
        if let Some(label) = &self.record.label {
            parts.push(format!("来源: {}", label));
        }
        parts.push(format!("置信度: {:.0}%", self.record.confidence * 100.0));
        parts.push(format!(
            "时间: {}",
            self.record.timestamp.format("%H:%M:%S")
        ));
        parts.join(" | ")
    }
}

/// 单渠道投递结果
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryStatus {
    /// 投递成功
    Sent,
    /// 跳过（渠道禁用/过滤/不可用）
    Skipped(String),
    /// 投递失败（已被隔离，不影响其它渠道）
    Failed(String),
}

/// 一次扇出的完整结果
#[derive(Debug, Clone, Default)]
pub struct DeliveryResult {
    /// 各渠道结果（渠道名, 状态）
    pub outcomes: Vec<(String, DeliveryStatus)>,
}

impl DeliveryResult {
    /// 投递成功的渠道名
    pub fn delivered(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, status)| *status == DeliveryStatus::Sent)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn any_sent(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, status)| *status == DeliveryStatus::Sent)
    }
}

/// 通知渠道 trait
///
/// 每个渠道独立启用/禁用，投递尽力而为、彼此隔离、不等待用户交互。
pub trait NotificationChannel: Send + Sync {
    /// 渠道名称（用于日志和投递结果）
    fn name(&self) -> &str;

    /// 是否应投递此通知（按类别与渠道自身配置过滤）
    fn should_send(&self, notification: &AlertNotification) -> bool;

    /// 投递通知
    fn send(&self, notification: &AlertNotification) -> Result<DeliveryStatus>;
}
