//! 桌面弹窗渠道
//!
//! 通过系统通知命令（notify-send / terminal-notifier / osascript）弹出
//! 桌面通知。通知权限未授予或命令不可用时静默跳过——绝不阻塞、绝不报错。

use anyhow::Result;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

use crate::notification::channel::{
    AlertNotification, DeliveryStatus, NotificationChannel, NotifyKind,
};

/// 桌面渠道配置
#[derive(Debug, Clone)]
pub struct DesktopConfig {
    /// 渠道开关（等价于"用户已授予权限"）
    pub enabled: bool,
    /// 通知命令（缺省自动探测）
    pub notifier_cmd: Option<String>,
}

/// 桌面弹窗渠道
pub struct DesktopChannel {
    config: DesktopConfig,
    notifier: Option<String>,
}

impl DesktopChannel {
    pub fn new(config: DesktopConfig) -> Self {
        let notifier = config.notifier_cmd.clone().or_else(Self::find_notifier);
        if let Some(n) = &notifier {
            debug!(notifier = %n, "Desktop notifier resolved");
        }
        Self { config, notifier }
    }

    /// 探测常见通知命令路径
    fn find_notifier() -> Option<String> {
        let candidates = ["notify-send", "terminal-notifier", "osascript"];
        let dirs = ["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"];

        for name in candidates {
            for dir in dirs {
                let path = format!("{}/{}", dir, name);
                if Path::new(&path).exists() {
                    return Some(path);
                }
            }
        }
        None
    }

    fn build_command(notifier: &str, title: &str, body: &str) -> Command {
        let mut cmd = Command::new(notifier);
        let base = Path::new(notifier)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        match base.as_str() {
            "osascript" => {
                cmd.arg("-e").arg(format!(
                    "display notification \"{}\" with title \"{}\"",
                    body.replace('"', "'"),
                    title.replace('"', "'")
                ));
            }
            "terminal-notifier" => {
                cmd.args(["-title", title, "-message", body]);
            }
            _ => {
                cmd.arg(title).arg(body);
            }
        }
        cmd
    }
}

impl NotificationChannel for DesktopChannel {
    fn name(&self) -> &str {
        "desktop"
    }

    fn should_send(&self, notification: &AlertNotification) -> bool {
        self.config.enabled
            && self.notifier.is_some()
            && notification.kind == NotifyKind::Accident
    }

    fn send(&self, notification: &AlertNotification) -> Result<DeliveryStatus> {
        let Some(notifier) = &self.notifier else {
            return Ok(DeliveryStatus::Skipped("桌面通知不可用".to_string()));
        };

        let mut cmd = Self::build_command(notifier, &notification.title(), &notification.body());
        match cmd.stdout(Stdio::null()).stderr(Stdio::null()).spawn() {
            Ok(_) => Ok(DeliveryStatus::Sent),
            Err(e) => {
                // 权限/环境问题一律静默跳过
                debug!(error = %e, "Desktop notifier unavailable, skipping");
                Ok(DeliveryStatus::Skipped(e.to_string()))
            }
        }
    }
}
