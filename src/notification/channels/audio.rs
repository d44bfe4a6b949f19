//! 音频渠道 - 播放提示音
//!
//! 事故告警播放告警音，阴性记录按配置播放轻量"已处理"音。
//! 播放器不可用时退回终端响铃；任何失败都被吞掉，不影响其它渠道。

use anyhow::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

use crate::notification::channel::{
    AlertNotification, DeliveryStatus, NotificationChannel, NotifyKind,
};

/// 音频渠道配置
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// 渠道开关
    pub enabled: bool,
    /// 播放器命令（缺省自动探测）
    pub player_cmd: Option<String>,
    /// 告警提示音文件
    pub alert_tone: Option<PathBuf>,
    /// "已处理"轻提示音文件
    pub processed_tone: Option<PathBuf>,
    /// 阴性记录是否播放轻提示音
    pub processed_enabled: bool,
}

/// 音频渠道
pub struct AudioChannel {
    config: AudioConfig,
    player: Option<String>,
}

impl AudioChannel {
    pub fn new(config: AudioConfig) -> Self {
        let player = config.player_cmd.clone().or_else(Self::find_player);
        if let Some(p) = &player {
            debug!(player = %p, "Audio player resolved");
        }
        Self { config, player }
    }

    /// 探测常见播放器路径
    fn find_player() -> Option<String> {
        let candidates = ["paplay", "aplay", "afplay", "play"];
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

    fn tone_for(&self, kind: NotifyKind) -> Option<&PathBuf> {
        match kind {
            NotifyKind::Accident => self.config.alert_tone.as_ref(),
            NotifyKind::Processed => self.config.processed_tone.as_ref(),
        }
    }
}

impl NotificationChannel for AudioChannel {
    fn name(&self) -> &str {
        "audio"
    }

    fn should_send(&self, notification: &AlertNotification) -> bool {
        if !self.config.enabled {
            return false;
        }
        match notification.kind {
            NotifyKind::Accident => true,
            NotifyKind::Processed => self.config.processed_enabled,
        }
    }

    fn send(&self, notification: &AlertNotification) -> Result<DeliveryStatus> {
        if let (Some(player), Some(tone)) = (&self.player, self.tone_for(notification.kind)) {
            // spawn 后立即返回，不等待播放结束
            match Command::new(player)
                .arg(tone)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(_) => return Ok(DeliveryStatus::Sent),
                Err(e) => {
                    debug!(error = %e, "Audio player spawn failed, falling back to bell");
                    return Ok(DeliveryStatus::Failed(e.to_string()));
                }
            }
        }

        // 没有播放器或提示音：终端响铃兜底
        print!("\x07");
        let _ = std::io::stdout().flush();
        Ok(DeliveryStatus::Sent)
    }
}
