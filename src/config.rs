//! 引擎配置
//!
//! JSON 配置文件位于 `~/.config/accident-alert-monitor/config.json`，
//! 所有字段带默认值，空文件 `{}` 也能工作。数据文件（快照、已读状态、
//! 检测器队列）默认放在同一目录下。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 检测后端 REST 基地址
    pub backend_url: String,
    /// 推送通道 WebSocket 地址
    pub push_url: String,
    /// 访问令牌文件路径（缺省 = 未认证，轮询/确认暂停）
    pub token_path: Option<PathBuf>,
    /// 数据目录（缺省 = 配置目录）
    pub data_dir: Option<PathBuf>,
    /// 轮询间隔（秒）
    pub poll_interval_secs: u64,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// 每页拉取条数
    pub page_size: usize,
    /// 本地检测器队列文件路径（缺省 = 数据目录下 detector_queue.jsonl）
    pub queue_path: Option<PathBuf>,
    /// 队列/信号检查间隔（秒）
    pub queue_check_interval_secs: u64,
    /// 存储容量上限
    pub capacity: usize,
    /// 去重时间窗（秒）
    pub dedup_window_secs: i64,
    /// 通知相关配置
    pub notify: NotifyConfig,
    /// 推送连接相关配置
    pub connection: ConnectionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8080".to_string(),
            push_url: "ws://127.0.0.1:8080/ws/alerts".to_string(),
            token_path: None,
            data_dir: None,
            poll_interval_secs: 30,
            request_timeout_secs: 15,
            page_size: 50,
            queue_path: None,
            queue_check_interval_secs: 10,
            capacity: crate::alert::DEFAULT_CAPACITY,
            dedup_window_secs: 5,
            notify: NotifyConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

/// 通知渠道与冷却配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// 全局通知冷却窗口（秒）
    pub cooldown_secs: u64,
    /// 高严重度绕过冷却（策略开关，默认关闭）
    pub high_bypass: bool,
    /// 音频渠道开关
    pub audio_enabled: bool,
    /// 播放器命令（缺省自动探测）
    pub audio_player: Option<String>,
    /// 告警提示音文件
    pub alert_tone: Option<PathBuf>,
    /// "已处理"轻提示音文件
    pub processed_tone: Option<PathBuf>,
    /// 阴性记录是否播放轻提示音
    pub processed_tone_enabled: bool,
    /// 桌面弹窗渠道开关
    pub desktop_enabled: bool,
    /// 桌面通知命令（缺省自动探测 notify-send 等）
    pub desktop_notifier: Option<String>,
    /// 应用内横幅渠道开关
    pub banner_enabled: bool,
    /// 横幅自动消失秒数（None = 不自动消失）
    pub banner_auto_dismiss_secs: Option<u64>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 5,
            high_bypass: false,
            audio_enabled: true,
            audio_player: None,
            alert_tone: None,
            processed_tone: None,
            processed_tone_enabled: false,
            desktop_enabled: true,
            desktop_notifier: None,
            banner_enabled: true,
            banner_auto_dismiss_secs: Some(5),
        }
    }
}

/// 推送连接与重连配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// 心跳间隔（秒）
    pub heartbeat_interval_secs: u64,
    /// 重连退避基数（秒）
    pub reconnect_base_secs: u64,
    /// 重连退避上限（秒）
    pub reconnect_max_secs: u64,
    /// 连续失败多少次后降级为轮询
    pub max_reconnect_attempts: u32,
    /// 降级后长间隔重试推送通道（秒）
    pub failed_retry_interval_secs: u64,
    /// 降级轮询间隔（秒）
    pub fallback_poll_interval_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            reconnect_base_secs: 1,
            reconnect_max_secs: 30,
            max_reconnect_attempts: 5,
            failed_retry_interval_secs: 300,
            fallback_poll_interval_secs: 30,
        }
    }
}

impl EngineConfig {
    /// 默认配置目录
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("accident-alert-monitor")
    }

    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        Self::default_dir().join("config.json")
    }

    /// 加载配置；文件不存在时返回默认值
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        Ok(config)
    }

    /// 数据目录（建目录交给写入方）
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(Self::default_dir)
    }

    /// 快照文件路径
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir().join("alerts_snapshot.jsonl")
    }

    /// 已读状态文件路径
    pub fn read_state_path(&self) -> PathBuf {
        self.data_dir().join("read_state.json")
    }

    /// 本地检测器队列路径
    pub fn queue_path(&self) -> PathBuf {
        self.queue_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("detector_queue.jsonl"))
    }

    /// 手动重连信号文件路径（`aam retry-push` 写，运行中的引擎读）
    pub fn retry_signal_path(&self) -> PathBuf {
        self.data_dir().join("push_retry.signal")
    }
}
