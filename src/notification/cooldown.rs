//! 通知冷却 - 抑制短时间内的重复扇出
//!
//! 只维护一个全局"上次通知时刻"，不按来源区分：多个来源几乎同时
//! 报告同一事故时，细粒度的冷却反而会造成通知风暴。粗粒度是有意的。

use std::time::{Duration, Instant};

use crate::alert::record::{AlertRecord, Severity};

/// 全局通知冷却器
pub struct NotifyCooldown {
    /// 冷却窗口
    window: Duration,
    /// 高严重度绕过冷却（策略开关，默认关闭）
    high_bypass: bool,
    /// 上次放行的时刻
    last_fired_at: Option<Instant>,
    /// 上次放行记录的事件时间戳
    last_fired_ts: Option<chrono::DateTime<chrono::Utc>>,
}

impl NotifyCooldown {
    /// 创建冷却器
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            high_bypass: false,
            last_fired_at: None,
            last_fired_ts: None,
        }
    }

    /// 开启高严重度绕过（链式调用）
    pub fn with_high_bypass(mut self, enabled: bool) -> Self {
        self.high_bypass = enabled;
        self
    }

    /// 判断一条新记录是否应触发通知
    ///
    /// 放行条件：记录未确认、事件时间晚于上次放行的事件、冷却窗口已过。
    /// 放行即更新时间戳。
    pub fn should_notify(&mut self, record: &AlertRecord) -> bool {
        self.should_notify_at(record, Instant::now())
    }

    /// 判断（带注入时刻，用于测试）
    pub fn should_notify_at(&mut self, record: &AlertRecord, now: Instant) -> bool {
        if record.acknowledged {
            return false;
        }
        if let Some(last_ts) = self.last_fired_ts {
            if record.timestamp <= last_ts {
                return false;
            }
        }
        if self.high_bypass && record.severity == Severity::High {
            self.record_fire(record, now);
            return true;
        }
        if let Some(last) = self.last_fired_at {
            if now.duration_since(last) < self.window {
                return false;
            }
        }
        self.record_fire(record, now);
        true
    }

    fn record_fire(&mut self, record: &AlertRecord, now: Instant) {
        self.last_fired_at = Some(now);
        self.last_fired_ts = Some(record.timestamp);
    }
}
