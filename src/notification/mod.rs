//! 通知抽象层 - 统一管理所有通知渠道
//!
//! # 设计目标
//! 1. 统一接口：所有渠道实现 `NotificationChannel` trait
//! 2. 渠道解耦：每个渠道独立实现，失败互不影响
//! 3. 冷却限流：同一冷却窗口内最多扇出一次，防止多来源告警风暴
//! 4. 尽力投递：扇出不等待用户交互，渠道不可用时静默降级
//!
//! # 使用示例
//! ```ignore
//! use accident_alert_monitor::notification::{
//!     AlertNotification, NotificationDispatcher,
//! };
//!
//! let mut dispatcher = NotificationDispatcher::new();
//! dispatcher.register_channel(audio);
//! dispatcher.register_channel(banner);
//!
//! let result = dispatcher.dispatch(&AlertNotification::accident(record));
//! println!("delivered: {:?}", result.delivered());
//! ```

pub mod channel;
pub mod channels;
pub mod cooldown;
pub mod dispatcher;

pub use channel::{
    AlertNotification, DeliveryResult, DeliveryStatus, NotificationChannel, NotifyKind,
};
pub use channels::{AudioChannel, AudioConfig, BannerChannel, BannerConfig, BannerEvent};
pub use channels::{DesktopChannel, DesktopConfig};
pub use cooldown::NotifyCooldown;
pub use dispatcher::NotificationDispatcher;
