//! 告警数据模型与规范存储
//!
//! # 数据流
//! 三个来源适配器解码出 `AlertRecord` 批次，交给 `Reconciler` 合并进
//! `AlertStore`；`ReadStateTracker` 的已确认集合在每轮合并时回放；
//! 跨实例通过 `ChangeSignal` 感知彼此的落盘写入。

pub mod read_state;
pub mod record;
pub mod reconciler;
pub mod signal;
pub mod store;

pub use read_state::ReadStateTracker;
pub use record::{generate_alert_id, AlertPatch, AlertRecord, Severity, SourceKind, WireAlert};
pub use reconciler::{AckOutcome, ReconcileOutcome, Reconciler};
pub use signal::ChangeSignal;
pub use store::{AlertStore, DEFAULT_CAPACITY};
