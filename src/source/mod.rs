//! 来源适配器 - 三个独立的告警生产方
//!
//! - `PollAdapter`：固定间隔拉取 REST 分页
//! - `PushAdapter`（由 `ConnectionSupervisor` 驱动）：长连接推送
//! - `LocalQueueAdapter`：消费本地检测进程写入的持久队列
//!
//! 三者互相独立、各自容错，全部写入同一个 Reconciler。

pub mod local_queue;
pub mod poll;
pub mod push;
pub mod supervisor;

pub use local_queue::LocalQueueAdapter;
pub use poll::{BackendClient, PollAdapter};
pub use push::{PushConnection, PushConnector, PushMessage, WsConnector};
pub use supervisor::{
    backoff_delay, ConnectionState, ConnectionStatus, ConnectionSupervisor, SupervisorConfig,
};
