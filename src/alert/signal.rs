//! 跨进程变更信号
//!
//! 多个 UI 实例共享同一份快照与已读状态文件。写方每次落盘后碰一下
//! 信号文件，读方按自己的节奏轮询 mtime，发现变化就重新同步内存视图，
//! 避免多实例悄悄分叉。信号与实际持久化格式解耦。

use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

/// 基于文件 mtime 的变更信号
#[derive(Debug)]
pub struct ChangeSignal {
    path: PathBuf,
    last_seen: Option<SystemTime>,
}

impl ChangeSignal {
    /// 创建信号；初始基线取当前 mtime，构造时不会误报变更
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_seen = Self::mtime(&path);
        Self { path, last_seen }
    }

    /// 通知其它读方：写入当前时刻，刷新文件 mtime
    ///
    /// 失败只影响跨实例的及时性，不影响本实例，因此只记录不上抛。
    pub fn notify(&self) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(e) = fs::write(&self.path, chrono::Utc::now().to_rfc3339()) {
            tracing::debug!(path = %self.path.display(), error = %e, "变更信号写入失败");
        }
    }

    /// 轮询：自上次检查以来信号是否被碰过
    pub fn changed(&mut self) -> bool {
        let current = Self::mtime(&self.path);
        if current != self.last_seen {
            self.last_seen = current;
            return current.is_some();
        }
        false
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn mtime(path: &PathBuf) -> Option<SystemTime> {
        fs::metadata(path).ok().and_then(|m| m.modified().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_no_change_without_notify() {
        let dir = TempDir::new().unwrap();
        let mut signal = ChangeSignal::new(dir.path().join("store.signal"));
        assert!(!signal.changed());
        assert!(!signal.changed());
    }

    #[test]
    fn test_notify_is_observed_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.signal");
        let mut reader = ChangeSignal::new(&path);

        let writer = ChangeSignal::new(&path);
        writer.notify();

        assert!(reader.changed());
        // 已消费的变更不重复触发
        assert!(!reader.changed());
    }

    #[test]
    fn test_missing_parent_dir_is_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("x.signal");
        let signal = ChangeSignal::new(&path);
        signal.notify();
        assert!(path.exists());
    }
}
