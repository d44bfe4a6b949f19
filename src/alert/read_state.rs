//! 已读状态追踪 - 跨进程持久化的已确认 id 集合
//!
//! 独立于快照存在：快照可以被重建/淘汰，确认状态必须活得更久。
//! 每次 reconcile 都会把这个集合合并回新拉取的记录；多实例并发写
//! 通过"独占锁内读-改-写"避免互相覆盖，落盘后碰变更信号。

use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::record::AlertRecord;
use super::signal::ChangeSignal;
use crate::error::EngineError;

/// 已读状态追踪器
pub struct ReadStateTracker {
    state_path: PathBuf,
    signal: ChangeSignal,
    /// 内存缓存：id -> 确认时刻
    acked: HashMap<String, DateTime<Utc>>,
}

impl ReadStateTracker {
    /// 打开追踪器并加载现有状态
    pub fn open(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let acked = Self::read_state(&state_path);
        let signal = ChangeSignal::new(Self::signal_path(&state_path));
        Self {
            state_path,
            signal,
            acked,
        }
    }

    /// 状态文件旁的信号文件路径
    pub fn signal_path(state_path: &Path) -> PathBuf {
        state_path.with_extension("signal")
    }

    fn read_state(path: &Path) -> HashMap<String, DateTime<Utc>> {
        if !path.exists() {
            return HashMap::new();
        }
        match fs::read_to_string(path) {
            Ok(content) if !content.trim().is_empty() => {
                serde_json::from_str(&content).unwrap_or_else(|e| {
                    debug!(error = %e, "已读状态文件无法解析，按空集合处理");
                    HashMap::new()
                })
            }
            _ => HashMap::new(),
        }
    }

    /// 重新从磁盘加载（其它实例写入后）
    pub fn reload(&mut self) {
        self.acked = Self::read_state(&self.state_path);
    }

    pub fn is_acknowledged(&self, id: &str) -> bool {
        self.acked.contains_key(id)
    }

    pub fn acked_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.acked.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.acked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acked.is_empty()
    }

    /// 把已读集合合并进一条新拉取的记录
    ///
    /// 集合里有的 id 一律重新标记为已确认，适配器报什么不重要。
    pub fn merge_into(&self, record: &mut AlertRecord) {
        if !record.acknowledged {
            if let Some(at) = self.acked_at(&record.id) {
                record.acknowledged = true;
                record.acknowledged_at = Some(at);
            }
        }
    }

    /// 标记一条记录已确认并持久化
    pub fn mark_acknowledged(&mut self, id: &str) -> Result<(), EngineError> {
        let at = Utc::now();
        self.mutate(|disk| {
            disk.entry(id.to_string()).or_insert(at);
        })
    }

    /// 回滚一次乐观确认（服务端传播失败时）
    pub fn revert(&mut self, id: &str) -> Result<(), EngineError> {
        self.mutate(|disk| {
            disk.remove(id);
        })
    }

    /// 清空集合（仅测试/维护用途）
    pub fn clear(&mut self) -> Result<(), EngineError> {
        self.mutate(|disk| disk.clear())
    }

    /// 独占锁内读-改-写：并发实例的写入先合并再落盘
    fn mutate<F>(&mut self, apply: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut HashMap<String, DateTime<Utc>>),
    {
        if let Some(parent) = self.state_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.state_path)?;
        lock.lock_exclusive()?;

        let result = (|| -> Result<HashMap<String, DateTime<Utc>>, EngineError> {
            // 锁内重读，吸收其它实例的并发写入
            let mut content = String::new();
            let mut reader = &lock;
            reader.read_to_string(&mut content)?;
            let mut disk: HashMap<String, DateTime<Utc>> = if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content).unwrap_or_default()
            };

            apply(&mut disk);

            let temp_path = self.state_path.with_extension("tmp");
            let serialized = serde_json::to_string_pretty(&disk)
                .map_err(|e| EngineError::Persistence(e.to_string()))?;
            fs::write(&temp_path, serialized)?;
            fs::rename(&temp_path, &self.state_path)?;
            Ok(disk)
        })();

        let _ = lock.unlock();

        let disk = result?;
        self.acked = disk;
        self.signal.notify();
        Ok(())
    }
}
