//! 告警存储 - 有界、按时间倒序的内存索引 + JSONL 快照持久化
//!
//! 快照写入走 fs2 独占锁 + 临时文件 + 原子 rename，进程中途崩溃
//! 不会留下半截快照。容量淘汰优先保留未确认的高严重度事故记录。

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::record::AlertRecord;
use super::signal::ChangeSignal;
use crate::error::EngineError;

/// 默认容量上限
pub const DEFAULT_CAPACITY: usize = 100;

/// 带插入序号的存储项（等时间戳排序的稳定 tiebreak）
#[derive(Debug, Clone)]
struct StoredEntry {
    record: AlertRecord,
    seq: u64,
}

/// 告警存储
pub struct AlertStore {
    entries: Vec<StoredEntry>,
    next_seq: u64,
    capacity: usize,
    snapshot_path: PathBuf,
    signal: ChangeSignal,
    /// 上次持久化是否失败（失败时下次 reconcile 重试）
    dirty: bool,
}

impl AlertStore {
    /// 打开存储并从磁盘快照水合；快照不存在则从空开始
    pub fn open(snapshot_path: impl Into<PathBuf>, capacity: usize) -> Self {
        let snapshot_path = snapshot_path.into();
        let records = Self::read_snapshot(&snapshot_path);
        let next_seq = records.len() as u64;
        let entries = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| StoredEntry { record, seq: i as u64 })
            .collect();

        let signal = ChangeSignal::new(Self::signal_path(&snapshot_path));
        Self {
            entries,
            next_seq,
            capacity: capacity.max(1),
            snapshot_path,
            signal,
            dirty: false,
        }
    }

    /// 快照旁的信号文件路径
    pub fn signal_path(snapshot_path: &Path) -> PathBuf {
        snapshot_path.with_extension("signal")
    }

    /// 读取磁盘快照（坏行跳过，不致命）
    pub fn read_snapshot(path: &Path) -> Vec<AlertRecord> {
        if !path.exists() {
            return Vec::new();
        }
        let file = match File::open(path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };
        BufReader::new(file)
            .lines()
            .filter_map(|line| line.ok())
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(&line) {
                Ok(rec) => Some(rec),
                Err(e) => {
                    debug!(error = %e, "跳过快照中无法解析的行");
                    None
                }
            })
            .collect()
    }

    /// 插入新记录（调用方保证 id 不存在）
    pub fn insert(&mut self, record: AlertRecord) {
        self.entries.push(StoredEntry {
            record,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    /// 按 id 查找
    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut AlertRecord> {
        self.entries
            .iter_mut()
            .map(|e| &mut e.record)
            .find(|r| r.id == id)
    }

    /// 定位与给定记录同身份的已有记录
    ///
    /// 先按 id 精确匹配；否则按去重键（不同来源、同标签、时间窗内）匹配。
    pub fn find_match_mut(
        &mut self,
        record: &AlertRecord,
        window_secs: i64,
    ) -> Option<&mut AlertRecord> {
        if let Some(pos) = self.entries.iter().position(|e| e.record.id == record.id) {
            return Some(&mut self.entries[pos].record);
        }
        let pos = self
            .entries
            .iter()
            .position(|e| e.record.same_physical_event(record, window_secs))?;
        Some(&mut self.entries[pos].record)
    }

    /// 按时间倒序重排，等时间戳保持插入顺序
    pub fn resort(&mut self) {
        self.entries.sort_by(|a, b| {
            b.record
                .timestamp
                .cmp(&a.record.timestamp)
                .then(a.seq.cmp(&b.seq))
        });
    }

    /// 容量淘汰：先淘汰最旧的非保护记录，仍超限再淘汰最旧记录
    pub fn evict(&mut self) -> Vec<AlertRecord> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let idx = self
                .entries
                .iter()
                .rposition(|e| !e.record.is_protected())
                .unwrap_or(self.entries.len() - 1);
            evicted.push(self.entries.remove(idx).record);
        }
        evicted
    }

    /// 持久化快照：独占锁 + 临时文件 + 原子替换，成功后碰变更信号
    pub fn persist(&mut self) -> Result<(), EngineError> {
        let result = self.write_snapshot();
        match &result {
            Ok(()) => {
                self.dirty = false;
                self.signal.notify();
            }
            Err(_) => self.dirty = true,
        }
        result
    }

    fn write_snapshot(&self) -> Result<(), EngineError> {
        let path = &self.snapshot_path;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        lock.lock_exclusive()?;

        let temp_path = path.with_extension("tmp");
        let write_result = (|| -> Result<(), EngineError> {
            let mut temp = File::create(&temp_path)?;
            for entry in &self.entries {
                let line = serde_json::to_string(&entry.record)
                    .map_err(|e| EngineError::Persistence(e.to_string()))?;
                writeln!(temp, "{}", line)?;
            }
            fs::rename(&temp_path, path)?;
            Ok(())
        })();

        let _ = lock.unlock();
        write_result
    }

    /// 重新读取磁盘快照（其它实例写入后同步用）
    pub fn load_disk_records(&self) -> Vec<AlertRecord> {
        Self::read_snapshot(&self.snapshot_path)
    }

    /// 当前记录列表（按存储顺序克隆）
    pub fn records(&self) -> Vec<AlertRecord> {
        self.entries.iter().map(|e| e.record.clone()).collect()
    }

    /// 遍历可变引用（已读状态回放用）
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AlertRecord> {
        self.entries.iter_mut().map(|e| &mut e.record)
    }

    /// 未确认记录数
    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.record.acknowledged).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 管理操作：清空全部记录
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 上次持久化是否失败
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
