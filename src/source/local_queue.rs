//! 本地检测器队列适配器
//!
//! 外部检测进程向一个追加式 JSONL 队列写入检测事件，本适配器是
//! 纯读方：按字节偏移增量拉取，绝不截断、绝不删除已读条目——
//! 重复投递交给存储自己的去重处理。队列被别的进程并发写入，
//! 读取用共享锁，且只消费完整行（半行留到下一轮）。

use fs2::FileExt;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::alert::record::{AlertRecord, SourceKind, WireAlert};
use crate::alert::reconciler::Reconciler;
use crate::error::EngineError;

/// 本地队列适配器
pub struct LocalQueueAdapter {
    queue_path: PathBuf,
    check_interval: Duration,
    reconciler: Arc<Reconciler>,
    stop_rx: watch::Receiver<bool>,
    /// 已消费的字节偏移
    offset: u64,
}

impl LocalQueueAdapter {
    pub fn new(
        queue_path: impl Into<PathBuf>,
        check_interval: Duration,
        reconciler: Arc<Reconciler>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue_path: queue_path.into(),
            check_interval,
            reconciler,
            stop_rx,
            offset: 0,
        }
    }

    /// 监视主循环：固定间隔检查队列增量
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.check_interval);
        loop {
            let stopped = tokio::select! {
                res = self.stop_rx.changed() => res.is_err() || *self.stop_rx.borrow(),
                _ = ticker.tick() => false,
            };
            if stopped {
                debug!("本地队列适配器停止");
                return;
            }
            self.drain_once();
        }
    }

    /// 消费一轮新条目，返回本轮条数（失败吞掉，下轮重试）
    pub fn drain_once(&mut self) -> usize {
        match self.read_new() {
            Ok(batch) if !batch.is_empty() => {
                let count = batch.len();
                self.reconciler
                    .reconcile(batch, SourceKind::LocalDetector);
                debug!(count, "本地检测队列消费新条目");
                count
            }
            Ok(_) => 0,
            Err(e) => {
                warn!(error = %e, "读取本地检测队列失败，下一轮重试");
                0
            }
        }
    }

    /// 从偏移处读取全部完整行并解码
    fn read_new(&mut self) -> Result<Vec<AlertRecord>, EngineError> {
        if !self.queue_path.exists() {
            return Ok(Vec::new());
        }

        let len = fs::metadata(&self.queue_path)?.len();
        if len < self.offset {
            // 队列被轮转/重建，从头重读；重复条目靠存储去重
            debug!("队列文件变短，偏移重置重新读取");
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        let file = File::open(&self.queue_path)?;
        file.lock_shared()?;
        let read_result = (|| -> Result<String, EngineError> {
            let mut reader = BufReader::new(&file);
            reader.seek(SeekFrom::Start(self.offset))?;
            let mut buf = String::new();
            reader.read_to_string(&mut buf)?;
            Ok(buf)
        })();
        let _ = file.unlock();
        let buf = read_result?;

        // 只消费完整行，写方写到一半的尾巴等下一轮
        let consumed = buf.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let complete = &buf[..consumed];
        self.offset += consumed as u64;

        let records = complete
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<WireAlert>(line) {
                Ok(wire) => Some(wire.into_record(SourceKind::LocalDetector)),
                Err(e) => {
                    // 坏行只丢自己，不污染批次
                    debug!(error = %e, "跳过无法解析的队列行");
                    None
                }
            })
            .collect();
        Ok(records)
    }
}
