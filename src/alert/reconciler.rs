//! Reconciler - 把各适配器的批次合并进规范存储
//!
//! 写路径由互斥锁串行化（同一时刻最多一次 reconcile），读路径走
//! ArcSwap 原子交换的不可变快照，UI 读取无锁。持久化失败不影响
//! 内存合并结果，留待下一轮补写。

use arc_swap::ArcSwap;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::read_state::ReadStateTracker;
use super::record::{AlertPatch, AlertRecord, SourceKind};
use super::store::AlertStore;
use crate::engine::EngineEvent;

/// 一次 reconcile 的结果
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    /// 合并后的完整有序列表（UI 展示用）
    pub merged: Vec<AlertRecord>,
    /// 真正新增的记录（仅这些是通知候选，防止每轮轮询重复打扰）
    pub added: Vec<AlertRecord>,
}

/// 确认操作的结果
#[derive(Debug, Clone, Copy)]
pub struct AckOutcome {
    /// 记录的来源（本地检测记录不向服务端传播）
    pub source_kind: SourceKind,
    /// 本次是否真的发生了确认（false = 早已确认，幂等）
    pub newly_acknowledged: bool,
}

/// 告警合并器
pub struct Reconciler {
    store: Mutex<AlertStore>,
    snapshot: ArcSwap<Vec<AlertRecord>>,
    read_state: Arc<Mutex<ReadStateTracker>>,
    dedup_window_secs: i64,
    events: broadcast::Sender<EngineEvent>,
}

impl Reconciler {
    pub fn new(
        store: AlertStore,
        read_state: Arc<Mutex<ReadStateTracker>>,
        dedup_window_secs: i64,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let initial = store.records();
        Self {
            store: Mutex::new(store),
            snapshot: ArcSwap::from_pointee(initial),
            read_state,
            dedup_window_secs,
            events,
        }
    }

    /// 合并一个批次
    ///
    /// 批次可以为空、可以乱序。精确 id 匹配优先，其次按去重键匹配；
    /// 命中则就地合并（先到者优先、确认单调、保留较早时间戳），
    /// 未命中则作为新记录插入并进入 `added`。
    pub fn reconcile(&self, incoming: Vec<AlertRecord>, source: SourceKind) -> ReconcileOutcome {
        let mut store = self.store.lock().unwrap();
        let mut added = Vec::new();
        let batch_size = incoming.len();

        {
            let read_state = self.read_state.lock().unwrap();
            for mut record in incoming {
                read_state.merge_into(&mut record);
                match store.find_match_mut(&record, self.dedup_window_secs) {
                    Some(existing) => {
                        existing.merge_from(&record);
                    }
                    None => {
                        store.insert(record.clone());
                        added.push(record);
                    }
                }
            }
        }

        if batch_size > 0 {
            self.commit(&mut store);
        }
        debug!(
            source = %source,
            batch = batch_size,
            added = added.len(),
            total = store.len(),
            "Reconcile completed"
        );

        let merged = store.records();
        drop(store);

        for record in &added {
            let _ = self.events.send(EngineEvent::AlertAdded(record.clone()));
        }

        ReconcileOutcome { merged, added }
    }

    /// 应用服务端的部分更新（push update-alert 帧）
    ///
    /// id 未知时静默丢弃——可能指向一条已被容量淘汰的记录，不算错误。
    pub fn apply_patch(&self, patch: &AlertPatch) {
        let mut store = self.store.lock().unwrap();
        match store.find_by_id_mut(&patch.id) {
            Some(record) => {
                if record.apply_patch(patch) {
                    self.commit(&mut store);
                }
            }
            None => debug!(alert_id = %patch.id, "丢弃指向未知记录的部分更新"),
        }
    }

    /// 乐观本地确认
    ///
    /// 返回 None 表示 id 不在存储中。已确认的记录幂等返回。
    pub fn acknowledge_local(&self, id: &str) -> Option<AckOutcome> {
        let mut store = self.store.lock().unwrap();
        let record = store.find_by_id_mut(id)?;
        let source_kind = record.source_kind;

        if record.acknowledged {
            return Some(AckOutcome {
                source_kind,
                newly_acknowledged: false,
            });
        }

        record.acknowledged = true;
        record.acknowledged_at = Some(Utc::now());

        {
            let mut read_state = self.read_state.lock().unwrap();
            if let Err(e) = read_state.mark_acknowledged(id) {
                warn!(alert_id = %id, error = %e, "已读状态持久化失败，保留内存状态");
            }
        }

        self.commit(&mut store);
        Some(AckOutcome {
            source_kind,
            newly_acknowledged: true,
        })
    }

    /// 回滚一次乐观确认（服务端传播失败）
    pub fn revert_acknowledge(&self, id: &str) {
        let mut store = self.store.lock().unwrap();
        if let Some(record) = store.find_by_id_mut(id) {
            record.acknowledged = false;
            record.acknowledged_at = None;
        }
        {
            let mut read_state = self.read_state.lock().unwrap();
            if let Err(e) = read_state.revert(id) {
                warn!(alert_id = %id, error = %e, "已读状态回滚落盘失败");
            }
        }
        self.commit(&mut store);
    }

    /// 管理操作：清空存储并持久化空快照（已读集合保留）
    pub fn clear_all(&self) {
        let mut store = self.store.lock().unwrap();
        store.clear();
        self.commit(&mut store);
    }

    /// 其它实例写过快照后，把磁盘状态合并进内存视图
    ///
    /// 只合并不回写：写方已经持久化过，这里回写会造成信号乒乓。
    pub fn sync_from_disk(&self) {
        let mut store = self.store.lock().unwrap();
        let disk_records = store.load_disk_records();
        let mut changed = false;

        {
            let read_state = self.read_state.lock().unwrap();
            for mut record in disk_records {
                read_state.merge_into(&mut record);
                match store.find_by_id_mut(&record.id) {
                    Some(existing) => {
                        if existing.merge_from(&record) {
                            changed = true;
                        }
                    }
                    None => {
                        store.insert(record);
                        changed = true;
                    }
                }
            }
        }

        if changed {
            store.resort();
            store.evict();
            self.publish(&store);
        }
    }

    /// 已读集合变化后（本进程或其它实例），把集合回放到现有记录上
    pub fn reapply_read_state(&self) {
        let mut store = self.store.lock().unwrap();
        let mut changed = false;
        {
            let read_state = self.read_state.lock().unwrap();
            for record in store.iter_mut() {
                if !record.acknowledged && read_state.is_acknowledged(&record.id) {
                    record.acknowledged = true;
                    record.acknowledged_at = read_state.acked_at(&record.id);
                    changed = true;
                }
            }
        }
        if changed {
            self.commit(&mut store);
        }
    }

    /// 上次持久化失败时补写快照
    pub fn retry_persist_if_dirty(&self) {
        let mut store = self.store.lock().unwrap();
        if store.is_dirty() {
            match store.persist() {
                Ok(()) => debug!("快照补写成功"),
                Err(e) => warn!(error = %e, "快照补写仍然失败，继续等待下一轮"),
            }
        }
    }

    /// 当前只读快照
    pub fn snapshot(&self) -> Arc<Vec<AlertRecord>> {
        self.snapshot.load_full()
    }

    /// 已读状态追踪器句柄（跨实例同步循环用）
    pub fn read_state(&self) -> Arc<Mutex<ReadStateTracker>> {
        self.read_state.clone()
    }

    /// 未确认记录数
    pub fn unread_count(&self) -> usize {
        self.snapshot.load().iter().filter(|r| !r.acknowledged).count()
    }

    /// 排序、淘汰、持久化、交换快照、广播变更
    fn commit(&self, store: &mut AlertStore) {
        store.resort();
        let evicted = store.evict();
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "容量淘汰旧记录");
        }
        if let Err(e) = store.persist() {
            // 内存合并结果不受影响，失败只记录并等待补写
            warn!(error = %e, "快照持久化失败，将在下一轮重试");
        }
        self.publish(store);
    }

    fn publish(&self, store: &AlertStore) {
        let records = store.records();
        let total = records.len();
        let unread = records.iter().filter(|r| !r.acknowledged).count();
        self.snapshot.store(Arc::new(records));
        let _ = self
            .events
            .send(EngineEvent::StoreChanged { total, unread });
    }
}
