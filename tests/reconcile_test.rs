//! 多来源合并全流程集成测试
//!
//! 覆盖规范的可测性质：去重不变量、确认单调性、有序性、容量上界，
//! 以及跨实例（多进程 UI）通过共享文件与变更信号保持一致的路径。

use std::sync::{Arc, Mutex};

use chrono::{Duration as ChronoDuration, Utc};
use tempfile::TempDir;
use tokio::sync::broadcast;

use accident_alert_monitor::{
    AlertRecord, AlertStore, ChangeSignal, ReadStateTracker, Reconciler, SourceKind,
};

fn build_reconciler(dir: &TempDir, capacity: usize) -> Arc<Reconciler> {
    let store = AlertStore::open(dir.path().join("snapshot.jsonl"), capacity);
    let read_state = Arc::new(Mutex::new(ReadStateTracker::open(
        dir.path().join("read_state.json"),
    )));
    let (events, _) = broadcast::channel(256);
    Arc::new(Reconciler::new(store, read_state, 5, events))
}

fn record(id: &str, offset_secs: i64, source: SourceKind) -> AlertRecord {
    AlertRecord::new(
        id,
        Utc::now() + ChronoDuration::seconds(offset_secs),
        source,
        0.9,
        true,
    )
}

#[test]
fn test_one_event_three_sources_one_record() {
    let dir = TempDir::new().unwrap();
    let reconciler = build_reconciler(&dir, 50);
    let base = Utc::now();

    // 同一物理事件：推送先到，轮询和本地检测在 5 秒窗口内跟进
    let push = AlertRecord::new("push-1", base, SourceKind::Push, 0.9, true).with_label("cam-01");
    let poll = AlertRecord::new(
        "poll-7",
        base + ChronoDuration::seconds(2),
        SourceKind::Poll,
        0.8,
        true,
    )
    .with_label("cam-01");
    let local = AlertRecord::new(
        "det-3",
        base + ChronoDuration::seconds(4),
        SourceKind::LocalDetector,
        0.7,
        true,
    )
    .with_label("cam-01");

    reconciler.reconcile(vec![push], SourceKind::Push);
    reconciler.reconcile(vec![poll], SourceKind::Poll);
    reconciler.reconcile(vec![local], SourceKind::LocalDetector);

    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.len(), 1, "去重不变量：同一事件只有一条记录");
    assert_eq!(snapshot[0].id, "push-1", "先到者保住身份");
    assert_eq!(snapshot[0].source_kind, SourceKind::Push);
}

#[test]
fn test_same_id_then_acknowledged_from_other_source() {
    // Push 先到 a1，Poll 带着 acknowledged=true 再到同一个 a1
    let dir = TempDir::new().unwrap();
    let reconciler = build_reconciler(&dir, 50);
    let ts = Utc::now();

    reconciler.reconcile(
        vec![AlertRecord::new("a1", ts, SourceKind::Push, 0.9, true)],
        SourceKind::Push,
    );
    let mut acked = AlertRecord::new("a1", ts, SourceKind::Poll, 0.9, true);
    acked.acknowledged = true;
    let outcome = reconciler.reconcile(vec![acked], SourceKind::Poll);

    assert_eq!(outcome.merged.len(), 1);
    assert!(outcome.merged[0].acknowledged);
    assert!(outcome.added.is_empty());
}

#[test]
fn test_acknowledge_survives_restart() {
    let dir = TempDir::new().unwrap();
    let ts = Utc::now();

    {
        let reconciler = build_reconciler(&dir, 50);
        reconciler.reconcile(
            vec![record("a1", 0, SourceKind::Poll)],
            SourceKind::Poll,
        );
        reconciler.acknowledge_local("a1").unwrap();
    }

    // 进程重启：存储重建，确认状态活下来
    let reconciler = build_reconciler(&dir, 50);
    assert!(reconciler.snapshot()[0].acknowledged);

    // 即使快照整个没了，已读集合也能把新拉到的同 id 记录重新标记
    std::fs::remove_file(dir.path().join("snapshot.jsonl")).unwrap();
    let rebuilt = build_reconciler(&dir, 50);
    let outcome = rebuilt.reconcile(
        vec![AlertRecord::new(
            "a1",
            ts,
            SourceKind::Poll,
            0.9,
            true,
        )],
        SourceKind::Poll,
    );
    assert!(outcome.merged[0].acknowledged);
}

#[test]
fn test_ordering_and_capacity_after_mixed_batches() {
    let dir = TempDir::new().unwrap();
    let reconciler = build_reconciler(&dir, 5);

    // 三个来源乱序到达 12 条不同事件
    for i in 0..4i64 {
        reconciler.reconcile(
            vec![record(&format!("p{}", i), i * 7 % 11, SourceKind::Poll)],
            SourceKind::Poll,
        );
        reconciler.reconcile(
            vec![record(&format!("w{}", i), i * 13 % 17, SourceKind::Push)],
            SourceKind::Push,
        );
        reconciler.reconcile(
            vec![record(&format!("d{}", i), i * 3 % 7, SourceKind::LocalDetector)],
            SourceKind::LocalDetector,
        );
    }

    let snapshot = reconciler.snapshot();
    assert!(snapshot.len() <= 5, "容量上界必须在每轮 reconcile 后成立");
    for pair in snapshot.windows(2) {
        assert!(
            pair[0].timestamp >= pair[1].timestamp,
            "时间戳必须非递增"
        );
    }
}

#[test]
fn test_cross_instance_snapshot_sync() {
    let dir = TempDir::new().unwrap();
    let snapshot_path = dir.path().join("snapshot.jsonl");

    // 实例 B 先挂上信号监视
    let instance_b = build_reconciler(&dir, 50);
    let mut signal = ChangeSignal::new(AlertStore::signal_path(&snapshot_path));

    // 实例 A 写入一条告警并持久化
    let instance_a = build_reconciler(&dir, 50);
    instance_a.reconcile(
        vec![record("from-a", 0, SourceKind::Push)],
        SourceKind::Push,
    );

    // 实例 B 看到信号后合并磁盘状态
    assert!(signal.changed());
    assert!(instance_b.snapshot().is_empty());
    instance_b.sync_from_disk();
    assert_eq!(instance_b.snapshot().len(), 1);
    assert_eq!(instance_b.snapshot()[0].id, "from-a");
}

#[test]
fn test_cross_instance_read_state_sync() {
    let dir = TempDir::new().unwrap();

    let instance_a = build_reconciler(&dir, 50);
    let instance_b = build_reconciler(&dir, 50);
    let shared = record("a1", 0, SourceKind::Poll);
    instance_a.reconcile(vec![shared.clone()], SourceKind::Poll);
    instance_b.reconcile(vec![shared], SourceKind::Poll);

    // A 确认；B 重载集合并回放后看到同样的已读状态
    instance_a.acknowledge_local("a1").unwrap();
    assert!(!instance_b.snapshot()[0].acknowledged);

    instance_b.read_state().lock().unwrap().reload();
    instance_b.reapply_read_state();
    assert!(instance_b.snapshot()[0].acknowledged);
    assert_eq!(instance_b.unread_count(), 0);
}

#[test]
fn test_merge_fills_fields_without_stealing_identity() {
    let dir = TempDir::new().unwrap();
    let reconciler = build_reconciler(&dir, 50);
    let base = Utc::now();

    let sparse = AlertRecord::new("push-1", base, SourceKind::Push, 0.9, true).with_label("cam-01");
    let rich = AlertRecord::new(
        "poll-2",
        base + ChronoDuration::seconds(1),
        SourceKind::Poll,
        0.6,
        true,
    )
    .with_label("cam-01")
    .with_location("滨江大道与园区路交叉口");

    reconciler.reconcile(vec![sparse], SourceKind::Push);
    reconciler.reconcile(vec![rich], SourceKind::Poll);

    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.len(), 1);
    let merged = &snapshot[0];
    assert_eq!(merged.id, "push-1");
    // 补全了缺失的位置，但置信度保持先到者
    assert_eq!(merged.location.as_deref(), Some("滨江大道与园区路交叉口"));
    assert!((merged.confidence - 0.9).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_reconcile_is_safe_under_concurrent_producers() {
    // 三个"适配器"并发打同一个 reconciler：互斥串行化保证不双插
    let dir = TempDir::new().unwrap();
    let reconciler = build_reconciler(&dir, 200);
    let base = Utc::now();

    let mut handles = Vec::new();
    for source in [SourceKind::Push, SourceKind::Poll, SourceKind::LocalDetector] {
        let reconciler = reconciler.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..50 {
                // 三个来源各自报同一批事件 id
                let rec = AlertRecord::new(
                    format!("shared-{}", i),
                    base + ChronoDuration::seconds(i),
                    source,
                    0.9,
                    true,
                );
                reconciler.reconcile(vec![rec], source);
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // 同 id 绝不重复
    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.len(), 50);
    let mut ids: Vec<&str> = snapshot.iter().map(|r| r.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 50);
}

#[test]
fn test_persistence_failure_keeps_memory_state() {
    let dir = TempDir::new().unwrap();
    // 快照路径指向一个"目录"，持久化必然失败
    let bogus = dir.path().join("snapshot.jsonl");
    std::fs::create_dir_all(&bogus).unwrap();

    let store = AlertStore::open(&bogus, 50);
    let read_state = Arc::new(Mutex::new(ReadStateTracker::open(
        dir.path().join("read_state.json"),
    )));
    let (events, _) = broadcast::channel(64);
    let reconciler = Reconciler::new(store, read_state, 5, events);

    // 持久化失败不可见：内存合并照常成功返回
    let outcome = reconciler.reconcile(
        vec![record("a1", 0, SourceKind::Poll)],
        SourceKind::Poll,
    );
    assert_eq!(outcome.added.len(), 1);
    assert_eq!(reconciler.snapshot().len(), 1);

    // 补写重试也不 panic
    reconciler.retry_persist_if_dirty();
}
