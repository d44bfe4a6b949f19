//! 告警记录数据模型
//!
//! `AlertRecord` 是全引擎的规范表示：三个来源适配器各自解码出的记录
//! 都归一到这个结构，再交给 Reconciler 合并。记录一旦创建即视为不可变，
//! 只有两类例外：(a) 去重合并补全字段，(b) 确认操作。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// 记录来源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// 推送通道（WebSocket）
    Push,
    /// 轮询 REST 接口
    Poll,
    /// 本地检测器队列
    LocalDetector,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Push => "push",
            SourceKind::Poll => "poll",
            SourceKind::LocalDetector => "local_detector",
        }
    }

    /// 生成 id 时使用的短前缀
    fn id_prefix(&self) -> &'static str {
        match self {
            SourceKind::Push => "push",
            SourceKind::Poll => "poll",
            SourceKind::LocalDetector => "det",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 严重程度
///
/// 由置信度确定性推导：confidence > 0.8 为 High，否则为 Medium。
/// Low 不会由推导产生，仅用于兼容后端直接下发 `"low"` 的场合。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// 按置信度推导严重程度
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.8 {
            Severity::High
        } else {
            Severity::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 告警记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    /// 全局唯一 id，由最先观测到事件的适配器分配，合并时绝不重新生成
    pub id: String,
    /// 底层事件发生的时刻
    pub timestamp: DateTime<Utc>,
    /// 最先观测到该事件的来源
    pub source_kind: SourceKind,
    /// 严重程度
    pub severity: Severity,
    /// 置信度 [0, 1]
    pub confidence: f64,
    /// 是否为阳性检测（事故）
    pub accident_detected: bool,
    /// 位置描述（可缺省）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// 来源标签（摄像头/检测器名，去重键的一部分，可缺省）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// 是否已确认（单调：一旦为 true 不会被合并回 false）
    #[serde(default)]
    pub acknowledged: bool,
    /// 确认时刻
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// 透传元数据，引擎不解释，仅供下游展示
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub raw_metadata: serde_json::Map<String, serde_json::Value>,
}

impl AlertRecord {
    /// 创建新记录，severity 由置信度推导
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        source_kind: SourceKind,
        confidence: f64,
        accident_detected: bool,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            source_kind,
            severity: Severity::from_confidence(confidence),
            confidence,
            accident_detected,
            location: None,
            label: None,
            acknowledged: false,
            acknowledged_at: None,
            raw_metadata: serde_json::Map::new(),
        }
    }

    /// 设置位置（链式调用）
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// 设置来源标签（链式调用）
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// 去重标签：优先 label，缺省时退回 location
    pub fn source_label(&self) -> Option<&str> {
        self.label.as_deref().or(self.location.as_deref())
    }

    /// 判断两条不同 id 的记录是否描述同一物理事件
    ///
    /// 规则：来自不同来源、去重标签相同且非空、时间戳相差不超过窗口。
    pub fn same_physical_event(&self, other: &AlertRecord, window_secs: i64) -> bool {
        if self.source_kind == other.source_kind {
            return false;
        }
        let (Some(a), Some(b)) = (self.source_label(), other.source_label()) else {
            return false;
        };
        if a != b {
            return false;
        }
        (self.timestamp - other.timestamp).num_seconds().abs() <= window_secs
    }

    /// 合并另一条描述同一事件的记录（self 为先到者，保留其身份）
    ///
    /// - 只补全先到者缺失的字段，不覆盖已有值（先到者优先）
    /// - `acknowledged` 单调：任何一方为 true 则结果为 true
    /// - 保留较早的时间戳
    ///
    /// 返回是否发生了实际变化。
    pub fn merge_from(&mut self, other: &AlertRecord) -> bool {
        let mut changed = false;

        if self.location.is_none() && other.location.is_some() {
            self.location = other.location.clone();
            changed = true;
        }
        if self.label.is_none() && other.label.is_some() {
            self.label = other.label.clone();
            changed = true;
        }
        for (key, value) in &other.raw_metadata {
            if !self.raw_metadata.contains_key(key) {
                self.raw_metadata.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        if other.timestamp < self.timestamp {
            self.timestamp = other.timestamp;
            changed = true;
        }
        if other.acknowledged && !self.acknowledged {
            self.acknowledged = true;
            self.acknowledged_at = other.acknowledged_at.or_else(|| Some(Utc::now()));
            changed = true;
        }

        changed
    }

    /// 是否为不可被优先淘汰的关键记录（未确认的高严重度事故）
    pub fn is_protected(&self) -> bool {
        !self.acknowledged && self.accident_detected && self.severity == Severity::High
    }

    /// 应用服务端的部分更新（update-alert 帧）
    ///
    /// id 与时间戳不变；`acknowledged` 只接受 false → true 的变化。
    pub fn apply_patch(&mut self, patch: &AlertPatch) -> bool {
        let mut changed = false;

        if let Some(confidence) = patch.confidence {
            if (confidence - self.confidence).abs() > f64::EPSILON {
                self.confidence = confidence;
                self.severity = patch
                    .severity
                    .unwrap_or_else(|| Severity::from_confidence(confidence));
                changed = true;
            }
        } else if let Some(severity) = patch.severity {
            if severity != self.severity {
                self.severity = severity;
                changed = true;
            }
        }
        if let Some(accident) = patch.accident_detected {
            if accident != self.accident_detected {
                self.accident_detected = accident;
                changed = true;
            }
        }
        if let Some(location) = &patch.location {
            if self.location.as_deref() != Some(location.as_str()) {
                self.location = Some(location.clone());
                changed = true;
            }
        }
        if let Some(label) = &patch.label {
            if self.label.as_deref() != Some(label.as_str()) {
                self.label = Some(label.clone());
                changed = true;
            }
        }
        if patch.acknowledged == Some(true) && !self.acknowledged {
            self.acknowledged = true;
            self.acknowledged_at = Some(Utc::now());
            changed = true;
        }

        changed
    }
}

/// 服务端 update-alert 帧携带的部分记录（按 id 定位）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accident_detected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged: Option<bool>,
}

/// 线上传输的告警形状
///
/// 三个来源共用：轮询响应、推送 new-alert 帧、本地检测队列行。
/// 字段尽量宽容：id/时间戳/严重程度缺省时由适配器补齐，
/// 未识别的字段统一收进透传元数据。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireAlert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub accident_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub acknowledged: bool,
    /// 其余字段全部透传
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WireAlert {
    /// 归一化为规范记录；id 缺失时由适配器按内容生成
    pub fn into_record(self, source: SourceKind) -> AlertRecord {
        let timestamp = self.timestamp.unwrap_or_else(Utc::now);
        let id = match self.id.filter(|s| !s.trim().is_empty()) {
            Some(id) => id,
            None => generate_alert_id(source, self.label.as_deref(), timestamp),
        };
        let severity = self
            .severity
            .unwrap_or_else(|| Severity::from_confidence(self.confidence));
        let acknowledged_at = if self.acknowledged { Some(timestamp) } else { None };

        AlertRecord {
            id,
            timestamp,
            source_kind: source,
            severity,
            confidence: self.confidence,
            accident_detected: self.accident_detected,
            location: self.location,
            label: self.label,
            acknowledged: self.acknowledged,
            acknowledged_at,
            raw_metadata: self.extra,
        }
    }
}

/// 为缺失 id 的事件生成确定性 id
///
/// 同一 (来源, 标签, 时刻) 总是得到同一 id，这样队列重读不会制造重复记录。
pub fn generate_alert_id(
    source: SourceKind,
    label: Option<&str>,
    timestamp: DateTime<Utc>,
) -> String {
    let mut hasher = DefaultHasher::new();
    source.as_str().hash(&mut hasher);
    label.unwrap_or_default().hash(&mut hasher);
    timestamp.timestamp_millis().hash(&mut hasher);
    format!("{}-{:016x}", source.id_prefix(), hasher.finish())
}
