//! 轮询适配器与后端 REST 客户端
//!
//! 固定间隔拉取一页告警（无指数退避，固定间隔本身就是节流），
//! 任何失败只记录日志、保持存储不动，等下一轮。令牌从文件加载，
//! 缺失时本轮跳过（AuthRequired），不致命。

use reqwest::StatusCode;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::alert::record::{SourceKind, WireAlert};
use crate::alert::reconciler::Reconciler;
use crate::engine::EngineEvent;
use crate::error::EngineError;

/// 检测后端 REST 客户端
///
/// 轮询与确认共用一个实例；令牌懒加载并缓存，401/403 时作废重读。
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    token_path: Option<PathBuf>,
    token: RwLock<Option<String>>,
}

/// 告警分页响应（兼容裸数组）
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AlertPage {
    Page { alerts: Vec<WireAlert> },
    Bare(Vec<WireAlert>),
}

impl AlertPage {
    fn into_alerts(self) -> Vec<WireAlert> {
        match self {
            AlertPage::Page { alerts } => alerts,
            AlertPage::Bare(alerts) => alerts,
        }
    }
}

impl BackendClient {
    pub fn new(
        base_url: impl Into<String>,
        token_path: Option<PathBuf>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            token_path,
            token: RwLock::new(None),
        })
    }

    /// 取令牌：优先内存缓存，其次从配置的文件读取
    fn bearer(&self) -> Result<String, EngineError> {
        if let Some(token) = self.token.read().unwrap().clone() {
            return Ok(token);
        }
        let path = self
            .token_path
            .as_ref()
            .ok_or_else(|| EngineError::AuthRequired("未配置访问令牌".to_string()))?;
        let raw = fs::read_to_string(path)
            .map_err(|e| EngineError::AuthRequired(format!("读取令牌失败: {}", e)))?;
        let token = raw.trim().to_string();
        if token.is_empty() {
            return Err(EngineError::AuthRequired("令牌文件为空".to_string()));
        }
        *self.token.write().unwrap() = Some(token.clone());
        Ok(token)
    }

    fn invalidate_token(&self) {
        *self.token.write().unwrap() = None;
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// 拉取最新一页告警
    pub async fn fetch_alerts(&self, limit: usize) -> Result<Vec<WireAlert>, EngineError> {
        let token = self.bearer()?;
        let url = self.endpoint(&format!("/api/alerts?limit={}", limit));

        let response = self.http.get(&url).bearer_auth(token).send().await?;
        match response.status() {
            status if status.is_success() => {
                let page: AlertPage = response.json().await?;
                Ok(page.into_alerts())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                self.invalidate_token();
                Err(EngineError::AuthRequired("后端拒绝当前令牌".to_string()))
            }
            status => Err(EngineError::TransientNetwork(format!("HTTP {}", status))),
        }
    }

    /// 标记一条告警已读（幂等，可安全重试）
    pub async fn acknowledge(&self, alert_id: &str) -> Result<(), EngineError> {
        let token = self.bearer()?;
        let url = self.endpoint(&format!("/api/alerts/{}/read", alert_id));

        let response = self.http.post(&url).bearer_auth(token).send().await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                self.invalidate_token();
                Err(EngineError::AuthRequired("后端拒绝当前令牌".to_string()))
            }
            status => Err(EngineError::TransientNetwork(format!("HTTP {}", status))),
        }
    }
}

/// 轮询适配器
pub struct PollAdapter {
    client: Arc<BackendClient>,
    reconciler: Arc<Reconciler>,
    interval: Duration,
    page_size: usize,
    events: broadcast::Sender<EngineEvent>,
    stop_rx: watch::Receiver<bool>,
}

impl PollAdapter {
    pub fn new(
        client: Arc<BackendClient>,
        reconciler: Arc<Reconciler>,
        interval: Duration,
        page_size: usize,
        events: broadcast::Sender<EngineEvent>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            reconciler,
            interval,
            page_size,
            events,
            stop_rx,
        }
    }

    /// 轮询主循环（首轮立即拉取，之后按固定间隔）
    ///
    /// 停止信号会取消还在途中的请求，不只是等它跑完。
    pub async fn run(self) {
        let mut stop_rx = self.stop_rx.clone();
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                res = stop_rx.changed() => {
                    if res.is_err() || *stop_rx.borrow() {
                        debug!("轮询适配器停止");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    tokio::select! {
                        res = stop_rx.changed() => {
                            if res.is_err() || *stop_rx.borrow() {
                                debug!("轮询适配器停止，取消在途请求");
                                return;
                            }
                        }
                        _ = self.poll_once() => {}
                    }
                }
            }
        }
    }

    /// 执行一轮拉取；所有失败被吞掉，存储保持不动
    pub async fn poll_once(&self) {
        match self.client.fetch_alerts(self.page_size).await {
            Ok(wire_alerts) => {
                let records = wire_alerts
                    .into_iter()
                    .map(|w| w.into_record(SourceKind::Poll))
                    .collect();
                let outcome = self.reconciler.reconcile(records, SourceKind::Poll);
                if !outcome.added.is_empty() {
                    debug!(added = outcome.added.len(), "轮询合并新增告警");
                }
            }
            Err(e @ EngineError::AuthRequired(_)) => {
                warn!(error = %e, "缺少有效令牌，本轮轮询跳过");
                let _ = self.events.send(EngineEvent::SyncFailed {
                    message: "需要重新登录后才能同步告警".to_string(),
                });
            }
            Err(e) => {
                // 不上抛、不退避：固定间隔的下一轮就是重试
                warn!(error = %e, "轮询失败，保持现有数据等待下一轮");
            }
        }
    }
}
