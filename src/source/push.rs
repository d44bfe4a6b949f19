//! 推送通道 - 消息解码与传输抽象
//!
//! 推送端的消息是鸭子类型的 JSON：用带 `type` 标签的联合解码，
//! 未知类型安全落进 `Unknown` 被忽略，绝不因为新消息类型 panic。
//! 传输层抽象成 `PushConnector`/`PushConnection` 两个 trait，
//! 生产实现走 tokio-tungstenite，测试注入脚本化连接。

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::alert::record::{AlertPatch, WireAlert};
use crate::error::EngineError;

/// 推送通道消息（标签联合）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PushMessage {
    /// 握手确认
    ConnectionAck,
    /// 心跳（双向）
    Heartbeat,
    /// 心跳应答
    Pong,
    /// 订阅/身份标识（客户端 → 服务端）
    Subscribe { client: String },
    /// 新告警
    NewAlert { payload: WireAlert },
    /// 按 id 的部分更新
    UpdateAlert { payload: AlertPatch },
    /// 其它一切消息类型：忽略，不是错误
    #[serde(other)]
    Unknown,
}

/// 推送连接的建立方
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// 建立一条新连接（握手完成即返回）
    async fn connect(&self) -> Result<Box<dyn PushConnection>, EngineError>;
}

/// 一条已建立的推送连接
#[async_trait]
pub trait PushConnection: Send {
    /// 读取下一条消息；`Ok(None)` 表示对端正常关闭
    async fn next_message(&mut self) -> Result<Option<PushMessage>, EngineError>;

    /// 发送一条消息
    async fn send(&mut self, message: &PushMessage) -> Result<(), EngineError>;
}

/// 生产实现：WebSocket 连接器
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn PushConnection>, EngineError> {
        let (ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| EngineError::TransientNetwork(e.to_string()))?;
        Ok(Box::new(WsConnection { ws }))
    }
}

/// WebSocket 连接
pub struct WsConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for WsConnection {
    async fn next_message(&mut self) -> Result<Option<PushMessage>, EngineError> {
        while let Some(frame) = self.ws.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<PushMessage>(&text) {
                    Ok(message) => return Ok(Some(message)),
                    Err(e) => {
                        // 坏帧只丢弃自己，不污染连接
                        debug!(error = %e, "丢弃无法解析的推送帧");
                        continue;
                    }
                },
                // WS 层的 ping/pong 同样证明连接活着
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    return Ok(Some(PushMessage::Pong));
                }
                Ok(Message::Close(_)) => return Ok(None),
                Ok(_) => continue,
                Err(e) => return Err(EngineError::TransientNetwork(e.to_string())),
            }
        }
        Ok(None)
    }

    async fn send(&mut self, message: &PushMessage) -> Result<(), EngineError> {
        let text =
            serde_json::to_string(message).map_err(|e| EngineError::Decode(e.to_string()))?;
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| EngineError::TransientNetwork(e.to_string()))
    }
}
