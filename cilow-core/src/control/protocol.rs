//! 控制通道文本帧的消息格式

use crate::traits::AccessPoint;
use serde::{Deserialize, Serialize};

/// 客户端发来的连接凭据
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub ssid: String,
    /// 开放网络可以省略
    #[serde(default)]
    pub pass: String,
}

/// 入站消息：`{"event": ..., "data": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum InboundMessage {
    /// 载荷为 `"start"` 时发起扫描
    Scan(String),
    Connect(Credentials),
}

impl InboundMessage {
    /// 解析一个文本帧。无法识别的事件和格式错误都返回 `None`。
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!("Dropping unrecognized control message: {}", e);
                None
            }
        }
    }
}

/// 出站消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboundMessage {
    ScanRet {
        ret: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        list: Option<Vec<AccessPoint>>,
    },
    ConnectRet {
        ret: bool,
    },
}

impl OutboundMessage {
    pub fn scan_ok(list: Vec<AccessPoint>) -> Self {
        Self::ScanRet { ret: true, list: Some(list) }
    }

    pub fn scan_failed() -> Self {
        Self::ScanRet { ret: false, list: None }
    }

    pub fn connect_failed() -> Self {
        Self::ConnectRet { ret: false }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
