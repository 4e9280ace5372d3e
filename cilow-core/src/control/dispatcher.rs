use super::client::ClientSlot;
use super::protocol::{Credentials, InboundMessage, OutboundMessage};
use crate::wifi::ConnectionManager;
use crate::Error;
use std::sync::Arc;

/// 把控制通道的文本命令分发给连接管理器，扫描结果异步推回客户端
#[derive(Clone)]
pub struct Dispatcher {
    manager: ConnectionManager,
    clients: Arc<ClientSlot>,
}

impl Dispatcher {
    pub fn new(manager: ConnectionManager, clients: Arc<ClientSlot>) -> Self {
        Self { manager, clients }
    }

    pub async fn handle_text(&self, text: &str) {
        let Some(message) = InboundMessage::parse(text) else {
            return;
        };
        match message {
            InboundMessage::Scan(data) if data == "start" => self.start_scan().await,
            InboundMessage::Scan(data) => {
                tracing::debug!(data = %data, "Ignoring scan request with unknown payload");
            }
            InboundMessage::Connect(credentials) => self.connect(credentials).await,
        }
    }

    async fn start_scan(&self) {
        let handle = match self.manager.scan().await {
            Ok(handle) => handle,
            Err(Error::ScanBusy) => {
                tracing::info!("Wi-Fi is scanning");
                self.clients.send(&OutboundMessage::scan_failed());
                return;
            }
            Err(e) => {
                tracing::error!("Failed to start scan: {}", e);
                self.clients.send(&OutboundMessage::scan_failed());
                return;
            }
        };

        let clients = self.clients.clone();
        tokio::spawn(async move {
            let message = match handle.finished().await {
                Ok(list) => OutboundMessage::scan_ok(list),
                Err(e) => {
                    tracing::error!("Scan finished with error: {}", e);
                    OutboundMessage::scan_failed()
                }
            };
            clients.send(&message);
        });
    }

    async fn connect(&self, credentials: Credentials) {
        tracing::info!(ssid = %credentials.ssid, "Recv ssid");
        // 结果通过连接状态事件异步到达，这里不回复
        if let Err(e) = self.manager.connect(&credentials.ssid, &credentials.pass).await {
            tracing::error!(ssid = %credentials.ssid, "Station connect request failed: {}", e);
        }
    }
}
