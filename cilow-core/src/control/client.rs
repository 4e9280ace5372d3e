use super::protocol::OutboundMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

struct Client {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// 当前唯一的控制通道客户端。
///
/// 新连接握手成功后直接替换旧的记录，不做多客户端广播。
#[derive(Default)]
pub struct ClientSlot {
    current: Mutex<Option<Client>>,
    next_id: AtomicU64,
}

impl ClientSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录新客户端，返回它的标识，断开时用来注销
    pub fn attach(&self, tx: mpsc::UnboundedSender<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut current = self.lock();
        if let Some(old) = current.replace(Client { id, tx }) {
            tracing::info!(old = old.id, new = id, "Control client replaced");
        } else {
            tracing::info!(id, "Control client attached");
        }
        id
    }

    /// 只有仍是当前客户端时才清除
    pub fn detach(&self, id: u64) {
        let mut current = self.lock();
        if current.as_ref().is_some_and(|c| c.id == id) {
            *current = None;
            tracing::info!(id, "Control client detached");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    /// 发送一条消息。没有客户端或发送失败时直接丢弃，返回 `false`。
    pub fn send(&self, message: &OutboundMessage) -> bool {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to serialize control message: {}", e);
                return false;
            }
        };

        let current = self.lock();
        let Some(client) = current.as_ref() else {
            tracing::debug!(%text, "No control client, message dropped");
            return false;
        };
        client.tx.send(text).is_ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Client>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_client_fails_silently() {
        let slot = ClientSlot::new();
        assert!(!slot.send(&OutboundMessage::connect_failed()));
    }

    #[test]
    fn new_client_replaces_previous() {
        let slot = ClientSlot::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let first = slot.attach(tx1);
        let second = slot.attach(tx2);
        assert_ne!(first, second);

        assert!(slot.send(&OutboundMessage::connect_failed()));
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), r#"{"event":"connect_ret","ret":false}"#);

        // 旧连接断开不影响新客户端
        slot.detach(first);
        assert!(slot.is_connected());
        slot.detach(second);
        assert!(!slot.is_connected());
    }
}
