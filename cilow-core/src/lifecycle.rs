//! 启动流程：先尝试 STA 联网，失败后切换到 AP+STA 配网模式

use crate::config::AppConfig;
use crate::control::{ClientSlot, ControlServer, Dispatcher, OutboundMessage, ProvisioningMode, ServerState};
use crate::traits::{AudioSink, RadioDriver, RadioEvent, UiAssetProvider};
use crate::wifi::{ConnectionManager, ConnectivityEvent};
use crate::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// 当前生效的回调组
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// 开机后的纯 STA 阶段
    StationOnly,
    /// 已进入配网模式
    Provisioning,
}

/// 组装连接管理器和控制服务，并根据连接状态事件驱动它们。
pub struct Supervisor {
    manager: ConnectionManager,
    server: Arc<ControlServer>,
    clients: Arc<ClientSlot>,
    radio_events: mpsc::UnboundedReceiver<RadioEvent>,
}

impl Supervisor {
    pub fn new(
        config: &AppConfig,
        radio: Arc<dyn RadioDriver>,
        radio_events: mpsc::UnboundedReceiver<RadioEvent>,
        sink: Arc<dyn AudioSink>,
        pages: Arc<dyn UiAssetProvider>,
    ) -> Self {
        let manager = ConnectionManager::new(
            radio,
            config.station.clone(),
            config.ap.clone(),
            config.dns.clone(),
        );
        let clients = Arc::new(ClientSlot::new());
        let state = Arc::new(ServerState {
            dispatcher: Dispatcher::new(manager.clone(), clients.clone()),
            clients: clients.clone(),
            sink,
            pages,
            index_page: config.server.index_page.clone(),
            portal_url: config.ap.portal_url(),
        });
        let server = Arc::new(ControlServer::new(state, config.server.clone()));

        Self {
            manager,
            server,
            clients,
            radio_events,
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn server(&self) -> &Arc<ControlServer> {
        &self.server
    }

    /// 启动无线电并一直运行。只有致命错误才会返回。
    pub async fn run(self) -> Result<()> {
        let Supervisor {
            manager,
            server,
            clients,
            radio_events,
        } = self;

        // 先订阅，避免错过启动阶段的事件
        let mut events = manager.subscribe();
        let event_loop = manager.spawn_event_loop(radio_events);

        let result = supervise(&manager, &server, &clients, &mut events).await;

        event_loop.abort();
        server.stop().await;
        result
    }
}

async fn supervise(
    manager: &ConnectionManager,
    server: &ControlServer,
    clients: &ClientSlot,
    events: &mut broadcast::Receiver<ConnectivityEvent>,
) -> Result<()> {
    manager.start_station().await?;
    let mut lifecycle = Lifecycle::StationOnly;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(lagged = n, "Supervisor missed connectivity events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        };
        lifecycle = on_event(lifecycle, event, manager, server, clients).await?;
    }
}

async fn on_event(
    lifecycle: Lifecycle,
    event: ConnectivityEvent,
    manager: &ConnectionManager,
    server: &ControlServer,
    clients: &ClientSlot,
) -> Result<Lifecycle> {
    match (lifecycle, event) {
        (Lifecycle::StationOnly, ConnectivityEvent::StationConnected(addr)) => {
            tracing::info!(%addr, "Station connected, starting control channel");
            server.start(ProvisioningMode::StationOnly).await?;
        }
        (Lifecycle::StationOnly, ConnectivityEvent::StationFailed) => {
            tracing::warn!("No reachable network, switching to provisioning mode");
            manager.enter_provisioning().await?;
            return Ok(Lifecycle::Provisioning);
        }
        (Lifecycle::Provisioning, ConnectivityEvent::ApStarted) => {
            server.start(ProvisioningMode::AccessPointWithStation).await?;
        }
        (Lifecycle::Provisioning, ConnectivityEvent::StationFailed) => {
            clients.send(&OutboundMessage::connect_failed());
        }
        (Lifecycle::Provisioning, ConnectivityEvent::StationConnected(addr)) => {
            tracing::info!(%addr, "Provisioned network connected");
        }
        (_, other) => tracing::debug!(?lifecycle, event = ?other, "No lifecycle action"),
    }
    Ok(lifecycle)
}
