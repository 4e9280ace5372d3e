use super::client::ClientSlot;
use super::dispatcher::Dispatcher;
use super::session::Session;
use super::ProvisioningMode;
use crate::config::ServerConfig;
use crate::traits::{AudioSink, UiAssetProvider};
use crate::Result;
use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// 各平台的联网检测地址，配网模式下全部重定向到配置页
pub const CAPTIVE_PORTAL_PATHS: [&str; 11] = [
    "/hotspot-detect.html",
    "/library/test/success.html",
    "/generate_204",
    "/connectivitycheck.html",
    "/check_network_status.txt",
    "/ncsi.txt",
    "/msftconnecttest/connecttest.txt",
    "/msftconnecttest/redirect",
    "/service/update2/json",
    "/success.txt",
    "/canonical.html",
];

const REDIRECT_BODY: &str = "Redirecting to configuration page";

// The shared state for the control server.
pub struct ServerState {
    pub dispatcher: Dispatcher,
    pub clients: Arc<ClientSlot>,
    pub sink: Arc<dyn AudioSink>,
    pub pages: Arc<dyn UiAssetProvider>,
    pub index_page: String,
    /// 重定向的目标，例如 `http://192.168.8.1`
    pub portal_url: String,
}

pub type ServerStateRef = State<Arc<ServerState>>;

/// 按模式组装路由：控制通道始终存在，配网模式额外提供配置页和强制门户重定向
pub fn router(state: Arc<ServerState>, ws_path: &str, mode: ProvisioningMode) -> Router {
    let mut app = Router::new().route(ws_path, get(ws_handler));

    if mode == ProvisioningMode::AccessPointWithStation {
        app = app.route("/", get(serve_index));
        for path in CAPTIVE_PORTAL_PATHS {
            app = app.route(path, get(redirect_to_portal));
        }
    }

    app.with_state(state)
}

struct RunningServer {
    local_addr: SocketAddr,
    mode: ProvisioningMode,
    handle: JoinHandle<Result<()>>,
}

/// 控制通道 HTTP 服务。同一时刻只运行一个实例，重新启动前总是先停掉旧的。
pub struct ControlServer {
    state: Arc<ServerState>,
    config: ServerConfig,
    running: Mutex<Option<RunningServer>>,
}

impl ControlServer {
    pub fn new(state: Arc<ServerState>, config: ServerConfig) -> Self {
        Self {
            state,
            config,
            running: Mutex::new(None),
        }
    }

    pub fn clients(&self) -> &Arc<ClientSlot> {
        &self.state.clients
    }

    /// 以指定模式启动，返回实际监听的地址
    pub async fn start(&self, mode: ProvisioningMode) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(old) = running.take() {
            Self::shutdown(old).await;
        }

        let app = router(self.state.clone(), &self.config.ws_path, mode);
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, ?mode, "Web server listening");

        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .await
                .map_err(|e| crate::Error::WebServer(e.into()))
        });

        *running = Some(RunningServer { local_addr, mode, handle });
        Ok(local_addr)
    }

    pub async fn stop(&self) {
        if let Some(old) = self.running.lock().await.take() {
            Self::shutdown(old).await;
        }
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    pub async fn mode(&self) -> Option<ProvisioningMode> {
        self.running.lock().await.as_ref().map(|r| r.mode)
    }

    async fn shutdown(server: RunningServer) {
        // 停止接受新连接并释放监听端口，已建立的控制通道自然结束
        server.handle.abort();
        match server.handle.await {
            Ok(Err(e)) => tracing::warn!("Web server exited with error: {}", e),
            Err(e) if !e.is_cancelled() => tracing::warn!("Web server task failed: {}", e),
            _ => {}
        }
        tracing::info!(local_addr = %server.local_addr, "Web server stopped");
    }
}

// --- Route Handlers ---

/// 直接返回存储中的配置页
async fn serve_index(State(state): ServerStateRef) -> Response {
    match state.pages.get_asset(&state.index_page).await {
        Ok((data, mime)) => ([(header::CONTENT_TYPE, mime)], Body::from(data)).into_response(),
        Err(e) => {
            tracing::error!("Failed to read {}: {}", state.index_page, e);
            (StatusCode::NOT_FOUND, "Not Found").into_response()
        }
    }
}

async fn redirect_to_portal(State(state): ServerStateRef) -> Response {
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, state.portal_url.clone()),
            (header::CONTENT_TYPE, "text/html".to_string()),
        ],
        REDIRECT_BODY,
    )
        .into_response()
}

async fn ws_handler(State(state): ServerStateRef, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// 一个已建立的控制通道连接
async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut sender, mut receiver) = socket.split();

    // 出站消息经由通道交给写任务
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let id = state.clients.attach(tx);
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(state.dispatcher.clone(), state.sink.clone());
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => session.on_text(text.as_str()).await,
            Ok(Message::Binary(data)) => session.on_binary(&data).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(id, "Control channel receive error: {}", e);
                break;
            }
        }
    }

    state.clients.detach(id);
    writer.abort();
}
