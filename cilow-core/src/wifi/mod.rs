//! 连接管理器：STA 重试状态机、AP+STA 配网模式切换、扫描互斥

mod machine;

pub use machine::{Action, ConnectionMachine, ConnectionState, ConnectivityEvent};

use crate::config::{ApConfig, DnsConfig, StationConfig};
use crate::dns::DnsResponder;
use crate::traits::{AccessPoint, RadioDriver, RadioEvent, RadioMode};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// 一次进行中的扫描，完成后恰好产出一次结果
#[derive(Debug)]
pub struct ScanHandle {
    rx: oneshot::Receiver<Result<Vec<AccessPoint>>>,
}

impl ScanHandle {
    /// 等待扫描结束。结果产出前扫描互斥已经释放。
    pub async fn finished(self) -> Result<Vec<AccessPoint>> {
        self.rx.await.map_err(|_| Error::ScanAborted)?
    }
}

struct Inner {
    radio: Arc<dyn RadioDriver>,
    station: StationConfig,
    ap: ApConfig,
    dns_config: DnsConfig,
    machine: Mutex<ConnectionMachine>,
    // 单令牌：同一时刻最多一个扫描
    scan_gate: Arc<Semaphore>,
    events: broadcast::Sender<ConnectivityEvent>,
    dns: tokio::sync::Mutex<Option<DnsResponder>>,
}

/// 连接管理器。
///
/// 状态机只由事件循环和请求方法在锁内修改；所有无线电操作在锁外执行。
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        radio: Arc<dyn RadioDriver>,
        station: StationConfig,
        ap: ApConfig,
        dns_config: DnsConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                radio,
                machine: Mutex::new(ConnectionMachine::new(station.max_retries)),
                station,
                ap,
                dns_config,
                scan_gate: Arc::new(Semaphore::new(1)),
                events,
                dns: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// 订阅连接状态事件
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.lock_machine().state()
    }

    pub fn retries(&self) -> u8 {
        self.lock_machine().retries()
    }

    /// DNS 劫持当前绑定的地址（未运行时为 `None`）
    pub async fn dns_addr(&self) -> Option<SocketAddr> {
        self.inner.dns.lock().await.as_ref().map(DnsResponder::local_addr)
    }

    fn lock_machine(&self) -> std::sync::MutexGuard<'_, ConnectionMachine> {
        // 锁内不会 panic，中毒时沿用内部数据
        self.inner
            .machine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 启动无线电事件循环，连接管理器是事件的唯一消费者
    pub fn spawn_event_loop(&self, mut rx: mpsc::UnboundedReceiver<RadioEvent>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                manager.handle_event(event).await;
            }
            tracing::debug!("Radio event channel closed");
        })
    }

    /// 处理一个无线电事件
    pub async fn handle_event(&self, event: RadioEvent) {
        let mode = self.inner.radio.mode();
        let actions = {
            let mut machine = self.lock_machine();
            let actions = machine.on_event(&event, mode);
            tracing::debug!(?event, ?mode, state = ?machine.state(), retry = machine.retries(), "Radio event");
            actions
        };

        for action in actions {
            match action {
                Action::Connect => {
                    tracing::info!(retry = self.retries(), "Connecting to the AP");
                    if let Err(e) = self.inner.radio.connect().await {
                        tracing::error!("Station connect failed: {}", e);
                    }
                }
                Action::StopDns => self.stop_dns().await,
                Action::Notify(event) => self.notify(event),
            }
        }
    }

    fn notify(&self, event: ConnectivityEvent) {
        match event {
            ConnectivityEvent::StationConnected(addr) => tracing::info!(%addr, "Got ip"),
            ConnectivityEvent::StationFailed => tracing::warn!("Connect to the AP fail"),
            other => tracing::info!(event = ?other, "Connectivity changed"),
        }
        // 没有订阅者时发送失败，忽略即可
        let _ = self.inner.events.send(event);
    }

    /// 以纯 STA 模式启动无线电，启动事件会自动发起连接。
    /// 任何失败都是致命的。
    pub async fn start_station(&self) -> Result<()> {
        let radio = &self.inner.radio;
        radio.set_mode(RadioMode::Station).await?;
        radio.start().await?;
        tracing::info!("wifi init sta finished.");
        Ok(())
    }

    /// 切换到 AP+STA 配网模式并启动 DNS 劫持。
    ///
    /// 先清除之前的所有连接状态并恢复出厂无线电配置，
    /// 然后固定热点子网地址、重启 DHCP 服务。任何一步失败都直接返回错误，
    /// 已启动的 DNS 劫持会被关闭，状态机不会进入 `AccessPointActive`。
    pub async fn enter_provisioning(&self) -> Result<()> {
        let state = self.state();
        if !matches!(
            state,
            ConnectionState::StationConnected | ConnectionState::StationFailed
        ) {
            tracing::warn!(?state, "Entering provisioning mode from an unexpected state");
        }

        let radio = &self.inner.radio;
        let ap = &self.inner.ap;

        // 清理旧状态：这几步失败不影响后续
        if let Err(e) = radio.disconnect().await {
            tracing::debug!("disconnect before provisioning: {}", e);
        }
        if let Err(e) = radio.stop().await {
            tracing::debug!("stop before provisioning: {}", e);
        }
        if let Err(e) = radio.restore().await {
            tracing::debug!("restore before provisioning: {}", e);
        }

        radio.set_mode(RadioMode::AccessPointStation).await?;
        radio.set_ap_config(ap).await?;
        radio.configure_ap_network(ap).await?;
        self.start_dns().await?;

        if let Err(e) = radio.start().await {
            self.stop_dns().await;
            return Err(e);
        }

        self.lock_machine().enter_access_point();
        tracing::info!(ssid = %ap.ssid, address = %ap.address, "wifi init ap sta finished.");
        Ok(())
    }

    /// 使用新的凭据连接。立即返回，结果通过 `StationConnected`/`StationFailed` 事件到达。
    ///
    /// 无线电操作失败时状态机直接进入 `StationFailed` 并广播失败事件，然后返回错误。
    pub async fn connect(&self, ssid: &str, password: &str) -> Result<()> {
        tracing::info!(ssid = %ssid, "Station connect requested");
        self.lock_machine().begin_connect();

        if let Err(e) = self.issue_connect(ssid, password).await {
            self.lock_machine().fail_connect();
            // 已经离开 AP+STA 时热点不在了，DNS 劫持也不再需要
            if self.inner.radio.mode() != RadioMode::AccessPointStation {
                self.stop_dns().await;
            }
            self.notify(ConnectivityEvent::StationFailed);
            return Err(e);
        }
        Ok(())
    }

    async fn issue_connect(&self, ssid: &str, password: &str) -> Result<()> {
        let radio = &self.inner.radio;
        radio.disconnect().await?;
        if radio.mode() != RadioMode::Station {
            // 由启动事件发起连接
            radio.stop().await?;
            radio.set_mode(RadioMode::Station).await?;
            radio.set_station_config(ssid, password).await?;
            radio.start().await?;
        } else {
            radio.set_station_config(ssid, password).await?;
            radio.connect().await?;
        }
        Ok(())
    }

    /// 发起一次扫描。已有扫描在进行时立即返回 `Error::ScanBusy`，不排队。
    pub async fn scan(&self) -> Result<ScanHandle> {
        let permit = self
            .inner
            .scan_gate
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::ScanBusy)?;

        // 清空历史扫描信息
        if let Err(e) = self.inner.radio.clear_scan_results().await {
            tracing::warn!("Failed to clear previous scan results: {}", e);
        }

        let (tx, rx) = oneshot::channel();
        let radio = self.inner.radio.clone();
        let max_results = self.inner.station.scan_max_results;
        tokio::spawn(async move {
            tracing::info!("start wifi scan");
            let result = radio.scan(max_results).await;
            match &result {
                Ok(list) => tracing::info!("ap scan result: {}", list.len()),
                Err(e) => tracing::error!("wifi scan failed: {}", e),
            }
            drop(permit);
            let _ = tx.send(result);
        });

        Ok(ScanHandle { rx })
    }

    async fn start_dns(&self) -> Result<()> {
        let mut guard = self.inner.dns.lock().await;
        if let Some(old) = guard.take() {
            old.stop().await;
        }
        let responder = DnsResponder::start(
            self.inner.dns_config.bind_addr,
            self.inner.ap.address,
            self.inner.dns_config.ttl,
        )
        .await?;
        *guard = Some(responder);
        Ok(())
    }

    async fn stop_dns(&self) {
        if let Some(responder) = self.inner.dns.lock().await.take() {
            responder.stop().await;
        }
    }
}
