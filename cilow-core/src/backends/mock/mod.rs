use crate::config::ApConfig;
use crate::traits::{AccessPoint, RadioDriver, RadioEvent, RadioMode};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// 模拟无线电记录下的一次调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    SetMode(RadioMode),
    Start,
    Stop,
    Restore,
    SetStationConfig { ssid: String, password: String },
    SetApConfig(String),
    ConfigureApNetwork(Ipv4Addr),
    Connect,
    Disconnect,
    ClearScanResults,
    Scan(usize),
}

struct MockState {
    mode: RadioMode,
    station: Option<(String, String)>,
    calls: Vec<RadioCall>,
}

/// A mock radio for testing purposes.
/// It simulates the radio events without any real hardware interaction:
/// connecting with credentials from its known-network table yields an IP,
/// anything else is a disconnect.
pub struct MockRadio {
    events: mpsc::UnboundedSender<RadioEvent>,
    state: Mutex<MockState>,
    known: HashMap<String, String>,
    scan_delay: Duration,
    fail_start: AtomicBool,
    fail_scan: AtomicBool,
    address: Ipv4Addr,
}

impl MockRadio {
    pub fn new(events: mpsc::UnboundedSender<RadioEvent>) -> Self {
        Self {
            events,
            state: Mutex::new(MockState {
                mode: RadioMode::Off,
                station: None,
                calls: Vec::new(),
            }),
            known: HashMap::new(),
            scan_delay: Duration::ZERO,
            fail_start: AtomicBool::new(false),
            fail_scan: AtomicBool::new(false),
            address: Ipv4Addr::new(192, 168, 1, 50),
        }
    }

    /// 加入一个可以连上的网络
    pub fn with_network(mut self, ssid: &str, password: &str) -> Self {
        self.known.insert(ssid.to_string(), password.to_string());
        self
    }

    pub fn with_scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = delay;
        self
    }

    /// 之后的 `start` 调用全部失败
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// 之后的扫描在等待结束后返回错误
    pub fn set_fail_scan(&self, fail: bool) {
        self.fail_scan.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// 模拟已建立的连接意外断开
    pub fn drop_link(&self) {
        self.emit(RadioEvent::StationDisconnected);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: RadioCall) -> std::sync::MutexGuard<'_, MockState> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }

    fn emit(&self, event: RadioEvent) {
        tracing::debug!(?event, "[MockRadio] emit");
        let _ = self.events.send(event);
    }

    fn networks() -> Vec<AccessPoint> {
        vec![
            AccessPoint { ssid: "MyHomeWiFi".to_string(), rssi: -42, encrypted: true },
            AccessPoint { ssid: "xfinitywifi".to_string(), rssi: -51, encrypted: true },
            AccessPoint { ssid: "CafeGuest".to_string(), rssi: -58, encrypted: false },
            AccessPoint { ssid: "Neighbor's Network".to_string(), rssi: -73, encrypted: true },
            AccessPoint { ssid: "HiddenNetwork".to_string(), rssi: -85, encrypted: true },
        ]
    }
}

#[async_trait]
impl RadioDriver for MockRadio {
    fn mode(&self) -> RadioMode {
        self.lock().mode
    }

    async fn set_mode(&self, mode: RadioMode) -> Result<()> {
        self.record(RadioCall::SetMode(mode)).mode = mode;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let mode = self.record(RadioCall::Start).mode;
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Radio("simulated start failure".into()));
        }
        match mode {
            RadioMode::Off => return Err(Error::Radio("radio mode not set".into())),
            RadioMode::Station => self.emit(RadioEvent::StationStarted),
            RadioMode::AccessPointStation => {
                self.emit(RadioEvent::ApStarted);
                self.emit(RadioEvent::StationStarted);
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mode = self.record(RadioCall::Stop).mode;
        if mode == RadioMode::AccessPointStation {
            self.emit(RadioEvent::ApStopped);
        }
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        self.record(RadioCall::Restore).station = None;
        Ok(())
    }

    async fn set_station_config(&self, ssid: &str, password: &str) -> Result<()> {
        let mut state = self.record(RadioCall::SetStationConfig {
            ssid: ssid.to_string(),
            password: password.to_string(),
        });
        state.station = Some((ssid.to_string(), password.to_string()));
        Ok(())
    }

    async fn set_ap_config(&self, ap: &ApConfig) -> Result<()> {
        drop(self.record(RadioCall::SetApConfig(ap.ssid.clone())));
        Ok(())
    }

    async fn configure_ap_network(&self, ap: &ApConfig) -> Result<()> {
        drop(self.record(RadioCall::ConfigureApNetwork(ap.address)));
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        let station = self.record(RadioCall::Connect).station.clone();
        let accepted = station
            .as_ref()
            .is_some_and(|(ssid, pass)| self.known.get(ssid) == Some(pass));
        if accepted {
            self.emit(RadioEvent::GotIp(self.address));
        } else {
            self.emit(RadioEvent::StationDisconnected);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        drop(self.record(RadioCall::Disconnect));
        Ok(())
    }

    async fn clear_scan_results(&self) -> Result<()> {
        drop(self.record(RadioCall::ClearScanResults));
        Ok(())
    }

    async fn scan(&self, max_results: usize) -> Result<Vec<AccessPoint>> {
        drop(self.record(RadioCall::Scan(max_results)));
        tracing::info!("[MockRadio] Scanning for networks...");
        sleep(self.scan_delay).await;
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(Error::Radio("simulated scan failure".into()));
        }

        let mut networks = Self::networks();
        networks.truncate(max_results);
        tracing::info!("[MockRadio] Found {} networks.", networks.len());
        Ok(networks)
    }
}
