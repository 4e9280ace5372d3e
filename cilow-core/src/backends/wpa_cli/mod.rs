use super::utils::parse_scan_results;
use crate::config::{ApConfig, WpaCliConfig};
use crate::traits::{AccessPoint, RadioDriver, RadioEvent, RadioMode};
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// `wpa_cli status` 中关心的字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WpaStatus {
    pub wpa_state: String,
    pub ip_address: Option<Ipv4Addr>,
}

impl WpaStatus {
    pub fn parse(output: &str) -> Self {
        let mut status = WpaStatus {
            wpa_state: String::new(),
            ip_address: None,
        };
        for line in output.lines() {
            match line.split_once('=') {
                Some(("wpa_state", v)) => status.wpa_state = v.trim().to_string(),
                Some(("ip_address", v)) => status.ip_address = v.trim().parse().ok(),
                _ => {}
            }
        }
        status
    }

    pub fn is_associated(&self) -> bool {
        self.wpa_state == "COMPLETED"
    }
}

/// 生成开放认证热点的 hostapd 配置
pub fn render_hostapd_conf(interface: &str, ap: &ApConfig) -> String {
    format!(
        "interface={interface}\n\
         driver=nl80211\n\
         ssid={ssid}\n\
         hw_mode=g\n\
         channel={channel}\n\
         max_num_sta={max}\n\
         auth_algs=1\n\
         ignore_broadcast_ssid=0\n",
        ssid = ap.ssid,
        channel = ap.channel,
        max = ap.max_connections,
    )
}

/// dnsmasq 只做 DHCP（`--port=0` 关闭它自己的 DNS，53 端口留给劫持服务）
pub fn dnsmasq_args(config: &WpaCliConfig, ap: &ApConfig) -> Vec<String> {
    vec![
        format!("--interface={}", config.interface),
        "--bind-interfaces".to_string(),
        "--port=0".to_string(),
        format!("--dhcp-range={}", config.dhcp_range),
        format!("--dhcp-option=3,{}", ap.gateway),
        format!("--dhcp-option=6,{}", ap.address),
        "--no-daemon".to_string(),
    ]
}

struct Shared {
    config: WpaCliConfig,
    events: mpsc::UnboundedSender<RadioEvent>,
    // 发起连接后等待结果的截止时间
    connect_deadline: Mutex<Option<Instant>>,
}

impl Shared {
    fn emit(&self, event: RadioEvent) {
        tracing::debug!(?event, "[WpaCliRadio] emit");
        let _ = self.events.send(event);
    }

    fn deadline(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.connect_deadline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 截止时间已过则清除并返回 `true`
    fn take_expired_deadline(&self) -> bool {
        let mut deadline = self.deadline();
        match *deadline {
            Some(at) if Instant::now() >= at => {
                *deadline = None;
                true
            }
            _ => false,
        }
    }

    async fn wpa_cli(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("wpa_cli")
            .arg("-i")
            .arg(&self.config.interface)
            .args(args)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() || stdout.trim() == "FAIL" {
            let error_msg = String::from_utf8_lossy(&output.stderr);
            if error_msg.contains("Failed to connect to wpa_supplicant") {
                return Err(Error::CommandFailed(
                    "wpa_supplicant is not running or not accessible".to_string(),
                ));
            }
            return Err(Error::CommandFailed(format!(
                "wpa_cli {} failed: {}{}",
                args.join(" "),
                stdout.trim(),
                error_msg.trim()
            )));
        }
        Ok(stdout)
    }

    async fn ip(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("ip").args(args).output().await?;
        if !output.status.success() {
            let error_msg = String::from_utf8_lossy(&output.stderr);
            return Err(Error::CommandFailed(format!(
                "ip {} failed: {}",
                args.join(" "),
                error_msg.trim()
            )));
        }
        Ok(())
    }
}

/// Linux 上基于 `wpa_supplicant`/`wpa_cli`、`hostapd`、`ip` 和 `dnsmasq` 的无线电。
///
/// 连接结果由后台轮询 `wpa_cli status` 得出并转换成无线电事件。
pub struct WpaCliRadio {
    shared: Arc<Shared>,
    mode: Mutex<RadioMode>,
    hostapd: AsyncMutex<Option<Child>>,
    dnsmasq: AsyncMutex<Option<Child>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl WpaCliRadio {
    pub fn new(config: WpaCliConfig, events: mpsc::UnboundedSender<RadioEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                events,
                connect_deadline: Mutex::new(None),
            }),
            mode: Mutex::new(RadioMode::Off),
            hostapd: AsyncMutex::new(None),
            dnsmasq: AsyncMutex::new(None),
            poller: Mutex::new(None),
        }
    }

    fn lock_mode(&self) -> std::sync::MutexGuard<'_, RadioMode> {
        self.mode.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_poller(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.poller.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 确保 wpa_supplicant 在运行
    async fn ensure_supplicant(&self) -> Result<()> {
        if self.shared.wpa_cli(&["ping"]).await.is_ok() {
            return Ok(());
        }
        let config = &self.shared.config;
        let status = Command::new("wpa_supplicant")
            .arg("-B")
            .arg(format!("-i{}", config.interface))
            .arg(format!("-c{}", config.wpa_conf_path))
            .status()
            .await?;
        if !status.success() {
            return Err(Error::CommandFailed("Failed to start wpa_supplicant".into()));
        }
        Ok(())
    }

    async fn start_hostapd(&self) -> Result<()> {
        let mut hostapd = self.hostapd.lock().await;
        if let Some(mut child) = hostapd.take() {
            let _ = child.kill().await;
        }
        let child = Command::new("hostapd")
            .arg(&self.shared.config.hostapd_conf_path)
            .kill_on_drop(true)
            .spawn()?;
        *hostapd = Some(child);
        Ok(())
    }

    /// 停止热点，返回之前是否在运行
    async fn stop_hostapd(&self) -> bool {
        match self.hostapd.lock().await.take() {
            Some(mut child) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill hostapd: {}", e);
                }
                true
            }
            None => false,
        }
    }

    async fn stop_dnsmasq(&self) {
        if let Some(mut child) = self.dnsmasq.lock().await.take() {
            let _ = child.kill().await;
        }
    }

    fn spawn_poller(&self) {
        let mut poller = self.lock_poller();
        if let Some(old) = poller.take() {
            old.abort();
        }
        *poller = Some(tokio::spawn(poll_status(self.shared.clone())));
    }
}

/// 一次状态轮询后要做的事
#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkStep {
    Wait,
    RequestDhcp,
    Emit(RadioEvent),
}

/// 记录上一次轮询看到的链路状态
#[derive(Debug, Default)]
struct LinkTracker {
    last_ip: Option<Ipv4Addr>,
    dhcp_requested: bool,
}

impl LinkTracker {
    /// `deadline_expired` 只在需要判断连接超时时调用
    fn observe(&mut self, status: &WpaStatus, deadline_expired: impl Fn() -> bool) -> LinkStep {
        match (status.is_associated(), status.ip_address) {
            (true, Some(ip)) if self.last_ip != Some(ip) => {
                self.last_ip = Some(ip);
                LinkStep::Emit(RadioEvent::GotIp(ip))
            }
            (true, Some(_)) => LinkStep::Wait,
            (true, None) if !self.dhcp_requested => {
                self.dhcp_requested = true;
                LinkStep::RequestDhcp
            }
            // 关联上了但一直拿不到地址，同样按连接失败处理
            (true, None) if deadline_expired() => {
                tracing::info!("Station associated but no IP before deadline");
                self.dhcp_requested = false;
                LinkStep::Emit(RadioEvent::StationDisconnected)
            }
            (true, None) => LinkStep::Wait,
            (false, _) => {
                self.dhcp_requested = false;
                if self.last_ip.take().is_some() {
                    tracing::info!(state = %status.wpa_state, "Station link lost");
                    LinkStep::Emit(RadioEvent::StationDisconnected)
                } else if deadline_expired() {
                    tracing::info!(state = %status.wpa_state, "Station connect attempt timed out");
                    LinkStep::Emit(RadioEvent::StationDisconnected)
                } else {
                    LinkStep::Wait
                }
            }
        }
    }
}

/// 轮询 `wpa_cli status`，把状态变化转换成事件
async fn poll_status(shared: Arc<Shared>) {
    let period = Duration::from_millis(shared.config.status_poll_ms.max(100));
    let mut tracker = LinkTracker::default();

    loop {
        tokio::time::sleep(period).await;
        let status = match shared.wpa_cli(&["status"]).await {
            Ok(out) => WpaStatus::parse(&out),
            Err(e) => {
                tracing::debug!("wpa_cli status failed: {}", e);
                continue;
            }
        };

        match tracker.observe(&status, || shared.take_expired_deadline()) {
            LinkStep::Wait => {}
            LinkStep::RequestDhcp => request_dhcp(&shared).await,
            LinkStep::Emit(event) => {
                if matches!(event, RadioEvent::GotIp(_)) {
                    *shared.deadline() = None;
                }
                shared.emit(event);
            }
        }
    }
}

async fn request_dhcp(shared: &Shared) {
    let result = Command::new("udhcpc")
        .arg("-i")
        .arg(&shared.config.interface)
        .arg("-n")
        .arg("-q")
        .status()
        .await;
    match result {
        Ok(status) if status.success() => tracing::debug!("udhcpc finished"),
        Ok(status) => tracing::warn!(%status, "udhcpc failed to obtain a lease"),
        Err(e) => tracing::warn!("Failed to run udhcpc: {}", e),
    }
}

#[async_trait]
impl RadioDriver for WpaCliRadio {
    fn mode(&self) -> RadioMode {
        *self.lock_mode()
    }

    async fn set_mode(&self, mode: RadioMode) -> Result<()> {
        *self.lock_mode() = mode;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let mode = self.mode();
        tracing::info!(?mode, "[WpaCliRadio] Starting radio");
        match mode {
            RadioMode::Off => return Err(Error::Radio("radio mode not set".into())),
            RadioMode::Station => {}
            RadioMode::AccessPointStation => {
                self.start_hostapd().await?;
                self.shared.emit(RadioEvent::ApStarted);
            }
        }
        self.ensure_supplicant().await?;
        self.spawn_poller();
        self.shared.emit(RadioEvent::StationStarted);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let poller = self.lock_poller().take();
        if let Some(poller) = poller {
            poller.abort();
        }
        *self.shared.deadline() = None;
        self.stop_dnsmasq().await;
        if self.stop_hostapd().await {
            self.shared.emit(RadioEvent::ApStopped);
        }
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        self.shared.wpa_cli(&["remove_network", "all"]).await?;
        self.shared.wpa_cli(&["save_config"]).await?;
        let iface = self.shared.config.interface.clone();
        self.shared.ip(&["addr", "flush", "dev", &iface]).await?;
        Ok(())
    }

    async fn set_station_config(&self, ssid: &str, password: &str) -> Result<()> {
        let wpa = &self.shared;
        wpa.wpa_cli(&["remove_network", "all"]).await?;
        let network_id = wpa.wpa_cli(&["add_network"]).await?;
        let network_id = network_id.trim().to_string();
        if network_id.parse::<u32>().is_err() {
            return Err(Error::CommandFailed(format!(
                "Failed to parse network ID from wpa_cli: {}",
                network_id
            )));
        }

        let ssid_arg = format!("\"{}\"", ssid);
        wpa.wpa_cli(&["set_network", &network_id, "ssid", &ssid_arg]).await?;
        if password.is_empty() {
            wpa.wpa_cli(&["set_network", &network_id, "key_mgmt", "NONE"]).await?;
        } else {
            let psk_arg = format!("\"{}\"", password);
            wpa.wpa_cli(&["set_network", &network_id, "psk", &psk_arg]).await?;
        }
        wpa.wpa_cli(&["enable_network", &network_id]).await?;
        wpa.wpa_cli(&["save_config"]).await?;
        tracing::info!(ssid = %ssid, network_id = %network_id, "[WpaCliRadio] Station configured");
        Ok(())
    }

    async fn set_ap_config(&self, ap: &ApConfig) -> Result<()> {
        let conf = render_hostapd_conf(&self.shared.config.interface, ap);
        tokio::fs::write(&self.shared.config.hostapd_conf_path, conf).await?;
        Ok(())
    }

    async fn configure_ap_network(&self, ap: &ApConfig) -> Result<()> {
        self.stop_dnsmasq().await;

        let iface = self.shared.config.interface.clone();
        let cidr = format!("{}/{}", ap.address, ap.prefix_len());
        self.shared.ip(&["addr", "flush", "dev", &iface]).await?;
        self.shared.ip(&["addr", "add", &cidr, "dev", &iface]).await?;
        self.shared.ip(&["link", "set", &iface, "up"]).await?;

        let child = Command::new("dnsmasq")
            .args(dnsmasq_args(&self.shared.config, ap))
            .kill_on_drop(true)
            .spawn()?;
        *self.dnsmasq.lock().await = Some(child);
        tracing::info!(address = %cidr, "[WpaCliRadio] AP network configured");
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        let timeout = Duration::from_secs(self.shared.config.connect_timeout_secs);
        *self.shared.deadline() = Some(Instant::now() + timeout);
        self.shared.wpa_cli(&["reconnect"]).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.shared.deadline() = None;
        self.shared.wpa_cli(&["disconnect"]).await?;
        Ok(())
    }

    async fn clear_scan_results(&self) -> Result<()> {
        self.shared.wpa_cli(&["bss_flush", "0"]).await?;
        Ok(())
    }

    async fn scan(&self, max_results: usize) -> Result<Vec<AccessPoint>> {
        tracing::info!("[WpaCliRadio] Scanning for networks...");
        self.shared.wpa_cli(&["scan"]).await?;

        // 等待一会儿以获取结果
        tokio::time::sleep(Duration::from_secs(self.shared.config.scan_wait_secs)).await;

        let stdout = self.shared.wpa_cli(&["scan_results"]).await?;
        let mut networks = parse_scan_results(&stdout);
        networks.truncate(max_results);
        Ok(networks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn parses_status_fields() {
        let status = WpaStatus::parse(
            "bssid=aa:bb:cc:dd:ee:ff\nssid=home\nwpa_state=COMPLETED\nip_address=192.168.1.23\n",
        );
        assert!(status.is_associated());
        assert_eq!(status.ip_address, Some(Ipv4Addr::new(192, 168, 1, 23)));

        let scanning = WpaStatus::parse("wpa_state=SCANNING\n");
        assert!(!scanning.is_associated());
        assert_eq!(scanning.ip_address, None);
    }

    fn status(state: &str, ip: Option<Ipv4Addr>) -> WpaStatus {
        WpaStatus { wpa_state: state.to_string(), ip_address: ip }
    }

    #[test]
    fn associated_without_lease_times_out() {
        let mut tracker = LinkTracker::default();
        let associated = status("COMPLETED", None);

        assert_eq!(tracker.observe(&associated, || true), LinkStep::RequestDhcp);
        assert_eq!(tracker.observe(&associated, || false), LinkStep::Wait);
        assert_eq!(
            tracker.observe(&associated, || true),
            LinkStep::Emit(RadioEvent::StationDisconnected)
        );
        // 重试时重新申请地址
        assert_eq!(tracker.observe(&associated, || false), LinkStep::RequestDhcp);
    }

    #[test]
    fn lease_and_link_loss_are_reported_once() {
        let ip = Ipv4Addr::new(192, 168, 1, 23);
        let mut tracker = LinkTracker::default();
        let online = status("COMPLETED", Some(ip));

        assert_eq!(tracker.observe(&online, || false), LinkStep::Emit(RadioEvent::GotIp(ip)));
        assert_eq!(tracker.observe(&online, || false), LinkStep::Wait);

        let lost = status("DISCONNECTED", None);
        assert_eq!(tracker.observe(&lost, || false), LinkStep::Emit(RadioEvent::StationDisconnected));
        assert_eq!(tracker.observe(&lost, || false), LinkStep::Wait);
        assert_eq!(tracker.observe(&lost, || true), LinkStep::Emit(RadioEvent::StationDisconnected));
    }

    #[test]
    fn hostapd_conf_is_open_ap() {
        let config = AppConfig::embedded().unwrap();
        let conf = render_hostapd_conf("wlan0", &config.ap);
        assert!(conf.contains("ssid=Robot_Cilow\n"));
        assert!(conf.contains("channel=7\n"));
        assert!(conf.contains("max_num_sta=2\n"));
        assert!(!conf.contains("wpa="));
    }

    #[test]
    fn dnsmasq_leaves_port_53_to_hijack() {
        let config = AppConfig::embedded().unwrap();
        let args = dnsmasq_args(&config.wpa_cli, &config.ap);
        assert!(args.contains(&"--port=0".to_string()));
        assert!(args.contains(&"--dhcp-option=3,192.168.8.1".to_string()));
        assert!(args.contains(&"--dhcp-range=192.168.8.100,192.168.8.200,12h".to_string()));
    }
}
