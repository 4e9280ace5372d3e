use crate::{Error, Result};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 内置的默认配置
const DEFAULT_CONFIG_TOML: &str = include_str!("../configs.toml");

/// 顶层应用配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub station: StationConfig,
    pub ap: ApConfig,
    pub dns: DnsConfig,
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub wpa_cli: WpaCliConfig,
}

/// 用于解析 TOML 的临时结构
#[derive(Deserialize, Default)]
#[serde(default)]
struct AppConfigFile {
    station: StationConfig,
    ap: ApConfigToml,
    dns: DnsConfigToml,
    server: ServerConfigToml,
    audio: AudioConfig,
    wpa_cli: WpaCliConfig,
}

// ============= STA 配置 =============

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// 断线后自动重连的最大次数
    pub max_retries: u8,
    /// 单次扫描最多返回的 AP 数量
    pub scan_max_results: usize,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            scan_max_results: 20,
        }
    }
}

// ============= AP 配置 =============

/// 配网热点配置（AP+STA 模式下使用）
#[derive(Debug, Clone)]
pub struct ApConfig {
    pub ssid: String,
    pub channel: u8,
    pub max_connections: u8,
    /// 设备在热点子网中的固定地址，也是 DNS 劫持的应答地址
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

#[derive(Deserialize)]
#[serde(default)]
struct ApConfigToml {
    ssid: String,
    channel: u8,
    max_connections: u8,
    address: String,
    netmask: String,
    gateway: Option<String>,
}

impl Default for ApConfigToml {
    fn default() -> Self {
        Self {
            ssid: "Robot_Cilow".to_string(),
            channel: 7,
            max_connections: 2,
            address: "192.168.8.1".to_string(),
            netmask: "255.255.255.0".to_string(),
            gateway: None,
        }
    }
}

impl TryFrom<ApConfigToml> for ApConfig {
    type Error = Error;

    fn try_from(t: ApConfigToml) -> Result<Self> {
        let address = parse_field::<Ipv4Addr>("ap.address", &t.address)?;
        let netmask = parse_field::<Ipv4Addr>("ap.netmask", &t.netmask)?;
        let gateway = match t.gateway {
            Some(gw) => parse_field::<Ipv4Addr>("ap.gateway", &gw)?,
            None => address,
        };
        Ok(ApConfig {
            ssid: t.ssid,
            channel: t.channel,
            max_connections: t.max_connections,
            address,
            netmask,
            gateway,
        })
    }
}

impl ApConfig {
    /// 子网前缀长度，例如 255.255.255.0 -> 24
    pub fn prefix_len(&self) -> u32 {
        u32::from(self.netmask).count_ones()
    }

    /// 强制门户重定向的目标地址
    pub fn portal_url(&self) -> String {
        format!("http://{}", self.address)
    }
}

// ============= DNS 配置 =============

#[derive(Debug, Clone)]
pub struct DnsConfig {
    pub bind_addr: SocketAddr,
    pub ttl: u32,
}

#[derive(Deserialize)]
#[serde(default)]
struct DnsConfigToml {
    bind_addr: String,
    ttl: u32,
}

impl Default for DnsConfigToml {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:53".to_string(),
            ttl: 300,
        }
    }
}

// ============= Web / 控制通道配置 =============

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub ws_path: String,
    pub index_page: String,
    /// 设置后从磁盘目录读取页面，否则使用编译进二进制的页面
    pub page_dir: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(default)]
struct ServerConfigToml {
    bind_addr: String,
    ws_path: String,
    index_page: String,
    page_dir: Option<PathBuf>,
}

impl Default for ServerConfigToml {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:80".to_string(),
            ws_path: "/ws".to_string(),
            index_page: "apcfg.html".to_string(),
            page_dir: None,
        }
    }
}

// ============= 音频配置 =============

/// 连接状态提示音文件映射（全部可选）
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct PromptFilesConfig {
    pub ap_started: Option<PathBuf>,
    pub station_connecting: Option<PathBuf>,
    pub station_connected: Option<PathBuf>,
    pub station_failed: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AudioConfig {
    pub device: String,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    /// 本地文件播放时每次写入的字节数
    pub chunk_size: usize,
    /// 本地文件播放时每块之间让出的时间
    pub chunk_pause_ms: u64,
    pub prompts: PromptFilesConfig,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: 24000,
            bits_per_sample: 16,
            channels: 1,
            chunk_size: 4096,
            chunk_pause_ms: 5,
            prompts: PromptFilesConfig::default(),
        }
    }
}

// ============= wpa_cli 后端配置 =============

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct WpaCliConfig {
    pub interface: String,
    pub wpa_conf_path: String,
    pub hostapd_conf_path: String,
    pub dhcp_range: String,
    pub scan_wait_secs: u64,
    pub status_poll_ms: u64,
    /// 发起连接后多久仍未拿到地址就视为一次断开
    pub connect_timeout_secs: u64,
}

impl Default for WpaCliConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            wpa_conf_path: "/etc/wpa_supplicant.conf".to_string(),
            hostapd_conf_path: "/tmp/cilow_hostapd.conf".to_string(),
            dhcp_range: "192.168.8.100,192.168.8.200,12h".to_string(),
            scan_wait_secs: 5,
            status_poll_ms: 1000,
            connect_timeout_secs: 15,
        }
    }
}

// ============= 配置加载函数 =============

fn parse_field<T: FromStr>(field: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| Error::Config(format!("invalid {field}: {value:?}")))
}

/// 从 TOML 字符串加载应用配置
pub fn load_config_from_toml_str(s: &str) -> Result<AppConfig> {
    let parsed: AppConfigFile =
        toml::from_str(s).map_err(|e| Error::Config(format!("failed to parse config TOML: {e}")))?;

    Ok(AppConfig {
        station: parsed.station,
        ap: ApConfig::try_from(parsed.ap)?,
        dns: DnsConfig {
            bind_addr: parse_field("dns.bind_addr", &parsed.dns.bind_addr)?,
            ttl: parsed.dns.ttl,
        },
        server: ServerConfig {
            bind_addr: parse_field("server.bind_addr", &parsed.server.bind_addr)?,
            ws_path: parsed.server.ws_path,
            index_page: parsed.server.index_page,
            page_dir: parsed.server.page_dir,
        },
        audio: parsed.audio,
        wpa_cli: parsed.wpa_cli,
    })
}

/// 从文件加载配置
pub fn load_config_from_file(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    tracing::info!("Loaded config from {}", path.display());
    load_config_from_toml_str(&content)
}

impl AppConfig {
    /// 编译进二进制的默认配置
    pub fn embedded() -> Result<Self> {
        load_config_from_toml_str(DEFAULT_CONFIG_TOML)
    }
}
