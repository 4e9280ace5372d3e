use crate::config::ApConfig;
use crate::audio::PcmFormat;
use async_trait::async_trait;
use serde::Serialize;
use std::borrow::Cow;
use std::net::Ipv4Addr;

// 在这里定义所有后端和外部协作者共享的数据结构和 trait。

/// Wi-Fi 扫描时单个网络的具体信息。
/// 字段名即控制通道 `scan_ret` 列表中的 JSON 字段名。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPoint {
    pub ssid: String,
    /// 信号强度 (dBm)
    pub rssi: i32,
    pub encrypted: bool,
}

/// 无线电当前的工作模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    Off,
    Station,
    AccessPointStation,
}

/// 无线电驱动上报的异步事件。
///
/// 驱动在构造时拿到一个 `mpsc::UnboundedSender<RadioEvent>`，
/// 连接管理器是唯一的接收者。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    StationStarted,
    StationDisconnected,
    GotIp(Ipv4Addr),
    ApStarted,
    ApStopped,
    ApClientJoined,
    ApClientLeft,
}

/// 无线电驱动接口。
///
/// 每个方法只做一件事，模式切换等组合流程由连接管理器编排。
#[async_trait]
pub trait RadioDriver: Send + Sync {
    /// 当前工作模式
    fn mode(&self) -> RadioMode;

    async fn set_mode(&self, mode: RadioMode) -> crate::Result<()>;

    /// 按当前模式启动无线电
    async fn start(&self) -> crate::Result<()>;

    async fn stop(&self) -> crate::Result<()>;

    /// 恢复出厂无线电状态（清除保存的网络）
    async fn restore(&self) -> crate::Result<()>;

    async fn set_station_config(&self, ssid: &str, password: &str) -> crate::Result<()>;

    async fn set_ap_config(&self, ap: &ApConfig) -> crate::Result<()>;

    /// 停止 DHCP 服务，设置热点固定地址，再在该子网上重新启动 DHCP 服务
    async fn configure_ap_network(&self, ap: &ApConfig) -> crate::Result<()>;

    async fn connect(&self) -> crate::Result<()>;

    async fn disconnect(&self) -> crate::Result<()>;

    async fn clear_scan_results(&self) -> crate::Result<()>;

    /// 阻塞式扫描，最多返回 `max_results` 个结果
    async fn scan(&self, max_results: usize) -> crate::Result<Vec<AccessPoint>>;
}

/// 扬声器输出接口。
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// 按新的采样率/位深/声道数重新配置输出，可能会等待输出排空
    async fn reconfigure(&self, format: PcmFormat) -> crate::Result<()>;

    /// 顺序写入原始 PCM 数据，返回实际写入的字节数
    async fn write(&self, data: &[u8]) -> crate::Result<usize>;
}

/// 前端资源提供者接口。
#[async_trait]
pub trait UiAssetProvider: Send + Sync {
    /// Retrieves a single UI asset.
    ///
    /// Returns the asset's content and its MIME type, or
    /// `Error::AssetNotFound`.
    async fn get_asset(&self, path: &str) -> crate::Result<(Cow<'static, [u8]>, String)>;
}
