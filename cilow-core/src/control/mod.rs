//! WebSocket 控制通道：文本帧是 JSON 命令，二进制帧是扬声器音频

mod client;
mod dispatcher;
pub mod protocol;
mod server;
mod session;

pub use client::ClientSlot;
pub use dispatcher::Dispatcher;
pub use protocol::{Credentials, InboundMessage, OutboundMessage};
pub use server::{router, ControlServer, ServerState, CAPTIVE_PORTAL_PATHS};
pub use session::Session;

/// 控制服务运行模式，决定是否提供配置页和强制门户重定向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningMode {
    StationOnly,
    AccessPointWithStation,
}
