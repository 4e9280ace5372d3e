// 无线电驱动的参考实现，由 cargo feature 选择

#[cfg(feature = "backend_mock")]
pub mod mock;

#[cfg(feature = "backend_wpa_cli")]
pub mod wpa_cli;

pub mod utils;
