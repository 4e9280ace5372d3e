use anyhow::{Context, Result};
use cilow_core::audio::{AplaySink, PcmFormat, PlaybackPacing};
use cilow_core::config::{self, AppConfig};
use cilow_core::frontends::{provider_disk::DiskFrontend, provider_embed::EmbedFrontend};
use cilow_core::lifecycle::Supervisor;
use cilow_core::notifier::PromptNotifier;
use cilow_core::traits::{RadioDriver, RadioEvent, UiAssetProvider};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

// 如果没有选择任何后端，编译失败
#[cfg(not(any(feature = "backend_mock", feature = "backend_wpa_cli")))]
compile_error!("No radio backend selected. Please choose one, e.g., --features cilow-daemon/backend_wpa_cli");

// --- 1. 选择无线电后端 ---
#[cfg(feature = "backend_wpa_cli")]
fn create_radio(config: &AppConfig, events: mpsc::UnboundedSender<RadioEvent>) -> Arc<dyn RadioDriver> {
    tracing::info!("Using wpa_cli radio backend on {}", config.wpa_cli.interface);
    use cilow_core::backends::wpa_cli::WpaCliRadio;
    Arc::new(WpaCliRadio::new(config.wpa_cli.clone(), events))
}

#[cfg(all(feature = "backend_mock", not(feature = "backend_wpa_cli")))]
fn create_radio(_config: &AppConfig, events: mpsc::UnboundedSender<RadioEvent>) -> Arc<dyn RadioDriver> {
    tracing::info!("Using mock radio backend");
    use cilow_core::backends::mock::MockRadio;
    Arc::new(MockRadio::new(events))
}

// --- 2. 选择配置页来源 ---
fn create_pages(config: &AppConfig) -> Arc<dyn UiAssetProvider> {
    match &config.server.page_dir {
        Some(dir) => {
            tracing::info!("Serving pages from {}", dir.display());
            Arc::new(DiskFrontend::new(dir))
        }
        None => Arc::new(EmbedFrontend::new()),
    }
}

// --- 3. 音频输出 ---
// 实时音频流和提示音各用一个 aplay 进程，提示音不会改动流的格式
fn create_sinks(config: &AppConfig) -> (Arc<AplaySink>, Arc<AplaySink>) {
    let sink = || Arc::new(AplaySink::new(config.audio.device.clone(), PcmFormat::from(&config.audio)));
    (sink(), sink())
}

fn load_config() -> Result<AppConfig> {
    match std::env::var_os("CILOW_CONFIG") {
        Some(path) => {
            let path = PathBuf::from(path);
            config::load_config_from_file(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))
        }
        None => AppConfig::embedded().context("embedded config is invalid"),
    }
}

async fn run() -> Result<()> {
    let config = load_config()?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let radio = create_radio(&config, events_tx);
    let (stream_sink, prompt_sink) = create_sinks(&config);
    let pages = create_pages(&config);

    let supervisor = Supervisor::new(&config, radio, events_rx, stream_sink, pages);
    let notifier = PromptNotifier::new(
        config.audio.prompts.clone(),
        prompt_sink,
        PlaybackPacing::from(&config.audio),
    );
    notifier.spawn(supervisor.manager().subscribe());

    supervisor.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 初始化日志（这是入口点的职责）
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // 2. 调用库的核心逻辑
    if let Err(e) = run().await {
        // 3. 处理顶层错误
        tracing::error!("cilow daemon failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_do_not_share_the_stream_sink() {
        let config = AppConfig::embedded().unwrap();
        let (stream_sink, prompt_sink) = create_sinks(&config);
        assert!(!Arc::ptr_eq(&stream_sink, &prompt_sink));
    }
}
