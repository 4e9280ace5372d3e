//! 连接状态提示音

use crate::audio::{play_file, PlaybackPacing};
use crate::config::PromptFilesConfig;
use crate::traits::AudioSink;
use crate::wifi::ConnectivityEvent;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// 收到连接状态事件时播放配置好的本地 WAV 文件。
/// 文件缺失或无法解析只记录日志。
///
/// 播放会按提示音的文件头重新配置 `sink`，不要和控制通道的音频流共用一个输出。
pub struct PromptNotifier {
    prompts: PromptFilesConfig,
    sink: Arc<dyn AudioSink>,
    pacing: PlaybackPacing,
}

impl PromptNotifier {
    pub fn new(prompts: PromptFilesConfig, sink: Arc<dyn AudioSink>, pacing: PlaybackPacing) -> Self {
        Self { prompts, sink, pacing }
    }

    /// 事件对应的提示音文件
    pub fn prompt_for(&self, event: &ConnectivityEvent) -> Option<&Path> {
        let path = match event {
            ConnectivityEvent::ApStarted => &self.prompts.ap_started,
            ConnectivityEvent::StationConnecting => &self.prompts.station_connecting,
            ConnectivityEvent::StationConnected(_) => &self.prompts.station_connected,
            ConnectivityEvent::StationFailed => &self.prompts.station_failed,
            ConnectivityEvent::ApStopped => return None,
        };
        path.as_deref()
    }

    pub fn spawn(self, mut events: broadcast::Receiver<ConnectivityEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(lagged = n, "Prompt notifier skipped events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(path) = self.prompt_for(&event) else {
                    continue;
                };
                if let Err(e) = play_file(path, self.sink.as_ref(), self.pacing).await {
                    tracing::warn!(path = %path.display(), "Failed to play prompt: {}", e);
                }
            }
        })
    }
}
