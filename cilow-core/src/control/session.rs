use super::dispatcher::Dispatcher;
use crate::audio::AudioStream;
use crate::traits::AudioSink;
use crate::Error;
use std::sync::Arc;

/// 一次控制通道连接：文本帧交给分发器，二进制帧交给音频流。
///
/// 音频头状态随连接创建，新连接总是从等待文件头开始。
pub struct Session {
    dispatcher: Dispatcher,
    audio: AudioStream,
}

impl Session {
    pub fn new(dispatcher: Dispatcher, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            dispatcher,
            audio: AudioStream::new(sink),
        }
    }

    pub async fn on_text(&self, text: &str) {
        tracing::debug!(len = text.len(), "Recv text frame");
        self.dispatcher.handle_text(text).await;
    }

    pub async fn on_binary(&mut self, frame: &[u8]) {
        match self.audio.push(frame).await {
            Ok(()) => {}
            Err(Error::Header(e)) => tracing::warn!(len = frame.len(), "Parse wav header failed: {}", e),
            Err(e) => tracing::error!(len = frame.len(), "Audio output error: {}", e),
        }
    }
}
