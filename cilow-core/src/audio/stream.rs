use super::WavHeader;
use crate::traits::AudioSink;
use crate::Result;
use std::sync::Arc;

/// 音频流状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// 等待第一帧 WAV 头
    HeaderPending,
    /// 头已消费，后续二进制帧原样写入输出
    Streaming,
}

/// 控制通道上一次连接的音频流会话。
///
/// 第一个通过校验的二进制帧被当作 WAV 头消费（不作为音频数据写出），
/// 之后的每一帧都不再解析，直接写入输出。
/// 会话随连接创建，连接断开即丢弃。
pub struct AudioStream {
    sink: Arc<dyn AudioSink>,
    header: Option<WavHeader>,
}

impl AudioStream {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self { sink, header: None }
    }

    pub fn state(&self) -> StreamState {
        if self.header.is_some() {
            StreamState::Streaming
        } else {
            StreamState::HeaderPending
        }
    }

    pub fn header(&self) -> Option<&WavHeader> {
        self.header.as_ref()
    }

    /// 处理一个二进制帧。
    ///
    /// 头校验失败时丢弃该帧并保持 `HeaderPending`，返回 `Error::Header`。
    /// 输出重配置或写入失败时返回对应错误，状态不回退。
    pub async fn push(&mut self, frame: &[u8]) -> Result<()> {
        if self.header.is_some() {
            let written = self.sink.write(frame).await?;
            if written < frame.len() {
                tracing::warn!(len = frame.len(), written, "Audio sink accepted a partial frame");
            }
            return Ok(());
        }

        let header = WavHeader::parse(frame)?;
        self.sink.reconfigure(header.format()).await?;
        tracing::info!(
            sample_rate = header.sample_rate,
            bits_per_sample = header.bits_per_sample,
            channels = header.channels,
            "Audio stream header accepted, streaming"
        );
        self.header = Some(header);
        Ok(())
    }
}
