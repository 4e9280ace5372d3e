//! 扬声器音频：WAV 头校验、控制通道上的流式播放、本地文件播放

mod playback;
mod sink;
mod stream;
mod wav;

pub use playback::{play_file, PlaybackPacing};
pub use sink::AplaySink;
pub use stream::{AudioStream, StreamState};
pub use wav::{HeaderError, WavHeader, WAV_HEADER_LEN};

/// 输出端的 PCM 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl From<&crate::config::AudioConfig> for PcmFormat {
    fn from(config: &crate::config::AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            bits_per_sample: config.bits_per_sample,
            channels: config.channels,
        }
    }
}
