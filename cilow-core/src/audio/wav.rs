//! 44 字节规范 WAV (RIFF/WAVE/PCM) 文件头解析

use super::PcmFormat;
use thiserror::Error;

/// 规范 PCM WAV 头的固定长度
pub const WAV_HEADER_LEN: usize = 44;

const PCM_FORMAT_TAG: u16 = 1;

/// WAV 头校验失败的原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("header too short: {0} bytes, need {WAV_HEADER_LEN}")]
    TooShort(usize),

    #[error("not a RIFF container")]
    NotRiff,

    #[error("not a WAVE file")]
    NotWave,

    #[error("fmt chunk not found")]
    MissingFmt,

    #[error("unsupported audio format {0} (only PCM supported)")]
    NotPcm(u16),

    #[error("data chunk not found")]
    MissingData,
}

/// 已校验的 WAV 头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    /// 头中声明的 data 块字节数
    pub data_len: u32,
}

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

impl WavHeader {
    /// 按固定布局解析并校验 WAV 头，只读取前 44 字节
    pub fn parse(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < WAV_HEADER_LEN {
            return Err(HeaderError::TooShort(buf.len()));
        }
        if &buf[0..4] != b"RIFF" {
            return Err(HeaderError::NotRiff);
        }
        if &buf[8..12] != b"WAVE" {
            return Err(HeaderError::NotWave);
        }
        if &buf[12..16] != b"fmt " {
            return Err(HeaderError::MissingFmt);
        }
        let audio_format = u16_at(buf, 20);
        if audio_format != PCM_FORMAT_TAG {
            return Err(HeaderError::NotPcm(audio_format));
        }
        if &buf[36..40] != b"data" {
            return Err(HeaderError::MissingData);
        }

        let header = WavHeader {
            channels: u16_at(buf, 22),
            sample_rate: u32_at(buf, 24),
            bits_per_sample: u16_at(buf, 34),
            data_len: u32_at(buf, 40),
        };
        tracing::debug!(
            sample_rate = header.sample_rate,
            channels = header.channels,
            bits_per_sample = header.bits_per_sample,
            data_len = header.data_len,
            "WAV header parsed"
        );
        Ok(header)
    }

    pub fn format(&self) -> PcmFormat {
        PcmFormat {
            sample_rate: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
            channels: self.channels,
        }
    }

    /// 生成一个规范的 44 字节 PCM 头
    pub fn to_bytes(&self) -> [u8; WAV_HEADER_LEN] {
        // 字段由调用方任意构造，超出范围时饱和
        let block_align = self.channels.saturating_mul(self.bits_per_sample / 8);
        let byte_rate = self.sample_rate.saturating_mul(u32::from(block_align));

        let mut out = [0u8; WAV_HEADER_LEN];
        out[0..4].copy_from_slice(b"RIFF");
        out[4..8].copy_from_slice(&self.data_len.saturating_add(36).to_le_bytes());
        out[8..12].copy_from_slice(b"WAVE");
        out[12..16].copy_from_slice(b"fmt ");
        out[16..20].copy_from_slice(&16u32.to_le_bytes());
        out[20..22].copy_from_slice(&PCM_FORMAT_TAG.to_le_bytes());
        out[22..24].copy_from_slice(&self.channels.to_le_bytes());
        out[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[28..32].copy_from_slice(&byte_rate.to_le_bytes());
        out[32..34].copy_from_slice(&block_align.to_le_bytes());
        out[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        out[36..40].copy_from_slice(b"data");
        out[40..44].copy_from_slice(&self.data_len.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_8k_mono() -> WavHeader {
        WavHeader {
            sample_rate: 8000,
            bits_per_sample: 16,
            channels: 1,
            data_len: 1600,
        }
    }

    #[test]
    fn parses_canonical_header() {
        let bytes = header_8k_mono().to_bytes();
        assert_eq!(WavHeader::parse(&bytes), Ok(header_8k_mono()));
    }

    #[test]
    fn oversized_fields_saturate() {
        let header = WavHeader {
            sample_rate: u32::MAX,
            bits_per_sample: 64,
            channels: u16::MAX,
            data_len: u32::MAX,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[4..8], &u32::MAX.to_le_bytes());
        assert_eq!(&bytes[28..32], &u32::MAX.to_le_bytes());
        assert_eq!(&bytes[32..34], &u16::MAX.to_le_bytes());
    }

    #[test]
    fn rejects_short_buffer() {
        let bytes = header_8k_mono().to_bytes();
        assert_eq!(WavHeader::parse(&bytes[..43]), Err(HeaderError::TooShort(43)));
    }

    #[test]
    fn rejects_non_riff_tag() {
        let mut bytes = header_8k_mono().to_bytes();
        bytes[0..4].copy_from_slice(b"RIFX");
        assert_eq!(WavHeader::parse(&bytes), Err(HeaderError::NotRiff));
    }

    #[test]
    fn rejects_each_missing_tag() {
        let mut bytes = header_8k_mono().to_bytes();
        bytes[8..12].copy_from_slice(b"AVI ");
        assert_eq!(WavHeader::parse(&bytes), Err(HeaderError::NotWave));

        let mut bytes = header_8k_mono().to_bytes();
        bytes[12..16].copy_from_slice(b"LIST");
        assert_eq!(WavHeader::parse(&bytes), Err(HeaderError::MissingFmt));

        let mut bytes = header_8k_mono().to_bytes();
        bytes[36..40].copy_from_slice(b"fact");
        assert_eq!(WavHeader::parse(&bytes), Err(HeaderError::MissingData));
    }

    #[test]
    fn rejects_non_pcm_format_code() {
        let mut bytes = header_8k_mono().to_bytes();
        // 3 = IEEE float
        bytes[20..22].copy_from_slice(&3u16.to_le_bytes());
        assert_eq!(WavHeader::parse(&bytes), Err(HeaderError::NotPcm(3)));
    }
}
