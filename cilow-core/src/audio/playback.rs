use super::{WavHeader, WAV_HEADER_LEN};
use crate::traits::AudioSink;
use crate::Result;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// 本地文件播放的分块与节奏
#[derive(Debug, Clone, Copy)]
pub struct PlaybackPacing {
    pub chunk_size: usize,
    pub pause: Duration,
}

impl From<&crate::config::AudioConfig> for PlaybackPacing {
    fn from(config: &crate::config::AudioConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            pause: Duration::from_millis(config.chunk_pause_ms),
        }
    }
}

/// 播放一个本地 WAV 文件。
///
/// 先校验文件头并重新配置输出，然后按固定块大小顺序写出，
/// 直到写满头中声明的数据长度。每块之间短暂让出，避免饿死其他任务。
/// 文件提前结束时直接停止。返回写出的 PCM 字节数。
pub async fn play_file(path: &Path, sink: &dyn AudioSink, pacing: PlaybackPacing) -> Result<u64> {
    let mut file = File::open(path).await?;
    let mut head = [0u8; WAV_HEADER_LEN];
    file.read_exact(&mut head).await?;

    let header = WavHeader::parse(&head)?;
    sink.reconfigure(header.format()).await?;
    tracing::info!(path = %path.display(), data_len = header.data_len, "Start play");

    let declared = u64::from(header.data_len);
    let mut buf = vec![0u8; pacing.chunk_size];
    let mut delivered: u64 = 0;

    while delivered < declared {
        let want = (declared - delivered).min(buf.len() as u64) as usize;
        let read = file.read(&mut buf[..want]).await?;
        if read == 0 {
            break;
        }
        delivered += sink.write(&buf[..read]).await? as u64;
        tokio::time::sleep(pacing.pause).await;
    }

    tracing::info!(path = %path.display(), delivered, "Play finished");
    Ok(delivered)
}
