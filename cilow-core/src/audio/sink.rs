use super::PcmFormat;
use crate::traits::AudioSink;
use crate::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

/// 正在运行的 aplay 进程及其标准输入
struct AplayProcess {
    child: Child,
    stdin: ChildStdin,
}

struct SinkState {
    format: PcmFormat,
    process: Option<AplayProcess>,
}

/// 使用 aplay 播放原始 PCM 的扬声器输出。
///
/// 写入的数据通过管道送入 aplay 的标准输入；
/// 重新配置时关闭旧进程（等待其播完缓冲），再按新参数启动。
pub struct AplaySink {
    device: String,
    state: Mutex<SinkState>,
}

/// 位深到 aplay `-f` 参数的映射
fn sample_format(bits_per_sample: u16) -> Result<&'static str> {
    match bits_per_sample {
        8 => Ok("U8"),
        16 => Ok("S16_LE"),
        24 => Ok("S24_3LE"),
        32 => Ok("S32_LE"),
        other => Err(Error::UnsupportedFormat(format!("{other}-bit PCM"))),
    }
}

impl AplaySink {
    /// 创建输出，`format` 为收到任何 WAV 头之前使用的默认参数
    pub fn new(device: impl Into<String>, format: PcmFormat) -> Self {
        Self {
            device: device.into(),
            state: Mutex::new(SinkState { format, process: None }),
        }
    }

    fn spawn(&self, format: PcmFormat) -> Result<AplayProcess> {
        let mut cmd = Command::new("aplay");

        // 如果是"auto"，则使用默认设备
        if self.device != "auto" {
            cmd.arg("-D").arg(&self.device);
        }
        cmd.arg("-q")
            .arg("-t")
            .arg("raw")
            .arg("-f")
            .arg(sample_format(format.bits_per_sample)?)
            .arg("-r")
            .arg(format.sample_rate.to_string())
            .arg("-c")
            .arg(format.channels.to_string())
            .arg("-");

        // 设置标准输入为管道，丢弃输出
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::CommandFailed("aplay stdin not captured".into()))?;

        tracing::debug!(?format, device = %self.device, "aplay started");
        Ok(AplayProcess { child, stdin })
    }

    async fn close(process: AplayProcess) {
        let AplayProcess { mut child, stdin } = process;
        // 关闭 stdin 以让 aplay 知道数据已结束
        drop(stdin);
        if let Err(e) = child.wait().await {
            tracing::error!("aplay process failed: {}", e);
        }
    }
}

#[async_trait]
impl AudioSink for AplaySink {
    async fn reconfigure(&self, format: PcmFormat) -> Result<()> {
        // 先校验，避免关掉可用的旧进程
        sample_format(format.bits_per_sample)?;

        let mut state = self.state.lock().await;
        if let Some(process) = state.process.take() {
            Self::close(process).await;
        }
        state.format = format;
        tracing::info!(
            sample_rate = format.sample_rate,
            bits_per_sample = format.bits_per_sample,
            channels = format.channels,
            "Speaker config changed"
        );
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.process.is_none() {
            let process = self.spawn(state.format)?;
            state.process = Some(process);
        }

        let Some(process) = state.process.as_mut() else {
            return Ok(0);
        };
        if let Err(e) = process.stdin.write_all(data).await {
            // aplay 已退出，下一次写入时重新拉起
            tracing::error!("Failed to pipe audio data to aplay: {}", e);
            state.process = None;
            return Err(e.into());
        }
        Ok(data.len())
    }
}
