#![allow(dead_code)]

use async_trait::async_trait;
use cilow_core::audio::PcmFormat;
use cilow_core::backends::mock::{MockRadio, RadioCall};
use cilow_core::config::AppConfig;
use cilow_core::control::ControlServer;
use cilow_core::frontends::provider_embed::EmbedFrontend;
use cilow_core::lifecycle::Supervisor;
use cilow_core::traits::{AudioSink, RadioDriver, RadioEvent};
use cilow_core::wifi::ConnectionManager;
use cilow_core::Result;
use futures_util::StreamExt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 记录所有重配置和写入的扬声器
#[derive(Default)]
pub struct RecordingSink {
    pub formats: Mutex<Vec<PcmFormat>>,
    pub writes: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn reconfigure(&self, format: PcmFormat) -> Result<()> {
        self.formats.lock().unwrap().push(format);
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        self.writes.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }
}

/// 所有监听地址都换成本机随机端口
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::embedded().unwrap();
    config.dns.bind_addr = "127.0.0.1:0".parse().unwrap();
    config.server.bind_addr = "127.0.0.1:0".parse().unwrap();
    config
}

pub struct Harness {
    pub radio: Arc<MockRadio>,
    pub sink: Arc<RecordingSink>,
    pub manager: ConnectionManager,
    pub server: Arc<ControlServer>,
    pub run: JoinHandle<Result<()>>,
}

impl Harness {
    /// 启动完整服务。`saved` 模拟开机前已保存的 STA 凭据。
    pub async fn start<F>(build: F, saved: Option<(&str, &str)>) -> Self
    where
        F: FnOnce(mpsc::UnboundedSender<RadioEvent>) -> MockRadio,
    {
        let config = test_config();
        let (tx, rx) = mpsc::unbounded_channel();
        let radio = Arc::new(build(tx));
        if let Some((ssid, pass)) = saved {
            radio.set_station_config(ssid, pass).await.unwrap();
        }

        let sink = Arc::new(RecordingSink::default());
        let supervisor = Supervisor::new(
            &config,
            radio.clone(),
            rx,
            sink.clone(),
            Arc::new(EmbedFrontend::new()),
        );
        let manager = supervisor.manager().clone();
        let server = supervisor.server().clone();
        let run = tokio::spawn(supervisor.run());

        Self { radio, sink, manager, server, run }
    }

    pub fn connect_calls(&self) -> usize {
        self.radio.calls().iter().filter(|c| **c == RadioCall::Connect).count()
    }

    /// 等待控制服务以指定模式运行，返回监听地址
    pub async fn server_addr(&self, mode: cilow_core::control::ProvisioningMode) -> SocketAddr {
        let server = self.server.clone();
        eventually(|| {
            let server = server.clone();
            async move {
                match (server.mode().await, server.local_addr().await) {
                    (Some(m), Some(addr)) if m == mode => Some(addr),
                    _ => None,
                }
            }
        })
        .await
    }

    pub async fn ws(&self, addr: SocketAddr) -> Ws {
        let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        ws
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.run.abort();
    }
}

/// 反复检查直到得到结果，最多等 3 秒
pub async fn eventually<T, F, Fut>(mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if let Some(value) = check().await {
            return value;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// 读取下一条文本消息并解析成 JSON
pub async fn next_json(ws: &mut Ws) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out waiting for a control message")
            .expect("control channel closed")
            .unwrap();
        if let Message::Text(_) = msg {
            return serde_json::from_str(msg.to_text().unwrap()).unwrap();
        }
    }
}

/// 在一段时间内不应收到任何文本消息
pub async fn assert_silent(ws: &mut Ws, wait: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = tokio::time::timeout(wait, ws.next()).await {
        panic!("unexpected control message: {}", text.as_str());
    }
}

/// 标准 A 查询
pub fn dns_query(name: &str, id: u16) -> Vec<u8> {
    let mut packet = Vec::new();
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&[0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0]);
    for label in name.split('.') {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);
    packet.extend_from_slice(&[0, 1, 0, 1]);
    packet
}

/// 44 字节 PCM WAV 头
pub fn wav_header(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Vec<u8> {
    cilow_core::audio::WavHeader { sample_rate, bits_per_sample, channels, data_len: 0 }
        .to_bytes()
        .to_vec()
}
