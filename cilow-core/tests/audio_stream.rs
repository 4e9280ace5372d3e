#![cfg(feature = "backend_mock")]

mod common;

use cilow_core::audio::PcmFormat;
use cilow_core::backends::mock::MockRadio;
use cilow_core::control::ProvisioningMode;
use common::{eventually, wav_header, Harness};
use futures_util::SinkExt;
use tokio_tungstenite::tungstenite::Message;

async fn station_harness() -> (Harness, std::net::SocketAddr) {
    let harness = Harness::start(
        |tx| MockRadio::new(tx).with_network("home", "secret123"),
        Some(("home", "secret123")),
    )
    .await;
    let addr = harness.server_addr(ProvisioningMode::StationOnly).await;
    (harness, addr)
}

async fn wait_for_writes(harness: &Harness, count: usize) -> Vec<Vec<u8>> {
    let sink = harness.sink.clone();
    eventually(|| {
        let sink = sink.clone();
        async move {
            let writes = sink.writes.lock().unwrap().clone();
            (writes.len() >= count).then_some(writes)
        }
    })
    .await
}

#[tokio::test]
async fn header_then_frames_are_forwarded_in_order() {
    let (harness, addr) = station_harness().await;
    let mut ws = harness.ws(addr).await;

    ws.send(Message::binary(wav_header(8000, 16, 1))).await.unwrap();
    let frames: Vec<Vec<u8>> = vec![vec![1u8; 320], vec![2u8; 320], vec![3u8; 17]];
    for frame in &frames {
        ws.send(Message::binary(frame.clone())).await.unwrap();
    }

    let writes = wait_for_writes(&harness, 3).await;
    assert_eq!(writes, frames);
    assert_eq!(
        *harness.sink.formats.lock().unwrap(),
        vec![PcmFormat { sample_rate: 8000, bits_per_sample: 16, channels: 1 }]
    );
}

#[tokio::test]
async fn invalid_header_is_dropped_until_a_valid_one_arrives() {
    let (harness, addr) = station_harness().await;
    let mut ws = harness.ws(addr).await;

    let mut not_pcm = wav_header(8000, 16, 1);
    not_pcm[20] = 3; // IEEE float
    ws.send(Message::binary(not_pcm)).await.unwrap();
    ws.send(Message::binary(b"RIFX short".to_vec())).await.unwrap();
    ws.send(Message::binary(wav_header(22050, 8, 2))).await.unwrap();
    ws.send(Message::binary(vec![0x80u8; 64])).await.unwrap();

    let writes = wait_for_writes(&harness, 1).await;
    assert_eq!(writes, vec![vec![0x80u8; 64]]);
    assert_eq!(
        *harness.sink.formats.lock().unwrap(),
        vec![PcmFormat { sample_rate: 22050, bits_per_sample: 8, channels: 2 }]
    );
}

#[tokio::test]
async fn each_connection_starts_a_new_audio_session() {
    let (harness, addr) = station_harness().await;

    let mut first = harness.ws(addr).await;
    first.send(Message::binary(wav_header(16000, 16, 1))).await.unwrap();
    first.send(Message::binary(vec![1u8; 10])).await.unwrap();
    wait_for_writes(&harness, 1).await;
    first.close(None).await.unwrap();

    // 新连接的第一帧重新当作文件头解析，不会被当作音频写出
    let mut second = harness.ws(addr).await;
    second.send(Message::binary(wav_header(24000, 16, 1))).await.unwrap();
    second.send(Message::binary(vec![2u8; 10])).await.unwrap();

    let writes = wait_for_writes(&harness, 2).await;
    assert_eq!(writes, vec![vec![1u8; 10], vec![2u8; 10]]);
    let formats = harness.sink.formats.lock().unwrap().clone();
    assert_eq!(formats.len(), 2);
    assert_eq!(formats[1].sample_rate, 24000);
}
