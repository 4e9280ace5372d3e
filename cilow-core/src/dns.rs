//! 强制门户 DNS 劫持：对任何标准查询都应答热点的固定地址

use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const DNS_HEADER_LEN: usize = 12;
const MAX_PACKET_LEN: usize = 512;

/// 一次查询中应答需要的部分：原始头和第一个问题的原始字节
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery<'a> {
    header: [u8; DNS_HEADER_LEN],
    question: &'a [u8],
}

impl<'a> DnsQuery<'a> {
    /// 解析查询包。包长不足、不是标准查询或问题段越界时返回 `None`。
    pub fn parse(packet: &'a [u8]) -> Option<Self> {
        if packet.len() < DNS_HEADER_LEN {
            return None;
        }
        let flags = packet[2];
        // QR 必须为 0（查询），OPCODE 必须为 0（标准查询）
        if flags & 0x80 != 0 || (flags >> 3) & 0x0F != 0 {
            return None;
        }

        // 沿长度前缀的标签走到 0 结束符
        let mut pos = DNS_HEADER_LEN;
        loop {
            let label_len = *packet.get(pos)? as usize;
            if label_len == 0 {
                pos += 1;
                break;
            }
            if label_len & 0xC0 != 0 {
                return None;
            }
            pos += label_len + 1;
        }
        // QTYPE + QCLASS
        let end = pos + 4;
        if end > packet.len() {
            return None;
        }

        let mut header = [0u8; DNS_HEADER_LEN];
        header.copy_from_slice(&packet[..DNS_HEADER_LEN]);
        Some(Self {
            header,
            question: &packet[DNS_HEADER_LEN..end],
        })
    }

    pub fn transaction_id(&self) -> u16 {
        u16::from_be_bytes([self.header[0], self.header[1]])
    }

    /// 构造应答：一个指向问题域名的 A 记录
    pub fn answer(&self, addr: Ipv4Addr, ttl: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(DNS_HEADER_LEN + self.question.len() + 16);
        out.extend_from_slice(&self.header);
        // QR=1, AA=1, 保留 RD；RA=1, RCODE=0
        out[2] = 0x80 | 0x04 | (self.header[2] & 0x01);
        out[3] = 0x80;
        out[4..6].copy_from_slice(&1u16.to_be_bytes());
        out[6..8].copy_from_slice(&1u16.to_be_bytes());
        // 问题之后的段被截掉，NSCOUNT/ARCOUNT 清零
        out[8..12].fill(0);
        out.extend_from_slice(self.question);

        // 压缩指针指回偏移 12 的问题域名
        out.extend_from_slice(&[0xC0, 0x0C]);
        out.extend_from_slice(&1u16.to_be_bytes()); // TYPE A
        out.extend_from_slice(&1u16.to_be_bytes()); // CLASS IN
        out.extend_from_slice(&ttl.to_be_bytes());
        out.extend_from_slice(&4u16.to_be_bytes());
        out.extend_from_slice(&addr.octets());
        out
    }
}

/// 对一个数据包给出应答；应忽略的包返回 `None`
pub fn answer_packet(packet: &[u8], addr: Ipv4Addr, ttl: u32) -> Option<Vec<u8>> {
    DnsQuery::parse(packet).map(|query| query.answer(addr, ttl))
}

/// 运行中的 DNS 劫持服务
#[derive(Debug)]
pub struct DnsResponder {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl DnsResponder {
    /// 绑定 UDP 套接字并在后台任务中应答查询
    pub async fn start(bind_addr: SocketAddr, answer: Ipv4Addr, ttl: u32) -> std::io::Result<Self> {
        let sock = UdpSocket::bind(bind_addr).await?;
        let local_addr = sock.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(run(sock, answer, ttl, shutdown_rx));
        tracing::info!(%local_addr, %answer, "DNS server task start");

        Ok(Self {
            local_addr,
            shutdown_tx,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 关闭套接字并等待后台任务结束
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            tracing::warn!("DNS server task ended abnormally: {}", e);
        }
        tracing::info!(local_addr = %self.local_addr, "DNS server stopped");
    }
}

async fn run(sock: UdpSocket, answer: Ipv4Addr, ttl: u32, mut shutdown_rx: oneshot::Receiver<()>) {
    let mut buf = [0u8; MAX_PACKET_LEN];

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            res = sock.recv_from(&mut buf) => {
                let (len, peer) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::error!("DNS recv error: {}", e);
                        continue;
                    }
                };
                let Some(response) = answer_packet(&buf[..len], answer, ttl) else {
                    tracing::trace!(%peer, len, "Ignoring non-standard or malformed DNS packet");
                    continue;
                };
                if let Err(e) = sock.send_to(&response, peer).await {
                    tracing::warn!(%peer, "DNS send error: {}", e);
                }
            }
        }
    }
}
