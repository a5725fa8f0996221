//! Highway 전송 채널
//!
//! 엔진은 `ChannelConnector`가 열어준 채널로만 블록을 보냄.
//! 시간 제한은 엔진이 블록 단위로 씌움.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use super::block::{self, Block, BlockAck};
use super::engine::AttemptError;
use super::ticket::{ChannelKind, Endpoint};

/// 열린 전송 채널 하나
#[async_trait]
pub trait HighwayChannel: Send {
    /// 블록 하나를 보내고 ack를 기다림
    async fn send_block(&mut self, block: &Block) -> Result<BlockAck, AttemptError>;

    /// 정상 종료
    async fn close(&mut self) {}
}

/// 채널 생성기
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn HighwayChannel>, AttemptError>;
}

/// 스트림 채널: 전송 한 번 동안 연결 하나 유지
pub struct StreamChannel<S> {
    stream: S,
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> HighwayChannel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn send_block(&mut self, block: &Block) -> Result<BlockAck, AttemptError> {
        block::write_block(&mut self.stream, block)
            .await
            .map_err(AttemptError::interrupted)?;
        block::read_ack(&mut self.stream)
            .await
            .map_err(AttemptError::interrupted)
    }

    async fn close(&mut self) {
        let _ = tokio::io::AsyncWriteExt::shutdown(&mut self.stream).await;
    }
}

/// 요청 채널: 블록마다 연결 하나 (연결 → 블록 → ack → 종료)
pub struct RequestChannel {
    addr: SocketAddr,
    connect_timeout: Duration,
}

impl RequestChannel {
    pub fn new(addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
        }
    }
}

#[async_trait]
impl HighwayChannel for RequestChannel {
    async fn send_block(&mut self, block: &Block) -> Result<BlockAck, AttemptError> {
        let mut stream = connect_tcp(self.addr, self.connect_timeout)
            .await
            .map_err(AttemptError::interrupted)?;

        block::write_block(&mut stream, block)
            .await
            .map_err(AttemptError::interrupted)?;
        block::read_ack(&mut stream)
            .await
            .map_err(AttemptError::interrupted)
    }
}

/// TCP 채널 생성기
pub struct TcpChannelConnector {
    connect_timeout: Duration,
}

impl TcpChannelConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl ChannelConnector for TcpChannelConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn HighwayChannel>, AttemptError> {
        match endpoint.kind {
            ChannelKind::Stream => {
                let stream = connect_tcp(endpoint.addr, self.connect_timeout)
                    .await
                    .map_err(|e| AttemptError::Transient(format!("{} 연결 실패: {}", endpoint, e)))?;
                debug!("highway 스트림 연결됨: {}", endpoint.addr);
                Ok(Box::new(StreamChannel::new(stream)))
            }
            ChannelKind::Request => Ok(Box::new(RequestChannel::new(
                endpoint.addr,
                self.connect_timeout,
            ))),
        }
    }
}

async fn connect_tcp(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "연결 타임아웃"))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::highway::block::{AckStatus, BlockPlan};
    use crate::highway::ticket::{Resource, ResourceKind, TransferTicket};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_stream_channel_round_trip() {
        let resource = Resource::from_bytes(vec![1u8; 10], ResourceKind::File);
        let ticket = TransferTicket::for_resource(&resource, Vec::new(), Vec::new());
        let plan = BlockPlan::new(&resource.data, 10);

        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let block = block::read_block(&mut server, 1024).await.unwrap();
            let ack = BlockAck::ok(block.header.seq, AckStatus::Continue);
            block::write_ack(&mut server, &ack).await.unwrap();
        });

        let mut channel = StreamChannel::new(client);
        let ack = channel.send_block(&plan.query_block(&ticket, 0)).await.unwrap();
        assert_eq!(ack.status, AckStatus::Continue);
    }

    #[tokio::test]
    async fn test_closed_stream_is_interruption() {
        let resource = Resource::from_bytes(vec![1u8; 10], ResourceKind::File);
        let ticket = TransferTicket::for_resource(&resource, Vec::new(), Vec::new());
        let plan = BlockPlan::new(&resource.data, 10);

        let (client, server) = tokio::io::duplex(1024);
        drop(server);

        let mut channel = StreamChannel::new(client);
        let err = channel
            .send_block(&plan.data_block(0, &resource, &ticket))
            .await
            .unwrap_err();
        assert!(matches!(err, AttemptError::Interrupted(_)));
    }

    #[tokio::test]
    async fn test_request_channel_connects_per_block() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut accepted = 0;
            for _ in 0..2 {
                let (mut socket, _) = listener.accept().await.unwrap();
                accepted += 1;
                let block = block::read_block(&mut socket, 1024).await.unwrap();
                block::write_ack(&mut socket, &BlockAck::ok(block.header.seq, AckStatus::Received))
                    .await
                    .unwrap();
            }
            accepted
        });

        let resource = Resource::from_bytes(vec![9u8; 20], ResourceKind::File);
        let ticket = TransferTicket::for_resource(&resource, Vec::new(), Vec::new());
        let plan = BlockPlan::new(&resource.data, 10);

        let connector = TcpChannelConnector::new(Duration::from_secs(1));
        let mut channel = connector.open(&Endpoint::request(addr)).await.unwrap();
        for index in 0..2 {
            let ack = channel
                .send_block(&plan.data_block(index, &resource, &ticket))
                .await
                .unwrap();
            assert_eq!(ack.seq, index as u32);
        }

        assert_eq!(server.await.unwrap(), 2);
    }
}
