//! 전송 계층
//!
//! 연결 상태 머신은 `Connector`가 돌려주는 바이트 스트림만 사용함.
//! 서버 주소는 정적 설정이 아니라 서버 협상 결과로 갱신됨.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// 양방향 바이트 스트림
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// 전송 계층 연결기
#[async_trait]
pub trait Connector: Send + Sync {
    /// 스트림 하나 연결. 실패 시 상태 머신이 백오프 후 재호출
    async fn connect(&self) -> io::Result<BoxedStream>;
}

/// 서버 정보
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub addr: SocketAddr,

    /// 연속 실패 횟수
    pub failures: u32,

    /// 활성 상태
    pub active: bool,

    /// 마지막 성공 시각
    pub last_success: Option<Instant>,
}

impl ServerInfo {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            failures: 0,
            active: true,
            last_success: None,
        }
    }
}

/// TCP 연결기
///
/// 서버 목록을 순서대로 돌면서 연결, 연속 실패한 서버는 비활성화
pub struct TcpConnector {
    servers: RwLock<Vec<ServerInfo>>,
    cursor: AtomicUsize,
    connect_timeout: Duration,
    /// 이 횟수만큼 연속 실패하면 비활성화
    max_failures: u32,
}

impl TcpConnector {
    pub fn new(servers: Vec<SocketAddr>, connect_timeout: Duration) -> Self {
        Self {
            servers: RwLock::new(servers.into_iter().map(ServerInfo::new).collect()),
            cursor: AtomicUsize::new(0),
            connect_timeout,
            max_failures: 2,
        }
    }

    /// 서버가 내려준 새 목록으로 교체
    pub fn update_servers(&self, servers: Vec<SocketAddr>) {
        info!("서버 목록 갱신: {} 개", servers.len());
        *self.servers.write() = servers.into_iter().map(ServerInfo::new).collect();
        self.cursor.store(0, Ordering::Relaxed);
    }

    /// 다음 연결 대상 선택
    fn select_server(&self) -> Option<SocketAddr> {
        let mut servers = self.servers.write();
        if servers.is_empty() {
            return None;
        }

        // 모두 비활성이면 전부 다시 살림
        if servers.iter().all(|s| !s.active) {
            for server in servers.iter_mut() {
                server.active = true;
                server.failures = 0;
            }
        }

        let len = servers.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        (0..len)
            .map(|i| &servers[(start + i) % len])
            .find(|s| s.active)
            .map(|s| s.addr)
    }

    fn record_result(&self, addr: SocketAddr, success: bool) {
        let mut servers = self.servers.write();
        if let Some(server) = servers.iter_mut().find(|s| s.addr == addr) {
            if success {
                server.failures = 0;
                server.last_success = Some(Instant::now());
            } else {
                server.failures += 1;
                if server.failures >= self.max_failures {
                    warn!("서버 비활성화: {} ({}회 연속 실패)", addr, server.failures);
                    server.active = false;
                }
            }
        }
    }

    /// 서버 상태 복사
    pub fn servers(&self) -> Vec<ServerInfo> {
        self.servers.read().clone()
    }

    pub fn active_server_count(&self) -> usize {
        self.servers.read().iter().filter(|s| s.active).count()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        let addr = self
            .select_server()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "서버 목록 비어 있음"))?;

        debug!("TCP 연결 시도: {}", addr);
        let result = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await
        {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "연결 타임아웃")),
        };

        match result {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                self.record_result(addr, true);
                info!("TCP 연결됨: {}", addr);
                Ok(Box::new(stream))
            }
            Err(e) => {
                self.record_result(addr, false);
                Err(e)
            }
        }
    }
}
