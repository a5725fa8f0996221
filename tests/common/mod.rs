//! 테스트용 가짜 서버
//!
//! - `ServerState` + `FakeConnector`: duplex 스트림 위의 제어 채널 서버
//! - `FakeHighway`: TCP 위의 Highway 업로드 서버

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use qnet::connection::{HEARTBEAT_COMMAND, LOGIN_COMMAND, LOGOUT_COMMAND};
use qnet::crypto::{self, KeyPair, SessionKey};
use qnet::frame::{
    self, FrameKind, FrameReader, HandshakeHello, HandshakeReply, LoginRequest, LoginResponse,
    PushEnvelope, RequestEnvelope, ResponseEnvelope,
};
use qnet::highway::block::{self, AckStatus, BlockAck};
use qnet::highway::{ResourceHandle, RESULT_CHECKSUM_MISMATCH};
use qnet::transport::{BoxedStream, Connector};
use qnet::{
    Config, Connection, ConnectionState, Credentials, Event, EventReceiver, MAGIC_NUMBER,
    MAX_FRAME_SIZE, PROTOCOL_VERSION,
};

pub const ACCOUNT: u64 = 10001;
pub const TOKEN: &[u8] = b"valid-token";
pub const PUSH_COMMAND: &str = "OnlinePush.ReqPush";

type Handler = Arc<dyn Fn(&str, &[u8]) -> Option<(i32, Vec<u8>)> + Send + Sync>;

/// 제어 채널 서버 상태 (연결 사이에 유지)
#[derive(Default)]
pub struct ServerState {
    sessions: Mutex<HashMap<u64, SessionKey>>,
    next_session: AtomicU64,
    pub connections: AtomicUsize,
    pub bytes_received: AtomicUsize,
    /// 남은 연결 거부 횟수
    pub refuse: AtomicUsize,
    pub deny_resume: AtomicBool,
    pub commands: Mutex<Vec<String>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    handler: Mutex<Option<Handler>>,
}

impl ServerState {
    /// 현재 연결 강제 종료
    pub fn kill(&self) {
        if let Some(tx) = self.kill.lock().take() {
            let _ = tx.send(());
        }
    }

    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &[u8]) -> Option<(i32, Vec<u8>)> + Send + Sync + 'static,
    {
        *self.handler.lock() = Some(Arc::new(handler));
    }

    pub fn saw_command(&self, command: &str) -> bool {
        self.commands.lock().iter().any(|c| c == command)
    }

    fn handshake(&self, hello: &HandshakeHello, key: &mut Option<SessionKey>) -> HandshakeReply {
        let server = KeyPair::generate();

        if let (Some(id), Some(proof)) = (hello.resume_session_id, hello.resume_proof) {
            if !self.deny_resume.load(Ordering::SeqCst) {
                let existing = self.sessions.lock().get(&id).cloned();
                if let Some(existing) = existing {
                    if crypto::resume_proof(&existing, id, &hello.client_public_key) == proof {
                        *key = Some(existing);
                        return HandshakeReply {
                            server_public_key: server.public_key_bytes(),
                            resumed: true,
                            result_code: 0,
                            message: String::new(),
                        };
                    }
                }
            }
        }

        let shared = server.compute_shared_secret(&hello.client_public_key);
        *key = Some(SessionKey::derive(
            &shared,
            &hello.client_public_key,
            &server.public_key_bytes(),
        ));
        HandshakeReply {
            server_public_key: server.public_key_bytes(),
            resumed: false,
            result_code: 0,
            message: String::new(),
        }
    }

    /// 요청 처리. None이면 연결 종료
    fn handle_request(&self, request: &RequestEnvelope, key: &SessionKey) -> Option<Vec<Bytes>> {
        let respond = |command: &str, code: i32, body: Vec<u8>| {
            let envelope = ResponseEnvelope {
                seq: request.seq,
                command: command.to_string(),
                result_code: code,
                body,
            };
            frame::encode_message(FrameKind::Response, &envelope, Some(key), MAX_FRAME_SIZE).unwrap()
        };
        let command = request.command.as_str();

        let frames = match command {
            LOGIN_COMMAND => {
                let login: LoginRequest = bincode::deserialize(&request.body).unwrap();
                if login.token == TOKEN {
                    let session_id = 1000 + self.next_session.fetch_add(1, Ordering::SeqCst);
                    self.sessions.lock().insert(session_id, key.clone());
                    let body = bincode::serialize(&LoginResponse { session_id }).unwrap();
                    vec![respond(command, 0, body)]
                } else {
                    vec![respond(command, 1, b"bad token".to_vec())]
                }
            }
            "Echo" | HEARTBEAT_COMMAND | LOGOUT_COMMAND => {
                vec![respond(command, 0, request.body.clone())]
            }
            "Silent" => Vec::new(),
            "Duplicate" => vec![
                respond(command, 0, request.body.clone()),
                respond(command, 0, request.body.clone()),
            ],
            "WrongShape" => vec![respond("SomethingElse", 0, Vec::new())],
            "Push" => {
                let push = PushEnvelope {
                    command: PUSH_COMMAND.to_string(),
                    body: request.body.clone(),
                };
                vec![
                    frame::encode_message(FrameKind::Push, &push, Some(key), MAX_FRAME_SIZE).unwrap(),
                    respond(command, 0, Vec::new()),
                ]
            }
            "UnknownKind" => {
                // 모르는 종류의 프레임 뒤에 정상 응답
                let body = [0xEEu8; 24];
                let mut raw = Vec::with_capacity(frame::HEADER_SIZE + body.len());
                raw.extend_from_slice(&MAGIC_NUMBER.to_le_bytes());
                raw.push(PROTOCOL_VERSION);
                raw.push(99);
                raw.extend_from_slice(&(body.len() as u32).to_le_bytes());
                raw.extend_from_slice(&body);
                vec![Bytes::from(raw), respond(command, 0, request.body.clone())]
            }
            "Drop" => return None,
            other => {
                let handler = self.handler.lock().clone();
                match handler.and_then(|h| h(other, &request.body)) {
                    Some((code, body)) => vec![respond(command, code, body)],
                    None => vec![respond(command, 404, b"unknown command".to_vec())],
                }
            }
        };
        Some(frames)
    }
}

async fn serve(state: Arc<ServerState>, mut stream: DuplexStream, mut kill: oneshot::Receiver<()>) {
    let mut reader = FrameReader::default();
    let mut key: Option<SessionKey> = None;
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = tokio::select! {
            _ = &mut kill => return,
            read = stream.read(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            },
        };
        state.bytes_received.fetch_add(n, Ordering::SeqCst);
        reader.extend(&buf[..n]);

        loop {
            let frame = match reader.next_frame(key.as_ref()) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(_) => return,
            };

            let out = match frame.kind {
                FrameKind::Handshake => {
                    let hello: HandshakeHello = frame.parse().unwrap();
                    let reply = state.handshake(&hello, &mut key);
                    vec![frame::encode_message(FrameKind::Handshake, &reply, None, MAX_FRAME_SIZE).unwrap()]
                }
                FrameKind::Request => {
                    let Some(current) = key.clone() else { return };
                    let request: RequestEnvelope = frame.parse().unwrap();
                    state.commands.lock().push(request.command.clone());
                    match state.handle_request(&request, &current) {
                        Some(frames) => frames,
                        None => return,
                    }
                }
                _ => Vec::new(),
            };

            for bytes in out {
                if stream.write_all(&bytes).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// duplex 스트림을 만들어 서버 태스크에 넘기는 연결기
pub struct FakeConnector {
    pub state: Arc<ServerState>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        let refused = self
            .state
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }

        self.state.connections.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(256 * 1024);
        let (kill_tx, kill_rx) = oneshot::channel();
        *self.state.kill.lock() = Some(kill_tx);
        tokio::spawn(serve(Arc::clone(&self.state), server, kill_rx));
        Ok(Box::new(client))
    }
}

pub fn test_config() -> Config {
    // RUST_LOG=qnet=debug 로 실행하면 상세 로그
    let _ = qnet::logging::init(tracing::Level::WARN);
    Config {
        request_timeout_ms: 2_000,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        sweep_interval_ms: 20,
        ..Config::default()
    }
}

/// 연결 생성 (아직 연결하지 않음)
pub fn client(config: Config, token: &[u8]) -> (Connection, EventReceiver, Arc<ServerState>) {
    let state = Arc::new(ServerState::default());
    let connector = Arc::new(FakeConnector {
        state: Arc::clone(&state),
    });
    let (conn, events) = Connection::new(config, connector, Credentials::new(ACCOUNT, token));
    (conn, events, state)
}

/// Online 상태까지 연결
pub async fn online(config: Config) -> (Connection, EventReceiver, Arc<ServerState>) {
    let (conn, events, state) = client(config, TOKEN);
    conn.connect().await.unwrap();
    (conn, events, state)
}

/// 특정 상태로 전이할 때까지 이벤트 소비, 그 사이 전이 목록 반환
pub async fn wait_for_state(
    events: &mut EventReceiver,
    target: ConnectionState,
) -> Vec<(ConnectionState, ConnectionState)> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if let Event::StateChanged { from, to } = event {
                seen.push((from, to));
                if to == target {
                    return;
                }
            }
        }
    })
    .await
    .expect("상태 전이 대기 타임아웃");
    seen
}

// ═══════════════════════════════════════════════════════════════
// Highway 서버
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct HighwayState {
    pub connections: AtomicUsize,
    pub data_blocks: Mutex<Vec<u32>>,
    pub received: Mutex<Vec<u8>>,
    /// Query에 Exists로 응답
    pub exists: AtomicBool,
    /// 0이 아니면 Query에 이 결과 코드로 응답
    pub query_result: AtomicI32,
    /// 이 블록을 받으면 ack 없이 연결 종료 (1회)
    pub drop_at: Mutex<Option<u32>>,
}

pub struct FakeHighway {
    pub addr: SocketAddr,
    pub state: Arc<HighwayState>,
}

impl FakeHighway {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(HighwayState::default());

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_highway(Arc::clone(&accept_state), socket));
            }
        });

        Self { addr, state }
    }
}

pub fn handle_for(digest: &[u8]) -> ResourceHandle {
    ResourceHandle {
        resource_id: hex::encode_upper(digest),
        file_id: 7,
    }
}

async fn serve_highway(state: Arc<HighwayState>, mut socket: TcpStream) {
    loop {
        let block = match block::read_block(&mut socket, 16 * 1024 * 1024).await {
            Ok(block) => block,
            Err(_) => return,
        };
        let seq = block.header.seq;

        let ack = if block.is_query() {
            let code = state.query_result.load(Ordering::SeqCst);
            if code != 0 {
                BlockAck::error(seq, code, "query refused")
            } else if state.exists.load(Ordering::SeqCst) {
                BlockAck::ok(seq, AckStatus::Exists(handle_for(&block.header.digest)))
            } else {
                BlockAck::ok(seq, AckStatus::Continue)
            }
        } else {
            let drop_now = {
                let mut drop_at = state.drop_at.lock();
                if *drop_at == Some(seq) {
                    *drop_at = None;
                    true
                } else {
                    false
                }
            };
            if drop_now {
                return;
            }

            if !block.verify_crc() {
                BlockAck::error(seq, RESULT_CHECKSUM_MISMATCH, "crc mismatch")
            } else {
                {
                    let mut received = state.received.lock();
                    let total = block.header.total_size as usize;
                    if received.len() != total {
                        received.resize(total, 0);
                    }
                    let offset = block.header.offset as usize;
                    received[offset..offset + block.data.len()].copy_from_slice(&block.data);
                }
                state.data_blocks.lock().push(seq);

                let last = block.header.offset + block.header.data_len as u64
                    == block.header.total_size;
                if last {
                    BlockAck::ok(seq, AckStatus::Completed(handle_for(&block.header.digest)))
                } else {
                    BlockAck::ok(seq, AckStatus::Received)
                }
            }
        };

        if block::write_ack(&mut socket, &ack).await.is_err() {
            return;
        }
    }
}
