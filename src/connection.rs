//! 연결 상태 머신
//!
//! - 물리 전송 소유, 핸드쉐이크/로그인/재연결 처리
//! - 수신 루프: 프레임을 도착 순서대로 디코딩해서 응답은 상관관리자로, 푸시는 이벤트 채널로
//! - 송신: Online 상태에서만 허용, 프레임을 쓰기 전에 대기자를 먼저 등록
//!
//! 태스크 구성 (연결 세대마다 새로 생성):
//! - 수신 태스크: 읽기 절반의 유일한 소비자
//! - 송신 태스크: 쓰기 절반의 유일한 소유자, mpsc 큐로 프레임을 받음
//! - 스윕 태스크: 주기적으로 타임아웃 처리
//! - Heartbeat 태스크 (선택)

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::correlator::{PendingResponse, RequestCorrelator, Response};
use crate::crypto::{self, EphemeralKeyPair, SessionKey};
use crate::event::{self, Event, EventReceiver, EventSender};
use crate::frame::{
    self, DecodeError, Frame, FrameKind, FrameReader, HandshakeHello, HandshakeReply,
    LoginRequest, LoginResponse, PushEnvelope, RequestEnvelope, ResponseEnvelope,
};
use crate::key_store::SessionKeyStore;
use crate::state::{ConnectionState, Session};
use crate::stats::ConnectionStats;
use crate::transport::{BoxedStream, Connector};
use crate::{Config, Error, Result, PROTOCOL_VERSION};

/// 로그인 명령
pub const LOGIN_COMMAND: &str = "wtlogin.login";

/// Heartbeat 명령
pub const HEARTBEAT_COMMAND: &str = "Heartbeat.Alive";

/// 로그아웃 명령
pub const LOGOUT_COMMAND: &str = "StatSvc.Logout";

/// 송신 큐 길이
const WRITE_QUEUE_SIZE: usize = 1024;

/// 로그인 자격 증명
#[derive(Clone)]
pub struct Credentials {
    pub account: u64,
    pub token: Vec<u8>,
    pub client_version: String,
}

impl Credentials {
    pub fn new(account: u64, token: impl Into<Vec<u8>>) -> Self {
        Self {
            account,
            token: token.into(),
            client_version: concat!("qnet/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("token", &crate::logging::RedactedBytes(&self.token))
            .finish()
    }
}

/// 공유 상태
struct Inner {
    config: Config,
    connector: Arc<dyn Connector>,
    credentials: Credentials,

    /// 상태 필드. 모든 전이는 쓰기 락 안에서 일어남
    session: RwLock<Session>,

    keys: SessionKeyStore,
    correlator: Arc<RequestCorrelator>,

    /// 현재 세대의 송신 큐
    writer: Mutex<Option<mpsc::Sender<Bytes>>>,

    /// 현재 세대의 태스크들
    tasks: Mutex<Vec<JoinHandle<()>>>,

    /// 새 요청 등록 시 스윕 태스크가 마감 시각을 다시 계산하도록
    sweep_wake: Notify,

    events: EventSender,
    stats: RwLock<ConnectionStats>,
}

/// 연결 핸들 (복제 가능)
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// 새 연결 생성 (아직 연결하지 않음)
    pub fn new(
        config: Config,
        connector: Arc<dyn Connector>,
        credentials: Credentials,
    ) -> (Self, EventReceiver) {
        let (events, event_rx) = event::channel();

        let inner = Arc::new(Inner {
            config,
            connector,
            credentials,
            session: RwLock::new(Session::new()),
            keys: SessionKeyStore::new(),
            correlator: RequestCorrelator::new(),
            writer: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            sweep_wake: Notify::new(),
            events,
            stats: RwLock::new(ConnectionStats::new()),
        });

        (Self { inner }, event_rx)
    }

    /// 연결 + 핸드쉐이크 + 로그인
    ///
    /// 전송 계층 연결 자체가 `connect_attempts`번 실패하면 `Disconnected`로 돌아가고
    /// `Transport` 에러. 핸드쉐이크/로그인 실패는 재연결 정책으로 넘어감.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut session = self.inner.session.write();
            match session.state {
                ConnectionState::Online => return Ok(()),
                ConnectionState::Closed => return Err(Error::SessionClosed),
                ConnectionState::Disconnected => {
                    self.inner.set_state(&mut session, ConnectionState::Connecting);
                }
                other => {
                    return Err(Error::Transport(format!("이미 연결 진행 중: {}", other)));
                }
            }
        }

        let stream = match self.inner.open_transport(self.inner.config.connect_attempts).await {
            Ok(stream) => stream,
            Err(e) => {
                let mut session = self.inner.session.write();
                if session.state == ConnectionState::Connecting {
                    self.inner.set_state(&mut session, ConnectionState::Disconnected);
                }
                return Err(e);
            }
        };

        match Arc::clone(&self.inner).establish(stream, false).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("초기 세션 수립 실패: {}", e);
                if !self.inner.enter_reconnecting() {
                    return Err(e);
                }
                Arc::clone(&self.inner).reconnect_loop().await
            }
        }
    }

    /// 요청 전송 후 응답 대기 (기본 타임아웃)
    pub async fn send(&self, command: &str, body: impl Into<Vec<u8>>) -> Result<Response> {
        self.send_with_timeout(command, body, self.inner.config.request_timeout())
            .await
    }

    /// 요청 전송 후 응답 대기 (타임아웃 지정)
    pub async fn send_with_timeout(
        &self,
        command: &str,
        body: impl Into<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Response> {
        self.inner
            .send_request(command, body.into(), timeout)
            .await?
            .wait()
            .await
    }

    /// 요청 전송 후 취소 가능한 대기 핸들 반환
    pub async fn send_request(
        &self,
        command: &str,
        body: impl Into<Vec<u8>>,
        timeout: Duration,
    ) -> Result<PendingResponse> {
        self.inner.send_request(command, body.into(), timeout).await
    }

    /// 로그아웃 후 종료
    ///
    /// Online이면 로그아웃 요청을 한 번 보내보고, 응답 여부와 상관없이 종료
    pub async fn logout(&self) -> Result<()> {
        if self.state().is_online() {
            let timeout = self.inner.config.request_timeout().min(Duration::from_secs(3));
            if let Err(e) = self.send_with_timeout(LOGOUT_COMMAND, Vec::new(), timeout).await {
                debug!("로그아웃 요청 실패 (무시): {}", e);
            }
        }
        self.close();
        Ok(())
    }

    /// 즉시 종료 (종료 상태)
    pub fn close(&self) {
        self.inner.close();
    }

    /// 현재 상태
    pub fn state(&self) -> ConnectionState {
        self.inner.session.read().state
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// 마지막 수신 시각
    pub fn last_activity(&self) -> Instant {
        self.inner.session.read().last_activity
    }

    pub fn session_id(&self) -> Option<u64> {
        self.inner.keys.session_id()
    }

    pub fn key_store(&self) -> &SessionKeyStore {
        &self.inner.keys
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// 통계 반환
    pub fn stats(&self) -> ConnectionStats {
        self.inner.stats.read().clone()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Inner {
    /// 상태 전이 + 이벤트 발행. 호출자가 쓰기 락을 잡고 있어야 함
    fn set_state(&self, session: &mut Session, next: ConnectionState) -> bool {
        match session.transition(next) {
            Ok(previous) => {
                info!("연결 상태: {} -> {}", previous, next);
                let _ = self.events.send(Event::StateChanged {
                    from: previous,
                    to: next,
                });
                true
            }
            Err(current) => {
                warn!("허용되지 않은 상태 전이 무시: {} -> {}", current, next);
                false
            }
        }
    }

    /// 핸드쉐이크/로그인 실패 후 재연결 상태로 진입
    ///
    /// 재시도 횟수가 0이면 종료하고 false
    fn enter_reconnecting(&self) -> bool {
        if self.config.max_reconnect_attempts == 0 {
            self.close();
            return false;
        }
        let mut session = self.session.write();
        match session.state {
            ConnectionState::Connecting | ConnectionState::AwaitingAuth => {
                self.set_state(&mut session, ConnectionState::Reconnecting)
            }
            ConnectionState::Reconnecting => true,
            _ => false,
        }
    }

    /// 전송 계층 연결 (백오프 포함)
    async fn open_transport(&self, attempts: u32) -> Result<BoxedStream> {
        let mut last_error = String::from("연결 시도 없음");

        for attempt in 0..attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(self.config.backoff_delay(attempt - 1)).await;
            }
            if self.session.read().state.is_terminal() {
                return Err(Error::SessionClosed);
            }

            match tokio::time::timeout(self.config.connect_timeout(), self.connector.connect())
                .await
            {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => {
                    warn!("전송 계층 연결 실패 ({}/{}): {}", attempt + 1, attempts, e);
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!("전송 계층 연결 타임아웃 ({}/{})", attempt + 1, attempts);
                    last_error = "연결 타임아웃".into();
                }
            }
        }

        Err(Error::Transport(last_error))
    }

    /// 핸드쉐이크 → (필요 시) 로그인 → Online
    ///
    /// 반환값: 세션 재개 여부
    async fn establish(self: Arc<Self>, mut stream: BoxedStream, reconnecting: bool) -> Result<bool> {
        let mut reader = FrameReader::new(self.config.max_frame_size);
        let timeout = self.config.request_timeout();

        let handshake = tokio::time::timeout(timeout, self.handshake(&mut stream, &mut reader));
        let resumed = match handshake.await {
            Ok(result) => result?,
            Err(_) => return Err(Error::HandshakeFailed("핸드쉐이크 응답 타임아웃".into())),
        };

        if !resumed {
            {
                let mut session = self.session.write();
                if session.state.is_terminal()
                    || !self.set_state(&mut session, ConnectionState::AwaitingAuth)
                {
                    return Err(Error::SessionClosed);
                }
            }

            match tokio::time::timeout(timeout, self.login(&mut stream, &mut reader)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::LoginFailed {
                        code: -1,
                        message: "로그인 응답 타임아웃".into(),
                    })
                }
            }
        }

        if reconnecting {
            self.stats.write().record_reconnect(resumed);
        }
        self.go_online(stream, reader)?;
        Ok(resumed)
    }

    /// 키 교환
    ///
    /// 이전 세션 ID가 있으면 재개를 요청하고, 서버가 재검증해 준 경우에만 키 유지
    async fn handshake(&self, stream: &mut BoxedStream, reader: &mut FrameReader) -> Result<bool> {
        let ephemeral = EphemeralKeyPair::generate();
        let client_public = ephemeral.public_key_bytes();

        let resume = self
            .keys
            .snapshot()
            .and_then(|(key, session_id)| session_id.map(|id| (key, id)));

        let hello = HandshakeHello {
            client_public_key: client_public,
            resume_session_id: resume.as_ref().map(|(_, id)| *id),
            resume_proof: resume
                .as_ref()
                .map(|(key, id)| crypto::resume_proof(key, *id, &client_public)),
            protocol_version: PROTOCOL_VERSION,
            timestamp_us: frame::now_micros(),
        };

        let bytes = frame::encode_message(
            FrameKind::Handshake,
            &hello,
            None,
            self.config.max_frame_size,
        )?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;

        let frame = read_frame(stream, reader, None).await?;
        if frame.kind != FrameKind::Handshake {
            return Err(Error::HandshakeFailed(format!(
                "핸드쉐이크 응답 대신 {:?} 수신",
                frame.kind
            )));
        }

        let reply: HandshakeReply = frame.parse()?;
        if reply.result_code != 0 {
            return Err(Error::HandshakeFailed(format!(
                "code={}, {}",
                reply.result_code, reply.message
            )));
        }

        if reply.resumed && resume.is_some() {
            info!("세션 재개: session_id={:?}", self.keys.session_id());
            return Ok(true);
        }

        if resume.is_some() {
            info!("서버가 세션 재개 거절, 새 키로 교체");
        }
        self.keys
            .install(ephemeral.into_session_key(&reply.server_public_key));
        Ok(false)
    }

    /// 로그인 (태스크 생성 전, 스트림 직접 사용)
    async fn login(&self, stream: &mut BoxedStream, reader: &mut FrameReader) -> Result<()> {
        let key = self.keys.current_key().ok_or(Error::NotConnected)?;
        let seq = self.correlator.next_seq();

        let request = LoginRequest {
            account: self.credentials.account,
            token: self.credentials.token.clone(),
            client_version: self.credentials.client_version.clone(),
        };
        let envelope = RequestEnvelope {
            seq,
            command: LOGIN_COMMAND.to_string(),
            body: bincode::serialize(&request)?,
        };

        let bytes = frame::encode_message(
            FrameKind::Request,
            &envelope,
            Some(&key),
            self.config.max_frame_size,
        )?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        self.stats.write().record_sent(bytes.len());

        loop {
            let frame = read_frame(stream, reader, Some(&key)).await?;
            match frame.kind {
                FrameKind::Response => {
                    let response: ResponseEnvelope = frame.parse()?;
                    if response.seq != seq {
                        debug!("로그인 중 다른 응답 무시: seq={}", response.seq);
                        continue;
                    }
                    if response.result_code != 0 {
                        return Err(Error::LoginFailed {
                            code: response.result_code,
                            message: String::from_utf8_lossy(&response.body).into_owned(),
                        });
                    }

                    let login: LoginResponse = bincode::deserialize(&response.body)?;
                    self.keys.set_session_id(login.session_id);
                    info!(
                        "로그인 성공: account={}, session_id={}",
                        self.credentials.account, login.session_id
                    );
                    return Ok(());
                }
                FrameKind::Push => self.dispatch_push(&frame),
                other => debug!("로그인 중 예상 밖 프레임 무시: {:?}", other),
            }
        }
    }

    /// 태스크 생성 후 Online 전이
    fn go_online(self: &Arc<Self>, stream: BoxedStream, reader: FrameReader) -> Result<()> {
        let key = self.keys.current_key().ok_or(Error::NotConnected)?;
        let (read_half, write_half) = tokio::io::split(stream);
        let (write_tx, write_rx) = mpsc::channel::<Bytes>(WRITE_QUEUE_SIZE);

        let generation = {
            let mut session = self.session.write();
            if session.state.is_terminal() {
                return Err(Error::SessionClosed);
            }
            // 송신 큐를 먼저 연결해야 Online을 본 송신자가 큐를 찾을 수 있음
            *self.writer.lock() = Some(write_tx);
            if !self.set_state(&mut session, ConnectionState::Online) {
                self.writer.lock().take();
                return Err(Error::NotConnected);
            }
            session.generation += 1;
            session.touch();
            session.generation
        };

        let mut tasks = vec![
            tokio::spawn(Arc::clone(self).write_loop(write_half, write_rx, generation)),
            tokio::spawn(Arc::clone(self).read_loop(read_half, reader, key, generation)),
            tokio::spawn(Arc::clone(self).sweep_loop(generation)),
        ];
        if let Some(interval) = self.config.heartbeat_interval() {
            tasks.push(tokio::spawn(
                Arc::clone(self).heartbeat_loop(interval, generation),
            ));
        }

        let old = std::mem::replace(&mut *self.tasks.lock(), tasks);
        for task in old {
            task.abort();
        }
        Ok(())
    }

    /// 요청 등록 + 송신 큐 투입
    async fn send_request(
        &self,
        command: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<PendingResponse> {
        // 상태 확인과 등록을 같은 읽기 락 안에서 처리:
        // 끊김 처리(fail_all)와 등록 사이에 끼어드는 요청이 없어야 함
        let (pending, bytes, writer) = {
            let session = self.session.read();
            match session.state {
                ConnectionState::Online => {}
                ConnectionState::Closed => return Err(Error::SessionClosed),
                _ => return Err(Error::NotConnected),
            }

            let key = self.keys.current_key().ok_or(Error::NotConnected)?;
            let writer = self.writer.lock().clone().ok_or(Error::NotConnected)?;

            let seq = self.correlator.next_seq();
            let envelope = RequestEnvelope {
                seq,
                command: command.to_string(),
                body,
            };
            // 크기 초과는 등록 전에 거절: 이 요청만 실패하고 연결은 유지
            let bytes = frame::encode_message(
                FrameKind::Request,
                &envelope,
                Some(&key),
                self.config.max_frame_size,
            )?;
            let pending = self
                .correlator
                .register(seq, command, Instant::now() + timeout)?;
            (pending, bytes, writer)
        };

        self.sweep_wake.notify_one();
        debug!("요청 전송: seq={}, command={}", pending.seq(), command);
        if writer.send(bytes).await.is_err() {
            self.correlator.fail(pending.seq(), Error::ConnectionLost);
        }
        Ok(pending)
    }

    async fn write_loop(
        self: Arc<Self>,
        mut write_half: WriteHalf<BoxedStream>,
        mut write_rx: mpsc::Receiver<Bytes>,
        generation: u64,
    ) {
        while let Some(bytes) = write_rx.recv().await {
            let result = async {
                write_half.write_all(&bytes).await?;
                write_half.flush().await
            }
            .await;

            match result {
                Ok(()) => self.stats.write().record_sent(bytes.len()),
                Err(e) => {
                    warn!("송신 에러: {}", e);
                    self.handle_transport_lost(generation, "송신 실패");
                    return;
                }
            }
        }

        // 큐가 닫힘 = 종료 또는 세대 교체
        let _ = write_half.shutdown().await;
    }

    async fn read_loop(
        self: Arc<Self>,
        mut read_half: ReadHalf<BoxedStream>,
        mut reader: FrameReader,
        key: SessionKey,
        generation: u64,
    ) {
        let mut consecutive_auth_failures = 0u32;

        loop {
            // 버퍼에 남은 프레임부터 모두 처리
            loop {
                match reader.next_frame(Some(&key)) {
                    Ok(Some(frame)) => {
                        consecutive_auth_failures = 0;
                        self.handle_frame(frame);
                        let expired = self.correlator.timeout_sweep(Instant::now());
                        if expired > 0 {
                            self.stats.write().timeouts += expired as u64;
                        }
                    }
                    Ok(None) => break,
                    Err(DecodeError::AuthenticationFailed) => {
                        consecutive_auth_failures += 1;
                        self.stats.write().auth_failures += 1;
                        warn!(
                            "프레임 무결성 검증 실패, 폐기 ({}/{})",
                            consecutive_auth_failures, self.config.max_auth_failures
                        );
                        if consecutive_auth_failures > self.config.max_auth_failures {
                            self.handle_transport_lost(generation, "무결성 검증 연속 실패");
                            return;
                        }
                    }
                    Err(e) if e.is_stream_fatal() => {
                        warn!("스트림 동기화 실패: {}", e);
                        self.handle_transport_lost(generation, "프레임 스트림 손상");
                        return;
                    }
                    Err(e) => warn!("프레임 폐기: {}", e),
                }
            }

            match read_half.read_buf(reader.buffer_mut()).await {
                Ok(0) => {
                    info!("서버가 연결을 닫음");
                    self.handle_transport_lost(generation, "EOF");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("수신 에러: {}", e);
                    self.handle_transport_lost(generation, "수신 실패");
                    return;
                }
            }
        }
    }

    fn handle_frame(&self, frame: Frame) {
        let size = frame.payload.len() + frame::HEADER_SIZE;
        self.stats.write().record_received(size);
        self.session.write().touch();

        match frame.kind {
            FrameKind::Response => match frame.parse::<ResponseEnvelope>() {
                Ok(envelope) => {
                    let resolved = self.correlator.resolve(Response {
                        seq: envelope.seq,
                        command: envelope.command,
                        result_code: envelope.result_code,
                        body: Bytes::from(envelope.body),
                    });
                    if !resolved {
                        self.stats.write().orphan_responses += 1;
                    }
                }
                Err(e) => warn!("응답 본문 파싱 실패: {}", e),
            },
            FrameKind::Push => self.dispatch_push(&frame),
            other => debug!("예상 밖 프레임 무시: {:?}", other),
        }
    }

    fn dispatch_push(&self, frame: &Frame) {
        match frame.parse::<PushEnvelope>() {
            Ok(push) => {
                debug!("푸시 수신: command={}", push.command);
                self.stats.write().pushes_received += 1;
                let _ = self.events.send(Event::Push {
                    command: push.command,
                    payload: Bytes::from(push.body),
                });
            }
            Err(e) => warn!("푸시 본문 파싱 실패: {}", e),
        }
    }

    async fn sweep_loop(self: Arc<Self>, generation: u64) {
        let interval = self.config.sweep_interval();

        loop {
            // 가장 이른 마감이 주기보다 빠르면 그 시각에 깨어남
            let mut wake = Instant::now() + interval;
            if let Some(deadline) = self.correlator.next_deadline() {
                wake = wake.min(deadline);
            }
            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {}
                _ = self.sweep_wake.notified() => {}
            }

            if self.session.read().generation != generation {
                return;
            }
            let expired = self.correlator.timeout_sweep(Instant::now());
            if expired > 0 {
                debug!("타임아웃 스윕: {} 건", expired);
                self.stats.write().timeouts += expired as u64;
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>, interval: Duration, generation: u64) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

        loop {
            ticker.tick().await;
            if self.session.read().generation != generation {
                return;
            }

            let pending = match self
                .send_request(HEARTBEAT_COMMAND, Vec::new(), self.config.request_timeout())
                .await
            {
                Ok(pending) => pending,
                Err(_) => return,
            };

            match pending.wait().await {
                Ok(_) => debug!("heartbeat ok"),
                Err(Error::Timeout { .. }) => {
                    warn!("heartbeat 타임아웃, 연결 재수립");
                    self.handle_transport_lost(generation, "heartbeat 타임아웃");
                    return;
                }
                Err(e) if e.is_connection_fatal() => return,
                Err(e) => warn!("heartbeat 실패: {}", e),
            }
        }
    }

    /// 전송 끊김 처리
    ///
    /// Online → Reconnecting 전이와 모든 대기 요청의 `ConnectionLost` 실패를
    /// 같은 쓰기 락 안에서 처리. 이전 세대의 보고는 무시.
    fn handle_transport_lost(self: &Arc<Self>, generation: u64, reason: &str) {
        {
            let mut session = self.session.write();
            if session.generation != generation || session.state != ConnectionState::Online {
                return;
            }

            warn!("연결 끊김: {}", reason);
            self.writer.lock().take();
            let failed = self.correlator.fail_all(|| Error::ConnectionLost);
            if failed > 0 {
                info!("대기 요청 {} 건 ConnectionLost 처리", failed);
            }
            self.set_state(&mut session, ConnectionState::Reconnecting);
            // 이 세대의 나머지 태스크가 다시 보고하지 않도록
            session.generation += 1;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        if self.config.max_reconnect_attempts == 0 {
            self.close();
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.reconnect_loop().await {
                warn!("재연결 포기: {}", e);
            }
        });
    }

    /// 재연결 루프
    ///
    /// 성공하면 Online, 재시도를 소진하면 Closed
    async fn reconnect_loop(self: Arc<Self>) -> Result<()> {
        let attempts = self.config.max_reconnect_attempts;

        for attempt in 0..attempts {
            tokio::time::sleep(self.config.backoff_delay(attempt)).await;

            if self.session.read().state.is_terminal() {
                return Err(Error::SessionClosed);
            }
            info!("재연결 시도 {}/{}", attempt + 1, attempts);

            let stream = match self.open_transport(1).await {
                Ok(stream) => stream,
                Err(Error::SessionClosed) => return Err(Error::SessionClosed),
                Err(e) => {
                    warn!("재연결 실패: {}", e);
                    continue;
                }
            };

            match Arc::clone(&self).establish(stream, true).await {
                Ok(_) => return Ok(()),
                Err(Error::SessionClosed) => return Err(Error::SessionClosed),
                Err(e) => {
                    warn!("재연결 후 세션 수립 실패: {}", e);
                    let mut session = self.session.write();
                    if session.state == ConnectionState::AwaitingAuth {
                        self.set_state(&mut session, ConnectionState::Reconnecting);
                    }
                }
            }
        }

        self.close();
        Err(Error::Transport(format!("재연결 {}회 실패", attempts)))
    }

    /// 종료 상태로 전이, 키 폐기, 대기 요청 실패 처리
    fn close(&self) {
        {
            let mut session = self.session.write();
            if session.state.is_terminal() {
                return;
            }
            self.writer.lock().take();
            self.correlator.fail_all(|| Error::SessionClosed);
            self.set_state(&mut session, ConnectionState::Closed);
            session.generation += 1;
        }

        self.keys.clear();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("세션 종료");
    }
}

/// 스트림에서 프레임 하나 읽기 (핸드쉐이크/로그인 단계 전용)
async fn read_frame(
    stream: &mut BoxedStream,
    reader: &mut FrameReader,
    key: Option<&SessionKey>,
) -> Result<Frame> {
    loop {
        if let Some(frame) = reader.next_frame(key)? {
            return Ok(frame);
        }
        let n = stream.read_buf(reader.buffer_mut()).await?;
        if n == 0 {
            return Err(Error::ConnectionLost);
        }
    }
}
