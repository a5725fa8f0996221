//! 요청-응답 상관관리자
//!
//! 나가는 요청마다 correlation ID(seq)를 붙이고 대기자를 등록해 두었다가,
//! 같은 seq의 응답 프레임이 오거나 마감 시각이 지나면 정확히 한 번 해제함.
//! 수신 루프와 호출자 태스크는 이 구조체의 대기 맵을 통해서만 통신함.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::{Error, Result};

/// 서버 응답
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub seq: u32,
    pub command: String,
    pub result_code: i32,
    pub body: Bytes,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }
}

/// 대기 중인 요청
struct PendingRequest {
    /// 기대하는 응답 형태 (명령 이름)
    command: String,
    deadline: Instant,
    /// 등록마다 고유한 토큰 (seq 재사용 시 엉뚱한 항목 제거 방지)
    token: u64,
    slot: oneshot::Sender<Result<Response>>,
}

/// 요청 상관관리자
pub struct RequestCorrelator {
    pending: DashMap<u32, PendingRequest>,
    next_seq: AtomicU32,
    next_token: AtomicU64,
}

impl RequestCorrelator {
    pub fn new() -> Arc<Self> {
        Self::with_initial_seq(1)
    }

    /// 시작 seq 지정 (서버가 세션별 시작 값을 요구하는 경우)
    pub fn with_initial_seq(seq: u32) -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
            next_seq: AtomicU32::new(seq.max(1)),
            next_token: AtomicU64::new(1),
        })
    }

    /// 다음 seq 발급
    ///
    /// 단조 증가, 0은 푸시용으로 예약. 랩어라운드 후 아직 대기 중인 seq는 건너뜀.
    pub fn next_seq(&self) -> u32 {
        loop {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            if seq != 0 && !self.pending.contains_key(&seq) {
                return seq;
            }
        }
    }

    /// 대기자 등록
    ///
    /// 같은 seq가 이미 대기 중이면 `DuplicateCorrelationId`
    pub fn register(
        self: &Arc<Self>,
        seq: u32,
        command: impl Into<String>,
        deadline: Instant,
    ) -> Result<PendingResponse> {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        match self.pending.entry(seq) {
            Entry::Occupied(_) => return Err(Error::DuplicateCorrelationId(seq)),
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    command: command.into(),
                    deadline,
                    token,
                    slot: tx,
                });
            }
        }

        Ok(PendingResponse {
            seq,
            token,
            rx: Some(rx),
            correlator: Arc::clone(self),
        })
    }

    /// 응답 전달
    ///
    /// 매칭되는 대기자가 없으면(늦은 응답, 중복 응답) 로그만 남기고 false
    pub fn resolve(&self, response: Response) -> bool {
        let Some((seq, pending)) = self.pending.remove(&response.seq) else {
            debug!("대기자 없는 응답 폐기: seq={}, command={}", response.seq, response.command);
            return false;
        };

        let outcome = if pending.command != response.command {
            Err(Error::UnexpectedResponse {
                expected: pending.command,
                got: response.command,
            })
        } else {
            Ok(response)
        };

        if pending.slot.send(outcome).is_err() {
            debug!("대기자가 이미 사라짐: seq={}", seq);
        }
        true
    }

    /// 특정 요청 실패 처리
    pub fn fail(&self, seq: u32, error: Error) -> bool {
        match self.pending.remove(&seq) {
            Some((_, pending)) => {
                let _ = pending.slot.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// 모든 대기 요청 실패 처리
    pub fn fail_all(&self, make_error: impl Fn() -> Error) -> usize {
        let seqs: Vec<u32> = self.pending.iter().map(|e| *e.key()).collect();
        seqs.into_iter()
            .filter(|seq| self.fail(*seq, make_error()))
            .count()
    }

    /// 마감 시각이 지난 요청을 `Timeout`으로 해제
    pub fn timeout_sweep(&self, now: Instant) -> usize {
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|e| e.value().deadline <= now)
            .map(|e| *e.key())
            .collect();

        let mut count = 0;
        for seq in expired {
            if let Some((_, pending)) = self.pending.remove_if(&seq, |_, p| p.deadline <= now) {
                debug!("요청 타임아웃: seq={}, command={}", seq, pending.command);
                let _ = pending.slot.send(Err(Error::Timeout { seq }));
                count += 1;
            }
        }
        count
    }

    /// 요청 취소 (다른 대기 요청에는 영향 없음)
    pub fn cancel(&self, seq: u32) -> bool {
        self.fail(seq, Error::Cancelled)
    }

    /// 가장 이른 마감 시각
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|e| e.value().deadline).min()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, seq: u32) -> bool {
        self.pending.contains_key(&seq)
    }
}

/// 응답 대기 핸들
///
/// 기다리지 않고 버리면 대기 항목도 함께 제거됨
pub struct PendingResponse {
    seq: u32,
    token: u64,
    rx: Option<oneshot::Receiver<Result<Response>>>,
    correlator: Arc<RequestCorrelator>,
}

impl PendingResponse {
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// 요청 취소. 대기자는 `Cancelled`로 해제됨
    pub fn cancel(&self) -> bool {
        self.correlator.cancel(self.seq)
    }

    /// 응답 대기
    pub async fn wait(mut self) -> Result<Response> {
        let rx = self.rx.take().ok_or(Error::Cancelled)?;
        match rx.await {
            Ok(outcome) => outcome,
            // 해제 없이 송신측이 사라지는 경우는 상관관리자 자체가 drop된 경우뿐
            Err(_) => Err(Error::ConnectionLost),
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        let token = self.token;
        self.correlator
            .pending
            .remove_if(&self.seq, |_, p| p.token == token);
    }
}
