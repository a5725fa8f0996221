//! Highway 전송 엔진
//!
//! ```text
//! 사전 검사 (다이제스트/크기, 만료, 최대 크기) ── 실패 ──▶ Failed (채널 열지 않음)
//!      │
//!      ▼
//! 후보 서버 순서대로 1회씩:  open → Query → Data 0..M (블록마다 ack 대기)
//!      │  일시적 실패: 다음 서버
//!      │  중단 (N 블록 ack 후): 같은 서버 재접속, N+1부터 이어받기
//!      │  치명적 거절: 즉시 Failed(Rejected)
//!      ▼
//! 대체 경로 (있으면) ──▶ Failed(Exhausted)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::block::{AckStatus, BlockAck, BlockPlan, MAX_AUTHORIZATION_SIZE};
use super::channel::{ChannelConnector, HighwayChannel};
use super::ticket::{Endpoint, Resource, ResourceHandle, TransferTicket};
use crate::event::{Event, EventSender};
use crate::logging::ShortHex;
use crate::stats::TransferStats;
use crate::Config;

/// 업로드 결과 (호출 1회당 정확히 하나)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// 서버에 이미 있어서 전송 생략
    AlreadyExists(ResourceHandle),
    Completed(ResourceHandle),
    Failed(TransferFailure),
}

impl TransferOutcome {
    pub fn handle(&self) -> Option<&ResourceHandle> {
        match self {
            TransferOutcome::AlreadyExists(handle) | TransferOutcome::Completed(handle) => {
                Some(handle)
            }
            TransferOutcome::Failed(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.handle().is_some()
    }
}

/// 업로드 실패 사유
///
/// `Exhausted`는 일시적 실패만 겪은 경우라 새 티켓으로 재시도할 만함
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferFailure {
    #[error("리소스가 티켓과 다름: 크기 {actual} (티켓 {expected})")]
    ResourceMismatch { expected: u64, actual: u64 },

    /// 크기는 같지만 내용이 다름
    #[error("리소스 다이제스트가 티켓과 다름: {actual} (티켓 {expected})")]
    DigestMismatch { expected: String, actual: String },

    /// 제어 채널에서 티켓 발급 자체가 거절됨
    #[error("티켓 발급 거절 (code={code}): {reason}")]
    TicketRejected { code: i32, reason: String },

    #[error("티켓 만료")]
    TicketExpired,

    #[error("리소스 크기 초과: {size} > {max}")]
    OverSizeLimit { size: u64, max: u64 },

    #[error("티켓 인증 토큰 크기 초과: {size} > {max}")]
    AuthorizationTooLarge { size: usize, max: usize },

    #[error("모든 서버 실패 ({attempts}곳 시도): {last_error}")]
    Exhausted { attempts: usize, last_error: String },

    #[error("서버 거절 (code={code}): {reason}")]
    Rejected { code: i32, reason: String },

    #[error("업로드 취소")]
    Cancelled,
}

/// 서버 한 곳에 대한 시도 실패
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// 연결 거부, 일시적 서버 결과 코드, 응답 형식 오류: 다음 서버로
    #[error("일시적 실패: {0}")]
    Transient(String),

    /// 전송 중 끊김/타임아웃: 같은 서버 이어받기 대상
    #[error("전송 중단: {0}")]
    Interrupted(String),

    /// 인증/체크섬 거절 등: 중단
    #[error("거절 (code={code}): {reason}")]
    Rejected { code: i32, reason: String },
}

impl AttemptError {
    pub fn interrupted(e: std::io::Error) -> Self {
        AttemptError::Interrupted(e.to_string())
    }

    pub fn is_transient(&self) -> bool {
        !matches!(self, AttemptError::Rejected { .. })
    }
}

/// 업로드 취소 신호 (복제해서 다른 태스크에서 취소)
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// 취소될 때까지 대기
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// 서버 목록 순회 결과
enum RouteResult {
    Done(TransferOutcome),
    Rejected { code: i32, reason: String },
    Exhausted { last_error: Option<String> },
}

/// Highway 전송 엔진
pub struct HighwayEngine {
    config: Config,
    connector: Arc<dyn ChannelConnector>,
    permits: Semaphore,
    events: Option<EventSender>,
    stats: RwLock<TransferStats>,
}

impl HighwayEngine {
    pub fn new(config: Config, connector: Arc<dyn ChannelConnector>) -> Self {
        let permits = Semaphore::new(config.max_concurrent_transfers.max(1));
        Self {
            config,
            connector,
            permits,
            events: None,
            stats: RwLock::new(TransferStats::new()),
        }
    }

    /// 업로드 이벤트를 내보낼 채널 지정
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn stats(&self) -> TransferStats {
        self.stats.read().clone()
    }

    pub async fn upload(&self, resource: Resource, ticket: TransferTicket) -> TransferOutcome {
        self.upload_with_cancel(resource, ticket, CancelSignal::new())
            .await
    }

    /// 취소 가능한 업로드
    ///
    /// 취소되면 진행 중인 시도를 버리고 남은 서버는 시도하지 않음
    pub async fn upload_with_cancel(
        &self,
        resource: Resource,
        ticket: TransferTicket,
        cancel: CancelSignal,
    ) -> TransferOutcome {
        let resource_id = resource.resource_id();

        if let Some(failure) = self.precheck(&resource, &ticket) {
            warn!("업로드 사전 검사 실패: {} ({})", resource_id, failure);
            return self.finish(&resource_id, TransferOutcome::Failed(failure));
        }

        let _permit = tokio::select! {
            permit = self.permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return self.finish(&resource_id, TransferOutcome::Failed(TransferFailure::Cancelled)),
            },
            _ = cancel.cancelled() => {
                return self.finish(&resource_id, TransferOutcome::Failed(TransferFailure::Cancelled));
            }
        };

        info!(
            "업로드 시작: {} ({} bytes, {}, 서버 {}곳)",
            resource_id,
            resource.size,
            resource.kind,
            ticket.candidate_endpoints.len()
        );
        self.stats.write().uploads_started += 1;
        self.emit(Event::UploadStarted {
            resource_id: resource_id.clone(),
            kind: resource.kind,
            size: resource.size,
        });

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("업로드 취소: {}", resource_id);
                TransferOutcome::Failed(TransferFailure::Cancelled)
            }
            outcome = self.run(&resource, &ticket) => outcome,
        };
        self.stats.write().total_elapsed += started.elapsed();

        self.finish(&resource_id, outcome)
    }

    /// 네트워크를 쓰기 전에 걸러낼 실패
    fn precheck(&self, resource: &Resource, ticket: &TransferTicket) -> Option<TransferFailure> {
        if !ticket.matches(resource) {
            if ticket.resource_size != resource.size {
                return Some(TransferFailure::ResourceMismatch {
                    expected: ticket.resource_size,
                    actual: resource.size,
                });
            }
            return Some(TransferFailure::DigestMismatch {
                expected: hex::encode(ticket.resource_digest),
                actual: hex::encode(resource.digest),
            });
        }
        if ticket.is_expired(SystemTime::now()) {
            return Some(TransferFailure::TicketExpired);
        }
        if ticket.authorization.len() > MAX_AUTHORIZATION_SIZE {
            return Some(TransferFailure::AuthorizationTooLarge {
                size: ticket.authorization.len(),
                max: MAX_AUTHORIZATION_SIZE,
            });
        }
        if resource.size > self.config.max_resource_size {
            return Some(TransferFailure::OverSizeLimit {
                size: resource.size,
                max: self.config.max_resource_size,
            });
        }
        None
    }

    async fn run(&self, resource: &Resource, ticket: &TransferTicket) -> TransferOutcome {
        let plan = BlockPlan::new(&resource.data, self.config.block_size);
        debug!(
            "블록 계획: {} 블록 x {} bytes, digest={}",
            plan.len(),
            plan.block_size(),
            ShortHex(&resource.digest)
        );

        let mut attempts = 0usize;
        let mut last_error = None;
        let mut rejection = None;

        match self
            .try_route(&ticket.candidate_endpoints, &plan, resource, ticket, &mut attempts)
            .await
        {
            RouteResult::Done(outcome) => return outcome,
            RouteResult::Rejected { code, reason } => {
                if !self.config.fallback_policy.fallback_on_rejection {
                    return TransferOutcome::Failed(TransferFailure::Rejected { code, reason });
                }
                rejection = Some((code, reason));
            }
            RouteResult::Exhausted { last_error: e } => last_error = e,
        }

        if let Some(route) = &ticket.fallback {
            info!("후보 서버 소진, 대체 경로 시도 ({:?})", route.kind);
            self.stats.write().fallbacks_used += 1;

            match self
                .try_route(&route.endpoints(), &plan, resource, ticket, &mut attempts)
                .await
            {
                RouteResult::Done(outcome) => return outcome,
                RouteResult::Rejected { code, reason } => {
                    return TransferOutcome::Failed(TransferFailure::Rejected { code, reason });
                }
                RouteResult::Exhausted { last_error: e } => {
                    if e.is_some() {
                        last_error = e;
                    }
                }
            }
        }

        match rejection {
            Some((code, reason)) => TransferOutcome::Failed(TransferFailure::Rejected { code, reason }),
            None => TransferOutcome::Failed(TransferFailure::Exhausted {
                attempts,
                last_error: last_error.unwrap_or_else(|| "후보 서버 없음".into()),
            }),
        }
    }

    /// 서버 목록을 순서대로 한 번씩 시도
    async fn try_route(
        &self,
        endpoints: &[Endpoint],
        plan: &BlockPlan,
        resource: &Resource,
        ticket: &TransferTicket,
        attempts: &mut usize,
    ) -> RouteResult {
        let mut last_error = None;

        for endpoint in endpoints {
            *attempts += 1;
            self.stats.write().endpoints_tried += 1;

            match self.attempt_endpoint(endpoint, plan, resource, ticket).await {
                Ok(outcome) => return RouteResult::Done(outcome),
                Err(AttemptError::Rejected { code, reason }) => {
                    warn!("서버 거절: {} code={} {}", endpoint, code, reason);
                    return RouteResult::Rejected { code, reason };
                }
                Err(e) => {
                    warn!("서버 실패, 다음 후보로: {} ({})", endpoint, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        RouteResult::Exhausted { last_error }
    }

    /// 서버 한 곳 (이어받기 포함)
    async fn attempt_endpoint(
        &self,
        endpoint: &Endpoint,
        plan: &BlockPlan,
        resource: &Resource,
        ticket: &TransferTicket,
    ) -> Result<TransferOutcome, AttemptError> {
        let mut next_block = 0usize;
        let mut resumes = 0u32;

        loop {
            match self
                .transfer_once(endpoint, plan, resource, ticket, &mut next_block)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(AttemptError::Interrupted(reason))
                    if next_block > 0 && resumes < self.config.resume_attempts =>
                {
                    resumes += 1;
                    self.stats.write().resumes += 1;
                    info!(
                        "전송 중단 ({}), {} 블록부터 이어받기 {}/{}: {}",
                        reason,
                        next_block,
                        resumes,
                        self.config.resume_attempts,
                        endpoint
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 채널 하나로 `next_block`부터 끝까지 전송
    async fn transfer_once(
        &self,
        endpoint: &Endpoint,
        plan: &BlockPlan,
        resource: &Resource,
        ticket: &TransferTicket,
        next_block: &mut usize,
    ) -> Result<TransferOutcome, AttemptError> {
        let mut channel = self.connector.open(endpoint).await?;

        let query = plan.query_block(ticket, *next_block);
        let ack = self.exchange(channel.as_mut(), &query).await?;
        match ack.status {
            AckStatus::Exists(handle) => {
                info!("서버에 이미 존재: {}", handle.resource_id);
                channel.close().await;
                return Ok(TransferOutcome::AlreadyExists(handle));
            }
            AckStatus::Continue => {}
            other => {
                return Err(AttemptError::Transient(format!(
                    "Query에 예상 밖 응답: {:?}",
                    other
                )))
            }
        }

        while *next_block < plan.len() {
            let block = plan.data_block(*next_block, resource, ticket);
            let ack = self.exchange(channel.as_mut(), &block).await?;
            if ack.seq != block.header.seq {
                return Err(AttemptError::Transient(format!(
                    "ack 순서 불일치: {} != {}",
                    ack.seq, block.header.seq
                )));
            }

            *next_block += 1;
            self.stats.write().record_block(block.data.len());
            debug!("블록 ack: {}/{}", *next_block, plan.len());

            match ack.status {
                AckStatus::Received if *next_block < plan.len() => {}
                AckStatus::Completed(handle) if *next_block == plan.len() => {
                    channel.close().await;
                    return Ok(TransferOutcome::Completed(handle));
                }
                AckStatus::Exists(handle) => {
                    channel.close().await;
                    return Ok(TransferOutcome::AlreadyExists(handle));
                }
                other => {
                    return Err(AttemptError::Transient(format!(
                        "블록 {}에 예상 밖 응답: {:?}",
                        block.header.seq, other
                    )))
                }
            }
        }

        Err(AttemptError::Transient("완료 응답 없음".into()))
    }

    /// 블록 하나 송신 + ack 결과 코드 분류
    async fn exchange(
        &self,
        channel: &mut dyn HighwayChannel,
        block: &super::block::Block,
    ) -> Result<BlockAck, AttemptError> {
        let ack = tokio::time::timeout(self.config.block_timeout(), channel.send_block(block))
            .await
            .map_err(|_| AttemptError::Interrupted("ack 타임아웃".into()))??;

        if ack.is_ok() {
            return Ok(ack);
        }
        if self.config.fallback_policy.is_transient(ack.result_code) {
            Err(AttemptError::Transient(format!(
                "서버 일시적 실패 code={} {}",
                ack.result_code, ack.message
            )))
        } else {
            Err(AttemptError::Rejected {
                code: ack.result_code,
                reason: ack.message,
            })
        }
    }

    /// 통계 + 이벤트 기록 후 결과 반환
    ///
    /// 엔진을 거치지 않고 끝난 업로드(티켓 단계 거절, 서버에 이미 존재)도 여기로 보고
    pub(crate) fn finish(&self, resource_id: &str, outcome: TransferOutcome) -> TransferOutcome {
        {
            let mut stats = self.stats.write();
            match &outcome {
                TransferOutcome::AlreadyExists(_) => stats.uploads_deduplicated += 1,
                TransferOutcome::Completed(_) => stats.uploads_completed += 1,
                TransferOutcome::Failed(_) => stats.uploads_failed += 1,
            }
        }

        match &outcome {
            TransferOutcome::AlreadyExists(handle) | TransferOutcome::Completed(handle) => {
                info!("업로드 완료: {} (file_id={})", resource_id, handle.file_id);
                self.emit(Event::UploadSucceeded {
                    resource_id: resource_id.to_string(),
                    handle: handle.clone(),
                    already_existed: matches!(outcome, TransferOutcome::AlreadyExists(_)),
                });
            }
            TransferOutcome::Failed(reason) => {
                warn!("업로드 실패: {} ({})", resource_id, reason);
                self.emit(Event::UploadFailed {
                    resource_id: resource_id.to_string(),
                    reason: reason.clone(),
                });
            }
        }

        outcome
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
