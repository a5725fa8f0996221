//! 클라이언트 설정

use std::time::Duration;

use rand::Rng;

use crate::{DEFAULT_BLOCK_SIZE, MAX_FRAME_SIZE};

/// Highway 폴백 정책
///
/// 어떤 실패를 "다음 서버로 넘어갈 실패"로 볼지, 어떤 실패를 즉시 중단할지 결정
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    /// 서버 거절(치명적 실패) 후에도 대체 전송 경로를 시도할지 여부
    pub fallback_on_rejection: bool,

    /// 일시적 실패로 취급할 서버 결과 코드
    /// 이 목록에 없는 0이 아닌 코드는 치명적 거절로 취급
    pub transient_result_codes: Vec<i32>,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            fallback_on_rejection: false,
            // 서버 과부하 / 일시적 저장소 오류
            transient_result_codes: vec![
                crate::highway::RESULT_SERVER_BUSY,
                crate::highway::RESULT_STORAGE_UNAVAILABLE,
            ],
        }
    }
}

impl FallbackPolicy {
    /// 결과 코드가 일시적 실패인지
    pub fn is_transient(&self, result_code: i32) -> bool {
        self.transient_result_codes.contains(&result_code)
    }
}

/// QNet 클라이언트 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 요청 응답 대기 타임아웃 (밀리초)
    pub request_timeout_ms: u64,

    /// 전송 계층 연결 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,

    /// 최초 connect() 시 전송 계층 연결 시도 횟수
    pub connect_attempts: u32,

    /// 연결 끊김 후 최대 재연결 시도 횟수
    pub max_reconnect_attempts: u32,

    /// 백오프 기본 간격 (밀리초), 시도마다 2배
    pub backoff_base_ms: u64,

    /// 백오프 최대 간격 (밀리초)
    pub backoff_max_ms: u64,

    /// 대기 요청 타임아웃 스윕 주기 (밀리초)
    pub sweep_interval_ms: u64,

    /// Heartbeat 주기 (밀리초)
    /// 0이면 비활성화
    pub heartbeat_interval_ms: u64,

    /// 연속 무결성 검증 실패 허용 횟수 (초과 시 연결 재수립)
    pub max_auth_failures: u32,

    /// 수신 프레임 최대 크기 (바이트)
    pub max_frame_size: usize,

    /// Highway 블록 크기 (바이트)
    pub block_size: usize,

    /// 블록 하나의 응답 대기 타임아웃 (밀리초)
    pub block_timeout_ms: u64,

    /// 같은 서버에 대한 이어받기 재시도 횟수
    pub resume_attempts: u32,

    /// 동시 Highway 전송 수
    pub max_concurrent_transfers: usize,

    /// 업로드 가능한 최대 리소스 크기 (바이트)
    pub max_resource_size: u64,

    /// Highway 폴백 정책
    pub fallback_policy: FallbackPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,       // 10초
            connect_timeout_ms: 5_000,        // 5초
            connect_attempts: 3,
            max_reconnect_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            sweep_interval_ms: 500,
            heartbeat_interval_ms: 0,         // 비활성화
            max_auth_failures: 3,
            max_frame_size: MAX_FRAME_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            block_timeout_ms: 15_000,
            resume_attempts: 1,
            max_concurrent_transfers: 4,
            max_resource_size: 30 * 1024 * 1024, // 30MB
            fallback_policy: FallbackPolicy::default(),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    /// n번째 재시도(0부터) 전 대기 시간
    ///
    /// base * 2^attempt 를 max로 자르고 0~25% 지터를 더함
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(20))
            .min(self.backoff_max_ms);
        let jitter = if exp >= 4 {
            rand::thread_rng().gen_range(0..=exp / 4)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }

    /// 저지연 환경용 설정
    pub fn low_latency() -> Self {
        Self {
            request_timeout_ms: 3_000,
            connect_timeout_ms: 2_000,
            backoff_base_ms: 100,
            backoff_max_ms: 5_000,
            sweep_interval_ms: 100,
            block_timeout_ms: 5_000,
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            connect_attempts: 5,
            max_reconnect_attempts: 12,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            heartbeat_interval_ms: 60_000,
            block_size: 64 * 1024,            // 작은 블록
            block_timeout_ms: 30_000,
            resume_attempts: 3,
            max_concurrent_transfers: 2,
            ..Self::default()
        }
    }
}
