//! 연결 / 전송 통계

use std::time::{Duration, Instant};

/// 연결 통계
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    /// 송신 프레임 수
    pub frames_sent: u64,

    /// 송신 바이트 (헤더 포함)
    pub bytes_sent: u64,

    /// 수신 프레임 수
    pub frames_received: u64,

    /// 수신 바이트 (헤더 포함)
    pub bytes_received: u64,

    /// 수신 푸시 수
    pub pushes_received: u64,

    /// 대기자 없이 폐기된 응답 수 (늦은 응답, 중복 응답)
    pub orphan_responses: u64,

    /// 무결성 검증 실패로 폐기된 프레임 수
    pub auth_failures: u64,

    /// 타임아웃된 요청 수
    pub timeouts: u64,

    /// 재연결 성공 횟수
    pub reconnects: u64,

    /// 세션 재개로 키를 유지한 재연결 횟수
    pub resumed_sessions: u64,

    /// 마지막 재연결 시각
    pub last_reconnect: Option<Instant>,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.frames_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn record_reconnect(&mut self, resumed: bool) {
        self.reconnects += 1;
        if resumed {
            self.resumed_sessions += 1;
        }
        self.last_reconnect = Some(Instant::now());
    }
}

/// Highway 전송 통계
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// 시작된 업로드 수
    pub uploads_started: u64,

    /// 전송 완료 수
    pub uploads_completed: u64,

    /// 서버에 이미 있어서 전송 생략한 수
    pub uploads_deduplicated: u64,

    /// 실패 수
    pub uploads_failed: u64,

    /// 송신 블록 수
    pub blocks_sent: u64,

    /// 송신 페이로드 바이트
    pub bytes_sent: u64,

    /// 시도한 서버 수 (전체 업로드 합)
    pub endpoints_tried: u64,

    /// 같은 서버 이어받기 횟수
    pub resumes: u64,

    /// 대체 전송 경로 사용 횟수
    pub fallbacks_used: u64,

    /// 누적 전송 시간
    pub total_elapsed: Duration,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 블록 전송 기록
    pub fn record_block(&mut self, bytes: usize) {
        self.blocks_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// 평균 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let secs = self.total_elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes_sent as f64 / secs
    }

    /// 성공률 (0.0 ~ 1.0)
    pub fn success_rate(&self) -> f64 {
        let finished = self.uploads_completed + self.uploads_deduplicated + self.uploads_failed;
        if finished == 0 {
            return 0.0;
        }
        (self.uploads_completed + self.uploads_deduplicated) as f64 / finished as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_rates() {
        let mut stats = TransferStats::new();
        assert_eq!(stats.throughput(), 0.0);
        assert_eq!(stats.success_rate(), 0.0);

        stats.record_block(1000);
        stats.record_block(1000);
        stats.total_elapsed = Duration::from_secs(2);
        stats.uploads_completed = 3;
        stats.uploads_failed = 1;

        assert_eq!(stats.throughput(), 1000.0);
        assert_eq!(stats.success_rate(), 0.75);
    }

    #[test]
    fn test_reconnect_counters() {
        let mut stats = ConnectionStats::new();
        stats.record_reconnect(true);
        stats.record_reconnect(false);
        assert_eq!(stats.reconnects, 2);
        assert_eq!(stats.resumed_sessions, 1);
        assert!(stats.last_reconnect.is_some());
    }
}
