//! 외부로 내보내는 이벤트
//!
//! 구독자 콜백 대신 타입이 있는 이벤트 값을 채널로 흘려보냄.
//! 코어는 외부 핸들러 코드를 동기적으로 호출하지 않음.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::highway::{ResourceHandle, ResourceKind, TransferFailure};
use crate::state::ConnectionState;

/// 이벤트 수신기 타입
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// 이벤트 송신기 타입
pub type EventSender = mpsc::UnboundedSender<Event>;

/// 코어 이벤트
#[derive(Debug, Clone)]
pub enum Event {
    /// 연결 상태 전이 (모든 전이마다 1회)
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// 서버 푸시 (도메인 수준 해석 없이 그대로 전달)
    Push { command: String, payload: Bytes },

    /// Highway 업로드 시작
    UploadStarted {
        resource_id: String,
        kind: ResourceKind,
        size: u64,
    },

    /// Highway 업로드 성공 (이미 존재한 경우 포함)
    UploadSucceeded {
        resource_id: String,
        handle: ResourceHandle,
        already_existed: bool,
    },

    /// Highway 업로드 실패
    UploadFailed {
        resource_id: String,
        reason: TransferFailure,
    },
}

/// 이벤트 채널 생성
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
