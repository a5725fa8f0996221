//! 에러 타입 정의

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::frame::DecodeError;
use crate::highway::TransferFailure;

/// QNet 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("프레임 디코딩 에러: {0}")]
    Decode(#[from] DecodeError),

    #[error("암호화 에러: {0}")]
    Crypto(#[from] CryptoError),

    /// 연결 수립 실패 (재시도 소진 후에만 호출자에게 노출)
    #[error("전송 계층 에러: {0}")]
    Transport(String),

    #[error("연결 끊김")]
    ConnectionLost,

    #[error("연결되지 않음")]
    NotConnected,

    #[error("세션 종료됨")]
    SessionClosed,

    #[error("요청 타임아웃: seq={seq}")]
    Timeout { seq: u32 },

    #[error("요청 취소됨")]
    Cancelled,

    #[error("중복 correlation ID: {0}")]
    DuplicateCorrelationId(u32),

    #[error("핸드쉐이크 실패: {0}")]
    HandshakeFailed(String),

    #[error("로그인 실패: code={code}, {message}")]
    LoginFailed { code: i32, message: String },

    #[error("서버 에러: code={code}, {message}")]
    ServerError { code: i32, message: String },

    #[error("응답 타입 불일치: expected {expected}, got {got}")]
    UnexpectedResponse { expected: String, got: String },

    #[error("파일 크기 제한 초과")]
    OverFileSizeMax,

    #[error("업로드 실패: {0}")]
    UploadFailed(TransferFailure),
}

impl Error {
    /// 연결 자체가 더 이상 유효하지 않은 에러인지
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConnectionLost | Error::SessionClosed | Error::Transport(_)
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
