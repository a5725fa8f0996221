//! Highway 리소스 전송
//!
//! 제어 채널에서 받은 티켓으로 전용 업로드 서버에 리소스를 블록 단위로 보냄

pub mod block;
pub mod channel;
pub mod engine;
pub mod ticket;

pub use block::{
    AckStatus, Block, BlockAck, BlockEncodeError, BlockHeader, BlockKind, BlockPlan,
    MAX_AUTHORIZATION_SIZE,
};
pub use channel::{ChannelConnector, HighwayChannel, RequestChannel, StreamChannel, TcpChannelConnector};
pub use engine::{AttemptError, CancelSignal, HighwayEngine, TransferFailure, TransferOutcome};
pub use ticket::{
    ChannelKind, Endpoint, FallbackRoute, Resource, ResourceDigest, ResourceFormat,
    ResourceHandle, ResourceKind, TransferTicket,
};

// 서버 결과 코드

pub const RESULT_OK: i32 = 0;

/// 서버 과부하 (일시적)
pub const RESULT_SERVER_BUSY: i32 = 1;

/// 저장소 일시 장애 (일시적)
pub const RESULT_STORAGE_UNAVAILABLE: i32 = 2;

/// 인증 토큰 거절
pub const RESULT_AUTH_REJECTED: i32 = 3;

/// 블록 체크섬 불일치
pub const RESULT_CHECKSUM_MISMATCH: i32 = 4;
