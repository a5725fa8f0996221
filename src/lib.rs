//! # QNet
//!
//! 메신저 프로토콜 클라이언트 코어: 세션 상태 머신 + Highway 리소스 전송
//!
//! ## 구성
//! - **프레임 코덱**: 길이 접두 프레임, 세션 키로 ChaCha20-Poly1305 봉인 (헤더는 AAD)
//! - **상태 머신**: Disconnected → Connecting → AwaitingAuth → Online, 끊기면 Reconnecting
//! - **요청 상관관리**: correlation ID별 대기자, 정확히 1회 완료 (응답/실패/타임아웃)
//! - **세션 재개**: 재연결 시 이전 세션 증명으로 로그인 생략
//! - **Highway**: 티켓의 후보 서버를 순서대로, 블록마다 ack, 같은 서버 이어받기
//!
//! 도메인 객체(그룹, 메시지 등)는 다루지 않음. 푸시는 해석 없이 이벤트로 전달.

pub mod config;
pub mod connection;
pub mod correlator;
pub mod crypto;
pub mod error;
pub mod event;
pub mod facade;
pub mod frame;
pub mod highway;
pub mod key_store;
pub mod logging;
pub mod state;
pub mod stats;
pub mod transport;

pub use config::{Config, FallbackPolicy};
pub use connection::{Connection, Credentials};
pub use correlator::{PendingResponse, RequestCorrelator, Response};
pub use crypto::{EphemeralKeyPair, KeyPair, SessionKey};
pub use error::{Error, Result};
pub use event::{Event, EventReceiver};
pub use facade::{TicketRequest, TicketResponse, UploadFacade};
pub use frame::{DecodeError, Frame, FrameKind, FrameReader};
pub use highway::{
    CancelSignal, Endpoint, HighwayEngine, Resource, ResourceHandle, ResourceKind,
    TransferFailure, TransferOutcome, TransferTicket,
};
pub use key_store::SessionKeyStore;
pub use state::ConnectionState;
pub use stats::{ConnectionStats, TransferStats};
pub use transport::{Connector, TcpConnector};

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 매직 넘버 (프레임 식별용)
pub const MAGIC_NUMBER: u32 = 0x514E_4554; // "QNET"

/// 프레임 최대 크기 (바이트)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// 기본 Highway 블록 크기 (바이트)
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024; // 256KB
