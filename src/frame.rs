//! 프레임 코덱
//!
//! 길이 접두 바이너리 봉투 + 세션 키 기반 대칭 암호화
//!
//! ```text
//! +-----------+---------+------+------------+--------------------------+
//! | magic u32 | ver u8  | kind | length u32 | body (length bytes)      |
//! | LE        |         | u8   | LE         | nonce(12) + ct + tag(16) |
//! +-----------+---------+------+------------+--------------------------+
//! ```
//!
//! 헤더 10바이트는 AEAD의 associated data로 들어감.
//! Handshake 프레임만 평문이고 나머지는 세션 키 없이 인코딩/디코딩 불가.

use bytes::{Buf, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::crypto::{
    CryptoError, FrameCipher, SessionKey, NONCE_SIZE, PUBLIC_KEY_SIZE, TAG_SIZE,
};
use crate::{MAGIC_NUMBER, MAX_FRAME_SIZE, PROTOCOL_VERSION};

/// 프레임 헤더 크기: magic(4) + version(1) + kind(1) + length(4)
pub const HEADER_SIZE: usize = 10;

/// 디코딩 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// 선언된 길이만큼 바이트가 없음 - 더 읽고 다시 시도
    #[error("데이터 부족: {needed} bytes 더 필요")]
    Truncated { needed: usize },

    /// 무결성 검증 실패 - 해당 프레임만 폐기
    #[error("프레임 무결성 검증 실패")]
    AuthenticationFailed,

    #[error("알 수 없는 프레임 종류: {0}")]
    UnknownFrameKind(u8),

    #[error("유효하지 않은 매직 넘버: {0:08X}")]
    InvalidMagic(u32),

    #[error("지원하지 않는 프로토콜 버전: {0}")]
    UnsupportedVersion(u8),

    #[error("프레임 크기 초과: {length} > {max}")]
    Oversized { length: usize, max: usize },

    /// 세션 키가 없는 상태에서 애플리케이션 프레임 처리 시도
    #[error("세션 키 없음")]
    NoSessionKey,

    #[error("잘못된 프레임 본문: {0}")]
    Malformed(String),
}

impl DecodeError {
    /// 스트림 동기화가 깨져서 연결을 더 쓸 수 없는 에러인지
    pub fn is_stream_fatal(&self) -> bool {
        matches!(
            self,
            DecodeError::InvalidMagic(_)
                | DecodeError::UnsupportedVersion(_)
                | DecodeError::Oversized { .. }
        )
    }
}

/// 프레임 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// 키 교환 (평문)
    Handshake = 1,

    /// 클라이언트 → 서버 요청
    Request = 2,

    /// 서버 → 클라이언트 응답 (seq로 요청과 연결)
    Response = 3,

    /// 서버 → 클라이언트 비요청 알림
    Push = 4,
}

impl FrameKind {
    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            1 => Ok(FrameKind::Handshake),
            2 => Ok(FrameKind::Request),
            3 => Ok(FrameKind::Response),
            4 => Ok(FrameKind::Push),
            other => Err(DecodeError::UnknownFrameKind(other)),
        }
    }

    pub fn is_encrypted(self) -> bool {
        self != FrameKind::Handshake
    }
}

/// 프레임 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub kind: FrameKind,
    /// 본문 길이 (헤더 제외)
    pub length: u32,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, length: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            length,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&MAGIC_NUMBER.to_le_bytes());
        bytes[4] = self.version;
        bytes[5] = self.kind as u8;
        bytes[6..10].copy_from_slice(&self.length.to_le_bytes());
        bytes
    }

    /// 헤더 파싱 (길이 상한 검사 포함)
    pub fn parse(bytes: &[u8], max_frame_size: usize) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated {
                needed: HEADER_SIZE - bytes.len(),
            });
        }

        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != MAGIC_NUMBER {
            return Err(DecodeError::InvalidMagic(magic));
        }

        let version = bytes[4];
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let kind = FrameKind::from_byte(bytes[5])?;
        let length = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        if length as usize > max_frame_size {
            return Err(DecodeError::Oversized {
                length: length as usize,
                max: max_frame_size,
            });
        }

        Ok(Self {
            version,
            kind,
            length,
        })
    }
}

/// 디코딩된 프레임 (평문 본문)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl Frame {
    /// 본문을 봉투 타입으로 역직렬화
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        bincode::deserialize(&self.payload).map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}

/// 프레임 인코딩 (프로토콜 최대 크기 기준)
///
/// Handshake는 key 없이도 평문으로 인코딩되고,
/// 나머지 종류는 key가 없으면 `NoSessionKey`
pub fn encode(
    kind: FrameKind,
    plaintext: &[u8],
    key: Option<&SessionKey>,
) -> Result<Bytes, DecodeError> {
    encode_with_limit(kind, plaintext, key, MAX_FRAME_SIZE)
}

/// 프레임 인코딩
///
/// 본문이 `max_frame_size`를 넘으면 상대가 스트림 치명 에러로 처리하므로
/// 쓰기 전에 `Oversized`로 거절
pub fn encode_with_limit(
    kind: FrameKind,
    plaintext: &[u8],
    key: Option<&SessionKey>,
    max_frame_size: usize,
) -> Result<Bytes, DecodeError> {
    // 헤더를 AAD로 쓰려면 암호문 길이를 먼저 알아야 함
    let body_len = if kind.is_encrypted() {
        NONCE_SIZE + plaintext.len() + TAG_SIZE
    } else {
        plaintext.len()
    };
    let limit = max_frame_size.min(u32::MAX as usize);
    if body_len > limit {
        return Err(DecodeError::Oversized {
            length: body_len,
            max: limit,
        });
    }
    let header = FrameHeader::new(kind, body_len as u32).to_bytes();

    let body = if kind.is_encrypted() {
        let key = key.ok_or(DecodeError::NoSessionKey)?;
        FrameCipher::new(key)
            .seal(plaintext, &header)
            .map_err(|_| DecodeError::AuthenticationFailed)?
    } else {
        plaintext.to_vec()
    };

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(&body);
    Ok(buf.freeze())
}

/// 봉투를 직렬화해서 프레임으로 인코딩
pub fn encode_message<T: Serialize>(
    kind: FrameKind,
    message: &T,
    key: Option<&SessionKey>,
    max_frame_size: usize,
) -> crate::Result<Bytes> {
    let payload = bincode::serialize(message)?;
    Ok(encode_with_limit(kind, &payload, key, max_frame_size)?)
}

/// 프레임 디코딩
///
/// 성공 시 (프레임, 소비한 바이트 수)를 반환. 남는 바이트는 다음 프레임 몫.
pub fn decode(
    buf: &[u8],
    key: Option<&SessionKey>,
    max_frame_size: usize,
) -> Result<(Frame, usize), DecodeError> {
    let header = FrameHeader::parse(buf, max_frame_size)?;
    let total = HEADER_SIZE + header.length as usize;
    if buf.len() < total {
        return Err(DecodeError::Truncated {
            needed: total - buf.len(),
        });
    }

    let body = &buf[HEADER_SIZE..total];
    let payload = if header.kind.is_encrypted() {
        let key = key.ok_or(DecodeError::NoSessionKey)?;
        FrameCipher::new(key)
            .open(body, &buf[..HEADER_SIZE])
            .map_err(|e| match e {
                CryptoError::TooShort(_) => {
                    DecodeError::Malformed("암호문이 nonce + tag보다 짧음".into())
                }
                _ => DecodeError::AuthenticationFailed,
            })?
    } else {
        body.to_vec()
    };

    Ok((
        Frame {
            kind: header.kind,
            payload: Bytes::from(payload),
        },
        total,
    ))
}

/// 스트림 프레임 리더
///
/// 읽기 단위와 프레임 경계가 일치하지 않는 바이트 스트림에서 프레임을 하나씩 꺼냄
pub struct FrameReader {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameReader {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            max_frame_size,
        }
    }

    /// 수신한 바이트 추가
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// 읽기용 버퍼 (tokio `read_buf` 대상)
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// 버퍼에 남은 바이트 수
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 다음 프레임 추출
    ///
    /// - `Ok(None)`: 프레임이 아직 완성되지 않음
    /// - 스트림 치명이 아닌 에러: 해당 프레임은 버퍼에서 제거됨, 계속 읽어도 됨
    /// - 스트림 치명 에러: 버퍼 상태를 신뢰할 수 없음
    pub fn next_frame(&mut self, key: Option<&SessionKey>) -> Result<Option<Frame>, DecodeError> {
        match decode(&self.buffer, key, self.max_frame_size) {
            Ok((frame, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(frame))
            }
            Err(DecodeError::Truncated { .. }) => Ok(None),
            Err(e) if e.is_stream_fatal() => Err(e),
            Err(e) => {
                // magic/version은 유효하므로 선언된 길이만큼 건너뛰고 동기화 유지.
                // 종류 바이트가 잘못된 경우 헤더 파싱이 실패하므로 길이를 직접 읽음
                let Some(length) = declared_length(&self.buffer) else {
                    return Ok(None);
                };
                if length > self.max_frame_size {
                    return Err(DecodeError::Oversized {
                        length,
                        max: self.max_frame_size,
                    });
                }
                let total = HEADER_SIZE + length;
                if self.buffer.len() < total {
                    return Ok(None);
                }
                self.buffer.advance(total);
                Err(e)
            }
        }
    }
}

/// 헤더의 length 필드 (종류 검사 없이)
fn declared_length(buf: &[u8]) -> Option<usize> {
    let bytes = buf.get(6..HEADER_SIZE)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

// ═══════════════════════════════════════════════════════════════
// 프레임 본문 봉투
// ═══════════════════════════════════════════════════════════════

/// 요청 봉투 (Request 프레임 본문)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// correlation ID
    pub seq: u32,
    /// 명령 이름 (= 기대 응답 형태 태그)
    pub command: String,
    pub body: Vec<u8>,
}

/// 응답 봉투 (Response 프레임 본문)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub seq: u32,
    /// 명령 이름 에코
    pub command: String,
    /// 0이면 성공
    pub result_code: i32,
    pub body: Vec<u8>,
}

/// 푸시 봉투 (Push 프레임 본문)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub command: String,
    pub body: Vec<u8>,
}

/// 핸드쉐이크 요청 (클라이언트 → 서버)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeHello {
    pub client_public_key: [u8; PUBLIC_KEY_SIZE],
    /// 재연결 시 이전 세션 ID
    pub resume_session_id: Option<u64>,
    /// 이전 세션 키 보유 증명
    pub resume_proof: Option<[u8; 32]>,
    pub protocol_version: u8,
    pub timestamp_us: u64,
}

/// 핸드쉐이크 응답 (서버 → 클라이언트)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeReply {
    pub server_public_key: [u8; PUBLIC_KEY_SIZE],
    /// true면 이전 세션 키 유지, 로그인 생략
    pub resumed: bool,
    /// 0이면 성공
    pub result_code: i32,
    pub message: String,
}

/// 로그인 요청 본문
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub account: u64,
    pub token: Vec<u8>,
    pub client_version: String,
}

/// 로그인 응답 본문
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub session_id: u64,
}

/// 현재 시각 (마이크로초)
pub(crate) fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
