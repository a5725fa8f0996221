//! 로깅 초기화 및 민감 정보 가림 래퍼
//!
//! 세션 키, 토큰, 인증 정보는 로그에 원문으로 남기지 않음

use std::fmt;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// 전역 subscriber 설치
///
/// `RUST_LOG`가 있으면 그 값을, 없으면 `default_level`을 사용.
/// 이미 설치되어 있으면 false.
pub fn init(default_level: Level) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// 바이트열은 길이만 표시
pub struct RedactedBytes<'a>(pub &'a [u8]);

impl fmt::Display for RedactedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl fmt::Debug for RedactedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// 다이제스트 같은 식별용 16진 문자열은 앞 8자만
pub struct ShortHex<'a>(pub &'a [u8]);

impl fmt::Display for ShortHex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = hex::encode(self.0);
        if encoded.len() > 8 {
            write!(f, "{}…", &encoded[..8])
        } else {
            f.write_str(&encoded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction() {
        assert_eq!(format!("{:?}", RedactedBytes(&[0u8; 16])), "[16 bytes]");
    }

    #[test]
    fn test_init_installs_once() {
        // 같은 프로세스의 다른 테스트가 먼저 설치했을 수 있음
        let _ = init(Level::DEBUG);
        assert!(!init(Level::INFO));
        tracing::debug!("subscriber 설치 확인");
    }

    #[test]
    fn test_short_hex() {
        assert_eq!(ShortHex(&[0xab, 0xcd]).to_string(), "abcd");
        assert_eq!(ShortHex(&[0xde, 0xad, 0xbe, 0xef, 0x01]).to_string(), "deadbeef…");
    }
}
