//! 암호화 모듈 - X25519 키 교환 + ChaCha20-Poly1305 대칭 암호화
//!
//! 흐름:
//! 1. 클라이언트가 임시 X25519 키쌍 생성, 공개키를 핸드쉐이크로 전송
//! 2. 서버가 자신의 공개키로 응답
//! 3. 공유 비밀 + 양측 공개키로 세션 키 유도 (SHA-256)
//! 4. ChaCha20-Poly1305로 프레임 본문 암호화/복호화

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

/// X25519 공개키 (32 bytes)
pub const PUBLIC_KEY_SIZE: usize = 32;

/// 세션 키 크기 (32 bytes)
pub const SESSION_KEY_SIZE: usize = 32;

/// ChaCha20-Poly1305 nonce 크기 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// ChaCha20-Poly1305 태그 크기 (16 bytes)
pub const TAG_SIZE: usize = 16;

/// 세션 키 유도용 도메인 구분자
const KEY_DERIVATION_LABEL: &[u8] = b"qnet/session-key/v1";

/// 암호화 오류
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("암호화 실패")]
    EncryptionFailed,
    #[error("복호화 실패 (무결성 검증 불일치)")]
    DecryptionFailed,
    #[error("데이터가 너무 짧음: {0} bytes")]
    TooShort(usize),
}

/// 세션 대칭 키
///
/// 핸드쉐이크 성공 시마다 통째로 교체됨 (병합 없음)
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// 공유 비밀과 양측 공개키로 세션 키 유도
    ///
    /// 공개키 순서는 (클라이언트, 서버) 고정
    pub fn derive(
        shared_secret: &[u8; 32],
        client_public: &[u8; PUBLIC_KEY_SIZE],
        server_public: &[u8; PUBLIC_KEY_SIZE],
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DERIVATION_LABEL);
        hasher.update(shared_secret);
        hasher.update(client_public);
        hasher.update(server_public);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }

    /// 로그/디버그용 키 지문 (앞 4바이트 해시)
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..4])
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.fingerprint())
    }
}

/// 서버 측 장기 키쌍
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// 새 키쌍 생성
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// 공개키를 바이트로 변환
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// 상대방 공개키로 공유 비밀 계산
    pub fn compute_shared_secret(&self, peer_public: &[u8; PUBLIC_KEY_SIZE]) -> [u8; 32] {
        let peer_public = PublicKey::from(*peer_public);
        *self.secret.diffie_hellman(&peer_public).as_bytes()
    }
}

/// 임시 키쌍 (핸드쉐이크 1회용)
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// 새 임시 키쌍 생성
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// 공개키를 바이트로 변환
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// 서버 공개키로 세션 키 유도 (소비됨)
    pub fn into_session_key(self, server_public: &[u8; PUBLIC_KEY_SIZE]) -> SessionKey {
        let client_public = self.public_key_bytes();
        let peer = PublicKey::from(*server_public);
        let shared = self.secret.diffie_hellman(&peer);
        SessionKey::derive(shared.as_bytes(), &client_public, server_public)
    }
}

/// 프레임 암호화기
///
/// 상태 없음: 매 프레임 무작위 nonce 사용
pub struct FrameCipher {
    cipher: ChaCha20Poly1305,
}

impl FrameCipher {
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.as_bytes().into()),
        }
    }

    /// 암호화
    /// 반환: nonce(12) + ciphertext(원본 + 16바이트 태그)
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// 복호화
    /// 입력: nonce(12) + ciphertext
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::TooShort(sealed.len()));
        }

        let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed[NONCE_SIZE..],
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// 세션 재개 증명
///
/// 재연결 시 이전 세션 키를 가지고 있음을 서버에 증명
/// SHA-256(session_key || session_id || client_public)
pub fn resume_proof(
    key: &SessionKey,
    session_id: u64,
    client_public: &[u8; PUBLIC_KEY_SIZE],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(session_id.to_le_bytes());
    hasher.update(client_public);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_exchange() {
        // 클라이언트 임시 키, 서버 장기 키
        let client = EphemeralKeyPair::generate();
        let server = KeyPair::generate();

        let client_public = client.public_key_bytes();
        let server_public = server.public_key_bytes();

        let client_key = client.into_session_key(&server_public);
        let shared = server.compute_shared_secret(&client_public);
        let server_key = SessionKey::derive(&shared, &client_public, &server_public);

        assert_eq!(client_key, server_key);
    }

    #[test]
    fn test_seal_open() {
        let key = SessionKey::from_bytes([7u8; 32]);
        let cipher = FrameCipher::new(&key);

        let plaintext = b"Hello, QNet! This is encrypted data.";
        let sealed = cipher.seal(plaintext, b"header").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);

        let opened = cipher.open(&sealed, b"header").unwrap();
        assert_eq!(plaintext.as_slice(), opened.as_slice());
    }

    #[test]
    fn test_open_rejects_tampered_aad() {
        let key = SessionKey::from_bytes([1u8; 32]);
        let cipher = FrameCipher::new(&key);
        let sealed = cipher.seal(b"payload", b"aad-1").unwrap();

        assert!(matches!(
            cipher.open(&sealed, b"aad-2"),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_open_wrong_key() {
        let sealed = FrameCipher::new(&SessionKey::from_bytes([1u8; 32]))
            .seal(b"payload", &[])
            .unwrap();
        let other = FrameCipher::new(&SessionKey::from_bytes([2u8; 32]));
        assert!(other.open(&sealed, &[]).is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let key = SessionKey::from_bytes([9u8; 32]);
        let printed = format!("{:?}", key);
        assert!(printed.starts_with("SessionKey("));
        assert!(!printed.contains("9, 9"));
    }
}
