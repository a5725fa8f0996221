//! 세션 키 저장소
//!
//! 현재 암호화 키와 세션 ID 보관. 핸드쉐이크/로그인 검증이 끝난 뒤
//! 연결 상태 머신만 `install`을 호출함.

use parking_lot::RwLock;
use tracing::debug;

use crate::crypto::SessionKey;

/// 키 + 세션 ID 스냅샷
#[derive(Debug, Clone)]
struct Installed {
    key: SessionKey,
    session_id: Option<u64>,
}

/// 세션 키 저장소
///
/// 교체는 쓰기 락 안에서 원자적으로 일어나고, 읽기 측은 복제본을 받음
#[derive(Debug, Default)]
pub struct SessionKeyStore {
    inner: RwLock<Option<Installed>>,
}

impl SessionKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 현재 키. `None`이면 아직 인증되지 않은 상태
    pub fn current_key(&self) -> Option<SessionKey> {
        self.inner.read().as_ref().map(|i| i.key.clone())
    }

    /// 현재 세션 ID (로그인 완료 후에만 존재)
    pub fn session_id(&self) -> Option<u64> {
        self.inner.read().as_ref().and_then(|i| i.session_id)
    }

    /// 키와 세션 ID를 함께 읽음
    pub fn snapshot(&self) -> Option<(SessionKey, Option<u64>)> {
        self.inner
            .read()
            .as_ref()
            .map(|i| (i.key.clone(), i.session_id))
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.read().is_some()
    }

    /// 새 키 설치 (기존 키와 세션 ID는 통째로 교체)
    pub(crate) fn install(&self, key: SessionKey) {
        debug!("세션 키 설치: {:?}", key);
        *self.inner.write() = Some(Installed {
            key,
            session_id: None,
        });
    }

    /// 로그인 성공 후 세션 ID 기록
    pub(crate) fn set_session_id(&self, session_id: u64) {
        if let Some(installed) = self.inner.write().as_mut() {
            installed.session_id = Some(session_id);
        }
    }

    /// 키 폐기
    pub(crate) fn clear(&self) {
        if self.inner.write().take().is_some() {
            debug!("세션 키 폐기");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_replaces_previous() {
        let store = SessionKeyStore::new();
        assert!(store.current_key().is_none());

        store.install(SessionKey::from_bytes([1u8; 32]));
        store.set_session_id(77);
        assert_eq!(store.session_id(), Some(77));

        // 새 키 설치 시 세션 ID도 초기화
        store.install(SessionKey::from_bytes([2u8; 32]));
        assert_eq!(store.current_key(), Some(SessionKey::from_bytes([2u8; 32])));
        assert_eq!(store.session_id(), None);
    }

    #[test]
    fn test_clear() {
        let store = SessionKeyStore::new();
        store.install(SessionKey::from_bytes([1u8; 32]));
        assert!(store.is_authenticated());

        store.clear();
        assert!(!store.is_authenticated());
        assert!(store.snapshot().is_none());
    }

    #[test]
    fn test_session_id_without_key_is_ignored() {
        let store = SessionKeyStore::new();
        store.set_session_id(5);
        assert_eq!(store.session_id(), None);
    }
}
