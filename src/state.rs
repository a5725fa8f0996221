//! 연결 상태 정의
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──handshake──▶ AwaitingAuth ──login──▶ Online
//!      ▲                          │                          │                  │
//!      └──── 연결 시도 소진 ─────────┘                          ▼                  ▼ 전송 끊김
//!                                                      Reconnecting ◀───────────┘
//!                                                           │ 재시도 소진
//!                                                           ▼
//!                                                        Closed (종료)
//! ```

use std::fmt;

use tokio::time::Instant;

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingAuth,
    Online,
    Reconnecting,
    /// 종료 상태, 다른 상태로 전이 불가
    Closed,
}

impl ConnectionState {
    /// 허용된 전이인지
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Closed, _) => false,
            // 명시적 로그아웃/치명적 실패는 어디서든 종료로
            (_, Closed) => true,
            (Disconnected, Connecting) => true,
            (Connecting, AwaitingAuth) => true,
            (Connecting, Disconnected) => true,
            (Connecting, Reconnecting) => true,
            (AwaitingAuth, Online) => true,
            (AwaitingAuth, Reconnecting) => true,
            (Online, Reconnecting) => true,
            // 세션 재개 시 로그인 생략
            (Reconnecting, Online) => true,
            (Reconnecting, AwaitingAuth) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }

    pub fn is_online(self) -> bool {
        self == ConnectionState::Online
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::AwaitingAuth => "AwaitingAuth",
            ConnectionState::Online => "Online",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// 세션 (연결 상태 머신이 단독 소유)
///
/// 키 자료는 `SessionKeyStore`에 있음
#[derive(Debug, Clone)]
pub struct Session {
    pub state: ConnectionState,
    pub last_activity: Instant,
    /// 연결 세대. 재연결마다 증가, 이전 세대 태스크의 끊김 보고 무시용
    pub generation: u64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_activity: Instant::now(),
            generation: 0,
        }
    }

    /// 상태 전이. 허용되지 않으면 원래 상태를 돌려줌
    pub fn transition(&mut self, next: ConnectionState) -> Result<ConnectionState, ConnectionState> {
        if self.state.can_transition_to(next) {
            let previous = self.state;
            self.state = next;
            Ok(previous)
        } else {
            Err(self.state)
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    const ALL: [ConnectionState; 6] = [
        Disconnected,
        Connecting,
        AwaitingAuth,
        Online,
        Reconnecting,
        Closed,
    ];

    #[test]
    fn test_closed_is_terminal() {
        for next in ALL {
            assert!(!Closed.can_transition_to(next));
        }
    }

    #[test]
    fn test_happy_path() {
        let mut session = Session::new();
        assert_eq!(session.transition(Connecting), Ok(Disconnected));
        assert_eq!(session.transition(AwaitingAuth), Ok(Connecting));
        assert_eq!(session.transition(Online), Ok(AwaitingAuth));
        assert_eq!(session.transition(Reconnecting), Ok(Online));
        assert_eq!(session.transition(Online), Ok(Reconnecting));
        assert_eq!(session.transition(Closed), Ok(Online));
        assert_eq!(session.transition(Connecting), Err(Closed));
    }

    #[test]
    fn test_cannot_skip_handshake() {
        assert!(!Disconnected.can_transition_to(Online));
        assert!(!Connecting.can_transition_to(Online));
        assert!(!Online.can_transition_to(AwaitingAuth));
    }
}
