use std::fmt;

/// Lifecycle of a relay session.
///
/// ```text
/// IDLE ──audio──▶ CONNECTING ──open──▶ READY ◀──turn complete / barge-in──┐
///                     ▲                  │                               │
///                     └──upstream lost───┤──upstream audio──▶ SPEAKING ──┘
///
/// any state ──client gone / idle / shutdown──▶ CLOSED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No upstream connection yet, or reconnection gave up.
    Idle,
    /// Upstream open (or reopen) in flight.
    Connecting,
    /// Upstream open, not producing audio.
    Ready,
    /// Upstream is streaming a reply.
    Speaking,
    /// Terminal.
    Closed,
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// States in which an upstream connection is held.
    pub fn has_upstream(&self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Speaking)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::Connecting => write!(f, "CONNECTING"),
            SessionState::Ready => write!(f, "READY"),
            SessionState::Speaking => write!(f, "SPEAKING"),
            SessionState::Closed => write!(f, "CLOSED"),
        }
    }
}
