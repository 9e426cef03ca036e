//! Lifecycle of a single client connection.
//!
//! ```text
//! Connecting → Authenticating → Registered → Active → Closing → Closed
//!                    │               │                            ▲
//!                    └───────────────┴──── (failure) ─────────────┘
//! ```

use crate::domain::foundation::StateMachine;

/// States of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Upgrade request received, token not yet inspected.
    Connecting,
    /// Token being verified.
    Authenticating,
    /// Socket accepted and stored in the registry.
    Registered,
    /// Receive loop running.
    Active,
    /// Deregistering and closing the socket.
    Closing,
    /// Terminal.
    Closed,
}

impl StateMachine for SessionState {
    fn valid_transitions(&self) -> Vec<Self> {
        use SessionState::*;
        match self {
            Connecting => vec![Authenticating],
            Authenticating => vec![Registered, Closed],
            Registered => vec![Active, Closing],
            Active => vec![Closing],
            Closing => vec![Closed],
            Closed => vec![],
        }
    }
}

/// WebSocket close codes used by the gateway.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Why a session left the Active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// Peer sent a close frame or the stream ended.
    RemoteClosed,
    /// Reading from the socket failed.
    ReadError,
    /// The registry refused the connection id.
    RegistrationFailed,
    /// The welcome envelope could not be written.
    WelcomeFailed,
    /// A fan-out write failed and the broadcaster removed the connection.
    Evicted,
    /// The process is shutting down.
    Shutdown,
}

impl CloseCause {
    /// Close code sent to the peer.
    pub fn close_code(&self) -> u16 {
        match self {
            CloseCause::RemoteClosed => close_code::NORMAL,
            CloseCause::Shutdown => close_code::GOING_AWAY,
            CloseCause::ReadError
            | CloseCause::RegistrationFailed
            | CloseCause::WelcomeFailed
            | CloseCause::Evicted => close_code::INTERNAL_ERROR,
        }
    }

    /// Close reason sent to the peer.
    pub fn reason(&self) -> &'static str {
        match self {
            CloseCause::RemoteClosed => "Connection closed",
            CloseCause::ReadError => "websocket closed unexpectedly",
            CloseCause::RegistrationFailed => "registration failed",
            CloseCause::WelcomeFailed => "welcome delivery failed",
            CloseCause::Evicted => "delivery failed",
            CloseCause::Shutdown => "server shutting down",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_a_chain_of_valid_transitions() {
        let mut state = SessionState::Connecting;
        for next in [
            SessionState::Authenticating,
            SessionState::Registered,
            SessionState::Active,
            SessionState::Closing,
            SessionState::Closed,
        ] {
            state = state.transition_to(next).unwrap();
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn auth_failure_closes_without_registration() {
        assert!(SessionState::Authenticating.can_transition_to(&SessionState::Closed));
        assert!(!SessionState::Authenticating.can_transition_to(&SessionState::Active));
    }

    #[test]
    fn active_cannot_skip_closing() {
        assert!(SessionState::Active
            .transition_to(SessionState::Closed)
            .is_err());
    }

    #[test]
    fn close_codes_follow_cause() {
        assert_eq!(CloseCause::RemoteClosed.close_code(), 1000);
        assert_eq!(CloseCause::Shutdown.close_code(), 1001);
        assert_eq!(CloseCause::ReadError.close_code(), 1011);
        assert_eq!(CloseCause::Evicted.close_code(), 1011);
    }
}
