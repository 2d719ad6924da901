use crate::{
    error::DomeError,
    types::{SessionEvent, SessionState},
};

/// Input driving the session lifecycle forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    /// Registration call is about to be issued.
    BeginIdentity,
    /// Registration returned a client id.
    IdentityAcquired,
    /// History was merged, or skipped under best-effort startup.
    HistoryBootstrapped,
    /// Streaming channel connected with the handler attached.
    StreamActivated,
    /// Unrecoverable error during startup or a fatal stream fault.
    Fail,
    /// Explicit disposal by the owner.
    Close,
}

#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            state: SessionState::Uninitialized,
        }
    }
}

impl SessionStateMachine {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn apply(&mut self, transition: SessionTransition) -> Result<SessionEvent, DomeError> {
        use SessionTransition::*;

        match transition {
            BeginIdentity => self.transition_from_state(
                SessionState::Uninitialized,
                SessionState::AcquiringIdentity,
                "begin_identity",
            ),
            IdentityAcquired => self.transition_from_state(
                SessionState::AcquiringIdentity,
                SessionState::BootstrappingHistory,
                "identity_acquired",
            ),
            HistoryBootstrapped => self.transition_from_state(
                SessionState::BootstrappingHistory,
                SessionState::ActivatingStream,
                "history_bootstrapped",
            ),
            StreamActivated => self.transition_from_state(
                SessionState::ActivatingStream,
                SessionState::Active,
                "stream_activated",
            ),
            Fail => self.transition_from_any_of(
                &[
                    SessionState::AcquiringIdentity,
                    SessionState::BootstrappingHistory,
                    SessionState::ActivatingStream,
                    SessionState::Active,
                ],
                SessionState::Failed,
                "fail",
            ),
            Close => {
                if self.state == SessionState::Closed {
                    return Err(DomeError::invalid_state(self.state, "close"));
                }
                self.state = SessionState::Closed;
                Ok(SessionEvent::StateChanged {
                    state: SessionState::Closed,
                })
            }
        }
    }

    /// Whether live events may still reach the application.
    pub fn is_dispatching(&self) -> bool {
        matches!(
            self.state,
            SessionState::ActivatingStream | SessionState::Active
        )
    }

    fn transition_from_state(
        &mut self,
        expected: SessionState,
        next: SessionState,
        action: &str,
    ) -> Result<SessionEvent, DomeError> {
        if self.state != expected {
            return Err(DomeError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(SessionEvent::StateChanged { state: next })
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[SessionState],
        next: SessionState,
        action: &str,
    ) -> Result<SessionEvent, DomeError> {
        if !expected.contains(&self.state) {
            return Err(DomeError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(SessionEvent::StateChanged { state: next })
    }
}
