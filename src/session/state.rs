//! Session lifecycle state machine and the shared status type.

use strum_macros::Display;

/// Lifecycle state of a debug session.
///
/// Transitional states are set optimistically by client requests and rolled
/// back if the backend rejects the command synchronously. Settled states are
/// set by backend notifications, which always win over optimistic state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Created,
    Running,
    Suspended,
    Resuming,
    Suspending,
    Restarting,
    Terminating,
    Terminated,
    Disconnecting,
    Disconnected,
    /// The debuggee process ended on its own.
    Exited,
}

impl SessionState {
    /// Terminal states: the session owns no threads and holds no backend handles.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Terminated | SessionState::Disconnected | SessionState::Exited
        )
    }

    /// States set optimistically while a backend command is in flight.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            SessionState::Resuming
                | SessionState::Suspending
                | SessionState::Restarting
                | SessionState::Terminating
                | SessionState::Disconnecting
        )
    }

    /// `true` when the session accepts new client requests.
    pub fn is_available(self) -> bool {
        !self.is_terminal() && !self.is_transitional()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    #[default]
    Ok,
    Warning,
    Error,
}

/// Health of a single model object, orthogonal to the lifecycle state.
/// An error status marks only the affected object and is reset on the next resume.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Status {
    pub severity: Severity,
    pub message: Option<String>,
}

impl Status {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }
}
