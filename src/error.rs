use crate::backend::BackendError;
use crate::session::state::SessionState;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- backend request failures ---------------------------------
    #[error(transparent)]
    Backend(BackendError),
    #[error("operation `{0}` is not supported by this backend")]
    Unsupported(&'static str),

    // --------------------------------- lifecycle errors ------------------------------------------
    #[error("operation `{op}` rejected in session state `{state}`")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },
    #[error("thread is not suspended, stack is unavailable")]
    ThreadRunning,
    #[error("{0} is disposed")]
    Disposed(&'static str),

    // --------------------------------- value errors ----------------------------------------------
    #[error("value handle is stale: {0}")]
    StaleValue(String),
    #[error("`{0}` has no child values")]
    NotAnAggregate(String),
    #[error("index {0} is out of bounds, array length is {1}")]
    IndexOutOfBounds(u64, u64),

    // --------------------------------- persisted preference errors -------------------------------
    #[error("preference serialization: {0}")]
    PrefsSer(#[from] toml::ser::Error),
    #[error("preference deserialization: {0}")]
    PrefsDe(#[from] toml::de::Error),

    // --------------------------------- third party errors ----------------------------------------
    #[error("hook: {0}")]
    Hook(anyhow::Error),
}

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        match e {
            // expected no-op, callers must be able to tell it from a real failure
            BackendError::Unsupported(op) => Error::Unsupported(op),
            e => Error::Backend(e),
        }
    }
}

impl Error {
    /// Return a hint to an interface - continue debugging after error or stop whole process.
    ///
    /// Fatal errors indicate an ownership-discipline bug inside the model itself,
    /// everything else is a recoverable request failure.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Backend(_) => false,
            Error::Unsupported(_) => false,
            Error::InvalidState { .. } => false,
            Error::ThreadRunning => false,
            Error::StaleValue(_) => false,
            Error::NotAnAggregate(_) => false,
            Error::IndexOutOfBounds(_, _) => false,
            Error::PrefsSer(_) => false,
            Error::PrefsDe(_) => false,
            Error::Hook(_) => false,

            // querying a disposed object is a contract violation
            Error::Disposed(_) => true,
        }
    }

    /// `true` for an "operation not supported" outcome, a no-op from the client's
    /// point of view rather than a failure worth reporting.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }
}

/// Turn a `Result` into an `Option`, logging the error at warn level.
/// For paths where a failure degrades the model but must not abort it
/// (hook callbacks, collaborator actions).
#[macro_export]
macro_rules! weak_error {
    ($res: expr $(, $msg: tt)?) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!(target: "model", concat!($($msg, " ",)? "{:#}"), e);
                None
            }
        }
    };
}

/// Like [`weak_error!`] but logged at debug level, for failures that are an
/// expected part of normal operation (stale persisted preferences).
#[macro_export]
macro_rules! muted_error {
    ($res: expr $(, $msg: tt)?) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                log::debug!(target: "model", concat!($($msg, " ",)? "{:#}"), e);
                None
            }
        }
    };
}
