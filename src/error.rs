use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiveErrorCode {
    InvalidArgument,
    Unsupported,
    ReentrantFlush,
    Transport,
    Cancelled,
    Internal,
}

impl LiveErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiveErrorCode::InvalidArgument => "livebind/invalid-argument",
            LiveErrorCode::Unsupported => "livebind/unsupported",
            LiveErrorCode::ReentrantFlush => "livebind/reentrant-flush",
            LiveErrorCode::Transport => "livebind/transport",
            LiveErrorCode::Cancelled => "livebind/cancelled",
            LiveErrorCode::Internal => "livebind/internal",
        }
    }
}

/// Error raised by the reactive core, the listener pool or a store.
///
/// Usage errors (`InvalidArgument`, `Unsupported`, `ReentrantFlush`) are
/// returned straight to the caller that misused the API. `Transport`
/// errors originate from the remote subscription layer and are also used
/// to reject pending fetches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveError {
    pub code: LiveErrorCode,
    message: String,
}

impl LiveError {
    pub fn new(code: LiveErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for LiveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for LiveError {}

pub type LiveResult<T> = Result<T, LiveError>;

pub fn invalid_argument(message: impl Into<String>) -> LiveError {
    LiveError::new(LiveErrorCode::InvalidArgument, message)
}

pub fn unsupported(operation: &str) -> LiveError {
    LiveError::new(
        LiveErrorCode::Unsupported,
        format!("this collection's persistence layer does not support `{operation}`, try a store-backed collection"),
    )
}

pub fn reentrant_flush() -> LiveError {
    LiveError::new(LiveErrorCode::ReentrantFlush, "Can't flush while in a flush")
}

pub fn transport_error(message: impl Into<String>) -> LiveError {
    LiveError::new(LiveErrorCode::Transport, message)
}

pub fn cancelled(message: impl Into<String>) -> LiveError {
    LiveError::new(LiveErrorCode::Cancelled, message)
}

pub fn internal_error(message: impl Into<String>) -> LiveError {
    LiveError::new(LiveErrorCode::Internal, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = invalid_argument("bad query");
        assert_eq!(err.to_string(), "bad query (livebind/invalid-argument)");
    }

    #[test]
    fn unsupported_names_the_operation() {
        let err = unsupported("limit");
        assert_eq!(err.code, LiveErrorCode::Unsupported);
        assert!(err.message().contains("`limit`"));
    }
}
