use std::fmt;

use crate::status::Status;

/// Why a submission to a [`crate::call::Call`] was rejected locally, before
/// it ever became part of the RPC's outcome.
///
/// These never turn into a `Status` and never terminate the RPC: a `send`
/// issued before `invoke` just fails its own completion, the call keeps
/// ticking along for everyone else's purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidState {
    /// `send`/`cancel` was called before `invoke`.
    NotInvoked,
    /// `send` was called after the call has already reached a terminal
    /// state (the pipeline has been closed).
    AlreadyTerminated,
}

impl fmt::Display for InvalidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidState::NotInvoked => write!(f, "call has not been invoked yet"),
            InvalidState::AlreadyTerminated => write!(f, "call has already terminated"),
        }
    }
}

impl std::error::Error for InvalidState {}

/// The result delivered to a `send`/`cancel` completion: either the part
/// made it onto the wire (or the cancellation took effect),
/// or it was rejected locally ([`InvalidState`]), or it was dropped by the
/// transport with a reason ([`Status`]).
pub type CompletionResult = Result<(), CompletionError>;

#[derive(Debug, Clone)]
pub enum CompletionError {
    InvalidState(InvalidState),
    Status(Status),
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionError::InvalidState(s) => write!(f, "{s}"),
            CompletionError::Status(s) => write!(f, "{s}"),
        }
    }
}

impl std::error::Error for CompletionError {}

impl From<InvalidState> for CompletionError {
    fn from(s: InvalidState) -> Self {
        CompletionError::InvalidState(s)
    }
}

impl From<Status> for CompletionError {
    fn from(s: Status) -> Self {
        CompletionError::Status(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_display() {
        assert_eq!(
            InvalidState::NotInvoked.to_string(),
            "call has not been invoked yet"
        );
        assert_eq!(
            InvalidState::AlreadyTerminated.to_string(),
            "call has already terminated"
        );
    }

    #[test]
    fn completion_error_conversions() {
        let e: CompletionError = InvalidState::NotInvoked.into();
        assert!(matches!(e, CompletionError::InvalidState(_)));

        let e: CompletionError = Status::cancelled("nope").into();
        assert!(matches!(e, CompletionError::Status(_)));
    }
}
