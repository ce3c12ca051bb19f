//! Response parts flowing from the transport through the pipeline to the
//! user.

use std::sync::Arc;

use tonic::metadata::MetadataMap;

use crate::status::Status;

/// An inbound error, optionally wrapped with the name of the interceptor
/// context that raised it. The pipeline unwraps this wrapper before an
/// error reaches the user.
#[derive(Debug, Clone)]
pub struct CallError {
    status: Status,
    raised_by: Option<Arc<str>>,
}

impl CallError {
    pub fn new(status: Status) -> Self {
        CallError {
            status,
            raised_by: None,
        }
    }

    pub fn with_context(status: Status, interceptor: impl Into<Arc<str>>) -> Self {
        CallError {
            status,
            raised_by: Some(interceptor.into()),
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn into_status(self) -> Status {
        self.status
    }

    /// Which interceptor context raised this error, if it was wrapped with
    /// one. `None` for errors that arrived bare (e.g. straight from the
    /// transport).
    pub fn raised_by(&self) -> Option<&str> {
        self.raised_by.as_deref()
    }

    /// Strips the context wrapper, returning a bare copy of the same error.
    /// This is what the tail sentinel does before forwarding.
    pub fn unwrapped(&self) -> CallError {
        CallError {
            status: self.status.clone(),
            raised_by: None,
        }
    }
}

impl From<Status> for CallError {
    fn from(status: Status) -> Self {
        CallError::new(status)
    }
}

/// One unit of the inbound response stream.
///
/// Ordering invariant: zero or one `Metadata`, then zero or more `Message`,
/// then exactly one terminal (`End` or `Error`). An `End` with a non-OK
/// status is a successful delivery of a negative outcome, not an error.
#[derive(Debug)]
pub enum ResponsePart<Resp> {
    Metadata(MetadataMap),
    Message(Resp),
    End(Status, MetadataMap),
    Error(CallError),
}

impl<Resp> ResponsePart<Resp> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResponsePart::End(..) | ResponsePart::Error(_))
    }
}
