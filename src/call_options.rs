//! Per-call configuration.

use std::sync::Arc;
use std::time::Duration;

use tonic::metadata::MetadataMap;

/// The four RPC shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    Unary,
    ServerStreaming,
    ClientStreaming,
    Bidirectional,
}

impl CallType {
    /// Whether the client sends more than one message, which controls the
    /// flush policy for the initial `metadata` request part.
    pub fn is_request_streaming(self) -> bool {
        matches!(self, CallType::ClientStreaming | CallType::Bidirectional)
    }
}

/// The immutable options record carried by a [`crate::call::Call`] for its
/// whole lifetime.
#[derive(Clone)]
pub struct CallOptions {
    /// Deadline measured from call construction. `None` means infinite.
    pub timeout: Option<Duration>,
    /// Metadata the user wants prepended to the outbound request headers.
    pub custom_metadata: MetadataMap,
    /// Default value of the per-message `compress` flag for convenience
    /// senders (see [`crate::call::Call::invoke_unary_request`]).
    pub compress_by_default: bool,
    /// Use `GET` instead of `POST` for the request.
    pub cacheable: bool,
    /// Generates a correlation id used for log-scoping.
    pub request_id_provider: Option<Arc<dyn Fn() -> String + Send + Sync>>,
    /// Overrides the tracing span call-scoped log records are emitted
    /// under.
    pub logger: Option<tracing::Span>,
    /// Caps the size of an individual inbound message; exceeding it yields
    /// `RESOURCE_EXHAUSTED`.
    pub max_receive_message_length: Option<usize>,
}

impl Default for CallOptions {
    fn default() -> Self {
        CallOptions {
            timeout: None,
            custom_metadata: MetadataMap::new(),
            compress_by_default: false,
            cacheable: false,
            request_id_provider: None,
            logger: None,
            max_receive_message_length: None,
        }
    }
}

impl std::fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("timeout", &self.timeout)
            .field("custom_metadata", &self.custom_metadata)
            .field("compress_by_default", &self.compress_by_default)
            .field("cacheable", &self.cacheable)
            .field("has_request_id_provider", &self.request_id_provider.is_some())
            .field("max_receive_message_length", &self.max_receive_message_length)
            .finish()
    }
}
