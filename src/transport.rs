//! The client transport state machine: tracks one call's stream lifecycle
//! and buffers outbound writes until the stream is actually ready for them.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::{CompletionError, CompletionResult};
use crate::request::RequestPart;
use crate::response::ResponsePart;
use crate::status::Status;

const LOG_TARGET: &str = "rpc::transport";

/// Lifecycle phase of the stream backing one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPhase {
    Idle,
    AwaitingTransport,
    ActivatingTransport,
    Active,
    Closing,
    Closed,
}

/// The narrow contract the core needs from an HTTP/2 stream: something that
/// can be written to, flushed, read from, and closed. Connection setup,
/// multiplexing and TLS all live behind this. [`crate::framed_channel::FramedChannel`]
/// is a concrete implementation built on this crate's own message framing,
/// for a channel that would otherwise need to hand-roll it.
#[async_trait::async_trait]
pub trait RpcChannel<Req, Resp>: Send {
    async fn write(&mut self, part: RequestPart<Req>) -> Result<(), Status>;
    async fn flush(&mut self) -> Result<(), Status>;
    /// Returns the next inbound response part, or `None` once the stream
    /// has nothing further to deliver (the remote closed it cleanly
    /// without an explicit `end`, which the transport treats the same as
    /// `channel_inactive`).
    async fn read(&mut self) -> Option<ResponsePart<Resp>>;
    async fn close(&mut self);
}

pub type ChannelResult<Req, Resp> = Result<Box<dyn RpcChannel<Req, Resp>>, Status>;
pub type ChannelFuture<Req, Resp> = Pin<Box<dyn Future<Output = ChannelResult<Req, Resp>> + Send>>;

/// Builds the stream for one call's path, given the call's configured
/// `max_receive_message_length` so an implementor that frames its own
/// messages (e.g. [`crate::framed_channel::FramedChannel`]) can size its
/// decoder accordingly. Shared across calls: the stream multiplexer
/// itself typically lives above the factory closure, which just opens a
/// new logical stream on it per call.
pub type ChannelFactory<Req, Resp> = Arc<dyn Fn(&str, Option<usize>) -> ChannelFuture<Req, Resp> + Send + Sync>;

struct BufferedWrite<Req> {
    part: RequestPart<Req>,
    completion: Option<oneshot::Sender<CompletionResult>>,
}

/// Manages one call's stream lifecycle and its pre-active write buffer.
pub struct TransportState<Req, Resp> {
    phase: TransportPhase,
    buffer: VecDeque<BufferedWrite<Req>>,
    request_streaming: bool,
    channel: Option<Box<dyn RpcChannel<Req, Resp>>>,
    terminal_status: Option<Status>,
}

impl<Req, Resp> TransportState<Req, Resp> {
    pub fn new(request_streaming: bool) -> Self {
        TransportState {
            phase: TransportPhase::Idle,
            buffer: VecDeque::new(),
            request_streaming,
            channel: None,
            terminal_status: None,
        }
    }

    pub fn phase(&self) -> TransportPhase {
        self.phase
    }

    /// Moves `idle` to `awaiting_transport`. The caller is responsible for
    /// actually invoking the [`ChannelFactory`] and feeding the result back
    /// through [`Self::activate`] or [`Self::channel_error`].
    pub fn begin_configuring(&mut self) {
        debug_assert_eq!(self.phase, TransportPhase::Idle);
        self.phase = TransportPhase::AwaitingTransport;
        tracing::debug!(target: LOG_TARGET, "configuring transport");
    }

    /// Installs the live channel, drains whatever accumulated in the write
    /// buffer, and settles into `active` — unless the drain itself drove
    /// the phase elsewhere (e.g. a `channel_inactive` delivered
    /// re-entrantly while draining).
    pub async fn activate(&mut self, channel: Box<dyn RpcChannel<Req, Resp>>) {
        self.channel = Some(channel);
        self.phase = TransportPhase::ActivatingTransport;
        tracing::debug!(target: LOG_TARGET, "channel active, draining buffer");
        self.drain().await;
        if self.phase == TransportPhase::ActivatingTransport {
            self.phase = TransportPhase::Active;
            tracing::debug!(target: LOG_TARGET, "transport active");
        }
    }

    /// The inner loop pops and writes buffered parts, deferring the flush
    /// to the end of the pass so several consecutive writes coalesce into
    /// one flush — tracked here by re-evaluating the (stateless, per-part)
    /// flush policy rather than a separate buffer-position marker. The
    /// outer loop picks up anything a write's completion pushed back onto
    /// the buffer, and stops as soon as the phase leaves
    /// `activating_transport`.
    async fn drain(&mut self) {
        while !self.buffer.is_empty() && self.phase == TransportPhase::ActivatingTransport {
            let mut flush_needed = false;
            while let Some(BufferedWrite { part, completion }) = self.buffer.pop_front() {
                let should_flush = Self::flush_policy(&part, self.request_streaming);
                let result = self.write_to_channel(part).await;
                if should_flush && result.is_ok() {
                    flush_needed = true;
                }
                if let Some(completion) = completion {
                    let _ = completion.send(result.map_err(CompletionError::from));
                }
                if self.phase != TransportPhase::ActivatingTransport {
                    break;
                }
            }
            if flush_needed {
                if let Some(channel) = self.channel.as_mut() {
                    let _ = channel.flush().await;
                }
            }
        }
    }

    async fn write_to_channel(&mut self, part: RequestPart<Req>) -> Result<(), Status> {
        match self.channel.as_mut() {
            Some(channel) => channel.write(part).await,
            None => Err(Status::unavailable("transport has no active channel")),
        }
    }

    /// A standalone `metadata` (request-streaming call) or `end` always
    /// flushes; a message flushes only when its own context asks for it.
    fn flush_policy(part: &RequestPart<Req>, request_streaming: bool) -> bool {
        match part {
            RequestPart::Metadata(_) => request_streaming,
            RequestPart::Message(_, ctx) => ctx.flush,
            RequestPart::End => true,
        }
    }

    /// Buffers before `active`, writes straight through once `active`,
    /// drops (failing the completion) once `closing`/`closed`.
    pub async fn send(&mut self, part: RequestPart<Req>, completion: Option<oneshot::Sender<CompletionResult>>) {
        match self.phase {
            TransportPhase::Idle | TransportPhase::AwaitingTransport | TransportPhase::ActivatingTransport => {
                self.buffer.push_back(BufferedWrite { part, completion });
            }
            TransportPhase::Active => {
                let should_flush = Self::flush_policy(&part, self.request_streaming);
                let result = self.write_to_channel(part).await;
                if should_flush && result.is_ok() {
                    if let Some(channel) = self.channel.as_mut() {
                        let _ = channel.flush().await;
                    }
                }
                if let Some(completion) = completion {
                    let _ = completion.send(result.map_err(CompletionError::from));
                }
            }
            TransportPhase::Closing | TransportPhase::Closed => {
                if let Some(completion) = completion {
                    let status = self.terminal_status_or_default();
                    let _ = completion.send(Err(CompletionError::from(status)));
                }
            }
        }
    }

    /// Returns `true` the first time cancellation actually takes effect
    /// (the caller should then inject `CANCELLED` inbound); a repeated
    /// cancel on an already-terminal transport is a no-op, returning
    /// `false`.
    pub async fn cancel(&mut self) -> bool {
        self.terminate(Status::cancelled("the call was cancelled")).await
    }

    /// General-purpose "tear down and fail the buffer" used by [`Self::cancel`]
    /// and by a deadline timer firing, which needs the same shutdown but
    /// with `DEADLINE_EXCEEDED` rather than `CANCELLED` as the reason.
    /// Returns `true` the first time it actually closes the transport.
    pub async fn terminate(&mut self, status: Status) -> bool {
        if matches!(self.phase, TransportPhase::Closing | TransportPhase::Closed) {
            return false;
        }
        tracing::debug!(target: LOG_TARGET, code = ?status.code(), "terminating transport");
        self.fail_buffered_writes(status.clone());
        if let Some(channel) = self.channel.as_mut() {
            channel.close().await;
        }
        self.phase = TransportPhase::Closing;
        self.terminal_status = Some(status);
        true
    }

    /// Returns `true` the first time this drives the transport to `closed`
    /// (the caller should inject `UNAVAILABLE` inbound).
    pub fn channel_inactive(&mut self) -> bool {
        if matches!(self.phase, TransportPhase::Closing | TransportPhase::Closed) {
            return false;
        }
        tracing::warn!(target: LOG_TARGET, "channel became inactive");
        let status = Status::unavailable("transport became inactive");
        self.fail_buffered_writes(status.clone());
        self.phase = TransportPhase::Closed;
        self.terminal_status = Some(status);
        true
    }

    /// The inbound error has already been routed by the caller; this only
    /// settles transport-local state. Returns `true` the first time it
    /// actually closes the transport.
    pub async fn channel_error(&mut self, status: Status) -> bool {
        if matches!(self.phase, TransportPhase::Closing | TransportPhase::Closed) {
            return false;
        }
        tracing::warn!(target: LOG_TARGET, code = ?status.code(), "channel error");
        self.fail_buffered_writes(status.clone());
        if let Some(channel) = self.channel.as_mut() {
            channel.close().await;
        }
        self.phase = TransportPhase::Closing;
        self.terminal_status = Some(status);
        true
    }

    fn fail_buffered_writes(&mut self, status: Status) {
        for BufferedWrite { completion, .. } in self.buffer.drain(..) {
            if let Some(completion) = completion {
                let _ = completion.send(Err(CompletionError::from(status.clone())));
            }
        }
    }

    fn terminal_status_or_default(&self) -> Status {
        self.terminal_status
            .clone()
            .unwrap_or_else(|| Status::unavailable("transport closed"))
    }

    /// Reads the next response part off the live channel, if any. `None`
    /// both when there is no channel yet and when the channel's stream has
    /// ended.
    pub async fn read(&mut self) -> Option<ResponsePart<Resp>> {
        match self.channel.as_mut() {
            Some(channel) => channel.read().await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct MockChannel {
        written: Arc<Mutex<Vec<RequestPart<String>>>>,
        flushes: Arc<Mutex<usize>>,
        inbound: mpsc::UnboundedReceiver<ResponsePart<String>>,
    }

    #[async_trait::async_trait]
    impl RpcChannel<String, String> for MockChannel {
        async fn write(&mut self, part: RequestPart<String>) -> Result<(), Status> {
            self.written.lock().unwrap().push(part);
            Ok(())
        }
        async fn flush(&mut self) -> Result<(), Status> {
            *self.flushes.lock().unwrap() += 1;
            Ok(())
        }
        async fn read(&mut self) -> Option<ResponsePart<String>> {
            self.inbound.recv().await
        }
        async fn close(&mut self) {}
    }

    fn mock() -> (MockChannel, Arc<Mutex<Vec<RequestPart<String>>>>, Arc<Mutex<usize>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let flushes = Arc::new(Mutex::new(0));
        let (_tx, rx) = mpsc::unbounded_channel();
        (
            MockChannel {
                written: written.clone(),
                flushes: flushes.clone(),
                inbound: rx,
            },
            written,
            flushes,
        )
    }

    #[tokio::test]
    async fn buffered_writes_drain_on_activation_in_one_flush() {
        let mut transport: TransportState<String, String> = TransportState::new(false);
        transport.begin_configuring();
        transport
            .send(RequestPart::Metadata(tonic::metadata::MetadataMap::new()), None)
            .await;
        transport
            .send(
                RequestPart::Message("X".to_string(), crate::request::MessageContext::default()),
                None,
            )
            .await;
        transport.send(RequestPart::End, None).await;

        let (channel, written, flushes) = mock();
        transport.activate(Box::new(channel)).await;

        assert_eq!(transport.phase(), TransportPhase::Active);
        assert_eq!(written.lock().unwrap().len(), 3);
        assert_eq!(*flushes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn send_while_active_writes_straight_through() {
        let mut transport: TransportState<String, String> = TransportState::new(false);
        transport.begin_configuring();
        let (channel, written, _) = mock();
        transport.activate(Box::new(channel)).await;

        let (tx, rx) = oneshot::channel();
        transport
            .send(RequestPart::End, Some(tx))
            .await;
        assert!(rx.await.unwrap().is_ok());
        assert_eq!(written.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_after_close_fails_completion() {
        let mut transport: TransportState<String, String> = TransportState::new(false);
        transport.cancel().await;
        let (tx, rx) = oneshot::channel();
        transport.send(RequestPart::End, Some(tx)).await;
        let err = rx.await.unwrap().unwrap_err();
        match err {
            CompletionError::Status(status) => assert_eq!(status.code(), crate::status::Code::Cancelled),
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_before_active_fails_buffered_writes() {
        let mut transport: TransportState<String, String> = TransportState::new(false);
        transport.begin_configuring();
        let (tx, rx) = oneshot::channel();
        transport
            .send(RequestPart::Message("X".to_string(), Default::default()), Some(tx))
            .await;
        let took_effect = transport.cancel().await;
        assert!(took_effect);
        let err = rx.await.unwrap().unwrap_err();
        match err {
            CompletionError::Status(status) => assert_eq!(status.code(), crate::status::Code::Cancelled),
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_cancel_is_a_no_op() {
        let mut transport: TransportState<String, String> = TransportState::new(false);
        assert!(transport.cancel().await);
        assert!(!transport.cancel().await);
    }

    #[tokio::test]
    async fn channel_inactive_fails_buffer_and_closes() {
        let mut transport: TransportState<String, String> = TransportState::new(false);
        transport.begin_configuring();
        let (tx, rx) = oneshot::channel();
        transport.send(RequestPart::End, Some(tx)).await;
        assert!(transport.channel_inactive());
        assert_eq!(transport.phase(), TransportPhase::Closed);
        let err = rx.await.unwrap().unwrap_err();
        match err {
            CompletionError::Status(status) => assert_eq!(status.code(), crate::status::Code::Unavailable),
            other => panic!("expected Status error, got {other:?}"),
        }
    }
}
