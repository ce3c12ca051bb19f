//! The `Call` facade and its single-actor driver task: every operation on a
//! `Call` is posted as a tagged message onto the one task that owns the
//! transport and interceptor pipeline for that RPC, rather than locking
//! shared state from whichever thread happens to call in.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tonic::metadata::MetadataMap;
use tracing::Instrument;

use crate::call_options::{CallOptions, CallType};
use crate::error::{CompletionError, CompletionResult, InvalidState};
use crate::headers;
use crate::interceptor::{Interceptor, InterceptorPipeline};
use crate::lazy::LazySlot;
use crate::request::{MessageContext, RequestPart};
use crate::response::{CallError, ResponsePart};
use crate::response_container::ResponseHandler;
use crate::status::Status;
use crate::transport::{ChannelFactory, RpcChannel, TransportState};

const LOG_TARGET: &str = "rpc::call";

/// The promises handed back from [`Call::invoke`] and its convenience
/// wrappers. `response` is `None` when the call was invoked with a
/// streaming response handler.
pub struct InvokeHandles<Resp> {
    pub initial_metadata: oneshot::Receiver<Result<MetadataMap, Status>>,
    pub trailing_metadata: oneshot::Receiver<Result<MetadataMap, Status>>,
    pub status: oneshot::Receiver<Result<Status, Status>>,
    pub response: Option<oneshot::Receiver<Result<Resp, Status>>>,
}

enum Job<Req, Resp> {
    Send {
        part: RequestPart<Req>,
        completion: Option<oneshot::Sender<CompletionResult>>,
    },
    Cancel {
        completion: Option<oneshot::Sender<CompletionResult>>,
    },
    ChannelReady(Box<dyn RpcChannel<Req, Resp>>),
    ChannelError(Status),
}

struct IdleCall<Req, Resp> {
    interceptors: Vec<Arc<dyn Interceptor<Req, Resp>>>,
    channel_factory: ChannelFactory<Req, Resp>,
    on_error: Option<Arc<dyn Fn(&CallError) + Send + Sync>>,
}

enum CallInner<Req, Resp> {
    Idle(IdleCall<Req, Resp>),
    /// `terminated` is flipped by the driver task itself the moment the
    /// pipeline closes, independent of whether the job channel's receiver
    /// is still alive. Relying on the channel alone would mean a `send`
    /// or `cancel` issued after the driver task has already exited gets
    /// silently dropped and its completion resolves to a disconnected
    /// `oneshot::Receiver` instead of a reported `AlreadyTerminated`.
    Invoked(mpsc::UnboundedSender<Job<Req, Resp>>, Arc<AtomicBool>),
}

/// One RPC instance. Constructed idle; `invoke` (called through one of its
/// wrappers, or directly) transitions it exactly once.
pub struct Call<Req, Resp> {
    path: Arc<str>,
    call_type: CallType,
    options: Arc<CallOptions>,
    inner: Mutex<CallInner<Req, Resp>>,
}

impl<Req, Resp> Call<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn new(
        path: impl Into<Arc<str>>,
        call_type: CallType,
        options: CallOptions,
        channel_factory: ChannelFactory<Req, Resp>,
    ) -> Self {
        Call {
            path: path.into(),
            call_type,
            options: Arc::new(options),
            inner: Mutex::new(CallInner::Idle(IdleCall {
                interceptors: Vec::new(),
                channel_factory,
                on_error: None,
            })),
        }
    }

    /// Registers a user interceptor. Has no effect once [`Self::invoke`]
    /// has already run.
    pub fn add_interceptor(&self, interceptor: Arc<dyn Interceptor<Req, Resp>>) {
        let mut guard = self.inner.lock().unwrap();
        if let CallInner::Idle(idle) = &mut *guard {
            idle.interceptors.push(interceptor);
        }
    }

    /// Registers the error delegate the tail sentinel invokes before
    /// forwarding an unwrapped error.
    pub fn set_error_delegate(&self, delegate: Arc<dyn Fn(&CallError) + Send + Sync>) {
        let mut guard = self.inner.lock().unwrap();
        if let CallInner::Idle(idle) = &mut *guard {
            idle.on_error = Some(delegate);
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    fn request_headers(&self) -> MetadataMap {
        headers::build_request_headers(&self.options, None, None)
    }

    /// The first call builds the transport and pipeline and spawns the
    /// driver; later calls are a no-op, signalled by returning `None`.
    pub fn invoke(&self, handler: ResponseHandler<Resp>) -> Option<InvokeHandles<Resp>> {
        let mut guard = self.inner.lock().unwrap();
        if matches!(&*guard, CallInner::Invoked(..)) {
            tracing::debug!(target: LOG_TARGET, path = %self.path, "invoke is a no-op: already invoked");
            return None;
        }
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let terminated = Arc::new(AtomicBool::new(false));
        let idle = match std::mem::replace(&mut *guard, CallInner::Invoked(job_tx.clone(), terminated.clone())) {
            CallInner::Idle(idle) => idle,
            CallInner::Invoked(..) => unreachable!("checked above"),
        };
        drop(guard);

        let span = call_span(&self.path, &self.options);
        let _entered = span.enter();
        tracing::debug!(call_type = ?self.call_type, "invoking");

        let request_streaming = self.call_type.is_request_streaming();
        let transport = TransportState::new(request_streaming);
        let response = crate::response_container::ResponseContainer::new(handler);
        let mut pipeline = InterceptorPipeline::new(
            idle.interceptors,
            self.path.clone(),
            self.call_type,
            self.options.clone(),
            transport,
            response,
            idle.on_error,
        );

        let handles = InvokeHandles {
            initial_metadata: pipeline.subscribe_initial_metadata(),
            trailing_metadata: pipeline.subscribe_trailing_metadata(),
            status: pipeline.subscribe_status(),
            response: pipeline.subscribe_response(),
        };

        pipeline.transport().begin_configuring();

        {
            let configure_tx = job_tx.clone();
            let factory = idle.channel_factory.clone();
            let path = self.path.clone();
            let max_receive_message_length = self.options.max_receive_message_length;
            tokio::spawn(async move {
                match factory(&path, max_receive_message_length).await {
                    Ok(channel) => {
                        let _ = configure_tx.send(Job::ChannelReady(channel));
                    }
                    Err(status) => {
                        let _ = configure_tx.send(Job::ChannelError(status));
                    }
                }
            });
        }

        let deadline = self.options.timeout;
        tokio::spawn(run_driver(pipeline, job_rx, deadline, terminated).instrument(span.clone()));

        Some(handles)
    }

    /// Sends `metadata`, then `message(req)`, then `end` atomically. Used
    /// for unary and server-streaming calls — `on_message` carries the
    /// streaming callback for the latter, `None` for a single-response call.
    pub fn invoke_unary_request(
        &self,
        req: Req,
        on_message: Option<Box<dyn FnMut(Resp) + Send>>,
    ) -> Option<InvokeHandles<Resp>> {
        let handler = match on_message {
            Some(callback) => ResponseHandler::Streaming(callback),
            None => ResponseHandler::Unary(LazySlot::new()),
        };
        let handles = self.invoke(handler)?;
        let compress = self.options.compress_by_default;
        self.send_with_completion(RequestPart::Metadata(self.request_headers()), None);
        self.send_with_completion(
            RequestPart::Message(req, MessageContext { compress, flush: false }),
            None,
        );
        self.send_with_completion(RequestPart::End, None);
        Some(handles)
    }

    /// Sends only `metadata` and returns control to the caller for
    /// subsequent `send` calls. Used for client-streaming and
    /// bidirectional calls.
    pub fn invoke_streaming_requests(
        &self,
        on_message: Option<Box<dyn FnMut(Resp) + Send>>,
    ) -> Option<InvokeHandles<Resp>> {
        let handler = match on_message {
            Some(callback) => ResponseHandler::Streaming(callback),
            None => ResponseHandler::Unary(LazySlot::new()),
        };
        let handles = self.invoke(handler)?;
        self.send_with_completion(RequestPart::Metadata(self.request_headers()), None);
        Some(handles)
    }

    /// Fails immediately with `InvalidState::NotInvoked` if called before
    /// `invoke`, and with `InvalidState::AlreadyTerminated` if the call has
    /// already reached a terminal state.
    pub fn send(&self, part: RequestPart<Req>) -> oneshot::Receiver<CompletionResult> {
        let (tx, rx) = oneshot::channel();
        self.send_with_completion(part, Some(tx));
        rx
    }

    fn send_with_completion(&self, part: RequestPart<Req>, completion: Option<oneshot::Sender<CompletionResult>>) {
        let guard = self.inner.lock().unwrap();
        match &*guard {
            CallInner::Idle(_) => {
                if let Some(completion) = completion {
                    let _ = completion.send(Err(CompletionError::from(InvalidState::NotInvoked)));
                }
            }
            CallInner::Invoked(job_tx, terminated) => {
                if terminated.load(Ordering::SeqCst) {
                    if let Some(completion) = completion {
                        let _ = completion.send(Err(CompletionError::from(InvalidState::AlreadyTerminated)));
                    }
                    return;
                }
                let _ = job_tx.send(Job::Send { part, completion });
            }
        }
    }

    /// Iterates the sequence, emitting one `message` per element; only the
    /// last message is flushed.
    pub fn send_messages(&self, messages: impl IntoIterator<Item = Req>, compress: bool) {
        let mut iter = messages.into_iter().peekable();
        while let Some(message) = iter.next() {
            let flush = iter.peek().is_none();
            self.send_with_completion(RequestPart::Message(message, MessageContext { compress, flush }), None);
        }
    }

    /// A cancel before `invoke` fails with `InvalidState::NotInvoked`; a
    /// cancel after the RPC has already terminated succeeds as a no-op.
    pub fn cancel(&self) -> oneshot::Receiver<CompletionResult> {
        let (tx, rx) = oneshot::channel();
        let guard = self.inner.lock().unwrap();
        match &*guard {
            CallInner::Idle(_) => {
                let _ = tx.send(Err(CompletionError::from(InvalidState::NotInvoked)));
            }
            CallInner::Invoked(job_tx, terminated) => {
                if terminated.load(Ordering::SeqCst) {
                    let _ = tx.send(Ok(()));
                } else {
                    let _ = job_tx.send(Job::Cancel { completion: Some(tx) });
                }
            }
        }
        rx
    }
}

/// Builds the per-call logging span: a child of `options.logger` if the
/// caller supplied one, otherwise a fresh span under this crate's own
/// target, carrying `path` and — if `options.request_id_provider` is set —
/// a `request_id` field generated once per invocation.
fn call_span(path: &str, options: &CallOptions) -> tracing::Span {
    let request_id = options.request_id_provider.as_ref().map(|provider| provider());
    match (&options.logger, request_id) {
        (Some(parent), Some(request_id)) => tracing::span!(
            target: LOG_TARGET, parent: parent, tracing::Level::DEBUG, "call", path = %path, request_id = %request_id
        ),
        (Some(parent), None) => tracing::span!(
            target: LOG_TARGET, parent: parent, tracing::Level::DEBUG, "call", path = %path
        ),
        (None, Some(request_id)) => tracing::span!(
            target: LOG_TARGET, tracing::Level::DEBUG, "call", path = %path, request_id = %request_id
        ),
        (None, None) => tracing::span!(target: LOG_TARGET, tracing::Level::DEBUG, "call", path = %path),
    }
}

/// The RPC's single-threaded-cooperative executor: one task draining a job
/// queue, the transport's inbound stream, and the deadline timer. Flips
/// `terminated` before exiting so callers on other threads get a proper
/// `AlreadyTerminated` (or an idempotent success, for `cancel`) instead of a
/// disconnected oneshot once this task is gone.
async fn run_driver<Req, Resp>(
    mut pipeline: InterceptorPipeline<Req, Resp>,
    mut jobs: mpsc::UnboundedReceiver<Job<Req, Resp>>,
    deadline: Option<Duration>,
    terminated: Arc<AtomicBool>,
) where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    let mut sleep: Pin<Box<dyn Future<Output = ()> + Send>> = match deadline {
        Some(d) => Box::pin(tokio::time::sleep(d)),
        None => Box::pin(std::future::pending()),
    };
    let mut deadline_fired = false;

    loop {
        tokio::select! {
            job = jobs.recv() => {
                match job {
                    Some(Job::Send { part, completion }) => {
                        pipeline.dispatch_send(part, completion).await;
                    }
                    Some(Job::Cancel { completion }) => {
                        pipeline.dispatch_cancel(completion).await;
                    }
                    Some(Job::ChannelReady(channel)) => {
                        pipeline.transport().activate(channel).await;
                    }
                    Some(Job::ChannelError(status)) => {
                        if pipeline.transport().channel_error(status.clone()).await {
                            pipeline.deliver_inbound(ResponsePart::Error(CallError::new(status))).await;
                        }
                    }
                    None => {
                        // Every handle to this call (and its clones) was dropped;
                        // tear the RPC down the same way an explicit cancel would.
                        if pipeline.transport().cancel().await {
                            pipeline
                                .deliver_inbound(ResponsePart::Error(CallError::new(Status::cancelled(
                                    "call handle dropped",
                                ))))
                                .await;
                        }
                    }
                }
            }
            part = pipeline.transport().read() => {
                match part {
                    Some(part) => pipeline.deliver_inbound(part).await,
                    None => {
                        if pipeline.transport().channel_inactive() {
                            pipeline
                                .deliver_inbound(ResponsePart::Error(CallError::new(Status::unavailable(
                                    "transport became inactive",
                                ))))
                                .await;
                        }
                    }
                }
            }
            _ = &mut sleep, if !deadline_fired => {
                deadline_fired = true;
                tracing::debug!(target: LOG_TARGET, "deadline expired");
                let status = Status::deadline_exceeded("deadline exceeded");
                if pipeline.transport().terminate(status.clone()).await {
                    pipeline.deliver_inbound(ResponsePart::Error(CallError::new(status))).await;
                }
            }
        }

        if pipeline.is_closed() {
            break;
        }
    }

    terminated.store(true, Ordering::SeqCst);
}
