//! The bidirectional interceptor pipeline.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::call_options::{CallOptions, CallType};
use crate::error::{CompletionError, CompletionResult, InvalidState};
use crate::request::RequestPart;
use crate::response::{CallError, ResponsePart};
use crate::response_container::ResponseContainer;
use crate::status::Status;
use crate::transport::TransportState;

/// A user-supplied (or sentinel) participant in the pipeline. Default
/// methods just forward unchanged: inbound (`receive`, `error_caught`)
/// toward the tail, outbound (`send`, `cancel`) toward the head.
#[async_trait::async_trait]
pub trait Interceptor<Req, Resp>: Send + Sync
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn receive(&self, ctx: &mut Context<'_, Req, Resp>, part: ResponsePart<Resp>) {
        ctx.forward_receive(part).await;
    }

    async fn error_caught(&self, ctx: &mut Context<'_, Req, Resp>, err: CallError) {
        ctx.forward_error_caught(err).await;
    }

    async fn send(
        &self,
        ctx: &mut Context<'_, Req, Resp>,
        part: RequestPart<Req>,
        completion: Option<oneshot::Sender<CompletionResult>>,
    ) {
        ctx.forward_send(part, completion).await;
    }

    async fn cancel(&self, ctx: &mut Context<'_, Req, Resp>, completion: Option<oneshot::Sender<CompletionResult>>) {
        ctx.forward_cancel(completion).await;
    }
}

/// The per-dispatch view handed to one interceptor: its position in the
/// chain, the call's read-only facts, and disjoint mutable access to the
/// transport, response container and closed flag it may need to reach the
/// ends of the pipeline.
pub struct Context<'a, Req, Resp> {
    interceptors: &'a [Arc<dyn Interceptor<Req, Resp>>],
    index: usize,
    path: &'a str,
    call_type: CallType,
    options: &'a CallOptions,
    transport: &'a mut TransportState<Req, Resp>,
    response: &'a mut ResponseContainer<Resp>,
    closed: &'a mut bool,
    on_error: &'a Option<Arc<dyn Fn(&CallError) + Send + Sync>>,
}

impl<'a, Req, Resp> Context<'a, Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn path(&self) -> &str {
        self.path
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn options(&self) -> &CallOptions {
        self.options
    }

    pub fn transport_mut(&mut self) -> &mut TransportState<Req, Resp> {
        self.transport
    }

    fn reborrow(&mut self, index: usize) -> Context<'_, Req, Resp> {
        Context {
            interceptors: self.interceptors,
            index,
            path: self.path,
            call_type: self.call_type,
            options: self.options,
            transport: &mut *self.transport,
            response: &mut *self.response,
            closed: &mut *self.closed,
            on_error: self.on_error,
        }
    }

    /// Routes a response part to the next interceptor's `receive` or
    /// `error_caught`, depending on its variant: both stay distinct
    /// inbound methods even though an error is carried as one case of the
    /// response part, which keeps teardown ordering consistent.
    pub async fn deliver(&mut self, part: ResponsePart<Resp>) {
        match part {
            ResponsePart::Error(err) => self.forward_error_caught(err).await,
            other => self.forward_receive(other).await,
        }
    }

    /// Forwards toward the tail: `receive` forwards to `index+1`.
    pub async fn forward_receive(&mut self, part: ResponsePart<Resp>) {
        if *self.closed {
            return;
        }
        let next = self.index + 1;
        if next < self.interceptors.len() {
            let interceptor = self.interceptors[next].clone();
            let mut ctx = self.reborrow(next);
            interceptor.receive(&mut ctx, part).await;
        }
    }

    pub async fn forward_error_caught(&mut self, err: CallError) {
        if *self.closed {
            return;
        }
        let next = self.index + 1;
        if next < self.interceptors.len() {
            let interceptor = self.interceptors[next].clone();
            let mut ctx = self.reborrow(next);
            interceptor.error_caught(&mut ctx, err).await;
        }
    }

    /// Forwards toward the head: `send`/`cancel` forward to `index-1`.
    /// `index == 0` (the head) never calls this — the head overrides
    /// `send`/`cancel` to reach the transport instead.
    pub async fn forward_send(&mut self, part: RequestPart<Req>, completion: Option<oneshot::Sender<CompletionResult>>) {
        if self.index == 0 {
            return;
        }
        let prev = self.index - 1;
        let interceptor = self.interceptors[prev].clone();
        let mut ctx = self.reborrow(prev);
        interceptor.send(&mut ctx, part, completion).await;
    }

    pub async fn forward_cancel(&mut self, completion: Option<oneshot::Sender<CompletionResult>>) {
        if self.index == 0 {
            return;
        }
        let prev = self.index - 1;
        let interceptor = self.interceptors[prev].clone();
        let mut ctx = self.reborrow(prev);
        interceptor.cancel(&mut ctx, completion).await;
    }
}

/// The sentinel adjacent to the transport: its `send` invokes the
/// transport's send, its `cancel` invokes the transport's cancel.
/// `receive`/`error_caught` use the trait defaults — the head never
/// originates responses, it only forwards what the transport injects.
pub struct HeadInterceptor;

#[async_trait::async_trait]
impl<Req, Resp> Interceptor<Req, Resp> for HeadInterceptor
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn send(&self, ctx: &mut Context<'_, Req, Resp>, part: RequestPart<Req>, completion: Option<oneshot::Sender<CompletionResult>>) {
        ctx.transport.send(part, completion).await;
    }

    async fn cancel(&self, ctx: &mut Context<'_, Req, Resp>, completion: Option<oneshot::Sender<CompletionResult>>) {
        let took_effect = ctx.transport.cancel().await;
        if let Some(completion) = completion {
            let _ = completion.send(Ok(()));
        }
        if took_effect {
            ctx.forward_error_caught(CallError::new(Status::cancelled("the call was cancelled")))
                .await;
        }
    }
}

/// The sentinel adjacent to the call. `receive`
/// delivers `metadata`/`message` straight to the response container; on a
/// terminal part the pipeline is closed *before* the container is told,
/// so a callback running inside `apply` observes a consistent terminal
/// state. `error_caught` unwraps any context wrapper, runs the optional
/// user error delegate, and hands the bare error to the response
/// container as the terminal part.
pub struct TailInterceptor;

#[async_trait::async_trait]
impl<Req, Resp> Interceptor<Req, Resp> for TailInterceptor
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn receive(&self, ctx: &mut Context<'_, Req, Resp>, part: ResponsePart<Resp>) {
        if part.is_terminal() {
            *ctx.closed = true;
        }
        ctx.response.apply(part);
    }

    async fn error_caught(&self, ctx: &mut Context<'_, Req, Resp>, err: CallError) {
        if let Some(on_error) = ctx.on_error.as_ref() {
            on_error(&err);
        }
        *ctx.closed = true;
        ctx.response.apply(ResponsePart::Error(err.unwrapped()));
    }
}

/// One RPC's interceptor chain plus the transport and response container
/// it frames. Owns everything a single call needs below the facade.
pub struct InterceptorPipeline<Req, Resp> {
    interceptors: Vec<Arc<dyn Interceptor<Req, Resp>>>,
    path: Arc<str>,
    call_type: CallType,
    options: Arc<CallOptions>,
    transport: TransportState<Req, Resp>,
    response: ResponseContainer<Resp>,
    closed: bool,
    on_error: Option<Arc<dyn Fn(&CallError) + Send + Sync>>,
}

impl<Req, Resp> InterceptorPipeline<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn new(
        user_interceptors: Vec<Arc<dyn Interceptor<Req, Resp>>>,
        path: impl Into<Arc<str>>,
        call_type: CallType,
        options: Arc<CallOptions>,
        transport: TransportState<Req, Resp>,
        response: ResponseContainer<Resp>,
        on_error: Option<Arc<dyn Fn(&CallError) + Send + Sync>>,
    ) -> Self {
        let mut interceptors: Vec<Arc<dyn Interceptor<Req, Resp>>> =
            Vec::with_capacity(user_interceptors.len() + 2);
        interceptors.push(Arc::new(HeadInterceptor));
        interceptors.extend(user_interceptors);
        interceptors.push(Arc::new(TailInterceptor));
        InterceptorPipeline {
            interceptors,
            path: path.into(),
            call_type,
            options,
            transport,
            response,
            closed: false,
            on_error,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn transport(&mut self) -> &mut TransportState<Req, Resp> {
        &mut self.transport
    }

    pub fn subscribe_initial_metadata(&mut self) -> oneshot::Receiver<Result<tonic::metadata::MetadataMap, Status>> {
        self.response.subscribe_initial_metadata()
    }

    pub fn subscribe_trailing_metadata(&mut self) -> oneshot::Receiver<Result<tonic::metadata::MetadataMap, Status>> {
        self.response.subscribe_trailing_metadata()
    }

    pub fn subscribe_status(&mut self) -> oneshot::Receiver<Result<Status, Status>> {
        self.response.subscribe_status()
    }

    pub fn subscribe_response(&mut self) -> Option<oneshot::Receiver<Result<Resp, Status>>> {
        self.response.subscribe_response()
    }

    /// Injects a response part at the head, so it traverses the whole
    /// chain inbound. This is how the deadline timer delivers a
    /// `DEADLINE_EXCEEDED` error without going through the transport.
    pub async fn deliver_inbound(&mut self, part: ResponsePart<Resp>) {
        if self.closed {
            return;
        }
        let mut ctx = self.context_at(0);
        ctx.deliver(part).await;
    }

    /// Enters the pipeline from the call side: the part is handed to the
    /// pipeline's tail.
    pub async fn dispatch_send(&mut self, part: RequestPart<Req>, completion: Option<oneshot::Sender<CompletionResult>>) {
        if self.closed {
            if let Some(completion) = completion {
                let _ = completion.send(Err(CompletionError::from(InvalidState::AlreadyTerminated)));
            }
            return;
        }
        let tail = self.interceptors.len() - 1;
        let interceptor = self.interceptors[tail].clone();
        let mut ctx = self.context_at(tail);
        interceptor.send(&mut ctx, part, completion).await;
    }

    /// Enters the pipeline from the call side, traversing it outbound
    /// from the tail. A cancel after the pipeline has already closed is
    /// an idempotent success.
    pub async fn dispatch_cancel(&mut self, completion: Option<oneshot::Sender<CompletionResult>>) {
        if self.closed {
            if let Some(completion) = completion {
                let _ = completion.send(Ok(()));
            }
            return;
        }
        let tail = self.interceptors.len() - 1;
        let interceptor = self.interceptors[tail].clone();
        let mut ctx = self.context_at(tail);
        interceptor.cancel(&mut ctx, completion).await;
    }

    fn context_at(&mut self, index: usize) -> Context<'_, Req, Resp> {
        Context {
            interceptors: &self.interceptors,
            index,
            path: &self.path,
            call_type: self.call_type,
            options: &self.options,
            transport: &mut self.transport,
            response: &mut self.response,
            closed: &mut self.closed,
            on_error: &self.on_error,
        }
    }
}
