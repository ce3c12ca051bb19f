//! Shared black-box test harness: an in-memory [`rpc_call_core::RpcChannel`]
//! scripted with a fixed sequence of inbound parts, used by the end-to-end
//! scenarios in `tests/end_to_end.rs`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rpc_call_core::{ChannelFactory, RequestPart, ResponsePart, RpcChannel, Status};
use tokio::sync::mpsc;

pub struct ScriptedChannel<Resp> {
    inbound: mpsc::UnboundedReceiver<ResponsePart<Resp>>,
    writes: Arc<AtomicUsize>,
    flushes: Arc<AtomicUsize>,
    // Keeps the script's sender half alive for the channel's lifetime: an
    // empty script should block forever (e.g. to let a deadline fire)
    // rather than the receiver observing a spurious close.
    _keep_alive: mpsc::UnboundedSender<ResponsePart<Resp>>,
}

#[async_trait::async_trait]
impl<Req: Send, Resp: Send> RpcChannel<Req, Resp> for ScriptedChannel<Resp> {
    async fn write(&mut self, _part: RequestPart<Req>) -> Result<(), Status> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn flush(&mut self) -> Result<(), Status> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn read(&mut self) -> Option<ResponsePart<Resp>> {
        self.inbound.recv().await
    }
    async fn close(&mut self) {}
}

/// Counters observed on a [`ScriptedChannel`] built by [`scripted_factory`].
pub struct ChannelCounters {
    pub writes: Arc<AtomicUsize>,
    pub flushes: Arc<AtomicUsize>,
}

/// Builds a [`ChannelFactory`] that always hands back a channel preloaded
/// with `script`, regardless of the path requested.
pub fn scripted_factory<Req, Resp>(
    script: Vec<ResponsePart<Resp>>,
) -> (ChannelFactory<Req, Resp>, ChannelCounters)
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    let writes = Arc::new(AtomicUsize::new(0));
    let flushes = Arc::new(AtomicUsize::new(0));
    let writes_for_factory = writes.clone();
    let flushes_for_factory = flushes.clone();
    let factory: ChannelFactory<Req, Resp> = Arc::new(move |_path: &str, _cap: Option<usize>| {
        let (tx, rx) = mpsc::unbounded_channel();
        for part in script.clone() {
            let _ = tx.send(part);
        }
        let writes = writes_for_factory.clone();
        let flushes = flushes_for_factory.clone();
        Box::pin(async move {
            Ok(Box::new(ScriptedChannel {
                inbound: rx,
                writes,
                flushes,
                _keep_alive: tx,
            }) as Box<dyn RpcChannel<Req, Resp>>)
        })
    });
    (factory, ChannelCounters { writes, flushes })
}

/// A factory whose future never resolves, for scenarios that exercise a
/// deadline firing before the transport even finishes configuring.
pub fn never_ready_factory<Req, Resp>() -> ChannelFactory<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    Arc::new(move |_path: &str, _cap: Option<usize>| Box::pin(std::future::pending()))
}
