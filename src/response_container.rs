//! The response parts container.

use tokio::sync::oneshot;
use tonic::metadata::MetadataMap;

use crate::lazy::LazySlot;
use crate::response::{CallError, ResponsePart};
use crate::status::Status;

const LOG_TARGET: &str = "rpc::response";

/// How a unary-style response message is delivered, versus a streaming
/// callback invoked once per message.
pub enum ResponseHandler<Resp> {
    Unary(LazySlot<Resp>),
    Streaming(Box<dyn FnMut(Resp) + Send>),
}

/// Holds the four promises plus the response handler for one call.
pub struct ResponseContainer<Resp> {
    initial_metadata: LazySlot<MetadataMap>,
    trailing_metadata: LazySlot<MetadataMap>,
    status: LazySlot<Status>,
    handler: ResponseHandler<Resp>,
}

impl<Resp> ResponseContainer<Resp> {
    pub fn new(handler: ResponseHandler<Resp>) -> Self {
        ResponseContainer {
            initial_metadata: LazySlot::new(),
            trailing_metadata: LazySlot::new(),
            status: LazySlot::new(),
            handler,
        }
    }

    pub fn subscribe_initial_metadata(&mut self) -> oneshot::Receiver<Result<MetadataMap, Status>> {
        self.initial_metadata.subscribe()
    }

    pub fn subscribe_trailing_metadata(&mut self) -> oneshot::Receiver<Result<MetadataMap, Status>> {
        self.trailing_metadata.subscribe()
    }

    pub fn subscribe_status(&mut self) -> oneshot::Receiver<Result<Status, Status>> {
        self.status.subscribe()
    }

    /// Only valid when the handler is [`ResponseHandler::Unary`].
    pub fn subscribe_response(&mut self) -> Option<oneshot::Receiver<Result<Resp, Status>>> {
        match &mut self.handler {
            ResponseHandler::Unary(slot) => Some(slot.subscribe()),
            ResponseHandler::Streaming(_) => None,
        }
    }

    /// Applies one inbound response part, resolving or failing the
    /// relevant promises. Returns `true` once this part was terminal,
    /// signalling the pipeline to close.
    pub fn apply(&mut self, part: ResponsePart<Resp>) -> bool {
        match part {
            ResponsePart::Metadata(headers) => {
                tracing::trace!(target: LOG_TARGET, "initial metadata received");
                self.initial_metadata.complete(Ok(headers));
                false
            }
            ResponsePart::Message(msg) => {
                match &mut self.handler {
                    ResponseHandler::Unary(slot) => {
                        if slot.is_pending() {
                            slot.complete(Ok(msg));
                        } else {
                            tracing::error!(
                                target: LOG_TARGET,
                                "second message delivered to a unary response handler"
                            );
                            let status = Status::internal(
                                "protocol violation: unary call received more than one message",
                            );
                            slot.complete(Err(status));
                        }
                    }
                    ResponseHandler::Streaming(callback) => callback(msg),
                }
                false
            }
            ResponsePart::End(status, trailers) => {
                tracing::debug!(target: LOG_TARGET, code = ?status.code(), "response ended");
                self.fail_pending_promises(status.clone());
                self.trailing_metadata.complete(Ok(trailers));
                // The status promise always succeeds, even for a non-OK
                // status: that is a successful delivery of a negative
                // outcome.
                self.status.complete(Ok(status));
                true
            }
            ResponsePart::Error(err) => {
                let status = err.status().clone();
                tracing::warn!(target: LOG_TARGET, code = ?status.code(), "response failed");
                self.fail_pending_promises(status.clone());
                self.trailing_metadata.complete(Err(status.clone()));
                self.status.complete(Ok(status));
                true
            }
        }
    }

    /// Fails the initial-metadata and (if unary) response promises with
    /// `status`, but only if they are still pending — a value already
    /// delivered (e.g. a message that arrived before a trailers-only
    /// `End`) is left alone.
    fn fail_pending_promises(&mut self, status: Status) {
        if self.initial_metadata.is_pending() {
            self.initial_metadata.complete(Err(status.clone()));
        }
        if let ResponseHandler::Unary(slot) = &mut self.handler {
            if slot.is_pending() {
                slot.complete(Err(status));
            }
        }
    }
}

/// Turns an inbound [`CallError`] into the status used to fail the
/// non-status promises: unwrapped, with `UNKNOWN` standing in wherever no
/// more specific mapping applies.
pub fn error_to_status(err: &CallError) -> Status {
    err.status().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::CallError;
    use tonic::Code;

    fn unary_container() -> ResponseContainer<String> {
        ResponseContainer::new(ResponseHandler::Unary(LazySlot::new()))
    }

    #[tokio::test]
    async fn unary_success_resolves_all_promises() {
        let mut container = unary_container();
        let status_rx = container.subscribe_status();
        let resp_rx = container.subscribe_response().unwrap();
        let meta_rx = container.subscribe_initial_metadata();

        container.apply(ResponsePart::Metadata(MetadataMap::new()));
        container.apply(ResponsePart::Message("hi".to_string()));
        container.apply(ResponsePart::End(Status::ok(""), MetadataMap::new()));

        assert_eq!(resp_rx.await.unwrap().unwrap(), "hi");
        assert!(meta_rx.await.unwrap().is_ok());
        assert_eq!(status_rx.await.unwrap().unwrap().code(), Code::Ok);
    }

    #[tokio::test]
    async fn trailers_only_error_fails_metadata_and_response_but_not_status() {
        let mut container = unary_container();
        let status_rx = container.subscribe_status();
        let resp_rx = container.subscribe_response().unwrap();
        let meta_rx = container.subscribe_initial_metadata();
        let trailing_rx = container.subscribe_trailing_metadata();

        let mut trailers = MetadataMap::new();
        trailers.insert("grpc-message", "nope".parse().unwrap());
        container.apply(ResponsePart::End(
            Status::permission_denied("nope"),
            trailers,
        ));

        assert_eq!(resp_rx.await.unwrap().unwrap_err().code(), Code::PermissionDenied);
        assert_eq!(meta_rx.await.unwrap().unwrap_err().code(), Code::PermissionDenied);
        assert!(trailing_rx.await.unwrap().is_ok());
        assert_eq!(status_rx.await.unwrap().unwrap().code(), Code::PermissionDenied);
    }

    #[tokio::test]
    async fn second_message_to_unary_handler_is_a_protocol_violation() {
        let mut container = unary_container();
        let resp_rx = container.subscribe_response().unwrap();
        container.apply(ResponsePart::Message("first".to_string()));
        container.apply(ResponsePart::Message("second".to_string()));
        // The first value was already delivered; the slot is resolved, so
        // the second (violating) message is simply dropped rather than
        // retroactively failing an already-delivered result.
        assert_eq!(resp_rx.await.unwrap().unwrap(), "first");
    }

    #[tokio::test]
    async fn error_part_unwraps_to_status_and_never_fails_status_promise() {
        let mut container = unary_container();
        let status_rx = container.subscribe_status();
        let resp_rx = container.subscribe_response().unwrap();

        container.apply(ResponsePart::Error(CallError::new(Status::unavailable(
            "down",
        ))));

        assert_eq!(resp_rx.await.unwrap().unwrap_err().code(), Code::Unavailable);
        assert_eq!(status_rx.await.unwrap().unwrap().code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn streaming_handler_invokes_callback_per_message() {
        use std::sync::{Arc, Mutex};
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let mut container = ResponseContainer::new(ResponseHandler::Streaming(Box::new(
            move |msg: i32| received_clone.lock().unwrap().push(msg),
        )));
        container.apply(ResponsePart::Message(1));
        container.apply(ResponsePart::Message(2));
        container.apply(ResponsePart::Message(3));
        container.apply(ResponsePart::End(Status::ok(""), MetadataMap::new()));
        assert_eq!(*received.lock().unwrap(), vec![1, 2, 3]);
    }
}
