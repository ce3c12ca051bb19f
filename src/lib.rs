//! A client-side gRPC-over-HTTP/2 RPC call engine: the state machine that
//! drives a single remote procedure call from invocation through
//! completion, framed by a bidirectional interceptor pipeline.
//!
//! The four cooperating pieces are [`call::Call`] (the user-facing facade),
//! [`interceptor::InterceptorPipeline`] (the head/tail-sentineled
//! interceptor chain), [`transport::TransportState`] (the stream lifecycle
//! and write buffer), and [`response_container::ResponseContainer`] (the
//! lazily-allocated promises for metadata, trailers, status and the
//! response itself). Connection setup, multiplexing, TLS and wire
//! serialization of individual messages are external collaborators,
//! reached only through [`transport::RpcChannel`].

pub mod call;
pub mod call_options;
pub mod codec;
pub mod error;
pub mod framed_channel;
pub mod framing;
pub mod headers;
pub mod interceptor;
pub mod lazy;
pub mod request;
pub mod response;
pub mod response_container;
pub mod status;
pub mod transport;

pub use call::{Call, InvokeHandles};
pub use call_options::{CallOptions, CallType};
pub use codec::MessageCodec;
pub use error::{CompletionError, CompletionResult, InvalidState};
pub use framed_channel::{ByteChannel, ByteEvent, FramedChannel};
pub use interceptor::{Context, HeadInterceptor, Interceptor, InterceptorPipeline, TailInterceptor};
pub use request::{MessageContext, RequestPart};
pub use response::{CallError, ResponsePart};
pub use response_container::{ResponseContainer, ResponseHandler};
pub use status::{Code, Status};
pub use transport::{ChannelFactory, RpcChannel, TransportPhase, TransportState};
