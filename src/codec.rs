//! The pluggable per-message serializer a [`crate::framed_channel::FramedChannel`]
//! hands each outbound message to before framing it, and each inbound
//! frame's payload to before handing a typed value to the rest of the
//! pipeline.
//!
//! Modeled on tonic's own `Encoder`/`Decoder` split (see the teacher's
//! `DynamicEncoder`/`DynamicDecoder` pair in `grpcurl-core/src/codec.rs`):
//! one fallible method per direction rather than a single bidirectional
//! trait, since a concrete codec's encode and decode paths rarely share
//! any state.

use bytes::Bytes;

use crate::status::Status;

/// Turns a typed request message into its wire payload, and a decoded
/// frame's payload back into a typed response message.
pub trait MessageCodec<Req, Resp>: Send + Sync {
    fn encode(&self, message: &Req) -> Result<Vec<u8>, Status>;
    fn decode(&self, payload: Bytes) -> Result<Resp, Status>;
}
