//! A reference [`RpcChannel`] built on the length-prefixed framing codec: it
//! sits on top of a raw [`ByteChannel`] (the true out-of-scope HTTP/2
//! collaborator) and a [`MessageCodec`], turning typed request parts into
//! framed bytes on the way out and framed bytes back into typed response
//! parts on the way in, enforcing `max_receive_message_length` against the
//! inbound stream as it does so.
//!
//! A channel implementor is never required to use this adapter — `RpcChannel`
//! stays the narrow contract it always was — but this is the concrete,
//! reachable path through which this crate's own framing and length-cap
//! logic actually runs.

use std::collections::VecDeque;

use bytes::Bytes;
use tonic::metadata::MetadataMap;

use crate::codec::MessageCodec;
use crate::framing::{encode_frame, FrameDecoder};
use crate::request::RequestPart;
use crate::response::{CallError, ResponsePart};
use crate::status::Status;
use crate::transport::RpcChannel;

/// One event a raw byte-oriented stream delivers. Metadata and trailers
/// travel out-of-band of the message byte stream (HTTP/2 HEADERS frames,
/// typically), so they're surfaced as their own variants rather than
/// interleaved into `Data`.
#[derive(Debug, Clone)]
pub enum ByteEvent {
    Metadata(MetadataMap),
    Data(Bytes),
    End(Status, MetadataMap),
}

/// The byte-oriented duplex a [`FramedChannel`] frames messages over.
/// Connection setup, multiplexing and TLS all live behind this, same as
/// they would behind a hand-written [`RpcChannel`] implementation.
#[async_trait::async_trait]
pub trait ByteChannel: Send {
    async fn write_metadata(&mut self, metadata: MetadataMap) -> Result<(), Status>;
    async fn write_message(&mut self, framed: Bytes) -> Result<(), Status>;
    async fn write_end(&mut self) -> Result<(), Status>;
    async fn flush(&mut self) -> Result<(), Status>;
    async fn read(&mut self) -> Option<ByteEvent>;
    async fn close(&mut self);
}

/// Wraps a [`ByteChannel`] and a [`MessageCodec`] into an [`RpcChannel`],
/// decoding inbound bytes through a [`FrameDecoder`] capped at
/// `max_receive_message_length`.
pub struct FramedChannel<B, Req, Resp, C> {
    byte_channel: B,
    codec: C,
    decoder: FrameDecoder,
    pending: VecDeque<ResponsePart<Resp>>,
    _marker: std::marker::PhantomData<fn(Req)>,
}

impl<B, Req, Resp, C> FramedChannel<B, Req, Resp, C>
where
    B: ByteChannel,
    C: MessageCodec<Req, Resp>,
{
    pub fn new(byte_channel: B, codec: C, max_receive_message_length: Option<usize>) -> Self {
        FramedChannel {
            byte_channel,
            codec,
            decoder: FrameDecoder::new(max_receive_message_length),
            pending: VecDeque::new(),
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<B, Req, Resp, C> RpcChannel<Req, Resp> for FramedChannel<B, Req, Resp, C>
where
    B: ByteChannel + Send,
    Req: Send + 'static,
    Resp: Send + 'static,
    C: MessageCodec<Req, Resp> + Send + Sync,
{
    async fn write(&mut self, part: RequestPart<Req>) -> Result<(), Status> {
        match part {
            RequestPart::Metadata(metadata) => self.byte_channel.write_metadata(metadata).await,
            RequestPart::Message(message, ctx) => {
                let payload = self.codec.encode(&message)?;
                let framed = encode_frame(&payload, ctx.compress);
                self.byte_channel.write_message(framed).await
            }
            RequestPart::End => self.byte_channel.write_end().await,
        }
    }

    async fn flush(&mut self) -> Result<(), Status> {
        self.byte_channel.flush().await
    }

    async fn read(&mut self) -> Option<ResponsePart<Resp>> {
        loop {
            if let Some(part) = self.pending.pop_front() {
                return Some(part);
            }
            match self.byte_channel.read().await? {
                ByteEvent::Metadata(metadata) => return Some(ResponsePart::Metadata(metadata)),
                ByteEvent::End(status, trailers) => return Some(ResponsePart::End(status, trailers)),
                ByteEvent::Data(bytes) => {
                    self.decoder.push(&bytes);
                    match self.decoder.decode_all() {
                        Ok(frames) => {
                            for frame in frames {
                                match self.codec.decode(frame.payload) {
                                    Ok(message) => self.pending.push_back(ResponsePart::Message(message)),
                                    Err(status) => {
                                        self.pending.clear();
                                        self.pending.push_back(ResponsePart::Error(CallError::new(status)));
                                        break;
                                    }
                                }
                            }
                        }
                        Err(status) => {
                            self.pending.clear();
                            self.pending.push_back(ResponsePart::Error(CallError::new(status)));
                        }
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        self.byte_channel.close().await;
    }
}
