//! Exercises the length-prefixed framing codec and `max_receive_message_length`
//! through a real `Call`, using `FramedChannel` — the concrete `RpcChannel`
//! this crate provides on top of its own message framing — rather than a
//! channel that hands back already-typed parts directly.

use std::sync::Arc;

use bytes::Bytes;
use rpc_call_core::framing::encode_frame;
use rpc_call_core::{
    ByteChannel, ByteEvent, Call, CallOptions, CallType, ChannelFactory, Code, FramedChannel,
    MessageCodec, Status,
};
use tokio::sync::mpsc;
use tonic::metadata::MetadataMap;

struct StringCodec;

impl MessageCodec<String, String> for StringCodec {
    fn encode(&self, message: &String) -> Result<Vec<u8>, Status> {
        Ok(message.clone().into_bytes())
    }
    fn decode(&self, payload: Bytes) -> Result<String, Status> {
        String::from_utf8(payload.to_vec()).map_err(|e| Status::internal(e.to_string()))
    }
}

struct ScriptedByteChannel {
    inbound: mpsc::UnboundedReceiver<ByteEvent>,
    _keep_alive: mpsc::UnboundedSender<ByteEvent>,
}

#[async_trait::async_trait]
impl ByteChannel for ScriptedByteChannel {
    async fn write_metadata(&mut self, _metadata: MetadataMap) -> Result<(), Status> {
        Ok(())
    }
    async fn write_message(&mut self, _framed: Bytes) -> Result<(), Status> {
        Ok(())
    }
    async fn write_end(&mut self) -> Result<(), Status> {
        Ok(())
    }
    async fn flush(&mut self) -> Result<(), Status> {
        Ok(())
    }
    async fn read(&mut self) -> Option<ByteEvent> {
        self.inbound.recv().await
    }
    async fn close(&mut self) {}
}

fn byte_factory(script: Vec<ByteEvent>) -> ChannelFactory<String, String> {
    Arc::new(move |_path: &str, cap: Option<usize>| {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in script.clone() {
            let _ = tx.send(event);
        }
        Box::pin(async move {
            let byte_channel = ScriptedByteChannel { inbound: rx, _keep_alive: tx };
            let framed = FramedChannel::new(byte_channel, StringCodec, cap);
            Ok(Box::new(framed) as Box<dyn rpc_call_core::RpcChannel<String, String>>)
        })
    })
}

#[tokio::test]
async fn oversized_inbound_message_yields_resource_exhausted() {
    let oversized = encode_frame(&vec![0u8; 64], false);
    let script = vec![ByteEvent::Metadata(MetadataMap::new()), ByteEvent::Data(oversized)];
    let mut options = CallOptions::default();
    options.max_receive_message_length = Some(16);
    let call = Call::new("/echo.Echo/Get", CallType::Unary, options, byte_factory(script));

    let handles = call.invoke_unary_request("hi".to_string(), None).unwrap();
    let status = handles.status.await.unwrap().unwrap();
    assert_eq!(status.code(), Code::ResourceExhausted);
}

#[tokio::test]
async fn a_response_within_the_cap_round_trips_through_real_framing() {
    let script = vec![
        ByteEvent::Metadata(MetadataMap::new()),
        ByteEvent::Data(encode_frame(b"pong", false)),
        ByteEvent::End(Status::ok(""), MetadataMap::new()),
    ];
    let mut options = CallOptions::default();
    options.max_receive_message_length = Some(1024);
    let call = Call::new("/echo.Echo/Get", CallType::Unary, options, byte_factory(script));

    let handles = call.invoke_unary_request("ping".to_string(), None).unwrap();
    assert_eq!(handles.response.unwrap().await.unwrap().unwrap(), "pong");
    assert_eq!(handles.status.await.unwrap().unwrap().code(), Code::Ok);
}
