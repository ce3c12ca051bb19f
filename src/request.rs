//! Request parts flowing from the user through the pipeline to the
//! transport.

use tonic::metadata::MetadataMap;

/// Per-message delivery hints: whether to ask the wire codec to compress
/// this message, and whether to flush the underlying stream once it is
/// written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageContext {
    pub compress: bool,
    pub flush: bool,
}

/// One unit of the outbound request stream.
///
/// Ordering invariant: exactly one `Metadata` first, then zero or more
/// `Message`, then exactly one `End`.
#[derive(Debug)]
pub enum RequestPart<Req> {
    Metadata(MetadataMap),
    Message(Req, MessageContext),
    End,
}

impl<Req> RequestPart<Req> {
    pub fn is_end(&self) -> bool {
        matches!(self, RequestPart::End)
    }
}
