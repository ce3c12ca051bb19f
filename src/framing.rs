//! Length-prefixed message framing, the same scheme gRPC uses on top of
//! HTTP/2 DATA frames.
//!
//! Each message on the stream is preceded by a 5-byte header: one
//! compression-flag byte, then a 4-byte big-endian unsigned payload length.
//! This module only frames already-serialized bytes; turning a typed
//! message into bytes is the pluggable serializer's job, kept separate so
//! this module stays agnostic to any particular wire format.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::status::{Code, Status};

const HEADER_LEN: usize = 5;

/// Encodes one message as a length-prefixed record.
pub fn encode_frame(payload: &[u8], compressed: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(compressed as u8);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// One decoded frame: the payload bytes and whether the compression flag
/// was set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub compressed: bool,
    pub payload: Bytes,
}

/// Accumulates inbound bytes and yields complete frames, enforcing a
/// configurable maximum receive length: exceeding it yields
/// `RESOURCE_EXHAUSTED` rather than growing the buffer without bound.
///
/// Reader policy: accumulate bytes until the header is fully present, then
/// until the payload is fully present; emit the message; repeat.
pub struct FrameDecoder {
    buf: BytesMut,
    max_len: Option<usize>,
    pending_len: Option<(bool, usize)>,
}

impl FrameDecoder {
    pub fn new(max_len: Option<usize>) -> Self {
        FrameDecoder {
            buf: BytesMut::new(),
            max_len,
            pending_len: None,
        }
    }

    /// Feeds newly-arrived bytes into the decoder.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pulls out every frame that is fully buffered so far. Returns
    /// `Err(Status)` (RESOURCE_EXHAUSTED) and stops decoding as soon as a
    /// frame's declared length exceeds the cap.
    pub fn decode_all(&mut self) -> Result<Vec<Frame>, Status> {
        let mut frames = Vec::new();
        loop {
            if self.pending_len.is_none() {
                if self.buf.len() < HEADER_LEN {
                    break;
                }
                let compressed = self.buf[0] != 0;
                let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]])
                    as usize;
                if let Some(max) = self.max_len {
                    if len > max {
                        return Err(Status::resource_exhausted(format!(
                            "received message length {len} exceeds maximum of {max}"
                        )));
                    }
                }
                self.buf.advance(HEADER_LEN);
                self.pending_len = Some((compressed, len));
            }

            let (compressed, len) = self.pending_len.unwrap();
            if self.buf.len() < len {
                break;
            }
            let payload = self.buf.split_to(len).freeze();
            self.pending_len = None;
            frames.push(Frame { compressed, payload });
        }
        Ok(frames)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Formats a deadline as a `grpc-timeout` header value:
/// `<digits><unit>` where the magnitude is at most 8 digits and the unit is
/// one of `H M S m u n` (hours/minutes/seconds/milli/micro/nanoseconds).
/// Picks the finest-grained unit (most precision, least rounding) whose
/// magnitude still fits in 8 digits.
pub fn format_grpc_timeout(d: std::time::Duration) -> String {
    const UNITS: [(u64, &str); 6] = [
        (1, "n"),
        (1_000, "u"),
        (1_000_000, "m"),
        (1_000_000_000, "S"),
        (60_000_000_000, "M"),
        (3_600_000_000_000, "H"),
    ];
    let total_ns = d.as_nanos().min(u128::from(u64::MAX)) as u64;
    for (ns_per_unit, suffix) in UNITS {
        let magnitude = total_ns.div_ceil(ns_per_unit);
        if magnitude <= 99_999_999 {
            return format!("{magnitude}{suffix}");
        }
    }
    // Duration too large to represent even in hours within 8 digits; clamp.
    format!("{}H", 99_999_999)
}

/// Parses a `grpc-timeout` header value back into a `Duration`. Rejects a
/// magnitude with more than 8 digits.
pub fn parse_grpc_timeout(value: &str) -> Result<std::time::Duration, Status> {
    if value.is_empty() {
        return Err(Status::new(Code::Internal, "empty grpc-timeout header"));
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Status::new(
            Code::Internal,
            format!("malformed grpc-timeout value: {value:?}"),
        ));
    }
    let magnitude: u64 = digits
        .parse()
        .map_err(|_| Status::new(Code::Internal, format!("malformed grpc-timeout: {value:?}")))?;
    let ns_per_unit: u64 = match unit {
        "H" => 3_600_000_000_000,
        "M" => 60_000_000_000,
        "S" => 1_000_000_000,
        "m" => 1_000_000,
        "u" => 1_000,
        "n" => 1,
        other => {
            return Err(Status::new(
                Code::Internal,
                format!("unrecognized grpc-timeout unit: {other:?}"),
            ))
        }
    };
    Ok(std::time::Duration::from_nanos(magnitude.saturating_mul(ns_per_unit)))
}
