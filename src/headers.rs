//! Request header construction.
//!
//! Pseudo-headers (`:method`, `:scheme`, `:path`, `:authority`) belong to the
//! HTTP/2 stream collaborator and are not built here; this module produces
//! the regular header set that rides alongside them.

use tonic::metadata::MetadataMap;

use crate::call_options::CallOptions;
use crate::framing::format_grpc_timeout;

/// `user-agent` value stamped on every request, mirroring the convention of
/// naming both the library and its version.
pub const USER_AGENT: &str = concat!("rpc-call-core/", env!("CARGO_PKG_VERSION"));

/// Builds the non-pseudo request headers for one call.
///
/// `codec_name` is the wire codec identifier used in `content-type`
/// (`application/grpc+<codec>`), or `None` for the bare `application/grpc`.
/// `message_encoding` is the `grpc-encoding` value advertised when the
/// caller's messages are compressed by default.
pub fn build_request_headers(
    options: &CallOptions,
    codec_name: Option<&str>,
    message_encoding: Option<&str>,
) -> MetadataMap {
    let mut headers = MetadataMap::new();

    let content_type = match codec_name {
        Some(name) => format!("application/grpc+{name}"),
        None => "application/grpc".to_string(),
    };
    headers.insert("content-type", content_type.parse().unwrap());
    headers.insert("te", "trailers".parse().unwrap());
    headers.insert("user-agent", USER_AGENT.parse().unwrap());
    headers.insert("grpc-accept-encoding", "identity".parse().unwrap());

    if let Some(timeout) = options.timeout {
        headers.insert("grpc-timeout", format_grpc_timeout(timeout).parse().unwrap());
    }

    if options.compress_by_default {
        if let Some(encoding) = message_encoding {
            headers.insert("grpc-encoding", encoding.parse().unwrap());
        }
    }

    for key_and_value in options.custom_metadata.iter() {
        match key_and_value {
            tonic::metadata::KeyAndValueRef::Ascii(key, value) => {
                headers.append(key.clone(), value.clone());
            }
            tonic::metadata::KeyAndValueRef::Binary(key, value) => {
                headers.append_bin(key.clone(), value.clone());
            }
        }
    }

    headers
}
