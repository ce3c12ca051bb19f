//! The RPC outcome type.
//!
//! Every terminal outcome of a call — success, a server-declared failure,
//! a transport failure, a deadline expiry or a cancellation — is normalized
//! into a [`Status`]. We reuse `tonic`'s `Status`/`Code` rather than
//! reinventing the sixteen-member gRPC status enumeration: it already is
//! the type every other collaborator in this ecosystem (servers, other
//! client stacks) expects to see.

pub use tonic::{Code, Status};

/// Turns an arbitrary boxed error into a `Status` when no more specific
/// mapping applies: code `UNKNOWN`.
pub fn status_from_dyn_error(err: &(dyn std::error::Error + Send + Sync + 'static)) -> Status {
    Status::unknown(err.to_string())
}
