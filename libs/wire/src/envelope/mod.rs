//! The signed request envelope and its response counterpart.
//!
//! Requests are serialized manually through quick-xml events so the bytes the
//! HMAC covers are exactly the bytes placed in the envelope. Responses are
//! parsed status-first; the body is kept as a raw fragment and decoded into
//! typed values on demand.

mod request;
mod response;

pub use request::{
    EnvelopeBuilder, RecordReference, Request, RequestIdentity, SessionExtra,
    session_bootstrap_body,
};
pub use response::{Response, ServerError};

/// Freshness window the server grants a request, in seconds.
pub const MSG_TTL_SECONDS: u64 = 1800;
