//! Wire protocol layer for the vaultlink record service.
//!
//! This crate owns everything that touches bytes on the wire but nothing that
//! touches the network: the signed request envelope, the response parser, the
//! status code catalog, and the cryptographic provider interface the envelope
//! builder signs with. The runtime layer (`vaultlink-client`) drives it.

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod status;

pub use crypto::{
    CIPHER_ALGORITHM, Cryptographer, DefaultCryptographer, EncryptedValue, HASH_ALGORITHM,
    HMAC_ALGORITHM, HashValue, HmacValue,
};
pub use envelope::{
    EnvelopeBuilder, MSG_TTL_SECONDS, RecordReference, Request, RequestIdentity, Response,
    ServerError, SessionExtra, session_bootstrap_body,
};
pub use error::WireError;
pub use status::StatusCode;
