use thiserror::Error;

/// Failures raised by the protocol layer itself.
///
/// Server-reported statuses are not errors at this layer; they travel inside
/// [`crate::envelope::Response`] and are classified by the caller.
#[derive(Debug, Error)]
pub enum WireError {
    /// The response body could not be parsed into the expected envelope shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// A request was assembled with inconsistent inputs.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Key material was not valid base64 or had an unusable length.
    #[error("bad key material: {0}")]
    KeyMaterial(String),

    /// A primitive failed (bad padding on decrypt, non-UTF-8 plaintext).
    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error("timestamp format: {0}")]
    Timestamp(#[from] time::error::Format),

    #[error("xml write: {0}")]
    Write(#[from] std::io::Error),
}
