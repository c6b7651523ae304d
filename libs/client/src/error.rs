use std::time::Duration;

use thiserror::Error;
use vaultlink_wire::{Response, ServerError, StatusCode, WireError};

pub type VaultResult<T> = Result<T, VaultError>;

/// Local precondition violations. Raised before any network call and never
/// retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("no provisioning info available")]
    NoProvisioningInfo,

    #[error("no session credentials available")]
    NoCredentials,

    #[error("federated model requires a ticket source")]
    NoTicketSource,

    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("redirect did not carry an instance id")]
    MissingInstanceId,

    #[error("unknown service instance '{0}'")]
    UnknownInstance(String),

    #[error("invalid shell url: {0}")]
    InvalidShellUrl(String),
}

/// Failures inside the transport itself. Only 5xx responses and request
/// timeouts are retried by the transport's own bounded loop; everything else
/// surfaces immediately.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("send failed: {0}")]
    Send(#[source] reqwest::Error),

    #[error("cancelled")]
    Cancelled,
}

/// The error surface of the runtime. Callers dispatch on the variant: local
/// client errors, server-reported statuses, transport failures, malformed
/// responses, and cancellation.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("server status {status}{}", fmt_detail(.error))]
    Server {
        status: StatusCode,
        error: Option<ServerError>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("protocol: {0}")]
    Protocol(WireError),

    #[error("web authorization: {0}")]
    Authorization(#[source] anyhow::Error),

    #[error("state persistence: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("cancelled")]
    Cancelled,
}

impl VaultError {
    /// Server status carried by this error, if it is a server rejection.
    pub fn server_status(&self) -> Option<StatusCode> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<WireError> for VaultError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Malformed(message) => Self::MalformedResponse(message),
            other => Self::Protocol(other),
        }
    }
}

fn fmt_detail(error: &Option<ServerError>) -> String {
    match error {
        Some(detail) => format!(": {detail}"),
        None => String::new(),
    }
}

/// Turns an error-status response into [`VaultError::Server`], passing
/// successful responses through untouched.
pub(crate) fn require_ok(response: Response) -> VaultResult<Response> {
    if response.is_ok() {
        Ok(response)
    } else {
        Err(VaultError::Server {
            status: response.status,
            error: response.error,
        })
    }
}
