use std::fmt;

/// Status code carried in the `<status><code>` element of every response.
///
/// Code `0` is success. The named variants are the codes the runtime reacts
/// to; everything else is preserved verbatim in [`StatusCode::Other`] so a
/// caller can still inspect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Failed,
    BadHttp,
    InvalidXml,
    BadSignature,
    BadMethod,
    InvalidApp,
    CredentialTokenExpired,
    InvalidToken,
    InvalidPerson,
    InvalidRecord,
    AccessDenied,
    InvalidItem,
    InvalidFilter,
    TypeIdNotFound,
    CredentialNotFound,
    DuplicateCredentialFound,
    RequestTimedOut,
    VersionStampMismatch,
    SessionTokenExpired,
    Other(u32),
}

impl StatusCode {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Failed,
            2 => Self::BadHttp,
            3 => Self::InvalidXml,
            4 => Self::BadSignature,
            5 => Self::BadMethod,
            6 => Self::InvalidApp,
            7 => Self::CredentialTokenExpired,
            8 => Self::InvalidToken,
            9 => Self::InvalidPerson,
            10 => Self::InvalidRecord,
            11 => Self::AccessDenied,
            13 => Self::InvalidItem,
            14 => Self::InvalidFilter,
            18 => Self::TypeIdNotFound,
            19 => Self::CredentialNotFound,
            20 => Self::DuplicateCredentialFound,
            49 => Self::RequestTimedOut,
            61 => Self::VersionStampMismatch,
            65 => Self::SessionTokenExpired,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::Failed => 1,
            Self::BadHttp => 2,
            Self::InvalidXml => 3,
            Self::BadSignature => 4,
            Self::BadMethod => 5,
            Self::InvalidApp => 6,
            Self::CredentialTokenExpired => 7,
            Self::InvalidToken => 8,
            Self::InvalidPerson => 9,
            Self::InvalidRecord => 10,
            Self::AccessDenied => 11,
            Self::InvalidItem => 13,
            Self::InvalidFilter => 14,
            Self::TypeIdNotFound => 18,
            Self::CredentialNotFound => 19,
            Self::DuplicateCredentialFound => 20,
            Self::RequestTimedOut => 49,
            Self::VersionStampMismatch => 61,
            Self::SessionTokenExpired => 65,
            Self::Other(other) => *other,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// The session credential was rejected as expired; a refresh-and-retry is
    /// worthwhile.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionTokenExpired)
    }

    /// The federated online token was rejected; only meaningful under the
    /// online auth model.
    pub fn is_online_token_invalid(&self) -> bool {
        matches!(self, Self::CredentialTokenExpired)
    }

    /// Generic server-side failures worth one more identical attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Failed | Self::RequestTimedOut)
    }

    /// The service has no record of this app instance; provisioning must be
    /// redone from scratch.
    pub fn is_invalid_app(&self) -> bool {
        matches!(self, Self::InvalidApp)
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied)
    }

    /// True for any status the execute loop may retry (after the appropriate
    /// refresh); everything else is surfaced to the caller as-is.
    pub fn is_retryable(&self) -> bool {
        self.is_session_expired() || self.is_online_token_invalid() || self.is_transient()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "status {code}"),
            named => write!(f, "{named:?} ({})", named.code()),
        }
    }
}
