//! Authorization collaborators supplied by the host application.
//!
//! The runtime never owns a browser or an identity provider. Interactive
//! flows go through a [`WebAuthorizer`] the host implements on top of
//! whatever web view it has; federated flows pull identity tickets from a
//! [`TicketSource`].

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

/// Terminal state of an interactive web authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Success,
    Cancelled,
    Failed,
}

/// What came back from the browser flow.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub status: AuthStatus,
    /// Final redirect URL, present on success. Carries the service instance
    /// id chosen during sign-up.
    pub response_url: Option<String>,
}

impl AuthOutcome {
    pub fn success(response_url: impl Into<String>) -> Self {
        Self {
            status: AuthStatus::Success,
            response_url: Some(response_url.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: AuthStatus::Cancelled,
            response_url: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: AuthStatus::Failed,
            response_url: None,
        }
    }
}

/// Drives a browser (or embedded web view) through the shell authorization
/// pages. `start_url` is where to navigate; the flow is finished once the
/// browser lands on a URL under `completion_prefix`.
#[async_trait]
pub trait WebAuthorizer: Send + Sync {
    async fn authorize(
        &self,
        start_url: Url,
        completion_prefix: Url,
    ) -> anyhow::Result<AuthOutcome>;
}

pub type SharedWebAuthorizer = Arc<dyn WebAuthorizer>;

/// Why a ticket is being requested. Registration tickets create the app
/// instance; session tickets are exchanged for online tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketPolicy {
    Registration,
    Session,
}

/// An opaque identity ticket minted by the federated identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityTicket(pub String);

impl IdentityTicket {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Mints identity tickets for the federated auth model.
#[async_trait]
pub trait TicketSource: Send + Sync {
    async fn acquire(&self, policy: TicketPolicy) -> anyhow::Result<IdentityTicket>;
}

pub type SharedTicketSource = Arc<dyn TicketSource>;
