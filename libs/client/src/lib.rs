//! Client runtime for a personal health-record vault service.
//!
//! [`VaultClient`] owns the session lifecycle: it provisions the application
//! instance, opens and refreshes session tokens, signs every request, and
//! retries the calls the server says are worth retrying. Typed operations
//! hang off [`VaultClient::service`] and [`VaultClient::record`]; everything
//! they send goes through the same bounded execute loop.
//!
//! Hosts plug in the pieces the runtime cannot own: a [`SecretStore`] for
//! persisted state, a [`WebAuthorizer`] for the interactive sign-up flow,
//! and a [`TicketSource`] when running the federated auth model.

pub mod auth;
pub mod blob;
pub mod client;
pub mod config;
pub mod error;
pub mod items;
pub mod provision;
pub mod record;
pub mod secrets;
pub mod service;
pub mod service_info;
pub mod shell;
pub mod state;
pub mod testkit;
pub mod transport;

pub use vaultlink_wire as wire;

pub use auth::{
    AuthOutcome, AuthStatus, IdentityTicket, SharedTicketSource, SharedWebAuthorizer,
    TicketPolicy, TicketSource, WebAuthorizer,
};
pub use blob::{BlobPutTicket, BlobStreamer, HttpBlobStreamer, SharedBlobStreamer};
pub use client::{VaultClient, VaultClientBuilder};
pub use config::{AppIdentity, AuthModel, ClientConfig, TokenRefreshStrategy};
pub use error::{ClientError, TransportError, VaultError, VaultResult};
pub use items::{ItemKey, ItemPayload, ItemQuery, ItemQueryResult, TypePermission};
pub use provision::ProvisioningOutcome;
pub use record::RecordOps;
pub use secrets::{FileSecretStore, MemorySecretStore, SecretStore, SharedSecretStore};
pub use service::{AppProvisionInfo, AuthorizedRecord, PersonInfo, ServiceOps};
pub use service_info::{ServiceDefinition, ServiceInfo, ServiceInfoCache, ServiceInstance};
pub use shell::{Shell, parse_instance_id};
pub use state::{ClientState, ProvisioningInfo, SessionCredential, SessionState};
pub use transport::{HttpTransport, SharedTransport, Transport};
pub use vaultlink_wire::{RecordReference, Request, Response, StatusCode};
