//! The client runtime: session lifecycle, signing, and the bounded
//! retry-with-refresh loop every call goes through.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vaultlink_wire::{
    Cryptographer, DefaultCryptographer, EnvelopeBuilder, RecordReference, Request,
    RequestIdentity, Response, SessionExtra,
};

use crate::auth::{SharedTicketSource, SharedWebAuthorizer, TicketPolicy};
use crate::blob::{HttpBlobStreamer, SharedBlobStreamer};
use crate::config::{AuthModel, ClientConfig, TokenRefreshStrategy};
use crate::error::{ClientError, TransportError, VaultError, VaultResult};
use crate::provision::{self, ProvisioningOutcome};
use crate::record::RecordOps;
use crate::secrets::{MemorySecretStore, SharedSecretStore};
use crate::service::ServiceOps;
use crate::service_info::{ServiceDefinition, ServiceInfo, ServiceInfoCache, ServiceInstance};
use crate::state::SessionState;
use crate::transport::{HttpTransport, SharedTransport};

/// Client for one provisioned application instance.
///
/// All I/O funnels through [`VaultClient::execute`]; the typed operations on
/// [`ServiceOps`] and [`RecordOps`] are thin wrappers that build requests and
/// decode responses.
pub struct VaultClient {
    config: ClientConfig,
    state: SessionState,
    transport: SharedTransport,
    crypto: Arc<dyn Cryptographer>,
    envelope: EnvelopeBuilder,
    authorizer: Option<SharedWebAuthorizer>,
    ticket_source: Option<SharedTicketSource>,
    blob_streamer: SharedBlobStreamer,
    routing: RwLock<ServiceInfo>,
    routing_cache: Option<ServiceInfoCache>,
    topology: Mutex<Option<ServiceDefinition>>,
}

pub struct VaultClientBuilder {
    config: ClientConfig,
    store: Option<SharedSecretStore>,
    transport: Option<SharedTransport>,
    crypto: Option<Arc<dyn Cryptographer>>,
    authorizer: Option<SharedWebAuthorizer>,
    ticket_source: Option<SharedTicketSource>,
    blob_streamer: Option<SharedBlobStreamer>,
    routing_cache: Option<ServiceInfoCache>,
}

impl VaultClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            store: None,
            transport: None,
            crypto: None,
            authorizer: None,
            ticket_source: None,
            blob_streamer: None,
            routing_cache: None,
        }
    }

    pub fn secret_store(mut self, store: SharedSecretStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn cryptographer(mut self, crypto: Arc<dyn Cryptographer>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn web_authorizer(mut self, authorizer: SharedWebAuthorizer) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn ticket_source(mut self, source: SharedTicketSource) -> Self {
        self.ticket_source = Some(source);
        self
    }

    pub fn blob_streamer(mut self, streamer: SharedBlobStreamer) -> Self {
        self.blob_streamer = Some(streamer);
        self
    }

    pub fn service_info_cache(mut self, cache: ServiceInfoCache) -> Self {
        self.routing_cache = Some(cache);
        self
    }

    pub async fn build(self) -> VaultClient {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemorySecretStore::new()));
        let crypto = self
            .crypto
            .unwrap_or_else(|| Arc::new(DefaultCryptographer));

        let mut envelope = EnvelopeBuilder::new(crypto.clone());
        if let Some(culture) = &self.config.identity.culture_code {
            envelope = envelope.with_culture(culture.clone());
        }

        let routing = match &self.routing_cache {
            Some(cache) => cache.load().await,
            None => None,
        }
        .unwrap_or_else(|| ServiceInfo {
            service_url: self.config.service_url.clone(),
            shell_url: self.config.shell_url.clone(),
        });

        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(HttpTransport::with_client(
                reqwest::Client::new(),
                routing.service_url.clone(),
                self.config.request_timeout,
            ))
        });
        transport.set_service_url(routing.service_url.clone());

        let state = SessionState::load(store).await;

        VaultClient {
            config: self.config,
            state,
            transport,
            crypto,
            envelope,
            authorizer: self.authorizer,
            ticket_source: self.ticket_source,
            blob_streamer: self
                .blob_streamer
                .unwrap_or_else(|| Arc::new(HttpBlobStreamer::new())),
            routing: RwLock::new(routing),
            routing_cache: self.routing_cache,
            topology: Mutex::new(None),
        }
    }
}

impl VaultClient {
    pub fn builder(config: ClientConfig) -> VaultClientBuilder {
        VaultClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Service-scoped operations.
    pub fn service(&self) -> ServiceOps<'_> {
        ServiceOps::new(self, CancellationToken::new())
    }

    pub fn service_with_cancel(&self, cancel: CancellationToken) -> ServiceOps<'_> {
        ServiceOps::new(self, cancel)
    }

    /// Operations against one health record.
    pub fn record(&self, record: RecordReference) -> RecordOps<'_> {
        RecordOps::new(self, record, CancellationToken::new())
    }

    pub fn record_with_cancel(
        &self,
        record: RecordReference,
        cancel: CancellationToken,
    ) -> RecordOps<'_> {
        RecordOps::new(self, record, cancel)
    }

    /// The routing pair currently in effect.
    pub async fn service_info(&self) -> ServiceInfo {
        self.routing.read().await.clone()
    }

    pub async fn is_provisioned(&self) -> bool {
        self.state.has_provisioning_info().await
    }

    /// Runs the provisioning flow to completion. Safe to call on every
    /// startup; a confirmed installation short-circuits without network I/O.
    pub async fn ensure_provisioned(&self) -> VaultResult<ProvisioningOutcome> {
        self.ensure_provisioned_with_cancel(CancellationToken::new())
            .await
    }

    pub async fn ensure_provisioned_with_cancel(
        &self,
        cancel: CancellationToken,
    ) -> VaultResult<ProvisioningOutcome> {
        provision::ensure_provisioned(self, &cancel).await
    }

    /// Forgets this installation: provisioning identity, tokens, persisted
    /// state. The next call starts from scratch.
    pub async fn reset(&self) -> VaultResult<()> {
        info!("resetting client state");
        self.state.reset().await
    }

    pub async fn execute(&self, request: Request) -> VaultResult<Response> {
        self.execute_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Sends one logical request, driving the session lifecycle as needed.
    ///
    /// Each attempt re-renders and re-signs the envelope so a refreshed
    /// token is picked up. Retryable server statuses trigger the matching
    /// token refresh and another attempt, up to the configured bound; the
    /// final response is returned as-is either way, and callers decide what
    /// an error status means for them.
    pub async fn execute_with_cancel(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> VaultResult<Response> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            if cancel.is_cancelled() {
                return Err(VaultError::Cancelled);
            }

            if !request.anonymous {
                self.ensure_credentials(&cancel).await?;
                if self.config.auth_model == AuthModel::Federated && request.needs_online_token {
                    self.ensure_online_token(&cancel).await?;
                }
            }

            let response = self.sign_and_send(&request, &cancel).await?;
            if response.is_ok() {
                counter!("vaultlink_requests_total", "method" => request.method.clone(), "outcome" => "ok")
                    .increment(1);
                return Ok(response);
            }

            let status = response.status;
            if !status.is_retryable() || attempt >= max_attempts {
                counter!("vaultlink_requests_total", "method" => request.method.clone(), "outcome" => "server_error")
                    .increment(1);
                debug!(method = %request.method, %status, attempt, "request failed permanently");
                return Ok(response);
            }
            if request.anonymous && !status.is_transient() {
                // An anonymous call carries no tokens to refresh.
                counter!("vaultlink_requests_total", "method" => request.method.clone(), "outcome" => "server_error")
                    .increment(1);
                return Ok(response);
            }

            let matched_session = status.is_session_expired();
            let matched_online = status.is_online_token_invalid();
            let can_refresh_online =
                self.config.auth_model == AuthModel::Federated && self.ticket_source.is_some();
            let (mut refresh_session, mut refresh_online) = match self.config.refresh_strategy {
                TokenRefreshStrategy::Matching => (matched_session, matched_online),
                TokenRefreshStrategy::Both => {
                    let expired = matched_session || matched_online;
                    (expired, expired)
                }
            };
            if refresh_online && !can_refresh_online {
                refresh_online = false;
                if self.config.auth_model == AuthModel::Federated && !refresh_session {
                    // No way to mint a fresh online token, so the same
                    // status would come back on every retry.
                    counter!("vaultlink_requests_total", "method" => request.method.clone(), "outcome" => "server_error")
                        .increment(1);
                    return Ok(response);
                }
                // Interactive model: the session token is the only token in
                // play, whatever the server called it.
                refresh_session = true;
            }

            let trigger = if matched_session {
                "session_expired"
            } else if matched_online {
                "online_token"
            } else {
                "transient"
            };
            warn!(
                method = %request.method,
                %status,
                attempt,
                trigger,
                "request attempt failed; retrying"
            );
            counter!("vaultlink_request_retries_total", "method" => request.method.clone(), "trigger" => trigger)
                .increment(1);

            if refresh_session {
                self.refresh_session_token(&cancel).await?;
            }
            if refresh_online {
                self.refresh_online_token(&cancel).await?;
            }
            attempt += 1;
        }
    }

    async fn sign_and_send(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> VaultResult<Response> {
        let identity = self.request_identity(request).await?;
        let envelope = self.envelope.build(request, &identity)?;
        debug!(method = %request.method, bytes = envelope.len(), "sending request");

        let raw = self
            .transport
            .send(&envelope, cancel)
            .await
            .map_err(|err| match err {
                TransportError::Cancelled => VaultError::Cancelled,
                other => VaultError::Transport(other),
            })?;
        Ok(Response::parse(&raw)?)
    }

    async fn request_identity(&self, request: &Request) -> VaultResult<RequestIdentity> {
        if request.anonymous {
            let app_id = match request.app_id {
                Some(app_id) => app_id,
                None => self
                    .state
                    .provisioning()
                    .await
                    .and_then(|info| info.app_instance_id)
                    .unwrap_or(self.config.identity.master_app_id),
            };
            return Ok(RequestIdentity::app(app_id));
        }

        let credential = self
            .state
            .credential()
            .await
            .filter(|credential| credential.is_valid())
            .ok_or(ClientError::NoCredentials)?;

        let extra = match self.config.auth_model {
            AuthModel::Federated => match self.state.online_token().await {
                Some(token) if !token.is_empty() => SessionExtra::OnlineToken(token),
                _ => SessionExtra::None,
            },
            AuthModel::Interactive => match &request.record {
                Some(record) => SessionExtra::OfflinePerson(record.person_id),
                None => SessionExtra::None,
            },
        };

        Ok(RequestIdentity::Session {
            token: credential.token,
            shared_secret: credential.shared_secret,
            extra,
        })
    }

    async fn ensure_credentials(&self, cancel: &CancellationToken) -> VaultResult<()> {
        if self.state.has_credentials().await {
            return Ok(());
        }
        debug!("no session credentials; creating a session");
        self.refresh_session_token(cancel).await
    }

    async fn ensure_online_token(&self, cancel: &CancellationToken) -> VaultResult<()> {
        if self.state.online_token().await.is_some_and(|t| !t.is_empty()) {
            return Ok(());
        }
        self.refresh_online_token(cancel).await
    }

    /// Exchanges the provisioning identity for a fresh session credential
    /// and persists it.
    pub(crate) async fn refresh_session_token(&self, cancel: &CancellationToken) -> VaultResult<()> {
        // Box::pin: this re-enters `execute_with_cancel`, so the future must
        // be behind indirection to have a finite size.
        let credential = Box::pin(
            self.service_with_cancel(cancel.clone()).create_session_token(),
        )
        .await?;
        counter!("vaultlink_token_refreshes_total", "kind" => "session").increment(1);
        info!("session token refreshed");
        self.state.set_credential(Some(credential)).await
    }

    /// Mints a fresh online token from the federated ticket source and
    /// persists it.
    pub(crate) async fn refresh_online_token(&self, cancel: &CancellationToken) -> VaultResult<()> {
        let source = self
            .ticket_source
            .as_ref()
            .ok_or(ClientError::NoTicketSource)?;
        let ticket = source
            .acquire(TicketPolicy::Session)
            .await
            .map_err(VaultError::Authorization)?;
        let token = Box::pin(
            self.service_with_cancel(cancel.clone()).create_online_token(&ticket),
        )
        .await?;
        counter!("vaultlink_token_refreshes_total", "kind" => "online").increment(1);
        info!("online token refreshed");
        self.state.set_online_token(Some(token)).await
    }

    pub(crate) fn crypto(&self) -> &Arc<dyn Cryptographer> {
        &self.crypto
    }

    pub(crate) fn authorizer(&self) -> Option<&SharedWebAuthorizer> {
        self.authorizer.as_ref()
    }

    pub(crate) fn ticket_source(&self) -> Option<&SharedTicketSource> {
        self.ticket_source.as_ref()
    }

    pub(crate) fn blob_streamer(&self) -> &SharedBlobStreamer {
        &self.blob_streamer
    }

    /// Remembers the last topology fetch so instance lookups don't refetch.
    pub(crate) async fn cache_topology(&self, definition: ServiceDefinition) {
        *self.topology.lock().await = Some(definition);
    }

    /// Looks an instance up in the cached topology, reloading it once when
    /// the id is unknown. Ids minted during sign-up may postdate the cache.
    pub(crate) async fn resolve_instance(
        &self,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> VaultResult<ServiceInstance> {
        if let Some(definition) = self.topology.lock().await.clone() {
            if let Some(instance) = definition.find_instance(instance_id) {
                return Ok(instance.clone());
            }
            debug!(instance = instance_id, "instance not in cached topology; reloading");
        }

        let fresh = self
            .service_with_cancel(cancel.clone())
            .get_service_definition()
            .await?;
        fresh
            .find_instance(instance_id)
            .cloned()
            .ok_or_else(|| ClientError::UnknownInstance(instance_id.to_string()).into())
    }

    /// Repoints the client at another service instance and persists the
    /// choice for the next run.
    pub(crate) async fn switch_instance(&self, instance: &ServiceInstance) -> VaultResult<()> {
        let info = ServiceInfo {
            service_url: instance.service_url.clone(),
            shell_url: instance.shell_url.clone(),
        };
        self.transport.set_service_url(info.service_url.clone());
        *self.routing.write().await = info.clone();
        if let Some(cache) = &self.routing_cache {
            cache.save(&info).await?;
        }
        info!(instance = %instance.id, service_url = %info.service_url, "switched service instance");
        Ok(())
    }
}
