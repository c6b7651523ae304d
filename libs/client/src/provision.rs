//! The provisioning flow: take an installation from nothing to a confirmed,
//! authorized application instance.
//!
//! The flow is a loop because the server can invalidate an instance behind
//! our back; in that case the stored identity is discarded and registration
//! runs once more. A second invalidation in the same run reports failure
//! rather than looping.

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vaultlink_wire::StatusCode;

use crate::auth::{AuthStatus, TicketPolicy};
use crate::client::VaultClient;
use crate::config::AuthModel;
use crate::error::{ClientError, VaultError, VaultResult};
use crate::shell::{Shell, parse_instance_id};
use crate::state::ProvisioningInfo;

/// How a provisioning run ended. Only `Success` leaves the client ready for
/// record calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    Success,
    /// The user backed out of the web flow.
    Cancelled,
    /// The flow ran but the server would not authorize this instance.
    Failed,
    /// The server has no credential for the account behind the session.
    CredentialNotFound,
}

enum Probe {
    Authorized,
    InvalidApp,
    CredentialNotFound,
    NeedsAuthorization,
}

pub(crate) async fn ensure_provisioned(
    client: &VaultClient,
    cancel: &CancellationToken,
) -> VaultResult<ProvisioningOutcome> {
    let state = client.state();
    if state.is_provisioning_confirmed().await && state.has_provisioning_info().await {
        return Ok(ProvisioningOutcome::Success);
    }

    let mut reregistered = false;
    loop {
        if cancel.is_cancelled() {
            return Err(VaultError::Cancelled);
        }

        if !state.has_provisioning_info().await {
            register(client, cancel).await?;
        }

        if client.config().auth_model == AuthModel::Federated {
            // Federated instances are born authorized; there is no web flow
            // to confirm.
            state.mark_provisioning_confirmed().await;
            counter!("vaultlink_provisioning_total", "outcome" => "success").increment(1);
            return Ok(ProvisioningOutcome::Success);
        }

        match probe(client, cancel).await? {
            Probe::Authorized => {
                state.mark_provisioning_confirmed().await;
                counter!("vaultlink_provisioning_total", "outcome" => "success").increment(1);
                info!("application instance confirmed");
                return Ok(ProvisioningOutcome::Success);
            }
            Probe::InvalidApp => {
                if reregistered {
                    warn!("re-registered instance was rejected again; giving up");
                    counter!("vaultlink_provisioning_total", "outcome" => "failed").increment(1);
                    return Ok(ProvisioningOutcome::Failed);
                }
                warn!("server no longer knows this instance; re-registering");
                reregistered = true;
                state.clear_provisioning().await?;
            }
            Probe::CredentialNotFound => {
                counter!("vaultlink_provisioning_total", "outcome" => "credential_not_found")
                    .increment(1);
                return Ok(ProvisioningOutcome::CredentialNotFound);
            }
            Probe::NeedsAuthorization => {
                let outcome = authorize_interactively(client, cancel).await?;
                counter!("vaultlink_provisioning_total", "outcome" => outcome_label(outcome))
                    .increment(1);
                return Ok(outcome);
            }
        }
    }
}

/// Registers a new application instance, per the configured auth model, and
/// persists its identity.
async fn register(client: &VaultClient, cancel: &CancellationToken) -> VaultResult<()> {
    let ops = client.service_with_cancel(cancel.clone());
    let info = match client.config().auth_model {
        AuthModel::Interactive => ops.new_application_creation_info().await?,
        AuthModel::Federated => {
            let source = client.ticket_source().ok_or(ClientError::NoTicketSource)?;
            let ticket = source
                .acquire(TicketPolicy::Registration)
                .await
                .map_err(VaultError::Authorization)?;
            ops.create_application(&ticket).await?
        }
    };
    info!(app_instance = %info.app_instance_id, "registered application instance");

    client
        .state()
        .set_provisioning(Some(ProvisioningInfo {
            app_instance_id: Some(info.app_instance_id),
            app_shared_secret: info.app_shared_secret,
            app_creation_token: info.app_creation_token,
        }))
        .await
}

/// Asks the server whether this instance can open a session yet. A working
/// session doubles as the first credential, so a successful probe leaves the
/// client fully ready.
async fn probe(client: &VaultClient, cancel: &CancellationToken) -> VaultResult<Probe> {
    match client
        .service_with_cancel(cancel.clone())
        .create_session_token()
        .await
    {
        Ok(credential) => {
            client.state().set_credential(Some(credential)).await?;
            Ok(Probe::Authorized)
        }
        Err(VaultError::Server { status, .. }) if status.is_invalid_app() => Ok(Probe::InvalidApp),
        Err(VaultError::Server { status, .. }) if status == StatusCode::CredentialNotFound => {
            Ok(Probe::CredentialNotFound)
        }
        Err(VaultError::Server { status, .. }) => {
            debug!(%status, "session probe rejected; authorization required");
            Ok(Probe::NeedsAuthorization)
        }
        Err(other) => Err(other),
    }
}

/// Sends the user through the shell sign-up flow, then routes to the service
/// instance the account landed on and probes once more.
async fn authorize_interactively(
    client: &VaultClient,
    cancel: &CancellationToken,
) -> VaultResult<ProvisioningOutcome> {
    let Some(authorizer) = client.authorizer() else {
        warn!("instance needs authorization but no web authorizer is configured");
        return Ok(ProvisioningOutcome::Failed);
    };
    let provisioning = client
        .state()
        .provisioning()
        .await
        .ok_or(ClientError::NoProvisioningInfo)?;

    let shell = Shell::new(&client.service_info().await.shell_url)?;
    let start_url = shell.provision_url(&client.config().identity, &provisioning.app_creation_token)?;
    let completion_prefix = shell.completion_url()?;

    debug!(%start_url, "starting interactive authorization");
    let outcome = tokio::select! {
        _ = cancel.cancelled() => return Err(VaultError::Cancelled),
        result = authorizer.authorize(start_url, completion_prefix) => {
            result.map_err(VaultError::Authorization)?
        }
    };

    match outcome.status {
        AuthStatus::Cancelled => {
            info!("user cancelled authorization");
            return Ok(ProvisioningOutcome::Cancelled);
        }
        AuthStatus::Failed => {
            warn!("web authorization failed");
            return Ok(ProvisioningOutcome::Failed);
        }
        AuthStatus::Success => {}
    }

    let response_url = outcome
        .response_url
        .ok_or(ClientError::MissingInstanceId)?;
    let instance_id = parse_instance_id(&response_url)?;
    let instance = client.resolve_instance(&instance_id, cancel).await?;
    client.switch_instance(&instance).await?;

    match probe(client, cancel).await? {
        Probe::Authorized => {
            client.state().mark_provisioning_confirmed().await;
            info!("application instance confirmed after authorization");
            Ok(ProvisioningOutcome::Success)
        }
        Probe::CredentialNotFound => Ok(ProvisioningOutcome::CredentialNotFound),
        Probe::InvalidApp | Probe::NeedsAuthorization => {
            warn!("instance still unauthorized after the web flow");
            Ok(ProvisioningOutcome::Failed)
        }
    }
}

fn outcome_label(outcome: ProvisioningOutcome) -> &'static str {
    match outcome {
        ProvisioningOutcome::Success => "success",
        ProvisioningOutcome::Cancelled => "cancelled",
        ProvisioningOutcome::Failed => "failed",
        ProvisioningOutcome::CredentialNotFound => "credential_not_found",
    }
}
