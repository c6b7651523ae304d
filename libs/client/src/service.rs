//! Service-scoped operations: registration, tokens, topology, people.

use quick_xml::escape::escape;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;
use vaultlink_wire::{RecordReference, Request, session_bootstrap_body};

use crate::auth::IdentityTicket;
use crate::client::VaultClient;
use crate::error::{ClientError, VaultError, VaultResult, require_ok};
use crate::service_info::{ServiceDefinition, ServiceInstance};
use crate::state::SessionCredential;

const METHOD_NEW_APPLICATION_CREATION_INFO: &str = "NewApplicationCreationInfo";
const METHOD_CREATE_APPLICATION: &str = "CreateApplication";
const METHOD_CREATE_SESSION_TOKEN: &str = "CreateSessionToken";
const METHOD_CREATE_ONLINE_TOKEN: &str = "CreateOnlineToken";
const METHOD_GET_SERVICE_DEFINITION: &str = "GetServiceDefinition";

/// A freshly registered application instance, as returned by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppProvisionInfo {
    pub app_instance_id: Uuid,
    pub app_shared_secret: String,
    /// Present only for interactive registrations; the shell consumes it
    /// during sign-up.
    pub app_creation_token: String,
}

/// A person the app is authorized for, with their accessible records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonInfo {
    pub person_id: Uuid,
    pub name: String,
    pub records: Vec<AuthorizedRecord>,
}

impl PersonInfo {
    /// Record references for every record this person exposes.
    pub fn references(&self) -> impl Iterator<Item = RecordReference> + '_ {
        self.records
            .iter()
            .map(|record| RecordReference::new(self.person_id, record.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedRecord {
    pub id: Uuid,
    pub name: String,
}

/// Operations that target the service itself rather than a record.
pub struct ServiceOps<'a> {
    client: &'a VaultClient,
    cancel: CancellationToken,
}

impl<'a> ServiceOps<'a> {
    pub(crate) fn new(client: &'a VaultClient, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }

    /// Registers a new application instance under the master app id and
    /// returns its identity. Interactive model only; the creation token in
    /// the result feeds the shell sign-up page.
    pub async fn new_application_creation_info(&self) -> VaultResult<AppProvisionInfo> {
        let request = Request::anonymous(METHOD_NEW_APPLICATION_CREATION_INFO, 1)
            .with_app_id(self.client.config().identity.master_app_id);
        let response = require_ok(
            self.client
                .execute_with_cancel(request, self.cancel.clone())
                .await?,
        )?;

        let raw: RawProvisionInfo = response.decode()?;
        Ok(AppProvisionInfo {
            app_instance_id: raw.app_id,
            app_shared_secret: raw.shared_secret,
            app_creation_token: raw.app_token,
        })
    }

    /// Registers a new application instance against a federated identity
    /// ticket. The instance comes back already authorized; no shell trip.
    pub async fn create_application(&self, ticket: &IdentityTicket) -> VaultResult<AppProvisionInfo> {
        let identity = &self.client.config().identity;
        let body = format!(
            "<identity-ticket>{}</identity-ticket><instance-name>{}</instance-name>",
            escape(ticket.as_str()),
            escape(&identity.instance_name),
        );
        let request = Request::anonymous(METHOD_CREATE_APPLICATION, 1)
            .with_app_id(identity.master_app_id)
            .with_body(body);
        let response = require_ok(
            self.client
                .execute_with_cancel(request, self.cancel.clone())
                .await?,
        )?;

        let raw: RawProvisionInfo = response.decode()?;
        Ok(AppProvisionInfo {
            app_instance_id: raw.app_id,
            app_shared_secret: raw.shared_secret,
            app_creation_token: raw.app_token,
        })
    }

    /// Exchanges the provisioning identity for a session credential. This is
    /// the bootstrap call: anonymous at the envelope level, authenticated by
    /// the signed payload inside.
    pub async fn create_session_token(&self) -> VaultResult<SessionCredential> {
        let provisioning = self
            .client
            .state()
            .provisioning()
            .await
            .filter(|info| info.is_valid())
            .ok_or(ClientError::NoProvisioningInfo)?;
        let app_instance_id = provisioning
            .app_instance_id
            .ok_or(ClientError::NoProvisioningInfo)?;

        let body = session_bootstrap_body(
            self.client.crypto().as_ref(),
            app_instance_id,
            &provisioning.app_shared_secret,
            OffsetDateTime::now_utc(),
        )?;
        let request = Request::anonymous(METHOD_CREATE_SESSION_TOKEN, 2)
            .with_app_id(app_instance_id)
            .without_body_hash()
            .with_body(body);
        let response = require_ok(
            self.client
                .execute_with_cancel(request, self.cancel.clone())
                .await?,
        )?;

        let raw: RawSessionCredential = response.decode()?;
        Ok(SessionCredential {
            token: raw.token,
            shared_secret: raw.shared_secret,
        })
    }

    /// Exchanges a federated identity ticket for an online token.
    pub async fn create_online_token(&self, ticket: &IdentityTicket) -> VaultResult<String> {
        let provisioning = self
            .client
            .state()
            .provisioning()
            .await
            .filter(|info| info.is_valid())
            .ok_or(ClientError::NoProvisioningInfo)?;
        let app_instance_id = provisioning
            .app_instance_id
            .ok_or(ClientError::NoProvisioningInfo)?;

        let body = format!(
            "<identity-ticket>{}</identity-ticket>",
            escape(ticket.as_str())
        );
        let request = Request::anonymous(METHOD_CREATE_ONLINE_TOKEN, 1)
            .with_app_id(app_instance_id)
            .with_body(body);
        let response = require_ok(
            self.client
                .execute_with_cancel(request, self.cancel.clone())
                .await?,
        )?;

        let raw: RawOnlineToken = response.decode()?;
        Ok(raw.token)
    }

    /// Fetches the published topology. The result is also remembered for
    /// instance lookups during provisioning.
    pub async fn get_service_definition(&self) -> VaultResult<ServiceDefinition> {
        let request = Request::anonymous(METHOD_GET_SERVICE_DEFINITION, 2)
            .with_body("<response-sections><section>topology</section></response-sections>");
        let response = require_ok(
            self.client
                .execute_with_cancel(request, self.cancel.clone())
                .await?,
        )?;

        let raw: RawServiceDefinition = response.decode()?;
        let mut instances = Vec::with_capacity(raw.instances.instances.len());
        for instance in raw.instances.instances {
            instances.push(ServiceInstance {
                service_url: parse_instance_url(&instance.id, &instance.service_url)?,
                shell_url: parse_instance_url(&instance.id, &instance.shell_url)?,
                id: instance.id,
                name: instance.name,
            });
        }
        let definition = ServiceDefinition { instances };
        self.client.cache_topology(definition.clone()).await;
        Ok(definition)
    }

    /// Lists every person (and their records) this app instance may act for.
    pub async fn get_authorized_people(&self) -> VaultResult<Vec<PersonInfo>> {
        let request = Request::new("GetAuthorizedPeople", 1)
            .with_body("<parameters/>")
            .needing_online_token();
        let response = require_ok(
            self.client
                .execute_with_cancel(request, self.cancel.clone())
                .await?,
        )?;

        let raw: RawPeopleResponse = response.decode()?;
        Ok(raw.results.people.into_iter().map(PersonInfo::from).collect())
    }

    /// The person behind the current session.
    pub async fn get_person_info(&self) -> VaultResult<PersonInfo> {
        let request = Request::new("GetPersonInfo", 1).needing_online_token();
        let response = require_ok(
            self.client
                .execute_with_cancel(request, self.cancel.clone())
                .await?,
        )?;

        let raw: RawPersonResponse = response.decode()?;
        Ok(PersonInfo::from(raw.person))
    }
}

fn parse_instance_url(instance_id: &str, raw: &str) -> VaultResult<Url> {
    Url::parse(raw).map_err(|err| {
        VaultError::MalformedResponse(format!("instance '{instance_id}' url '{raw}': {err}"))
    })
}

#[derive(Debug, Deserialize)]
struct RawProvisionInfo {
    #[serde(rename = "app-id")]
    app_id: Uuid,
    #[serde(rename = "shared-secret")]
    shared_secret: String,
    #[serde(rename = "app-token", default)]
    app_token: String,
}

#[derive(Debug, Deserialize)]
struct RawSessionCredential {
    token: String,
    #[serde(rename = "shared-secret")]
    shared_secret: String,
}

#[derive(Debug, Deserialize)]
struct RawOnlineToken {
    #[serde(rename = "user-auth-token")]
    token: String,
}

#[derive(Debug, Deserialize)]
struct RawServiceDefinition {
    #[serde(default)]
    instances: RawInstanceList,
}

#[derive(Debug, Default, Deserialize)]
struct RawInstanceList {
    #[serde(rename = "instance", default)]
    instances: Vec<RawInstance>,
}

#[derive(Debug, Deserialize)]
struct RawInstance {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "service-url")]
    service_url: String,
    #[serde(rename = "shell-url")]
    shell_url: String,
}

#[derive(Debug, Deserialize)]
struct RawPeopleResponse {
    #[serde(rename = "response-results", default)]
    results: RawPeopleResults,
}

#[derive(Debug, Default, Deserialize)]
struct RawPeopleResults {
    #[serde(rename = "person-info", default)]
    people: Vec<RawPersonInfo>,
}

#[derive(Debug, Deserialize)]
struct RawPersonResponse {
    #[serde(rename = "person-info")]
    person: RawPersonInfo,
}

#[derive(Debug, Deserialize)]
struct RawPersonInfo {
    #[serde(rename = "person-id")]
    person_id: Uuid,
    #[serde(default)]
    name: String,
    #[serde(rename = "record", default)]
    records: Vec<RawRecord>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "@id")]
    id: Uuid,
    #[serde(rename = "$text", default)]
    name: String,
}

impl From<RawPersonInfo> for PersonInfo {
    fn from(raw: RawPersonInfo) -> Self {
        Self {
            person_id: raw.person_id,
            name: raw.name,
            records: raw
                .records
                .into_iter()
                .map(|record| AuthorizedRecord {
                    id: record.id,
                    name: record.name,
                })
                .collect(),
        }
    }
}
