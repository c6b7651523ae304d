//! The provisioning state machine: registration, probing, the web flow, and
//! instance routing.

mod common;

use std::sync::Arc;

use common::*;
use vaultlink_client::testkit::{
    MockTransport, ScriptedAuthorizer, StaticTicketSource, provision_info_response,
    session_token_response, text_of, topology_response,
};
use vaultlink_client::{
    AuthModel, AuthOutcome, ClientError, ProvisioningOutcome, StatusCode, TicketPolicy,
    VaultClient, VaultError,
};

async fn interactive_client(
    transport: Arc<MockTransport>,
    authorizer: Arc<ScriptedAuthorizer>,
) -> VaultClient {
    VaultClient::builder(config())
        .transport(transport)
        .web_authorizer(authorizer)
        .build()
        .await
}

#[tokio::test]
async fn fresh_install_registers_and_probes() {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    transport.enqueue(provision_info_response(APP_INSTANCE, &app_secret(), "creation-tok"));
    transport.enqueue(session_token_response("tok", &fresh_session_secret()));

    let client = build_client(config(), transport.clone()).await;
    let outcome = client.ensure_provisioned().await.unwrap();

    assert_eq!(outcome, ProvisioningOutcome::Success);
    assert_eq!(
        transport.sent_methods(),
        vec!["NewApplicationCreationInfo", "CreateSessionToken"]
    );
    // Registration runs under the master app id; the probe under the minted
    // instance.
    let sent = transport.sent();
    assert!(sent[0].contains(&format!("<app-id>{MASTER_APP}</app-id>")));
    assert!(sent[1].contains(&format!("<app-id>{APP_INSTANCE}</app-id>")));

    assert!(client.is_provisioned().await);
    assert!(client.state().has_credentials().await);

    // A second run is a no-op.
    let outcome = client.ensure_provisioned().await.unwrap();
    assert_eq!(outcome, ProvisioningOutcome::Success);
    assert_eq!(transport.sent_count(), 2);
}

#[tokio::test]
async fn invalidated_instance_is_reregistered_once() {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    transport.enqueue_status(StatusCode::InvalidApp.code());
    let new_instance = uuid::Uuid::from_u128(0xeeee);
    transport.enqueue(provision_info_response(new_instance, &app_secret(), "tok2"));
    transport.enqueue(session_token_response("tok", &fresh_session_secret()));

    let client = build_client(config(), transport.clone()).await;
    seed_provisioning(&client).await;

    let outcome = client.ensure_provisioned().await.unwrap();
    assert_eq!(outcome, ProvisioningOutcome::Success);
    assert_eq!(
        transport.sent_methods(),
        vec![
            "CreateSessionToken",
            "NewApplicationCreationInfo",
            "CreateSessionToken"
        ]
    );

    let provisioning = client.state().provisioning().await.unwrap();
    assert_eq!(provisioning.app_instance_id, Some(new_instance));
}

#[tokio::test]
async fn a_second_invalidation_reports_failure() {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    transport.enqueue_status(StatusCode::InvalidApp.code());
    transport.enqueue(provision_info_response(APP_INSTANCE, &app_secret(), "t"));
    transport.enqueue_status(StatusCode::InvalidApp.code());

    let client = build_client(config(), transport.clone()).await;
    seed_provisioning(&client).await;

    let outcome = client.ensure_provisioned().await.unwrap();
    assert_eq!(outcome, ProvisioningOutcome::Failed);
    assert_eq!(transport.sent_count(), 3);
    assert!(!client.is_provisioned().await || !client.state().is_provisioning_confirmed().await);
}

#[tokio::test]
async fn unauthorized_instance_goes_through_the_shell_and_switches_instance() {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    transport.enqueue_status(StatusCode::AccessDenied.code());
    transport.enqueue(topology_response(&[(
        "eu",
        "https://eu.vault.test/rpc",
        "https://eu.shell.test/",
    )]));
    transport.enqueue(session_token_response("tok", &fresh_session_secret()));

    let authorizer = Arc::new(ScriptedAuthorizer::returning(AuthOutcome::success(
        "https://shell.test/auth/complete?target=AppAuthSuccess&instanceid=eu",
    )));
    let client = interactive_client(transport.clone(), authorizer.clone()).await;
    seed_provisioning(&client).await;

    let outcome = client.ensure_provisioned().await.unwrap();
    assert_eq!(outcome, ProvisioningOutcome::Success);
    assert_eq!(
        transport.sent_methods(),
        vec![
            "CreateSessionToken",
            "GetServiceDefinition",
            "CreateSessionToken"
        ]
    );

    // The browser was pointed at the sign-up page with the creation token.
    let starts = authorizer.starts();
    assert_eq!(starts.len(), 1);
    let start = starts[0].as_str();
    assert!(start.starts_with("https://shell.test/redirect?"));
    assert!(start.contains("target=CREATEAPPLICATION"));
    assert!(start.contains("creation-tok"));

    // Routing now points at the instance from the redirect.
    let info = client.service_info().await;
    assert_eq!(info.service_url.as_str(), "https://eu.vault.test/rpc");
    assert_eq!(info.shell_url.as_str(), "https://eu.shell.test/");
    assert!(client.state().is_provisioning_confirmed().await);
}

#[tokio::test]
async fn stale_topology_is_reloaded_once_for_an_unknown_instance() {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    // Pre-warm the topology cache without the instance we will need.
    transport.enqueue(topology_response(&[(
        "us",
        "https://us.vault.test/rpc",
        "https://us.shell.test/",
    )]));

    let authorizer = Arc::new(ScriptedAuthorizer::returning(AuthOutcome::success(
        "https://shell.test/auth/complete?instanceid=eu",
    )));
    let client = interactive_client(transport.clone(), authorizer).await;
    seed_provisioning(&client).await;
    client.service().get_service_definition().await.unwrap();

    transport.enqueue_status(StatusCode::AccessDenied.code());
    transport.enqueue(topology_response(&[
        ("us", "https://us.vault.test/rpc", "https://us.shell.test/"),
        ("eu", "https://eu.vault.test/rpc", "https://eu.shell.test/"),
    ]));
    transport.enqueue(session_token_response("tok", &fresh_session_secret()));

    let outcome = client.ensure_provisioned().await.unwrap();
    assert_eq!(outcome, ProvisioningOutcome::Success);

    let topology_fetches = transport
        .sent_methods()
        .iter()
        .filter(|m| *m == "GetServiceDefinition")
        .count();
    assert_eq!(topology_fetches, 2, "one pre-warm fetch plus one reload");
    assert_eq!(
        client.service_info().await.service_url.as_str(),
        "https://eu.vault.test/rpc"
    );
}

#[tokio::test]
async fn an_instance_missing_from_fresh_topology_is_an_error() {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    transport.enqueue_status(StatusCode::AccessDenied.code());
    transport.enqueue(topology_response(&[(
        "us",
        "https://us.vault.test/rpc",
        "https://us.shell.test/",
    )]));

    let authorizer = Arc::new(ScriptedAuthorizer::returning(AuthOutcome::success(
        "https://shell.test/auth/complete?instanceid=mars",
    )));
    let client = interactive_client(transport.clone(), authorizer).await;
    seed_provisioning(&client).await;

    let result = client.ensure_provisioned().await;
    assert!(matches!(
        result,
        Err(VaultError::Client(ClientError::UnknownInstance(ref id))) if id == "mars"
    ));
}

#[tokio::test]
async fn cancelled_web_flow_is_an_outcome_not_an_error() {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    transport.enqueue_status(StatusCode::AccessDenied.code());

    let authorizer = Arc::new(ScriptedAuthorizer::returning(AuthOutcome::cancelled()));
    let client = interactive_client(transport.clone(), authorizer).await;
    seed_provisioning(&client).await;

    let outcome = client.ensure_provisioned().await.unwrap();
    assert_eq!(outcome, ProvisioningOutcome::Cancelled);
    assert!(!client.state().is_provisioning_confirmed().await);
}

#[tokio::test]
async fn missing_account_credential_is_reported_as_such() {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    transport.enqueue_status(StatusCode::CredentialNotFound.code());

    let client = build_client(config(), transport.clone()).await;
    seed_provisioning(&client).await;

    let outcome = client.ensure_provisioned().await.unwrap();
    assert_eq!(outcome, ProvisioningOutcome::CredentialNotFound);
}

#[tokio::test]
async fn probe_without_an_authorizer_fails_cleanly() {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    transport.enqueue_status(StatusCode::AccessDenied.code());

    let client = build_client(config(), transport.clone()).await;
    seed_provisioning(&client).await;

    let outcome = client.ensure_provisioned().await.unwrap();
    assert_eq!(outcome, ProvisioningOutcome::Failed);
}

#[tokio::test]
async fn federated_registration_needs_no_web_flow() {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    transport.enqueue(provision_info_response(APP_INSTANCE, &app_secret(), ""));

    let tickets = Arc::new(StaticTicketSource::new("fed<ticket>"));
    let mut config = config();
    config.auth_model = AuthModel::Federated;
    let client = VaultClient::builder(config)
        .transport(transport.clone())
        .ticket_source(tickets.clone())
        .build()
        .await;

    let outcome = client.ensure_provisioned().await.unwrap();
    assert_eq!(outcome, ProvisioningOutcome::Success);
    assert_eq!(transport.sent_methods(), vec!["CreateApplication"]);
    assert_eq!(tickets.policies(), vec![TicketPolicy::Registration]);

    // The ticket travels XML-escaped in the registration body.
    let sent = transport.sent();
    assert_eq!(
        text_of(&sent[0], "identity-ticket").as_deref(),
        Some("fed&lt;ticket&gt;")
    );
    assert!(client.is_provisioned().await);
    assert!(client.state().is_provisioning_confirmed().await);
}
