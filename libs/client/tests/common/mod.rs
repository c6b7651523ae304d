#![allow(dead_code)]

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use url::Url;
use uuid::Uuid;
use vaultlink_client::testkit::MockTransport;
use vaultlink_client::{
    AppIdentity, ClientConfig, ProvisioningInfo, SessionCredential, VaultClient,
};

pub const MASTER_APP: Uuid = Uuid::from_u128(0x1111_2222_3333_4444_5555_6666_7777_8888);
pub const APP_INSTANCE: Uuid = Uuid::from_u128(0xaaaa_bbbb_cccc_dddd_aaaa_bbbb_cccc_dddd);
pub const PERSON: Uuid = Uuid::from_u128(0x0101_0101_0101_0101_0101_0101_0101_0101);
pub const RECORD: Uuid = Uuid::from_u128(0x0202_0202_0202_0202_0202_0202_0202_0202);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn config() -> ClientConfig {
    ClientConfig::new(
        AppIdentity::new(MASTER_APP, "test app"),
        Url::parse("https://vault.test/rpc").unwrap(),
        Url::parse("https://shell.test/").unwrap(),
    )
}

pub fn app_secret() -> String {
    B64.encode([7u8; 32])
}

pub fn session_secret() -> String {
    B64.encode([9u8; 32])
}

pub fn fresh_session_secret() -> String {
    B64.encode([12u8; 32])
}

pub async fn build_client(config: ClientConfig, transport: Arc<MockTransport>) -> VaultClient {
    VaultClient::builder(config).transport(transport).build().await
}

/// Seeds valid provisioning info, as if registration already ran.
pub async fn seed_provisioning(client: &VaultClient) {
    client
        .state()
        .set_provisioning(Some(ProvisioningInfo {
            app_instance_id: Some(APP_INSTANCE),
            app_shared_secret: app_secret(),
            app_creation_token: "creation-tok".into(),
        }))
        .await
        .unwrap();
}

/// Seeds a live-looking session credential.
pub async fn seed_session(client: &VaultClient, token: &str) {
    client
        .state()
        .set_credential(Some(SessionCredential {
            token: token.into(),
            shared_secret: session_secret(),
        }))
        .await
        .unwrap();
}
