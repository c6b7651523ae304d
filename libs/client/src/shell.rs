//! URL plumbing for the service's web front end (the "shell").
//!
//! Every interactive flow is one page: `redirect?target=...&targetqs=...`,
//! where `targetqs` is a nested query string the shell unwraps on its side.
//! The flow ends on a page under `auth/complete`, whose URL carries the
//! service instance the account landed on.

use url::Url;
use uuid::Uuid;

use crate::config::AppIdentity;
use crate::error::ClientError;

pub const PROVISION_TARGET: &str = "CREATEAPPLICATION";
pub const RECORD_AUTH_TARGET: &str = "APPAUTH";

const REDIRECT_PAGE: &str = "redirect";
const COMPLETION_PAGE: &str = "auth/complete";
const INSTANCE_ID_PARAM: &str = "instanceid";

/// Builds shell URLs against one base.
pub struct Shell {
    base: Url,
}

impl Shell {
    pub fn new(shell_url: &Url) -> Result<Self, ClientError> {
        if shell_url.cannot_be_a_base() {
            return Err(ClientError::InvalidShellUrl(shell_url.to_string()));
        }
        let mut base = shell_url.clone();
        // Url::join replaces the last segment unless the base ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    /// Entry point for interactive sign-up of a freshly registered instance.
    pub fn provision_url(
        &self,
        identity: &AppIdentity,
        creation_token: &str,
    ) -> Result<Url, ClientError> {
        let mut qs = format!(
            "appid={}&appCreationToken={}&instanceName={}&ismra=true",
            identity.master_app_id,
            urlencoding::encode(creation_token),
            urlencoding::encode(&identity.instance_name),
        );
        if identity.multi_record {
            qs.push_str("&aib=true");
        }
        self.target_url(PROVISION_TARGET, &qs)
    }

    /// Entry point for authorizing additional records against an existing
    /// instance.
    pub fn record_auth_url(&self, app_instance_id: Uuid) -> Result<Url, ClientError> {
        let qs = format!("appid={app_instance_id}&ismra=true");
        self.target_url(RECORD_AUTH_TARGET, &qs)
    }

    /// Prefix of the page every flow finishes on.
    pub fn completion_url(&self) -> Result<Url, ClientError> {
        self.base
            .join(COMPLETION_PAGE)
            .map_err(|err| ClientError::InvalidShellUrl(err.to_string()))
    }

    fn target_url(&self, target: &str, target_qs: &str) -> Result<Url, ClientError> {
        let mut url = self
            .base
            .join(REDIRECT_PAGE)
            .map_err(|err| ClientError::InvalidShellUrl(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("target", target)
            .append_pair("targetqs", target_qs);
        Ok(url)
    }
}

/// Pulls the service instance id out of a completion redirect.
pub fn parse_instance_id(response_url: &str) -> Result<String, ClientError> {
    let url = Url::parse(response_url).map_err(|_| ClientError::MissingInstanceId)?;
    url.query_pairs()
        .find(|(key, _)| key.eq_ignore_ascii_case(INSTANCE_ID_PARAM))
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
        .ok_or(ClientError::MissingInstanceId)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> AppIdentity {
        AppIdentity::new(
            Uuid::parse_str("11111111-2222-3333-4444-555555555555").unwrap(),
            "My App & Co",
        )
    }

    #[test]
    fn provision_url_nests_the_query_string() {
        let shell = Shell::new(&Url::parse("https://shell.example/apps").unwrap()).unwrap();
        let url = shell.provision_url(&identity(), "tok+en").unwrap();

        assert!(url.as_str().starts_with("https://shell.example/apps/redirect?"));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs[0].0, "target");
        assert_eq!(pairs[0].1, "CREATEAPPLICATION");
        assert_eq!(pairs[1].0, "targetqs");
        // The inner query string survives one level of decoding intact.
        assert!(pairs[1].1.contains("appid=11111111-2222-3333-4444-555555555555"));
        assert!(pairs[1].1.contains("appCreationToken=tok%2Ben"));
        assert!(pairs[1].1.contains("instanceName=My%20App%20%26%20Co"));
        assert!(pairs[1].1.contains("ismra=true"));
        assert!(!pairs[1].1.contains("aib"));
    }

    #[test]
    fn multi_record_identity_requests_additional_records() {
        let mut identity = identity();
        identity.multi_record = true;
        let shell = Shell::new(&Url::parse("https://shell.example/").unwrap()).unwrap();
        let url = shell.provision_url(&identity, "t").unwrap();
        let (_, targetqs) = url.query_pairs().nth(1).unwrap();
        assert!(targetqs.contains("aib=true"));
    }

    #[test]
    fn record_auth_url_uses_the_instance_id() {
        let shell = Shell::new(&Url::parse("https://shell.example/").unwrap()).unwrap();
        let instance = Uuid::new_v4();
        let url = shell.record_auth_url(instance).unwrap();
        let (_, targetqs) = url.query_pairs().nth(1).unwrap();
        assert!(targetqs.contains(&format!("appid={instance}")));

        let (target, value) = url.query_pairs().next().unwrap();
        assert_eq!(target, "target");
        assert_eq!(value, "APPAUTH");
    }

    #[test]
    fn completion_url_sits_under_the_base() {
        let shell = Shell::new(&Url::parse("https://shell.example/portal/").unwrap()).unwrap();
        assert_eq!(
            shell.completion_url().unwrap().as_str(),
            "https://shell.example/portal/auth/complete"
        );
    }

    #[test]
    fn instance_id_parses_from_the_redirect() {
        let id = parse_instance_id(
            "https://shell.example/auth/complete?target=AppAuthSuccess&instanceid=us-east",
        )
        .unwrap();
        assert_eq!(id, "us-east");
    }

    #[test]
    fn missing_or_empty_instance_id_is_rejected() {
        assert_eq!(
            parse_instance_id("https://shell.example/auth/complete?target=AppAuthSuccess"),
            Err(ClientError::MissingInstanceId)
        );
        assert_eq!(
            parse_instance_id("https://shell.example/auth/complete?instanceid="),
            Err(ClientError::MissingInstanceId)
        );
        assert_eq!(
            parse_instance_id("not a url"),
            Err(ClientError::MissingInstanceId)
        );
    }
}
