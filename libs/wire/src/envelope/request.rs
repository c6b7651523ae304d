use std::io;
use std::sync::Arc;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::crypto::{Cryptographer, HMAC_ALGORITHM, HashValue, HmacValue};
use crate::envelope::MSG_TTL_SECONDS;
use crate::error::WireError;

const DEFAULT_CULTURE: &str = "en-US";
const DEFAULT_VERSION: &str = concat!("vaultlink-rs/", env!("CARGO_PKG_VERSION"));

/// Identifies the health record a record-scoped call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReference {
    pub person_id: Uuid,
    pub record_id: Uuid,
}

impl RecordReference {
    pub fn new(person_id: Uuid, record_id: Uuid) -> Self {
        Self {
            person_id,
            record_id,
        }
    }
}

/// One outbound call. Built fresh per logical request; the envelope itself is
/// re-rendered on every attempt because the auth section depends on current
/// session state.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub method_version: u32,
    pub record: Option<RecordReference>,
    /// Inner XML of the `<info>` element; empty for parameterless methods.
    pub body: String,
    pub anonymous: bool,
    pub needs_online_token: bool,
    /// Pins the header `<app-id>` for bootstrap calls that run before any
    /// session exists.
    pub app_id: Option<Uuid>,
    pub omit_body_hash: bool,
}

impl Request {
    pub fn new(method: impl Into<String>, method_version: u32) -> Self {
        Self {
            method: method.into(),
            method_version,
            record: None,
            body: String::new(),
            anonymous: false,
            needs_online_token: false,
            app_id: None,
            omit_body_hash: false,
        }
    }

    pub fn anonymous(method: impl Into<String>, method_version: u32) -> Self {
        let mut request = Self::new(method, method_version);
        request.anonymous = true;
        request
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_record(mut self, record: RecordReference) -> Self {
        self.record = Some(record);
        self
    }

    pub fn with_app_id(mut self, app_id: Uuid) -> Self {
        self.app_id = Some(app_id);
        self
    }

    pub fn needing_online_token(mut self) -> Self {
        self.needs_online_token = true;
        self
    }

    pub fn without_body_hash(mut self) -> Self {
        self.omit_body_hash = true;
        self
    }
}

/// What the header's identity section should carry for this attempt.
#[derive(Debug, Clone)]
pub enum RequestIdentity {
    /// An established session: `auth-session` element plus a header HMAC
    /// keyed by the session shared secret.
    Session {
        token: String,
        shared_secret: String,
        extra: SessionExtra,
    },
    /// No session yet: a bare `app-id` element and no HMAC.
    App { app_id: Uuid },
}

impl RequestIdentity {
    pub fn app(app_id: Uuid) -> Self {
        Self::App { app_id }
    }
}

/// Second element inside `auth-session`, depending on the auth model.
#[derive(Debug, Clone, Default)]
pub enum SessionExtra {
    #[default]
    None,
    /// Federated model: the short-lived online token.
    OnlineToken(String),
    /// Interactive model: the person the record reference belongs to.
    OfflinePerson(Uuid),
}

/// Renders [`Request`]s into the signed wire envelope.
///
/// Build order is fixed: body, body hash, header (embedding the hash), header
/// HMAC, final assembly. The HMAC covers the serialized `<header>` element
/// byte for byte.
#[derive(Clone)]
pub struct EnvelopeBuilder {
    crypto: Arc<dyn Cryptographer>,
    version: String,
    culture: String,
}

impl EnvelopeBuilder {
    pub fn new(crypto: Arc<dyn Cryptographer>) -> Self {
        Self {
            crypto,
            version: DEFAULT_VERSION.to_string(),
            culture: DEFAULT_CULTURE.to_string(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_culture(mut self, culture: impl Into<String>) -> Self {
        let culture = culture.into();
        if !culture.is_empty() {
            self.culture = culture;
        }
        self
    }

    pub fn build(&self, request: &Request, identity: &RequestIdentity) -> Result<String, WireError> {
        self.build_at(request, identity, OffsetDateTime::now_utc())
    }

    /// Same as [`EnvelopeBuilder::build`] with an explicit timestamp.
    pub fn build_at(
        &self,
        request: &Request,
        identity: &RequestIdentity,
        now: OffsetDateTime,
    ) -> Result<String, WireError> {
        let info_xml = format!("<info>{}</info>", request.body);
        let info_hash = if request.omit_body_hash {
            None
        } else {
            Some(self.crypto.hash(&info_xml))
        };
        let header_xml = self.render_header(request, identity, now, info_hash.as_ref())?;

        let auth_xml = match identity {
            RequestIdentity::Session { shared_secret, .. } if !request.anonymous => {
                let signature = self.crypto.hmac(shared_secret, &header_xml)?;
                Some(render_auth(&signature)?)
            }
            _ => None,
        };

        let mut envelope = String::with_capacity(
            32 + auth_xml.as_deref().map_or(0, str::len) + header_xml.len() + info_xml.len(),
        );
        envelope.push_str("<request>");
        if let Some(auth) = &auth_xml {
            envelope.push_str(auth);
        }
        envelope.push_str(&header_xml);
        envelope.push_str(&info_xml);
        envelope.push_str("</request>");
        Ok(envelope)
    }

    fn render_header(
        &self,
        request: &Request,
        identity: &RequestIdentity,
        now: OffsetDateTime,
        info_hash: Option<&HashValue>,
    ) -> Result<String, WireError> {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Start(BytesStart::new("header")))?;
        write_text(&mut writer, "method", &request.method)?;
        write_text(&mut writer, "method-version", &request.method_version.to_string())?;
        if let Some(record) = &request.record {
            write_text(&mut writer, "record-id", &record.record_id.to_string())?;
        }
        self.render_identity(&mut writer, request, identity)?;
        write_text(&mut writer, "culture-code", &self.culture)?;
        write_text(&mut writer, "msg-time", &now.format(&Rfc3339)?)?;
        write_text(&mut writer, "msg-ttl", &MSG_TTL_SECONDS.to_string())?;
        write_text(&mut writer, "version", &self.version)?;
        if let Some(hash) = info_hash {
            writer.write_event(Event::Start(BytesStart::new("info-hash")))?;
            write_algorithm_value(&mut writer, "hash-data", &hash.algorithm, &hash.value)?;
            writer.write_event(Event::End(BytesEnd::new("info-hash")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("header")))?;
        into_xml_string(writer)
    }

    fn render_identity(
        &self,
        writer: &mut Writer<Vec<u8>>,
        request: &Request,
        identity: &RequestIdentity,
    ) -> Result<(), WireError> {
        match identity {
            RequestIdentity::Session { token, extra, .. } if !request.anonymous => {
                writer.write_event(Event::Start(BytesStart::new("auth-session")))?;
                write_text(writer, "auth-token", token)?;
                match extra {
                    SessionExtra::None => {}
                    SessionExtra::OnlineToken(online) => {
                        write_text(writer, "user-auth-token", online)?;
                    }
                    SessionExtra::OfflinePerson(person_id) => {
                        writer.write_event(Event::Start(BytesStart::new("offline-person-info")))?;
                        write_text(writer, "offline-person-id", &person_id.to_string())?;
                        writer.write_event(Event::End(BytesEnd::new("offline-person-info")))?;
                    }
                }
                writer.write_event(Event::End(BytesEnd::new("auth-session")))?;
            }
            _ => {
                let app_id = request
                    .app_id
                    .or(match identity {
                        RequestIdentity::App { app_id } => Some(*app_id),
                        RequestIdentity::Session { .. } => None,
                    })
                    .ok_or_else(|| {
                        WireError::InvalidRequest("anonymous request without an app id".into())
                    })?;
                write_text(writer, "app-id", &app_id.to_string())?;
            }
        }
        Ok(())
    }
}

/// Body of the self-authenticating "create session token" call: an
/// application-identity payload whose signature is keyed by the *application*
/// shared secret. This is the bootstrap that breaks the you-need-a-session-
/// to-get-a-session cycle.
pub fn session_bootstrap_body(
    crypto: &dyn Cryptographer,
    app_instance_id: Uuid,
    app_shared_secret: &str,
    now: OffsetDateTime,
) -> Result<String, WireError> {
    let content = {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Start(BytesStart::new("content")))?;
        write_text(&mut writer, "app-id", &app_instance_id.to_string())?;
        write_text(&mut writer, "hmac", HMAC_ALGORITHM)?;
        write_text(&mut writer, "signing-time", &now.format(&Rfc3339)?)?;
        writer.write_event(Event::End(BytesEnd::new("content")))?;
        into_xml_string(writer)?
    };
    let signature = crypto.hmac(app_shared_secret, &content)?;

    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Start(BytesStart::new("auth-info")))?;
    write_text(&mut writer, "app-id", &app_instance_id.to_string())?;
    writer.write_event(Event::Start(BytesStart::new("credential")))?;
    writer.write_event(Event::Start(BytesStart::new("appserver2")))?;
    write_algorithm_value(&mut writer, "hmacSig", &signature.algorithm, &signature.value)?;
    writer.write_event(Event::Text(BytesText::from_escaped(content.as_str())))?;
    writer.write_event(Event::End(BytesEnd::new("appserver2")))?;
    writer.write_event(Event::End(BytesEnd::new("credential")))?;
    writer.write_event(Event::End(BytesEnd::new("auth-info")))?;
    into_xml_string(writer)
}

fn render_auth(signature: &HmacValue) -> Result<String, WireError> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Start(BytesStart::new("auth")))?;
    write_algorithm_value(&mut writer, "hmac-data", &signature.algorithm, &signature.value)?;
    writer.write_event(Event::End(BytesEnd::new("auth")))?;
    into_xml_string(writer)
}

fn write_text<W: io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<(), WireError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_algorithm_value<W: io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    algorithm: &str,
    value: &str,
) -> Result<(), WireError> {
    let mut element = BytesStart::new(name);
    element.push_attribute(("algName", algorithm));
    writer.write_event(Event::Start(element))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn into_xml_string(writer: Writer<Vec<u8>>) -> Result<String, WireError> {
    String::from_utf8(writer.into_inner())
        .map_err(|err| WireError::InvalidRequest(format!("non-utf8 xml: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DefaultCryptographer;
    use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
    use time::macros::datetime;

    fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::new(Arc::new(DefaultCryptographer))
    }

    fn secret() -> String {
        B64.encode([3u8; 32])
    }

    fn session_identity() -> RequestIdentity {
        RequestIdentity::Session {
            token: "tok-1".into(),
            shared_secret: secret(),
            extra: SessionExtra::None,
        }
    }

    fn header_of(envelope: &str) -> &str {
        let start = envelope.find("<header>").unwrap();
        let end = envelope.find("</header>").unwrap() + "</header>".len();
        &envelope[start..end]
    }

    #[test]
    fn anonymous_request_has_no_auth_block() {
        let request = Request::anonymous("NewApplicationCreationInfo", 1)
            .with_app_id(Uuid::from_u128(7))
            .with_body("<name>test</name>");
        let envelope = builder()
            .build_at(&request, &RequestIdentity::app(Uuid::from_u128(7)), datetime!(2026-01-15 10:30:00 UTC))
            .unwrap();
        assert!(envelope.starts_with("<request><header>"));
        assert!(envelope.contains("<app-id>"));
        assert!(!envelope.contains("<auth-session>"));
    }

    #[test]
    fn anonymous_request_is_unsigned_even_with_a_session() {
        let request = Request::anonymous("CreateSessionToken", 2).with_app_id(Uuid::from_u128(9));
        let envelope = builder()
            .build_at(&request, &session_identity(), datetime!(2026-01-15 10:30:00 UTC))
            .unwrap();
        assert!(envelope.starts_with("<request><header>"));
        assert!(envelope.contains("<app-id>"));
        assert!(!envelope.contains("<auth-session>"));
    }

    #[test]
    fn signed_header_hmac_verifies_against_the_shared_secret() {
        let request = Request::new("GetItems", 3)
            .with_record(RecordReference::new(Uuid::from_u128(1), Uuid::from_u128(2)))
            .with_body("<group/>");
        let envelope = builder()
            .build_at(&request, &session_identity(), datetime!(2026-01-15 10:30:00 UTC))
            .unwrap();

        let header = header_of(&envelope);
        let recomputed = DefaultCryptographer.hmac(&secret(), header).unwrap();
        let expected = format!(
            "<auth><hmac-data algName=\"HMACSHA256\">{}</hmac-data></auth>",
            recomputed.value
        );
        assert!(envelope.starts_with(&format!("<request>{expected}")));
    }

    #[test]
    fn header_fields_appear_in_wire_order() {
        let request = Request::new("PutItems", 2)
            .with_record(RecordReference::new(Uuid::from_u128(1), Uuid::from_u128(2)))
            .with_body("<item/>");
        let envelope = builder()
            .build_at(&request, &session_identity(), datetime!(2026-01-15 10:30:00 UTC))
            .unwrap();

        let order = [
            "<method>",
            "<method-version>",
            "<record-id>",
            "<auth-session>",
            "<culture-code>",
            "<msg-time>",
            "<msg-ttl>",
            "<version>",
            "<info-hash>",
        ];
        let mut last = 0;
        for marker in order {
            let at = envelope.find(marker).unwrap_or_else(|| panic!("missing {marker}"));
            assert!(at > last, "{marker} out of order");
            last = at;
        }
        assert!(envelope.contains("<msg-ttl>1800</msg-ttl>"));
        assert!(envelope.contains("<msg-time>2026-01-15T10:30:00Z</msg-time>"));
    }

    #[test]
    fn body_hash_covers_the_info_element() {
        let request = Request::new("GetItems", 3).with_body("<group/>");
        let envelope = builder()
            .build_at(&request, &session_identity(), datetime!(2026-01-15 10:30:00 UTC))
            .unwrap();
        let expected = DefaultCryptographer.hash("<info><group/></info>");
        assert!(envelope.contains(&format!(
            "<hash-data algName=\"SHA256\">{}</hash-data>",
            expected.value
        )));
        assert!(envelope.ends_with("<info><group/></info></request>"));
    }

    #[test]
    fn body_hash_can_be_omitted_for_the_bootstrap_call() {
        let request = Request::anonymous("CreateSessionToken", 2)
            .with_app_id(Uuid::from_u128(9))
            .without_body_hash();
        let envelope = builder()
            .build_at(&request, &RequestIdentity::app(Uuid::from_u128(9)), datetime!(2026-01-15 10:30:00 UTC))
            .unwrap();
        assert!(!envelope.contains("<info-hash>"));
    }

    #[test]
    fn session_extra_renders_online_token_or_offline_person() {
        let request = Request::new("GetPersonInfo", 1);
        let online = RequestIdentity::Session {
            token: "tok".into(),
            shared_secret: secret(),
            extra: SessionExtra::OnlineToken("online-tok".into()),
        };
        let envelope = builder()
            .build_at(&request, &online, datetime!(2026-01-15 10:30:00 UTC))
            .unwrap();
        assert!(envelope.contains("<user-auth-token>online-tok</user-auth-token>"));

        let offline = RequestIdentity::Session {
            token: "tok".into(),
            shared_secret: secret(),
            extra: SessionExtra::OfflinePerson(Uuid::from_u128(5)),
        };
        let envelope = builder()
            .build_at(&request, &offline, datetime!(2026-01-15 10:30:00 UTC))
            .unwrap();
        assert!(envelope.contains(&format!(
            "<offline-person-info><offline-person-id>{}</offline-person-id></offline-person-info>",
            Uuid::from_u128(5)
        )));
    }

    #[test]
    fn anonymous_request_without_app_id_is_rejected() {
        let request = Request::anonymous("CreateSessionToken", 2);
        let result = builder().build_at(
            &request,
            &session_identity(),
            datetime!(2026-01-15 10:30:00 UTC),
        );
        assert!(matches!(result, Err(WireError::InvalidRequest(_))));
    }

    #[test]
    fn bootstrap_body_signature_covers_the_content_element() {
        let app_id = Uuid::from_u128(11);
        let app_secret = B64.encode([8u8; 32]);
        let body = session_bootstrap_body(
            &DefaultCryptographer,
            app_id,
            &app_secret,
            datetime!(2026-01-15 10:30:00 UTC),
        )
        .unwrap();

        let start = body.find("<content>").unwrap();
        let end = body.find("</content>").unwrap() + "</content>".len();
        let content = &body[start..end];
        assert!(content.contains(&format!("<app-id>{app_id}</app-id>")));
        assert!(content.contains("<hmac>HMACSHA256</hmac>"));
        assert!(content.contains("<signing-time>2026-01-15T10:30:00Z</signing-time>"));

        let expected = DefaultCryptographer.hmac(&app_secret, content).unwrap();
        assert!(body.contains(&format!(
            "<hmacSig algName=\"HMACSHA256\">{}</hmacSig>",
            expected.value
        )));
    }

    #[test]
    fn values_are_xml_escaped() {
        let request = Request::new("GetItems", 3);
        let identity = RequestIdentity::Session {
            token: "a<b&c".into(),
            shared_secret: secret(),
            extra: SessionExtra::None,
        };
        let envelope = builder()
            .build_at(&request, &identity, datetime!(2026-01-15 10:30:00 UTC))
            .unwrap();
        assert!(envelope.contains("<auth-token>a&lt;b&amp;c</auth-token>"));
    }
}
