//! Test doubles and response builders for exercising the client without a
//! live service. Ships in the crate so downstream apps can use the same
//! doubles in their own tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::auth::{AuthOutcome, IdentityTicket, TicketPolicy, TicketSource, WebAuthorizer};
use crate::blob::{BlobPutTicket, BlobStreamer};
use crate::error::TransportError;
use crate::transport::Transport;

/// Transport that replays scripted response bodies and records every
/// envelope it was asked to send.
pub struct MockTransport {
    url: Mutex<Url>,
    responses: Mutex<VecDeque<String>>,
    sent: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            url: Mutex::new(Url::parse("https://vault.test/rpc").expect("static url")),
            responses: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn enqueue(&self, raw: impl Into<String>) {
        self.responses.lock().expect("lock").push_back(raw.into());
    }

    pub fn enqueue_ok(&self, body: &str) {
        self.enqueue(ok_response(body));
    }

    pub fn enqueue_status(&self, code: u32) {
        self.enqueue(status_response(code));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("lock").clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("lock").len()
    }

    /// The `<method>` of each sent envelope, in order.
    pub fn sent_methods(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|envelope| text_of(envelope, "method").unwrap_or_default())
            .collect()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        payload: &str,
        cancel: &CancellationToken,
    ) -> Result<String, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.sent.lock().expect("lock").push(payload.to_string());
        self.responses
            .lock()
            .expect("lock")
            .pop_front()
            .ok_or(TransportError::Http {
                status: 500,
                body: "mock transport has no scripted response".into(),
            })
    }

    fn service_url(&self) -> Url {
        self.url.lock().expect("lock").clone()
    }

    fn set_service_url(&self, url: Url) {
        *self.url.lock().expect("lock") = url;
    }
}

/// Authorizer that replays scripted outcomes and records the start URLs it
/// was pointed at.
pub struct ScriptedAuthorizer {
    outcomes: Mutex<VecDeque<AuthOutcome>>,
    starts: Mutex<Vec<Url>>,
}

impl ScriptedAuthorizer {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            starts: Mutex::new(Vec::new()),
        }
    }

    pub fn returning(outcome: AuthOutcome) -> Self {
        let authorizer = Self::new();
        authorizer.enqueue(outcome);
        authorizer
    }

    pub fn enqueue(&self, outcome: AuthOutcome) {
        self.outcomes.lock().expect("lock").push_back(outcome);
    }

    pub fn starts(&self) -> Vec<Url> {
        self.starts.lock().expect("lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.starts.lock().expect("lock").len()
    }
}

impl Default for ScriptedAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebAuthorizer for ScriptedAuthorizer {
    async fn authorize(
        &self,
        start_url: Url,
        _completion_prefix: Url,
    ) -> anyhow::Result<AuthOutcome> {
        self.starts.lock().expect("lock").push(start_url);
        Ok(self
            .outcomes
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(AuthOutcome::failed))
    }
}

/// Ticket source that hands out one fixed ticket and records the policies
/// it was asked for.
pub struct StaticTicketSource {
    ticket: String,
    policies: Mutex<Vec<TicketPolicy>>,
}

impl StaticTicketSource {
    pub fn new(ticket: impl Into<String>) -> Self {
        Self {
            ticket: ticket.into(),
            policies: Mutex::new(Vec::new()),
        }
    }

    pub fn policies(&self) -> Vec<TicketPolicy> {
        self.policies.lock().expect("lock").clone()
    }
}

#[async_trait]
impl TicketSource for StaticTicketSource {
    async fn acquire(&self, policy: TicketPolicy) -> anyhow::Result<IdentityTicket> {
        self.policies.lock().expect("lock").push(policy);
        Ok(IdentityTicket(self.ticket.clone()))
    }
}

/// Record of one upload a [`MockBlobStreamer`] accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub url: String,
    pub bytes: usize,
    pub content_type: String,
}

/// Blob streamer that swallows uploads and serves a scripted download body.
pub struct MockBlobStreamer {
    uploads: Mutex<Vec<RecordedUpload>>,
    download_body: Mutex<Option<Bytes>>,
}

impl MockBlobStreamer {
    pub fn new() -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            download_body: Mutex::new(None),
        }
    }

    pub fn serve_download(&self, body: impl Into<Bytes>) {
        *self.download_body.lock().expect("lock") = Some(body.into());
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().expect("lock").clone()
    }
}

impl Default for MockBlobStreamer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStreamer for MockBlobStreamer {
    async fn upload(
        &self,
        ticket: &BlobPutTicket,
        payload: Bytes,
        content_type: &str,
        _cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        self.uploads.lock().expect("lock").push(RecordedUpload {
            url: ticket.blob_ref_url.clone(),
            bytes: payload.len(),
            content_type: content_type.to_string(),
        });
        Ok(())
    }

    async fn download(
        &self,
        _url: &Url,
        _cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError> {
        self.download_body
            .lock()
            .expect("lock")
            .clone()
            .ok_or(TransportError::Http {
                status: 404,
                body: "no scripted download body".into(),
            })
    }
}

/// Wraps `body` in a success response envelope.
pub fn ok_response(body: &str) -> String {
    format!("<response><status><code>0</code></status><info>{body}</info></response>")
}

/// A bodyless response with the given status code.
pub fn status_response(code: u32) -> String {
    format!("<response><status><code>{code}</code></status></response>")
}

/// A response with a status code and a structured error message.
pub fn error_response(code: u32, message: &str) -> String {
    format!(
        "<response><status><code>{code}</code><error><message>{message}</message></error></status></response>"
    )
}

/// Body of a successful session-token call.
pub fn session_token_response(token: &str, shared_secret: &str) -> String {
    ok_response(&format!(
        "<token>{token}</token><shared-secret>{shared_secret}</shared-secret>"
    ))
}

/// Body of a successful registration call.
pub fn provision_info_response(app_id: Uuid, shared_secret: &str, creation_token: &str) -> String {
    ok_response(&format!(
        "<app-id>{app_id}</app-id><shared-secret>{shared_secret}</shared-secret><app-token>{creation_token}</app-token>"
    ))
}

/// Body of a topology call: one `(id, service_url, shell_url)` per instance.
pub fn topology_response(instances: &[(&str, &str, &str)]) -> String {
    let mut body = String::from("<instances>");
    for (id, service_url, shell_url) in instances {
        body.push_str(&format!(
            "<instance><id>{id}</id><name>{id}</name><service-url>{service_url}</service-url><shell-url>{shell_url}</shell-url></instance>"
        ));
    }
    body.push_str("</instances>");
    ok_response(&body)
}

/// Text of the first `<tag>...</tag>` element in `xml`, unparsed.
pub fn text_of(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string())
}
