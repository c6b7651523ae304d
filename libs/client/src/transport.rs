//! HTTP transport for the RPC endpoint.
//!
//! The transport owns one concern: move an envelope string to the service
//! and bring the response body back. It retries server errors and timeouts
//! once, because those are worth a second try at this layer; everything
//! status-code shaped inside the body belongs to the layers above.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::header::CONTENT_TYPE;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::error::TransportError;

/// Physical attempts per [`Transport::send`], counting the first.
const MAX_SEND_ATTEMPTS: u32 = 2;

const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

#[async_trait]
pub trait Transport: Send + Sync {
    /// Posts one serialized envelope and returns the raw response body.
    async fn send(&self, payload: &str, cancel: &CancellationToken)
    -> Result<String, TransportError>;

    fn service_url(&self) -> Url;

    /// Repoints the transport at another service instance. Takes effect for
    /// the next `send`.
    fn set_service_url(&self, url: Url);
}

pub type SharedTransport = Arc<dyn Transport>;

pub struct HttpTransport {
    client: reqwest::Client,
    service_url: RwLock<Url>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(service_url: Url) -> Self {
        Self::with_client(reqwest::Client::new(), service_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_client(client: reqwest::Client, service_url: Url, timeout: Duration) -> Self {
        Self {
            client,
            service_url: RwLock::new(service_url),
            timeout,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        payload: &str,
        cancel: &CancellationToken,
    ) -> Result<String, TransportError> {
        let url = self.service_url();
        let mut last_err = None;

        for attempt in 1..=MAX_SEND_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            let send = self
                .client
                .post(url.clone())
                .header(CONTENT_TYPE, XML_CONTENT_TYPE)
                .timeout(self.timeout)
                .body(payload.to_owned())
                .send();
            let started = Instant::now();

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                result = send => result,
            };

            match result {
                Ok(response) => {
                    let status = response.status();
                    histogram!(
                        "vaultlink_transport_roundtrip_seconds",
                        "status" => status.as_str().to_string()
                    )
                    .record(started.elapsed().as_secs_f64());

                    if status.is_server_error() {
                        let body = response.text().await.unwrap_or_default();
                        counter!("vaultlink_transport_errors_total", "kind" => "http_5xx")
                            .increment(1);
                        warn!(status = status.as_u16(), attempt, "service returned server error");
                        last_err = Some(TransportError::Http {
                            status: status.as_u16(),
                            body: truncate(body),
                        });
                        continue;
                    }
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        counter!("vaultlink_transport_errors_total", "kind" => "http_4xx")
                            .increment(1);
                        return Err(TransportError::Http {
                            status: status.as_u16(),
                            body: truncate(body),
                        });
                    }

                    debug!(attempt, "request roundtrip complete");
                    return response.text().await.map_err(TransportError::Send);
                }
                Err(err) if err.is_timeout() => {
                    counter!("vaultlink_transport_errors_total", "kind" => "timeout").increment(1);
                    warn!(attempt, timeout = ?self.timeout, "request timed out");
                    last_err = Some(TransportError::Timeout(self.timeout));
                }
                Err(err) => {
                    counter!("vaultlink_transport_errors_total", "kind" => "send").increment(1);
                    return Err(TransportError::Send(err));
                }
            }
        }

        Err(last_err.unwrap_or(TransportError::Timeout(self.timeout)))
    }

    fn service_url(&self) -> Url {
        match self.service_url.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_service_url(&self, url: Url) {
        match self.service_url.write() {
            Ok(mut guard) => *guard = url,
            Err(poisoned) => *poisoned.into_inner() = url,
        }
    }
}

/// Caps response bodies quoted in errors; real bodies can be megabytes.
fn truncate(mut body: String) -> String {
    const MAX: usize = 512;
    if body.len() > MAX {
        let mut cut = MAX;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}
