//! Delivery of a [`PushMessage`] to one subscribed device.
//!
//! [`WebPushTransport`] speaks the HTTP web push protocol: one POST per
//! endpoint, with an `aes128gcm`-encrypted body when the subscription
//! carries keys. The response status decides the outcome:
//!
//! | Response                  | Outcome                                  |
//! |---------------------------|------------------------------------------|
//! | 2xx                       | [`DeliveryOutcome::Delivered`]           |
//! | 4xx                       | [`DeliveryOutcome::Remove`]              |
//! | anything else, or no reply| [`DeliveryOutcome::Retry`] (`Retry-After` or 10s) |

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, RETRY_AFTER};
use serde::Deserialize;
use web_push::{ContentEncoding, SubscriptionInfo, WebPushMessageBuilder};

use super::message::PushMessage;
use crate::error::BackendError;

/// Backoff suggested when an endpoint did not name its own.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint accepted the message.
    Delivered,
    /// Try again later.
    Retry {
        /// Suggested delay.
        after: Duration,
        /// What went wrong.
        reason: String,
    },
    /// The endpoint is gone; the caller must forget it.
    Remove {
        /// What the endpoint said.
        reason: String,
    },
}

impl DeliveryOutcome {
    fn retry(reason: impl Into<String>) -> Self {
        Self::Retry {
            after: DEFAULT_RETRY_AFTER,
            reason: reason.into(),
        }
    }
}

/// Sends push messages to subscribed devices.
#[async_trait]
pub trait PushTransport: fmt::Debug + Send + Sync {
    /// Delivers `message` to the device described by `subscription`, an
    /// opaque serialized subscription descriptor.
    async fn deliver(&self, subscription: &str, message: &PushMessage) -> DeliveryOutcome;
}

/// Subscription descriptor as stored by browsers.
#[derive(Debug, Deserialize)]
struct Subscription {
    endpoint: String,
    #[serde(default)]
    keys: SubscriptionKeys,
}

#[derive(Debug, Default, Deserialize)]
struct SubscriptionKeys {
    #[serde(default)]
    p256dh: String,
    #[serde(default)]
    auth: String,
}

/// Encrypted payload ready to post.
struct EncryptedBody {
    content: Vec<u8>,
    crypto_headers: Vec<(&'static str, String)>,
}

/// HTTP web push client.
#[derive(Debug, Clone)]
pub struct WebPushTransport {
    client: reqwest::Client,
    gcm_endpoint: String,
    gcm_key: String,
    ttl: u32,
}

impl WebPushTransport {
    /// Creates a transport.
    ///
    /// Endpoints starting with `gcm_endpoint` are sent an
    /// `Authorization: key=<gcm_key>` header. Each request is bounded by
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Push`] if the HTTP client cannot be built.
    pub fn new(
        gcm_endpoint: String,
        gcm_key: String,
        ttl: u32,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Push(format!("http client: {e}")))?;
        Ok(Self {
            client,
            gcm_endpoint,
            gcm_key,
            ttl,
        })
    }

    fn encrypt(
        &self,
        subscription: &Subscription,
        payload: &[u8],
    ) -> Result<EncryptedBody, web_push::WebPushError> {
        let info = SubscriptionInfo::new(
            subscription.endpoint.as_str(),
            subscription.keys.p256dh.as_str(),
            subscription.keys.auth.as_str(),
        );
        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_ttl(self.ttl);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        let message = builder.build()?;
        Ok(message
            .payload
            .map(|p| EncryptedBody {
                content: p.content,
                crypto_headers: p.crypto_headers,
            })
            .unwrap_or(EncryptedBody {
                content: Vec::new(),
                crypto_headers: Vec::new(),
            }))
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn deliver(&self, subscription: &str, message: &PushMessage) -> DeliveryOutcome {
        let sub: Subscription = match serde_json::from_str(subscription) {
            Ok(sub) => sub,
            Err(e) => return DeliveryOutcome::retry(format!("invalid subscription: {e}")),
        };

        let mut request = self
            .client
            .post(&sub.endpoint)
            .header("TTL", self.ttl.to_string());

        if !self.gcm_endpoint.is_empty() && sub.endpoint.starts_with(&self.gcm_endpoint) {
            request = request.header(AUTHORIZATION, format!("key={}", self.gcm_key));
        }

        // without keys the endpoint only gets a tickle
        if !sub.keys.p256dh.is_empty() && !sub.keys.auth.is_empty() {
            let payload = match serde_json::to_vec(message) {
                Ok(payload) => payload,
                Err(e) => return DeliveryOutcome::retry(format!("encode message: {e}")),
            };
            let body = match self.encrypt(&sub, &payload) {
                Ok(body) => body,
                Err(e) => return DeliveryOutcome::retry(format!("encrypt message: {e}")),
            };
            request = request
                .header(CONTENT_ENCODING, "aes128gcm")
                .header(CONTENT_TYPE, "application/octet-stream");
            for (name, value) in body.crypto_headers {
                request = request.header(name, value);
            }
            request = request.body(body.content);
        }

        tracing::debug!(endpoint = %sub.endpoint, "sending web push");
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return DeliveryOutcome::retry(e.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            return DeliveryOutcome::Delivered;
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.unwrap_or_default();
        let reason = format!("{status} {text}");

        if status.is_client_error() {
            DeliveryOutcome::Remove { reason }
        } else {
            DeliveryOutcome::Retry {
                after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
                reason,
            }
        }
    }
}
