//! Messaging gateway used to relay answers over WhatsApp.
//!
//! Transport semantics are pass-through: the service only sends messages and reads their
//! delivery status through [`MessagingGateway`].

use crate::config::TwilioConfig;
use crate::resilience::{CapabilityError, RetryPolicy, decode_json, http_client};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Message to deliver through the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct OutboundMessage {
    /// Recipient number, with or without the `whatsapp:` prefix.
    pub to: String,
    /// Message body.
    #[serde(alias = "message")]
    pub body: String,
    /// Optional media attachment URL.
    #[serde(default)]
    pub media_url: Option<String>,
}

/// Delivery state reported by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageStatus {
    /// Gateway message identifier.
    pub sid: String,
    /// Delivery status (`queued`, `sent`, `delivered`, ...).
    pub status: String,
    /// Recipient address.
    #[serde(default)]
    pub to: Option<String>,
    /// Creation timestamp as reported by the gateway.
    #[serde(default)]
    pub date_created: Option<String>,
    /// Last update timestamp as reported by the gateway.
    #[serde(default)]
    pub date_updated: Option<String>,
    /// Gateway error code, when delivery failed.
    #[serde(default)]
    pub error_code: Option<i64>,
    /// Gateway error message, when delivery failed.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Send and status primitives of an external messaging gateway.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Deliver a message.
    async fn send(&self, message: OutboundMessage) -> Result<MessageStatus, CapabilityError>;

    /// Fetch the delivery status of a previously sent message.
    async fn status(&self, sid: &str) -> Result<MessageStatus, CapabilityError>;
}

/// Twilio Messages API adapter.
pub struct TwilioGateway {
    http: Client,
    config: TwilioConfig,
    policy: RetryPolicy,
}

impl TwilioGateway {
    /// Create a gateway from Twilio credentials.
    pub fn new(config: TwilioConfig, policy: RetryPolicy) -> Result<Self, CapabilityError> {
        Ok(Self {
            http: http_client("carelens/messaging")?,
            config,
            policy,
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

/// Whether `sid` has the shape of a gateway message identifier (ASCII letters and digits).
pub fn is_message_sid(sid: &str) -> bool {
    !sid.is_empty() && sid.len() <= 64 && sid.bytes().all(|byte| byte.is_ascii_alphanumeric())
}

/// Prefix a phone number with the WhatsApp channel marker when missing.
pub fn whatsapp_address(number: &str) -> String {
    let trimmed = number.trim();
    if trimmed.starts_with("whatsapp:") {
        trimmed.to_string()
    } else {
        format!("whatsapp:{trimmed}")
    }
}

#[async_trait]
impl MessagingGateway for TwilioGateway {
    async fn send(&self, message: OutboundMessage) -> Result<MessageStatus, CapabilityError> {
        let mut form = vec![
            ("From", whatsapp_address(&self.config.whatsapp_number)),
            ("To", whatsapp_address(&message.to)),
            ("Body", message.body.clone()),
        ];
        if let Some(media) = &message.media_url {
            form.push(("MediaUrl", media.clone()));
        }
        let url = format!("{}.json", self.messages_url());

        // Sending is not idempotent: only retry when no connection was made.
        let status: MessageStatus = self
            .policy
            .run_when("twilio.send", CapabilityError::is_connect_failure, || async {
                let response = self
                    .http
                    .post(&url)
                    .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
                    .form(&form)
                    .send()
                    .await
                    .map_err(CapabilityError::from_transport)?;
                decode_json(response).await
            })
            .await?;
        tracing::info!(sid = %status.sid, status = %status.status, "WhatsApp message sent");
        Ok(status)
    }

    async fn status(&self, sid: &str) -> Result<MessageStatus, CapabilityError> {
        if !is_message_sid(sid) {
            return Err(CapabilityError::Rejected {
                status: 400,
                body: format!("invalid message sid {sid:?}"),
            });
        }
        let url = format!("{}/{sid}.json", self.messages_url());
        self.policy
            .run("twilio.status", || async {
                let response = self
                    .http
                    .get(&url)
                    .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
                    .send()
                    .await
                    .map_err(CapabilityError::from_transport)?;
                decode_json(response).await
            })
            .await
    }
}
