//! Push notification delivery.
//!
//! Jobs talk to a [`PushSender`]; the real FCM/APNs client lives outside
//! this crate. [`LogPushSender`] stands in for local runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PushError;

/// Notification content shared by every device in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Extra key/value payload delivered alongside the alert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// One notification addressed to one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub token: String,
    pub notification: Notification,
}

/// Delivery result for one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryOutcome {
    pub token: String,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn delivered(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            delivered: true,
            error: None,
        }
    }

    pub fn rejected(token: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            delivered: false,
            error: Some(error.into()),
        }
    }
}

/// Sends batches of push messages.
#[async_trait]
pub trait PushSender: Send + Sync {
    /// Deliver `messages`, returning one outcome per message.
    ///
    /// An `Err` means the batch as a whole could not be sent; per-device
    /// rejections are reported in the outcomes instead.
    async fn send_batch(&self, messages: Vec<PushMessage>)
    -> Result<Vec<DeliveryOutcome>, PushError>;
}

/// Logs every message and reports it as delivered.
#[derive(Debug, Default, Clone)]
pub struct LogPushSender;

#[async_trait]
impl PushSender for LogPushSender {
    async fn send_batch(
        &self,
        messages: Vec<PushMessage>,
    ) -> Result<Vec<DeliveryOutcome>, PushError> {
        Ok(messages
            .into_iter()
            .map(|msg| {
                info!(
                    token = %msg.token,
                    title = %msg.notification.title,
                    "Push notification (log only)"
                );
                DeliveryOutcome::delivered(msg.token)
            })
            .collect())
    }
}
