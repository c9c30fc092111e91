//! Push notification dispatch.

use std::sync::Arc;

use anyhow::bail;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::push::{Notification, PushMessage, PushSender};
use crate::worker::{TaskResult, TaskWork};

/// Send `notification` to every device in `device_tokens`.
///
/// Completes with `{"sent", "failed", "results": {token: delivered}}`. Fails
/// when the batch cannot be sent or when every single delivery was rejected.
pub fn send_push_notifications(
    sender: Arc<dyn PushSender>,
    device_tokens: Vec<String>,
    notification: Notification,
) -> TaskWork {
    TaskWork::new(move || dispatch(sender, device_tokens, notification))
}

async fn dispatch(
    sender: Arc<dyn PushSender>,
    device_tokens: Vec<String>,
    notification: Notification,
) -> TaskResult {
    let attempted = device_tokens.len();
    let messages = device_tokens
        .into_iter()
        .map(|token| PushMessage {
            token,
            notification: notification.clone(),
        })
        .collect();

    let outcomes = sender.send_batch(messages).await?;

    let mut results = Map::new();
    let mut sent = 0;
    for outcome in &outcomes {
        if outcome.delivered {
            sent += 1;
        } else {
            warn!(
                token = %outcome.token,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "Push delivery rejected"
            );
        }
        results.insert(outcome.token.clone(), Value::Bool(outcome.delivered));
    }
    let failed = outcomes.len() - sent;

    if attempted > 0 && sent == 0 {
        bail!("all {attempted} push deliveries failed");
    }

    info!(sent, failed, "Push notifications dispatched");
    Ok(json!({
        "sent": sent,
        "failed": failed,
        "results": results,
    }))
}
