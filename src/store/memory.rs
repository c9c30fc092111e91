//! In-memory `Database` backend for tests and local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::traits::{Database, SESSIONS};

type Collection = HashMap<String, Value>;

/// Documents held in process memory, lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `user_id` that expires after `ttl`. Returns its ID.
    pub async fn create_session(&self, user_id: &str, ttl: chrono::Duration) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let session = serde_json::json!({
            "user_id": user_id,
            "created_at": now.to_rfc3339(),
            "expires_at": (now + ttl).to_rfc3339(),
        });

        self.collections
            .write()
            .await
            .entry(SESSIONS.to_string())
            .or_default()
            .insert(id.to_string(), session);
        id
    }

    /// Number of documents in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn save(&self, collection: &str, id: &str, value: Value) -> Result<(), DatabaseError> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), value);
        Ok(())
    }

    async fn fetch(&self, collection: &str, id: &str) -> Result<Option<Value>, DatabaseError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, DatabaseError> {
        Ok(self
            .collections
            .write()
            .await
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(id).is_some()))
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let mut collections = self.collections.write().await;
        let Some(sessions) = collections.get_mut(SESSIONS) else {
            return Ok(0);
        };

        let before = sessions.len();
        sessions.retain(|id, session| match session_expiry(session) {
            Some(expires_at) => expires_at > now,
            None => {
                debug!(session_id = %id, "Session without a readable expiry, keeping");
                true
            }
        });
        Ok(before - sessions.len())
    }
}

fn session_expiry(session: &Value) -> Option<DateTime<Utc>> {
    let raw = session.get("expires_at")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
