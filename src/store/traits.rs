//! `Database` trait — the document store background jobs read and write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::DatabaseError;

/// Collection holding session documents. Each carries an RFC 3339
/// `expires_at` field.
pub const SESSIONS: &str = "sessions";

/// Backend-agnostic document store keyed by collection and ID.
#[async_trait]
pub trait Database: Send + Sync {
    /// Insert or overwrite a document.
    async fn save(&self, collection: &str, id: &str, value: Value) -> Result<(), DatabaseError>;

    /// Get a document by ID.
    async fn fetch(&self, collection: &str, id: &str) -> Result<Option<Value>, DatabaseError>;

    /// Delete a document. Returns `false` if it did not exist.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, DatabaseError>;

    /// Delete every session whose `expires_at` is at or before `now`.
    /// Returns the number removed.
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError>;
}
