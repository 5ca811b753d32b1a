//! # Domain Types
//!
//! The entry model shared by the stores and the sync engine.
//!
//! ## Entry State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Entry Sync States                                 │
//! │                                                                         │
//! │   set(.., Put)   ┌───────┐   push ok (full)     ┌───────┐               │
//! │  ──────────────► │  Put  │ ───────────────────► │ None  │               │
//! │                  └───────┘                      └───┬───┘               │
//! │   set(.., Patch) ┌───────┐   push ok (full)         │  pull(key)        │
//! │  ──────────────► │ Patch │ ─────────────────────────┤                   │
//! │                  └───┬───┘                      ┌───▼───┐               │
//! │                      │ push ok (partial)        │ Pull  │               │
//! │                      ▼                          └───┬───┘               │
//! │                  (removed)                          │ fetch ok          │
//! │                                                     ▼                   │
//! │                                            None + fetched value         │
//! │                                                                         │
//! │  A pending Put/Patch is never demoted to Pull: local writes win.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Sync Options
// =============================================================================

/// The pending action recorded on an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOptions {
    /// Fully synced, nothing pending.
    #[default]
    None,
    /// Fetch the remote value on the next cycle.
    Pull,
    /// Overwrite the remote value on the next cycle.
    Put,
    /// Merge into the remote value on the next cycle.
    Patch,
}

impl SyncOptions {
    /// Returns true for the states the push phase picks up.
    pub fn is_push(&self) -> bool {
        matches!(self, SyncOptions::Put | SyncOptions::Patch)
    }

    /// Returns true when any action is pending.
    pub fn is_pending(&self) -> bool {
        !matches!(self, SyncOptions::None)
    }

    /// Stable lowercase name, used for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOptions::None => "none",
            SyncOptions::Pull => "pull",
            SyncOptions::Put => "put",
            SyncOptions::Patch => "patch",
        }
    }
}

impl std::fmt::Display for SyncOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncOptions {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(SyncOptions::None),
            "pull" => Ok(SyncOptions::Pull),
            "put" => Ok(SyncOptions::Put),
            "patch" => Ok(SyncOptions::Patch),
            other => Err(CoreError::UnknownSyncOption(other.to_string())),
        }
    }
}

// =============================================================================
// Entry
// =============================================================================

/// One record per remote-addressable key.
///
/// `value` is what local reads see; `data` is the exact JSON pushed to the
/// remote. They differ for scalar patches, where `data` wraps the leaf as
/// `{ "<leaf>": <value> }` and `path` points at the parent object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Store key. May encode a nested path.
    pub key: String,

    /// Remote path a push writes to.
    pub path: String,

    /// Materialized value, `Value::Null` when not known locally.
    pub value: Value,

    /// Serialized payload sent on push.
    pub data: String,

    /// Higher values are reconciled first within a cycle.
    pub priority: i32,

    /// Pending action.
    pub sync_options: SyncOptions,

    /// True when the entry carries a single-property change.
    pub is_partial: bool,

    /// When this entry was created.
    pub timestamp: DateTime<Utc>,

    /// Write stamp assigned by the store. Zero until stored.
    #[serde(default)]
    pub revision: u64,
}

impl Entry {
    /// Creates a whole-entity entry. `data` is the serialized `value`.
    pub fn new(key: impl Into<String>, value: Value, priority: i32, sync_options: SyncOptions) -> Self {
        let key = key.into();
        Entry {
            path: key.clone(),
            key,
            data: value.to_string(),
            value,
            priority,
            sync_options,
            is_partial: false,
            timestamp: Utc::now(),
            revision: 0,
        }
    }

    /// Creates a property-scoped entry with an explicit payload and target.
    pub fn partial(
        key: impl Into<String>,
        path: impl Into<String>,
        value: Value,
        data: impl Into<String>,
        priority: i32,
        sync_options: SyncOptions,
    ) -> Self {
        Entry {
            key: key.into(),
            path: path.into(),
            value,
            data: data.into(),
            priority,
            sync_options,
            is_partial: true,
            timestamp: Utc::now(),
            revision: 0,
        }
    }

    /// Creates a pull request for a key nothing is known about yet.
    pub fn pull_request(key: impl Into<String>, priority: i32) -> Self {
        Entry::new(key, Value::Null, priority, SyncOptions::Pull)
    }

    /// Returns a copy with a different sync state.
    pub fn with_sync_options(mut self, sync_options: SyncOptions) -> Self {
        self.sync_options = sync_options;
        self
    }

    /// Replaces the materialized value. Whole-entity entries keep `data` in
    /// step with it; partial entries keep their payload.
    pub fn with_value(mut self, value: Value) -> Self {
        if !self.is_partial {
            self.data = value.to_string();
        }
        self.value = value;
        self
    }

    /// True when a complete value is known locally.
    pub fn is_materialized(&self) -> bool {
        !self.value.is_null() && !self.is_partial
    }

    /// Deserializes the materialized value.
    ///
    /// Returns `Ok(None)` when the value is null.
    pub fn deserialize<T: DeserializeOwned>(&self) -> CoreResult<Option<T>> {
        if self.value.is_null() {
            return Ok(None);
        }

        serde_json::from_value(self.value.clone())
            .map(Some)
            .map_err(|e| CoreError::Deserialization {
                key: self.key.clone(),
                reason: e.to_string(),
            })
    }
}

// =============================================================================
// Keyed Value
// =============================================================================

/// A deserialized entity together with its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedValue<T> {
    pub key: String,
    pub object: T,
}

impl<T> KeyedValue<T> {
    pub fn new(key: impl Into<String>, object: T) -> Self {
        KeyedValue {
            key: key.into(),
            object,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Deserialize)]
    struct User {
        name: String,
    }

    #[test]
    fn test_sync_options_parsing() {
        assert_eq!("put".parse::<SyncOptions>().unwrap(), SyncOptions::Put);
        assert_eq!("PATCH".parse::<SyncOptions>().unwrap(), SyncOptions::Patch);
        assert!("merge".parse::<SyncOptions>().is_err());
        assert_eq!(SyncOptions::Pull.to_string(), "pull");
    }

    #[test]
    fn test_push_states() {
        assert!(SyncOptions::Put.is_push());
        assert!(SyncOptions::Patch.is_push());
        assert!(!SyncOptions::Pull.is_push());
        assert!(!SyncOptions::None.is_pending());
    }

    #[test]
    fn test_full_entry_payload_tracks_value() {
        let entry = Entry::new("users/1", json!({"name": "Ada"}), 5, SyncOptions::Put);
        assert_eq!(entry.path, "users/1");
        assert_eq!(entry.data, r#"{"name":"Ada"}"#);
        assert!(!entry.is_partial);

        let entry = entry.with_value(json!({"name": "Grace"}));
        assert_eq!(entry.data, r#"{"name":"Grace"}"#);
    }

    #[test]
    fn test_partial_entry_keeps_payload() {
        let entry = Entry::partial(
            "users/1/name",
            "users/1",
            json!("Ada"),
            r#"{"name":"Ada"}"#,
            1,
            SyncOptions::Patch,
        )
        .with_value(json!("Grace"));

        assert_eq!(entry.data, r#"{"name":"Ada"}"#);
        assert!(!entry.is_materialized());
    }

    #[test]
    fn test_deserialize() {
        let entry = Entry::new("u", json!({"name": "Ada"}), 1, SyncOptions::None);
        let user: Option<User> = entry.deserialize().unwrap();
        assert_eq!(user, Some(User { name: "Ada".into() }));

        let empty = Entry::pull_request("u", 1);
        assert_eq!(empty.deserialize::<User>().unwrap(), None);

        let bad = Entry::new("u", json!(42), 1, SyncOptions::None);
        assert!(matches!(
            bad.deserialize::<User>(),
            Err(CoreError::Deserialization { .. })
        ));
    }
}
