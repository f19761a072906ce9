use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AggregatorError;

/// A validated user-activity event, ready to be handed to the fan-out.
///
/// Constructed only via [`UserEvent::new`], which enforces the invariants
/// from the data model: `user_id >= 1` and a non-blank `event_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEvent {
    pub user_id: i64,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: HashMap<String, Value>,
}

impl UserEvent {
    /// Build a [`UserEvent`], validating `user_id` and `event_type`.
    ///
    /// `timestamp` is accepted as given; the spec does not ask us to
    /// validate it.
    pub fn new(
        user_id: i64,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: HashMap<String, Value>,
    ) -> Result<Self, AggregatorError> {
        if user_id < 1 {
            return Err(AggregatorError::ValidationFailed(format!(
                "user_id must be >= 1, got {user_id}"
            )));
        }
        let event_type = event_type.into();
        let trimmed = event_type.trim();
        if trimmed.is_empty() {
            return Err(AggregatorError::ValidationFailed(
                "event_type must not be blank".to_string(),
            ));
        }

        Ok(Self {
            user_id,
            event_type: trimmed.to_string(),
            timestamp,
            data,
        })
    }

    /// The distinguished `data.button_id` field, if the event carried one.
    pub fn button_id(&self) -> Option<&str> {
        self.data.get("button_id")?.as_str()
    }

    /// The `(user_id, event_type)` key this event increments in the cache.
    pub fn key(&self) -> (i64, String) {
        (self.user_id, self.event_type.clone())
    }
}

/// Fold the wire's `buttonId` key (case-insensitive) into the domain
/// model's `button_id`, leaving every other key untouched so unknown
/// fields stay retrievable as an opaque map.
fn normalize_button_id(mut data: HashMap<String, Value>) -> HashMap<String, Value> {
    if data.contains_key("button_id") {
        return data;
    }
    let alias = data.keys().find(|k| k.eq_ignore_ascii_case("buttonId")).cloned();
    if let Some(key) = alias {
        if let Some(value) = data.remove(&key) {
            data.insert("button_id".to_string(), value);
        }
    }
    data
}

/// Wire record as it arrives on the broker: case-insensitive field
/// matching at the top level (`userId`, `UserId`, `USERID`, ... all
/// match), `data.buttonId` nested under an opaque map and folded by
/// [`normalize_button_id`].
#[derive(Debug)]
struct WireRecord {
    user_id: i64,
    event_type: String,
    timestamp: DateTime<Utc>,
    data: HashMap<String, Value>,
}

/// Case-insensitively remove and return `key` from a JSON object, so the
/// wire record's top-level fields match regardless of casing (spec §4.4
/// step 3) — the same case-folding [`normalize_button_id`] applies to
/// `data.buttonId`.
fn take_ci(obj: &mut serde_json::Map<String, Value>, key: &str) -> Option<Value> {
    let found = obj.keys().find(|k| k.eq_ignore_ascii_case(key)).cloned()?;
    obj.remove(&found)
}

impl<'de> Deserialize<'de> for WireRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;

        let mut obj = serde_json::Map::deserialize(deserializer)?;

        let user_id = take_ci(&mut obj, "userId")
            .ok_or_else(|| D::Error::missing_field("userId"))?;
        let event_type = take_ci(&mut obj, "eventType")
            .ok_or_else(|| D::Error::missing_field("eventType"))?;
        let timestamp = take_ci(&mut obj, "timestamp")
            .ok_or_else(|| D::Error::missing_field("timestamp"))?;
        let data = take_ci(&mut obj, "data")
            .map(serde_json::from_value)
            .transpose()
            .map_err(D::Error::custom)?
            .unwrap_or_default();

        Ok(WireRecord {
            user_id: serde_json::from_value(user_id).map_err(D::Error::custom)?,
            event_type: serde_json::from_value(event_type).map_err(D::Error::custom)?,
            timestamp: serde_json::from_value(timestamp).map_err(D::Error::custom)?,
            data,
        })
    }
}

impl UserEvent {
    /// Deserialize and validate a raw JSON payload from the broker.
    ///
    /// Both JSON-parse failures and validation failures surface as
    /// [`AggregatorError`] variants the consumer loop treats identically:
    /// log and skip, still committing the offset (spec §7).
    pub fn from_json_slice(payload: &[u8]) -> Result<Self, AggregatorError> {
        let record: WireRecord = serde_json::from_slice(payload)
            .map_err(|e| AggregatorError::DeserializationFailed(e.to_string()))?;
        let data = normalize_button_id(record.data);
        Self::new(record.user_id, record.event_type, record.timestamp, data)
    }
}
