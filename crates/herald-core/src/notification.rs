//! The notification record.
//!
//! Identity is the [`NotificationId`]. Everything except `read` is immutable
//! once the record exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DeserializationError;
use crate::ids::NotificationId;

/// A single notification as delivered by bulk fetch or push.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Opaque unique identifier.
    pub id: NotificationId,
    /// Human-readable text.
    pub message: String,
    /// Creation time on the origin server.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Whether the user has acknowledged this notification.
    #[serde(default)]
    pub read: bool,
}

impl Notification {
    /// Build an unread notification.
    pub fn new(
        id: impl Into<NotificationId>,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            created_at,
            read: false,
        }
    }

    /// Builder-style setter for the read flag.
    #[must_use]
    pub fn with_read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    /// Parse a single serialized record (a push payload).
    pub fn from_json(payload: &str) -> Result<Self, DeserializationError> {
        serde_json::from_str(payload).map_err(|e| DeserializationError::new(&e, payload))
    }

    /// Parse a serialized ordered sequence of records (a bulk-fetch body).
    pub fn list_from_json(payload: &str) -> Result<Vec<Self>, DeserializationError> {
        serde_json::from_str(payload).map_err(|e| DeserializationError::new(&e, payload))
    }
}

/// Lenient `createdAt` (de)serialization.
///
/// Accepts RFC 3339, an ISO-8601 local date-time without offset (read as
/// UTC), or integer epoch milliseconds. Always writes RFC 3339.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    const LOCAL_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    /// Serialize as RFC 3339 with millisecond precision.
    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }

    /// Deserialize from any accepted representation.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        deserializer.deserialize_any(TimestampVisitor)
    }

    /// Parse a timestamp string in any accepted textual format.
    pub fn parse(value: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Some(dt.with_timezone(&Utc));
        }
        LOCAL_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    struct TimestampVisitor;

    impl Visitor<'_> for TimestampVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an ISO-8601 timestamp string or epoch milliseconds")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            parse(v).ok_or_else(|| E::custom(format!("unrecognized timestamp: {v}")))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Utc.timestamp_millis_opt(v)
                .single()
                .ok_or_else(|| E::custom(format!("timestamp out of range: {v}")))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            let millis = i64::try_from(v).map_err(|_| E::custom(format!("timestamp out of range: {v}")))?;
            self.visit_i64(millis)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
