use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::error::ChatError;

/// Định danh người dùng phía backend.
///
/// The backend treats ids as opaque strings, but JSON payloads sometimes carry
/// them as numbers, so both shapes are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => UserId(text),
            Raw::Number(number) => UserId(number.to_string()),
        })
    }
}

/// Name shown for a user whose record could not be resolved.
pub fn placeholder_name(id: &UserId) -> String {
    format!("User {id}")
}

/// Domain model đại diện một tin nhắn chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Persisted id, present on history entries and broker deliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Client-side placeholder for messages sent from this session.
    #[serde(skip)]
    pub local_id: Option<Uuid>,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Builds a message stamped with the local clock, ready to publish.
    pub fn outgoing(sender_id: UserId, recipient_id: UserId, content: impl Into<String>) -> Self {
        Self {
            id: None,
            local_id: Some(Uuid::new_v4()),
            sender_id,
            recipient_id,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Decodes and validates the JSON body of an inbound frame.
    pub fn from_frame(body: &str) -> Result<Self, ChatError> {
        let message: ChatMessage = serde_json::from_str(body)
            .map_err(|err| ChatError::MalformedFrame(format!("invalid message envelope: {err}")))?;

        if message.sender_id.is_blank() || message.recipient_id.is_blank() {
            return Err(ChatError::MalformedFrame(
                "message envelope is missing a participant".to_string(),
            ));
        }
        if message.content.trim().is_empty() {
            return Err(ChatError::MalformedFrame(
                "message envelope has no content".to_string(),
            ));
        }

        Ok(message)
    }
}

/// Một dòng trong danh sách hội thoại.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub peer_id: UserId,
    pub display_name: String,
    pub last_message: Option<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// User record returned by `GET /users/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub name: Option<String>,
}

impl UserRecord {
    pub fn display_name(&self, id: &UserId) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => placeholder_name(id),
        }
    }
}

/// Who this client is acting as. Built once at start-up and handed to every
/// component that needs the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: UserId,
}

impl SessionContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}

/// Timestamp wire format.
///
/// Outgoing values use RFC 3339 with milliseconds and a `Z` suffix. Incoming
/// values may also be zone-less ISO or SQL date-times (read as UTC) or epoch
/// milliseconds.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    const NAIVE_FORMATS: [&str; 3] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
    ];

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
    }

    pub fn parse(text: &str) -> Option<DateTime<Utc>> {
        let text = text.trim();
        if let Ok(value) = DateTime::parse_from_rfc3339(text) {
            return Some(value.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => {
                parse(&text).ok_or_else(|| {
                    D::Error::custom(format!("unrecognised timestamp `{text}`"))
                })
            }
            Raw::Millis(millis) => DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| D::Error::custom(format!("timestamp {millis} is out of range"))),
        }
    }

    /// Like [`deserialize`] but yields `None` for null or unreadable values.
    pub fn deserialize_lenient<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(serde_json::Value::String(text)) => parse(&text),
            Some(serde_json::Value::Number(number)) => {
                number.as_i64().and_then(DateTime::from_timestamp_millis)
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn outgoing_envelope_has_wire_field_names() {
        let mut message = ChatMessage::outgoing("7".into(), "42".into(), "hello");
        message.timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();

        let json: serde_json::Value = serde_json::to_value(&message).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "senderId": "7",
                "recipientId": "42",
                "content": "hello",
                "timestamp": "2024-05-01T12:30:00.000Z",
            })
        );
    }

    #[test]
    fn backend_message_with_local_datetime_and_numeric_ids() {
        let body = r#"{"id":3,"senderId":42,"recipientId":"7","content":"hi",
                       "timestamp":"2024-05-01T12:30:05.123456","archived":false}"#;

        let message = ChatMessage::from_frame(body).unwrap();

        assert_eq!(message.id, Some(3));
        assert_eq!(message.sender_id, UserId::new("42"));
        assert_eq!(message.local_id, None);
        assert_eq!(
            message.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap()
                + chrono::Duration::microseconds(123_456)
        );
    }

    #[test]
    fn frame_missing_required_field_is_rejected() {
        let body = r#"{"senderId":"42","content":"hi","timestamp":"2024-05-01T12:30:05Z"}"#;

        let err = ChatMessage::from_frame(body).unwrap_err();

        assert!(matches!(err, ChatError::MalformedFrame(_)));
    }

    #[test]
    fn frame_with_blank_content_is_rejected() {
        let body = r#"{"senderId":"42","recipientId":"7","content":"  ","timestamp":"2024-05-01T12:30:05Z"}"#;

        assert!(matches!(
            ChatMessage::from_frame(body),
            Err(ChatError::MalformedFrame(_))
        ));
    }

    #[test]
    fn timestamp_parse_accepts_backend_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 9, 15, 0).unwrap();

        assert_eq!(timestamp::parse("2024-05-01T09:15:00Z"), Some(expected));
        assert_eq!(timestamp::parse("2024-05-01T11:15:00+02:00"), Some(expected));
        assert_eq!(timestamp::parse("2024-05-01 09:15:00.0"), Some(expected));
        assert_eq!(timestamp::parse("2024-05-01T09:15"), Some(expected));
        assert_eq!(timestamp::parse("yesterday"), None);
    }

    #[test]
    fn user_record_without_name_falls_back_to_placeholder() {
        let id = UserId::new("42");

        assert_eq!(UserRecord { name: None }.display_name(&id), "User 42");
        assert_eq!(UserRecord { name: Some(" ".into()) }.display_name(&id), "User 42");
        assert_eq!(UserRecord { name: Some("Asha".into()) }.display_name(&id), "Asha");
    }
}
