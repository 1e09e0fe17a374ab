use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{codec, Metadata};

/// Current content envelope version.
pub const CONTENT_FORMAT: u8 = 2;

/// Default `type` of a message record.
pub const DEFAULT_MESSAGE_TYPE: &str = "v2";

/// Field carrying a message's position within its save batch.
pub(crate) const BATCH_INDEX_FIELD: &str = "_index";

/// Stored on a record copied into another thread; names the thread it left.
pub(crate) const MIGRATED_FROM_FIELD: &str = "_migratedFrom";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        };
        f.write_str(role)
    }
}

/// Canonical (format 2) message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    pub format: u8,
    #[serde(default)]
    pub parts: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            format: CONTENT_FORMAT,
            parts: vec![json!({ "type": "text", "text": text })],
            content: Some(text),
            metadata: None,
        }
    }

    pub fn from_parts(parts: Vec<Value>) -> Self {
        Self {
            format: CONTENT_FORMAT,
            content: joined_text(&parts),
            parts,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty() && self.content.as_deref().map_or(true, str::is_empty)
    }

    /// Replaces parts/content when given and shallow-merges metadata.
    pub fn merge(&mut self, update: MessageContentUpdate) {
        if let Some(parts) = update.parts {
            self.parts = parts;
        }
        if let Some(content) = update.content {
            self.content = Some(content);
        }
        if let Some(patch) = update.metadata {
            codec::merge_metadata(self.metadata.get_or_insert_with(Metadata::new), patch);
        }
    }
}

fn joined_text(parts: &[Value]) -> Option<String> {
    let texts: Vec<&str> = parts
        .iter()
        .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join(""))
    }
}

/// A message as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    pub role: MessageRole,
    pub content: MessageContent,
    #[serde(deserialize_with = "codec::datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type", default = "default_message_type")]
    pub message_type: String,
}

fn default_message_type() -> String {
    DEFAULT_MESSAGE_TYPE.to_string()
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        thread_id: impl Into<String>,
        resource_id: impl Into<String>,
        role: MessageRole,
        content: MessageContent,
    ) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            resource_id: Some(resource_id.into()),
            role,
            content,
            created_at: Utc::now(),
            message_type: default_message_type(),
        }
    }

    pub fn user(
        id: impl Into<String>,
        thread_id: impl Into<String>,
        resource_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(id, thread_id, resource_id, MessageRole::User, MessageContent::text(text))
    }

    pub fn assistant(
        id: impl Into<String>,
        thread_id: impl Into<String>,
        resource_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(id, thread_id, resource_id, MessageRole::Assistant, MessageContent::text(text))
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Applies every field of `update` except the thread move.
    pub fn apply(&mut self, update: MessageUpdate) {
        if let Some(resource_id) = update.resource_id {
            self.resource_id = Some(resource_id);
        }
        if let Some(role) = update.role {
            self.role = role;
        }
        if let Some(content) = update.content {
            self.content.merge(content);
        }
        if let Some(message_type) = update.message_type {
            self.message_type = message_type;
        }
        if let Some(created_at) = update.created_at {
            self.created_at = created_at;
        }
    }

    /// Stored form, tagged with its position in the save batch.
    pub(crate) fn to_record(&self, batch_index: usize) -> serde_json::Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert(BATCH_INDEX_FIELD.to_string(), json!(batch_index));
        }
        Ok(value)
    }

    /// Stored form of a copy moved out of `from_thread`.
    pub(crate) fn to_migrated_record(&self, from_thread: &str) -> serde_json::Result<Value> {
        let mut value = self.to_record(0)?;
        if let Value::Object(map) = &mut value {
            map.insert(MIGRATED_FROM_FIELD.to_string(), json!(from_thread));
        }
        Ok(value)
    }
}

/// Partial content change carried by a [`MessageUpdate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContentUpdate {
    #[serde(default)]
    pub parts: Option<Vec<Value>>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Partial message change. `thread_id` set to another thread moves the message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdate {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub role: Option<MessageRole>,
    #[serde(default)]
    pub content: Option<MessageContentUpdate>,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl MessageUpdate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn move_to(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        let content = self.content.get_or_insert_with(MessageContentUpdate::default);
        content.parts = Some(vec![json!({ "type": "text", "text": text })]);
        content.content = Some(text);
        self
    }

    pub fn with_content_metadata(mut self, metadata: Metadata) -> Self {
        self.content
            .get_or_insert_with(MessageContentUpdate::default)
            .metadata = Some(metadata);
        self
    }

    pub fn with_role(mut self, role: MessageRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Also moves the message to the matching position in its thread's order.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// Content written by older clients: a bare string or a bare parts list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LegacyContent {
    Text(String),
    Parts(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyMessage {
    pub id: String,
    #[serde(alias = "thread_id")]
    pub thread_id: String,
    #[serde(default, alias = "resource_id")]
    pub resource_id: Option<String>,
    pub role: MessageRole,
    pub content: LegacyContent,
    #[serde(alias = "created_at", deserialize_with = "codec::datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
}

/// Every shape a stored message record can take.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEnvelope {
    Current(Message),
    Legacy(LegacyMessage),
}

impl MessageEnvelope {
    /// Classifies a stored record by its content shape.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        let is_current = value
            .get("content")
            .and_then(|c| c.get("format"))
            .is_some();
        if is_current {
            serde_json::from_value(value).map(MessageEnvelope::Current)
        } else {
            serde_json::from_value(value).map(MessageEnvelope::Legacy)
        }
    }

    /// The canonical form. The only place legacy records are interpreted.
    pub fn into_message(self) -> Message {
        match self {
            MessageEnvelope::Current(message) => message,
            MessageEnvelope::Legacy(legacy) => {
                let content = match legacy.content {
                    LegacyContent::Text(text) => MessageContent::text(text),
                    LegacyContent::Parts(parts) => MessageContent::from_parts(parts),
                };
                let message_type = match legacy.message_type.as_deref() {
                    None | Some("text") => default_message_type(),
                    Some(other) => other.to_string(),
                };
                Message {
                    id: legacy.id,
                    thread_id: legacy.thread_id,
                    resource_id: legacy.resource_id,
                    role: legacy.role,
                    content,
                    created_at: legacy.created_at,
                    message_type,
                }
            }
        }
    }
}

/// Decodes any stored message record into the canonical [`Message`].
pub fn normalize_message(value: Value) -> serde_json::Result<Message> {
    MessageEnvelope::from_value(value).map(MessageEnvelope::into_message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip_strips_batch_index() {
        let message = Message::user("m1", "t1", "r1", "hello");
        let record = message.to_record(3).unwrap();
        assert_eq!(record[BATCH_INDEX_FIELD], json!(3));

        let decoded = normalize_message(record).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_legacy_text_envelope() {
        let value = json!({
            "id": "m1",
            "thread_id": "t1",
            "resource_id": "r1",
            "role": "assistant",
            "content": "hi there",
            "created_at": 1704067200000i64,
            "type": "text"
        });

        let envelope = MessageEnvelope::from_value(value).unwrap();
        assert!(matches!(envelope, MessageEnvelope::Legacy(_)));

        let message = envelope.into_message();
        assert_eq!(message.thread_id, "t1");
        assert_eq!(message.resource_id.as_deref(), Some("r1"));
        assert_eq!(message.content, MessageContent::text("hi there"));
        assert_eq!(message.message_type, DEFAULT_MESSAGE_TYPE);
    }

    #[test]
    fn test_legacy_parts_envelope() {
        let value = json!({
            "id": "m2",
            "threadId": "t1",
            "role": "user",
            "content": [
                {"type": "text", "text": "a"},
                {"type": "image", "image": "x.png"},
                {"type": "text", "text": "b"}
            ],
            "createdAt": "2024-01-01T00:00:00Z"
        });

        let message = normalize_message(value).unwrap();
        assert_eq!(message.content.parts.len(), 3);
        assert_eq!(message.content.content.as_deref(), Some("ab"));
        assert!(message.resource_id.is_none());
    }

    #[test]
    fn test_content_merge() {
        let mut metadata = Metadata::new();
        metadata.insert("a".into(), json!(1));
        let mut content = MessageContent::text("old").with_metadata(metadata);

        let mut patch = Metadata::new();
        patch.insert("b".into(), json!(2));
        content.merge(MessageContentUpdate {
            content: Some("new".into()),
            metadata: Some(patch),
            ..Default::default()
        });

        assert_eq!(content.content.as_deref(), Some("new"));
        let merged = content.metadata.unwrap();
        assert_eq!(merged.get("a"), Some(&json!(1)));
        assert_eq!(merged.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_empty_content() {
        assert!(MessageContent::from_parts(vec![]).is_empty());
        assert!(!MessageContent::text("x").is_empty());
    }
}
