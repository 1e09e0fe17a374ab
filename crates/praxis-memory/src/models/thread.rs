use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{codec, Metadata};

/// Conversation container scoped to a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    #[serde(alias = "resource_id")]
    pub resource_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "codec::metadata")]
    pub metadata: Metadata,
    #[serde(alias = "created_at", deserialize_with = "codec::datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(alias = "updated_at", deserialize_with = "codec::datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resource_id: resource_id.into(),
            title: None,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }
}
