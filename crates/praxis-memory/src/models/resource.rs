use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{codec, Metadata};

/// Owning entity (user or agent) of threads and shared working memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    #[serde(default, alias = "working_memory")]
    pub working_memory: Option<String>,
    #[serde(default, deserialize_with = "codec::metadata")]
    pub metadata: Metadata,
    #[serde(alias = "created_at", deserialize_with = "codec::datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(alias = "updated_at", deserialize_with = "codec::datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            working_memory: None,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_working_memory(mut self, working_memory: impl Into<String>) -> Self {
        self.working_memory = Some(working_memory.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}
