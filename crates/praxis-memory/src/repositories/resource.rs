use chrono::Utc;

use super::Violations;
use crate::error::{BackendResultExt, DegradeExt, ErrorContext, MemoryError, Result};
use crate::kv::{Keyspace, Table};
use crate::models::{merge_metadata, Metadata, Resource};
use crate::order::UpdateSerializer;

#[derive(Clone)]
pub struct ResourceRepository {
    keys: Keyspace,
    serializer: UpdateSerializer,
}

impl ResourceRepository {
    pub fn new(keys: Keyspace, serializer: UpdateSerializer) -> Self {
        Self { keys, serializer }
    }

    /// Get resource by ID. Backend failures read as "not found".
    pub async fn get_resource_by_id(&self, resource_id: &str) -> Result<Option<Resource>> {
        self.fetch(resource_id)
            .await
            .or_degraded("get_resource_by_id", || None)
    }

    /// Create or replace a resource
    pub async fn save_resource(&self, resource: Resource) -> Result<Resource> {
        let mut violations = Violations::new();
        violations.check_id("id", &resource.id);
        violations.into_result()?;

        let key = self.keys.resource(&resource.id);
        self.serializer
            .run(&key, || self.write(&key, &resource))
            .await?;
        Ok(resource)
    }

    /// Update working memory and merge metadata, creating the resource if it
    /// does not exist yet.
    pub async fn update_resource(
        &self,
        resource_id: &str,
        working_memory: Option<String>,
        metadata: Option<Metadata>,
    ) -> Result<Resource> {
        let mut violations = Violations::new();
        violations.check_id("resourceId", resource_id);
        violations.into_result()?;

        let key = self.keys.resource(resource_id);
        self.serializer
            .run(&key, || async {
                let mut resource = match self.fetch(resource_id).await? {
                    Some(existing) => existing,
                    None => {
                        tracing::debug!("Creating resource {} on first update", resource_id);
                        Resource::new(resource_id)
                    }
                };
                if let Some(working_memory) = working_memory {
                    resource.working_memory = Some(working_memory);
                }
                if let Some(metadata) = metadata {
                    merge_metadata(&mut resource.metadata, metadata);
                }
                resource.updated_at = Utc::now().max(resource.updated_at);
                self.write(&key, &resource).await?;
                Ok(resource)
            })
            .await
    }

    async fn fetch(&self, resource_id: &str) -> Result<Option<Resource>> {
        let key = self.keys.resource(resource_id);
        let stored = self
            .keys
            .kv()
            .get(Table::Resources, &key)
            .await
            .backend("STORAGE_KV_GET_RESOURCE_FAILED", || ErrorContext::resource(resource_id))?;

        match stored {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| MemoryError::Corrupt { key, source }),
        }
    }

    async fn write(&self, key: &str, resource: &Resource) -> Result<()> {
        let value = serde_json::to_value(resource).map_err(|source| MemoryError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        self.keys
            .kv()
            .put(Table::Resources, key, value)
            .await
            .backend("STORAGE_KV_PUT_RESOURCE_FAILED", || ErrorContext::resource(&resource.id))
    }
}
