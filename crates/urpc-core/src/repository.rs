//! The repository interface the agent drives.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RepositoryError;
use crate::schema::{EntityConfig, EntitySchema, SchemaSet};
use crate::types::Operation;

/// The `{entity, source}` pair passed to `repo(...)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoTarget {
    pub entity: String,
    pub source: String,
}

impl RepoTarget {
    pub fn new(entity: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            source: source.into(),
        }
    }
}

/// Schema-aware CRUD boundary.
///
/// `execute` is the Rust shape of `repo({entity, source}).<operation>(options)`.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Run one operation against one entity/source.
    async fn execute(
        &self,
        target: &RepoTarget,
        operation: Operation,
        options: Value,
    ) -> Result<Value, RepositoryError>;

    /// Declared schemas, keyed by entity name.
    fn entity_schemas(&self) -> BTreeMap<String, EntitySchema>;

    /// Supported sources, keyed by entity name.
    fn entity_sources(&self) -> BTreeMap<String, Vec<String>>;

    /// Per-entity configuration, keyed by entity name.
    fn entity_configs(&self) -> BTreeMap<String, EntityConfig>;

    /// All three declarations bundled for the instruction builder.
    fn schema_set(&self) -> SchemaSet {
        SchemaSet {
            schemas: self.entity_schemas(),
            sources: self.entity_sources(),
            configs: self.entity_configs(),
        }
    }
}

#[async_trait]
impl<R: Repository + ?Sized> Repository for std::sync::Arc<R> {
    async fn execute(
        &self,
        target: &RepoTarget,
        operation: Operation,
        options: Value,
    ) -> Result<Value, RepositoryError> {
        (**self).execute(target, operation, options).await
    }

    fn entity_schemas(&self) -> BTreeMap<String, EntitySchema> {
        (**self).entity_schemas()
    }

    fn entity_sources(&self) -> BTreeMap<String, Vec<String>> {
        (**self).entity_sources()
    }

    fn entity_configs(&self) -> BTreeMap<String, EntityConfig> {
        (**self).entity_configs()
    }
}
