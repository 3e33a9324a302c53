//! Entity schema descriptions consumed by the instruction builder.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Field layout of one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSchema>,
}

/// One field of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: String,

    #[serde(default)]
    pub optional: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSchema {
    pub fn required(field_type: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
            optional: false,
            description: None,
        }
    }

    pub fn optional(field_type: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
            optional: true,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl EntitySchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field.
    pub fn field(mut self, name: impl Into<String>, field: FieldSchema) -> Self {
        self.fields.insert(name.into(), field);
        self
    }
}

/// Per-entity configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_source: Option<String>,
}

/// Everything the instruction builder needs to describe a repository.
///
/// Ordered maps keep rendered prompts and cache keys deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSet {
    #[serde(default)]
    pub schemas: BTreeMap<String, EntitySchema>,
    #[serde(default)]
    pub sources: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub configs: BTreeMap<String, EntityConfig>,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer caller-declared entries over this set, entity by entity.
    pub fn merged_with(&self, overrides: &SchemaSet) -> SchemaSet {
        let mut merged = self.clone();
        merged
            .schemas
            .extend(overrides.schemas.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
            .sources
            .extend(overrides.sources.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
            .configs
            .extend(overrides.configs.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Keep only the named entities. Unknown names are ignored.
    pub fn restricted_to(&self, entities: &[String]) -> SchemaSet {
        let keep = |name: &String| entities.iter().any(|e| e == name);
        SchemaSet {
            schemas: self
                .schemas
                .iter()
                .filter(|(k, _)| keep(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            sources: self
                .sources
                .iter()
                .filter(|(k, _)| keep(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            configs: self
                .configs
                .iter()
                .filter(|(k, _)| keep(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Every entity named by any of the three maps.
    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .schemas
            .keys()
            .chain(self.sources.keys())
            .chain(self.configs.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// The configured default source of an entity, if any.
    pub fn default_source(&self, entity: &str) -> Option<&str> {
        self.configs
            .get(entity)
            .and_then(|c| c.default_source.as_deref())
    }

    /// Hex SHA-256 of the canonical JSON form.
    pub fn content_hash(&self) -> String {
        let content = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty() && self.sources.is_empty() && self.configs.is_empty()
    }
}
