//! Instruction cache.
//!
//! Rendering the instruction is deterministic in the schema set and the
//! entity filter, so the last rendering is kept under a content key and
//! rebuilt only when the key changes.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;
use urpc_core::SchemaSet;
use urpc_planner::InstructionBuilder;

#[derive(Debug, Clone)]
struct CachedInstruction {
    key: String,
    text: Arc<String>,
}

/// Single-entry cache of the rendered instruction.
#[derive(Debug, Default)]
pub struct InstructionCache {
    builder: InstructionBuilder,
    entry: RwLock<Option<CachedInstruction>>,
}

impl InstructionCache {
    pub fn new(builder: InstructionBuilder) -> Self {
        Self {
            builder,
            entry: RwLock::new(None),
        }
    }

    /// The instruction for `schemas` restricted to `entities`.
    pub async fn get_or_build(&self, schemas: &SchemaSet, entities: Option<&[String]>) -> Arc<String> {
        let key = cache_key(schemas, entities);

        if let Some(entry) = self.entry.read().await.as_ref() {
            if entry.key == key {
                return entry.text.clone();
            }
        }

        let effective = match entities {
            Some(entities) if !entities.is_empty() => schemas.restricted_to(entities),
            _ => schemas.clone(),
        };
        let text = Arc::new(self.builder.build(&effective));
        debug!(key = %&key[..12], chars = text.len(), "instruction rebuilt");

        *self.entry.write().await = Some(CachedInstruction {
            key,
            text: text.clone(),
        });
        text
    }

    /// Drop the cached instruction.
    pub async fn invalidate(&self) {
        *self.entry.write().await = None;
        debug!("instruction cache invalidated");
    }

    /// Returns true if an instruction is cached.
    pub async fn is_warm(&self) -> bool {
        self.entry.read().await.is_some()
    }
}

fn cache_key(schemas: &SchemaSet, entities: Option<&[String]>) -> String {
    let mut filter: Vec<&str> = entities
        .unwrap_or_default()
        .iter()
        .map(String::as_str)
        .collect();
    filter.sort_unstable();
    filter.dedup();

    let mut hasher = Sha256::new();
    hasher.update(schemas.content_hash().as_bytes());
    hasher.update(b"\n");
    hasher.update(filter.join(",").as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use urpc_core::EntitySchema;

    fn schemas() -> SchemaSet {
        let mut set = SchemaSet::new();
        set.schemas.insert("user".into(), EntitySchema::new());
        set.schemas.insert("post".into(), EntitySchema::new());
        set
    }

    #[tokio::test]
    async fn test_same_key_reuses_rendering() {
        let cache = InstructionCache::default();
        let a = cache.get_or_build(&schemas(), None).await;
        let b = cache.get_or_build(&schemas(), None).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_key_change_rebuilds() {
        let cache = InstructionCache::default();
        let all = cache.get_or_build(&schemas(), None).await;
        let only_user = cache
            .get_or_build(&schemas(), Some(&["user".to_string()][..]))
            .await;
        assert!(!Arc::ptr_eq(&all, &only_user));
        assert!(all.contains("### post"));
        assert!(!only_user.contains("### post"));
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = InstructionCache::default();
        let first = cache.get_or_build(&schemas(), None).await;
        assert!(cache.is_warm().await);
        cache.invalidate().await;
        assert!(!cache.is_warm().await);
        let second = cache.get_or_build(&schemas(), None).await;
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
    }

    #[test]
    fn test_filter_order_does_not_change_key() {
        let a = cache_key(&schemas(), Some(&["a".to_string(), "b".to_string()][..]));
        let b = cache_key(&schemas(), Some(&["b".to_string(), "a".to_string()][..]));
        assert_eq!(a, b);
        assert_ne!(a, cache_key(&schemas(), None));
    }
}
