//! In-memory repository.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::debug;
use urpc_core::{
    EntityConfig, EntitySchema, Operation, RepoTarget, Repository, RepositoryError,
};
use uuid::Uuid;

use crate::filter::{compare, values_equal, RecordFilter};

type Records = Vec<Map<String, Value>>;

/// Key holding each record's identifier.
pub const ID_FIELD: &str = "id";

/// Registration of one entity.
#[derive(Debug, Clone, Default)]
pub struct EntityDefinition {
    pub schema: EntitySchema,
    pub sources: Vec<String>,
    pub config: EntityConfig,
}

impl EntityDefinition {
    pub fn new(schema: EntitySchema) -> Self {
        Self {
            schema,
            ..Default::default()
        }
    }

    /// Add a supported source.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Mark a source as the default, adding it if it is not listed yet.
    pub fn default_source(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        if !self.sources.contains(&source) {
            self.sources.push(source.clone());
        }
        self.config.default_source = Some(source);
        self
    }
}

/// Entity → source → records, shared behind a lock.
///
/// Entities are registered up front; `execute` rejects unknown entities and
/// sources the entity does not declare.
pub struct InMemoryRepository {
    /// entity -> source -> records
    records: Arc<RwLock<HashMap<String, HashMap<String, Records>>>>,

    entities: BTreeMap<String, EntityDefinition>,
}

impl InMemoryRepository {
    /// Create an empty repository with no entities.
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            entities: BTreeMap::new(),
        }
    }

    /// Register an entity.
    pub fn with_entity(mut self, name: impl Into<String>, definition: EntityDefinition) -> Self {
        self.entities.insert(name.into(), definition);
        self
    }

    /// Insert records directly, bypassing validation. Assigns missing ids.
    pub async fn seed(&self, target: &RepoTarget, records: Vec<Value>) {
        let mut store = self.records.write().await;
        let bucket = store
            .entry(target.entity.clone())
            .or_default()
            .entry(target.source.clone())
            .or_default();
        for record in records {
            if let Value::Object(mut map) = record {
                ensure_id(&mut map);
                bucket.push(map);
            }
        }
    }

    /// Number of records stored for a target.
    pub async fn count(&self, target: &RepoTarget) -> usize {
        let store = self.records.read().await;
        store
            .get(&target.entity)
            .and_then(|sources| sources.get(&target.source))
            .map_or(0, Vec::len)
    }

    fn check_target(&self, target: &RepoTarget) -> Result<(), RepositoryError> {
        let definition = self
            .entities
            .get(&target.entity)
            .ok_or_else(|| RepositoryError::UnknownEntity(target.entity.clone()))?;

        if !definition.sources.is_empty() && !definition.sources.contains(&target.source) {
            return Err(RepositoryError::UnsupportedSource {
                entity: target.entity.clone(),
                source_name: target.source.clone(),
            });
        }
        Ok(())
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn execute(
        &self,
        target: &RepoTarget,
        operation: Operation,
        options: Value,
    ) -> Result<Value, RepositoryError> {
        self.check_target(target)?;
        debug!(entity = %target.entity, source = %target.source, %operation, "in-memory execute");

        if operation.is_read_only() {
            let store = self.records.read().await;
            let empty = Vec::new();
            let records = store
                .get(&target.entity)
                .and_then(|sources| sources.get(&target.source))
                .unwrap_or(&empty);
            return read(records, operation, &options);
        }

        let mut store = self.records.write().await;
        let records = store
            .entry(target.entity.clone())
            .or_default()
            .entry(target.source.clone())
            .or_default();

        match operation {
            Operation::Create => {
                let record = create_one(records, payload(&options, "data"))?;
                Ok(Value::Object(record))
            }
            Operation::CreateMany => {
                let items = array_payload(&options)?
                    .iter()
                    .map(to_record)
                    .collect::<Result<Vec<_>, _>>()?;
                let created = items
                    .into_iter()
                    .map(|item| Value::Object(insert(records, item)))
                    .collect();
                Ok(Value::Array(created))
            }
            Operation::Update => {
                let filter = RecordFilter::from_where(options.get("where"))?;
                let changes = object_payload(options.get("data"), "data")?;
                let index = first_match(records, &filter)?.ok_or_else(|| {
                    RepositoryError::NotFound {
                        entity: target.entity.clone(),
                    }
                })?;
                merge(&mut records[index], changes);
                Ok(Value::Object(records[index].clone()))
            }
            Operation::UpdateMany => {
                let filter = RecordFilter::from_where(options.get("where"))?;
                let changes = object_payload(options.get("data"), "data")?;
                let hits = match_flags(records, &filter)?;
                let mut count = 0;
                for (record, hit) in records.iter_mut().zip(hits) {
                    if hit {
                        merge(record, changes);
                        count += 1;
                    }
                }
                Ok(json!({ "count": count }))
            }
            Operation::Upsert => {
                let filter = RecordFilter::from_where(options.get("where"))?;
                match first_match(records, &filter)? {
                    Some(index) => {
                        let changes = object_payload(
                            options.get("update").or_else(|| options.get("data")),
                            "update",
                        )?;
                        merge(&mut records[index], changes);
                        Ok(Value::Object(records[index].clone()))
                    }
                    None => {
                        let mut seeded = filter.equalities();
                        let create = object_payload(
                            options.get("create").or_else(|| options.get("data")),
                            "create",
                        )?;
                        merge(&mut seeded, create);
                        let record = create_one(records, &Value::Object(seeded))?;
                        Ok(Value::Object(record))
                    }
                }
            }
            Operation::UpsertMany => {
                let key = options
                    .get("onConflict")
                    .and_then(Value::as_str)
                    .unwrap_or(ID_FIELD)
                    .to_string();
                let items = array_payload(&options)?
                    .iter()
                    .map(|item| {
                        item.as_object().ok_or_else(|| {
                            RepositoryError::InvalidOptions(
                                "upsertMany items must be objects".into(),
                            )
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let mut written = Vec::with_capacity(items.len());
                for item in items {
                    let existing = item.get(&key).and_then(|wanted| {
                        records
                            .iter()
                            .position(|r| r.get(&key).map_or(false, |v| values_equal(v, wanted)))
                    });
                    match existing {
                        Some(index) => {
                            merge(&mut records[index], item);
                            written.push(Value::Object(records[index].clone()));
                        }
                        None => {
                            written.push(Value::Object(insert(records, item.clone())));
                        }
                    }
                }
                Ok(Value::Array(written))
            }
            Operation::Delete => {
                let filter = RecordFilter::from_where(options.get("where"))?;
                if filter.is_empty() {
                    return Err(RepositoryError::InvalidOptions(
                        "delete requires a non-empty where clause".into(),
                    ));
                }
                let doomed = match_flags(records, &filter)?;
                let before = records.len();
                let mut flags = doomed.into_iter();
                records.retain(|_| !flags.next().unwrap_or(false));
                Ok(json!({ "count": before - records.len() }))
            }
            Operation::FindMany | Operation::FindOne => read(records, operation, &options),
        }
    }

    fn entity_schemas(&self) -> BTreeMap<String, EntitySchema> {
        self.entities
            .iter()
            .map(|(name, def)| (name.clone(), def.schema.clone()))
            .collect()
    }

    fn entity_sources(&self) -> BTreeMap<String, Vec<String>> {
        self.entities
            .iter()
            .map(|(name, def)| (name.clone(), def.sources.clone()))
            .collect()
    }

    fn entity_configs(&self) -> BTreeMap<String, EntityConfig> {
        self.entities
            .iter()
            .map(|(name, def)| (name.clone(), def.config.clone()))
            .collect()
    }
}

fn read(records: &Records, operation: Operation, options: &Value) -> Result<Value, RepositoryError> {
    let filter = RecordFilter::from_where(options.get("where"))?;
    let mut matched = Vec::new();
    for record in records {
        let value = Value::Object(record.clone());
        if filter.matches(&value)? {
            matched.push(value);
        }
    }

    if let Some((field, descending)) = order_by(options) {
        matched.sort_by(|a, b| {
            let ordering = compare(&a[field.as_str()], &b[field.as_str()]).unwrap_or(Ordering::Equal);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    if operation == Operation::FindOne {
        return Ok(matched.into_iter().next().unwrap_or(Value::Null));
    }

    let offset = options.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
    let limit = options.get("limit").and_then(Value::as_u64).map(|l| l as usize);
    let page = matched.into_iter().skip(offset);
    Ok(Value::Array(match limit {
        Some(limit) => page.take(limit).collect(),
        None => page.collect(),
    }))
}

/// `order_by: "field"`, `order_by: {field: "desc"}` or the `orderBy` spelling.
fn order_by(options: &Value) -> Option<(String, bool)> {
    match options.get("order_by").or_else(|| options.get("orderBy"))? {
        Value::String(field) => Some((field.clone(), false)),
        Value::Object(map) => map.iter().next().map(|(field, direction)| {
            let descending = direction
                .as_str()
                .map_or(false, |d| d.eq_ignore_ascii_case("desc"));
            (field.clone(), descending)
        }),
        _ => None,
    }
}

/// `options[key]` when present, otherwise the whole options value.
fn payload<'v>(options: &'v Value, key: &str) -> &'v Value {
    options.get(key).unwrap_or(options)
}

fn array_payload(options: &Value) -> Result<&Vec<Value>, RepositoryError> {
    payload(options, "data")
        .as_array()
        .ok_or_else(|| RepositoryError::InvalidOptions("data must be an array".into()))
}

fn object_payload<'v>(
    value: Option<&'v Value>,
    name: &str,
) -> Result<&'v Map<String, Value>, RepositoryError> {
    value
        .and_then(Value::as_object)
        .ok_or_else(|| RepositoryError::InvalidOptions(format!("{} must be an object", name)))
}

fn first_match(records: &Records, filter: &RecordFilter) -> Result<Option<usize>, RepositoryError> {
    for (index, record) in records.iter().enumerate() {
        if filter.matches(&Value::Object(record.clone()))? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Whether each record matches, evaluated before anything is written.
fn match_flags(records: &Records, filter: &RecordFilter) -> Result<Vec<bool>, RepositoryError> {
    records
        .iter()
        .map(|record| filter.matches(&Value::Object(record.clone())))
        .collect()
}

fn to_record(value: &Value) -> Result<Map<String, Value>, RepositoryError> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| RepositoryError::InvalidOptions("data must be an object".into()))
}

fn insert(records: &mut Records, mut record: Map<String, Value>) -> Map<String, Value> {
    ensure_id(&mut record);
    records.push(record.clone());
    record
}

fn create_one(records: &mut Records, value: &Value) -> Result<Map<String, Value>, RepositoryError> {
    Ok(insert(records, to_record(value)?))
}

fn ensure_id(record: &mut Map<String, Value>) {
    let missing = record.get(ID_FIELD).map_or(true, Value::is_null);
    if missing {
        record.insert(ID_FIELD.to_string(), Value::String(Uuid::new_v4().to_string()));
    }
}

fn merge(record: &mut Map<String, Value>, changes: &Map<String, Value>) {
    for (field, value) in changes {
        record.insert(field.clone(), value.clone());
    }
}
