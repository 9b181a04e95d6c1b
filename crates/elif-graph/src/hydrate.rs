//! Lazy Hydration - Deferred relation accessors over persisted records
//!
//! Wrapping a record in [`Hydrated`] fetches nothing. Each accessor goes to the
//! provider when called and returns further [`Hydrated`] values, so traversal
//! can continue to any depth one hop at a time.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{GraphError, GraphResult};
use crate::provider::{record_id, ListOptions, Provider, Record, TYPE_KEY};
use crate::schema::{Direction, FieldDescriptor, Relation, SchemaGraph};

/// A record with lazy access to its relationships
#[derive(Clone)]
pub struct Hydrated {
    entity_type: String,
    record: Record,
    schema: Arc<SchemaGraph>,
    provider: Arc<dyn Provider>,
}

impl fmt::Debug for Hydrated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hydrated")
            .field("entity_type", &self.entity_type)
            .field("record", &self.record)
            .finish()
    }
}

/// Stored identifier of a forward single relation plus a way to load it
#[derive(Clone)]
pub struct RelationRef {
    pub id: String,
    pub entity_type: String,
    target_types: Vec<String>,
    schema: Arc<SchemaGraph>,
    provider: Arc<dyn Provider>,
}

impl fmt::Debug for RelationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationRef")
            .field("id", &self.id)
            .field("entity_type", &self.entity_type)
            .finish()
    }
}

impl fmt::Display for RelationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl RelationRef {
    /// Load the referenced record, `None` when it no longer exists
    pub async fn resolve(&self) -> GraphResult<Option<Hydrated>> {
        fetch(&self.schema, &self.provider, &self.target_types, &self.id).await
    }
}

/// Result of a relation access
#[derive(Debug, Clone)]
pub enum RelationValue {
    One(Option<Hydrated>),
    Many(Vec<Hydrated>),
}

impl RelationValue {
    pub fn into_one(self) -> Option<Hydrated> {
        match self {
            RelationValue::One(value) => value,
            RelationValue::Many(values) => values.into_iter().next(),
        }
    }

    pub fn into_many(self) -> Vec<Hydrated> {
        match self {
            RelationValue::One(value) => value.into_iter().collect(),
            RelationValue::Many(values) => values,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RelationValue::One(value) => usize::from(value.is_some()),
            RelationValue::Many(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Hydrated {
    pub fn new<S: Into<String>>(
        entity_type: S,
        record: Record,
        schema: Arc<SchemaGraph>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            record,
            schema,
            provider,
        }
    }

    pub fn id(&self) -> Option<&str> {
        record_id(&self.record)
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.record.get(field)
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn into_record(self) -> Record {
        self.record
    }

    /// Names of the relationship fields that have accessors
    pub fn relation_fields(&self) -> Vec<&str> {
        self.schema
            .entity(&self.entity_type)
            .map(|node| node.relation_fields().map(|f| f.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Identifier of a forward single relation without fetching it
    pub fn forward_ref(&self, field: &str) -> GraphResult<Option<RelationRef>> {
        let (descriptor, relation) = self.relation_of(field)?;
        if relation.direction() != Direction::Forward || descriptor.is_array {
            return Ok(None);
        }
        Ok(self.stored_ids(field).into_iter().next().map(|id| RelationRef {
            id,
            entity_type: relation.related_type.clone(),
            target_types: owned(relation.target_types()),
            schema: Arc::clone(&self.schema),
            provider: Arc::clone(&self.provider),
        }))
    }

    /// Load a relation according to its direction and cardinality
    pub async fn relation(&self, field: &str) -> GraphResult<RelationValue> {
        let (descriptor, relation) = self.relation_of(field)?;
        let targets = owned(relation.target_types());
        let stored = self.stored_ids(field);

        match (relation.direction(), descriptor.is_array) {
            (Direction::Forward, false) => {
                let related = match stored.first() {
                    Some(id) => self.fetch(&targets, id).await?,
                    None => None,
                };
                Ok(RelationValue::One(related))
            }
            (Direction::Forward, true) => {
                let Some(id) = self.id() else {
                    return Ok(RelationValue::Many(self.fetch_all(&targets, &stored).await?));
                };
                let linked = self.provider.related(&self.entity_type, id, field).await?;
                if linked.is_empty() {
                    return Ok(RelationValue::Many(self.fetch_all(&targets, &stored).await?));
                }
                Ok(RelationValue::Many(
                    linked.into_iter().map(|record| self.wrap(record)).collect(),
                ))
            }
            (Direction::Backward, false) => {
                if let Some(id) = stored.first() {
                    return Ok(RelationValue::One(self.fetch(&targets, id).await?));
                }
                let found = self
                    .inverse_lookup(relation, Some(1))
                    .await?
                    .into_iter()
                    .next();
                Ok(RelationValue::One(found))
            }
            (Direction::Backward, true) => {
                if !stored.is_empty() {
                    return Ok(RelationValue::Many(self.fetch_all(&targets, &stored).await?));
                }
                Ok(RelationValue::Many(self.inverse_lookup(relation, None).await?))
            }
        }
    }

    fn relation_of(&self, field: &str) -> GraphResult<(&FieldDescriptor, &Relation)> {
        let unknown = || GraphError::UnknownField {
            entity: self.entity_type.clone(),
            field: field.to_string(),
        };
        let descriptor = self.schema.require(&self.entity_type)?.field(field).ok_or_else(unknown)?;
        let relation = descriptor.relation.as_ref().ok_or_else(unknown)?;
        Ok((descriptor, relation))
    }

    fn stored_ids(&self, field: &str) -> Vec<String> {
        match self.record.get(field) {
            Some(Value::String(id)) if !id.is_empty() => vec![id.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Records of the related type whose back-pointing field holds this id
    async fn inverse_lookup(
        &self,
        relation: &Relation,
        limit: Option<usize>,
    ) -> GraphResult<Vec<Hydrated>> {
        let Some(id) = self.id() else { return Ok(Vec::new()) };
        let target = &relation.related_type;
        let backref = relation
            .backref
            .clone()
            .or_else(|| {
                self.schema
                    .entity(target)
                    .and_then(|node| node.forward_field_to(&self.entity_type))
                    .map(|f| f.name.clone())
            })
            .unwrap_or_else(|| self.entity_type.to_lowercase());

        let mut options = ListOptions::new().filter(backref, Value::String(id.to_string()));
        options.limit = limit;
        let records = self.provider.list(target, &options).await?;
        Ok(records
            .into_iter()
            .map(|record| Hydrated::new(target.as_str(), record, self.schema.clone(), self.provider.clone()))
            .collect())
    }

    async fn fetch(&self, targets: &[String], id: &str) -> GraphResult<Option<Hydrated>> {
        fetch(&self.schema, &self.provider, targets, id).await
    }

    async fn fetch_all(&self, targets: &[String], ids: &[String]) -> GraphResult<Vec<Hydrated>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(found) = self.fetch(targets, id).await? {
                out.push(found);
            }
        }
        Ok(out)
    }

    fn wrap(&self, record: Record) -> Hydrated {
        let entity_type = record
            .get(TYPE_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();
        Hydrated::new(entity_type, record, self.schema.clone(), self.provider.clone())
    }
}

/// First of `targets` holding `id`
async fn fetch(
    schema: &Arc<SchemaGraph>,
    provider: &Arc<dyn Provider>,
    targets: &[String],
    id: &str,
) -> GraphResult<Option<Hydrated>> {
    for target in targets {
        if let Some(record) = provider.get(target, id).await? {
            return Ok(Some(Hydrated::new(
                target.as_str(),
                record,
                Arc::clone(schema),
                Arc::clone(provider),
            )));
        }
    }
    Ok(None)
}

fn owned(types: Vec<&str>) -> Vec<String> {
    types.into_iter().map(str::to_string).collect()
}
