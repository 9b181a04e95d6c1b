//! Provider contract - Storage operations the graph engine depends on
//!
//! Storage backends implement [`Provider`]; the engine never talks to storage
//! any other way. Records are JSON objects carrying their identifier under
//! [`ID_KEY`] and their entity type under [`TYPE_KEY`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GraphError, GraphResult};
use crate::schema::MatchMode;

pub mod memory;

pub use memory::MemoryProvider;

/// A persisted (or about to be persisted) entity
pub type Record = Map<String, Value>;

pub const ID_KEY: &str = "$id";
pub const TYPE_KEY: &str = "$type";
/// Set on entities synthesized by a fuzzy pass that found no match
pub const GENERATED_KEY: &str = "$generated";
/// `Type.field` that caused the entity to be synthesized
pub const GENERATED_BY_KEY: &str = "$generatedBy";

/// Identifier stored on a record
pub fn record_id(record: &Record) -> Option<&str> {
    record.get(ID_KEY).and_then(Value::as_str)
}

/// Listing options: equality filter, paging and ordering
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListOptions {
    /// Field -> value; array fields match when they contain the value
    pub filter: Record,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Field to order by, `-field` for descending
    pub order_by: Option<String>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter<K: Into<String>>(mut self, field: K, value: Value) -> Self {
        self.filter.insert(field.into(), value);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn order_by<S: Into<String>>(mut self, field: S) -> Self {
        self.order_by = Some(field.into());
        self
    }
}

/// Text search options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    /// Restrict matching to these fields, all string fields when empty
    pub fields: Vec<String>,
    pub limit: Option<usize>,
}

/// Similarity search options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SemanticSearchOptions {
    pub min_score: f64,
    pub limit: Option<usize>,
}

impl SemanticSearchOptions {
    pub fn new(min_score: f64) -> Self {
        Self {
            min_score,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Similarity search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: Record,
    pub score: f64,
}

impl ScoredRecord {
    pub fn id(&self) -> Option<&str> {
        record_id(&self.record)
    }
}

/// Metadata stored alongside a relation row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationMeta {
    pub match_mode: MatchMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

impl RelationMeta {
    pub fn exact() -> Self {
        Self {
            match_mode: MatchMode::Exact,
            similarity: None,
        }
    }

    pub fn fuzzy(similarity: Option<f64>) -> Self {
        Self {
            match_mode: MatchMode::Fuzzy,
            similarity,
        }
    }
}

/// Storage backend contract
#[async_trait]
pub trait Provider: Send + Sync {
    async fn get(&self, entity_type: &str, id: &str) -> GraphResult<Option<Record>>;

    async fn list(&self, entity_type: &str, options: &ListOptions) -> GraphResult<Vec<Record>>;

    async fn search(
        &self,
        entity_type: &str,
        query: &str,
        options: &SearchOptions,
    ) -> GraphResult<Vec<Record>>;

    /// Persist a new record, using `id` when given
    async fn create(&self, entity_type: &str, id: Option<&str>, data: Record)
        -> GraphResult<Record>;

    /// Merge `data` into an existing record
    async fn update(&self, entity_type: &str, id: &str, data: Record) -> GraphResult<Record>;

    async fn delete(&self, entity_type: &str, id: &str) -> GraphResult<bool>;

    /// Records linked from `entity_type(id).field`
    async fn related(&self, entity_type: &str, id: &str, field: &str) -> GraphResult<Vec<Record>>;

    async fn relate(
        &self,
        from_type: &str,
        from_id: &str,
        field: &str,
        to_type: &str,
        to_id: &str,
        meta: Option<RelationMeta>,
    ) -> GraphResult<()>;

    async fn unrelate(
        &self,
        from_type: &str,
        from_id: &str,
        field: &str,
        to_type: &str,
        to_id: &str,
    ) -> GraphResult<()>;

    fn supports_semantic_search(&self) -> bool {
        false
    }

    /// Similarity search, best matches first
    async fn semantic_search(
        &self,
        entity_type: &str,
        _query: &str,
        _options: &SemanticSearchOptions,
    ) -> GraphResult<Vec<ScoredRecord>> {
        Err(GraphError::Unsupported(format!(
            "semantic search on '{}'",
            entity_type
        )))
    }
}

/// Fetch a record or fail with [`GraphError::NotFound`]
pub async fn get_or_fail(
    provider: &dyn Provider,
    entity_type: &str,
    id: &str,
) -> GraphResult<Record> {
    provider
        .get(entity_type, id)
        .await?
        .ok_or_else(|| GraphError::NotFound {
            entity: entity_type.to_string(),
            id: id.to_string(),
        })
}
