//! In-memory provider - Ordered per-type tables, relation rows and lexical similarity

use std::cmp::Ordering;
use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ListOptions, Provider, Record, RelationMeta, ScoredRecord, SearchOptions,
    SemanticSearchOptions, ID_KEY, TYPE_KEY,
};
use crate::error::{GraphError, GraphResult};

/// One stored relation
#[derive(Debug, Clone, PartialEq)]
pub struct RelationRow {
    pub from_type: String,
    pub from_id: String,
    pub field: String,
    pub to_type: String,
    pub to_id: String,
    pub meta: Option<RelationMeta>,
}

/// Provider keeping everything in process memory
#[derive(Debug)]
pub struct MemoryProvider {
    tables: DashMap<String, IndexMap<String, Record>>,
    relations: RwLock<Vec<RelationRow>>,
    semantic_search: bool,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            relations: RwLock::new(Vec::new()),
            semantic_search: true,
        }
    }

    /// Provider without similarity search, for backends that lack it
    pub fn without_semantic_search() -> Self {
        Self {
            semantic_search: false,
            ..Self::new()
        }
    }

    /// Number of stored records of a type
    pub fn count(&self, entity_type: &str) -> usize {
        self.tables
            .get(entity_type)
            .map(|table| table.len())
            .unwrap_or(0)
    }

    /// Snapshot of every stored record of a type, in insertion order
    pub fn records(&self, entity_type: &str) -> Vec<Record> {
        self.tables
            .get(entity_type)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every relation row
    pub async fn relations(&self) -> Vec<RelationRow> {
        self.relations.read().await.clone()
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn get(&self, entity_type: &str, id: &str) -> GraphResult<Option<Record>> {
        Ok(self
            .tables
            .get(entity_type)
            .and_then(|table| table.get(id).cloned()))
    }

    async fn list(&self, entity_type: &str, options: &ListOptions) -> GraphResult<Vec<Record>> {
        let mut records: Vec<Record> = self
            .tables
            .get(entity_type)
            .map(|table| {
                table
                    .values()
                    .filter(|record| matches_filter(record, &options.filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order_by) = &options.order_by {
            let (field, descending) = match order_by.strip_prefix('-') {
                Some(field) => (field, true),
                None => (order_by.as_str(), false),
            };
            records.sort_by(|a, b| {
                let ordering = compare_values(a.get(field), b.get(field));
                if descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(records
            .into_iter()
            .skip(options.offset)
            .take(limit)
            .collect())
    }

    async fn search(
        &self,
        entity_type: &str,
        query: &str,
        options: &SearchOptions,
    ) -> GraphResult<Vec<Record>> {
        let needle = query.to_lowercase();
        let limit = options.limit.unwrap_or(usize::MAX);

        Ok(self
            .tables
            .get(entity_type)
            .map(|table| {
                table
                    .values()
                    .filter(|record| {
                        searchable_text(record, &options.fields)
                            .any(|text| text.to_lowercase().contains(&needle))
                    })
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create(
        &self,
        entity_type: &str,
        id: Option<&str>,
        data: Record,
    ) -> GraphResult<Record> {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut record = Record::new();
        record.insert(ID_KEY.to_string(), Value::String(id.clone()));
        record.insert(TYPE_KEY.to_string(), Value::String(entity_type.to_string()));
        for (key, value) in data {
            if key != ID_KEY && key != TYPE_KEY {
                record.insert(key, value);
            }
        }

        let mut table = self.tables.entry(entity_type.to_string()).or_default();
        if table.contains_key(&id) {
            return Err(GraphError::provider(format!(
                "{}({}) already exists",
                entity_type, id
            )));
        }
        table.insert(id, record.clone());
        Ok(record)
    }

    async fn update(&self, entity_type: &str, id: &str, data: Record) -> GraphResult<Record> {
        let mut table = self
            .tables
            .get_mut(entity_type)
            .ok_or_else(|| not_found(entity_type, id))?;
        let record = table.get_mut(id).ok_or_else(|| not_found(entity_type, id))?;

        for (key, value) in data {
            if key != ID_KEY && key != TYPE_KEY {
                record.insert(key, value);
            }
        }
        Ok(record.clone())
    }

    async fn delete(&self, entity_type: &str, id: &str) -> GraphResult<bool> {
        let removed = self
            .tables
            .get_mut(entity_type)
            .and_then(|mut table| table.shift_remove(id))
            .is_some();

        if removed {
            self.relations.write().await.retain(|row| {
                !(row.from_type == entity_type && row.from_id == id)
                    && !(row.to_type == entity_type && row.to_id == id)
            });
        }
        Ok(removed)
    }

    async fn related(&self, entity_type: &str, id: &str, field: &str) -> GraphResult<Vec<Record>> {
        let targets: Vec<(String, String)> = self
            .relations
            .read()
            .await
            .iter()
            .filter(|row| row.from_type == entity_type && row.from_id == id && row.field == field)
            .map(|row| (row.to_type.clone(), row.to_id.clone()))
            .collect();

        let mut records = Vec::with_capacity(targets.len());
        for (to_type, to_id) in targets {
            if let Some(record) = self.get(&to_type, &to_id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn relate(
        &self,
        from_type: &str,
        from_id: &str,
        field: &str,
        to_type: &str,
        to_id: &str,
        meta: Option<RelationMeta>,
    ) -> GraphResult<()> {
        let row = RelationRow {
            from_type: from_type.to_string(),
            from_id: from_id.to_string(),
            field: field.to_string(),
            to_type: to_type.to_string(),
            to_id: to_id.to_string(),
            meta,
        };

        let mut relations = self.relations.write().await;
        let existing = relations.iter_mut().find(|r| {
            r.from_type == row.from_type
                && r.from_id == row.from_id
                && r.field == row.field
                && r.to_type == row.to_type
                && r.to_id == row.to_id
        });
        match existing {
            Some(existing) => existing.meta = row.meta,
            None => relations.push(row),
        }
        Ok(())
    }

    async fn unrelate(
        &self,
        from_type: &str,
        from_id: &str,
        field: &str,
        to_type: &str,
        to_id: &str,
    ) -> GraphResult<()> {
        self.relations.write().await.retain(|row| {
            !(row.from_type == from_type
                && row.from_id == from_id
                && row.field == field
                && row.to_type == to_type
                && row.to_id == to_id)
        });
        Ok(())
    }

    fn supports_semantic_search(&self) -> bool {
        self.semantic_search
    }

    async fn semantic_search(
        &self,
        entity_type: &str,
        query: &str,
        options: &SemanticSearchOptions,
    ) -> GraphResult<Vec<ScoredRecord>> {
        if !self.semantic_search {
            return Err(GraphError::Unsupported(format!(
                "semantic search on '{}'",
                entity_type
            )));
        }

        let mut hits: Vec<ScoredRecord> = self
            .tables
            .get(entity_type)
            .map(|table| {
                table
                    .values()
                    .filter_map(|record| {
                        let score = searchable_text(record, &[])
                            .map(|text| lexical_similarity(query, text))
                            .fold(0.0_f64, f64::max);
                        (score >= options.min_score).then(|| ScoredRecord {
                            record: record.clone(),
                            score,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        if let Some(limit) = options.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }
}

fn not_found(entity_type: &str, id: &str) -> GraphError {
    GraphError::NotFound {
        entity: entity_type.to_string(),
        id: id.to_string(),
    }
}

fn matches_filter(record: &Record, filter: &Record) -> bool {
    filter.iter().all(|(field, expected)| match record.get(field) {
        Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
        Some(actual) => actual == expected,
        None => expected.is_null(),
    })
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        (None, None) => Ordering::Equal,
    }
}

/// String values of non-metadata fields (restricted to `fields` when non-empty)
fn searchable_text<'a>(record: &'a Record, fields: &'a [String]) -> impl Iterator<Item = &'a str> {
    record
        .iter()
        .filter(move |(key, _)| {
            !key.starts_with('$') && (fields.is_empty() || fields.iter().any(|f| f == *key))
        })
        .filter_map(|(_, value)| value.as_str())
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Lexical similarity in `0..=1`.
///
/// Equal token sequences score 1.0; otherwise the larger of the token Dice
/// coefficient and a containment score for phrases that include one another.
pub fn lexical_similarity(a: &str, b: &str) -> f64 {
    let left = tokens(a);
    let right = tokens(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    if left == right {
        return 1.0;
    }

    let left_set: HashSet<&str> = left.iter().map(String::as_str).collect();
    let right_set: HashSet<&str> = right.iter().map(String::as_str).collect();
    let shared = left_set.intersection(&right_set).count();
    let dice = (2 * shared) as f64 / (left_set.len() + right_set.len()) as f64;

    let left_joined = left.join(" ");
    let right_joined = right.join(" ");
    let (shorter, longer) = if left_joined.len() <= right_joined.len() {
        (&left_joined, &right_joined)
    } else {
        (&right_joined, &left_joined)
    };
    let containment = if longer.contains(shorter.as_str()) {
        0.5 + 0.5 * shorter.len() as f64 / longer.len() as f64
    } else {
        0.0
    };

    dice.max(containment)
}
