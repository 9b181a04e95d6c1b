//! Draft/Resolve Pipeline - Placeholders first, concrete identifiers later
//!
//! [`DraftPipeline::draft`] fills every unresolved relationship field with short
//! natural-language text and records a [`ReferenceSpec`] per placeholder.
//! [`DraftPipeline::resolve`] later turns each placeholder into an identifier by
//! similarity search or generation.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{GraphError, GraphResult};
use crate::generation::{humanize, GenerationContext, ParentRef};
use crate::provider::{record_id, Record};
use crate::resolve::{
    hint_key, hint_values, supplied, GenerationRequest, PendingEdge, RelationResolver,
};
use crate::schema::{Direction, EntityNode, FieldDescriptor, MatchMode, Operator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Draft,
    Resolved,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Draft => write!(f, "draft"),
            Phase::Resolved => write!(f, "resolved"),
        }
    }
}

/// One placeholder awaiting resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceSpec {
    pub field: String,
    pub operator: Operator,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub match_mode: MatchMode,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub generated_text: String,
}

/// References recorded for a field: one, or one per array element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RefEntry {
    Single(ReferenceSpec),
    Many(Vec<ReferenceSpec>),
}

impl RefEntry {
    pub fn specs(&self) -> &[ReferenceSpec] {
        match self {
            RefEntry::Single(spec) => std::slice::from_ref(spec),
            RefEntry::Many(specs) => specs,
        }
    }

    fn specs_mut(&mut self) -> &mut [ReferenceSpec] {
        match self {
            RefEntry::Single(spec) => std::slice::from_mut(spec),
            RefEntry::Many(specs) => specs,
        }
    }
}

/// Entity with placeholder text in its relationship fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDraft {
    #[serde(rename = "$phase")]
    pub phase: Phase,
    /// Identifier the entity will be created with
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "$type")]
    pub entity_type: String,
    #[serde(rename = "$refs")]
    pub refs: IndexMap<String, RefEntry>,
    #[serde(flatten)]
    pub data: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFailure {
    pub field: String,
    pub error: String,
}

/// Draft whose placeholders were replaced by identifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    #[serde(rename = "$phase")]
    pub phase: Phase,
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "$type")]
    pub entity_type: String,
    #[serde(rename = "$refs")]
    pub refs: IndexMap<String, RefEntry>,
    #[serde(flatten)]
    pub data: Record,
    /// Present whenever skip mode was requested
    #[serde(rename = "$errors", skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldFailure>>,
    /// Links to persist once the entity is created
    #[serde(skip)]
    pub pending_edges: Vec<PendingEdge>,
}

pub type ChunkCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type ResolvedCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct DraftOptions {
    /// Receives `(field, placeholder)` as each placeholder is produced
    pub on_chunk: Option<ChunkCallback>,
}

impl DraftOptions {
    pub fn on_chunk<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.on_chunk = Some(Arc::new(callback));
        self
    }
}

/// What to do when a field fails to resolve
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Throw,
    Skip,
}

#[derive(Clone, Default)]
pub struct ResolveOptions {
    pub on_error: OnError,
    /// Receives `(field, id)` after each successful resolution
    pub on_resolved: Option<ResolvedCallback>,
}

impl ResolveOptions {
    pub fn skip_errors(mut self) -> Self {
        self.on_error = OnError::Skip;
        self
    }

    pub fn on_resolved<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.on_resolved = Some(Arc::new(callback));
        self
    }
}

pub struct DraftPipeline<'a> {
    resolver: &'a RelationResolver<'a>,
}

impl<'a> DraftPipeline<'a> {
    pub fn new(resolver: &'a RelationResolver<'a>) -> Self {
        Self { resolver }
    }

    /// Produce a draft of `entity_type` from `data`
    pub async fn draft(
        &self,
        entity_type: &str,
        mut data: Record,
        options: &DraftOptions,
    ) -> GraphResult<EntityDraft> {
        let node = self.resolver.graph().require(entity_type)?;
        let id = Uuid::new_v4().to_string();
        let mut refs = IndexMap::new();

        for field in node.relation_fields() {
            let Some(operator) = field.operator() else { continue };
            if operator == Operator::ExactBackward || supplied(&data, &field.name).is_some() {
                continue;
            }

            let hints = hint_values(&data, &field.name);
            if hints.is_none()
                && field.is_optional
                && (operator == Operator::ExactForward || field.prompt.is_none())
            {
                continue;
            }

            let prompt = field.prompt.clone().unwrap_or_else(|| humanize(&field.name));
            let mut queries: Vec<Option<String>> = match hints {
                Some(hints) => hints.into_iter().map(Some).collect(),
                None => vec![None],
            };
            if !field.is_array {
                queries.truncate(1);
            }

            let mut specs = Vec::with_capacity(queries.len());
            for hint in queries {
                let context = GenerationContext::new(field.related_type().unwrap_or_default())
                    .with_hint(hint)
                    .with_instructions(node.instructions());
                let text = self
                    .resolver
                    .generator()
                    .generate_text(&prompt, &context)
                    .await?;
                if let Some(on_chunk) = &options.on_chunk {
                    on_chunk(&field.name, &text);
                }
                specs.push(ReferenceSpec {
                    field: field.name.clone(),
                    operator,
                    entity_type: field.related_type().unwrap_or_default().to_string(),
                    match_mode: operator.match_mode(),
                    resolved: false,
                    prompt: field.prompt.clone(),
                    generated_text: text,
                });
            }

            let (value, entry) = if field.is_array {
                let texts = specs
                    .iter()
                    .map(|s| Value::String(s.generated_text.clone()))
                    .collect();
                (Value::Array(texts), RefEntry::Many(specs))
            } else {
                let Some(spec) = specs.into_iter().next() else { continue };
                (Value::String(spec.generated_text.clone()), RefEntry::Single(spec))
            };
            data.insert(field.name.clone(), value);
            data.remove(&hint_key(&field.name));
            refs.insert(field.name.clone(), entry);
        }

        tracing::debug!(
            "Drafted {}({}) with {} placeholder fields",
            entity_type,
            id,
            refs.len()
        );

        Ok(EntityDraft {
            phase: Phase::Draft,
            id,
            entity_type: entity_type.to_string(),
            refs,
            data,
        })
    }

    /// Replace every placeholder of `draft` with a concrete identifier
    pub async fn resolve(
        &self,
        draft: EntityDraft,
        options: &ResolveOptions,
    ) -> GraphResult<ResolvedEntity> {
        if draft.phase != Phase::Draft {
            return Err(GraphError::InvalidPhase {
                expected: Phase::Draft.to_string(),
                found: draft.phase.to_string(),
            });
        }

        let node = self.resolver.graph().require(&draft.entity_type)?;
        let EntityDraft {
            id,
            entity_type,
            mut refs,
            mut data,
            ..
        } = draft;
        let mut failures = Vec::new();
        let mut pending_edges = Vec::new();

        for (field_name, entry) in refs.iter_mut() {
            let field = node.field(field_name).ok_or_else(|| GraphError::UnknownField {
                entity: entity_type.clone(),
                field: field_name.clone(),
            })?;

            match self.resolve_entry(node, field, &id, entry).await {
                Ok(resolved) => {
                    for spec in entry.specs_mut() {
                        spec.resolved = true;
                    }
                    if let Some(on_resolved) = &options.on_resolved {
                        for edge in &resolved {
                            on_resolved(field_name, &edge.to_id);
                        }
                    }
                    match field_value(field, &resolved) {
                        Some(value) => {
                            data.insert(field_name.clone(), value);
                        }
                        None => {
                            data.remove(field_name);
                        }
                    }
                    pending_edges.extend(resolved.into_iter().filter(|e| {
                        field.is_array || e.match_mode == MatchMode::Fuzzy
                    }));
                }
                Err(error) => match options.on_error {
                    OnError::Throw => {
                        return Err(GraphError::resolution(
                            &entity_type,
                            field_name,
                            error.to_string(),
                        ));
                    }
                    OnError::Skip => {
                        tracing::warn!(
                            "Leaving {}.{} unresolved: {}",
                            entity_type,
                            field_name,
                            error
                        );
                        failures.push(FieldFailure {
                            field: field_name.clone(),
                            error: error.to_string(),
                        });
                    }
                },
            }
        }

        Ok(ResolvedEntity {
            phase: Phase::Resolved,
            id,
            entity_type,
            refs,
            data,
            errors: (options.on_error == OnError::Skip).then_some(failures),
            pending_edges,
        })
    }

    async fn resolve_entry(
        &self,
        node: &EntityNode,
        field: &FieldDescriptor,
        parent_id: &str,
        entry: &RefEntry,
    ) -> GraphResult<Vec<PendingEdge>> {
        let Some(relation) = &field.relation else {
            return Err(GraphError::resolution(&node.name, &field.name, "not a relationship"));
        };
        let target_types = relation.target_types();
        let min_score = self.resolver.config().draft_min_score;
        let mut edges = Vec::new();

        for spec in entry.specs() {
            let query = if spec.generated_text.trim().is_empty() {
                spec.prompt.clone().unwrap_or_default()
            } else {
                spec.generated_text.clone()
            };

            if spec.match_mode == MatchMode::Fuzzy {
                if let Some(found) = self
                    .resolver
                    .find_best_match(&target_types, &query, min_score)
                    .await?
                {
                    edges.push(PendingEdge::fuzzy(
                        &field.name,
                        &found.entity_type,
                        &found.id,
                        Some(found.score),
                    ));
                    continue;
                }
                if relation.direction() == Direction::Backward {
                    tracing::debug!(
                        "{}.{}: no existing {} for '{}'",
                        node.name,
                        field.name,
                        spec.entity_type,
                        query
                    );
                    continue;
                }
            }

            let context = GenerationContext::new(spec.entity_type.as_str())
                .with_hint(Some(query))
                .with_parent(ParentRef {
                    entity_type: node.name.clone(),
                    id: parent_id.to_string(),
                    field: field.name.clone(),
                });
            let mut request = GenerationRequest::new(spec.entity_type.as_str(), context)
                .nested(self.resolver.config().nested_generation_depth);
            if spec.match_mode == MatchMode::Fuzzy {
                request = request.generated_by(&node.name, &field.name);
            }
            let child = self.resolver.generate_entity(request).await?;
            let child_id = record_id(&child).ok_or_else(|| {
                GraphError::resolution(&node.name, &field.name, "generated entity has no id")
            })?;

            edges.push(match spec.match_mode {
                MatchMode::Exact => PendingEdge::exact(&field.name, &spec.entity_type, child_id),
                MatchMode::Fuzzy => {
                    PendingEdge::fuzzy(&field.name, &spec.entity_type, child_id, None)
                }
            });
        }
        Ok(edges)
    }
}

fn field_value(field: &FieldDescriptor, edges: &[PendingEdge]) -> Option<Value> {
    if field.is_array {
        if edges.is_empty() {
            return None;
        }
        Some(Value::Array(
            edges.iter().map(|e| Value::String(e.to_id.clone())).collect(),
        ))
    } else {
        edges.first().map(|e| Value::String(e.to_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(field: &str, text: &str) -> ReferenceSpec {
        ReferenceSpec {
            field: field.to_string(),
            operator: Operator::FuzzyForward,
            entity_type: "Category".to_string(),
            match_mode: MatchMode::Fuzzy,
            resolved: false,
            prompt: None,
            generated_text: text.to_string(),
        }
    }

    #[test]
    fn test_draft_serialization() {
        let mut data = Record::new();
        data.insert("title".to_string(), json!("Laptop"));
        data.insert("category".to_string(), json!("electronics"));
        let draft = EntityDraft {
            phase: Phase::Draft,
            id: "p1".to_string(),
            entity_type: "Product".to_string(),
            refs: IndexMap::from([(
                "category".to_string(),
                RefEntry::Single(spec("category", "electronics")),
            )]),
            data,
        };

        let value = serde_json::to_value(&draft).unwrap();
        assert_eq!(value["$phase"], "draft");
        assert_eq!(value["title"], "Laptop");
        assert_eq!(value["$refs"]["category"]["type"], "Category");
        assert_eq!(value["$refs"]["category"]["operator"], "~>");
        assert_eq!(value["$refs"]["category"]["resolved"], false);

        let back: EntityDraft = serde_json::from_value(value).unwrap();
        assert_eq!(back.phase, Phase::Draft);
        assert_eq!(back.refs["category"].specs().len(), 1);
    }

    #[test]
    fn test_ref_entry_many() {
        let entry = RefEntry::Many(vec![spec("tags", "a"), spec("tags", "b")]);
        let texts: Vec<_> = entry.specs().iter().map(|s| s.generated_text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_on_error_default_is_throw() {
        assert_eq!(ResolveOptions::default().on_error, OnError::Throw);
        assert_eq!(ResolveOptions::default().skip_errors().on_error, OnError::Skip);
    }
}
