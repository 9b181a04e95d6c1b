//! Relationship Resolution - Decides per field whether to link, search or generate
//!
//! Resolution runs four passes in a fixed order over the fields of the entity
//! being created:
//!
//! 1. exact forward (`->`): keep supplied identifiers, otherwise generate
//! 2. fuzzy forward (`~>`): reuse the best similar entity, otherwise generate
//! 3. exact backward (`<-`): filled in while generating children (see
//!    [`RelationResolver::generate_entity`])
//! 4. fuzzy backward (`<~`): ground to existing entities only
//!
//! Links that need the parent's identifier are returned as [`PendingEdge`]s and
//! persisted after the parent is created.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use uuid::Uuid;

use crate::config::GraphConfig;
use crate::error::GraphResult;
use crate::generation::{GenerationContext, ParentRef, ValueGenerator};
use crate::provider::{record_id, Provider, Record, RelationMeta};
use crate::schema::{EntityNode, FieldDescriptor, MatchMode, Operator, SchemaGraph};

pub mod generate;
pub mod matching;

pub use generate::GenerationRequest;
pub use matching::Match;

/// Boxed future used for recursive generation
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Suffix of the companion input key guiding fuzzy resolution
pub const HINT_SUFFIX: &str = "Hint";

/// Edge to persist once the parent entity exists
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEdge {
    pub field: String,
    pub to_type: String,
    pub to_id: String,
    pub match_mode: MatchMode,
    /// Score of the reused match, `None` for generated or exact links
    pub similarity: Option<f64>,
}

impl PendingEdge {
    pub fn exact(field: &str, to_type: &str, to_id: &str) -> Self {
        Self {
            field: field.to_string(),
            to_type: to_type.to_string(),
            to_id: to_id.to_string(),
            match_mode: MatchMode::Exact,
            similarity: None,
        }
    }

    pub fn fuzzy(field: &str, to_type: &str, to_id: &str, similarity: Option<f64>) -> Self {
        Self {
            match_mode: MatchMode::Fuzzy,
            similarity,
            ..Self::exact(field, to_type, to_id)
        }
    }

    /// Exact edges are plain relations; fuzzy edges carry mode and score
    pub fn meta(&self) -> Option<RelationMeta> {
        match self.match_mode {
            MatchMode::Exact => None,
            MatchMode::Fuzzy => Some(RelationMeta::fuzzy(self.similarity)),
        }
    }
}

/// Final field values plus edges awaiting the parent's identifier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub data: Record,
    pub pending_edges: Vec<PendingEdge>,
}

impl Resolution {
    /// Pending edges of one field, in resolution order
    pub fn edges_for<'r>(&'r self, field: &'r str) -> impl Iterator<Item = &'r PendingEdge> {
        self.pending_edges.iter().filter(move |edge| edge.field == field)
    }
}

/// Resolves relationship fields for one create-call
pub struct RelationResolver<'a> {
    graph: &'a SchemaGraph,
    provider: &'a dyn Provider,
    generator: &'a dyn ValueGenerator,
    config: &'a GraphConfig,
}

impl<'a> RelationResolver<'a> {
    pub fn new(
        graph: &'a SchemaGraph,
        provider: &'a dyn Provider,
        generator: &'a dyn ValueGenerator,
        config: &'a GraphConfig,
    ) -> Self {
        Self {
            graph,
            provider,
            generator,
            config,
        }
    }

    pub fn graph(&self) -> &'a SchemaGraph {
        self.graph
    }

    pub fn provider(&self) -> &'a dyn Provider {
        self.provider
    }

    pub fn generator(&self) -> &'a dyn ValueGenerator {
        self.generator
    }

    pub fn config(&self) -> &'a GraphConfig {
        self.config
    }

    /// Run every pass over `data` for an entity that will be stored as `entity_id`
    pub async fn resolve(
        &self,
        entity_type: &str,
        data: Record,
        entity_id: &str,
    ) -> GraphResult<Resolution> {
        let node = self.graph.require(entity_type)?;
        let mut resolution = Resolution {
            data,
            pending_edges: Vec::new(),
        };

        self.resolve_exact_forward(node, entity_id, &mut resolution)
            .await?;
        self.resolve_fuzzy_forward(node, entity_id, &mut resolution)
            .await?;
        self.resolve_fuzzy_backward(node, &mut resolution).await?;

        for field in node.relation_fields().filter(|f| f.operator().is_some()) {
            resolution.data.remove(&hint_key(&field.name));
        }

        Ok(resolution)
    }

    /// Resolve, persist the entity, then materialize its pending edges
    pub async fn create_entity(
        &self,
        entity_type: &str,
        data: Record,
        id: Option<&str>,
    ) -> GraphResult<Record> {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let resolution = self.resolve(entity_type, data, &id).await?;
        let record = self
            .provider
            .create(entity_type, Some(&id), resolution.data)
            .await?;

        self.persist_edges(entity_type, &id, &resolution.pending_edges)
            .await?;

        tracing::info!(
            "Created {}({}) with {} edges",
            entity_type,
            id,
            resolution.pending_edges.len()
        );
        Ok(record)
    }

    pub async fn persist_edges(
        &self,
        from_type: &str,
        from_id: &str,
        edges: &[PendingEdge],
    ) -> GraphResult<()> {
        for edge in edges {
            self.provider
                .relate(
                    from_type,
                    from_id,
                    &edge.field,
                    &edge.to_type,
                    &edge.to_id,
                    edge.meta(),
                )
                .await?;
        }
        Ok(())
    }

    async fn resolve_exact_forward(
        &self,
        node: &EntityNode,
        entity_id: &str,
        resolution: &mut Resolution,
    ) -> GraphResult<()> {
        for field in node.fields_with_operator(Operator::ExactForward) {
            let Some(related_type) = field.related_type() else { continue };

            if let Some(value) = supplied(&resolution.data, &field.name) {
                if let Value::Array(items) = value {
                    let edges: Vec<PendingEdge> = items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|id| PendingEdge::exact(&field.name, related_type, id))
                        .collect();
                    resolution.pending_edges.extend(edges);
                }
                continue;
            }

            if field.is_optional {
                continue;
            }

            let target = self.graph.require(related_type)?;
            if field.is_array && self.populated_from_target(&node.name, target) {
                tracing::debug!(
                    "Skipping {}.{}: {} links back and is populated from its side",
                    node.name,
                    field.name,
                    related_type
                );
                continue;
            }

            let request = GenerationRequest::new(
                related_type,
                self.child_context(node, field, entity_id, field.prompt.clone()),
            )
            .nested(self.config.nested_generation_depth);
            let child = self.generate_entity(request).await?;
            let Some(child_id) = record_id(&child).map(str::to_string) else { continue };

            if field.is_array {
                resolution.data.insert(
                    field.name.clone(),
                    Value::Array(vec![Value::String(child_id.clone())]),
                );
                resolution
                    .pending_edges
                    .push(PendingEdge::exact(&field.name, related_type, &child_id));
            } else {
                resolution
                    .data
                    .insert(field.name.clone(), Value::String(child_id));
            }
        }
        Ok(())
    }

    async fn resolve_fuzzy_forward(
        &self,
        node: &EntityNode,
        entity_id: &str,
        resolution: &mut Resolution,
    ) -> GraphResult<()> {
        for field in node.fields_with_operator(Operator::FuzzyForward) {
            let Some(relation) = &field.relation else { continue };
            if supplied(&resolution.data, &field.name).is_some() {
                continue;
            }

            // Optional fields fall back to their prompt but never to the bare field name
            let explicit = hint_values(&resolution.data, &field.name);
            if explicit.is_none() && field.is_optional && field.prompt.is_none() {
                continue;
            }
            let mut hints = explicit.unwrap_or_else(|| {
                vec![field.prompt.clone().unwrap_or_else(|| field.name.clone())]
            });
            if !field.is_array {
                hints.truncate(1);
            }

            let threshold = self.threshold_for(node, relation.threshold);
            let target_types = relation.target_types();
            let mut ids = Vec::with_capacity(hints.len());

            for hint in hints {
                match self.find_best_match(&target_types, &hint, threshold).await? {
                    Some(found) => {
                        tracing::debug!(
                            "{}.{}: '{}' matched {}({}) with score {:.3}",
                            node.name,
                            field.name,
                            hint,
                            found.entity_type,
                            found.id,
                            found.score
                        );
                        resolution.pending_edges.push(PendingEdge::fuzzy(
                            &field.name,
                            &found.entity_type,
                            &found.id,
                            Some(found.score),
                        ));
                        ids.push(found.id);
                    }
                    None => {
                        let request = GenerationRequest::new(
                            relation.related_type.as_str(),
                            self.child_context(node, field, entity_id, Some(hint.clone())),
                        )
                        .nested(self.config.nested_generation_depth)
                        .generated_by(&node.name, &field.name);
                        let child = self.generate_entity(request).await?;
                        let Some(child_id) = record_id(&child).map(str::to_string) else {
                            continue;
                        };
                        tracing::debug!(
                            "{}.{}: no match for '{}' at {:.2}, generated {}({})",
                            node.name,
                            field.name,
                            hint,
                            threshold,
                            relation.related_type,
                            child_id
                        );
                        resolution.pending_edges.push(PendingEdge::fuzzy(
                            &field.name,
                            &relation.related_type,
                            &child_id,
                            None,
                        ));
                        ids.push(child_id);
                    }
                }
            }

            let value = if field.is_array {
                Value::Array(ids.into_iter().map(Value::String).collect())
            } else {
                match ids.into_iter().next() {
                    Some(id) => Value::String(id),
                    None => continue,
                }
            };
            resolution.data.insert(field.name.clone(), value);
        }
        Ok(())
    }

    async fn resolve_fuzzy_backward(
        &self,
        node: &EntityNode,
        resolution: &mut Resolution,
    ) -> GraphResult<()> {
        for field in node.fields_with_operator(Operator::FuzzyBackward) {
            let Some(relation) = &field.relation else { continue };
            if supplied(&resolution.data, &field.name).is_some() {
                continue;
            }

            let queries = match hint_values(&resolution.data, &field.name) {
                Some(hints) => hints,
                None => match &field.prompt {
                    Some(prompt) => vec![prompt.clone()],
                    None => continue,
                },
            };

            let threshold = self.threshold_for(node, relation.threshold);
            let target_types = relation.target_types();
            let limit = if field.is_array {
                self.config.backward_match_limit
            } else {
                Some(1)
            };

            let mut matches: Vec<Match> = Vec::new();
            for query in &queries {
                for found in self
                    .find_matches(&target_types, query, threshold, limit)
                    .await?
                {
                    if !matches.iter().any(|m| m.id == found.id && m.entity_type == found.entity_type) {
                        matches.push(found);
                    }
                }
            }
            matches.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            if let Some(limit) = limit {
                matches.truncate(limit);
            }

            if matches.is_empty() {
                if !field.is_optional {
                    tracing::warn!(
                        "{}.{}: no existing {} at or above {:.2}, leaving unset",
                        node.name,
                        field.name,
                        relation.related_type,
                        threshold
                    );
                }
                continue;
            }

            for found in &matches {
                resolution.pending_edges.push(PendingEdge::fuzzy(
                    &field.name,
                    &found.entity_type,
                    &found.id,
                    Some(found.score),
                ));
            }

            let value = if field.is_array {
                Value::Array(
                    matches
                        .iter()
                        .map(|m| Value::String(m.id.clone()))
                        .collect(),
                )
            } else {
                Value::String(matches[0].id.clone())
            };
            resolution.data.insert(field.name.clone(), value);
        }
        Ok(())
    }

    fn child_context(
        &self,
        node: &EntityNode,
        field: &FieldDescriptor,
        entity_id: &str,
        hint: Option<String>,
    ) -> GenerationContext {
        GenerationContext::new(field.related_type().unwrap_or_default())
            .with_hint(hint)
            .with_parent(ParentRef {
                entity_type: node.name.clone(),
                id: entity_id.to_string(),
                field: field.name.clone(),
            })
    }
}

/// `tags` -> `tagsHint`
pub fn hint_key(field: &str) -> String {
    format!("{}{}", field, HINT_SUFFIX)
}

/// Caller-supplied value, ignoring null, empty strings and empty arrays
pub fn supplied<'r>(data: &'r Record, field: &str) -> Option<&'r Value> {
    match data.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::Array(items)) if items.is_empty() => None,
        Some(value) => Some(value),
    }
}

/// Hint strings from `<field>Hint`: one per array element, or a single string
pub fn hint_values(data: &Record, field: &str) -> Option<Vec<String>> {
    match data.get(&hint_key(field))? {
        Value::String(hint) if !hint.trim().is_empty() => Some(vec![hint.clone()]),
        Value::Array(items) => {
            let hints: Vec<String> = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            (!hints.is_empty()).then_some(hints)
        }
        _ => None,
    }
}
