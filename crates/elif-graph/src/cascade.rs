//! Cascade Generator - Depth-bounded generation through forward relationships
//!
//! Starting from a persisted entity, every forward field (`->` and `~>`) that is
//! still empty receives one generated child, which is then visited one level
//! deeper. Fields that already hold identifiers are descended into instead, so
//! running a cascade twice creates nothing new.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{GraphConfig, DEFAULT_CASCADE_MAX_DEPTH};
use crate::error::{GraphError, GraphResult};
use crate::generation::{GenerationContext, ParentRef};
use crate::provider::{get_or_fail, record_id, Record, RelationMeta};
use crate::resolve::{BoxFuture, GenerationRequest, RelationResolver};
use crate::schema::{Direction, FieldDescriptor, MatchMode};

pub type ProgressCallback = Arc<dyn Fn(&CascadeProgress) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&CascadeFailure) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadePhase {
    Generating,
    Complete,
    Error,
}

/// Snapshot handed to the progress callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeProgress {
    pub phase: CascadePhase,
    pub current_type: String,
    pub depth: usize,
    pub field: Option<String>,
    pub total_entities_created: usize,
    pub types_generated: Vec<String>,
}

/// A field that failed during a cascade
#[derive(Debug, Clone)]
pub struct CascadeFailure {
    pub entity_type: String,
    pub field: String,
    pub depth: usize,
    pub error: GraphError,
}

/// Cascade tuning and callbacks
#[derive(Clone)]
pub struct CascadeOptions {
    pub max_depth: usize,
    /// Only these target types are generated or descended into when set
    pub cascade_types: Option<Vec<String>>,
    /// Abort on the first failing field instead of continuing
    pub stop_on_error: bool,
    pub on_progress: Option<ProgressCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl Default for CascadeOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_CASCADE_MAX_DEPTH,
            cascade_types: None,
            stop_on_error: false,
            on_progress: None,
            on_error: None,
        }
    }
}

impl fmt::Debug for CascadeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CascadeOptions")
            .field("max_depth", &self.max_depth)
            .field("cascade_types", &self.cascade_types)
            .field("stop_on_error", &self.stop_on_error)
            .field("on_progress", &self.on_progress.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl CascadeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &GraphConfig) -> Self {
        Self {
            max_depth: config.cascade_max_depth,
            ..Self::default()
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cascade_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CascadeProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CascadeFailure) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    fn allows(&self, entity_type: &str) -> bool {
        self.cascade_types
            .as_ref()
            .map(|types| types.iter().any(|t| t == entity_type))
            .unwrap_or(true)
    }
}

/// Outcome of a cascade run
#[derive(Debug, Clone, Default)]
pub struct CascadeReport {
    pub total_entities_created: usize,
    /// Types that received at least one generated entity, in first-seen order
    pub types_generated: Vec<String>,
    /// Fields that failed while `stop_on_error` was off
    pub failures: Vec<CascadeFailure>,
}

#[derive(Default)]
struct CascadeState {
    created: usize,
    types: IndexSet<String>,
    visited: HashSet<(String, String)>,
    failures: Vec<CascadeFailure>,
}

/// Walks forward relationships from a root entity
pub struct CascadeGenerator<'a> {
    resolver: &'a RelationResolver<'a>,
    options: CascadeOptions,
}

impl<'a> CascadeGenerator<'a> {
    pub fn new(resolver: &'a RelationResolver<'a>, options: CascadeOptions) -> Self {
        Self { resolver, options }
    }

    /// Cascade from an existing `entity_type(id)`; the root is depth 0
    pub async fn run(&self, entity_type: &str, id: &str) -> GraphResult<CascadeReport> {
        let mut state = CascadeState::default();
        let result = self.visit(entity_type, id, 0, &mut state).await;

        let phase = if result.is_ok() {
            CascadePhase::Complete
        } else {
            CascadePhase::Error
        };
        self.report(phase, entity_type, 0, None, &state);
        result?;

        tracing::info!(
            "Cascade from {}({}) created {} entities across {:?}",
            entity_type,
            id,
            state.created,
            state.types
        );

        Ok(CascadeReport {
            total_entities_created: state.created,
            types_generated: state.types.into_iter().collect(),
            failures: state.failures,
        })
    }

    fn visit<'b>(
        &'b self,
        entity_type: &'b str,
        id: &'b str,
        depth: usize,
        state: &'b mut CascadeState,
    ) -> BoxFuture<'b, GraphResult<()>> {
        Box::pin(async move {
            if depth >= self.options.max_depth {
                return Ok(());
            }
            if !state
                .visited
                .insert((entity_type.to_string(), id.to_string()))
            {
                return Ok(());
            }

            let node = self.resolver.graph().require(entity_type)?;
            let record = get_or_fail(self.resolver.provider(), entity_type, id).await?;

            let forward = node
                .relation_fields()
                .filter(|f| f.operator().map(|op| op.direction()) == Some(Direction::Forward));

            for field in forward {
                let Some(target) = field.related_type() else { continue };
                if !self.options.allows(target) {
                    continue;
                }

                self.report(
                    CascadePhase::Generating,
                    entity_type,
                    depth,
                    Some(&field.name),
                    state,
                );

                let children = match self
                    .cascade_field(entity_type, id, &record, field, depth, state)
                    .await
                {
                    Ok(children) => children,
                    Err(error) => {
                        let failure = CascadeFailure {
                            entity_type: entity_type.to_string(),
                            field: field.name.clone(),
                            depth,
                            error,
                        };
                        tracing::warn!(
                            "Cascade failed at {}.{} (depth {}): {}",
                            entity_type,
                            field.name,
                            depth,
                            failure.error
                        );
                        if let Some(on_error) = &self.options.on_error {
                            on_error(&failure);
                        }
                        if self.options.stop_on_error {
                            return Err(failure.error);
                        }
                        state.failures.push(failure);
                        continue;
                    }
                };

                // Deeper failures were already reported where they happened
                for (child_type, child_id) in children {
                    self.visit(&child_type, &child_id, depth + 1, state).await?;
                }
            }
            Ok(())
        })
    }

    /// Children of `field` to descend into, generating one when the field is empty
    async fn cascade_field(
        &self,
        entity_type: &str,
        id: &str,
        record: &Record,
        field: &FieldDescriptor,
        depth: usize,
        state: &mut CascadeState,
    ) -> GraphResult<Vec<(String, String)>> {
        let existing = linked_ids(record.get(&field.name));
        if !existing.is_empty() {
            let mut children = Vec::with_capacity(existing.len());
            for child_id in existing {
                let child_type = self.locate(field, &child_id).await?;
                if self.options.allows(&child_type) {
                    children.push((child_type, child_id));
                }
            }
            return Ok(children);
        }

        let Some(target) = field.related_type() else { return Ok(Vec::new()) };
        let context = GenerationContext::new(target)
            .with_hint(field.prompt.clone())
            .with_parent(ParentRef {
                entity_type: entity_type.to_string(),
                id: id.to_string(),
                field: field.name.clone(),
            });
        let mut request = GenerationRequest::new(target, context);
        if field.match_mode() == Some(MatchMode::Fuzzy) {
            request = request.generated_by(entity_type, &field.name);
        }

        let child = self.resolver.generate_entity(request).await?;
        let child_id = record_id(&child)
            .map(str::to_string)
            .ok_or_else(|| GraphError::provider(format!("{} created without an id", target)))?;

        let value = if field.is_array {
            Value::Array(vec![Value::String(child_id.clone())])
        } else {
            Value::String(child_id.clone())
        };
        let mut patch = Record::new();
        patch.insert(field.name.clone(), value);
        self.resolver
            .provider()
            .update(entity_type, id, patch)
            .await?;

        let meta = match field.match_mode() {
            Some(MatchMode::Fuzzy) => Some(RelationMeta::fuzzy(None)),
            _ => None,
        };
        self.resolver
            .provider()
            .relate(entity_type, id, &field.name, target, &child_id, meta)
            .await?;

        state.created += 1;
        state.types.insert(target.to_string());
        tracing::debug!(
            "Cascade generated {}({}) for {}.{} at depth {}",
            target,
            child_id,
            entity_type,
            field.name,
            depth
        );

        Ok(vec![(target.to_string(), child_id)])
    }

    /// Entity type holding `id` among the field's targets; a dangling id is a field failure
    async fn locate(&self, field: &FieldDescriptor, id: &str) -> GraphResult<String> {
        let Some(relation) = &field.relation else {
            return Err(GraphError::resolution(&field.base_type, &field.name, "not a relationship"));
        };
        for candidate in relation.target_types() {
            if self.resolver.provider().get(candidate, id).await?.is_some() {
                return Ok(candidate.to_string());
            }
        }
        Err(GraphError::NotFound {
            entity: relation.related_type.clone(),
            id: id.to_string(),
        })
    }

    fn report(
        &self,
        phase: CascadePhase,
        current_type: &str,
        depth: usize,
        field: Option<&str>,
        state: &CascadeState,
    ) {
        let Some(on_progress) = &self.options.on_progress else { return };
        on_progress(&CascadeProgress {
            phase,
            current_type: current_type.to_string(),
            depth,
            field: field.map(str::to_string),
            total_entities_created: state.created,
            types_generated: state.types.iter().cloned().collect(),
        });
    }
}

/// Identifiers already stored on a relation field
fn linked_ids(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(id)) if !id.is_empty() => vec![id.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
