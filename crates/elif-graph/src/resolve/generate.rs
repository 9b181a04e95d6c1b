//! Entity synthesis - Creates related entities on behalf of a parent

use serde_json::Value;
use uuid::Uuid;

use super::{BoxFuture, RelationResolver};
use crate::error::GraphResult;
use crate::generation::{GenerationContext, ParentRef};
use crate::provider::{record_id, Record, GENERATED_BY_KEY, GENERATED_KEY};
use crate::schema::{Direction, EntityNode, Operator};

/// A request to synthesize and persist one entity
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub entity_type: String,
    pub context: GenerationContext,
    /// Levels of required exact-forward relations generated before creation
    pub nested_depth: usize,
    /// `Type.field` recorded under `$generatedBy` when set
    pub provenance: Option<String>,
}

impl GenerationRequest {
    pub fn new<S: Into<String>>(entity_type: S, context: GenerationContext) -> Self {
        Self {
            entity_type: entity_type.into(),
            context,
            nested_depth: 0,
            provenance: None,
        }
    }

    pub fn nested(mut self, depth: usize) -> Self {
        self.nested_depth = depth;
        self
    }

    /// Tag the entity as generated by `Type.field`
    pub fn generated_by(mut self, entity_type: &str, field: &str) -> Self {
        self.provenance = Some(format!("{}.{}", entity_type, field));
        self
    }
}

impl<'a> RelationResolver<'a> {
    /// Synthesize, persist and return a new entity.
    ///
    /// Scalars come from the value generator, exact-backward fields pointing at
    /// the requesting parent receive its identifier, and required single
    /// exact-forward relations are generated first while `nested_depth` allows.
    pub fn generate_entity<'b>(
        &'b self,
        request: GenerationRequest,
    ) -> BoxFuture<'b, GraphResult<Record>> {
        Box::pin(async move {
            let node = self.graph.require(&request.entity_type)?;
            let id = Uuid::new_v4().to_string();

            let mut context = request.context.clone();
            context.entity_type = node.name.clone();
            if context.instructions.is_none() {
                context.instructions = node.instructions().map(str::to_string);
            }

            let mut data = self.synthesize_fields(node, &context).await?;

            if request.nested_depth > 0 {
                self.generate_nested(node, &id, request.nested_depth, &mut data)
                    .await?;
            }

            if let Some(provenance) = &request.provenance {
                data.insert(GENERATED_KEY.to_string(), Value::Bool(true));
                data.insert(
                    GENERATED_BY_KEY.to_string(),
                    Value::String(provenance.clone()),
                );
            }

            tracing::debug!(
                "Generating {}({}){}",
                node.name,
                id,
                context
                    .parent
                    .as_ref()
                    .map(|p| format!(" for {}.{}", p.entity_type, p.field))
                    .unwrap_or_default()
            );

            self.provider.create(&node.name, Some(&id), data).await
        })
    }

    /// Scalar values plus the backward link to the parent, nothing else
    pub(crate) async fn synthesize_fields(
        &self,
        node: &EntityNode,
        context: &GenerationContext,
    ) -> GraphResult<Record> {
        let mut data = Record::new();

        for field in node.scalar_fields() {
            if field.is_optional {
                continue;
            }
            let value = self.generator.generate_value(field, context).await?;
            data.insert(field.name.clone(), value);
        }

        if let Some(parent) = &context.parent {
            for field in node.fields_with_operator(Operator::ExactBackward) {
                let Some(relation) = &field.relation else { continue };
                if !relation
                    .target_types()
                    .contains(&parent.entity_type.as_str())
                {
                    continue;
                }
                let link = Value::String(parent.id.clone());
                data.insert(
                    field.name.clone(),
                    if field.is_array {
                        Value::Array(vec![link])
                    } else {
                        link
                    },
                );
            }
        }

        Ok(data)
    }

    async fn generate_nested(
        &self,
        node: &EntityNode,
        id: &str,
        depth: usize,
        data: &mut Record,
    ) -> GraphResult<()> {
        for field in node.fields_with_operator(Operator::ExactForward) {
            if field.is_optional || field.is_array || data.contains_key(&field.name) {
                continue;
            }
            let Some(related_type) = field.related_type() else { continue };

            let context = GenerationContext::new(related_type)
                .with_hint(field.prompt.clone())
                .with_parent(ParentRef {
                    entity_type: node.name.clone(),
                    id: id.to_string(),
                    field: field.name.clone(),
                });
            let request = GenerationRequest::new(related_type, context).nested(depth - 1);
            let child = self.generate_entity(request).await?;
            if let Some(child_id) = record_id(&child) {
                data.insert(field.name.clone(), Value::String(child_id.to_string()));
            }
        }
        Ok(())
    }

    /// True when an array field should not auto-generate: the target declares
    /// an exact or fuzzy backward link to `source` and has required scalars,
    /// so the relationship is populated from the other side.
    pub(crate) fn populated_from_target(&self, source: &str, target: &EntityNode) -> bool {
        let backward_to_source = target.relation_fields().any(|f| {
            f.direction() == Some(Direction::Backward)
                && f.relation
                    .as_ref()
                    .map(|r| r.target_types().contains(&source))
                    .unwrap_or(false)
        });
        backward_to_source && target.has_required_scalars()
    }

    /// Similarity threshold for a fuzzy field: field, then entity, then config
    pub(crate) fn threshold_for(&self, node: &EntityNode, field_threshold: Option<f64>) -> f64 {
        field_threshold
            .or_else(|| node.fuzzy_threshold())
            .unwrap_or(self.config.default_fuzzy_threshold)
    }
}
