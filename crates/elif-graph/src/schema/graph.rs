//! Schema Graph Builder - Entity nodes, reference validation and backref synthesis

use indexmap::IndexMap;
use serde_json::Value;

use super::parser::{
    is_metadata_key, parse_field, Direction, FieldDefinition, FieldDescriptor, Operator, Relation,
};
use crate::error::{GraphError, GraphResult};

/// Entity name -> raw entity definition (field name or `$option` -> value)
pub type SchemaDefinition = IndexMap<String, IndexMap<String, Value>>;

/// Parsed entity with its ordered fields
#[derive(Debug, Clone, PartialEq)]
pub struct EntityNode {
    pub name: String,
    pub fields: IndexMap<String, FieldDescriptor>,
    /// Entity definition as written, including `$` options
    pub raw_definition: IndexMap<String, Value>,
}

impl EntityNode {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values().filter(|f| f.is_relation())
    }

    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values().filter(|f| !f.is_relation())
    }

    /// Fields declared with the given operator, in declaration order
    pub fn fields_with_operator(&self, operator: Operator) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields
            .values()
            .filter(move |f| f.operator() == Some(operator))
    }

    /// Entity-level `$fuzzyThreshold`
    pub fn fuzzy_threshold(&self) -> Option<f64> {
        self.raw_definition.get("$fuzzyThreshold").and_then(Value::as_f64)
    }

    /// Entity-level `$instructions` passed to generation
    pub fn instructions(&self) -> Option<&str> {
        self.raw_definition.get("$instructions").and_then(Value::as_str)
    }

    pub fn has_required_scalars(&self) -> bool {
        self.scalar_fields().any(|f| !f.is_optional)
    }

    /// First backward field that points at `entity_type`
    pub fn backward_field_to(&self, entity_type: &str) -> Option<&FieldDescriptor> {
        self.relation_fields().find(|f| {
            f.related_type() == Some(entity_type)
                && f.relation.as_ref().map(Relation::direction) == Some(Direction::Backward)
        })
    }

    /// First forward field that points at `entity_type`
    pub fn forward_field_to(&self, entity_type: &str) -> Option<&FieldDescriptor> {
        self.relation_fields().find(|f| {
            f.related_type() == Some(entity_type)
                && f.relation.as_ref().map(Relation::direction) == Some(Direction::Forward)
        })
    }
}

/// Read-only graph of every entity in a schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaGraph {
    entities: IndexMap<String, EntityNode>,
}

impl SchemaGraph {
    /// Build the graph: parse fields, validate references, synthesize inverse fields
    pub fn build(definition: &SchemaDefinition) -> GraphResult<Self> {
        let mut entities = IndexMap::new();

        for (entity_name, raw) in definition {
            let mut fields = IndexMap::new();
            for (field_name, value) in raw {
                if is_metadata_key(field_name) {
                    continue;
                }
                let field_definition = FieldDefinition::from_value(value).ok_or_else(|| {
                    GraphError::schema(
                        entity_name,
                        field_name,
                        "definition must be a string or a single-element array",
                    )
                })?;
                fields.insert(field_name.clone(), parse_field(field_name, &field_definition));
            }

            entities.insert(
                entity_name.clone(),
                EntityNode {
                    name: entity_name.clone(),
                    fields,
                    raw_definition: raw.clone(),
                },
            );
        }

        let mut graph = Self { entities };
        graph.validate_references()?;
        graph.downgrade_undeclared_references();
        let synthesized = graph.synthesize_backrefs();

        tracing::debug!(
            "Built schema graph with {} entities ({} backrefs synthesized)",
            graph.entities.len(),
            synthesized
        );

        Ok(graph)
    }

    /// Build from a JSON object of entity objects
    pub fn from_value(value: &Value) -> GraphResult<Self> {
        let entities = value.as_object().ok_or_else(|| {
            GraphError::schema("<schema>", "<root>", "schema must be an object of entities")
        })?;

        let mut definition = SchemaDefinition::new();
        for (entity_name, raw) in entities {
            let fields = raw.as_object().ok_or_else(|| {
                GraphError::schema(entity_name, "<root>", "entity definition must be an object")
            })?;
            definition.insert(
                entity_name.clone(),
                fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            );
        }

        Self::build(&definition)
    }

    pub fn from_json_str(source: &str) -> GraphResult<Self> {
        let value: Value = serde_json::from_str(source)?;
        Self::from_value(&value)
    }

    pub fn from_yaml_str(source: &str) -> GraphResult<Self> {
        let value: Value = serde_yaml::from_str(source)?;
        Self::from_value(&value)
    }

    pub fn entity(&self, name: &str) -> Option<&EntityNode> {
        self.entities.get(name)
    }

    /// Look up an entity, failing for undeclared types
    pub fn require(&self, name: &str) -> GraphResult<&EntityNode> {
        self.entities
            .get(name)
            .ok_or_else(|| GraphError::UnknownEntity(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityNode> {
        self.entities.values()
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Explicit-operator fields must target declared types (unions are checked
    /// separately by [`SchemaGraph::validate_unions`])
    fn validate_references(&self) -> GraphResult<()> {
        for entity in self.entities.values() {
            for field in entity.relation_fields() {
                let Some(relation) = &field.relation else { continue };
                if let Some(threshold) = relation.threshold {
                    if !(0.0..=1.0).contains(&threshold) {
                        return Err(GraphError::schema(
                            &entity.name,
                            &field.name,
                            format!("threshold {} must be between 0 and 1", threshold),
                        ));
                    }
                }
                if relation.operator.is_none() || relation.is_union() {
                    continue;
                }
                if relation.related_type == entity.name {
                    continue;
                }
                if !self.entities.contains_key(&relation.related_type) {
                    return Err(GraphError::schema(
                        &entity.name,
                        &field.name,
                        format!("references undeclared type '{}'", relation.related_type),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Implicit references to undeclared types are plain scalars
    fn downgrade_undeclared_references(&mut self) {
        let declared: Vec<String> = self.entities.keys().cloned().collect();

        for entity in self.entities.values_mut() {
            let owner = entity.name.clone();
            for field in entity.fields.values_mut() {
                let undeclared = match &field.relation {
                    Some(relation) => {
                        relation.operator.is_none()
                            && !relation.is_union()
                            && relation.related_type != owner
                            && !declared.contains(&relation.related_type)
                    }
                    None => false,
                };
                if undeclared {
                    tracing::debug!(
                        "{}.{} references undeclared type '{}', treating as scalar",
                        owner,
                        field.name,
                        field.base_type
                    );
                    field.relation = None;
                }
            }
        }
    }

    /// Create missing inverse fields for every relation with an explicit backref.
    ///
    /// Returns the number of fields created. Existing fields are never replaced,
    /// so running this again is a no-op.
    pub fn synthesize_backrefs(&mut self) -> usize {
        let mut planned: Vec<(String, FieldDescriptor)> = Vec::new();

        for entity in self.entities.values() {
            for field in entity.relation_fields() {
                let Some(relation) = &field.relation else { continue };
                let Some(backref) = &relation.backref else { continue };
                if relation.is_union() {
                    continue;
                }

                let Some(target) = self.entities.get(&relation.related_type) else {
                    continue;
                };
                let already_planned = planned
                    .iter()
                    .any(|(owner, f)| owner == &target.name && &f.name == backref);
                if target.fields.contains_key(backref) || already_planned {
                    continue;
                }

                planned.push((
                    target.name.clone(),
                    FieldDescriptor {
                        name: backref.clone(),
                        base_type: entity.name.clone(),
                        is_array: true,
                        is_optional: true,
                        prompt: None,
                        relation: Some(Relation {
                            related_type: entity.name.clone(),
                            backref: Some(field.name.clone()),
                            operator: None,
                            threshold: None,
                            union_types: Vec::new(),
                            inverse: true,
                        }),
                    },
                ));
            }
        }

        let count = planned.len();
        for (owner, descriptor) in planned {
            if let Some(target) = self.entities.get_mut(&owner) {
                tracing::debug!(
                    "Synthesized inverse field {}.{} -> {}",
                    owner,
                    descriptor.name,
                    descriptor.base_type
                );
                target.fields.insert(descriptor.name.clone(), descriptor);
            }
        }
        count
    }

    /// Every union member must be a declared entity
    pub fn validate_unions(&self) -> GraphResult<()> {
        for entity in self.entities.values() {
            for field in entity.relation_fields() {
                for member in field.union_types() {
                    if member != &entity.name && !self.entities.contains_key(member) {
                        return Err(GraphError::schema(
                            &entity.name,
                            &field.name,
                            format!("union member '{}' is not a declared type", member),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
