//! Edge derivation - Relationship edges read from the schema graph

use serde::{Deserialize, Serialize};

use super::graph::SchemaGraph;
use super::parser::{Direction, FieldDescriptor, MatchMode};

/// Relationship multiplicity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl Cardinality {
    /// array + backref -> many-to-many, array -> one-to-many, single -> many-to-one
    pub fn of(field: &FieldDescriptor) -> Self {
        match (field.is_array, field.backref().is_some()) {
            (true, true) => Cardinality::ManyToMany,
            (true, false) => Cardinality::OneToMany,
            (false, _) => Cardinality::ManyToOne,
        }
    }

    /// Multiplicity read from the other end
    pub fn inverse(self) -> Self {
        match self {
            Cardinality::ManyToOne => Cardinality::OneToMany,
            Cardinality::OneToMany => Cardinality::ManyToOne,
            Cardinality::ManyToMany => Cardinality::ManyToMany,
        }
    }
}

/// One relationship field seen as a graph edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub from: String,
    pub name: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backref: Option<String>,
    pub cardinality: Cardinality,
    pub direction: Direction,
    pub match_mode: MatchMode,
}

impl Edge {
    /// Derive the edge for a relation field declared on `owner`.
    ///
    /// Backward fields are flipped so `from` is always the side that declares
    /// the link and `to` the side being pointed at.
    pub fn from_field(owner: &str, field: &FieldDescriptor) -> Option<Self> {
        let relation = field.relation.as_ref()?;
        let direction = relation.direction();
        let cardinality = Cardinality::of(field);

        let (from, to, cardinality) = match direction {
            Direction::Forward => (owner.to_string(), relation.related_type.clone(), cardinality),
            Direction::Backward => (
                relation.related_type.clone(),
                owner.to_string(),
                cardinality.inverse(),
            ),
        };

        Some(Self {
            from,
            name: field.name.clone(),
            to,
            backref: relation.backref.clone(),
            cardinality,
            direction,
            match_mode: relation.match_mode(),
        })
    }

    /// Persisted edge record, optionally carrying a similarity score
    pub fn record(&self, similarity: Option<f64>) -> EdgeRecord {
        EdgeRecord {
            edge: self.clone(),
            similarity,
        }
    }
}

/// Edge shape persisted for graph introspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    #[serde(flatten)]
    pub edge: Edge,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

impl SchemaGraph {
    /// Every relationship edge in declaration order
    pub fn edges(&self) -> Vec<Edge> {
        self.entities()
            .flat_map(|entity| {
                entity
                    .relation_fields()
                    .filter_map(move |field| Edge::from_field(&entity.name, field))
            })
            .collect()
    }

    /// Edges declared by one entity
    pub fn edges_from(&self, entity_type: &str) -> Vec<Edge> {
        self.entity(entity_type)
            .map(|entity| {
                entity
                    .relation_fields()
                    .filter_map(|field| Edge::from_field(&entity.name, field))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph() -> SchemaGraph {
        SchemaGraph::from_value(&json!({
            "Post": {
                "title": "string",
                "author": "Author.posts",
                "tags": ["Tag.posts"],
                "comments": "->Comment[]",
                "company": "<-Company"
            },
            "Author": { "name": "string" },
            "Tag": { "label": "string" },
            "Comment": { "body": "string" },
            "Company": { "name": "string" }
        }))
        .unwrap()
    }

    #[test]
    fn test_cardinality_derivation() {
        let edges = graph().edges_from("Post");
        let by_name = |name: &str| edges.iter().find(|e| e.name == name).unwrap().clone();

        assert_eq!(by_name("author").cardinality, Cardinality::ManyToOne);
        assert_eq!(by_name("tags").cardinality, Cardinality::ManyToMany);
        assert_eq!(by_name("comments").cardinality, Cardinality::OneToMany);
    }

    #[test]
    fn test_backward_edges_are_flipped() {
        let edges = graph().edges_from("Post");
        let company = edges.iter().find(|e| e.name == "company").unwrap();

        assert_eq!(company.from, "Company");
        assert_eq!(company.to, "Post");
        assert_eq!(company.direction, Direction::Backward);
        assert_eq!(company.cardinality, Cardinality::OneToMany);
    }

    #[test]
    fn test_synthesized_inverse_edges() {
        let graph = graph();
        let posts = graph
            .edges_from("Author")
            .into_iter()
            .find(|e| e.name == "posts")
            .unwrap();

        assert_eq!(posts.from, "Post");
        assert_eq!(posts.to, "Author");
        assert_eq!(posts.backref.as_deref(), Some("author"));
    }

    #[test]
    fn test_edge_record_shape() {
        let edge = graph()
            .edges_from("Post")
            .into_iter()
            .find(|e| e.name == "author")
            .unwrap();
        let value = serde_json::to_value(edge.record(Some(0.91))).unwrap();

        assert_eq!(value["from"], "Post");
        assert_eq!(value["to"], "Author");
        assert_eq!(value["backref"], "posts");
        assert_eq!(value["cardinality"], "many-to-one");
        assert_eq!(value["direction"], "forward");
        assert_eq!(value["matchMode"], "exact");
        assert_eq!(value["similarity"], 0.91);
    }
}
