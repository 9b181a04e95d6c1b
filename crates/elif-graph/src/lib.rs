//! # elif-graph: Schema-First Entity Graph for elif.rs
//!
//! Declare entities as plain maps of field definitions, and the relationships
//! between them with four operators:
//!
//! - `->Type` link by identifier, generating the related entity when missing
//! - `~>Type` reuse the most similar existing entity, generating on a miss
//! - `<-Type` filled with the parent's identifier when generated as a child
//! - `<~Type` ground to existing entities by similarity, never generating
//!
//! The crate parses definitions into a [`SchemaGraph`], resolves relationships
//! on create, runs depth-bounded cascades, supports a draft/resolve two-phase
//! flow, and hydrates stored records with lazy relation accessors. Storage is
//! abstracted behind the [`Provider`] trait; [`MemoryProvider`] is bundled.

pub mod cascade;
pub mod config;
pub mod draft;
pub mod engine;
pub mod error;
pub mod generation;
pub mod hydrate;
pub mod provider;
pub mod resolve;
pub mod schema;

pub use cascade::{CascadeFailure, CascadeOptions, CascadePhase, CascadeProgress, CascadeReport};
pub use config::GraphConfig;
pub use draft::{
    DraftOptions, EntityDraft, FieldFailure, OnError, Phase, RefEntry, ReferenceSpec,
    ResolveOptions, ResolvedEntity,
};
pub use engine::{CreateOptions, EntityGraph};
pub use error::{ConfigError, GraphError, GraphResult};
pub use generation::{FakeValueGenerator, GenerationContext, ValueGenerator};
pub use hydrate::{Hydrated, RelationRef, RelationValue};
pub use provider::{MemoryProvider, Provider, Record};
pub use resolve::{PendingEdge, RelationResolver, Resolution};
pub use schema::{
    parse_field, parse_operator, Cardinality, Direction, Edge, EdgeRecord, EntityNode,
    FieldDefinition, FieldDescriptor, MatchMode, Operator, SchemaGraph,
};
