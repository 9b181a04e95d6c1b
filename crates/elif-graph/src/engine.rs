//! Entity Graph - Facade wiring schema, provider, generator and configuration

use std::sync::Arc;

use serde_json::Value;

use crate::cascade::{CascadeGenerator, CascadeOptions, CascadeReport};
use crate::config::GraphConfig;
use crate::draft::{DraftOptions, DraftPipeline, EntityDraft, ResolveOptions, ResolvedEntity};
use crate::error::{GraphError, GraphResult};
use crate::generation::{FakeValueGenerator, ValueGenerator};
use crate::hydrate::Hydrated;
use crate::provider::{get_or_fail, record_id, Provider, Record};
use crate::resolve::RelationResolver;
use crate::schema::SchemaGraph;

/// Options for [`EntityGraph::create`]
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Identifier to create the entity with, generated when absent
    pub id: Option<String>,
    /// Cascade through forward relationships after creation
    pub cascade: Option<CascadeOptions>,
}

impl CreateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_cascade(mut self, options: CascadeOptions) -> Self {
        self.cascade = Some(options);
        self
    }
}

/// Schema-driven entity creation, drafting and hydration over a provider
///
/// The schema is read-only and shared; an `EntityGraph` can serve concurrent
/// create-calls.
#[derive(Clone)]
pub struct EntityGraph {
    schema: Arc<SchemaGraph>,
    provider: Arc<dyn Provider>,
    generator: Arc<dyn ValueGenerator>,
    config: GraphConfig,
}

impl EntityGraph {
    /// Validates union members before accepting the schema
    pub fn new(schema: SchemaGraph, provider: Arc<dyn Provider>) -> GraphResult<Self> {
        schema.validate_unions()?;
        Ok(Self {
            schema: Arc::new(schema),
            provider,
            generator: Arc::new(FakeValueGenerator::new()),
            config: GraphConfig::default(),
        })
    }

    /// Build from a JSON schema document
    pub fn from_value(schema: &Value, provider: Arc<dyn Provider>) -> GraphResult<Self> {
        Self::new(SchemaGraph::from_value(schema)?, provider)
    }

    pub fn with_generator(mut self, generator: Arc<dyn ValueGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_config(mut self, config: GraphConfig) -> GraphResult<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn schema(&self) -> &SchemaGraph {
        &self.schema
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    fn resolver(&self) -> RelationResolver<'_> {
        RelationResolver::new(
            &self.schema,
            self.provider.as_ref(),
            self.generator.as_ref(),
            &self.config,
        )
    }

    /// Resolve relationships, persist the entity and its edges
    pub async fn create(
        &self,
        entity_type: &str,
        data: Record,
        options: CreateOptions,
    ) -> GraphResult<Record> {
        let resolver = self.resolver();
        let record = resolver
            .create_entity(entity_type, data, options.id.as_deref())
            .await?;

        let Some(cascade) = options.cascade else { return Ok(record) };
        let id = record_id(&record)
            .map(str::to_string)
            .ok_or_else(|| GraphError::provider(format!("{} created without an id", entity_type)))?;
        CascadeGenerator::new(&resolver, cascade)
            .run(entity_type, &id)
            .await?;
        get_or_fail(self.provider.as_ref(), entity_type, &id).await
    }

    pub async fn get(&self, entity_type: &str, id: &str) -> GraphResult<Option<Hydrated>> {
        self.schema.require(entity_type)?;
        Ok(self
            .provider
            .get(entity_type, id)
            .await?
            .map(|record| self.hydrate(entity_type, record)))
    }

    pub fn hydrate(&self, entity_type: &str, record: Record) -> Hydrated {
        Hydrated::new(
            entity_type,
            record,
            Arc::clone(&self.schema),
            Arc::clone(&self.provider),
        )
    }

    pub async fn draft(
        &self,
        entity_type: &str,
        data: Record,
        options: &DraftOptions,
    ) -> GraphResult<EntityDraft> {
        let resolver = self.resolver();
        DraftPipeline::new(&resolver)
            .draft(entity_type, data, options)
            .await
    }

    pub async fn resolve(
        &self,
        draft: EntityDraft,
        options: &ResolveOptions,
    ) -> GraphResult<ResolvedEntity> {
        let resolver = self.resolver();
        DraftPipeline::new(&resolver).resolve(draft, options).await
    }

    /// Draft, resolve, then persist with the draft's identifier.
    ///
    /// Fields left unresolved in skip mode are cleared so placeholder text is
    /// never stored as an identifier; they then go through the regular passes.
    pub async fn create_two_phase(
        &self,
        entity_type: &str,
        data: Record,
        options: &ResolveOptions,
    ) -> GraphResult<Record> {
        let resolver = self.resolver();
        let pipeline = DraftPipeline::new(&resolver);

        let draft = pipeline
            .draft(entity_type, data, &DraftOptions::default())
            .await?;
        let mut resolved = pipeline.resolve(draft, options).await?;

        for failure in resolved.errors.iter().flatten() {
            resolved.data.remove(&failure.field);
        }

        let mut resolution = resolver
            .resolve(entity_type, resolved.data, &resolved.id)
            .await?;
        let mut edges = resolved.pending_edges;
        for edge in resolution.pending_edges.drain(..) {
            if !edges
                .iter()
                .any(|e| e.field == edge.field && e.to_type == edge.to_type && e.to_id == edge.to_id)
            {
                edges.push(edge);
            }
        }

        let record = self
            .provider
            .create(entity_type, Some(&resolved.id), resolution.data)
            .await?;
        resolver
            .persist_edges(entity_type, &resolved.id, &edges)
            .await?;
        Ok(record)
    }

    /// Cascade from an already persisted entity
    pub async fn cascade(
        &self,
        entity_type: &str,
        id: &str,
        options: CascadeOptions,
    ) -> GraphResult<CascadeReport> {
        let resolver = self.resolver();
        CascadeGenerator::new(&resolver, options)
            .run(entity_type, id)
            .await
    }
}
