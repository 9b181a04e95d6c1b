//! Shared fixtures for elif-graph integration tests

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use elif_graph::provider::{ListOptions, RelationMeta, ScoredRecord, SearchOptions, SemanticSearchOptions};
use elif_graph::{
    EntityGraph, FakeValueGenerator, GraphConfig, GraphError, GraphResult, MemoryProvider,
    Provider, Record, SchemaGraph,
};
use serde_json::Value;

pub fn record(value: Value) -> Record {
    value.as_object().cloned().expect("fixture must be an object")
}

/// Route engine logs to the test harness, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn graph_with(schema: Value, provider: Arc<dyn Provider>, config: GraphConfig) -> EntityGraph {
    init_tracing();
    let schema = SchemaGraph::from_value(&schema).expect("schema should build");
    EntityGraph::new(schema, provider)
        .expect("schema should validate")
        .with_generator(Arc::new(FakeValueGenerator::seeded(42)))
        .with_config(config)
        .expect("config should validate")
}

pub fn graph(schema: Value, provider: Arc<dyn Provider>) -> EntityGraph {
    graph_with(schema, provider, GraphConfig::default())
}

/// Memory provider whose `create` fails for one entity type
pub struct FlakyProvider {
    pub inner: MemoryProvider,
    fail_type: String,
}

impl FlakyProvider {
    pub fn failing_on(entity_type: &str) -> Self {
        Self {
            inner: MemoryProvider::new(),
            fail_type: entity_type.to_string(),
        }
    }
}

#[async_trait]
impl Provider for FlakyProvider {
    async fn get(&self, entity_type: &str, id: &str) -> GraphResult<Option<Record>> {
        self.inner.get(entity_type, id).await
    }

    async fn list(&self, entity_type: &str, options: &ListOptions) -> GraphResult<Vec<Record>> {
        self.inner.list(entity_type, options).await
    }

    async fn search(
        &self,
        entity_type: &str,
        query: &str,
        options: &SearchOptions,
    ) -> GraphResult<Vec<Record>> {
        self.inner.search(entity_type, query, options).await
    }

    async fn create(
        &self,
        entity_type: &str,
        id: Option<&str>,
        data: Record,
    ) -> GraphResult<Record> {
        if entity_type == self.fail_type {
            return Err(GraphError::provider(format!("{} is read-only", entity_type)));
        }
        self.inner.create(entity_type, id, data).await
    }

    async fn update(&self, entity_type: &str, id: &str, data: Record) -> GraphResult<Record> {
        self.inner.update(entity_type, id, data).await
    }

    async fn delete(&self, entity_type: &str, id: &str) -> GraphResult<bool> {
        self.inner.delete(entity_type, id).await
    }

    async fn related(&self, entity_type: &str, id: &str, field: &str) -> GraphResult<Vec<Record>> {
        self.inner.related(entity_type, id, field).await
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
        self.inner
            .relate(from_type, from_id, field, to_type, to_id, meta)
            .await
    }

    async fn unrelate(
        &self,
        from_type: &str,
        from_id: &str,
        field: &str,
        to_type: &str,
        to_id: &str,
    ) -> GraphResult<()> {
        self.inner
            .unrelate(from_type, from_id, field, to_type, to_id)
            .await
    }

    fn supports_semantic_search(&self) -> bool {
        self.inner.supports_semantic_search()
    }

    async fn semantic_search(
        &self,
        entity_type: &str,
        query: &str,
        options: &SemanticSearchOptions,
    ) -> GraphResult<Vec<ScoredRecord>> {
        self.inner.semantic_search(entity_type, query, options).await
    }
}
