//! Similarity matching - Best-match lookups used by the fuzzy passes

use std::cmp::Ordering;

use super::RelationResolver;
use crate::error::GraphResult;
use crate::provider::SemanticSearchOptions;

/// Existing entity accepted as a match
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub entity_type: String,
    pub id: String,
    pub score: f64,
}

impl<'a> RelationResolver<'a> {
    /// Best match at or above `threshold` across `entity_types`.
    ///
    /// A provider without similarity search yields `None`, so callers fall
    /// back to generation instead of failing.
    pub async fn find_best_match(
        &self,
        entity_types: &[&str],
        query: &str,
        threshold: f64,
    ) -> GraphResult<Option<Match>> {
        let mut matches = self.find_matches(entity_types, query, threshold, Some(1)).await?;
        Ok(if matches.is_empty() {
            None
        } else {
            Some(matches.swap_remove(0))
        })
    }

    /// Every match at or above `threshold`, best first
    pub async fn find_matches(
        &self,
        entity_types: &[&str],
        query: &str,
        threshold: f64,
        limit: Option<usize>,
    ) -> GraphResult<Vec<Match>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        if !self.provider.supports_semantic_search() {
            tracing::debug!(
                "Provider lacks semantic search, no match for '{}' in {:?}",
                query,
                entity_types
            );
            return Ok(Vec::new());
        }

        let mut options = SemanticSearchOptions::new(threshold);
        options.limit = limit;

        let mut matches = Vec::new();
        for entity_type in entity_types {
            let hits = match self
                .provider
                .semantic_search(entity_type, query, &options)
                .await
            {
                Ok(hits) => hits,
                Err(err) if err.is_unsupported() => {
                    tracing::warn!("Semantic search unavailable: {}", err);
                    return Ok(Vec::new());
                }
                Err(err) => return Err(err),
            };

            matches.extend(hits.into_iter().filter_map(|hit| {
                if hit.score < threshold {
                    return None;
                }
                hit.id().map(|id| Match {
                    entity_type: entity_type.to_string(),
                    id: id.to_string(),
                    score: hit.score,
                })
            }));
        }

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        if let Some(limit) = limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }
}
