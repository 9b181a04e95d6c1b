//! Engine configuration - tunables for fuzzy matching, generation depth and cascades

use std::env;
use std::str::FromStr;

use crate::error::ConfigError;

/// Similarity threshold used when neither the field nor the entity sets one
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.75;

/// Default cascade depth bound
pub const DEFAULT_CASCADE_MAX_DEPTH: usize = 3;

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct GraphConfig {
    /// Fallback similarity threshold for fuzzy passes
    pub default_fuzzy_threshold: f64,
    /// Minimum score a draft placeholder match needs to be reused
    pub draft_min_score: f64,
    /// Default depth bound for cascade generation
    pub cascade_max_depth: usize,
    /// How many levels of required exact-forward relations are generated eagerly
    /// when synthesizing a related entity
    pub nested_generation_depth: usize,
    /// Optional cap on matches linked by a fuzzy-backward array field;
    /// `None` links every match above the threshold
    pub backward_match_limit: Option<usize>,
}

impl GraphConfig {
    pub fn new() -> Self {
        Self {
            default_fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            draft_min_score: DEFAULT_FUZZY_THRESHOLD,
            cascade_max_depth: DEFAULT_CASCADE_MAX_DEPTH,
            nested_generation_depth: 1,
            backward_match_limit: None,
        }
    }

    /// Load configuration from `ELIF_GRAPH_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(value) = lookup("ELIF_GRAPH_FUZZY_THRESHOLD") {
            config.default_fuzzy_threshold =
                parse_value("default_fuzzy_threshold", &value, "number between 0 and 1")?;
        }

        if let Some(value) = lookup("ELIF_GRAPH_DRAFT_MIN_SCORE") {
            config.draft_min_score =
                parse_value("draft_min_score", &value, "number between 0 and 1")?;
        }

        if let Some(value) = lookup("ELIF_GRAPH_CASCADE_MAX_DEPTH") {
            config.cascade_max_depth =
                parse_value("cascade_max_depth", &value, "positive integer")?;
        }

        if let Some(value) = lookup("ELIF_GRAPH_NESTED_DEPTH") {
            config.nested_generation_depth =
                parse_value("nested_generation_depth", &value, "non-negative integer")?;
        }

        if let Some(value) = lookup("ELIF_GRAPH_BACKWARD_LIMIT") {
            config.backward_match_limit =
                Some(parse_value("backward_match_limit", &value, "positive integer")?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("default_fuzzy_threshold", self.default_fuzzy_threshold),
            ("draft_min_score", self.draft_min_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    expected: "number between 0 and 1".to_string(),
                });
            }
        }

        if self.cascade_max_depth == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "cascade_max_depth must be greater than 0".to_string(),
            });
        }

        if self.backward_match_limit == Some(0) {
            return Err(ConfigError::ValidationFailed {
                message: "backward_match_limit must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.default_fuzzy_threshold = threshold;
        self
    }

    pub fn with_draft_min_score(mut self, score: f64) -> Self {
        self.draft_min_score = score;
        self
    }

    pub fn with_cascade_max_depth(mut self, depth: usize) -> Self {
        self.cascade_max_depth = depth;
        self
    }

    pub fn with_nested_generation_depth(mut self, depth: usize) -> Self {
        self.nested_generation_depth = depth;
        self
    }

    pub fn with_backward_match_limit(mut self, limit: usize) -> Self {
        self.backward_match_limit = Some(limit);
        self
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_value<T: FromStr>(field: &str, value: &str, expected: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GraphConfig::default();
        assert_eq!(config.default_fuzzy_threshold, 0.75);
        assert_eq!(config.cascade_max_depth, 3);
        assert_eq!(config.backward_match_limit, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = GraphConfig::from_lookup(lookup(&[
            ("ELIF_GRAPH_FUZZY_THRESHOLD", "0.6"),
            ("ELIF_GRAPH_CASCADE_MAX_DEPTH", "5"),
            ("ELIF_GRAPH_BACKWARD_LIMIT", "10"),
        ]))
        .unwrap();

        assert_eq!(config.backward_match_limit, Some(10));

        assert_eq!(config.default_fuzzy_threshold, 0.6);
        assert_eq!(config.cascade_max_depth, 5);
        assert_eq!(config.draft_min_score, DEFAULT_FUZZY_THRESHOLD);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = GraphConfig::from_lookup(lookup(&[("ELIF_GRAPH_FUZZY_THRESHOLD", "high")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "default_fuzzy_threshold"));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let config = GraphConfig::new().with_fuzzy_threshold(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_depth_rejected() {
        let config = GraphConfig::new().with_cascade_max_depth(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn test_zero_backward_limit_rejected() {
        let config = GraphConfig::new().with_backward_match_limit(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed { .. })
        ));
    }
}
