//! Value generation - Scalars for synthesized entities and draft placeholder text
//!
//! [`ValueGenerator`] is the seam where a model-backed generator plugs in. The
//! bundled [`FakeValueGenerator`] produces realistic-looking fake data.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use crate::error::GraphResult;
use crate::schema::{FieldDescriptor, ScalarType};

/// Entity that triggered a generation
#[derive(Debug, Clone, PartialEq)]
pub struct ParentRef {
    pub entity_type: String,
    pub id: String,
    pub field: String,
}

/// What is being generated and why
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationContext {
    pub entity_type: String,
    /// Hint or placeholder text the new entity should reflect
    pub hint: Option<String>,
    /// Entity-level `$instructions`
    pub instructions: Option<String>,
    pub parent: Option<ParentRef>,
}

impl GenerationContext {
    pub fn new<S: Into<String>>(entity_type: S) -> Self {
        Self {
            entity_type: entity_type.into(),
            ..Self::default()
        }
    }

    pub fn with_hint<S: Into<String>>(mut self, hint: Option<S>) -> Self {
        self.hint = hint.map(Into::into);
        self
    }

    pub fn with_instructions(mut self, instructions: Option<&str>) -> Self {
        self.instructions = instructions.map(str::to_string);
        self
    }

    pub fn with_parent(mut self, parent: ParentRef) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Produces field values and natural-language placeholders
#[async_trait]
pub trait ValueGenerator: Send + Sync {
    /// Value for a scalar field of the entity described by `context`
    async fn generate_value(
        &self,
        field: &FieldDescriptor,
        context: &GenerationContext,
    ) -> GraphResult<Value>;

    /// Short natural-language text answering `prompt`
    async fn generate_text(&self, prompt: &str, context: &GenerationContext) -> GraphResult<String>;
}

const WORDS: &[&str] = &[
    "amber", "harbor", "silver", "meadow", "quiet", "lantern", "summit", "willow", "coastal",
    "ember", "granite", "orchard", "river", "velvet", "northern", "canyon", "cedar", "atlas",
];

const FIRST_NAMES: &[&str] = &[
    "Alice", "Bob", "Charlie", "Diana", "Eve", "Frank", "Grace", "Henry", "Ivy", "Jack", "Kate",
    "Liam", "Mia", "Noah", "Olivia", "Peter", "Quinn", "Ruby", "Sam", "Tina",
];

const LAST_NAMES: &[&str] = &[
    "Anderson", "Brown", "Davis", "Evans", "Fisher", "Garcia", "Harris", "Johnson", "King",
    "Lopez", "Miller", "Nelson", "Parker", "Roberts", "Smith", "Taylor", "Young", "Zhang",
];

/// Random fake data generator
#[derive(Debug)]
pub struct FakeValueGenerator {
    rng: Mutex<StdRng>,
}

impl Default for FakeValueGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeValueGenerator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generator for tests and reproducible fixtures
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut guard = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn pick(&self, choices: &[&str]) -> String {
        self.with_rng(|rng| choices.choose(rng).copied().unwrap_or_default().to_string())
    }

    fn number(&self, min: i64, max: i64) -> i64 {
        self.with_rng(|rng| rng.gen_range(min..=max))
    }

    fn words(&self, count: usize) -> String {
        (0..count)
            .map(|_| self.pick(WORDS))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn text_for(&self, field: &FieldDescriptor, context: &GenerationContext) -> String {
        let name = field.name.to_lowercase();

        if let Some(hint) = &context.hint {
            if is_label_field(&name) {
                return hint.clone();
            }
        }

        if name.contains("email") {
            let local = self.pick(FIRST_NAMES).to_lowercase();
            return format!("{}{:03}@example.com", local, self.number(1, 999));
        }
        if name == "name" || name.ends_with("name") {
            return format!("{} {}", self.pick(FIRST_NAMES), self.pick(LAST_NAMES));
        }
        if name == "title" || name == "label" || name == "headline" {
            return title_case(&self.words(3));
        }

        match &field.prompt {
            Some(prompt) => format!("{} ({})", prompt.trim_end_matches('?'), self.words(2)),
            None => format!("{} {}", humanize(&field.name), self.words(2)),
        }
    }

    fn scalar(&self, field: &FieldDescriptor, context: &GenerationContext) -> Value {
        match field.scalar_type().unwrap_or(ScalarType::String) {
            ScalarType::String => Value::String(self.text_for(field, context)),
            ScalarType::Number => json!(self.number(1, 1000)),
            ScalarType::Boolean => json!(self.with_rng(|rng| rng.gen_bool(0.5))),
            ScalarType::Date => {
                let days = self.number(0, 365);
                json!((Utc::now() - Duration::days(days)).date_naive().to_string())
            }
            ScalarType::Datetime => {
                let minutes = self.number(0, 60 * 24 * 30);
                json!((Utc::now() - Duration::minutes(minutes)).to_rfc3339())
            }
            ScalarType::Json => json!({}),
            ScalarType::Markdown => Value::String(format!(
                "# {}\n\n{}.",
                title_case(&self.words(3)),
                self.words(8)
            )),
            ScalarType::Url => Value::String(format!(
                "https://example.com/{}-{}",
                self.words(2).replace(' ', "-"),
                self.number(1, 9999)
            )),
        }
    }
}

#[async_trait]
impl ValueGenerator for FakeValueGenerator {
    async fn generate_value(
        &self,
        field: &FieldDescriptor,
        context: &GenerationContext,
    ) -> GraphResult<Value> {
        if field.is_array {
            let count = self.number(1, 3) as usize;
            return Ok(Value::Array(
                (0..count).map(|_| self.scalar(field, context)).collect(),
            ));
        }
        Ok(self.scalar(field, context))
    }

    async fn generate_text(&self, prompt: &str, context: &GenerationContext) -> GraphResult<String> {
        if let Some(hint) = &context.hint {
            return Ok(hint.clone());
        }
        let text = prompt.trim().trim_end_matches('?').trim();
        Ok(if text.is_empty() {
            humanize(&context.entity_type)
        } else {
            text.to_string()
        })
    }
}

/// Fields that carry the display label of an entity
pub fn is_label_field(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "name" | "title" | "label" | "headline" | "term" | "topic"
    )
}

/// `authorName` -> `author name`
pub fn humanize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c == '_' || c == '-' {
            out.push(' ');
        } else if c.is_uppercase() && i > 0 {
            out.push(' ');
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
