//! Field Definition Parser - Turns the compact field grammar into typed descriptors
//!
//! Grammar (applied left to right):
//!
//! ```text
//! <prompt>? <op>? Type[(<threshold>)]? ['.'<backref>]? ['[' ']']? '?'?
//! ```
//!
//! where `<op>` is one of `->`, `~>`, `<-`, `<~` and `Type` may be a `|`-joined
//! union. A single-element array definition (`["Tag"]`) parses the inner string
//! and forces the field to be an array.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of entity-level option keys (`$fuzzyThreshold`, `$instructions`)
pub const METADATA_SIGIL: char = '$';

/// Type names that never denote a relation
pub const PRIMITIVE_TYPES: &[&str] = &[
    "string", "number", "boolean", "date", "datetime", "json", "markdown", "url",
];

static THRESHOLD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(\s*([0-9]*\.?[0-9]+)\s*\)").expect("threshold pattern is valid")
});

/// Relationship operator declared in a field definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// `->` link or generate by identifier
    #[serde(rename = "->")]
    ExactForward,
    /// `~>` similarity search, generate on miss
    #[serde(rename = "~>")]
    FuzzyForward,
    /// `<-` populated from the parent that generates this entity
    #[serde(rename = "<-")]
    ExactBackward,
    /// `<~` ground to existing data by similarity, never generate
    #[serde(rename = "<~")]
    FuzzyBackward,
}

impl Operator {
    pub const ALL: [Operator; 4] = [
        Operator::ExactForward,
        Operator::FuzzyForward,
        Operator::ExactBackward,
        Operator::FuzzyBackward,
    ];

    /// Surface syntax of the operator
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::ExactForward => "->",
            Operator::FuzzyForward => "~>",
            Operator::ExactBackward => "<-",
            Operator::FuzzyBackward => "<~",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }

    /// `<` prefix means backward
    pub fn direction(self) -> Direction {
        match self {
            Operator::ExactForward | Operator::FuzzyForward => Direction::Forward,
            Operator::ExactBackward | Operator::FuzzyBackward => Direction::Backward,
        }
    }

    /// `~` anywhere means fuzzy
    pub fn match_mode(self) -> MatchMode {
        match self {
            Operator::FuzzyForward | Operator::FuzzyBackward => MatchMode::Fuzzy,
            Operator::ExactForward | Operator::ExactBackward => MatchMode::Exact,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Which side of the relationship declares it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

/// Identifier-based or similarity-based resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Exact,
    Fuzzy,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::Exact => f.write_str("exact"),
            MatchMode::Fuzzy => f.write_str("fuzzy"),
        }
    }
}

/// Recognised scalar types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Number,
    Boolean,
    Date,
    Datetime,
    Json,
    Markdown,
    Url,
}

impl ScalarType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "string" => Some(ScalarType::String),
            "number" => Some(ScalarType::Number),
            "boolean" => Some(ScalarType::Boolean),
            "date" => Some(ScalarType::Date),
            "datetime" => Some(ScalarType::Datetime),
            "json" => Some(ScalarType::Json),
            "markdown" => Some(ScalarType::Markdown),
            "url" => Some(ScalarType::Url),
            _ => None,
        }
    }
}

/// Raw field definition as written in a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldDefinition {
    /// `"Author.posts"`
    Text(String),
    /// `["Tag"]`
    List(String),
}

impl FieldDefinition {
    /// Read a definition from a JSON value (string or single-element string array)
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(FieldDefinition::Text(text.clone())),
            Value::Array(items) if items.len() == 1 => items[0]
                .as_str()
                .map(|inner| FieldDefinition::List(inner.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldDefinition::Text(text) | FieldDefinition::List(text) => text,
        }
    }
}

impl From<&str> for FieldDefinition {
    fn from(text: &str) -> Self {
        FieldDefinition::Text(text.to_string())
    }
}

/// Result of scanning a definition for a relationship operator
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOperator {
    pub prompt: Option<String>,
    pub operator: Operator,
    pub direction: Direction,
    pub match_mode: MatchMode,
    /// Type text following the operator, threshold annotation removed
    pub target_type: String,
    pub threshold: Option<f64>,
}

/// Relationship half of a field descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Primary target type (first member for unions)
    pub related_type: String,
    /// Field on the related entity pointing back at this one
    pub backref: Option<String>,
    /// Explicit operator, absent for implicit and synthesized relations
    pub operator: Option<Operator>,
    pub threshold: Option<f64>,
    /// Every member of a `|` union, empty otherwise
    pub union_types: Vec<String>,
    /// Synthesized as the inverse of another entity's field
    pub inverse: bool,
}

impl Relation {
    fn implicit(related_type: String, backref: Option<String>) -> Self {
        Self {
            related_type,
            backref,
            operator: None,
            threshold: None,
            union_types: Vec::new(),
            inverse: false,
        }
    }

    /// Inverse relations read backward even without an operator
    pub fn direction(&self) -> Direction {
        match self.operator {
            Some(op) => op.direction(),
            None if self.inverse => Direction::Backward,
            None => Direction::Forward,
        }
    }

    pub fn match_mode(&self) -> MatchMode {
        self.operator
            .map(Operator::match_mode)
            .unwrap_or(MatchMode::Exact)
    }

    pub fn is_union(&self) -> bool {
        !self.union_types.is_empty()
    }

    /// Types a search over this relation should consider
    pub fn target_types(&self) -> Vec<&str> {
        if self.union_types.is_empty() {
            vec![self.related_type.as_str()]
        } else {
            self.union_types.iter().map(String::as_str).collect()
        }
    }
}

/// Structured description of one entity field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub base_type: String,
    pub is_array: bool,
    pub is_optional: bool,
    /// Generation prompt (text before the operator, or a descriptive scalar)
    pub prompt: Option<String>,
    pub relation: Option<Relation>,
}

impl FieldDescriptor {
    pub fn is_relation(&self) -> bool {
        self.relation.is_some()
    }

    pub fn operator(&self) -> Option<Operator> {
        self.relation.as_ref().and_then(|r| r.operator)
    }

    /// Direction of an explicit operator
    pub fn direction(&self) -> Option<Direction> {
        self.operator().map(Operator::direction)
    }

    /// Match mode of an explicit operator
    pub fn match_mode(&self) -> Option<MatchMode> {
        self.operator().map(Operator::match_mode)
    }

    pub fn threshold(&self) -> Option<f64> {
        self.relation.as_ref().and_then(|r| r.threshold)
    }

    pub fn related_type(&self) -> Option<&str> {
        self.relation.as_ref().map(|r| r.related_type.as_str())
    }

    pub fn backref(&self) -> Option<&str> {
        self.relation.as_ref().and_then(|r| r.backref.as_deref())
    }

    pub fn union_types(&self) -> &[String] {
        self.relation
            .as_ref()
            .map(|r| r.union_types.as_slice())
            .unwrap_or(&[])
    }

    pub fn scalar_type(&self) -> Option<ScalarType> {
        if self.is_relation() {
            return None;
        }
        ScalarType::from_name(&self.base_type)
    }

    /// Canonical definition string for this descriptor
    pub fn definition(&self) -> String {
        let mut out = String::new();

        match &self.relation {
            Some(relation) => {
                if let Some(op) = relation.operator {
                    if let Some(prompt) = &self.prompt {
                        out.push_str(prompt);
                        out.push(' ');
                    }
                    out.push_str(op.symbol());
                }
                if relation.union_types.is_empty() {
                    out.push_str(&relation.related_type);
                } else {
                    out.push_str(&relation.union_types.join("|"));
                }
                if let Some(threshold) = relation.threshold {
                    out.push_str(&format!("({})", threshold));
                }
                if let Some(backref) = &relation.backref {
                    out.push('.');
                    out.push_str(backref);
                }
            }
            None => match &self.prompt {
                Some(prompt) if ScalarType::from_name(&self.base_type).is_none() => {
                    return prompt.clone();
                }
                _ => out.push_str(&self.base_type),
            },
        }

        if self.is_array {
            out.push_str("[]");
        }
        if self.is_optional {
            out.push('?');
        }
        out
    }
}

/// Returns true for entity-level option keys
pub fn is_metadata_key(name: &str) -> bool {
    name.starts_with(METADATA_SIGIL)
}

pub fn is_primitive(type_name: &str) -> bool {
    let lower = type_name.to_ascii_lowercase();
    PRIMITIVE_TYPES.contains(&lower.as_str())
}

fn is_pascal_case(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Find the first relationship operator and split the definition around it
pub fn parse_operator(definition: &str) -> Option<ParsedOperator> {
    let (index, operator) = definition.char_indices().find_map(|(index, _)| {
        let rest = &definition[index..];
        Operator::ALL
            .into_iter()
            .find(|op| rest.starts_with(op.symbol()))
            .map(|op| (index, op))
    })?;

    let prompt = definition[..index].trim();
    let mut target = definition[index + operator.symbol().len()..]
        .trim()
        .to_string();

    let annotation = THRESHOLD_PATTERN.captures(&target).and_then(|captures| {
        let value = captures[1].parse::<f64>().ok()?;
        Some((value, captures.get(0)?.range()))
    });

    let mut threshold = None;
    if let Some((value, range)) = annotation {
        threshold = Some(value);
        target.replace_range(range, "");
        target = target.trim().to_string();
    }

    Some(ParsedOperator {
        prompt: (!prompt.is_empty()).then(|| prompt.to_string()),
        operator,
        direction: operator.direction(),
        match_mode: operator.match_mode(),
        target_type: target,
        threshold,
    })
}

/// Parse one field definition into a descriptor
pub fn parse_field(name: &str, definition: &FieldDefinition) -> FieldDescriptor {
    let mut descriptor = parse_text(name, definition.as_str());
    if matches!(definition, FieldDefinition::List(_)) {
        descriptor.is_array = true;
    }
    descriptor
}

fn parse_text(name: &str, text: &str) -> FieldDescriptor {
    let parsed = parse_operator(text);

    let (prompt, operator, threshold, type_text) = match &parsed {
        Some(p) => (p.prompt.clone(), Some(p.operator), p.threshold, p.target_type.as_str()),
        None => (None, None, None, text.trim()),
    };

    let (type_text, is_array, is_optional) = strip_modifiers(type_text);

    // Free text such as "A short biography" describes a generated string
    if operator.is_none() && type_text.contains(char::is_whitespace) {
        return FieldDescriptor {
            name: name.to_string(),
            base_type: "string".to_string(),
            is_array: false,
            is_optional: false,
            prompt: Some(text.trim().to_string()),
            relation: None,
        };
    }

    let relation = if type_text.contains('|') {
        let union_types: Vec<String> = type_text
            .split('|')
            .map(str::trim)
            .filter(|member| !member.is_empty())
            .map(str::to_string)
            .collect();
        union_types.first().cloned().map(|first| Relation {
            related_type: first,
            backref: None,
            operator,
            threshold,
            union_types,
            inverse: false,
        })
    } else if let Some((related, backref)) = type_text.split_once('.') {
        Some(Relation {
            operator,
            threshold,
            ..Relation::implicit(related.trim().to_string(), Some(backref.trim().to_string()))
        })
    } else if operator.is_some() {
        Some(Relation {
            operator,
            threshold,
            ..Relation::implicit(type_text.to_string(), None)
        })
    } else if is_pascal_case(type_text) && !is_primitive(type_text) {
        Some(Relation::implicit(type_text.to_string(), None))
    } else {
        None
    };

    match relation {
        Some(relation) => FieldDescriptor {
            name: name.to_string(),
            base_type: relation.related_type.clone(),
            is_array,
            is_optional,
            prompt,
            relation: Some(relation),
        },
        None => FieldDescriptor {
            name: name.to_string(),
            base_type: type_text.to_string(),
            is_array,
            is_optional,
            prompt,
            relation: None,
        },
    }
}

fn strip_modifiers(text: &str) -> (&str, bool, bool) {
    let mut rest = text.trim();
    let mut is_array = false;
    let mut is_optional = false;

    loop {
        if let Some(stripped) = rest.strip_suffix('?') {
            is_optional = true;
            rest = stripped.trim_end();
        } else if let Some(stripped) = rest.strip_suffix("[]") {
            is_array = true;
            rest = stripped.trim_end();
        } else {
            break;
        }
    }

    (rest, is_array, is_optional)
}
