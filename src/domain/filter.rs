//! Typed payload filter language
//!
//! A tagged-union predicate tree evaluated against [`MemoryUnit`] payloads.
//! The in-memory vector store and the BM25 index evaluate filters directly;
//! the HTTP provider compiles the same tree to the remote service's wire
//! format. Fields map onto the payload indices declared in the collection
//! schema: `kind`, `context_level`, `scope`, `project`, `unit_type`,
//! `language` (keyword), `importance`, `last_accessed`, `created_at`,
//! `access_count` (range), and `tags` (set-valued).

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};
use super::types::MemoryUnit;

/// A scalar operand in a filter predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// String operand
    Str(String),
    /// Integer operand
    Int(i64),
    /// Float operand
    Float(f64),
    /// Boolean operand
    Bool(bool),
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl Scalar {
    fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// A filter predicate over unit payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    /// All children must match
    And(Vec<Filter>),
    /// At least one child must match
    Or(Vec<Filter>),
    /// Child must not match
    Not(Box<Filter>),
    /// Field equals the scalar
    Eq {
        /// Payload field name
        field: String,
        /// Expected value
        value: Scalar,
    },
    /// Field equals one of the scalars
    In {
        /// Payload field name
        field: String,
        /// Accepted values
        values: Vec<Scalar>,
    },
    /// Numeric field within `[lo, hi]`; either bound may be open
    Range {
        /// Payload field name
        field: String,
        /// Inclusive lower bound
        lo: Option<f64>,
        /// Inclusive upper bound
        hi: Option<f64>,
    },
    /// Set-valued field contains at least one of the values
    HasAny {
        /// Payload field name (currently only `tags`)
        field: String,
        /// Values to look for
        values: Vec<String>,
    },
}

/// Value of a payload field as seen by the filter evaluator.
enum FieldValue<'a> {
    Keyword(&'a str),
    Number(f64),
    Missing,
}

/// Keyword payload fields accepted in `Eq`/`In` predicates.
const KEYWORD_FIELDS: &[&str] = &[
    "kind",
    "context_level",
    "scope",
    "project",
    "unit_type",
    "language",
    "lifecycle_state",
    "file_path",
    "unit_name",
];

/// Range payload fields accepted in `Range` predicates.
const RANGE_FIELDS: &[&str] = &[
    "importance",
    "last_accessed",
    "created_at",
    "updated_at",
    "access_count",
    "start_line",
    "end_line",
];

impl Filter {
    /// Conjunction of `self` and `other`, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Filter {
        match self {
            Filter::And(mut children) => {
                children.push(other);
                Filter::And(children)
            }
            _ => Filter::And(vec![self, other]),
        }
    }

    /// `field == value` predicate.
    pub fn eq(field: impl Into<String>, value: impl Into<Scalar>) -> Filter {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field in values` predicate.
    pub fn is_in(field: impl Into<String>, values: Vec<Scalar>) -> Filter {
        Filter::In {
            field: field.into(),
            values,
        }
    }

    /// `lo <= field <= hi` predicate.
    pub fn range(field: impl Into<String>, lo: Option<f64>, hi: Option<f64>) -> Filter {
        Filter::Range {
            field: field.into(),
            lo,
            hi,
        }
    }

    /// `tags ∩ values ≠ ∅` predicate.
    pub fn has_any_tag(values: Vec<String>) -> Filter {
        Filter::HasAny {
            field: "tags".into(),
            values,
        }
    }

    /// Scope a filter to one project (plus global units when `include_global`).
    pub fn for_project(project: &str, include_global: bool) -> Filter {
        let scoped = Filter::eq("project", project);
        if include_global {
            Filter::Or(vec![scoped, Filter::eq("scope", "global")])
        } else {
            scoped
        }
    }

    /// Validate field names and operand shapes.
    ///
    /// Rejecting unknown fields up front keeps local evaluation and remote
    /// compilation in agreement about what a filter can mean.
    pub fn validate(&self) -> Result<()> {
        match self {
            Filter::And(children) | Filter::Or(children) => {
                for child in children {
                    child.validate()?;
                }
                Ok(())
            }
            Filter::Not(child) => child.validate(),
            Filter::Eq { field, .. } | Filter::In { field, .. } => {
                if KEYWORD_FIELDS.contains(&field.as_str())
                    || RANGE_FIELDS.contains(&field.as_str())
                {
                    Ok(())
                } else {
                    Err(Error::invalid_filter(format!("unknown field `{field}`")))
                }
            }
            Filter::Range { field, lo, hi } => {
                if !RANGE_FIELDS.contains(&field.as_str()) {
                    return Err(Error::invalid_filter(format!(
                        "field `{field}` does not support range predicates"
                    )));
                }
                if let (Some(lo), Some(hi)) = (lo, hi) {
                    if lo > hi {
                        return Err(Error::invalid_filter(format!(
                            "empty range on `{field}`: {lo} > {hi}"
                        )));
                    }
                }
                Ok(())
            }
            Filter::HasAny { field, .. } => {
                if field == "tags" {
                    Ok(())
                } else {
                    Err(Error::invalid_filter(format!(
                        "field `{field}` is not set-valued"
                    )))
                }
            }
        }
    }

    /// Evaluate the predicate against a unit payload.
    pub fn matches(&self, unit: &MemoryUnit) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|c| c.matches(unit)),
            Filter::Or(children) => children.iter().any(|c| c.matches(unit)),
            Filter::Not(child) => !child.matches(unit),
            Filter::Eq { field, value } => match field_value(unit, field) {
                FieldValue::Keyword(actual) => value.as_str() == Some(actual),
                FieldValue::Number(actual) => {
                    value.as_f64().is_some_and(|v| (v - actual).abs() < f64::EPSILON)
                }
                FieldValue::Missing => false,
            },
            Filter::In { field, values } => match field_value(unit, field) {
                FieldValue::Keyword(actual) => {
                    values.iter().any(|v| v.as_str() == Some(actual))
                }
                FieldValue::Number(actual) => values
                    .iter()
                    .any(|v| v.as_f64().is_some_and(|v| (v - actual).abs() < f64::EPSILON)),
                FieldValue::Missing => false,
            },
            Filter::Range { field, lo, hi } => match field_value(unit, field) {
                FieldValue::Number(actual) => {
                    lo.map_or(true, |lo| actual >= lo) && hi.map_or(true, |hi| actual <= hi)
                }
                _ => false,
            },
            Filter::HasAny { field, values } => {
                field == "tags" && values.iter().any(|v| unit.tags.contains(v))
            }
        }
    }
}

fn field_value<'a>(unit: &'a MemoryUnit, field: &str) -> FieldValue<'a> {
    match field {
        "kind" => FieldValue::Keyword(kind_str(unit)),
        "context_level" => FieldValue::Keyword(match unit.context_level {
            super::types::ContextLevel::UserPreference => "user_preference",
            super::types::ContextLevel::ProjectContext => "project_context",
            super::types::ContextLevel::SessionState => "session_state",
        }),
        "scope" => FieldValue::Keyword(match unit.scope {
            super::types::Scope::Global => "global",
            super::types::Scope::Project => "project",
        }),
        "lifecycle_state" => FieldValue::Keyword(match unit.lifecycle_state {
            super::types::LifecycleState::Active => "active",
            super::types::LifecycleState::Recent => "recent",
            super::types::LifecycleState::Archived => "archived",
            super::types::LifecycleState::Stale => "stale",
        }),
        "project" => match unit.project.as_deref() {
            Some(p) => FieldValue::Keyword(p),
            None => FieldValue::Missing,
        },
        "importance" => FieldValue::Number(f64::from(unit.importance)),
        "created_at" => FieldValue::Number(unit.created_at as f64),
        "updated_at" => FieldValue::Number(unit.updated_at as f64),
        "last_accessed" => FieldValue::Number(unit.last_accessed as f64),
        "access_count" => FieldValue::Number(unit.access_count as f64),
        "unit_type" => match unit.code() {
            Some(code) => FieldValue::Keyword(unit_type_str(code.unit_type)),
            None => FieldValue::Missing,
        },
        "language" => match unit.code() {
            Some(code) => FieldValue::Keyword(code.language.as_str()),
            None => FieldValue::Missing,
        },
        "file_path" => match unit.code() {
            Some(code) => FieldValue::Keyword(&code.file_path),
            None => FieldValue::Missing,
        },
        "unit_name" => match unit.code() {
            Some(code) => FieldValue::Keyword(&code.unit_name),
            None => FieldValue::Missing,
        },
        "start_line" => match unit.code() {
            Some(code) => FieldValue::Number(f64::from(code.start_line)),
            None => FieldValue::Missing,
        },
        "end_line" => match unit.code() {
            Some(code) => FieldValue::Number(f64::from(code.end_line)),
            None => FieldValue::Missing,
        },
        _ => FieldValue::Missing,
    }
}

fn kind_str(unit: &MemoryUnit) -> &'static str {
    match unit.kind {
        super::types::MemoryKind::Preference => "preference",
        super::types::MemoryKind::Fact => "fact",
        super::types::MemoryKind::Event => "event",
        super::types::MemoryKind::Workflow => "workflow",
        super::types::MemoryKind::Context => "context",
        super::types::MemoryKind::Code => "code",
    }
}

fn unit_type_str(unit_type: super::types::UnitType) -> &'static str {
    match unit_type {
        super::types::UnitType::Function => "function",
        super::types::UnitType::Method => "method",
        super::types::UnitType::Class => "class",
        super::types::UnitType::Module => "module",
        super::types::UnitType::Other => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ContextLevel, MemoryKind, MemoryUnit, Scope, UnitDetails};
    use std::collections::{BTreeSet, HashMap};
    use uuid::Uuid;

    fn unit(kind: MemoryKind, project: Option<&str>, tags: &[&str]) -> MemoryUnit {
        MemoryUnit {
            id: Uuid::new_v4(),
            content: "sample".into(),
            kind,
            scope: if project.is_some() {
                Scope::Project
            } else {
                Scope::Global
            },
            project: project.map(str::to_string),
            context_level: ContextLevel::ProjectContext,
            importance: 0.8,
            tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            metadata: HashMap::new(),
            created_at: 1_000,
            updated_at: 1_000,
            last_accessed: 2_000,
            access_count: 3,
            lifecycle_state: crate::domain::types::LifecycleState::Active,
            details: UnitDetails::Memory,
        }
    }

    #[test]
    fn eq_matches_keyword_fields() {
        let u = unit(MemoryKind::Preference, Some("acme"), &[]);
        assert!(Filter::eq("kind", "preference").matches(&u));
        assert!(Filter::eq("project", "acme").matches(&u));
        assert!(!Filter::eq("project", "other").matches(&u));
    }

    #[test]
    fn missing_fields_never_match() {
        let u = unit(MemoryKind::Fact, None, &[]);
        assert!(!Filter::eq("project", "acme").matches(&u));
        assert!(!Filter::eq("language", "rust").matches(&u));
        // ...unless negated
        assert!(Filter::Not(Box::new(Filter::eq("project", "acme"))).matches(&u));
    }

    #[test]
    fn range_is_inclusive_and_half_open() {
        let u = unit(MemoryKind::Fact, None, &[]);
        assert!(Filter::range("importance", Some(0.8), None).matches(&u));
        assert!(Filter::range("importance", None, Some(0.8)).matches(&u));
        assert!(!Filter::range("importance", Some(0.9), None).matches(&u));
    }

    #[test]
    fn has_any_over_tags() {
        let u = unit(MemoryKind::Fact, None, &["python", "data"]);
        assert!(Filter::has_any_tag(vec!["rust".into(), "data".into()]).matches(&u));
        assert!(!Filter::has_any_tag(vec!["go".into()]).matches(&u));
    }

    #[test]
    fn boolean_composition() {
        let u = unit(MemoryKind::Preference, Some("acme"), &["python"]);
        let f = Filter::eq("kind", "preference")
            .and(Filter::for_project("acme", true))
            .and(Filter::has_any_tag(vec!["python".into()]));
        assert!(f.matches(&u));
    }

    #[test]
    fn validate_rejects_unknown_fields_and_empty_ranges() {
        assert!(Filter::eq("kind", "fact").validate().is_ok());
        assert!(Filter::eq("nonsense", "x").validate().is_err());
        assert!(Filter::range("importance", Some(1.0), Some(0.0))
            .validate()
            .is_err());
        assert!(Filter::HasAny {
            field: "kind".into(),
            values: vec![]
        }
        .validate()
        .is_err());
    }
}
