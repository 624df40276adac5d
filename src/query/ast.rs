use regex::Regex;
use serde_json::Value;

/// Parsed filter expression over storage paths.
#[derive(Debug, Clone)]
pub enum Filter {
    MatchAll,                // Empty criteria
    And(Vec<Filter>),        // All must match
    Or(Vec<Filter>),         // At least one must match
    Nor(Vec<Filter>),        // None may match
    Field(FieldFilter),      // Conditions on one path
}

/// All conditions on one dotted path; every condition must hold.
#[derive(Debug, Clone)]
pub struct FieldFilter {
    pub path: String,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
    Size(usize),
    All(Vec<Value>),
    Not(Box<Condition>),
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: Value) -> Self {
        Filter::Field(FieldFilter {
            path: path.into(),
            conditions: vec![Condition::Eq(value)],
        })
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, Filter::MatchAll)
    }

    /// Value pinned by a plain equality on `path`, looking through top-level
    /// conjunctions. Used for index lookups.
    pub fn equality_on(&self, path: &str) -> Option<&Value> {
        match self {
            Filter::Field(field) if field.path == path => {
                field.conditions.iter().find_map(|c| match c {
                    Condition::Eq(v) if !v.is_null() && !v.is_array() => Some(v),
                    _ => None,
                })
            }
            Filter::And(children) => children.iter().find_map(|c| c.equality_on(path)),
            _ => None,
        }
    }
}
