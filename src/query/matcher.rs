use std::cmp::Ordering;
use serde_json::Value;
use crate::core::types::{lookup_path, Document};
use crate::query::ast::{Condition, FieldFilter, Filter};

/// Evaluates a parsed `Filter` against stored documents.
///
/// Array fields match a condition when the array itself or any element does,
/// so `{"elements": "O"}` finds every document containing oxygen.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterMatcher;

impl FilterMatcher {
    pub fn new() -> Self {
        FilterMatcher
    }

    pub fn matches(&self, doc: &Document, filter: &Filter) -> bool {
        match filter {
            Filter::MatchAll => true,
            Filter::And(children) => children.iter().all(|f| self.matches(doc, f)),
            Filter::Or(children) => children.iter().any(|f| self.matches(doc, f)),
            Filter::Nor(children) => !children.iter().any(|f| self.matches(doc, f)),
            Filter::Field(field) => self.matches_field(doc, field),
        }
    }

    fn matches_field(&self, doc: &Document, field: &FieldFilter) -> bool {
        let value = lookup_path(&doc.fields, &field.path);
        field
            .conditions
            .iter()
            .all(|condition| self.check(value, condition))
    }

    fn check(&self, value: Option<&Value>, condition: &Condition) -> bool {
        match condition {
            Condition::Eq(expected) => equals_any(value, expected),
            Condition::Ne(expected) => !equals_any(value, expected),
            Condition::Gt(bound) => compares(value, bound, |o| o == Ordering::Greater),
            Condition::Gte(bound) => compares(value, bound, |o| o != Ordering::Less),
            Condition::Lt(bound) => compares(value, bound, |o| o == Ordering::Less),
            Condition::Lte(bound) => compares(value, bound, |o| o != Ordering::Greater),
            Condition::In(options) => options.iter().any(|o| equals_any(value, o)),
            Condition::Nin(options) => !options.iter().any(|o| equals_any(value, o)),
            Condition::Exists(wanted) => value.is_some() == *wanted,
            Condition::Regex(re) => match value {
                Some(Value::String(s)) => re.is_match(s),
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| item.as_str().map(|s| re.is_match(s)).unwrap_or(false)),
                _ => false,
            },
            Condition::Size(n) => matches!(value, Some(Value::Array(items)) if items.len() == *n),
            Condition::All(required) => match value {
                Some(Value::Array(items)) => required
                    .iter()
                    .all(|r| items.iter().any(|item| values_equal(item, r))),
                Some(single) => required.iter().all(|r| values_equal(single, r)),
                None => false,
            },
            Condition::Not(inner) => !self.check(value, inner),
        }
    }
}

/// Equality with array-any semantics; `null` also matches a missing field.
fn equals_any(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        None => expected.is_null(),
        Some(actual) => {
            if values_equal(actual, expected) {
                return true;
            }
            match actual {
                Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
                _ => false,
            }
        }
    }
}

/// Range comparison; only same-type pairs compare, arrays match on any element.
fn compares(value: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        None => false,
        Some(Value::Array(items)) if !bound.is_array() => items
            .iter()
            .any(|item| comparable(item, bound).map(&accept).unwrap_or(false)),
        Some(actual) => comparable(actual, bound).map(accept).unwrap_or(false),
    }
}

fn comparable(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Structural equality where numbers compare by value (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map(|y| values_equal(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Total order used for sorting: missing < null < numbers < strings < objects
/// < arrays < booleans.
pub fn cmp_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Object(_)) => 4,
            Some(Value::Array(_)) => 5,
            Some(Value::Bool(_)) => 6,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .unwrap_or(f64::NAN)
            .partial_cmp(&y.as_f64().unwrap_or(f64::NAN))
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Array(xs)), Some(Value::Array(ys))) => {
            for (x, y) in xs.iter().zip(ys) {
                let ord = cmp_values(Some(x), Some(y));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            xs.len().cmp(&ys.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}
