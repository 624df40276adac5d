use regex::Regex;
use serde_json::{Map, Value};
use crate::core::error::{Error, Result};
use crate::core::types::type_name;
use crate::query::ast::{Condition, FieldFilter, Filter};

/// Parses JSON criteria in the usual document-database dialect into a `Filter`.
///
/// Examples:
/// - `{"nelements": 2}` -> equality
/// - `{"energy": {"$lt": -10.5}}` -> comparison
/// - `{"elements": {"$all": ["Li", "O"]}}` -> set containment
/// - `{"$or": [{"a": 1}, {"b": {"$exists": false}}]}` -> logical
///
/// Every failure is a `Configuration` error, raised before the store is touched.
#[derive(Debug, Clone)]
pub struct FilterParser {
    pub max_depth: usize,
}

impl Default for FilterParser {
    fn default() -> Self {
        FilterParser { max_depth: 32 }
    }
}

impl FilterParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_str(&self, input: &str) -> Result<Filter> {
        if input.trim().is_empty() {
            return Ok(Filter::MatchAll);
        }
        let value: Value = serde_json::from_str(input)
            .map_err(|e| Error::config(format!("criteria is not valid JSON: {}", e)))?;
        self.parse(&value)
    }

    pub fn parse(&self, criteria: &Value) -> Result<Filter> {
        match criteria {
            Value::Null => Ok(Filter::MatchAll),
            Value::Object(map) => self.parse_document(map, 0),
            other => Err(Error::config(format!(
                "criteria must be an object, got {}",
                type_name(other)
            ))),
        }
    }

    fn parse_document(&self, map: &Map<String, Value>, depth: usize) -> Result<Filter> {
        if depth > self.max_depth {
            return Err(Error::config(format!(
                "criteria nesting exceeds {} levels",
                self.max_depth
            )));
        }

        let mut clauses = Vec::with_capacity(map.len());
        for (key, value) in map {
            let clause = match key.as_str() {
                "$and" => Filter::And(self.parse_clause_list(key, value, depth)?),
                "$or" => Filter::Or(self.parse_clause_list(key, value, depth)?),
                "$nor" => Filter::Nor(self.parse_clause_list(key, value, depth)?),
                op if op.starts_with('$') => {
                    return Err(Error::config(format!("unknown top-level operator {}", op)));
                }
                path => self.parse_field(path, value)?,
            };
            clauses.push(clause);
        }

        Ok(match clauses.len() {
            0 => Filter::MatchAll,
            1 => clauses.remove(0),
            _ => Filter::And(clauses),
        })
    }

    fn parse_clause_list(&self, op: &str, value: &Value, depth: usize) -> Result<Vec<Filter>> {
        let items = value
            .as_array()
            .ok_or_else(|| Error::config(format!("{} expects an array", op)))?;
        if items.is_empty() {
            return Err(Error::config(format!("{} expects a non-empty array", op)));
        }
        items
            .iter()
            .map(|item| match item {
                Value::Object(map) => self.parse_document(map, depth + 1),
                other => Err(Error::config(format!(
                    "{} entries must be objects, got {}",
                    op,
                    type_name(other)
                ))),
            })
            .collect()
    }

    fn parse_field(&self, path: &str, value: &Value) -> Result<Filter> {
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(Error::config(format!("invalid field path '{}'", path)));
        }

        let conditions = match value {
            Value::Object(map) if is_operator_object(map)? => self.parse_conditions(path, map)?,
            literal => vec![Condition::Eq(literal.clone())],
        };

        Ok(Filter::Field(FieldFilter {
            path: path.to_string(),
            conditions,
        }))
    }

    fn parse_conditions(&self, path: &str, map: &Map<String, Value>) -> Result<Vec<Condition>> {
        let mut conditions = Vec::with_capacity(map.len());
        for (op, operand) in map {
            if op == "$options" {
                continue; // consumed by $regex
            }
            conditions.push(self.parse_condition(path, op, operand, map)?);
        }
        Ok(conditions)
    }

    fn parse_condition(
        &self,
        path: &str,
        op: &str,
        operand: &Value,
        siblings: &Map<String, Value>,
    ) -> Result<Condition> {
        let condition = match op {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Gt(operand.clone()),
            "$gte" => Condition::Gte(operand.clone()),
            "$lt" => Condition::Lt(operand.clone()),
            "$lte" => Condition::Lte(operand.clone()),
            "$in" => Condition::In(expect_array(path, op, operand)?),
            "$nin" => Condition::Nin(expect_array(path, op, operand)?),
            "$all" => Condition::All(expect_array(path, op, operand)?),
            "$exists" => match operand {
                Value::Bool(b) => Condition::Exists(*b),
                Value::Number(n) => Condition::Exists(n.as_f64().unwrap_or(0.0) != 0.0),
                _ => return Err(Error::config(format!("{}: $exists expects a boolean", path))),
            },
            "$size" => match operand.as_u64() {
                Some(n) => Condition::Size(n as usize),
                None => {
                    return Err(Error::config(format!(
                        "{}: $size expects a non-negative integer",
                        path
                    )))
                }
            },
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| Error::config(format!("{}: $regex expects a string", path)))?;
                let flags = siblings.get("$options").and_then(Value::as_str).unwrap_or("");
                Condition::Regex(compile_regex(path, pattern, flags)?)
            }
            "$not" => match operand {
                Value::Object(inner) if is_operator_object(inner)? => {
                    let mut nested = self.parse_conditions(path, inner)?;
                    if nested.len() != 1 {
                        return Err(Error::config(format!(
                            "{}: $not expects exactly one operator",
                            path
                        )));
                    }
                    Condition::Not(Box::new(nested.remove(0)))
                }
                _ => return Err(Error::config(format!("{}: $not expects an operator object", path))),
            },
            other => {
                return Err(Error::config(format!("{}: unknown operator {}", path, other)));
            }
        };
        Ok(condition)
    }
}

/// `{"$gt": 1}` is an operator object, `{"a": 1}` a literal, a mix is an error.
fn is_operator_object(map: &Map<String, Value>) -> Result<bool> {
    let ops = map.keys().filter(|k| k.starts_with('$')).count();
    if ops == 0 {
        Ok(false)
    } else if ops == map.len() {
        Ok(true)
    } else {
        Err(Error::config("cannot mix operators and literal fields in one condition"))
    }
}

fn expect_array(path: &str, op: &str, operand: &Value) -> Result<Vec<Value>> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| Error::config(format!("{}: {} expects an array", path, op)))
}

fn compile_regex(path: &str, pattern: &str, flags: &str) -> Result<Regex> {
    let mut prefix = String::new();
    for flag in flags.chars() {
        match flag {
            'i' | 'm' | 's' | 'x' => prefix.push(flag),
            other => {
                return Err(Error::config(format!("{}: unsupported regex option '{}'", path, other)))
            }
        }
    }
    let full = if prefix.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", prefix, pattern)
    };
    Regex::new(&full).map_err(|e| Error::config(format!("{}: bad regex: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::core::error::ErrorKind;

    #[test]
    fn empty_criteria_matches_all() {
        let parser = FilterParser::new();
        assert!(parser.parse(&json!({})).unwrap().is_match_all());
        assert!(parser.parse(&Value::Null).unwrap().is_match_all());
        assert!(parser.parse_str("  ").unwrap().is_match_all());
    }

    #[test]
    fn range_on_one_field_is_one_clause() {
        let filter = FilterParser::new()
            .parse(&json!({"nelements": {"$gte": 2, "$lte": 3}}))
            .unwrap();
        match filter {
            Filter::Field(field) => {
                assert_eq!(field.path, "nelements");
                assert_eq!(field.conditions.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn equality_lookup_sees_through_and() {
        let filter = FilterParser::new()
            .parse(&json!({"natural_key": "h:/a", "x": {"$gt": 1}}))
            .unwrap();
        assert_eq!(filter.equality_on("natural_key"), Some(&json!("h:/a")));
        assert_eq!(filter.equality_on("x"), None);
    }

    #[test]
    fn malformed_criteria_is_configuration_error() {
        let parser = FilterParser::new();
        for bad in [
            json!([1, 2]),
            json!({"$or": {}}),
            json!({"$or": []}),
            json!({"x": {"$between": [1, 2]}}),
            json!({"x": {"$in": 3}}),
            json!({"x": {"$gt": 1, "y": 2}}),
            json!({"x": {"$regex": "("}}),
            json!({"$where": "1"}),
            json!({"a..b": 1}),
        ] {
            let err = parser.parse(&bad).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Configuration, "{}", bad);
        }
        assert_eq!(parser.parse_str("{not json").unwrap_err().kind, ErrorKind::Configuration);
    }

    #[test]
    fn regex_options_apply() {
        let filter = FilterParser::new()
            .parse(&json!({"formula": {"$regex": "^li", "$options": "i"}}))
            .unwrap();
        match filter {
            Filter::Field(field) => match &field.conditions[0] {
                Condition::Regex(re) => assert!(re.is_match("LiFePO4")),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
