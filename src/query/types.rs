use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sort order for query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,   // Ascending: 0 → 9, A → Z
    Desc,  // Descending: 9 → 0, Z → A
}

/// One result row: requested names in request order, `None` when absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub columns: Vec<(String, Option<Value>)>,
}

impl Row {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .and_then(|(_, value)| value.as_ref())
    }

    /// JSON object view; absent values become `null`.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.columns
                .iter()
                .map(|(name, value)| (name.clone(), value.clone().unwrap_or(Value::Null)))
                .collect(),
        )
    }
}
