use serde::{Serialize, Deserialize};

/// Declarative index over one field or a tuple of fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn single(field: &str) -> Self {
        IndexSpec {
            name: field.to_string(),
            fields: vec![field.to_string()],
            unique: false,
        }
    }

    /// Name is the fields joined with `_`.
    pub fn compound(fields: &[&str]) -> Self {
        IndexSpec {
            name: fields.join("_"),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_single_field(&self) -> bool {
        self.fields.len() == 1
    }
}
