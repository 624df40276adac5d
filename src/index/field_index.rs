use std::collections::HashMap;
use rayon::prelude::*;
use roaring::RoaringBitmap;
use serde_json::{Number, Value};
use crate::core::error::{Error, Result};
use crate::core::types::{lookup_path, Document, RowId};
use crate::index::spec::IndexSpec;

/// Canonical index key: a JSON array of the normalized field values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey(pub String);

/// Store-side secondary index: key tuple -> rows holding it.
///
/// Array values are multikey: each element gets its own entry, so equality
/// lookups on a single element hit the index.
#[derive(Debug, Clone)]
pub struct FieldIndex {
    pub spec: IndexSpec,
    pub entries: HashMap<IndexKey, RoaringBitmap>,
}

impl FieldIndex {
    pub fn new(spec: IndexSpec) -> Self {
        FieldIndex {
            spec,
            entries: HashMap::new(),
        }
    }

    /// Build from existing rows; keys are computed in parallel. Fails on a
    /// duplicate key when the index is unique.
    pub fn build<'a, I>(spec: IndexSpec, rows: I) -> Result<Self>
    where
        I: IntoParallelIterator<Item = (&'a RowId, &'a Document)>,
    {
        let keyed: Vec<(RowId, Vec<IndexKey>)> = rows
            .into_par_iter()
            .map(|(row, doc)| (*row, keys_for(&spec, doc)))
            .collect();

        let mut index = FieldIndex::new(spec);
        for (row, keys) in keyed {
            index.check_unique(row, &keys)?;
            index.insert_keys(row, keys);
        }
        Ok(index)
    }

    pub fn keys(&self, doc: &Document) -> Vec<IndexKey> {
        keys_for(&self.spec, doc)
    }

    /// Conflict if another row already owns one of `keys`. Documents missing
    /// every indexed field are not constrained.
    pub fn check_unique(&self, row: RowId, keys: &[IndexKey]) -> Result<()> {
        if !self.spec.unique {
            return Ok(());
        }
        let missing = encode_key(&vec![Value::Null; self.spec.fields.len()]);
        for key in keys.iter().filter(|key| **key != missing) {
            if let Some(rows) = self.entries.get(key) {
                if rows.iter().any(|r| r != row) {
                    return Err(Error::conflict(format!(
                        "duplicate key {} for unique index {}",
                        key.0, self.spec.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn insert_keys(&mut self, row: RowId, keys: Vec<IndexKey>) {
        for key in keys {
            self.entries.entry(key).or_default().insert(row);
        }
    }

    pub fn remove_keys(&mut self, row: RowId, keys: &[IndexKey]) {
        for key in keys {
            if let Some(rows) = self.entries.get_mut(key) {
                rows.remove(row);
                if rows.is_empty() {
                    self.entries.remove(key);
                }
            }
        }
    }

    /// Rows whose single indexed field equals `value`.
    pub fn lookup(&self, value: &Value) -> RoaringBitmap {
        let key = encode_key(&[normalize(value)]);
        self.entries.get(&key).cloned().unwrap_or_default()
    }
}

fn keys_for(spec: &IndexSpec, doc: &Document) -> Vec<IndexKey> {
    // Cartesian product over the per-field candidates
    let mut tuples: Vec<Vec<Value>> = vec![Vec::with_capacity(spec.fields.len())];
    for field in &spec.fields {
        let candidates: Vec<Value> = match lookup_path(&doc.fields, field) {
            None => vec![Value::Null],
            Some(Value::Array(items)) if items.is_empty() => vec![Value::Null],
            Some(Value::Array(items)) => items.iter().map(normalize).collect(),
            Some(value) => vec![normalize(value)],
        };
        let mut next = Vec::with_capacity(tuples.len() * candidates.len());
        for tuple in &tuples {
            for candidate in &candidates {
                let mut extended = tuple.clone();
                extended.push(candidate.clone());
                next.push(extended);
            }
        }
        tuples = next;
    }

    let mut keys: Vec<IndexKey> = tuples.iter().map(|t| encode_key(t)).collect();
    keys.sort_by(|a, b| a.0.cmp(&b.0));
    keys.dedup();
    keys
}

fn encode_key(values: &[Value]) -> IndexKey {
    IndexKey(Value::Array(values.to_vec()).to_string())
}

/// Integral floats become integers so `2` and `2.0` share a key.
fn normalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::Number(Number::from(f as i64)),
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => Value::Object(
            map.iter().map(|(k, v)| (k.clone(), normalize(v))).collect(),
        ),
        other => other.clone(),
    }
}
