use std::collections::HashSet;
use std::sync::Arc;
use serde_json::{json, Map, Value};
use tracing::debug;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::types::Document;
use crate::query::aliases::AliasMap;
use crate::query::ast::Filter;
use crate::query::parser::FilterParser;
use crate::query::types::{Row, SortOrder};
use crate::storage::cursor::Cursor;
use crate::storage::{DocumentStore, FindOptions, DEFAULT_BATCH_SIZE};

/// Translates external property names and criteria into store queries.
///
/// Stateless apart from the alias map, so one engine can serve many callers
/// concurrently.
pub struct QueryEngine {
    store: Arc<dyn DocumentStore>,
    collection: String,
    aliases: Arc<AliasMap>,
    parser: FilterParser,
    batch_size: usize,
}

/// A query after alias resolution, ready to run.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub filter: Filter,
    pub projection: Option<Vec<String>>,
    pub columns: Vec<Column>,
}

/// Output column: external name plus candidate storage paths in order.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub paths: Vec<String>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn DocumentStore>, collection: &str, aliases: Arc<AliasMap>) -> Self {
        QueryEngine {
            store,
            collection: collection.to_string(),
            aliases,
            parser: FilterParser::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Default aliases, overridden by the file named in `aliasesConfig`.
    pub fn from_config(store: Arc<dyn DocumentStore>, config: &Config) -> Result<Self> {
        let mut aliases = AliasMap::with_defaults();
        if let Some(path) = &config.aliases_config {
            aliases.merge(AliasMap::load(path)?);
        }
        Ok(Self::new(store, &config.collection, Arc::new(aliases)).with_batch_size(config.query_batch_size))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn aliases(&self) -> &AliasMap {
        &self.aliases
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Rewrite criteria keys to storage paths. Operator objects and values
    /// pass through untouched.
    ///
    /// A name with fallback paths is tested against the first path present,
    /// the same one its projected column shows. Keys that land on the same
    /// path are all kept, joined under `$and`.
    pub fn translate_criteria(&self, criteria: &Value) -> Value {
        let Value::Object(map) = criteria else {
            return criteria.clone();
        };

        let mut clauses: Vec<(String, Value)> = Vec::with_capacity(map.len());
        for (key, value) in map {
            match key.as_str() {
                "$and" | "$or" | "$nor" => {
                    let translated = match value {
                        Value::Array(items) => Value::Array(
                            items.iter().map(|item| self.translate_criteria(item)).collect(),
                        ),
                        other => other.clone(),
                    };
                    clauses.push((key.clone(), translated));
                }
                op if op.starts_with('$') => clauses.push((key.clone(), value.clone())),
                name => {
                    let paths = self.aliases.resolve(name);
                    match paths.as_slice() {
                        [path] => clauses.push((path.clone(), value.clone())),
                        _ => clauses.push(("$or".to_string(), first_present(&paths, value))),
                    }
                }
            }
        }

        let mut out = Map::with_capacity(clauses.len());
        let mut repeated = Vec::new();
        for (path, value) in clauses {
            if out.contains_key(&path) {
                repeated.push(json!({ path: value }));
            } else {
                out.insert(path, value);
            }
        }
        if repeated.is_empty() {
            Value::Object(out)
        } else {
            repeated.insert(0, Value::Object(out));
            json!({ "$and": repeated })
        }
    }

    /// Resolve names and parse criteria. Malformed criteria fail here, before
    /// any store round trip.
    pub fn compile(&self, properties: &[&str], criteria: Option<&Value>) -> Result<CompiledQuery> {
        let filter = match criteria {
            Some(criteria) => self.parser.parse(&self.translate_criteria(criteria))?,
            None => Filter::MatchAll,
        };

        let columns: Vec<Column> = properties
            .iter()
            .map(|name| Column {
                name: name.to_string(),
                paths: self.aliases.resolve(name),
            })
            .collect();

        let projection = if columns.is_empty() {
            None
        } else {
            let mut seen = HashSet::new();
            Some(
                columns
                    .iter()
                    .flat_map(|c| c.paths.iter().cloned())
                    .filter(|p| seen.insert(p.clone()))
                    .collect(),
            )
        };

        Ok(CompiledQuery {
            filter,
            projection,
            columns,
        })
    }

    /// Stream rows of the requested properties for documents matching
    /// `criteria`. An empty property list returns whole documents.
    pub fn query(&self, properties: &[&str], criteria: Option<&Value>) -> Result<QueryResults> {
        self.run(self.compile(properties, criteria)?, None, None)
    }

    /// Like `query`, ordered by `sort_property` and optionally limited.
    pub fn query_sorted(
        &self,
        properties: &[&str],
        criteria: Option<&Value>,
        sort_property: &str,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<QueryResults> {
        let compiled = self.compile(properties, criteria)?;
        let sort = (self.aliases.primary(sort_property), order);
        self.run(compiled, Some(sort), limit)
    }

    pub fn query_one(&self, properties: &[&str], criteria: Option<&Value>) -> Result<Option<Row>> {
        let compiled = self.compile(properties, criteria)?;
        self.run(compiled, None, Some(1))?.next().transpose()
    }

    pub fn count(&self, criteria: Option<&Value>) -> Result<usize> {
        let compiled = self.compile(&[], criteria)?;
        self.store.count(&self.collection, &compiled.filter)
    }

    fn run(
        &self,
        compiled: CompiledQuery,
        sort: Option<(String, SortOrder)>,
        limit: Option<usize>,
    ) -> Result<QueryResults> {
        let options = FindOptions {
            projection: compiled.projection,
            sort,
            limit,
            batch_size: self.batch_size,
        };
        debug!(collection = %self.collection, filter = ?compiled.filter, "running query");
        let cursor = self.store.find(&self.collection, &compiled.filter, options)?;
        Ok(QueryResults {
            cursor,
            columns: compiled.columns,
        })
    }
}

/// Branches of an `$or` where `condition` applies to the first of `paths`
/// that exists, or to the primary one when none does.
fn first_present(paths: &[String], condition: &Value) -> Value {
    let missing = |path: &String| json!({ path: { "$exists": false } });
    let mut branches: Vec<Value> = paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let mut all: Vec<Value> = paths[..i].iter().map(missing).collect();
            all.push(json!({ path: { "$exists": true } }));
            all.push(json!({ path: condition }));
            json!({ "$and": all })
        })
        .collect();

    let mut none: Vec<Value> = paths.iter().map(missing).collect();
    none.push(json!({ paths[0].as_str(): condition }));
    branches.push(json!({ "$and": none }));
    Value::Array(branches)
}

/// Lazy rows over a store cursor. Finite and not restartable; query again to
/// see current store state.
pub struct QueryResults {
    cursor: Cursor,
    columns: Vec<Column>,
}

impl QueryResults {
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn to_row(&self, doc: Document) -> Row {
        if self.columns.is_empty() {
            return Row {
                columns: doc.fields.into_iter().map(|(k, v)| (k, Some(v))).collect(),
            };
        }
        let columns = self
            .columns
            .iter()
            .map(|column| {
                let value = column.paths.iter().find_map(|path| doc.get_path(path)).cloned();
                (column.name.clone(), value)
            })
            .collect();
        Row { columns }
    }
}

impl Iterator for QueryResults {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let doc = self.cursor.next()?;
        Some(doc.map(|doc| self.to_row(doc)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::core::error::ErrorKind;
    use crate::storage::memory::MemoryStore;

    fn engine_with(docs: Vec<Value>) -> QueryEngine {
        let store = Arc::new(MemoryStore::new());
        for doc in docs {
            store.insert("tasks", Document::from_value(doc).unwrap()).unwrap();
        }
        QueryEngine::new(store, "tasks", Arc::new(AliasMap::with_defaults()))
    }

    #[test]
    fn translates_nested_logical_criteria() {
        let engine = engine_with(vec![]);
        let translated = engine.translate_criteria(&json!({
            "$or": [{"e_above_hull": {"$lt": 0.1}}, {"updated_at": {"$gte": "2024"}}],
            "nelements": 2
        }));
        assert_eq!(translated, json!({
            "$or": [{"analysis.e_above_hull": {"$lt": 0.1}}, {"last_updated": {"$gte": "2024"}}],
            "nelements": 2
        }));
    }

    #[test]
    fn names_sharing_a_path_keep_every_clause() {
        let engine = engine_with(vec![
            json!({"pretty_formula": "FeO", "last_updated": "2023-06-01"}),
            json!({"pretty_formula": "Li2O", "last_updated": "2024-06-01"}),
        ]);
        let count = |criteria: Value| engine.count(Some(&criteria)).unwrap();

        assert_eq!(count(json!({"formula": "Li2O", "pretty_formula": {"$exists": true}})), 1);
        assert_eq!(count(json!({"formula": "Cu", "pretty_formula": {"$exists": true}})), 0);
        assert_eq!(count(json!({"updated_at": {"$gte": "2024"}, "last_updated": {"$lt": "2024-01-01"}})), 0);
        assert_eq!(count(json!({"updated_at": {"$gte": "2023"}, "last_updated": {"$lt": "2024-01-01"}})), 1);
    }

    #[test]
    fn criteria_follow_the_projected_path() {
        let engine = engine_with(vec![
            json!({"task_id": 1, "output": {"final_energy": -3.0}, "final_energy": -4.0}),
            json!({"task_id": 2, "final_energy": -4.0}),
            json!({"task_id": 3}),
        ]);
        let ids = |criteria: Value| -> Vec<Value> {
            engine
                .query_sorted(&["task_id"], Some(&criteria), "task_id", SortOrder::Asc, None)
                .unwrap()
                .map(|row| row.unwrap().get("task_id").cloned().unwrap())
                .collect()
        };

        assert_eq!(ids(json!({"energy": -4.0})), vec![json!(2)]);
        assert_eq!(ids(json!({"energy": {"$lt": -3.5}})), vec![json!(2)]);
        assert_eq!(ids(json!({"energy": {"$exists": true}})), vec![json!(1), json!(2)]);
        assert_eq!(ids(json!({"energy": {"$exists": false}})), vec![json!(3)]);
    }

    #[test]
    fn fallback_path_fills_missing_primary() {
        let engine = engine_with(vec![
            json!({"task_id": 1, "output": {"final_energy": -3.0}}),
            json!({"task_id": 2, "final_energy": -4.0}),
        ]);
        let rows: Vec<Row> = engine
            .query_sorted(&["task_id", "energy"], None, "task_id", SortOrder::Asc, None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows[0].get("energy"), Some(&json!(-3.0)));
        assert_eq!(rows[1].get("energy"), Some(&json!(-4.0)));
    }

    #[test]
    fn unknown_property_is_absent_not_error() {
        let engine = engine_with(vec![json!({"task_id": 1})]);
        let row = engine.query_one(&["task_id", "no_such_thing"], None).unwrap().unwrap();
        assert_eq!(row.get("no_such_thing"), None);
        assert_eq!(row.columns.len(), 2);
    }

    #[test]
    fn malformed_criteria_fails_before_store() {
        let engine = engine_with(vec![]);
        let err = engine.query(&["task_id"], Some(&json!({"energy": {"$bogus": 1}}))).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn array_fields_match_any_element() {
        let engine = engine_with(vec![
            json!({"elements": ["Li", "O"]}),
            json!({"elements": ["Fe", "O"]}),
        ]);
        assert_eq!(engine.count(Some(&json!({"elements": "O"}))).unwrap(), 2);
        assert_eq!(engine.count(Some(&json!({"elements": "Li"}))).unwrap(), 1);
    }
}
