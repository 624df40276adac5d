use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use serde_json::{json, Value};
use crate::core::error::{Error, Result};
use crate::query::engine::QueryEngine;
use crate::query::types::SortOrder;

/// Supported aggregate reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stat {
    Count,   // Documents in the collection
    Latest,  // Largest value of one property
}

impl Stat {
    pub fn name(&self) -> &'static str {
        match self {
            Stat::Count => "count",
            Stat::Latest => "latest",
        }
    }
}

impl FromStr for Stat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(Stat::Count),
            "latest" => Ok(Stat::Latest),
            other => Err(Error::config(format!("unknown statistic '{}'", other))),
        }
    }
}

/// Result of one statistic. `Empty` means there was nothing to report.
#[derive(Debug, Clone, PartialEq)]
pub enum StatValue {
    Count(usize),
    Value(Value),
    Empty,
}

impl StatValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, StatValue::Empty)
    }
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StatValue::Count(n) => write!(f, "{}", n),
            StatValue::Value(Value::String(s)) => write!(f, "{}", s),
            StatValue::Value(other) => write!(f, "{}", other),
            StatValue::Empty => write!(f, "no records"),
        }
    }
}

/// Parameters shared by every handler.
#[derive(Debug, Clone, Default)]
pub struct StatRequest<'a> {
    pub latest_property: Option<&'a str>,
}

type Handler = fn(&StatsEngine, &StatRequest) -> Result<StatValue>;

const HANDLERS: &[(Stat, Handler)] = &[
    (Stat::Count, count_handler),
    (Stat::Latest, latest_handler),
];

pub const DEFAULT_LATEST_PROPERTY: &str = "updated_at";

fn count_handler(engine: &StatsEngine, _request: &StatRequest) -> Result<StatValue> {
    engine.count().map(StatValue::Count)
}

fn latest_handler(engine: &StatsEngine, request: &StatRequest) -> Result<StatValue> {
    engine.latest(request.latest_property.unwrap_or(DEFAULT_LATEST_PROPERTY))
}

/// Precomputed reports on top of the query engine.
pub struct StatsEngine {
    queries: Arc<QueryEngine>,
}

impl StatsEngine {
    pub fn new(queries: Arc<QueryEngine>) -> Self {
        StatsEngine { queries }
    }

    pub fn count(&self) -> Result<usize> {
        self.queries.count(None)
    }

    /// `property` of the document holding its maximum value.
    pub fn latest(&self, property: &str) -> Result<StatValue> {
        let criteria = json!({ property: { "$exists": true } });
        let row = self
            .queries
            .query_sorted(&[property], Some(&criteria), property, SortOrder::Desc, Some(1))?
            .next()
            .transpose()?;

        Ok(match row.as_ref().and_then(|r| r.get(property)) {
            Some(Value::Null) | None => StatValue::Empty,
            Some(value) => StatValue::Value(value.clone()),
        })
    }

    pub fn compute(&self, stat: Stat, request: &StatRequest) -> Result<StatValue> {
        let handler = HANDLERS
            .iter()
            .find(|(candidate, _)| *candidate == stat)
            .map(|(_, handler)| *handler)
            .ok_or_else(|| Error::config(format!("no handler for {}", stat.name())))?;
        handler(self, request)
    }

    /// Named statistics, formatted for display.
    pub fn get_stats(&self, names: &[&str], latest_property: Option<&str>) -> Result<BTreeMap<String, String>> {
        let stats = names
            .iter()
            .map(|name| name.parse::<Stat>())
            .collect::<Result<Vec<_>>>()?;

        let request = StatRequest { latest_property };
        let mut out = BTreeMap::new();
        for stat in stats {
            let value = self.compute(stat, &request)?;
            out.insert(stat.name().to_string(), value.to_string());
        }
        Ok(out)
    }
}
