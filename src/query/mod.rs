//! Cached, periodically refreshed aggregation queries.
//!
//! A [`QueryStore`] is bound to one query signature (select, aggregate, where,
//! interval, limit). Each run builds a fresh [`Pipeline`], folds it over a
//! [`TimeStore`] from newest to oldest entry and appends the resulting
//! [`Snapshot`] to a bounded rolling buffer.
//!
//! ```rust
//! use tempora::{Query, QueryConfig, QueryStore, StoreConfig, TimeStore};
//! use tempora::where_clause::PredicateCache;
//! use serde_json::json;
//!
//! let mut store = TimeStore::new(StoreConfig::default())?;
//! store.push(0, json!({"temp": 10}).as_object().cloned().unwrap());
//! store.push(1000, json!({"temp": 20}).as_object().cloned().unwrap());
//!
//! let query = Query::from_json_str(r#"{"select": "temp", "aggregate": "avg"}"#)?;
//! let mut predicates = PredicateCache::new();
//! let mut qs = QueryStore::new(query, QueryConfig::default(), &mut predicates)?;
//! qs.perform_query(&store, 2000);
//! assert_eq!(qs.latest().unwrap().values["temp"], json!(15));
//! # Ok::<(), tempora::TemporaError>(())
//! ```

mod table;

pub use table::{TIME_COLUMN, Table, TableWriter};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::aggregate::Method;
use crate::config::QueryConfig;
use crate::error::{Result, TemporaError};
use crate::store::TimeStore;
use crate::transform::{Pipeline, Snapshot};
use crate::where_clause::{Predicate, PredicateCache};

/// Select token that aggregates every field.
pub const WILDCARD: &str = "*";

/// Accepts either `"name"` or `["a", "b"]`.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Query definition as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    #[serde(deserialize_with = "one_or_many")]
    pub select: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub aggregate: Vec<String>,

    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
}

impl Query {
    pub fn new<S: Into<String>>(select: impl IntoIterator<Item = S>) -> Self {
        Self {
            select: select.into_iter().map(Into::into).collect(),
            aggregate: Vec::new(),
            where_clause: None,
        }
    }

    pub fn aggregate<S: Into<String>>(mut self, methods: impl IntoIterator<Item = S>) -> Self {
        self.aggregate = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, clause: impl Into<String>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Builds a query from a JSON object or a string holding one.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(json) => Self::from_json_str(&json),
            Value::Object(map) => {
                if map.get("select").is_none_or(Value::is_null) {
                    return Err(TemporaError::value("query requires a 'select'"));
                }
                Ok(serde_json::from_value(Value::Object(map))?)
            }
            other => Err(TemporaError::value(format!(
                "query must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Where clause with blank text treated as absent.
    pub fn where_clause(&self) -> Option<&str> {
        self.where_clause
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn is_wildcard(&self) -> bool {
        self.select.iter().any(|s| s == WILDCARD)
    }

    /// Resolves method names into a reduction plan.
    ///
    /// Every listed method must be registered, even ones past the end of the
    /// select list. Select slots without a method use `none`.
    pub fn plan(&self) -> Result<Plan> {
        if self.select.is_empty() {
            return Err(TemporaError::value("select must name at least one field"));
        }
        let methods = self
            .aggregate
            .iter()
            .map(|name| name.parse::<Method>())
            .collect::<Result<Vec<_>>>()?;

        if self.is_wildcard() {
            return Ok(Plan::Wildcard(methods.first().copied().unwrap_or(Method::None)));
        }

        Ok(Plan::Fields(
            self.select
                .iter()
                .enumerate()
                .map(|(i, field)| (field.clone(), methods.get(i).copied().unwrap_or(Method::None)))
                .collect(),
        ))
    }
}

/// Reductions a query applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// One method over every observed field
    Wildcard(Method),
    /// `(field, method)` per select slot; a repeated field keeps the last slot's value
    Fields(Vec<(String, Method)>),
}

/// Outcome of a query call that has results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Ok,
    /// The rolling buffer is full; each new result drops the oldest.
    Limit,
}

#[derive(Debug)]
pub struct QueryStore {
    query: Query,
    plan: Plan,
    predicate: Option<Arc<Predicate>>,
    config: QueryConfig,
    results: VecDeque<Snapshot>,
    next_query_time: i64,
}

impl QueryStore {
    /// Validates and compiles a query. Nothing is mutated on error except the
    /// predicate cache, which only ever gains valid entries.
    pub fn new(query: Query, config: QueryConfig, predicates: &mut PredicateCache) -> Result<Self> {
        config.validate()?;
        let plan = query.plan()?;
        let predicate = query
            .where_clause()
            .map(|clause| predicates.get_or_compile(clause))
            .transpose()?;

        Ok(Self {
            query,
            plan,
            predicate,
            config,
            results: VecDeque::new(),
            next_query_time: i64::MIN,
        })
    }

    /// True when `query` and `config` are structurally identical to this
    /// store's signature.
    pub fn is_same_query(&self, query: &Query, config: &QueryConfig) -> bool {
        self.query == *query && self.config == *config
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn next_query_time(&self) -> i64 {
        self.next_query_time
    }

    fn pipeline(&self, cutoff: Option<i64>) -> Pipeline {
        let mut pipeline = Pipeline::new().period(cutoff);
        if let Some(predicate) = &self.predicate {
            pipeline = pipeline.filter(Arc::clone(predicate));
        }
        match &self.plan {
            Plan::Wildcard(method) => pipeline.reduce_all(*method),
            Plan::Fields(fields) => fields
                .iter()
                .fold(pipeline, |p, (field, method)| p.reduce(field.as_str(), *method)),
        }
    }

    /// Aggregates the store as of `now` and appends the result.
    pub fn perform_query(&mut self, store: &TimeStore, now: i64) -> QueryStatus {
        let cutoff = self
            .config
            .is_periodic()
            .then(|| now.saturating_sub(self.config.interval_ms()));

        let snapshot = self
            .pipeline(cutoff)
            .fold(store.entries(), Snapshot::empty(now));
        self.results.push_back(snapshot);
        while self.results.len() > self.config.limit {
            self.results.pop_front();
        }
        self.buffer_status()
    }

    /// Runs the query if it is on-demand or due; returns whether it ran.
    pub fn perform_query_on_interval(&mut self, store: &TimeStore, now: i64) -> bool {
        if self.config.is_periodic() && now < self.next_query_time {
            return false;
        }
        self.perform_query(store, now);
        if self.config.is_periodic() {
            self.next_query_time = now.saturating_add(self.config.interval_ms());
        }
        true
    }

    fn buffer_status(&self) -> QueryStatus {
        if self.results.len() >= self.config.limit {
            QueryStatus::Limit
        } else {
            QueryStatus::Ok
        }
    }

    /// `NA` while the buffer is empty, otherwise the buffer status.
    pub fn status(&self) -> Result<QueryStatus> {
        if self.results.is_empty() {
            return Err(TemporaError::NotAvailable);
        }
        Ok(self.buffer_status())
    }

    pub fn results(&self) -> &VecDeque<Snapshot> {
        &self.results
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.results.back()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Flattens the buffered results into a time column plus one column per
    /// field, in first-seen order.
    pub fn write(&self) -> Table {
        Table::from_snapshots(&self.results)
    }

    /// Clears buffered results; the next call runs immediately.
    pub fn reset(&mut self) {
        self.results.clear();
        self.next_query_time = i64::MIN;
    }
}
