//! Host-facing registry of time stores and query stores.
//!
//! The host identifies every `store(...)`/`query(...)` invocation by a stable
//! [`CallSite`]. The engine keeps at most one [`TimeStore`] and one
//! [`QueryStore`] per call site, creates them on first use, and reuses a query
//! store for as long as its signature stays the same.
//!
//! ```rust
//! use tempora::{Engine, Query, QueryArgs, StoreArgs};
//! use serde_json::json;
//!
//! let mut engine = Engine::new();
//! let values = json!({"temp": 10}).as_object().cloned().unwrap();
//! engine.store("A1", values, StoreArgs::default(), 0)?;
//!
//! let query = Query::new(["temp"]).aggregate(["max"]);
//! engine.query("B1", "A1", &query, QueryArgs::default(), 1000)?;
//! assert_eq!(engine.result("B1")?.values["temp"], json!(10));
//! # Ok::<(), tempora::TemporaError>(())
//! ```

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::hash_map::Entry;
use std::fmt;

use crate::config::{Config, QueryConfig, StoreConfig};
use crate::error::{Result, TemporaError};
use crate::query::{Query, QueryStatus, QueryStore, Table, TableWriter};
use crate::store::{PushStatus, TimeStore};
use crate::transform::Snapshot;
use crate::value::{self, Record};
use crate::where_clause::PredicateCache;

/// Stable identifier of one invoking construct (e.g. a sheet cell).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSite(String);

impl CallSite {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CallSite {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallSite {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CallSite {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&CallSite> for CallSite {
    fn from(site: &CallSite) -> Self {
        site.clone()
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Execution state of the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Stopped,
    Running,
    Paused,
}

/// Optional arguments of a store call; `None` falls back to the engine config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreArgs {
    pub period_secs: Option<u64>,
    /// Epoch milliseconds; defaults to `now`
    pub timestamp: Option<i64>,
    pub limit: Option<usize>,
}

impl StoreArgs {
    pub fn period_secs(mut self, period_secs: u64) -> Self {
        self.period_secs = Some(period_secs);
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Optional arguments of a query call; `None` falls back to the engine config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryArgs {
    pub interval_secs: Option<i64>,
    /// Region handed to the [`TableWriter`]
    pub output: Option<String>,
    pub limit: Option<usize>,
}

impl QueryArgs {
    pub fn interval_secs(mut self, interval_secs: i64) -> Self {
        self.interval_secs = Some(interval_secs);
        self
    }

    pub fn output(mut self, region: impl Into<String>) -> Self {
        self.output = Some(region.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

pub struct Engine {
    config: Config,
    stores: FxHashMap<CallSite, TimeStore>,
    queries: FxHashMap<CallSite, QueryStore>,
    predicates: PredicateCache,
    writer: Option<Box<dyn TableWriter + Send>>,
    state: RunState,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("stores", &self.stores.len())
            .field("queries", &self.queries.len())
            .field("predicates", &self.predicates.len())
            .field("has_writer", &self.writer.is_some())
            .field("state", &self.state)
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_parts(Config::default(), None)
    }

    pub(crate) fn with_parts(config: Config, writer: Option<Box<dyn TableWriter + Send>>) -> Self {
        Self {
            config,
            stores: FxHashMap::default(),
            queries: FxHashMap::default(),
            predicates: PredicateCache::new(),
            writer,
            state: RunState::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn set_table_writer(&mut self, writer: Box<dyn TableWriter + Send>) {
        self.writer = Some(writer);
    }

    fn store_config(&self, args: &StoreArgs) -> Result<StoreConfig> {
        let config = StoreConfig {
            period_secs: args.period_secs.unwrap_or(self.config.store.period_secs),
            limit: args.limit.unwrap_or(self.config.store.limit),
        };
        if config.limit == 0 {
            return Err(TemporaError::value("store limit must be at least 1"));
        }
        self.config.check_limit(config.limit)?;
        Ok(config)
    }

    fn query_config(&self, args: &QueryArgs) -> Result<QueryConfig> {
        let config = QueryConfig {
            interval_secs: args.interval_secs.unwrap_or(self.config.query.interval_secs),
            limit: args.limit.unwrap_or(self.config.query.limit),
        };
        config.validate()?;
        self.config.check_limit(config.limit)?;
        Ok(config)
    }

    /// Appends a record to the call site's time store, creating it on first use.
    ///
    /// A change of period or limit is applied to the existing store.
    pub fn store(
        &mut self,
        site: impl Into<CallSite>,
        values: Record,
        args: StoreArgs,
        now: i64,
    ) -> Result<PushStatus> {
        let config = self.store_config(&args)?;
        let site = site.into();
        let store = match self.stores.entry(site) {
            Entry::Occupied(entry) => {
                let store = entry.into_mut();
                if *store.config() != config {
                    log::debug!("time store bounds changed to {:?}", config);
                    store.reconfigure(config)?;
                }
                store
            }
            Entry::Vacant(entry) => {
                log::debug!("creating time store for call site {}", entry.key());
                entry.insert(TimeStore::new(config)?)
            }
        };
        Ok(store.push(args.timestamp.unwrap_or(now), values))
    }

    /// Runs (or reuses) the call site's query against the store owned by
    /// `store_ref`.
    ///
    /// The query store is rebuilt from scratch when the query or its
    /// interval/limit differ from the cached one. Returns
    /// [`TemporaError::NotAvailable`] while no result has been produced.
    pub fn query(
        &mut self,
        site: impl Into<CallSite>,
        store_ref: &str,
        query: &Query,
        args: QueryArgs,
        now: i64,
    ) -> Result<QueryStatus> {
        let site = site.into();
        let store = self
            .stores
            .get(store_ref)
            .ok_or_else(|| TemporaError::value(format!("unknown store '{}'", store_ref)))?;
        let config = self.query_config(&args)?;
        if args.output.is_some() && self.writer.is_none() {
            return Err(TemporaError::value(
                "output region given but no table writer is configured",
            ));
        }

        let reuse = self
            .queries
            .get(&site)
            .is_some_and(|qs| qs.is_same_query(query, &config));
        if !reuse {
            let fresh = QueryStore::new(query.clone(), config, &mut self.predicates)?;
            if self.queries.insert(site.clone(), fresh).is_some() {
                log::debug!("query signature changed at {}, state discarded", site);
                self.predicates.prune();
            }
        }

        let Some(qs) = self.queries.get_mut(&site) else {
            return Err(TemporaError::NotAvailable);
        };
        qs.perform_query_on_interval(store, now);

        if let (Some(region), Some(writer)) = (args.output.as_deref(), self.writer.as_mut()) {
            writer.write(region, &qs.write())?;
        }
        qs.status()
    }

    /// Host entry point for `store(values, period?, timestamp?, limit?)`.
    ///
    /// `timestamp` is a host date serial; `null` arguments take their default.
    pub fn call_store(
        &mut self,
        site: impl Into<CallSite>,
        args: &[Value],
        now: i64,
    ) -> Result<PushStatus> {
        if !(1..=4).contains(&args.len()) {
            return Err(TemporaError::Args {
                expected: "1..=4",
                got: args.len(),
            });
        }
        let values = match &args[0] {
            Value::Object(map) => map.clone(),
            other => {
                return Err(TemporaError::value(format!(
                    "store values must be an object, got {}",
                    other
                )));
            }
        };
        let store_args = StoreArgs {
            period_secs: optional_arg(args, 1, "period", |v| {
                value::as_integer(v).and_then(|n| u64::try_from(n).ok())
            })?,
            timestamp: match args.get(2) {
                None | Some(Value::Null) => None,
                Some(v) => Some(value::timestamp_arg(v)?),
            },
            limit: optional_arg(args, 3, "limit", positive_usize)?,
        };
        self.store(site, values, store_args, now)
    }

    /// Host entry point for
    /// `query(storeRef, queryJson, interval?, outputRegion?, limit?)`.
    pub fn call_query(
        &mut self,
        site: impl Into<CallSite>,
        args: &[Value],
        now: i64,
    ) -> Result<QueryStatus> {
        if !(2..=5).contains(&args.len()) {
            return Err(TemporaError::Args {
                expected: "2..=5",
                got: args.len(),
            });
        }
        let Value::String(store_ref) = &args[0] else {
            return Err(TemporaError::value("store reference must be a string"));
        };
        let query = Query::from_value(args[1].clone())?;
        let query_args = QueryArgs {
            interval_secs: optional_arg(args, 2, "interval", value::as_integer)?,
            output: optional_arg(args, 3, "output region", |v| {
                v.as_str().map(str::to_string)
            })?,
            limit: optional_arg(args, 4, "limit", positive_usize)?,
        };
        self.query(site, store_ref, &query, query_args, now)
    }

    /// Latest result of the call site's query.
    pub fn result(&self, site: &str) -> Result<&Snapshot> {
        self.queries
            .get(site)
            .and_then(QueryStore::latest)
            .ok_or(TemporaError::NotAvailable)
    }

    /// Flattened rolling buffer of the call site's query.
    pub fn table(&self, site: &str) -> Result<Table> {
        let qs = self.queries.get(site).ok_or(TemporaError::NotAvailable)?;
        Ok(qs.write())
    }

    pub fn time_store(&self, site: &str) -> Option<&TimeStore> {
        self.stores.get(site)
    }

    pub fn query_store(&self, site: &str) -> Option<&QueryStore> {
        self.queries.get(site)
    }

    /// Drops whatever the call site owns; returns whether anything was held.
    pub fn remove(&mut self, site: &str) -> bool {
        let store = self.stores.remove(site).is_some();
        let query = self.queries.remove(site).is_some();
        if query {
            self.predicates.prune();
        }
        store || query
    }

    /// Records a host state transition. Stopped to running clears every store
    /// and every query buffer; returns whether that happened.
    pub fn on_transition(&mut self, from: RunState, to: RunState) -> bool {
        if from != self.state {
            log::warn!(
                "transition from {:?} reported while engine was {:?}",
                from,
                self.state
            );
        }
        self.state = to;
        if from == RunState::Stopped && to == RunState::Running {
            self.reset();
            return true;
        }
        false
    }

    /// Clears all stores and query buffers, keeping their configuration.
    pub fn reset(&mut self) {
        log::debug!(
            "resetting {} time stores and {} query stores",
            self.stores.len(),
            self.queries.len()
        );
        self.stores.values_mut().for_each(TimeStore::reset);
        self.queries.values_mut().for_each(QueryStore::reset);
    }
}

fn positive_usize(v: &Value) -> Option<usize> {
    value::as_integer(v)
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n >= 1)
}

/// Reads positional argument `idx`; absent or null yields `None`.
fn optional_arg<T>(
    args: &[Value],
    idx: usize,
    name: &str,
    parse: impl Fn(&Value) -> Option<T>,
) -> Result<Option<T>> {
    match args.get(idx) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => parse(v)
            .map(Some)
            .ok_or_else(|| TemporaError::value(format!("invalid {}: {}", name, v))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_store_creates_and_reconfigures() {
        let mut engine = Engine::new();
        engine
            .store("s", record(json!({"a": 1})), StoreArgs::default(), 0)
            .unwrap();
        assert_eq!(engine.time_store("s").unwrap().config().limit, 1000);

        let status = engine
            .store("s", record(json!({"a": 2})), StoreArgs::default().limit(1), 1)
            .unwrap();
        assert_eq!(status, PushStatus::Limit);
        assert_eq!(engine.time_store("s").unwrap().len(), 1);
    }

    #[test]
    fn test_query_unknown_store() {
        let mut engine = Engine::new();
        let err = engine
            .query("q", "nope", &Query::new(["x"]), QueryArgs::default(), 0)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Value);
        assert!(engine.query_store("q").is_none());
    }

    #[test]
    fn test_query_reuse_and_rebuild() {
        let mut engine = Engine::new();
        engine
            .store("s", record(json!({"x": 1})), StoreArgs::default(), 0)
            .unwrap();
        let q = Query::new(["x"]).aggregate(["sum"]);

        engine.query("q", "s", &q, QueryArgs::default(), 1).unwrap();
        engine.query("q", "s", &q, QueryArgs::default(), 2).unwrap();
        assert_eq!(engine.query_store("q").unwrap().len(), 2);

        let q2 = q.clone().aggregate(["max"]);
        engine.query("q", "s", &q2, QueryArgs::default(), 3).unwrap();
        assert_eq!(engine.query_store("q").unwrap().len(), 1);

        engine
            .query("q", "s", &q2, QueryArgs::default().limit(5), 4)
            .unwrap();
        assert_eq!(engine.query_store("q").unwrap().len(), 1);
    }

    #[test]
    fn test_failed_query_keeps_cached_store() {
        let mut engine = Engine::new();
        engine
            .store("s", record(json!({"x": 1})), StoreArgs::default(), 0)
            .unwrap();
        let q = Query::new(["x"]).aggregate(["sum"]);
        engine.query("q", "s", &q, QueryArgs::default(), 1).unwrap();

        let bad = Query::new(["x"]).aggregate(["median"]);
        assert!(engine.query("q", "s", &bad, QueryArgs::default(), 2).is_err());
        assert!(
            engine
                .query("q", "s", &q, QueryArgs::default().interval_secs(0), 2)
                .is_err()
        );
        assert_eq!(engine.query_store("q").unwrap().len(), 1);
    }

    #[test]
    fn test_output_requires_writer() {
        let mut engine = Engine::new();
        engine
            .store("s", record(json!({"x": 1})), StoreArgs::default(), 0)
            .unwrap();
        let q = Query::new(["x"]);
        assert!(
            engine
                .query("q", "s", &q, QueryArgs::default().output("C1"), 1)
                .is_err()
        );
        assert!(engine.query_store("q").is_none());
    }

    #[test]
    fn test_call_arity_and_values() {
        let mut engine = Engine::new();
        let err = engine.call_store("s", &[], 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Args);
        let err = engine.call_store("s", &[json!(1)], 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Value);
        let err = engine
            .call_store("s", &[json!({"a": 1}), Value::Null, json!("later")], 0)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Value);
        assert!(engine.time_store("s").is_none());

        engine
            .call_store("s", &[json!({"a": 1}), json!(60), json!(25569.0), json!(10)], 99)
            .unwrap();
        assert_eq!(engine.time_store("s").unwrap().timestamps(), vec![0]);

        let err = engine.call_query("q", &[json!("s")], 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Args);
        let err = engine
            .call_query("q", &[json!("s"), json!({"select": "a"}), json!(0)], 0)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Value);
        let err = engine
            .call_query(
                "q",
                &[json!("s"), json!({"select": "a"}), Value::Null, Value::Null, json!(0)],
                0,
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Value);

        let status = engine
            .call_query("q", &[json!("s"), json!(r#"{"select": "a"}"#)], 1)
            .unwrap();
        assert_eq!(status, QueryStatus::Ok);
    }

    #[test]
    fn test_transition_reset() {
        let mut engine = Engine::new();
        engine
            .store("s", record(json!({"x": 1})), StoreArgs::default(), 0)
            .unwrap();
        engine
            .query("q", "s", &Query::new(["x"]), QueryArgs::default(), 1)
            .unwrap();

        assert!(!engine.on_transition(RunState::Stopped, RunState::Paused));
        assert_eq!(engine.time_store("s").unwrap().len(), 1);
        assert!(!engine.on_transition(RunState::Paused, RunState::Running));
        assert!(!engine.on_transition(RunState::Running, RunState::Stopped));
        assert!(engine.on_transition(RunState::Stopped, RunState::Running));
        assert_eq!(engine.state(), RunState::Running);
        assert!(engine.time_store("s").unwrap().is_empty());
        assert!(engine.query_store("q").unwrap().is_empty());
        assert!(matches!(engine.result("q"), Err(TemporaError::NotAvailable)));
    }

    #[test]
    fn test_remove() {
        let mut engine = Engine::new();
        engine
            .store("s", record(json!({"x": 1})), StoreArgs::default(), 0)
            .unwrap();
        assert!(engine.remove("s"));
        assert!(!engine.remove("s"));
    }

    #[test]
    fn test_edited_where_clauses_are_released() {
        let mut engine = Engine::new();
        engine
            .store("s", record(json!({"x": 1})), StoreArgs::default(), 0)
            .unwrap();

        for (i, bound) in [0, 1, 2, 3].iter().enumerate() {
            let q = Query::new(["x"]).filter(format!("x > {}", bound));
            engine
                .query("q", "s", &q, QueryArgs::default(), i as i64)
                .unwrap();
        }
        let shared = Query::new(["x"]).filter("x > 3");
        engine
            .query("other", "s", &shared, QueryArgs::default(), 5)
            .unwrap();
        assert_eq!(engine.predicates.len(), 1);

        assert!(engine.remove("q"));
        assert_eq!(engine.predicates.len(), 1);
        assert!(engine.remove("other"));
        assert!(engine.predicates.is_empty());
    }
}
