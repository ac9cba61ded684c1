//! Thread-safe wrapper for shared engine access.
//!
//! The engine itself is single-threaded; `SyncEngine` serializes every call
//! through one mutex so several host threads can share it.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::engine::{CallSite, Engine, QueryArgs, RunState, StoreArgs};
use crate::error::Result;
use crate::query::{Query, QueryStatus, Table};
use crate::store::PushStatus;
use crate::transform::Snapshot;
use crate::value::Record;

/// Thread-safe wrapper around [`Engine`].
#[derive(Clone, Default)]
pub struct SyncEngine {
    inner: Arc<Mutex<Engine>>,
}

impl SyncEngine {
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn config(&self) -> Config {
        self.inner.lock().config().clone()
    }

    pub fn store(
        &self,
        site: impl Into<CallSite>,
        values: Record,
        args: StoreArgs,
        now: i64,
    ) -> Result<PushStatus> {
        self.inner.lock().store(site, values, args, now)
    }

    pub fn query(
        &self,
        site: impl Into<CallSite>,
        store_ref: &str,
        query: &Query,
        args: QueryArgs,
        now: i64,
    ) -> Result<QueryStatus> {
        self.inner.lock().query(site, store_ref, query, args, now)
    }

    pub fn call_store(&self, site: impl Into<CallSite>, args: &[Value], now: i64) -> Result<PushStatus> {
        self.inner.lock().call_store(site, args, now)
    }

    pub fn call_query(&self, site: impl Into<CallSite>, args: &[Value], now: i64) -> Result<QueryStatus> {
        self.inner.lock().call_query(site, args, now)
    }

    /// Latest result of the call site's query (cloned out of the lock).
    pub fn result(&self, site: &str) -> Result<Snapshot> {
        self.inner.lock().result(site).cloned()
    }

    pub fn table(&self, site: &str) -> Result<Table> {
        self.inner.lock().table(site)
    }

    pub fn on_transition(&self, from: RunState, to: RunState) -> bool {
        self.inner.lock().on_transition(from, to)
    }

    /// Run a closure with exclusive access to the engine.
    pub fn with<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> R {
        f(&mut self.inner.lock())
    }
}
