//! Embedded time-series store with windowed, filtered aggregation queries.
//!
//! ## Features
//! - **Time stores**: bounded, time-ordered logs with age and size eviction
//! - **Aggregation**: avg, sum, min, max, count, counta, product, stdevs, none,
//!   per field or over every field (`"*"`)
//! - **Where clauses**: boolean filters over record fields, compiled once
//! - **Query stores**: on-demand or periodic queries with a rolling buffer of
//!   results, flattened to a time column plus value columns
//! - **Call-site registry**: the [`Engine`] keeps one store and one query per
//!   host call site and clears them when execution restarts
//!
//! ```rust
//! use tempora::{Engine, Query, QueryArgs, QueryStatus, StoreArgs};
//! use serde_json::json;
//!
//! let mut engine = Engine::new();
//! let record = |v: serde_json::Value| v.as_object().cloned().unwrap();
//!
//! engine.store("sensors", record(json!({"temp": 10})), StoreArgs::default().timestamp(0), 0)?;
//! engine.store("sensors", record(json!({"temp": 20})), StoreArgs::default().timestamp(1000), 1000)?;
//!
//! let query = Query::from_json_str(r#"{"select": "temp", "aggregate": "avg", "where": "temp > 0"}"#)?;
//! let status = engine.query("avg_temp", "sensors", &query, QueryArgs::default(), 2000)?;
//! assert_eq!(status, QueryStatus::Ok);
//! assert_eq!(engine.result("avg_temp")?.values["temp"], json!(15));
//! # Ok::<(), tempora::TemporaError>(())
//! ```

pub mod aggregate;
pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod query;
pub mod store;
pub mod transform;
pub mod value;
pub mod where_clause;

#[cfg(feature = "sync")]
pub mod sync;

pub use aggregate::{Method, Reducer, WildcardReducer};
pub use builder::EngineBuilder;
pub use config::{Config, ON_DEMAND, QueryConfig, StoreConfig};
pub use engine::{CallSite, Engine, QueryArgs, RunState, StoreArgs};
pub use error::{ErrorCode, Result, TemporaError};
pub use query::{Plan, Query, QueryStatus, QueryStore, Table, TableWriter, WILDCARD};
pub use store::{Entry, PushStatus, TimeStore};
pub use transform::{Pipeline, Snapshot};
pub use value::{Record, serial_to_epoch_ms};
pub use where_clause::{Predicate, PredicateCache};

#[cfg(feature = "sync")]
pub use sync::SyncEngine;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {
    pub use crate::{
        Config, Engine, EngineBuilder, Query, QueryArgs, QueryStatus, Result, RunState,
        StoreArgs, TemporaError,
    };

    pub use crate::{Method, PushStatus, QueryConfig, Snapshot, StoreConfig, Table};

    #[cfg(feature = "sync")]
    pub use crate::SyncEngine;
}
