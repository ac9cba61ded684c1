//! Engine builder for flexible configuration
//!
//! This module provides a builder pattern for creating engines with custom
//! default bounds and an output-region writer.

use crate::config::{Config, QueryConfig, StoreConfig};
use crate::engine::Engine;
use crate::error::Result;
use crate::query::TableWriter;

/// Builder for [`Engine`] configuration.
#[derive(Default)]
pub struct EngineBuilder {
    config: Config,
    writer: Option<Box<dyn TableWriter + Send>>,
}

impl EngineBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Default bounds for stores created without explicit period or limit.
    pub fn store_defaults(mut self, store: StoreConfig) -> Self {
        self.config.store = store;
        self
    }

    pub fn query_defaults(mut self, query: QueryConfig) -> Self {
        self.config.query = query;
        self
    }

    pub fn max_limit(mut self, max_limit: usize) -> Self {
        self.config = self.config.with_max_limit(max_limit);
        self
    }

    /// Set the host writer that receives flattened query output.
    pub fn table_writer<W>(mut self, writer: W) -> Self
    where
        W: TableWriter + Send + 'static,
    {
        self.writer = Some(Box::new(writer));
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;
        Ok(Engine::with_parts(self.config, self.writer))
    }
}
