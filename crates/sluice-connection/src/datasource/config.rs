//! Data source configuration files
//!
//! ```toml
//! name = "orders"
//! capacity = 8
//! max_wait_ms = 500
//! statement_cache_size = 32
//!
//! [source]
//! driver = "sqlite"
//! url = "/var/lib/orders.db"
//! properties = { busy_timeout_ms = "250" }
//! ```
//!
//! A source bound in a naming context is referenced with
//! `source = { lookup = "jdbc/orders" }` instead.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sluice_core::{ConnectionProperties, DriverRegistry, Result, SluiceError};

use super::lookup::NamingContext;
use super::pooled::{DriverDataSource, LookupDataSource};
use super::DataSource;
use crate::pool::PoolConfig;

/// Where a configured data source gets its raw connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceConfig {
    Driver {
        driver: String,
        url: String,
        #[serde(default)]
        properties: ConnectionProperties,
    },
    Lookup {
        lookup: String,
    },
}

/// Serializable description of one data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub name: String,
    #[serde(flatten)]
    pub pool: PoolConfig,
    pub source: SourceConfig,
}

impl DataSourceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.pool.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading data source config");
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Build the driver-backed data source this config describes
    pub fn build_driver(&self, registry: Arc<DriverRegistry>) -> Result<DriverDataSource> {
        match &self.source {
            SourceConfig::Driver {
                driver,
                url,
                properties,
            } => Ok(DriverDataSource::with_driver(
                self.name.clone(),
                registry,
                driver,
                url,
                properties.clone(),
                self.pool.clone(),
            )),
            SourceConfig::Lookup { .. } => Err(self.wrong_source("driver")),
        }
    }

    /// Build the lookup-backed data source this config describes
    pub fn build_lookup(&self, context: Arc<dyn NamingContext>) -> Result<LookupDataSource> {
        match &self.source {
            SourceConfig::Lookup { lookup } => Ok(LookupDataSource::with_lookup(
                self.name.clone(),
                context,
                lookup,
                self.pool.clone(),
            )),
            SourceConfig::Driver { .. } => Err(self.wrong_source("lookup")),
        }
    }

    /// Build whichever kind of data source this config describes
    pub fn build(
        &self,
        registry: Arc<DriverRegistry>,
        context: Arc<dyn NamingContext>,
    ) -> Result<Arc<dyn DataSource>> {
        let data_source: Arc<dyn DataSource> = match &self.source {
            SourceConfig::Driver { .. } => Arc::new(self.build_driver(registry)?),
            SourceConfig::Lookup { .. } => Arc::new(self.build_lookup(context)?),
        };
        Ok(data_source)
    }

    fn wrong_source(&self, wanted: &str) -> SluiceError {
        SluiceError::Configuration(format!(
            "data source '{}' is not configured with a {} source",
            self.name, wanted
        ))
    }
}
