//! Where raw connections come from

use std::sync::Arc;

use sluice_core::{ConnectionProperties, DriverRegistry, RawConnection, Result};

/// Opens raw connections for a pooled data source
pub trait ConnectionSource: Send + Sync + 'static {
    fn open(&self) -> Result<Box<dyn RawConnection>>;

    /// Short description for logs, never containing credentials
    fn describe(&self) -> String;
}

/// Opens connections through a registered driver
pub struct DriverSource {
    registry: Arc<DriverRegistry>,
    driver: String,
    url: String,
    properties: ConnectionProperties,
}

impl DriverSource {
    pub fn new(registry: Arc<DriverRegistry>, driver: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            registry,
            driver: driver.into(),
            url: url.into(),
            properties: ConnectionProperties::new(),
        }
    }

    pub fn with_properties(mut self, properties: ConnectionProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn properties(&self) -> &ConnectionProperties {
        &self.properties
    }
}

impl ConnectionSource for DriverSource {
    fn open(&self) -> Result<Box<dyn RawConnection>> {
        tracing::debug!(driver = %self.driver, url = %self.url, "opening raw connection");
        self.registry.connect(&self.driver, &self.url, &self.properties)
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.driver, self.url)
    }
}
