//! Driver registry for managing available database drivers

use std::collections::HashMap;
use std::sync::Arc;

use crate::{ConnectionProperties, Driver, RawConnection, Result, SluiceError};

/// Registry of available database drivers
#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new driver, replacing any driver with the same name
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        let name = driver.name().to_string();
        tracing::info!(driver = %name, "registering database driver");
        self.drivers.insert(name, driver);
    }

    /// Get a driver by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        let driver = self.drivers.get(name).cloned();
        if driver.is_none() {
            tracing::warn!(driver = %name, "driver not found in registry");
        }
        driver
    }

    /// List all registered driver names
    pub fn list(&self) -> Vec<&str> {
        self.drivers.keys().map(|s| s.as_str()).collect()
    }

    /// Check if a driver is registered
    pub fn has(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// Open a raw connection through the named driver
    pub fn connect(
        &self,
        name: &str,
        url: &str,
        properties: &ConnectionProperties,
    ) -> Result<Box<dyn RawConnection>> {
        let driver = self
            .get(name)
            .ok_or_else(|| SluiceError::NotFound(format!("driver '{}'", name)))?;
        driver.connect(url, properties)
    }
}
