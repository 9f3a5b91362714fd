//! Database driver trait definition

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::{RawConnection, Result, SluiceError};

/// Core driver trait that all database drivers must implement
pub trait Driver: Send + Sync {
    /// Unique identifier for this driver (e.g., "sqlite")
    fn name(&self) -> &'static str;

    /// Human-readable name
    fn display_name(&self) -> &'static str {
        self.name()
    }

    /// Open a new physical connection
    fn connect(
        &self,
        url: &str,
        properties: &ConnectionProperties,
    ) -> Result<Box<dyn RawConnection>>;

    /// Open a connection and immediately check it responds
    fn test_connection(&self, url: &str, properties: &ConnectionProperties) -> Result<()> {
        let mut conn = self.connect(url, properties)?;
        let valid = conn.is_valid(Duration::from_secs(5))?;
        conn.close()?;
        if valid {
            Ok(())
        } else {
            Err(SluiceError::Connection(format!(
                "{} connection to '{}' did not validate",
                self.name(),
                url
            )))
        }
    }
}

/// Additional driver-specific connection parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionProperties {
    values: HashMap<String, String>,
}

impl ConnectionProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a connection parameter
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    /// Set a connection parameter in place
    pub fn insert(&mut self, key: &str, value: impl ToString) {
        self.values.insert(key.to_string(), value.to_string());
    }

    /// Get a string parameter
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Get a boolean parameter, accepting `true/false`, `on/off`, `1/0`
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "on" | "1" | "yes" => Ok(Some(true)),
                "false" | "off" | "0" | "no" => Ok(Some(false)),
                _ => Err(SluiceError::Configuration(format!(
                    "property '{}' expects a boolean, got '{}'",
                    key, raw
                ))),
            },
        }
    }

    /// Get an unsigned integer parameter
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        self.get(key)
            .map(|raw| {
                raw.parse::<u64>().map_err(|_| {
                    SluiceError::Configuration(format!(
                        "property '{}' expects an unsigned integer, got '{}'",
                        key, raw
                    ))
                })
            })
            .transpose()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConnectionProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
