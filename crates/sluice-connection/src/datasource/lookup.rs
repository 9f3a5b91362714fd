//! Connection factories published by name

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sluice_core::{RawConnection, Result, SluiceError};

use super::source::ConnectionSource;

/// Directory of externally managed connection factories
pub trait NamingContext: Send + Sync {
    /// Resolve `name`, failing with `NotFound` if nothing is bound to it
    fn lookup(&self, name: &str) -> Result<Arc<dyn ConnectionSource>>;
}

/// Process-local naming context
#[derive(Default)]
pub struct InMemoryNamingContext {
    bindings: RwLock<HashMap<String, Arc<dyn ConnectionSource>>>,
}

impl InMemoryNamingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `source` under `name`; fails if the name is taken
    pub fn bind(&self, name: &str, source: Arc<dyn ConnectionSource>) -> Result<()> {
        let mut bindings = self.bindings.write();
        if bindings.contains_key(name) {
            return Err(SluiceError::Configuration(format!(
                "name '{}' is already bound",
                name
            )));
        }
        tracing::debug!(%name, source = %source.describe(), "bound connection source");
        bindings.insert(name.to_string(), source);
        Ok(())
    }

    /// Bind `source` under `name`, replacing any existing binding
    pub fn rebind(&self, name: &str, source: Arc<dyn ConnectionSource>) {
        tracing::debug!(%name, source = %source.describe(), "rebound connection source");
        self.bindings.write().insert(name.to_string(), source);
    }

    pub fn unbind(&self, name: &str) -> Option<Arc<dyn ConnectionSource>> {
        self.bindings.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.bindings.read().keys().cloned().collect()
    }
}

impl NamingContext for InMemoryNamingContext {
    fn lookup(&self, name: &str) -> Result<Arc<dyn ConnectionSource>> {
        self.bindings
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SluiceError::NotFound(format!("no connection source bound to '{}'", name)))
    }
}

/// Opens connections through whatever is bound to a name
///
/// The name is resolved on every open, so rebinding it redirects the
/// connections a data source creates from then on.
pub struct LookupSource {
    context: Arc<dyn NamingContext>,
    name: String,
}

impl LookupSource {
    pub fn new(context: Arc<dyn NamingContext>, name: impl Into<String>) -> Self {
        Self {
            context,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ConnectionSource for LookupSource {
    fn open(&self) -> Result<Box<dyn RawConnection>> {
        let source = self.context.lookup(&self.name)?;
        tracing::debug!(name = %self.name, source = %source.describe(), "opening raw connection via lookup");
        source.open()
    }

    fn describe(&self) -> String {
        format!("lookup:{}", self.name)
    }
}
