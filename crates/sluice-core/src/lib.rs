//! Sluice Core - Core abstractions shared by the pool, the transaction
//! manager and the drivers
//!
//! This crate defines:
//!
//! - `SluiceError` - The error taxonomy used across all Sluice crates
//! - `IsolationLevel` - Transaction isolation levels and their driver constants
//! - `RawConnection` / `RawStatement` - The capability surface a driver exposes
//! - `Driver` / `DriverRegistry` - Opening raw connections by driver name
//! - Common value types like `Value`, `Row` and `QueryResult`

mod connection;
mod driver;
mod error;
mod isolation;
mod registry;
mod types;

pub use connection::*;
pub use driver::*;
pub use error::*;
pub use isolation::*;
pub use registry::DriverRegistry;
pub use types::*;
