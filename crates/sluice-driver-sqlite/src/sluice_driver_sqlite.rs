//! SQLite database driver implementation

mod connection;
mod driver;

pub use connection::{SqliteConnection, SqliteOptions};
pub use driver::SqliteDriver;
