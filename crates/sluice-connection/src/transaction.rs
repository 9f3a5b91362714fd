//! Context-scoped transactions
//!
//! A [`TransactionManager`] keeps at most one active transaction per
//! execution context. Callers identify their context with a [`TxContext`]
//! handle, obtained from the manager and passed to every data source call
//! that should take part in the transaction. The first connection a data
//! source hands out under an active transaction is bound to it and reused
//! for every later request until the transaction commits or rolls back.
//!
//! # Example
//!
//! ```ignore
//! let manager = TransactionManager::new();
//! let ctx = manager.context();
//!
//! ctx.transaction(IsolationLevel::Serializable, |ctx| {
//!     let conn = data_source.get_connection(ctx)?;
//!     conn.execute("UPDATE accounts SET balance = balance - 10 WHERE id = 1", &[])?;
//!     Ok::<_, SluiceError>(())
//! })?;
//! ```

mod context;
mod manager;
mod scope;


pub use context::TxContext;
pub use manager::{ContextId, TransactionManager};
pub(crate) use scope::ScopeView;
