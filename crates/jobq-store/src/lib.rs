//! # Jobq Store
//!
//! Storage plumbing underneath the queue:
//!
//! ```text
//! MySqlQueue
//!   ↓  StoreBackend::pool()      (connection pool, init/close lifecycle)
//!   ↓  QueryRewriter             (logical → physical table/column names)
//!   ↓  TxHandle (root | child)   (nested transaction composition)
//! MySQL
//! ```

pub mod backend;
pub mod error;
pub mod rewriter;
pub mod txn;

pub use backend::*;
pub use error::*;
pub use rewriter::*;
pub use txn::*;
