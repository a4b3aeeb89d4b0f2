//! Purpose: Define the public Rust API boundary for bitsel.
//! Exports: `Session` plus the value, query, and error types it hands out.
//! Role: Public surface used by the CLI, the self-test, the C ABI, and tests.
//! Invariants: Storage internals (buffer, partition files, index files) stay behind `Session`.

mod session;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::column::{ColumnType, ColumnValues, Qualified};
pub use crate::core::config::Config;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::index::IndexSpec;
pub use crate::core::query::{QueryHandle, ResultSet};
pub use session::{ApiResult, Session};
