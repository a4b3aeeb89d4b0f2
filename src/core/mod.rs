// Core modules implementing columnar storage, bitmap indexes, and query evaluation.
pub mod buffer;
pub mod column;
pub mod config;
pub mod error;
pub mod eval;
pub mod expr;
pub mod index;
pub mod partition;
pub mod query;
