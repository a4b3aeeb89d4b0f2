//! Purpose: Bitmap-index query engine plus the harness pieces built on it.
//! Exports: `api` (session facade), `abi` (C ABI), `core`, `logging`, `selftest`.
//! Role: Library backing the `bitsel` binary, the C ABI, and integration tests.
//! Invariants: Bindings go through `api::Session`; `core` modules take explicit inputs.
pub mod abi;
pub mod api;
pub mod core;
pub mod logging;
pub mod selftest;
