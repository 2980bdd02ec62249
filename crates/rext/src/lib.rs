#![forbid(unsafe_code)]
//! rext public API facade.
//!
//! Re-exports the volume reader from `rext-core` through one stable
//! external interface. This is the crate downstream consumers (CLI,
//! harness) depend on.

pub use rext_core::*;
