//! Shared utilities for contentflow integration tests.
//!
//! - `TestHarness`: isolated storage, in-memory database and queue, and a
//!   handler registry with canned extract/map steps
//! - `ConfigBuilder`: test configurations without boilerplate

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
