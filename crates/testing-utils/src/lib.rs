//! # Pulse Testing Utils
//!
//! Shared testing utilities for the pulse workspace: builders for workflows,
//! task specs and definitions, plugin doubles with controllable latency and
//! failure, and an in-memory local task port for tribe tests.
//!
//! ```toml
//! [dev-dependencies]
//! pulse-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
