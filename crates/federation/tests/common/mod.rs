//! Test infrastructure for the federation engine.
//!
//! Provides scriptable provider handles, recording audit and error sinks, and
//! registry fixtures shared by the integration tests.

#![allow(dead_code)]

pub mod fixtures;
pub mod harness;

// Re-export commonly used items
pub use fixtures::*;
pub use harness::*;
