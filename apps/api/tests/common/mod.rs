//! Common test utilities for API integration tests
//!
//! This module provides shared test infrastructure for integration tests,
//! including app builders, scripted commands, and request helpers.

#![allow(unused_imports, dead_code)]

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
