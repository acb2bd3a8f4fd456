//! Common test utilities for worker integration tests
//!
//! This module provides shared test infrastructure for integration tests,
//! including template fixtures and re-exports of the shared test doubles.

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod fixtures;

pub use fixtures::*;
pub use librarian_test_utils::*;
