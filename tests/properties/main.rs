//! Property test suite entry point.

mod determinism_tests;
mod snippet_tests;
