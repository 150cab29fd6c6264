//! Integration test suite entry point.

mod indexing_workflow;
mod search_workflow;
