//! Utility functions and helpers.

pub mod cancel;
pub mod format;
pub mod fs;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use format::*;
pub use fs::*;
