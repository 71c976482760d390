//! Utility functions and types for the advisory engine.

pub mod error;
pub mod logging;
pub mod time;

pub use error::Error;
pub use logging::init_logging;

/// Common result type for utility functions
pub type Result<T> = std::result::Result<T, Error>;
