pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::*;
pub use errors::*;
pub use logging::init_logging;
pub use models::*;
pub use traits::*;

/// Unified Result type for the coordination crates.
pub type CoordinationResult<T> = std::result::Result<T, CoordinationError>;
