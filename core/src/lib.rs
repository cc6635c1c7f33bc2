//! Wharf Core - shared error, configuration and logging types.
//!
//! Used by the runtime collaborators and by the RPC server.

pub mod config;
pub mod error;
pub mod log;

// Re-export commonly used types
pub use config::WharfConfig;
pub use error::{Result, WharfError};
pub use log::{init_tracing, LogConfig, LogFormat};

/// Wharf version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
