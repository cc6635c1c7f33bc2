//! Wharf Server - image operations over a local RPC socket.
//!
//! - [`coordinator`] drives long-running calls (build, push) and streams
//!   their progress as partial replies
//! - [`image_service`] implements every image operation on top of the
//!   runtime collaborators
//! - [`server`] speaks the NUL-framed JSON protocol on a Unix socket

#![allow(clippy::result_large_err)]

pub mod coordinator;
pub mod error;
pub mod image_service;
pub mod protocol;
pub mod server;
pub mod types;

pub use coordinator::{Coordinator, OperationOutput, ReplyStream};
pub use image_service::{ImageService, ServiceConfig};
pub use server::WharfServer;

/// Wharf Server version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
