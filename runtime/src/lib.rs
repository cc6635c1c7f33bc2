//! Wharf Runtime - collaborators behind the image service.
//!
//! Provides the disk-backed image store, registry and archive transports,
//! the Dockerfile build engine and run-label templating. The service talks
//! to them through the traits in [`backend`].

#![allow(clippy::result_large_err)]

pub mod backend;
pub mod build;
pub mod oci;
pub mod runlabel;

// Re-export common types
pub use backend::{
    BuildEngine, BuildOptions, CommitOptions, ContainerRecord, ImageBackend, ImageTransport,
    ImportOptions, LayerHistory, Progress, PullPolicy, PushRequest, RegistryOptions,
    ResourceLimits, SearchResult, StoredImage,
};
pub use build::{is_remote_reference, Dockerfile, DockerfileBuilder, Instruction};
pub use oci::{
    manifest_type_for, parse_changes, parse_registry_creds, resolve_auth, ImageReference,
    LocalImageStore, ManifestFormat, RegistryAuth, TransportRef, TransportResolver,
};
pub use runlabel::{generate_command, RunLabelCommand};

/// Wharf Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
