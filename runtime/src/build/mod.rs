//! Dockerfile builds.
//!
//! Provides Dockerfile parsing, filesystem snapshots for layer creation, and
//! the build engine that turns a Dockerfile set into a stored image.
//!
//! # Supported Instructions
//!
//! FROM, RUN, COPY, ADD, WORKDIR, ENV, ENTRYPOINT, CMD, EXPOSE, LABEL, USER,
//! VOLUME, STOPSIGNAL, ARG

pub mod dockerfile;
pub mod engine;
pub mod layer;

pub use dockerfile::{Dockerfile, Instruction};
pub use engine::{is_remote_reference, DockerfileBuilder};
pub use layer::DirSnapshot;
