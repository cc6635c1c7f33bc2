//! OCI image handling.
//!
//! Every stored image is an OCI image layout:
//!
//! ```text
//! images/<id>/
//! ├── oci-layout           (OCI layout marker)
//! ├── index.json           (Image index)
//! └── blobs/
//!     └── sha256/
//!         ├── <manifest>   (Image manifest)
//!         ├── <config>     (Image configuration, digest = image id)
//!         └── <layers>     (gzip filesystem layers)
//! ```

pub mod archive;
pub mod changes;
pub mod credentials;
pub mod image_config;
pub mod layout;
pub mod manifest;
pub mod reference;
pub mod registry;
pub mod store;
pub mod transport;

pub use changes::{apply_changes, apply_instructions, parse_changes};
pub use credentials::{parse_registry_creds, resolve_auth, RegistryAuth};
pub use image_config::{History, ImageConfig};
pub use layout::{LayerBlob, OciLayout};
pub use manifest::{manifest_type_for, ManifestFormat};
pub use reference::{normalize_name, ImageReference, TransportRef};
pub use registry::RegistryClient;
pub use store::LocalImageStore;
pub use transport::TransportResolver;
