//! Collaborator seams behind the image service.
//!
//! The service only talks to these traits; `LocalImageStore`,
//! `TransportResolver` and `DockerfileBuilder` are the on-disk and network
//! implementations.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wharf_core::error::{Result, WharfError};

use crate::build::dockerfile::Instruction;
use crate::oci::credentials::RegistryAuth;
use crate::oci::image_config::History;
use crate::oci::manifest::ManifestFormat;
use crate::oci::reference::TransportRef;

/// Sink for human-readable progress lines produced by long operations.
pub type Progress = Box<dyn std::io::Write + Send>;

/// Index record of a locally stored image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredImage {
    /// Hex SHA-256 of the image config; never changes
    pub id: String,
    /// Fully-qualified names, in the order they were added
    pub names: Vec<String>,
    /// Manifest digests ("sha256:…")
    pub digests: Vec<String>,
    pub parent: Option<String>,
    pub created: DateTime<Utc>,
    /// Media type of the stored manifest
    pub manifest_type: String,
}

impl StoredImage {
    /// First name, or the short id for untagged images.
    pub fn display_name(&self) -> String {
        self.names
            .first()
            .cloned()
            .unwrap_or_else(|| self.id.chars().take(12).collect())
    }

    pub fn is_dangling(&self) -> bool {
        self.names.is_empty()
    }
}

/// One entry of an image's layer history.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerHistory {
    /// Image id for the topmost entry, `<missing>` otherwise
    pub id: String,
    pub created: Option<DateTime<Utc>>,
    pub created_by: String,
    pub size: u64,
    pub comment: String,
}

/// Container as recorded by the container manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image_id: String,
    #[serde(default)]
    pub running: bool,
    /// Root filesystem directory captured by commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rootfs: Option<PathBuf>,
}

/// A single registry search hit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchResult {
    pub name: String,
    pub description: String,
    pub star_count: u64,
    pub is_official: bool,
    pub is_automated: bool,
    /// Registry the hit came from
    pub index: String,
}

/// Per-call registry settings.
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    pub auth: RegistryAuth,
    /// `Some(false)` accepts invalid certificates
    pub tls_verify: Option<bool>,
    /// Directory of extra `*.crt` root certificates
    pub cert_dir: Option<PathBuf>,
    /// Forwarded; policy evaluation is not performed
    pub signature_policy: Option<PathBuf>,
}

impl RegistryOptions {
    pub fn accept_invalid_certificates(&self) -> bool {
        self.tls_verify == Some(false)
    }
}

/// Push of one stored image to a transport-qualified destination.
#[derive(Debug, Clone)]
pub struct PushRequest {
    /// Id of the image being pushed
    pub image_id: String,
    /// Layout directory of the image
    pub layout_dir: PathBuf,
    pub destination: TransportRef,
    /// `None` lets the destination transport choose
    pub manifest_format: Option<ManifestFormat>,
    pub compress: bool,
    /// Extra names written into archive destinations
    pub additional_tags: Vec<String>,
    pub remove_signatures: bool,
    pub options: RegistryOptions,
}

/// Import of a root filesystem tarball as a new single-layer image.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Local tarball (plain or gzip)
    pub source: PathBuf,
    /// Name for the new image; untagged when `None`
    pub reference: Option<String>,
    pub changes: Vec<Instruction>,
    pub history: History,
}

/// Commit of a container's root filesystem as a new image.
#[derive(Debug, Clone)]
pub struct CommitOptions {
    /// Name for the new image; untagged when empty
    pub reference: String,
    pub changes: Vec<Instruction>,
    pub author: String,
    pub message: String,
    pub pause: bool,
    pub format: ManifestFormat,
}

/// When FROM images are fetched from a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    Always,
    #[default]
    IfMissing,
    Never,
}

impl std::str::FromStr for PullPolicy {
    type Err = WharfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "" | "missing" | "ifmissing" | "ifnotpresent" => Ok(Self::IfMissing),
            "never" => Ok(Self::Never),
            other => Err(WharfError::InvalidArgument(format!(
                "unknown pull policy {:?}",
                other
            ))),
        }
    }
}

/// Resource limits applied to RUN steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceLimits {
    pub add_hosts: Vec<String>,
    pub cgroup_parent: String,
    pub cpu_period: u64,
    pub cpu_quota: i64,
    pub cpu_shares: u64,
    pub cpuset_cpus: String,
    pub cpuset_mems: String,
    pub memory: i64,
    pub memory_swap: i64,
    pub shm_size: String,
    pub ulimits: Vec<String>,
}

/// Everything the build engine needs for one build.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub context_dir: PathBuf,
    /// Absolute local paths or remote URLs, concatenated in order
    pub dockerfiles: Vec<String>,
    /// Primary name of the produced image
    pub output: String,
    pub additional_tags: Vec<String>,
    pub labels: Vec<String>,
    pub annotations: Vec<String>,
    pub build_args: HashMap<String, String>,
    pub pull_policy: PullPolicy,
    pub squash: bool,
    pub layers: bool,
    pub no_cache: bool,
    pub output_format: Option<ManifestFormat>,
    pub resources: ResourceLimits,
    pub quiet: bool,
    pub registry: RegistryOptions,
}

/// Local image and container store.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// All stored images.
    async fn images(&self) -> Result<Vec<StoredImage>>;

    /// Resolve a name, id or unique id prefix. `ImageNotFound` when nothing matches.
    async fn lookup(&self, name_or_id: &str) -> Result<StoredImage>;

    async fn labels(&self, image: &StoredImage) -> Result<BTreeMap<String, String>>;

    /// Containers created from `image`.
    async fn containers(&self, image: &StoredImage) -> Result<Vec<ContainerRecord>>;

    async fn repo_digests(&self, image: &StoredImage) -> Result<Vec<String>>;

    /// Size of the image's own blobs.
    async fn size(&self, image: &StoredImage) -> Result<u64>;

    /// Size of the image plus its ancestors.
    async fn virtual_size(&self, image: &StoredImage) -> Result<u64>;

    /// Whether another image names this one as parent.
    async fn is_parent(&self, image: &StoredImage) -> Result<bool>;

    /// Newest entry first.
    async fn history(&self, image: &StoredImage) -> Result<Vec<LayerHistory>>;

    /// Structured inspect document.
    async fn inspect(&self, image: &StoredImage) -> Result<serde_json::Value>;

    /// OCI layout directory holding the image.
    async fn layout_path(&self, image: &StoredImage) -> Result<PathBuf>;

    /// Add a (normalized) name, moving it off any image that held it.
    async fn tag(&self, image: &StoredImage, name: &str) -> Result<()>;

    /// Remove or untag `image`, addressed by the caller as `input`. Returns the id.
    async fn remove(&self, image: &StoredImage, input: &str, force: bool) -> Result<String>;

    /// Remove unused images. Returns removed ids.
    async fn prune(&self, all: bool) -> Result<Vec<String>>;

    async fn import(&self, options: ImportOptions) -> Result<StoredImage>;

    /// Load every image in a `docker-archive:` or `oci-archive:` location.
    async fn load_archive(&self, location: &TransportRef) -> Result<Vec<StoredImage>>;

    /// Copy an OCI layout into the store under `names`.
    async fn add_layout(
        &self,
        dir: &Path,
        names: &[String],
        parent: Option<String>,
    ) -> Result<StoredImage>;

    /// Resolve a container name or id. `ContainerNotFound` when nothing matches.
    async fn lookup_container(&self, name_or_id: &str) -> Result<ContainerRecord>;

    async fn commit(
        &self,
        container: &ContainerRecord,
        options: CommitOptions,
    ) -> Result<StoredImage>;
}

/// Registry and archive transports.
#[async_trait]
pub trait ImageTransport: Send + Sync {
    /// Pull `name` from a registry into the local store.
    async fn pull(&self, name: &str, options: &RegistryOptions) -> Result<StoredImage>;

    /// Copy a stored image to its destination, writing progress lines.
    async fn push(&self, request: PushRequest, progress: Progress) -> Result<()>;

    /// Query one registry's search endpoint.
    async fn search(
        &self,
        registry: &str,
        term: &str,
        limit: usize,
        options: &RegistryOptions,
    ) -> Result<Vec<SearchResult>>;
}

/// Dockerfile build engine.
#[async_trait]
pub trait BuildEngine: Send + Sync {
    /// Run a build, writing progress lines. Returns the new image id.
    async fn build(&self, options: BuildOptions, progress: Progress) -> Result<String>;
}
