//! Image operations exposed over the wire.
//!
//! Build and push run through the [`Coordinator`]; every other operation
//! completes on the caller's task and replies once.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use wharf_core::config::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_SEARCH_LIMIT};
use wharf_core::error::{Result, WharfError};
use wharf_core::WharfConfig;
use wharf_runtime::backend::{
    self, BuildEngine, CommitOptions, ImageBackend, ImageTransport, ImportOptions, PullPolicy,
    PushRequest, RegistryOptions, ResourceLimits, StoredImage,
};
use wharf_runtime::build::is_remote_reference;
use wharf_runtime::oci::archive::unpack_archive;
use wharf_runtime::oci::changes::parse_changes;
use wharf_runtime::oci::credentials::{parse_registry_creds, resolve_auth};
use wharf_runtime::oci::image_config::History;
use wharf_runtime::oci::layout::copy_dir_recursive;
use wharf_runtime::oci::manifest::ManifestFormat;
use wharf_runtime::oci::reference::{normalize_name, ImageReference, TransportRef};
use wharf_runtime::runlabel;

use crate::coordinator::{Coordinator, ReplyStream};
use crate::types::{
    BuildInfo, CommitParams, ExportImageParams, Image, ImageHistory, ImageSearchResult,
    ImportImageParams, MoreResponse, PullImageParams, PushImageParams, Runlabel,
};

/// Service-wide settings taken from the daemon configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Registries queried by search, in order
    pub registries: Vec<String>,
    /// Per-registry result limit when the caller gives none
    pub search_limit: usize,
    /// Drain-loop sleep for streaming calls
    pub poll_interval: Duration,
    /// Used when a call names no signature policy of its own
    pub signature_policy: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            registries: vec!["docker.io".to_string()],
            search_limit: DEFAULT_SEARCH_LIMIT,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            signature_policy: None,
        }
    }
}

impl From<&WharfConfig> for ServiceConfig {
    fn from(config: &WharfConfig) -> Self {
        Self {
            registries: config.registries.clone(),
            search_limit: config.search_limit,
            poll_interval: config.poll_interval(),
            signature_policy: config.signature_policy_path.clone(),
        }
    }
}

/// The image operations service.
pub struct ImageService {
    backend: Arc<dyn ImageBackend>,
    transport: Arc<dyn ImageTransport>,
    builder: Arc<dyn BuildEngine>,
    coordinator: Coordinator,
    config: ServiceConfig,
}

impl ImageService {
    pub fn new(
        backend: Arc<dyn ImageBackend>,
        transport: Arc<dyn ImageTransport>,
        builder: Arc<dyn BuildEngine>,
        config: ServiceConfig,
    ) -> Self {
        let coordinator = Coordinator::new(backend.clone(), config.poll_interval);
        Self {
            backend,
            transport,
            builder,
            coordinator,
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// All local images. One failing lookup fails the whole listing.
    pub async fn list_images(&self) -> Result<Vec<Image>> {
        let images = self.backend.images().await?;
        let mut list = Vec::with_capacity(images.len());
        for image in &images {
            let mut record = self.describe(image).await?;
            record.is_parent = self.backend.is_parent(image).await?;
            list.push(record);
        }
        Ok(list)
    }

    pub async fn get_image(&self, id: &str) -> Result<Image> {
        let image = self.backend.lookup(id).await?;
        self.describe(&image).await
    }

    /// Inspect document serialized as a JSON string.
    pub async fn inspect_image(&self, name: &str) -> Result<String> {
        let image = self.backend.lookup(name).await?;
        let document = self.backend.inspect(&image).await?;
        Ok(serde_json::to_string(&document)?)
    }

    pub async fn history_image(&self, name: &str) -> Result<Vec<ImageHistory>> {
        let image = self.backend.lookup(name).await?;
        let history = self.backend.history(&image).await?;
        Ok(history
            .into_iter()
            .map(|entry| ImageHistory {
                id: entry.id,
                created: entry.created.map(|c| c.to_rfc3339()).unwrap_or_default(),
                created_by: entry.created_by,
                tags: image.names.clone(),
                size: to_i64(entry.size),
                comment: entry.comment,
            })
            .collect())
    }

    /// Build an image from a context archive and a set of Dockerfiles.
    pub async fn build_image(&self, info: BuildInfo, stream: &ReplyStream) -> Result<MoreResponse> {
        let output_format = match info.output_format.as_str() {
            "" => None,
            keyword => Some(ManifestFormat::from_commit_keyword(keyword)?),
        };
        let pull_policy: PullPolicy = info.pull_policy.parse()?;
        if !info.compression.is_empty() {
            tracing::debug!(compression = %info.compression, "Layers are always stored gzip-compressed");
        }

        let context = tempfile::Builder::new().prefix("wharf-build").tempdir()?;
        let source = Path::new(&info.context_dir);
        if source.is_dir() {
            copy_dir_recursive(source, context.path())?;
        } else {
            unpack_archive(source, context.path())?;
        }
        tracing::debug!(
            source = %source.display(),
            context = %context.path().display(),
            "Prepared build context"
        );

        let dockerfiles = if info.dockerfiles.is_empty() {
            vec!["Dockerfile".to_string()]
        } else {
            info.dockerfiles.clone()
        };
        let options = backend::BuildOptions {
            context_dir: context.path().to_path_buf(),
            dockerfiles: rewrite_dockerfiles(context.path(), &dockerfiles),
            output: info.output.clone(),
            additional_tags: info.additional_tags,
            labels: info.label,
            annotations: info.annotations,
            build_args: info.build_args,
            pull_policy,
            squash: info.squash,
            layers: info.layers,
            no_cache: info.nocache,
            output_format,
            resources: resource_limits(&info.build_options),
            quiet: info.quiet,
            registry: RegistryOptions {
                signature_policy: self.signature_policy(&info.signature_policy_path),
                ..Default::default()
            },
        };

        tracing::info!(output = %info.output, "Building image");
        let builder = self.builder.clone();
        let output = info.output;
        self.coordinator
            .run(stream, move |progress| async move {
                // The context directory lives exactly as long as the build.
                let _context = context;
                let id = builder.build(options, Box::new(progress)).await?;
                Ok(if output.is_empty() { id } else { output })
            })
            .await
    }

    /// Push a stored image to a registry or any other transport.
    pub async fn push_image(
        &self,
        params: PushImageParams,
        stream: &ReplyStream,
    ) -> Result<MoreResponse> {
        let image = self.backend.lookup(&params.name).await?;
        let options = self.registry_options(
            &params.creds,
            params.tls_verify,
            &params.cert_dir,
            &params.signature_policy,
        )?;
        let manifest_format = match params.format.as_str() {
            "" => None,
            keyword => Some(ManifestFormat::from_keyword(keyword)?),
        };
        if !params.sign_by.is_empty() {
            return Err(WharfError::InvalidArgument(format!(
                "cannot sign with {:?}: image signing is not supported",
                params.sign_by
            )));
        }

        let destination = if params.tag.is_empty() {
            &params.name
        } else {
            &params.tag
        };
        let request = PushRequest {
            image_id: image.id.clone(),
            layout_dir: self.backend.layout_path(&image).await?,
            destination: TransportRef::parse_heuristic(destination)?,
            manifest_format,
            compress: params.compress,
            additional_tags: Vec::new(),
            remove_signatures: params.remove_signatures,
            options,
        };

        tracing::info!(image = %params.name, destination = %destination, "Pushing image");
        let transport = self.transport.clone();
        let image_id = image.id;
        self.coordinator
            .run(stream, move |progress| async move {
                transport.push(request, Box::new(progress)).await?;
                Ok(image_id)
            })
            .await
    }

    pub async fn tag_image(&self, name: &str, tagged: &str) -> Result<String> {
        let image = self.backend.lookup(name).await?;
        self.backend.tag(&image, tagged).await?;
        tracing::info!(image_id = %image.id, tag = %tagged, "Tagged image");
        Ok(image.id)
    }

    pub async fn remove_image(&self, name: &str, force: bool) -> Result<String> {
        let image = self.backend.lookup(name).await?;
        let id = self.backend.remove(&image, name, force).await?;
        tracing::info!(image = %name, image_id = %id, force, "Removed image");
        Ok(id)
    }

    /// Search every configured registry.
    ///
    /// With more than one registry a failing registry is skipped, whatever
    /// the cause (authentication failures included); with a single registry
    /// its failure is the call's failure.
    pub async fn search_images(
        &self,
        query: &str,
        limit: Option<i64>,
    ) -> Result<Vec<ImageSearchResult>> {
        if query.trim().is_empty() {
            return Err(WharfError::InvalidArgument(
                "search query must not be empty".to_string(),
            ));
        }
        let limit = limit
            .filter(|l| *l > 0)
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(self.config.search_limit);
        let options = RegistryOptions {
            signature_policy: self.config.signature_policy.clone(),
            ..Default::default()
        };

        let mut results = Vec::new();
        for registry in &self.config.registries {
            match self.transport.search(registry, query, limit, &options).await {
                Ok(hits) => results.extend(hits.into_iter().map(|hit| ImageSearchResult {
                    description: hit.description,
                    is_official: hit.is_official,
                    is_automated: hit.is_automated,
                    name: hit.name,
                    star_count: to_i64(hit.star_count),
                })),
                Err(e) if self.config.registries.len() > 1 => {
                    tracing::warn!(registry = %registry, error = %e, "Search failed, skipping registry");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    /// Remove every image no container uses, children before their parents.
    /// Stops at the first failure.
    ///
    /// An unused image stays while a child image that is still in use
    /// depends on it.
    pub async fn delete_unused_images(&self) -> Result<Vec<String>> {
        let images = self.backend.images().await?;
        let mut unused = HashSet::new();
        for image in &images {
            if self.backend.containers(image).await?.is_empty() {
                unused.insert(image.id.clone());
            }
        }

        let order = removal_order(&images, &unused);
        let mut deleted = Vec::new();
        for id in &order {
            if let Some(image) = images.iter().find(|i| &i.id == id) {
                deleted.push(self.backend.remove(image, &image.id, false).await?);
            }
        }
        let kept = unused.len() - order.len();
        if kept > 0 {
            tracing::debug!(count = kept, "Kept unused images with children in use");
        }
        tracing::info!(count = deleted.len(), "Deleted unused images");
        Ok(deleted)
    }

    /// Commit a container's filesystem as a new image.
    pub async fn commit(&self, params: CommitParams) -> Result<String> {
        let container = self.backend.lookup_container(&params.name).await?;
        let format = ManifestFormat::from_commit_keyword(&params.manifest_type)?;
        let changes = parse_changes(&params.changes)?;

        let image = self
            .backend
            .commit(
                &container,
                CommitOptions {
                    reference: params.image_name,
                    changes,
                    author: params.author,
                    message: params.message,
                    pause: params.pause,
                    format,
                },
            )
            .await?;
        tracing::info!(container = %container.name, image_id = %image.id, "Committed container");
        Ok(image.id)
    }

    /// Import a root filesystem tarball (path or http(s) URL) as a new image.
    pub async fn import_image(&self, params: ImportImageParams) -> Result<String> {
        let changes = parse_changes(&params.changes)?;
        let history = History {
            created: Some(Utc::now().to_rfc3339()),
            comment: (!params.message.is_empty()).then(|| params.message.clone()),
            ..Default::default()
        };

        let remote = is_url(&params.source);
        let download = if remote {
            Some(download(&params.source).await?)
        } else {
            None
        };
        let source = match &download {
            Some((_dir, path)) => path.clone(),
            None => PathBuf::from(&params.source),
        };

        let image = self
            .backend
            .import(ImportOptions {
                source,
                reference: (!params.reference.is_empty()).then(|| params.reference.clone()),
                changes,
                history,
            })
            .await?;
        tracing::info!(source = %params.source, image_id = %image.id, "Imported image");

        if params.delete {
            if remote {
                tracing::debug!(source = %params.source, "Nothing to delete for a downloaded source");
            } else {
                std::fs::remove_file(&params.source).map_err(|e| {
                    std::io::Error::new(
                        e.kind(),
                        format!("failed to remove {}: {}", params.source, e),
                    )
                })?;
            }
        }
        Ok(image.id)
    }

    /// Copy an image to a transport-qualified destination.
    pub async fn export_image(&self, params: ExportImageParams) -> Result<String> {
        let image = self.backend.lookup(&params.name).await?;
        let additional_tags = params
            .tags
            .iter()
            .map(|tag| normalize_name(tag))
            .collect::<Result<Vec<_>>>()?;
        let request = PushRequest {
            image_id: image.id.clone(),
            layout_dir: self.backend.layout_path(&image).await?,
            destination: TransportRef::parse(&params.destination)?,
            manifest_format: None,
            compress: params.compress,
            additional_tags,
            remove_signatures: false,
            options: RegistryOptions {
                signature_policy: self.config.signature_policy.clone(),
                ..Default::default()
            },
        };
        self.transport
            .push(request, Box::new(std::io::sink()))
            .await?;
        tracing::info!(image_id = %image.id, destination = %params.destination, "Exported image");
        Ok(image.id)
    }

    /// Pull from a registry, or load from a `docker-archive:`/`oci-archive:` location.
    pub async fn pull_image(&self, params: PullImageParams) -> Result<String> {
        let options = self.registry_options(
            &params.creds,
            params.tls_verify,
            &params.cert_dir,
            &params.signature_policy,
        )?;

        match TransportRef::parse_heuristic(&params.name)? {
            location if location.is_archive() => {
                let images = self.backend.load_archive(&location).await?;
                let first = images.into_iter().next().ok_or_else(|| {
                    WharfError::StoreError(format!("no images found in {}", params.name))
                })?;
                tracing::info!(source = %params.name, image_id = %first.id, "Loaded image");
                Ok(first.id)
            }
            TransportRef::Docker(_) => {
                let image = self.transport.pull(&params.name, &options).await?;
                Ok(image.id)
            }
            other => Err(WharfError::InvalidArgument(format!(
                "cannot pull from the {} transport",
                other.transport_name()
            ))),
        }
    }

    /// `0` when the image exists, `1` when it does not.
    pub async fn image_exists(&self, name: &str) -> Result<i64> {
        match self.backend.lookup(name).await {
            Ok(_) => Ok(0),
            Err(e) if e.is_image_not_found() => Ok(1),
            Err(e) => Err(e),
        }
    }

    /// Run the command stored in one of an image's labels.
    pub async fn container_runlabel(&self, input: Runlabel) -> Result<()> {
        if input.label.is_empty() {
            return Err(WharfError::InvalidArgument(
                "a label name is required".to_string(),
            ));
        }

        let image = match self.backend.lookup(&input.image).await {
            Ok(image) => image,
            Err(e) if e.is_image_not_found() && input.pull => {
                let reference = ImageReference::parse(&input.image)?;
                let auth_file = (!input.authfile.is_empty()).then(|| Path::new(&input.authfile));
                let options = RegistryOptions {
                    auth: resolve_auth(&input.creds, auth_file, &reference.registry)?,
                    tls_verify: input.tls_verify,
                    cert_dir: non_empty_path(&input.cert_dir),
                    signature_policy: self.signature_policy(&input.signature_policy_path),
                };
                self.transport.pull(&input.image, &options).await?
            }
            Err(e) => return Err(e),
        };

        let labels = self.backend.labels(&image).await?;
        let template = labels
            .get(&input.label)
            .map(|v| v.trim())
            .unwrap_or_default();
        if template.is_empty() {
            return Err(WharfError::EmptyLabel {
                image: input.image,
                label: input.label,
            });
        }

        let image_name = image
            .names
            .first()
            .cloned()
            .unwrap_or_else(|| input.image.clone());
        let command = runlabel::generate_command(
            template,
            &image_name,
            &input.name,
            &input.opts,
            &input.extra_args,
        )?;
        if input.display {
            tracing::info!(program = %command.program, args = ?command.args, "Run label command");
            return Ok(());
        }
        runlabel::execute(&command).await
    }

    pub async fn images_prune(&self, all: bool) -> Result<Vec<String>> {
        let pruned = self.backend.prune(all).await?;
        tracing::info!(count = pruned.len(), all, "Pruned images");
        Ok(pruned)
    }

    async fn describe(&self, image: &StoredImage) -> Result<Image> {
        let labels = self.backend.labels(image).await?;
        let containers = self.backend.containers(image).await?;
        let repo_digests = self.backend.repo_digests(image).await?;
        let size = self.backend.size(image).await?;
        let virtual_size = self.backend.virtual_size(image).await?;
        Ok(Image {
            id: image.id.clone(),
            parent_id: image.parent.clone().unwrap_or_default(),
            repo_tags: image.names.clone(),
            repo_digests,
            created: image.created.to_rfc3339(),
            size: to_i64(size),
            virtual_size: to_i64(virtual_size),
            containers: to_i64(containers.len() as u64),
            labels,
            is_parent: false,
        })
    }

    fn registry_options(
        &self,
        creds: &str,
        tls_verify: Option<bool>,
        cert_dir: &str,
        signature_policy: &str,
    ) -> Result<RegistryOptions> {
        Ok(RegistryOptions {
            auth: parse_registry_creds(creds)?,
            tls_verify,
            cert_dir: non_empty_path(cert_dir),
            signature_policy: self.signature_policy(signature_policy),
        })
    }

    fn signature_policy(&self, requested: &str) -> Option<PathBuf> {
        non_empty_path(requested).or_else(|| self.config.signature_policy.clone())
    }
}

/// Rebase local Dockerfile entries onto the unpacked context by file name.
/// Remote references pass through unchanged.
pub fn rewrite_dockerfiles(context_dir: &Path, dockerfiles: &[String]) -> Vec<String> {
    dockerfiles
        .iter()
        .map(|entry| {
            if is_remote_reference(entry) {
                return entry.clone();
            }
            let base = Path::new(entry)
                .file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_else(|| entry.into());
            context_dir.join(base).to_string_lossy().into_owned()
        })
        .collect()
}

/// Ids from `unused` in an order the store accepts: an image goes only once
/// no remaining image names it as parent. Images held by a remaining child
/// are left out.
fn removal_order(images: &[StoredImage], unused: &HashSet<String>) -> Vec<String> {
    let mut present: HashSet<&str> = images.iter().map(|i| i.id.as_str()).collect();
    let mut order = Vec::new();
    loop {
        let ready: Vec<&str> = images
            .iter()
            .filter(|c| unused.contains(&c.id) && present.contains(c.id.as_str()))
            .filter(|c| {
                !images.iter().any(|i| {
                    present.contains(i.id.as_str()) && i.parent.as_deref() == Some(c.id.as_str())
                })
            })
            .map(|c| c.id.as_str())
            .collect();
        if ready.is_empty() {
            return order;
        }
        for id in ready {
            present.remove(id);
            order.push(id.to_string());
        }
    }
}

fn resource_limits(options: &crate::types::BuildOptions) -> ResourceLimits {
    let mut ulimits = options.ulimit.clone();
    if !options.volume.is_empty() {
        tracing::debug!(volumes = ?options.volume, "Build volumes are not mounted");
    }
    ulimits.retain(|u| !u.is_empty());
    ResourceLimits {
        add_hosts: options.add_hosts.clone(),
        cgroup_parent: options.cgroup_parent.clone(),
        cpu_period: u64::try_from(options.cpu_period).unwrap_or(0),
        cpu_quota: options.cpu_quota,
        cpu_shares: u64::try_from(options.cpu_shares).unwrap_or(0),
        cpuset_cpus: options.cpuset_cpus.clone(),
        cpuset_mems: options.cpuset_mems.clone(),
        memory: options.memory,
        memory_swap: options.memory_swap,
        shm_size: options.shm_size.clone(),
        ulimits,
    }
}

fn non_empty_path(path: &str) -> Option<PathBuf> {
    (!path.is_empty()).then(|| PathBuf::from(path))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Download `url` into a scratch directory. The directory goes away with
/// the returned guard.
async fn download(url: &str) -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::Builder::new().prefix("wharf-import").tempdir()?;
    let path = dir.path().join("rootfs.tar");
    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| WharfError::registry(url, format!("download failed: {}", e)))?;
    let body = response
        .bytes()
        .await
        .map_err(|e| WharfError::registry(url, format!("download failed: {}", e)))?;
    tokio::fs::write(&path, &body).await?;
    tracing::debug!(url, bytes = body.len(), "Downloaded import source");
    Ok((dir, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_dockerfiles() {
        let context = Path::new("/tmp/ctx123");
        let rewritten = rewrite_dockerfiles(
            context,
            &[
                "Dockerfile".to_string(),
                "https://example.com/Dockerfile".to_string(),
                "sub/Dockerfile2".to_string(),
            ],
        );
        assert_eq!(
            rewritten,
            vec![
                "/tmp/ctx123/Dockerfile",
                "https://example.com/Dockerfile",
                "/tmp/ctx123/Dockerfile2"
            ]
        );
    }

    #[test]
    fn test_rewrite_keeps_vcs_references() {
        let rewritten = rewrite_dockerfiles(
            Path::new("/tmp/ctx"),
            &[
                "git://example.com/repo".to_string(),
                "github.com/org/repo".to_string(),
                "/abs/path/Containerfile".to_string(),
            ],
        );
        assert_eq!(
            rewritten,
            vec![
                "git://example.com/repo",
                "github.com/org/repo",
                "/tmp/ctx/Containerfile"
            ]
        );
    }

    fn stored(id: &str, parent: Option<&str>) -> StoredImage {
        StoredImage {
            id: id.to_string(),
            names: Vec::new(),
            digests: Vec::new(),
            parent: parent.map(str::to_string),
            created: Utc::now(),
            manifest_type: String::new(),
        }
    }

    #[test]
    fn test_removal_order_children_first() {
        let images = vec![
            stored("base", None),
            stored("mid", Some("base")),
            stored("app", Some("mid")),
            stored("other", None),
        ];
        let unused: HashSet<String> = ["base", "mid", "app", "other"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            removal_order(&images, &unused),
            vec!["app", "other", "mid", "base"]
        );
    }

    #[test]
    fn test_removal_order_keeps_parents_of_used_children() {
        let images = vec![
            stored("base", None),
            stored("mid", Some("base")),
            stored("app", Some("mid")),
            stored("sibling", Some("base")),
        ];
        // "app" has a container, so its ancestors stay
        let unused: HashSet<String> = ["base", "mid", "sibling"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(removal_order(&images, &unused), vec!["sibling"]);
    }

    #[test]
    fn test_resource_limits_mapping() {
        let limits = resource_limits(&crate::types::BuildOptions {
            cpu_period: -1,
            cpu_shares: 512,
            memory: 1 << 20,
            ulimit: vec!["nofile=1024".to_string(), String::new()],
            ..Default::default()
        });
        assert_eq!(limits.cpu_period, 0);
        assert_eq!(limits.cpu_shares, 512);
        assert_eq!(limits.memory, 1 << 20);
        assert_eq!(limits.ulimits, vec!["nofile=1024".to_string()]);
    }

    #[test]
    fn test_service_config_from_wharf_config() {
        let mut config = WharfConfig::default();
        config.registries = vec!["quay.io".to_string(), "docker.io".to_string()];
        config.poll_interval_ms = 250;
        let service = ServiceConfig::from(&config);
        assert_eq!(service.registries.len(), 2);
        assert_eq!(service.poll_interval, Duration::from_millis(250));
        assert_eq!(service.search_limit, DEFAULT_SEARCH_LIMIT);
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/rootfs.tar"));
        assert!(is_url("http://example.com/rootfs.tar"));
        assert!(!is_url("/tmp/rootfs.tar"));
    }
}
