//! In-memory collaborators for driving the image service in tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use wharf_core::error::{Result, WharfError};
use wharf_runtime::backend::{
    BuildEngine, BuildOptions, CommitOptions, ContainerRecord, ImageBackend, ImageTransport,
    ImportOptions, LayerHistory, Progress, PushRequest, RegistryOptions, SearchResult,
    StoredImage,
};
use wharf_runtime::oci::reference::TransportRef;
use wharf_server::protocol::{Reply, Request};
use wharf_server::server::dispatch;
use wharf_server::{ImageService, ServiceConfig};

pub fn image(id: &str, names: &[&str]) -> StoredImage {
    StoredImage {
        id: id.to_string(),
        names: names.iter().map(|n| n.to_string()).collect(),
        digests: vec![format!("sha256:{}", id)],
        parent: None,
        created: Utc::now(),
        manifest_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
    }
}

pub fn container(id: &str, image_id: &str, running: bool) -> ContainerRecord {
    ContainerRecord {
        id: id.to_string(),
        name: format!("{}-name", id),
        image_id: image_id.to_string(),
        running,
        rootfs: None,
    }
}

/// Image store kept in memory.
#[derive(Default)]
pub struct MemoryBackend {
    pub images: Mutex<Vec<StoredImage>>,
    pub containers: Mutex<Vec<ContainerRecord>>,
    pub labels: Mutex<HashMap<String, BTreeMap<String, String>>>,
    pub imports: Mutex<Vec<ImportOptions>>,
    pub commits: Mutex<Vec<CommitOptions>>,
    pub loaded: Mutex<Vec<TransportRef>>,
    /// Every lookup fails with a store fault
    pub broken: AtomicBool,
}

impl MemoryBackend {
    pub fn with_images(images: Vec<StoredImage>) -> Arc<Self> {
        let backend = Self::default();
        *backend.images.lock() = images;
        Arc::new(backend)
    }

    pub fn add(&self, image: StoredImage) -> StoredImage {
        self.images.lock().push(image.clone());
        image
    }

    pub fn get(&self, id: &str) -> Option<StoredImage> {
        self.images.lock().iter().find(|i| i.id == id).cloned()
    }

    pub fn named(&self, name: &str) -> Option<StoredImage> {
        self.images
            .lock()
            .iter()
            .find(|i| i.names.iter().any(|n| n == name))
            .cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.images.lock().iter().map(|i| i.id.clone()).collect()
    }

    pub fn set_label(&self, id: &str, key: &str, value: &str) {
        self.labels
            .lock()
            .entry(id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.images.lock().len())
    }
}

#[async_trait]
impl ImageBackend for MemoryBackend {
    async fn images(&self) -> Result<Vec<StoredImage>> {
        Ok(self.images.lock().clone())
    }

    async fn lookup(&self, name_or_id: &str) -> Result<StoredImage> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(WharfError::StoreError("index is corrupt".to_string()));
        }
        self.images
            .lock()
            .iter()
            .find(|i| i.id == name_or_id || i.names.iter().any(|n| n == name_or_id))
            .cloned()
            .ok_or_else(|| WharfError::ImageNotFound(name_or_id.to_string()))
    }

    async fn labels(&self, image: &StoredImage) -> Result<BTreeMap<String, String>> {
        Ok(self.labels.lock().get(&image.id).cloned().unwrap_or_default())
    }

    async fn containers(&self, image: &StoredImage) -> Result<Vec<ContainerRecord>> {
        Ok(self
            .containers
            .lock()
            .iter()
            .filter(|c| c.image_id == image.id)
            .cloned()
            .collect())
    }

    async fn repo_digests(&self, image: &StoredImage) -> Result<Vec<String>> {
        Ok(image
            .names
            .iter()
            .zip(image.digests.iter())
            .map(|(name, digest)| format!("{}@{}", name, digest))
            .collect())
    }

    async fn size(&self, _image: &StoredImage) -> Result<u64> {
        Ok(1024)
    }

    async fn virtual_size(&self, image: &StoredImage) -> Result<u64> {
        Ok(if image.parent.is_some() { 2048 } else { 1024 })
    }

    async fn is_parent(&self, image: &StoredImage) -> Result<bool> {
        Ok(self
            .images
            .lock()
            .iter()
            .any(|i| i.parent.as_deref() == Some(image.id.as_str())))
    }

    async fn history(&self, image: &StoredImage) -> Result<Vec<LayerHistory>> {
        Ok(vec![
            LayerHistory {
                id: image.id.clone(),
                created: Some(image.created),
                created_by: "/bin/sh -c #(nop) CMD [\"sh\"]".to_string(),
                size: 0,
                comment: String::new(),
            },
            LayerHistory {
                id: "<missing>".to_string(),
                created: None,
                created_by: "/bin/sh -c #(nop) ADD file:rootfs in /".to_string(),
                size: 1024,
                comment: "base".to_string(),
            },
        ])
    }

    async fn inspect(&self, image: &StoredImage) -> Result<serde_json::Value> {
        Ok(json!({ "Id": image.id, "RepoTags": image.names }))
    }

    async fn layout_path(&self, image: &StoredImage) -> Result<PathBuf> {
        Ok(PathBuf::from("/var/lib/wharf/images").join(&image.id))
    }

    async fn tag(&self, image: &StoredImage, name: &str) -> Result<()> {
        let mut images = self.images.lock();
        for other in images.iter_mut() {
            other.names.retain(|n| n != name);
        }
        if let Some(stored) = images.iter_mut().find(|i| i.id == image.id) {
            stored.names.push(name.to_string());
        }
        Ok(())
    }

    async fn remove(&self, image: &StoredImage, _input: &str, force: bool) -> Result<String> {
        let users = self.containers(image).await?;
        if !users.is_empty() && !force {
            return Err(WharfError::ImageInUse {
                image: image.id.clone(),
                message: format!("used by {} containers", users.len()),
            });
        }
        self.containers.lock().retain(|c| c.image_id != image.id);
        self.images.lock().retain(|i| i.id != image.id);
        Ok(image.id.clone())
    }

    async fn prune(&self, all: bool) -> Result<Vec<String>> {
        let used: HashSet<String> = self
            .containers
            .lock()
            .iter()
            .map(|c| c.image_id.clone())
            .collect();
        let mut images = self.images.lock();
        let pruned: Vec<String> = images
            .iter()
            .filter(|i| !used.contains(&i.id) && (all || i.is_dangling()))
            .map(|i| i.id.clone())
            .collect();
        images.retain(|i| !pruned.contains(&i.id));
        Ok(pruned)
    }

    async fn import(&self, options: ImportOptions) -> Result<StoredImage> {
        if !options.source.exists() {
            return Err(WharfError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", options.source.display()),
            )));
        }
        let names: Vec<&str> = options.reference.iter().map(String::as_str).collect();
        let stored = image(&self.next_id("imported"), &names);
        self.imports.lock().push(options);
        Ok(self.add(stored))
    }

    async fn load_archive(&self, location: &TransportRef) -> Result<Vec<StoredImage>> {
        self.loaded.lock().push(location.clone());
        let first = self.add(image(&self.next_id("loaded"), &["docker.io/library/first:latest"]));
        let second = self.add(image(&self.next_id("loaded"), &["docker.io/library/second:latest"]));
        Ok(vec![first, second])
    }

    async fn add_layout(
        &self,
        _dir: &Path,
        names: &[String],
        parent: Option<String>,
    ) -> Result<StoredImage> {
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut stored = image(&self.next_id("layout"), &names);
        stored.parent = parent;
        Ok(self.add(stored))
    }

    async fn lookup_container(&self, name_or_id: &str) -> Result<ContainerRecord> {
        self.containers
            .lock()
            .iter()
            .find(|c| c.id == name_or_id || c.name == name_or_id)
            .cloned()
            .ok_or_else(|| WharfError::ContainerNotFound(name_or_id.to_string()))
    }

    async fn commit(
        &self,
        container: &ContainerRecord,
        options: CommitOptions,
    ) -> Result<StoredImage> {
        let names: Vec<&str> = if options.reference.is_empty() {
            Vec::new()
        } else {
            vec![options.reference.as_str()]
        };
        let mut stored = image(&self.next_id("committed"), &names);
        stored.parent = Some(container.image_id.clone());
        self.commits.lock().push(options);
        Ok(self.add(stored))
    }
}

/// Registry behaviour for one fake registry.
#[derive(Debug, Clone)]
pub enum RegistryBehaviour {
    Hits(usize),
    Fails(String),
}

/// Transport that records calls instead of touching the network.
pub struct FakeTransport {
    pub backend: Arc<MemoryBackend>,
    pub registries: Mutex<HashMap<String, RegistryBehaviour>>,
    pub pushes: Mutex<Vec<PushRequest>>,
    pub pulls: Mutex<Vec<(String, RegistryOptions)>>,
    /// Progress lines written by each push
    pub push_lines: usize,
    pub push_error: Option<String>,
}

impl FakeTransport {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            registries: Mutex::new(HashMap::new()),
            pushes: Mutex::new(Vec::new()),
            pulls: Mutex::new(Vec::new()),
            push_lines: 3,
            push_error: None,
        }
    }

    pub fn registry(self, name: &str, behaviour: RegistryBehaviour) -> Self {
        self.registries.lock().insert(name.to_string(), behaviour);
        self
    }
}

#[async_trait]
impl ImageTransport for FakeTransport {
    async fn pull(&self, name: &str, options: &RegistryOptions) -> Result<StoredImage> {
        self.pulls.lock().push((name.to_string(), options.clone()));
        let stored = image(&format!("pulled{}", self.backend.ids().len()), &[name]);
        Ok(self.backend.add(stored))
    }

    async fn push(&self, request: PushRequest, mut progress: Progress) -> Result<()> {
        for i in 0..self.push_lines {
            writeln!(progress, "Copying blob {}", i)?;
            tokio::task::yield_now().await;
        }
        self.pushes.lock().push(request);
        match &self.push_error {
            Some(message) => Err(WharfError::registry("registry.example.com", message.clone())),
            None => Ok(()),
        }
    }

    async fn search(
        &self,
        registry: &str,
        term: &str,
        limit: usize,
        _options: &RegistryOptions,
    ) -> Result<Vec<SearchResult>> {
        let behaviour = self.registries.lock().get(registry).cloned();
        match behaviour {
            Some(RegistryBehaviour::Hits(count)) => Ok((0..count.min(limit))
                .map(|i| SearchResult {
                    name: format!("{}/{}{}", registry, term, i),
                    description: format!("{} image {}", term, i),
                    star_count: i as u64,
                    is_official: i == 0,
                    is_automated: false,
                    index: registry.to_string(),
                })
                .collect()),
            Some(RegistryBehaviour::Fails(message)) => Err(WharfError::registry(registry, message)),
            None => Ok(Vec::new()),
        }
    }
}

/// Build engine that prints scripted lines and stores an image named after the output.
pub struct ScriptedBuilder {
    pub backend: Arc<MemoryBackend>,
    pub lines: usize,
    /// Written after the last full line, without a newline
    pub tail: Option<String>,
    pub fail: Option<String>,
    pub seen: Mutex<Vec<BuildOptions>>,
    /// Whether the context directory existed while building
    pub context_existed: AtomicBool,
}

impl ScriptedBuilder {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            lines: 2,
            tail: None,
            fail: None,
            seen: Mutex::new(Vec::new()),
            context_existed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BuildEngine for ScriptedBuilder {
    async fn build(&self, options: BuildOptions, mut progress: Progress) -> Result<String> {
        self.context_existed
            .store(options.context_dir.is_dir(), Ordering::SeqCst);
        for i in 0..self.lines {
            writeln!(progress, "STEP {}: RUN echo {}", i + 1, i)?;
            tokio::task::yield_now().await;
        }
        if let Some(tail) = &self.tail {
            write!(progress, "{}", tail)?;
        }
        let output = options.output.clone();
        self.seen.lock().push(options);
        if let Some(message) = &self.fail {
            return Err(WharfError::BuildError(message.clone()));
        }
        let names: Vec<&str> = if output.is_empty() {
            Vec::new()
        } else {
            vec![output.as_str()]
        };
        let stored = self
            .backend
            .add(image(&format!("built{}", self.backend.ids().len()), &names));
        Ok(stored.id)
    }
}

pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub transport: Arc<FakeTransport>,
    pub builder: Arc<ScriptedBuilder>,
    pub service: ImageService,
}

pub fn service_config(registries: &[&str]) -> ServiceConfig {
    ServiceConfig {
        registries: registries.iter().map(|r| r.to_string()).collect(),
        search_limit: 25,
        poll_interval: Duration::from_millis(10),
        signature_policy: None,
    }
}

impl Harness {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        let transport = FakeTransport::new(backend.clone());
        let builder = ScriptedBuilder::new(backend.clone());
        Self::with(backend, transport, builder, &["docker.io"])
    }

    pub fn with(
        backend: Arc<MemoryBackend>,
        transport: FakeTransport,
        builder: ScriptedBuilder,
        registries: &[&str],
    ) -> Self {
        let transport = Arc::new(transport);
        let builder = Arc::new(builder);
        let service = ImageService::new(
            backend.clone(),
            transport.clone(),
            builder.clone(),
            service_config(registries),
        );
        Self {
            backend,
            transport,
            builder,
            service,
        }
    }

    /// Dispatch one call and collect every reply it produced.
    pub async fn call(&self, request: Request) -> Vec<Reply> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch(&self.service, request, &tx).await;
        drop(tx);
        let mut replies = Vec::new();
        while let Some(reply) = rx.recv().await {
            replies.push(reply);
        }
        replies
    }
}

/// A streaming or plain call.
pub fn call(method: &str, parameters: serde_json::Value, more: bool) -> Request {
    let mut request = Request::new(format!("io.wharf.{}", method), parameters);
    request.more = more;
    request
}

/// Concatenate the `logs` of every reply under `field`.
pub fn all_logs(replies: &[Reply], field: &str) -> String {
    replies
        .iter()
        .filter_map(|r| r.parameters.get(field))
        .filter_map(|p| p.get("logs"))
        .filter_map(|l| l.as_array())
        .flatten()
        .filter_map(|l| l.as_str())
        .collect()
}
