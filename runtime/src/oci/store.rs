//! Disk-backed image and container store.
//!
//! Images live as OCI layouts under `<store>/images/<id>/` with an in-memory
//! index persisted to `<store>/index.json`. Container records are owned by
//! the container manager and read from `<store>/containers.json` on every
//! query.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use wharf_core::error::{Result, WharfError};

use super::archive;
use super::changes::apply_instructions;
use super::image_config::{History, ImageConfig};
use super::layout::{copy_layout, write_layout, LayerBlob, OciLayout};
use super::manifest::ManifestFormat;
use super::reference::{normalize_name, ImageReference, TransportRef};
use crate::backend::{
    CommitOptions, ContainerRecord, ImageBackend, ImportOptions, LayerHistory, StoredImage,
};
use crate::build::layer::{layer_from_changes, DirSnapshot};

/// Persistent image index stored as JSON on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    images: Vec<StoredImage>,
}

/// Container records written by the container manager.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ContainerFile {
    containers: Vec<ContainerRecord>,
}

/// Disk-based image store.
pub struct LocalImageStore {
    /// Root directory for image storage
    store_dir: PathBuf,
    /// In-memory index, in insertion order
    index: Arc<RwLock<Vec<StoredImage>>>,
}

impl LocalImageStore {
    /// Open (or create) the store at `store_dir`.
    ///
    /// Index entries whose layout directory has gone missing are dropped.
    pub fn new(store_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(store_dir.join("images")).map_err(|e| {
            WharfError::StoreError(format!(
                "Failed to create image store directory {}: {}",
                store_dir.display(),
                e
            ))
        })?;

        let index_path = store_dir.join("index.json");
        let images = if index_path.exists() {
            let data = std::fs::read_to_string(&index_path).map_err(|e| {
                WharfError::StoreError(format!(
                    "Failed to read image store index {}: {}",
                    index_path.display(),
                    e
                ))
            })?;
            let index: StoreIndex = serde_json::from_str(&data).map_err(|e| {
                WharfError::StoreError(format!("Failed to parse image store index: {}", e))
            })?;
            index
                .images
                .into_iter()
                .filter(|image| store_dir.join("images").join(&image.id).exists())
                .collect()
        } else {
            Vec::new()
        };

        tracing::debug!(
            store = %store_dir.display(),
            images = images.len(),
            "Opened image store"
        );

        Ok(Self {
            store_dir: store_dir.to_path_buf(),
            index: Arc::new(RwLock::new(images)),
        })
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    fn image_dir(&self, id: &str) -> PathBuf {
        self.store_dir.join("images").join(id)
    }

    fn open_layout(&self, image: &StoredImage) -> Result<OciLayout> {
        OciLayout::open(&self.image_dir(&image.id))
    }

    /// Scratch directory inside the store, so staged blobs can be renamed in.
    fn staging_dir(&self) -> Result<tempfile::TempDir> {
        let tmp = self.store_dir.join("tmp");
        std::fs::create_dir_all(&tmp)?;
        Ok(tempfile::Builder::new().prefix("stage").tempdir_in(tmp)?)
    }

    /// Write the index atomically (write tmp, rename).
    fn save_index(&self, images: &[StoredImage]) -> Result<()> {
        let index = StoreIndex {
            images: images.to_vec(),
        };
        write_atomic(&self.store_dir.join("index.json"), &serde_json::to_vec_pretty(&index)?)
    }

    fn load_containers(&self) -> Result<Vec<ContainerRecord>> {
        let path = self.store_dir.join("containers.json");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&path).map_err(|e| {
            WharfError::StoreError(format!(
                "Failed to read container records {}: {}",
                path.display(),
                e
            ))
        })?;
        let file: ContainerFile = serde_json::from_str(&data)?;
        Ok(file.containers)
    }

    fn save_containers(&self, containers: Vec<ContainerRecord>) -> Result<()> {
        let file = ContainerFile { containers };
        write_atomic(
            &self.store_dir.join("containers.json"),
            &serde_json::to_vec_pretty(&file)?,
        )
    }

    /// Record a container created from an image. Replaces a record with the same id.
    pub async fn register_container(&self, record: ContainerRecord) -> Result<()> {
        let _guard = self.index.write().await;
        let mut containers = self.load_containers()?;
        containers.retain(|c| c.id != record.id);
        containers.push(record);
        self.save_containers(containers)
    }

    /// Copy `layout` into the store and index it under `names`.
    async fn import_layout(
        &self,
        layout: &OciLayout,
        names: &[String],
        parent: Option<String>,
    ) -> Result<StoredImage> {
        let id = layout.image_id().to_string();
        let target = self.image_dir(&id);
        if !target.exists() {
            let staging = self.staging_dir()?;
            copy_layout(layout, staging.path(), None)?;
            std::fs::rename(staging.path(), &target).map_err(|e| {
                WharfError::StoreError(format!(
                    "Failed to move image {} into store: {}",
                    id, e
                ))
            })?;
        }

        let mut index = self.index.write().await;
        for image in index.iter_mut() {
            image.names.retain(|n| !names.contains(n));
        }
        let record = match index.iter_mut().find(|i| i.id == id) {
            Some(existing) => {
                existing.names.extend(names.iter().cloned());
                if !existing.digests.iter().any(|d| d == layout.manifest_digest()) {
                    existing.digests.push(layout.manifest_digest().to_string());
                }
                existing.clone()
            }
            None => {
                let record = StoredImage {
                    id: id.clone(),
                    names: names.to_vec(),
                    digests: vec![layout.manifest_digest().to_string()],
                    parent,
                    created: layout.config().created_at().unwrap_or_else(Utc::now),
                    manifest_type: layout.manifest_media_type().to_string(),
                };
                index.push(record.clone());
                record
            }
        };
        self.save_index(&index)?;

        tracing::info!(image_id = %id, names = ?names, "Stored image");
        Ok(record)
    }

    /// Delete an image directory and its index entry. Caller holds the lock.
    fn delete_image(&self, index: &mut Vec<StoredImage>, id: &str) -> Result<()> {
        let dir = self.image_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| {
                WharfError::StoreError(format!(
                    "Failed to remove image directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        index.retain(|i| i.id != id);
        tracing::info!(image_id = %id, "Removed image");
        Ok(())
    }
}

/// Find an image by id, `sha256:` id, name, normalized name, digest
/// reference, or unique id prefix.
fn find_image<'a>(images: &'a [StoredImage], input: &str) -> Result<Option<&'a StoredImage>> {
    let bare = input.strip_prefix("sha256:").unwrap_or(input);
    if let Some(image) = images.iter().find(|i| i.id == bare) {
        return Ok(Some(image));
    }
    if let Some(image) = images.iter().find(|i| i.names.iter().any(|n| n == input)) {
        return Ok(Some(image));
    }
    if let Ok(reference) = ImageReference::parse(input) {
        if let Some(digest) = &reference.digest {
            let repo = reference.repository_name();
            if let Some(image) = images.iter().find(|i| {
                i.digests.contains(digest) && i.names.iter().any(|n| n.starts_with(&repo))
            }) {
                return Ok(Some(image));
            }
        } else {
            let full = reference.full_reference();
            if let Some(image) = images.iter().find(|i| i.names.contains(&full)) {
                return Ok(Some(image));
            }
        }
    }
    if !bare.is_empty() && bare.chars().all(|c| c.is_ascii_hexdigit()) {
        let matches: Vec<&StoredImage> = images.iter().filter(|i| i.id.starts_with(bare)).collect();
        match matches.len() {
            0 => {}
            1 => return Ok(Some(matches[0])),
            n => {
                return Err(WharfError::InvalidArgument(format!(
                    "image id prefix {} is ambiguous ({} matches)",
                    bare, n
                )))
            }
        }
    }
    Ok(None)
}

/// Write a file atomically (write tmp, rename).
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, data).map_err(|e| {
        WharfError::StoreError(format!("Failed to write {}: {}", tmp_path.display(), e))
    })?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        WharfError::StoreError(format!(
            "Failed to rename {} -> {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })
}

fn history_entries(layout: &OciLayout, image_id: &str) -> Vec<LayerHistory> {
    let config = layout.config();
    let layers = layout.layers();
    let mut entries = Vec::new();

    if config.history.is_empty() {
        for layer in layers {
            entries.push(LayerHistory {
                id: layer.digest.clone(),
                created: config.created_at(),
                created_by: String::new(),
                size: layer.size.max(0) as u64,
                comment: String::new(),
            });
        }
    } else {
        let mut layer_iter = layers.iter();
        for h in &config.history {
            let (id, size) = if h.empty_layer {
                ("<missing>".to_string(), 0)
            } else {
                match layer_iter.next() {
                    Some(layer) => (layer.digest.clone(), layer.size.max(0) as u64),
                    None => ("<missing>".to_string(), 0),
                }
            };
            entries.push(LayerHistory {
                id,
                created: h.created_at(),
                created_by: h.created_by.clone().unwrap_or_default(),
                size,
                comment: h.comment.clone().unwrap_or_default(),
            });
        }
    }

    entries.reverse();
    if let Some(top) = entries.first_mut() {
        top.id = image_id.to_string();
    }
    entries
}

#[async_trait]
impl ImageBackend for LocalImageStore {
    async fn images(&self) -> Result<Vec<StoredImage>> {
        Ok(self.index.read().await.clone())
    }

    async fn lookup(&self, name_or_id: &str) -> Result<StoredImage> {
        let index = self.index.read().await;
        find_image(&index, name_or_id)?
            .cloned()
            .ok_or_else(|| WharfError::ImageNotFound(name_or_id.to_string()))
    }

    async fn labels(&self, image: &StoredImage) -> Result<BTreeMap<String, String>> {
        Ok(self.open_layout(image)?.config().labels().clone())
    }

    async fn containers(&self, image: &StoredImage) -> Result<Vec<ContainerRecord>> {
        Ok(self
            .load_containers()?
            .into_iter()
            .filter(|c| c.image_id == image.id)
            .collect())
    }

    async fn repo_digests(&self, image: &StoredImage) -> Result<Vec<String>> {
        let mut digests = Vec::new();
        for name in &image.names {
            let repo = ImageReference::parse(name)?.repository_name();
            for digest in &image.digests {
                let entry = format!("{}@{}", repo, digest);
                if !digests.contains(&entry) {
                    digests.push(entry);
                }
            }
        }
        Ok(digests)
    }

    async fn size(&self, image: &StoredImage) -> Result<u64> {
        Ok(self.open_layout(image)?.size())
    }

    async fn virtual_size(&self, image: &StoredImage) -> Result<u64> {
        let index = self.index.read().await.clone();
        let mut total = self.open_layout(image)?.size();
        let mut seen = vec![image.id.clone()];
        let mut parent = image.parent.clone();
        while let Some(parent_id) = parent {
            if seen.contains(&parent_id) {
                break;
            }
            let Some(ancestor) = index.iter().find(|i| i.id == parent_id) else {
                break;
            };
            total += self.open_layout(ancestor)?.size();
            seen.push(parent_id);
            parent = ancestor.parent.clone();
        }
        Ok(total)
    }

    async fn is_parent(&self, image: &StoredImage) -> Result<bool> {
        let index = self.index.read().await;
        Ok(index
            .iter()
            .any(|i| i.parent.as_deref() == Some(image.id.as_str())))
    }

    async fn history(&self, image: &StoredImage) -> Result<Vec<LayerHistory>> {
        let layout = self.open_layout(image)?;
        Ok(history_entries(&layout, &image.id))
    }

    async fn inspect(&self, image: &StoredImage) -> Result<serde_json::Value> {
        let layout = self.open_layout(image)?;
        let config = layout.config();
        let repo_digests = self.repo_digests(image).await?;
        let virtual_size = self.virtual_size(image).await?;
        Ok(serde_json::json!({
            "Id": image.id,
            "Digest": layout.manifest_digest(),
            "RepoTags": image.names,
            "RepoDigests": repo_digests,
            "Parent": image.parent.clone().unwrap_or_default(),
            "Created": image.created.to_rfc3339(),
            "Author": config.author.clone().unwrap_or_default(),
            "Architecture": config.architecture,
            "Os": config.os,
            "Size": layout.size(),
            "VirtualSize": virtual_size,
            "Labels": config.labels(),
            "Config": config.config,
            "RootFS": config.rootfs,
            "History": config.history,
            "ManifestType": image.manifest_type,
        }))
    }

    async fn layout_path(&self, image: &StoredImage) -> Result<PathBuf> {
        let dir = self.image_dir(&image.id);
        if !dir.exists() {
            return Err(WharfError::StoreError(format!(
                "Layout for image {} is missing",
                image.id
            )));
        }
        Ok(dir)
    }

    async fn tag(&self, image: &StoredImage, name: &str) -> Result<()> {
        let name = normalize_name(name)?;
        let mut index = self.index.write().await;
        if !index.iter().any(|i| i.id == image.id) {
            return Err(WharfError::ImageNotFound(image.id.clone()));
        }
        for other in index.iter_mut() {
            if other.id == image.id {
                if !other.names.contains(&name) {
                    other.names.push(name.clone());
                }
            } else {
                other.names.retain(|n| n != &name);
            }
        }
        self.save_index(&index)?;
        tracing::info!(image_id = %image.id, name = %name, "Tagged image");
        Ok(())
    }

    async fn remove(&self, image: &StoredImage, input: &str, force: bool) -> Result<String> {
        let mut index = self.index.write().await;
        let Some(current) = index.iter().find(|i| i.id == image.id).cloned() else {
            return Err(WharfError::ImageNotFound(input.to_string()));
        };

        if current.names.len() > 1 {
            let addressed = normalize_name(input).ok();
            let matched = current
                .names
                .iter()
                .find(|n| n.as_str() == input || Some(n.as_str()) == addressed.as_deref())
                .cloned();
            if let Some(name) = matched {
                if let Some(entry) = index.iter_mut().find(|i| i.id == current.id) {
                    entry.names.retain(|n| n != &name);
                }
                self.save_index(&index)?;
                tracing::info!(image_id = %current.id, name = %name, "Untagged image");
                return Ok(current.id);
            }
        }

        let containers = self.load_containers()?;
        let users: Vec<&ContainerRecord> =
            containers.iter().filter(|c| c.image_id == current.id).collect();
        if let Some(running) = users.iter().find(|c| c.running) {
            return Err(WharfError::ImageInUse {
                image: current.display_name(),
                message: format!("image is in use by running container {}", running.id),
            });
        }
        if !users.is_empty() && !force {
            return Err(WharfError::ImageInUse {
                image: current.display_name(),
                message: format!(
                    "image is in use by {} container(s); use force to remove them",
                    users.len()
                ),
            });
        }
        if let Some(child) = index
            .iter()
            .find(|i| i.parent.as_deref() == Some(current.id.as_str()))
        {
            return Err(WharfError::ImageInUse {
                image: current.display_name(),
                message: format!("image has dependent child image {}", child.id),
            });
        }

        if !users.is_empty() {
            let removed: Vec<String> = users.iter().map(|c| c.id.clone()).collect();
            self.save_containers(
                containers
                    .iter()
                    .filter(|c| !removed.contains(&c.id))
                    .cloned()
                    .collect(),
            )?;
            tracing::info!(image_id = %current.id, containers = ?removed, "Removed containers of image");
        }

        self.delete_image(&mut index, &current.id)?;
        self.save_index(&index)?;
        Ok(current.id)
    }

    async fn prune(&self, all: bool) -> Result<Vec<String>> {
        let mut index = self.index.write().await;
        let containers = self.load_containers()?;
        let mut pruned = Vec::new();

        loop {
            let candidates: Vec<String> = index
                .iter()
                .filter(|i| all || i.is_dangling())
                .filter(|i| !containers.iter().any(|c| c.image_id == i.id))
                .filter(|i| !index.iter().any(|o| o.parent.as_deref() == Some(i.id.as_str())))
                .map(|i| i.id.clone())
                .collect();
            if candidates.is_empty() {
                break;
            }
            for id in candidates {
                self.delete_image(&mut index, &id)?;
                pruned.push(id);
            }
        }

        self.save_index(&index)?;
        Ok(pruned)
    }

    async fn import(&self, options: ImportOptions) -> Result<StoredImage> {
        let staging = self.staging_dir()?;
        let blobs_dir = staging.path().join("blobs").join("sha256");
        let layer = LayerBlob::from_tarball(&options.source, &blobs_dir)?;

        let mut config = ImageConfig::for_host();
        apply_instructions(&mut config, &options.changes);
        config.rootfs.diff_ids.push(layer.prefixed_diff_id());
        let mut history = options.history;
        history.empty_layer = false;
        config.history.push(history);

        write_layout(staging.path(), &config, &[layer], ManifestFormat::Oci, None)?;
        let layout = OciLayout::open(staging.path())?;

        let names = match options.reference.as_deref() {
            Some(reference) if !reference.is_empty() => vec![normalize_name(reference)?],
            _ => Vec::new(),
        };
        self.import_layout(&layout, &names, None).await
    }

    async fn load_archive(&self, location: &TransportRef) -> Result<Vec<StoredImage>> {
        let loaded = archive::load_archive(location)?;
        let mut stored = Vec::with_capacity(loaded.images.len());
        for image in &loaded.images {
            stored.push(self.import_layout(&image.layout, &image.names, None).await?);
        }
        Ok(stored)
    }

    async fn add_layout(
        &self,
        dir: &Path,
        names: &[String],
        parent: Option<String>,
    ) -> Result<StoredImage> {
        let layout = OciLayout::open(dir)?;
        let names = names
            .iter()
            .map(|n| normalize_name(n))
            .collect::<Result<Vec<_>>>()?;
        self.import_layout(&layout, &names, parent).await
    }

    async fn lookup_container(&self, name_or_id: &str) -> Result<ContainerRecord> {
        let containers = self.load_containers()?;
        if let Some(c) = containers
            .iter()
            .find(|c| c.id == name_or_id || c.name == name_or_id)
        {
            return Ok(c.clone());
        }
        let prefixed: Vec<&ContainerRecord> = containers
            .iter()
            .filter(|c| !name_or_id.is_empty() && c.id.starts_with(name_or_id))
            .collect();
        match prefixed.as_slice() {
            [one] => Ok((*one).clone()),
            [] => Err(WharfError::ContainerNotFound(name_or_id.to_string())),
            _ => Err(WharfError::InvalidArgument(format!(
                "container id prefix {} is ambiguous",
                name_or_id
            ))),
        }
    }

    async fn commit(
        &self,
        container: &ContainerRecord,
        options: CommitOptions,
    ) -> Result<StoredImage> {
        let rootfs = container
            .rootfs
            .as_ref()
            .filter(|p| p.exists())
            .ok_or_else(|| {
                WharfError::StoreError(format!(
                    "container {} has no root filesystem to commit",
                    container.name
                ))
            })?;
        if options.pause && container.running {
            tracing::debug!(container = %container.id, "Pause requested; committing without pausing");
        }

        let base = self.lookup(&container.image_id).await.ok();
        let (mut config, mut layers) = match &base {
            Some(base) => {
                let layout = self.open_layout(base)?;
                (layout.config().clone(), layout.layer_blobs())
            }
            None => (ImageConfig::for_host(), Vec::new()),
        };

        let staging = self.staging_dir()?;
        let blobs_dir = staging.path().join("blobs").join("sha256");
        let before = DirSnapshot::from_layers(&layers)?;
        let new_layer = layer_from_changes(&before, rootfs, &blobs_dir)?;

        config.created = Some(Utc::now().to_rfc3339());
        if !options.author.is_empty() {
            config.author = Some(options.author.clone());
        }
        apply_instructions(&mut config, &options.changes);
        let mut history = History::new(
            format!("wharf commit {}", container.name),
            new_layer.is_none(),
        );
        if !options.author.is_empty() {
            history.author = Some(options.author.clone());
        }
        if !options.message.is_empty() {
            history.comment = Some(options.message.clone());
        }
        config.history.push(history);
        if let Some(layer) = new_layer {
            config.rootfs.diff_ids.push(layer.prefixed_diff_id());
            layers.push(layer);
        }

        write_layout(staging.path(), &config, &layers, options.format, None)?;
        let layout = OciLayout::open(staging.path())?;
        let names = if options.reference.is_empty() {
            Vec::new()
        } else {
            vec![normalize_name(&options.reference)?]
        };
        let stored = self
            .import_layout(&layout, &names, base.map(|b| b.id))
            .await?;

        tracing::info!(
            container = %container.id,
            image_id = %stored.id,
            "Committed container"
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::dockerfile::Instruction;
    use tempfile::TempDir;

    fn tar_with(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    /// Write a single-layer layout whose config carries `marker` so ids differ.
    fn make_layout(dir: &Path, marker: &str) -> PathBuf {
        let layout_dir = dir.join(format!("layout-{}", marker));
        let layer = LayerBlob::from_tar_bytes(
            &tar_with(&[("marker.txt", marker.as_bytes())]),
            &layout_dir.join("blobs").join("sha256"),
        )
        .unwrap();
        let mut config = ImageConfig::for_host();
        config.config.labels.insert("marker".to_string(), marker.to_string());
        config.rootfs.diff_ids.push(layer.prefixed_diff_id());
        config.history.push(History::new(format!("ADD {}", marker), false));
        config.history.push(History::new("CMD [\"sh\"]", true));
        write_layout(&layout_dir, &config, &[layer], ManifestFormat::Oci, None).unwrap();
        layout_dir
    }

    async fn add(store: &LocalImageStore, tmp: &TempDir, marker: &str, names: &[&str]) -> StoredImage {
        let dir = make_layout(tmp.path(), marker);
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        store.add_layout(&dir, &names, None).await.unwrap()
    }

    fn container(id: &str, image_id: &str, running: bool) -> ContainerRecord {
        ContainerRecord {
            id: id.to_string(),
            name: format!("{}-name", id),
            image_id: image_id.to_string(),
            running,
            rootfs: None,
        }
    }

    #[tokio::test]
    async fn test_add_and_lookup() {
        let tmp = TempDir::new().unwrap();
        let store = LocalImageStore::new(&tmp.path().join("store")).unwrap();
        let image = add(&store, &tmp, "a", &["alpine"]).await;

        assert_eq!(image.names, vec!["docker.io/library/alpine:latest"]);
        assert_eq!(store.lookup("alpine").await.unwrap().id, image.id);
        assert_eq!(store.lookup("alpine:latest").await.unwrap().id, image.id);
        assert_eq!(store.lookup(&image.id).await.unwrap().id, image.id);
        assert_eq!(
            store.lookup(&format!("sha256:{}", image.id)).await.unwrap().id,
            image.id
        );
        assert_eq!(store.lookup(&image.id[..10]).await.unwrap().id, image.id);

        let err = store.lookup("missing").await.unwrap_err();
        assert!(err.is_image_not_found());
    }

    #[tokio::test]
    async fn test_lookup_by_digest_reference() {
        let tmp = TempDir::new().unwrap();
        let store = LocalImageStore::new(&tmp.path().join("store")).unwrap();
        let image = add(&store, &tmp, "a", &["quay.io/org/app:1"]).await;
        let by_digest = format!("quay.io/org/app@{}", image.digests[0]);
        assert_eq!(store.lookup(&by_digest).await.unwrap().id, image.id);
        assert_eq!(
            store.repo_digests(&image).await.unwrap(),
            vec![by_digest.clone()]
        );
    }

    #[tokio::test]
    async fn test_persistence() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("store");
        let image = {
            let store = LocalImageStore::new(&root).unwrap();
            add(&store, &tmp, "a", &["app:v1"]).await
        };
        let reopened = LocalImageStore::new(&root).unwrap();
        let found = reopened.lookup("app:v1").await.unwrap();
        assert_eq!(found.id, image.id);
        assert_eq!(found.created, image.created);
    }

    #[tokio::test]
    async fn test_labels_size_history() {
        let tmp = TempDir::new().unwrap();
        let store = LocalImageStore::new(&tmp.path().join("store")).unwrap();
        let image = add(&store, &tmp, "a", &["app"]).await;

        let labels = store.labels(&image).await.unwrap();
        assert_eq!(labels.get("marker").map(String::as_str), Some("a"));
        let size = store.size(&image).await.unwrap();
        assert!(size > 0);
        assert_eq!(store.virtual_size(&image).await.unwrap(), size);

        let history = store.history(&image).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, image.id);
        assert_eq!(history[0].created_by, "CMD [\"sh\"]");
        assert_eq!(history[0].size, 0);
        assert!(history[1].id.starts_with("sha256:"));
        assert!(history[1].size > 0);
    }

    #[tokio::test]
    async fn test_tag_moves_name() {
        let tmp = TempDir::new().unwrap();
        let store = LocalImageStore::new(&tmp.path().join("store")).unwrap();
        let a = add(&store, &tmp, "a", &["app:v1"]).await;
        let b = add(&store, &tmp, "b", &["other"]).await;

        store.tag(&b, "app:v1").await.unwrap();
        assert_eq!(store.lookup("app:v1").await.unwrap().id, b.id);
        assert!(store.lookup(&a.id).await.unwrap().names.is_empty());
        assert_eq!(store.lookup(&b.id).await.unwrap().id, b.id);
    }

    #[tokio::test]
    async fn test_remove_untags_when_multiple_names() {
        let tmp = TempDir::new().unwrap();
        let store = LocalImageStore::new(&tmp.path().join("store")).unwrap();
        let image = add(&store, &tmp, "a", &["app:v1", "app:v2"]).await;

        let id = store.remove(&image, "app:v1", false).await.unwrap();
        assert_eq!(id, image.id);
        let remaining = store.lookup(&image.id).await.unwrap();
        assert_eq!(remaining.names, vec!["docker.io/library/app:v2"]);

        store.remove(&remaining, "app:v2", false).await.unwrap();
        assert!(store.lookup(&image.id).await.is_err());
        assert!(!store.store_dir().join("images").join(&image.id).exists());
    }

    #[tokio::test]
    async fn test_remove_in_use() {
        let tmp = TempDir::new().unwrap();
        let store = LocalImageStore::new(&tmp.path().join("store")).unwrap();
        let image = add(&store, &tmp, "a", &["app"]).await;
        store
            .register_container(container("c1", &image.id, false))
            .await
            .unwrap();

        let err = store.remove(&image, "app", false).await.unwrap_err();
        assert!(matches!(err, WharfError::ImageInUse { .. }));

        store.remove(&image, "app", true).await.unwrap();
        assert!(store.lookup_container("c1").await.is_err());
    }

    #[tokio::test]
    async fn test_remove_running_container_even_forced() {
        let tmp = TempDir::new().unwrap();
        let store = LocalImageStore::new(&tmp.path().join("store")).unwrap();
        let image = add(&store, &tmp, "a", &["app"]).await;
        store
            .register_container(container("c1", &image.id, true))
            .await
            .unwrap();
        assert!(matches!(
            store.remove(&image, "app", true).await,
            Err(WharfError::ImageInUse { .. })
        ));
    }

    #[tokio::test]
    async fn test_prune_dangling_and_all() {
        let tmp = TempDir::new().unwrap();
        let store = LocalImageStore::new(&tmp.path().join("store")).unwrap();
        let dangling = add(&store, &tmp, "a", &[]).await;
        let tagged = add(&store, &tmp, "b", &["keep"]).await;
        let used = add(&store, &tmp, "c", &["used"]).await;
        store
            .register_container(container("c1", &used.id, false))
            .await
            .unwrap();

        assert_eq!(store.prune(false).await.unwrap(), vec![dangling.id.clone()]);
        assert_eq!(store.prune(true).await.unwrap(), vec![tagged.id.clone()]);
        assert_eq!(store.images().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_with_changes() {
        let tmp = TempDir::new().unwrap();
        let store = LocalImageStore::new(&tmp.path().join("store")).unwrap();
        let source = tmp.path().join("rootfs.tar");
        std::fs::write(&source, tar_with(&[("bin/app", b"#!/bin/sh")])).unwrap();

        let image = store
            .import(ImportOptions {
                source,
                reference: Some("imported:1".to_string()),
                changes: vec![Instruction::Cmd {
                    exec: vec!["/bin/app".to_string()],
                }],
                history: History {
                    comment: Some("initial import".to_string()),
                    ..History::new("wharf import", false)
                },
            })
            .await
            .unwrap();

        assert_eq!(image.names, vec!["docker.io/library/imported:1"]);
        let inspect = store.inspect(&image).await.unwrap();
        assert_eq!(inspect["Config"]["Cmd"][0], "/bin/app");
        assert_eq!(inspect["History"][0]["comment"], "initial import");
        assert_eq!(inspect["Id"], image.id);
    }

    #[tokio::test]
    async fn test_commit_container() {
        let tmp = TempDir::new().unwrap();
        let store = LocalImageStore::new(&tmp.path().join("store")).unwrap();
        let base = add(&store, &tmp, "base", &["base"]).await;

        let rootfs = tmp.path().join("rootfs");
        std::fs::create_dir_all(&rootfs).unwrap();
        std::fs::write(rootfs.join("new.txt"), "created in container").unwrap();
        let mut record = container("c1", &base.id, false);
        record.rootfs = Some(rootfs);
        store.register_container(record.clone()).await.unwrap();

        let committed = store
            .commit(
                &record,
                CommitOptions {
                    reference: "committed:1".to_string(),
                    changes: vec![Instruction::User {
                        user: "app".to_string(),
                    }],
                    author: "ops".to_string(),
                    message: "snapshot".to_string(),
                    pause: false,
                    format: ManifestFormat::DockerV2Schema2,
                },
            )
            .await
            .unwrap();

        assert_eq!(committed.parent.as_deref(), Some(base.id.as_str()));
        assert_eq!(
            committed.manifest_type,
            ManifestFormat::DockerV2Schema2.media_type()
        );
        assert!(store.is_parent(&base).await.unwrap());
        let inspect = store.inspect(&committed).await.unwrap();
        assert_eq!(inspect["Author"], "ops");
        assert_eq!(inspect["Config"]["User"], "app");
        assert_eq!(inspect["RootFS"]["diff_ids"].as_array().unwrap().len(), 2);
        let history = store.history(&committed).await.unwrap();
        assert_eq!(history[0].comment, "snapshot");
        assert!(store.virtual_size(&committed).await.unwrap() > store.size(&committed).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_without_rootfs() {
        let tmp = TempDir::new().unwrap();
        let store = LocalImageStore::new(&tmp.path().join("store")).unwrap();
        let record = container("c1", "none", false);
        let err = store
            .commit(
                &record,
                CommitOptions {
                    reference: String::new(),
                    changes: vec![],
                    author: String::new(),
                    message: String::new(),
                    pause: false,
                    format: ManifestFormat::Oci,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WharfError::StoreError(_)));
    }

    #[tokio::test]
    async fn test_lookup_container() {
        let tmp = TempDir::new().unwrap();
        let store = LocalImageStore::new(&tmp.path().join("store")).unwrap();
        store
            .register_container(container("abc123", "img", false))
            .await
            .unwrap();
        assert_eq!(store.lookup_container("abc123-name").await.unwrap().id, "abc123");
        assert_eq!(store.lookup_container("abc").await.unwrap().id, "abc123");
        assert!(matches!(
            store.lookup_container("zzz").await,
            Err(WharfError::ContainerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_load_docker_archive() {
        let tmp = TempDir::new().unwrap();
        let store = LocalImageStore::new(&tmp.path().join("store")).unwrap();
        let layout = OciLayout::open(&make_layout(tmp.path(), "arch")).unwrap();
        let archive_path = tmp.path().join("image.tar");
        archive::write_docker_archive(
            &layout,
            &["docker.io/library/archived:1".to_string()],
            &archive_path,
        )
        .unwrap();

        let loaded = store
            .load_archive(&TransportRef::parse(&format!(
                "docker-archive:{}",
                archive_path.display()
            ))
            .unwrap())
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            store.lookup("archived:1").await.unwrap().id,
            loaded[0].id
        );
    }
}
