//! OCI image layout directories.
//!
//! Every stored image is an OCI image layout (`oci-layout`, `index.json`,
//! `blobs/sha256/…`). This module reads and writes those directories and
//! produces layer blobs from tar streams.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use wharf_core::error::{Result, WharfError};

use super::image_config::ImageConfig;
use super::manifest::{ManifestFormat, OCI_MANIFEST_MEDIA_TYPE};

/// Annotation carrying the tag of a manifest inside `index.json`.
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// `index.json` of an image layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutIndex {
    pub schema_version: u8,
    #[serde(default)]
    pub manifests: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<std::collections::HashMap<String, String>>,
}

impl IndexEntry {
    pub fn ref_name(&self) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(REF_NAME_ANNOTATION))
            .map(String::as_str)
    }
}

/// A compressed layer blob ready to be placed in a layout.
#[derive(Debug, Clone)]
pub struct LayerBlob {
    /// Path to the gzip-compressed layer
    pub path: PathBuf,
    /// SHA-256 of the compressed blob (hex, no prefix)
    pub digest: String,
    /// SHA-256 of the uncompressed tar (hex, no prefix)
    pub diff_id: String,
    pub size: u64,
}

impl LayerBlob {
    /// Digest with "sha256:" prefix.
    pub fn prefixed_digest(&self) -> String {
        format!("sha256:{}", self.digest)
    }

    pub fn prefixed_diff_id(&self) -> String {
        format!("sha256:{}", self.diff_id)
    }

    /// Compress an uncompressed tar stream into `blobs_dir`.
    pub fn from_tar_bytes(tar: &[u8], blobs_dir: &Path) -> Result<Self> {
        let diff_id = sha256_bytes(tar);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(tar)?;
        let compressed = encoder.finish()?;
        Self::store(compressed, diff_id, blobs_dir)
    }

    /// Import a layer tarball that may or may not be gzip-compressed.
    pub fn from_tarball(path: &Path, blobs_dir: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            WharfError::StoreError(format!("Failed to read layer {}: {}", path.display(), e))
        })?;
        if is_gzip(&data) {
            let mut tar = Vec::new();
            GzDecoder::new(data.as_slice())
                .read_to_end(&mut tar)
                .map_err(|e| {
                    WharfError::StoreError(format!(
                        "Failed to decompress layer {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            Self::store(data, sha256_bytes(&tar), blobs_dir)
        } else {
            Self::from_tar_bytes(&data, blobs_dir)
        }
    }

    fn store(compressed: Vec<u8>, diff_id: String, blobs_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(blobs_dir)?;
        let digest = sha256_bytes(&compressed);
        let path = blobs_dir.join(&digest);
        std::fs::write(&path, &compressed).map_err(|e| {
            WharfError::StoreError(format!("Failed to write layer blob {}: {}", digest, e))
        })?;
        Ok(Self {
            path,
            digest,
            diff_id,
            size: compressed.len() as u64,
        })
    }
}

/// An image layout opened from disk.
#[derive(Debug, Clone)]
pub struct OciLayout {
    root: PathBuf,
    index: LayoutIndex,
    ref_name: Option<String>,
    manifest: OciImageManifest,
    manifest_digest: String,
    config: ImageConfig,
}

impl OciLayout {
    /// Open the first manifest of the layout at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_tagged(root, None)
    }

    /// Open the manifest tagged `tag` (or the first one when `tag` is `None`).
    pub fn open_tagged(root: &Path, tag: Option<&str>) -> Result<Self> {
        let index = read_index(root)?;
        let position = match tag {
            Some(tag) => index.manifests.iter().position(|m| m.ref_name() == Some(tag)),
            None if index.manifests.is_empty() => None,
            None => Some(0),
        }
        .ok_or_else(|| {
            WharfError::StoreError(format!(
                "No matching manifest in {}",
                root.join("index.json").display()
            ))
        })?;
        Self::from_entry(root, index, position)
    }

    /// Open every manifest listed in the layout's `index.json`.
    pub fn open_all(root: &Path) -> Result<Vec<Self>> {
        let index = read_index(root)?;
        (0..index.manifests.len())
            .map(|i| Self::from_entry(root, index.clone(), i))
            .collect()
    }

    fn from_entry(root: &Path, index: LayoutIndex, position: usize) -> Result<Self> {
        let entry = &index.manifests[position];
        let manifest_digest = entry.digest.clone();
        let manifest_data = read_blob(root, &manifest_digest)?;
        let mut manifest: OciImageManifest = serde_json::from_slice(&manifest_data)?;
        if manifest.media_type.is_none() {
            manifest.media_type = Some(entry.media_type.clone());
        }

        let config_data = read_blob(root, &manifest.config.digest)?;
        let config = ImageConfig::from_slice(&config_data)?;
        let ref_name = entry.ref_name().map(str::to_string);

        Ok(Self {
            root: root.to_path_buf(),
            index,
            ref_name,
            manifest,
            manifest_digest,
            config,
        })
    }

    /// Tag recorded for this manifest in `index.json`.
    pub fn ref_name(&self) -> Option<&str> {
        self.ref_name.as_deref()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &LayoutIndex {
        &self.index
    }

    pub fn manifest(&self) -> &OciImageManifest {
        &self.manifest
    }

    /// Manifest digest with "sha256:" prefix.
    pub fn manifest_digest(&self) -> &str {
        &self.manifest_digest
    }

    pub fn manifest_media_type(&self) -> &str {
        self.manifest
            .media_type
            .as_deref()
            .unwrap_or(OCI_MANIFEST_MEDIA_TYPE)
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Image id (config digest without prefix).
    pub fn image_id(&self) -> &str {
        strip_digest_prefix(&self.manifest.config.digest)
    }

    pub fn layers(&self) -> &[OciDescriptor] {
        &self.manifest.layers
    }

    /// Layer blobs with their diff ids, bottom to top.
    pub fn layer_blobs(&self) -> Vec<LayerBlob> {
        self.manifest
            .layers
            .iter()
            .enumerate()
            .map(|(i, desc)| LayerBlob {
                path: self.blob_path(&desc.digest),
                digest: strip_digest_prefix(&desc.digest).to_string(),
                diff_id: self
                    .config
                    .rootfs
                    .diff_ids
                    .get(i)
                    .map(|d| strip_digest_prefix(d).to_string())
                    .unwrap_or_default(),
                size: desc.size.max(0) as u64,
            })
            .collect()
    }

    pub fn blob_path(&self, digest: &str) -> PathBuf {
        blob_path(&self.root, digest)
    }

    /// Size of the config plus every layer blob.
    pub fn size(&self) -> u64 {
        let layers: i64 = self.manifest.layers.iter().map(|l| l.size.max(0)).sum();
        layers as u64 + self.manifest.config.size.max(0) as u64
    }
}

/// Result of writing a layout.
#[derive(Debug, Clone)]
pub struct WrittenLayout {
    /// Image id (hex SHA-256 of the config)
    pub image_id: String,
    /// Manifest digest with "sha256:" prefix
    pub manifest_digest: String,
    pub manifest_media_type: String,
}

/// Write a single-manifest image layout to `dir`.
///
/// Layer blobs are copied in unless they already live in `dir/blobs/sha256`.
pub fn write_layout(
    dir: &Path,
    config: &ImageConfig,
    layers: &[LayerBlob],
    format: ManifestFormat,
    ref_name: Option<&str>,
) -> Result<WrittenLayout> {
    if format == ManifestFormat::DockerV2Schema1 {
        return Err(WharfError::StoreError(
            "Docker schema 1 manifests cannot be written to a local layout".to_string(),
        ));
    }

    let blobs_dir = dir.join("blobs").join("sha256");
    std::fs::create_dir_all(&blobs_dir).map_err(|e| {
        WharfError::StoreError(format!(
            "Failed to create blobs directory {}: {}",
            blobs_dir.display(),
            e
        ))
    })?;

    let mut descriptors = Vec::with_capacity(layers.len());
    for layer in layers {
        let target = blobs_dir.join(&layer.digest);
        if !target.exists() {
            std::fs::copy(&layer.path, &target).map_err(|e| {
                WharfError::StoreError(format!(
                    "Failed to copy layer {}: {}",
                    layer.digest, e
                ))
            })?;
        }
        descriptors.push(OciDescriptor {
            media_type: format.layer_media_type().to_string(),
            digest: layer.prefixed_digest(),
            size: layer.size as i64,
            ..Default::default()
        });
    }

    let config_bytes = config.to_vec()?;
    let image_id = sha256_bytes(&config_bytes);
    std::fs::write(blobs_dir.join(&image_id), &config_bytes)?;

    let manifest = OciImageManifest {
        schema_version: 2,
        media_type: Some(format.media_type().to_string()),
        config: OciDescriptor {
            media_type: format.config_media_type().to_string(),
            digest: format!("sha256:{}", image_id),
            size: config_bytes.len() as i64,
            ..Default::default()
        },
        layers: descriptors,
        ..Default::default()
    };
    let manifest_bytes = serde_json::to_vec(&manifest)?;
    let manifest_hex = sha256_bytes(&manifest_bytes);
    std::fs::write(blobs_dir.join(&manifest_hex), &manifest_bytes)?;

    let annotations = ref_name.map(|name| {
        let mut map = std::collections::HashMap::new();
        map.insert(REF_NAME_ANNOTATION.to_string(), name.to_string());
        map
    });
    let index = LayoutIndex {
        schema_version: 2,
        manifests: vec![IndexEntry {
            media_type: format.media_type().to_string(),
            digest: format!("sha256:{}", manifest_hex),
            size: manifest_bytes.len() as i64,
            annotations,
        }],
    };
    std::fs::write(dir.join("index.json"), serde_json::to_vec_pretty(&index)?)?;
    std::fs::write(dir.join("oci-layout"), OCI_LAYOUT_CONTENT)?;

    tracing::debug!(
        dir = %dir.display(),
        image_id = %image_id,
        layers = layers.len(),
        "Wrote OCI layout"
    );

    Ok(WrittenLayout {
        image_id,
        manifest_digest: format!("sha256:{}", manifest_hex),
        manifest_media_type: format.media_type().to_string(),
    })
}

/// Copy one manifest of `layout` and every blob it references into a fresh
/// layout at `dest`. Blobs are copied byte for byte so digests are preserved.
pub fn copy_layout(layout: &OciLayout, dest: &Path, ref_name: Option<&str>) -> Result<()> {
    let blobs_dir = dest.join("blobs").join("sha256");
    std::fs::create_dir_all(&blobs_dir)?;

    let mut digests = vec![
        layout.manifest_digest().to_string(),
        layout.manifest().config.digest.clone(),
    ];
    digests.extend(layout.layers().iter().map(|l| l.digest.clone()));
    for digest in &digests {
        let target = blob_path(dest, digest);
        if !target.exists() {
            std::fs::copy(layout.blob_path(digest), &target).map_err(|e| {
                WharfError::StoreError(format!("Failed to copy blob {}: {}", digest, e))
            })?;
        }
    }

    let manifest_size = std::fs::metadata(blob_path(dest, layout.manifest_digest()))?.len();
    let annotations = ref_name.map(|name| {
        let mut map = std::collections::HashMap::new();
        map.insert(REF_NAME_ANNOTATION.to_string(), name.to_string());
        map
    });
    let index = LayoutIndex {
        schema_version: 2,
        manifests: vec![IndexEntry {
            media_type: layout.manifest_media_type().to_string(),
            digest: layout.manifest_digest().to_string(),
            size: manifest_size as i64,
            annotations,
        }],
    };
    std::fs::write(dest.join("index.json"), serde_json::to_vec_pretty(&index)?)?;
    std::fs::write(dest.join("oci-layout"), OCI_LAYOUT_CONTENT)?;
    Ok(())
}

/// Copy `layout` to `dest` rewriting the manifest to `format`'s media types.
///
/// Config and layer blobs are kept as they are, so the image id is unchanged.
pub fn convert_layout(
    layout: &OciLayout,
    dest: &Path,
    format: ManifestFormat,
    ref_name: Option<&str>,
) -> Result<OciLayout> {
    if format == ManifestFormat::DockerV2Schema1 {
        return Err(WharfError::StoreError(
            "Docker schema 1 manifests cannot be written to a local layout".to_string(),
        ));
    }
    let blobs_dir = dest.join("blobs").join("sha256");
    std::fs::create_dir_all(&blobs_dir)?;

    let mut digests = vec![layout.manifest().config.digest.clone()];
    digests.extend(layout.layers().iter().map(|l| l.digest.clone()));
    for digest in &digests {
        let target = blob_path(dest, digest);
        if !target.exists() {
            std::fs::copy(layout.blob_path(digest), &target).map_err(|e| {
                WharfError::StoreError(format!("Failed to copy blob {}: {}", digest, e))
            })?;
        }
    }

    let manifest = OciImageManifest {
        schema_version: 2,
        media_type: Some(format.media_type().to_string()),
        config: OciDescriptor {
            media_type: format.config_media_type().to_string(),
            ..layout.manifest().config.clone()
        },
        layers: layout
            .layers()
            .iter()
            .map(|l| OciDescriptor {
                media_type: format.layer_media_type().to_string(),
                ..l.clone()
            })
            .collect(),
        annotations: layout.manifest().annotations.clone(),
        ..Default::default()
    };
    let manifest_bytes = serde_json::to_vec(&manifest)?;
    let manifest_hex = sha256_bytes(&manifest_bytes);
    std::fs::write(blobs_dir.join(&manifest_hex), &manifest_bytes)?;

    let annotations = ref_name.map(|name| {
        let mut map = std::collections::HashMap::new();
        map.insert(REF_NAME_ANNOTATION.to_string(), name.to_string());
        map
    });
    let index = LayoutIndex {
        schema_version: 2,
        manifests: vec![IndexEntry {
            media_type: format.media_type().to_string(),
            digest: format!("sha256:{}", manifest_hex),
            size: manifest_bytes.len() as i64,
            annotations,
        }],
    };
    std::fs::write(dest.join("index.json"), serde_json::to_vec_pretty(&index)?)?;
    std::fs::write(dest.join("oci-layout"), OCI_LAYOUT_CONTENT)?;
    OciLayout::open(dest)
}

/// Path of a blob inside a layout.
pub fn blob_path(root: &Path, digest: &str) -> PathBuf {
    root.join("blobs")
        .join("sha256")
        .join(strip_digest_prefix(digest))
}

fn read_index(root: &Path) -> Result<LayoutIndex> {
    if !root.join("oci-layout").exists() {
        return Err(WharfError::StoreError(format!(
            "Not a valid OCI layout: missing oci-layout file in {}",
            root.display()
        )));
    }
    let index_path = root.join("index.json");
    let data = std::fs::read(&index_path).map_err(|e| {
        WharfError::StoreError(format!(
            "Failed to read index.json at {}: {}",
            index_path.display(),
            e
        ))
    })?;
    Ok(serde_json::from_slice(&data)?)
}

fn read_blob(root: &Path, digest: &str) -> Result<Vec<u8>> {
    let path = blob_path(root, digest);
    std::fs::read(&path).map_err(|e| {
        WharfError::StoreError(format!("Failed to read blob {}: {}", path.display(), e))
    })
}

/// Unpack a layer blob (gzip or plain tar) into `target_dir`.
pub fn extract_layer(layer_path: &Path, target_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(target_dir)?;
    let data = std::fs::read(layer_path).map_err(|e| {
        WharfError::StoreError(format!(
            "Failed to open layer file {}: {}",
            layer_path.display(),
            e
        ))
    })?;
    let result = if is_gzip(&data) {
        tar::Archive::new(GzDecoder::new(data.as_slice())).unpack(target_dir)
    } else {
        tar::Archive::new(data.as_slice()).unpack(target_dir)
    };
    result.map_err(|e| {
        WharfError::StoreError(format!(
            "Failed to extract layer to {}: {}",
            target_dir.display(),
            e
        ))
    })?;

    tracing::debug!(
        layer = %layer_path.display(),
        target = %target_dir.display(),
        "Extracted layer"
    );
    Ok(())
}

/// Whether `data` starts with the gzip magic bytes.
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// Strip the "sha256:" prefix from a digest.
pub fn strip_digest_prefix(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap_or(digest)
}

/// Compute SHA256 digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Recursively copy a directory.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
