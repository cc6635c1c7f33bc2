//! Filesystem snapshots and layer tarballs.
//!
//! Used by RUN/COPY build steps and by container commit to turn changes in a
//! root filesystem into a layer.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use wharf_core::error::{Result, WharfError};

use crate::oci::layout::{is_gzip, LayerBlob};

/// Metadata for a single file in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// Relative path from rootfs root
    pub path: PathBuf,
    pub size: u64,
    /// Modification time (seconds since epoch)
    pub mtime: i64,
    pub is_dir: bool,
}

/// A snapshot of a directory's file state.
#[derive(Debug, Clone, Default)]
pub struct DirSnapshot {
    /// Map of relative path → file entry
    pub entries: HashMap<PathBuf, FileEntry>,
}

impl DirSnapshot {
    /// Take a snapshot of a directory, recording all files and their metadata.
    pub fn capture(root: &Path) -> Result<Self> {
        let mut entries = HashMap::new();
        walk_dir(root, root, &mut entries)?;
        Ok(DirSnapshot { entries })
    }

    /// Snapshot the union of layer tarballs, later layers winning.
    pub fn from_layers(layers: &[LayerBlob]) -> Result<Self> {
        let mut entries = HashMap::new();
        for layer in layers {
            let data = std::fs::read(&layer.path)?;
            if is_gzip(&data) {
                read_tar_entries(GzDecoder::new(data.as_slice()), &mut entries)?;
            } else {
                read_tar_entries(data.as_slice(), &mut entries)?;
            }
        }
        Ok(DirSnapshot { entries })
    }

    /// Paths added or modified between this snapshot (before) and `after`.
    pub fn diff(&self, after: &DirSnapshot) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = after
            .entries
            .iter()
            .filter(|(path, after_entry)| match self.entries.get(*path) {
                None => true,
                Some(before) => {
                    !after_entry.is_dir
                        && (before.size != after_entry.size || before.mtime != after_entry.mtime)
                }
            })
            .map(|(path, _)| path.clone())
            .collect();
        changed.sort();
        changed
    }
}

fn read_tar_entries<R: Read>(reader: R, entries: &mut HashMap<PathBuf, FileEntry>) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let entry = entry?;
        let header = entry.header();
        let path = entry.path()?;
        let relative: PathBuf = path
            .components()
            .filter(|c| matches!(c, std::path::Component::Normal(_)))
            .collect();
        if relative.as_os_str().is_empty() {
            continue;
        }
        entries.insert(
            relative.clone(),
            FileEntry {
                path: relative,
                size: header.size().unwrap_or(0),
                mtime: header.mtime().unwrap_or(0) as i64,
                is_dir: header.entry_type().is_dir(),
            },
        );
    }
    Ok(())
}

/// Recursively walk a directory and collect file entries.
fn walk_dir(root: &Path, current: &Path, entries: &mut HashMap<PathBuf, FileEntry>) -> Result<()> {
    let read_dir = std::fs::read_dir(current).map_err(|e| {
        WharfError::BuildError(format!(
            "Failed to read directory {}: {}",
            current.display(),
            e
        ))
    })?;

    for entry in read_dir {
        let entry = entry
            .map_err(|e| WharfError::BuildError(format!("Failed to read directory entry: {}", e)))?;
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|e| {
                WharfError::BuildError(format!(
                    "Failed to compute relative path for {}: {}",
                    path.display(),
                    e
                ))
            })?
            .to_path_buf();

        let metadata = std::fs::symlink_metadata(&path).map_err(|e| {
            WharfError::BuildError(format!(
                "Failed to read metadata for {}: {}",
                path.display(),
                e
            ))
        })?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        entries.insert(
            relative.clone(),
            FileEntry {
                path: relative,
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                mtime,
                is_dir: metadata.is_dir(),
            },
        );

        if metadata.is_dir() {
            walk_dir(root, &path, entries)?;
        }
    }

    Ok(())
}

/// Build an uncompressed tar of `changed` paths (relative to `rootfs`).
pub fn tar_paths(rootfs: &Path, changed: &[PathBuf]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    for relative in changed {
        let full = rootfs.join(relative);
        let Ok(metadata) = std::fs::symlink_metadata(&full) else {
            continue;
        };
        let appended = if metadata.is_dir() {
            builder.append_dir(relative, &full)
        } else {
            builder.append_path_with_name(&full, relative)
        };
        appended.map_err(|e| {
            WharfError::BuildError(format!(
                "Failed to add {} to layer: {}",
                relative.display(),
                e
            ))
        })?;
    }

    builder
        .into_inner()
        .map_err(|e| WharfError::BuildError(format!("Failed to finalize layer: {}", e)))
}

/// Build an uncompressed tar of everything under `src_dir`, placed under
/// `target_prefix` inside the image.
pub fn tar_dir(src_dir: &Path, target_prefix: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    let prefix = if target_prefix.as_os_str().is_empty() {
        Path::new(".")
    } else {
        target_prefix
    };
    builder.append_dir_all(prefix, src_dir).map_err(|e| {
        WharfError::BuildError(format!(
            "Failed to add {} to layer: {}",
            src_dir.display(),
            e
        ))
    })?;
    builder
        .into_inner()
        .map_err(|e| WharfError::BuildError(format!("Failed to finalize layer: {}", e)))
}

/// Snapshot `rootfs`, diff it against `before`, and write the changes as a
/// layer blob into `blobs_dir`. `None` when nothing changed.
pub fn layer_from_changes(
    before: &DirSnapshot,
    rootfs: &Path,
    blobs_dir: &Path,
) -> Result<Option<LayerBlob>> {
    let after = DirSnapshot::capture(rootfs)?;
    let changed = before.diff(&after);
    if changed.is_empty() {
        return Ok(None);
    }
    let tar = tar_paths(rootfs, &changed)?;
    LayerBlob::from_tar_bytes(&tar, blobs_dir).map(Some)
}
