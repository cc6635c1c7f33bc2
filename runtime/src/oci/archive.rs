//! Tar archives: build contexts, docker-archive, oci-archive and dir transports.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use wharf_core::error::{Result, WharfError};

use super::image_config::ImageConfig;
use super::layout::{
    blob_path, copy_layout, is_gzip, strip_digest_prefix, write_layout, LayerBlob, OciLayout,
};
use super::manifest::ManifestFormat;
use super::reference::{normalize_name, TransportRef, DOCKER_ARCHIVE_TRANSPORT};

/// `manifest.json` entry of a docker-archive tarball.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerArchiveEntry {
    config: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    layers: Vec<String>,
}

/// One image found in an archive.
#[derive(Debug)]
pub struct ArchiveImage {
    pub layout: OciLayout,
    /// Normalized names recorded in the archive
    pub names: Vec<String>,
}

/// Images unpacked from an archive. The layouts live in a scratch directory
/// removed when this value is dropped.
#[derive(Debug)]
pub struct LoadedArchive {
    _workdir: TempDir,
    pub images: Vec<ArchiveImage>,
}

/// Unpack a plain or gzip-compressed tarball into `dest`.
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<()> {
    let mut file = File::open(archive).map_err(|e| {
        std::io::Error::new(
            e.kind(),
            format!("failed to open archive {}: {}", archive.display(), e),
        )
    })?;
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    let file = File::open(archive)?;
    std::fs::create_dir_all(dest)?;

    let result = if read == 2 && is_gzip(&magic) {
        tar::Archive::new(GzDecoder::new(file)).unpack(dest)
    } else {
        tar::Archive::new(file).unpack(dest)
    };
    result.map_err(|e| {
        std::io::Error::new(
            e.kind(),
            format!(
                "failed to unpack {} into {}: {}",
                archive.display(),
                dest.display(),
                e
            ),
        )
    })?;

    tracing::debug!(
        archive = %archive.display(),
        dest = %dest.display(),
        "Unpacked archive"
    );
    Ok(())
}

/// Load every image from an archive location.
pub fn load_archive(location: &TransportRef) -> Result<LoadedArchive> {
    match location {
        TransportRef::DockerArchive { path, reference } => {
            let fallback = reference.as_ref().map(|r| r.full_reference());
            load_docker_archive(path, fallback.as_deref())
        }
        TransportRef::OciArchive { path, tag } => load_oci_archive(path, tag.as_deref()),
        other => Err(WharfError::InvalidArgument(format!(
            "{} is not an archive transport",
            other.transport_name()
        ))),
    }
}

/// Load a docker-archive tarball (`docker save` format).
///
/// `fallback_name` names images that carry no RepoTags.
pub fn load_docker_archive(path: &Path, fallback_name: Option<&str>) -> Result<LoadedArchive> {
    let workdir = scratch_dir()?;
    let extracted = workdir.path().join("extracted");
    unpack_archive(path, &extracted).map_err(|e| archive_error(path, e))?;

    let manifest_path = extracted.join("manifest.json");
    let data = std::fs::read(&manifest_path).map_err(|e| {
        archive_error(path, format!("missing manifest.json: {}", e))
    })?;
    let entries: Vec<DockerArchiveEntry> = serde_json::from_slice(&data)?;
    if entries.is_empty() {
        return Err(archive_error(path, "archive contains no images"));
    }

    let mut images = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let config_data = std::fs::read(extracted.join(&entry.config))
            .map_err(|e| archive_error(path, format!("missing config {}: {}", entry.config, e)))?;
        let config = ImageConfig::from_slice(&config_data)?;

        let layout_dir = workdir.path().join(format!("layout-{}", i));
        let blobs_dir = layout_dir.join("blobs").join("sha256");
        let layers = entry
            .layers
            .iter()
            .map(|layer| LayerBlob::from_tarball(&extracted.join(layer), &blobs_dir))
            .collect::<Result<Vec<_>>>()?;

        let mut config = config;
        config.rootfs.diff_ids = layers.iter().map(|l| l.prefixed_diff_id()).collect();
        write_layout(
            &layout_dir,
            &config,
            &layers,
            ManifestFormat::DockerV2Schema2,
            None,
        )?;

        let mut names = entry
            .repo_tags
            .clone()
            .unwrap_or_default()
            .iter()
            .map(|t| normalize_name(t))
            .collect::<Result<Vec<_>>>()?;
        if names.is_empty() {
            if let Some(name) = fallback_name {
                names.push(normalize_name(name)?);
            }
        }

        images.push(ArchiveImage {
            layout: OciLayout::open(&layout_dir)?,
            names,
        });
    }

    tracing::info!(
        archive = %path.display(),
        images = images.len(),
        "Loaded docker archive"
    );
    Ok(LoadedArchive {
        _workdir: workdir,
        images,
    })
}

/// Load an oci-archive tarball (a tarred OCI layout).
///
/// With `tag`, only the manifest carrying that ref name is loaded.
pub fn load_oci_archive(path: &Path, tag: Option<&str>) -> Result<LoadedArchive> {
    let workdir = scratch_dir()?;
    let root = workdir.path().join("layout");
    unpack_archive(path, &root).map_err(|e| archive_error(path, e))?;

    let layouts = match tag {
        Some(tag) => vec![OciLayout::open_tagged(&root, Some(tag))?],
        None => OciLayout::open_all(&root)?,
    };
    if layouts.is_empty() {
        return Err(archive_error(path, "archive contains no images"));
    }

    let images = layouts
        .into_iter()
        .map(|layout| {
            let names = match layout.ref_name() {
                Some(name) if name.contains('/') || name.contains(':') => {
                    vec![normalize_name(name)?]
                }
                _ => Vec::new(),
            };
            Ok(ArchiveImage { layout, names })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(LoadedArchive {
        _workdir: workdir,
        images,
    })
}

/// Write `layout` as a docker-archive tarball at `dest`.
pub fn write_docker_archive(layout: &OciLayout, names: &[String], dest: &Path) -> Result<()> {
    let file = File::create(dest)?;
    let mut builder = tar::Builder::new(file);

    let config_name = format!("{}.json", layout.image_id());
    append_file(&mut builder, &config_name, &layout.blob_path(&layout.manifest().config.digest))?;

    let mut layer_names = Vec::new();
    for desc in layout.layers() {
        let hex = strip_digest_prefix(&desc.digest);
        let name = format!("{}/layer.tar", hex);
        let data = std::fs::read(layout.blob_path(&desc.digest))?;
        let tar_bytes = if is_gzip(&data) {
            let mut out = Vec::new();
            GzDecoder::new(data.as_slice()).read_to_end(&mut out)?;
            out
        } else {
            data
        };
        append_bytes(&mut builder, &name, &tar_bytes)?;
        layer_names.push(name);
    }

    let entry = DockerArchiveEntry {
        config: config_name,
        repo_tags: Some(names.to_vec()),
        layers: layer_names,
    };
    append_bytes(
        &mut builder,
        "manifest.json",
        &serde_json::to_vec(&vec![entry])?,
    )?;
    builder.into_inner()?;

    tracing::debug!(dest = %dest.display(), "Wrote {}", DOCKER_ARCHIVE_TRANSPORT);
    Ok(())
}

/// Write `layout` as a tarred OCI layout at `dest`.
pub fn write_oci_archive(layout: &OciLayout, tag: Option<&str>, dest: &Path) -> Result<()> {
    let workdir = scratch_dir()?;
    copy_layout(layout, workdir.path(), tag)?;
    let file = File::create(dest)?;
    let mut builder = tar::Builder::new(file);
    builder.append_dir_all(".", workdir.path())?;
    builder.into_inner()?;
    Ok(())
}

/// Write `layout` in the `dir:` transport format: `manifest.json`, one file
/// per blob named by its hex digest, and a `version` file.
pub fn write_dir(layout: &OciLayout, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    std::fs::copy(
        blob_path(layout.root(), layout.manifest_digest()),
        dest.join("manifest.json"),
    )?;
    let config_digest = &layout.manifest().config.digest;
    std::fs::copy(
        layout.blob_path(config_digest),
        dest.join(strip_digest_prefix(config_digest)),
    )?;
    for desc in layout.layers() {
        std::fs::copy(
            layout.blob_path(&desc.digest),
            dest.join(strip_digest_prefix(&desc.digest)),
        )?;
    }
    std::fs::write(dest.join("version"), "Directory Transport Version: 1.1\n")?;
    Ok(())
}

fn append_file<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    path: &Path,
) -> Result<()> {
    let data = std::fs::read(path)?;
    append_bytes(builder, name, &data)
}

fn append_bytes<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    data: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder.append_data(&mut header, name, data)?;
    Ok(())
}

fn scratch_dir() -> Result<TempDir> {
    Ok(tempfile::Builder::new().prefix("wharf-archive").tempdir()?)
}

fn archive_error(path: &Path, message: impl std::fmt::Display) -> WharfError {
    WharfError::registry(
        format!("{}:{}", DOCKER_ARCHIVE_TRANSPORT, path.display()),
        message.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::reference::ImageReference;

    fn tar_with(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in files {
            append_bytes(&mut builder, name, content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn sample_layout(dir: &Path) -> OciLayout {
        let staging = dir.join("staging");
        let layer = LayerBlob::from_tar_bytes(&tar_with(&[("hello.txt", b"hi")]), &staging).unwrap();
        let mut config = ImageConfig::for_host();
        config.rootfs.diff_ids.push(layer.prefixed_diff_id());
        let layout_dir = dir.join("layout");
        write_layout(&layout_dir, &config, &[layer], ManifestFormat::Oci, None).unwrap();
        OciLayout::open(&layout_dir).unwrap()
    }

    #[test]
    fn test_unpack_plain_and_gzip() {
        let tmp = TempDir::new().unwrap();
        let tar = tar_with(&[("Dockerfile", b"FROM alpine\n")]);
        let plain = tmp.path().join("ctx.tar");
        std::fs::write(&plain, &tar).unwrap();
        unpack_archive(&plain, &tmp.path().join("a")).unwrap();
        assert!(tmp.path().join("a/Dockerfile").exists());

        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        std::io::Write::write_all(&mut enc, &tar).unwrap();
        let gz = tmp.path().join("ctx.tar.gz");
        std::fs::write(&gz, enc.finish().unwrap()).unwrap();
        unpack_archive(&gz, &tmp.path().join("b")).unwrap();
        assert!(tmp.path().join("b/Dockerfile").exists());
    }

    #[test]
    fn test_unpack_missing_archive() {
        let tmp = TempDir::new().unwrap();
        let err = unpack_archive(Path::new("/nonexistent.tar"), tmp.path()).unwrap_err();
        assert!(matches!(err, WharfError::IoError(_)));
    }

    #[test]
    fn test_docker_archive_roundtrip_keeps_names_and_diff_ids() {
        let tmp = TempDir::new().unwrap();
        let layout = sample_layout(tmp.path());
        let archive = tmp.path().join("image.tar");
        write_docker_archive(
            &layout,
            &["docker.io/library/demo:1".to_string()],
            &archive,
        )
        .unwrap();

        let loaded = load_docker_archive(&archive, None).unwrap();
        assert_eq!(loaded.images.len(), 1);
        let image = &loaded.images[0];
        assert_eq!(image.names, vec!["docker.io/library/demo:1"]);
        assert_eq!(
            image.layout.config().rootfs.diff_ids,
            layout.config().rootfs.diff_ids
        );
    }

    #[test]
    fn test_docker_archive_fallback_name() {
        let tmp = TempDir::new().unwrap();
        let layout = sample_layout(tmp.path());
        let archive = tmp.path().join("image.tar");
        write_docker_archive(&layout, &[], &archive).unwrap();

        let location = TransportRef::DockerArchive {
            path: archive,
            reference: Some(ImageReference::parse("named:v2").unwrap()),
        };
        let loaded = load_archive(&location).unwrap();
        assert_eq!(loaded.images[0].names, vec!["docker.io/library/named:v2"]);
    }

    #[test]
    fn test_oci_archive_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let layout = sample_layout(tmp.path());
        let archive = tmp.path().join("image.oci.tar");
        write_oci_archive(&layout, Some("quay.io/org/demo:2"), &archive).unwrap();

        let loaded = load_oci_archive(&archive, None).unwrap();
        assert_eq!(loaded.images.len(), 1);
        assert_eq!(loaded.images[0].layout.image_id(), layout.image_id());
        assert_eq!(loaded.images[0].names, vec!["quay.io/org/demo:2"]);
    }

    #[test]
    fn test_write_dir() {
        let tmp = TempDir::new().unwrap();
        let layout = sample_layout(tmp.path());
        let dest = tmp.path().join("out");
        write_dir(&layout, &dest).unwrap();
        assert!(dest.join("manifest.json").exists());
        assert!(dest.join("version").exists());
        assert!(dest.join(layout.image_id()).exists());
    }

    #[test]
    fn test_load_archive_rejects_registry_location() {
        let location = TransportRef::Docker(ImageReference::parse("alpine").unwrap());
        assert!(matches!(
            load_archive(&location),
            Err(WharfError::InvalidArgument(_))
        ));
    }
}
