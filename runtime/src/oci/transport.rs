//! Transport resolver: registry pulls and searches, plus push to every
//! supported destination transport.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use wharf_core::error::{Result, WharfError};

use super::archive::{write_dir, write_docker_archive, write_oci_archive};
use super::layout::{convert_layout, copy_layout, OciLayout};
use super::reference::{normalize_name, ImageReference, TransportRef};
use super::registry::RegistryClient;
use crate::backend::{
    ImageBackend, ImageTransport, Progress, PushRequest, RegistryOptions, SearchResult,
    StoredImage,
};

/// Default [`ImageTransport`]: registries through `oci-distribution`, local
/// destinations through the archive and layout writers.
pub struct TransportResolver {
    backend: Arc<dyn ImageBackend>,
}

impl TransportResolver {
    pub fn new(backend: Arc<dyn ImageBackend>) -> Self {
        Self { backend }
    }

    /// Names to record in archive destinations.
    async fn archive_names(&self, request: &PushRequest) -> Result<Vec<String>> {
        let mut names = match &request.destination {
            TransportRef::DockerArchive {
                reference: Some(reference),
                ..
            } => vec![reference.full_reference()],
            _ => self.backend.lookup(&request.image_id).await?.names,
        };
        for tag in &request.additional_tags {
            let tag = normalize_name(tag)?;
            if !names.contains(&tag) {
                names.push(tag);
            }
        }
        Ok(names)
    }
}

fn progress_line(progress: &mut dyn Write, line: &str) {
    if let Err(e) = writeln!(progress, "{}", line) {
        tracing::debug!(error = %e, "Failed to write progress line");
    }
}

/// Copy progress lines for a local destination.
fn local_copy_progress(layout: &OciLayout, progress: &mut dyn Write) {
    progress_line(progress, "Getting image source signatures");
    for layer in layout.layers() {
        progress_line(progress, &format!("Copying blob {}", layer.digest));
    }
    progress_line(
        progress,
        &format!("Copying config {}", layout.manifest().config.digest),
    );
    progress_line(progress, "Writing manifest to image destination");
    progress_line(progress, "Storing signatures");
}

#[async_trait]
impl ImageTransport for TransportResolver {
    async fn pull(&self, name: &str, options: &RegistryOptions) -> Result<StoredImage> {
        let name = name.strip_prefix("docker://").unwrap_or(name);
        let reference = ImageReference::parse(name)?;
        let staging = tempfile::Builder::new().prefix("wharf-pull").tempdir()?;

        let client = RegistryClient::new(options.clone())?;
        client.pull(&reference, staging.path()).await?;

        let stored = self
            .backend
            .add_layout(staging.path(), &[reference.full_reference()], None)
            .await?;
        tracing::info!(image = %reference, image_id = %stored.id, "Pulled image");
        Ok(stored)
    }

    async fn push(&self, request: PushRequest, mut progress: Progress) -> Result<()> {
        let layout = OciLayout::open(&request.layout_dir)?;
        if !request.compress {
            tracing::debug!("Layers are stored compressed; pushing them as stored");
        }
        if request.remove_signatures {
            tracing::debug!("Stored images carry no signatures");
        }

        // Local destinations get a converted copy when a format was requested.
        let scratch = tempfile::Builder::new().prefix("wharf-push").tempdir()?;
        let local_layout = match request.manifest_format {
            Some(format) if !matches!(request.destination, TransportRef::Docker(_)) => {
                convert_layout(&layout, scratch.path(), format, None)?
            }
            _ => layout.clone(),
        };

        match &request.destination {
            TransportRef::Docker(reference) => {
                let client = RegistryClient::new(request.options.clone())?;
                client
                    .push(&layout, reference, request.manifest_format, &mut progress)
                    .await?;
            }
            TransportRef::DockerArchive { path, .. } => {
                let names = self.archive_names(&request).await?;
                local_copy_progress(&local_layout, &mut progress);
                write_docker_archive(&local_layout, &names, path)?;
            }
            TransportRef::OciArchive { path, tag } => {
                local_copy_progress(&local_layout, &mut progress);
                write_oci_archive(&local_layout, tag.as_deref(), path)?;
            }
            TransportRef::Oci { path, tag } => {
                local_copy_progress(&local_layout, &mut progress);
                copy_layout(&local_layout, path, tag.as_deref())?;
            }
            TransportRef::Dir(path) => {
                local_copy_progress(&local_layout, &mut progress);
                write_dir(&local_layout, path)?;
            }
        }
        progress.flush()?;

        tracing::info!(
            image_id = %request.image_id,
            destination = request.destination.transport_name(),
            "Pushed image"
        );
        Ok(())
    }

    async fn search(
        &self,
        registry: &str,
        term: &str,
        limit: usize,
        options: &RegistryOptions,
    ) -> Result<Vec<SearchResult>> {
        if term.is_empty() {
            return Err(WharfError::InvalidArgument(
                "search term must not be empty".to_string(),
            ));
        }
        RegistryClient::new(options.clone())?
            .search(registry, term, limit)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::archive::load_archive;
    use crate::oci::image_config::ImageConfig;
    use crate::oci::layout::{write_layout, LayerBlob};
    use crate::oci::manifest::ManifestFormat;
    use crate::oci::store::LocalImageStore;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Lines(Arc<Mutex<Vec<u8>>>);

    impl Write for Lines {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Lines {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    async fn stored_image(tmp: &TempDir) -> (Arc<LocalImageStore>, StoredImage) {
        let store = Arc::new(LocalImageStore::new(&tmp.path().join("store")).unwrap());
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "hi.txt", &b"hi"[..]).unwrap();
        let tar = builder.into_inner().unwrap();

        let dir = tmp.path().join("layout");
        let layer = LayerBlob::from_tar_bytes(&tar, &dir.join("blobs").join("sha256")).unwrap();
        let mut config = ImageConfig::for_host();
        config.rootfs.diff_ids.push(layer.prefixed_diff_id());
        write_layout(&dir, &config, &[layer], ManifestFormat::Oci, None).unwrap();
        let image = store
            .add_layout(&dir, &["app:1".to_string()], None)
            .await
            .unwrap();
        (store, image)
    }

    async fn request_for(
        store: &LocalImageStore,
        image: &StoredImage,
        destination: &str,
    ) -> PushRequest {
        PushRequest {
            image_id: image.id.clone(),
            layout_dir: store.layout_path(image).await.unwrap(),
            destination: TransportRef::parse(destination).unwrap(),
            manifest_format: None,
            compress: false,
            additional_tags: vec!["app:extra".to_string()],
            remove_signatures: false,
            options: RegistryOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_push_docker_archive() {
        let tmp = TempDir::new().unwrap();
        let (store, image) = stored_image(&tmp).await;
        let resolver = TransportResolver::new(store.clone());
        let dest = tmp.path().join("out.tar");
        let lines = Lines::default();

        let request = request_for(&store, &image, &format!("docker-archive:{}", dest.display())).await;
        resolver.push(request, Box::new(lines.clone())).await.unwrap();

        let text = lines.text();
        assert!(text.starts_with("Getting image source signatures\n"));
        assert!(text.contains("Copying blob sha256:"));
        assert!(text.contains("Writing manifest to image destination"));

        let loaded = load_archive(&TransportRef::parse(&format!("docker-archive:{}", dest.display())).unwrap()).unwrap();
        assert_eq!(loaded.images[0].layout.image_id(), image.id);
        assert_eq!(
            loaded.images[0].names,
            vec![
                "docker.io/library/app:1".to_string(),
                "docker.io/library/app:extra".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_push_oci_layout_with_format() {
        let tmp = TempDir::new().unwrap();
        let (store, image) = stored_image(&tmp).await;
        let resolver = TransportResolver::new(store.clone());
        let dest = tmp.path().join("oci-out");

        let mut request = request_for(&store, &image, &format!("oci:{}:v1", dest.display())).await;
        request.manifest_format = Some(ManifestFormat::DockerV2Schema2);
        resolver.push(request, Box::new(Lines::default())).await.unwrap();

        let layout = OciLayout::open_tagged(&dest, Some("v1")).unwrap();
        assert_eq!(layout.image_id(), image.id);
        assert_eq!(
            layout.manifest_media_type(),
            ManifestFormat::DockerV2Schema2.media_type()
        );
    }

    #[tokio::test]
    async fn test_push_dir() {
        let tmp = TempDir::new().unwrap();
        let (store, image) = stored_image(&tmp).await;
        let resolver = TransportResolver::new(store.clone());
        let dest = tmp.path().join("dir-out");

        let request = request_for(&store, &image, &format!("dir:{}", dest.display())).await;
        resolver.push(request, Box::new(Lines::default())).await.unwrap();
        assert!(dest.join("manifest.json").exists());
        assert!(dest.join(&image.id).exists());
    }

    #[tokio::test]
    async fn test_search_rejects_empty_term() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalImageStore::new(tmp.path()).unwrap());
        let resolver = TransportResolver::new(store);
        let err = resolver
            .search("docker.io", "", 10, &RegistryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WharfError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_pull_rejects_bad_reference() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalImageStore::new(tmp.path()).unwrap());
        let resolver = TransportResolver::new(store);
        assert!(resolver
            .pull("bad name", &RegistryOptions::default())
            .await
            .is_err());
    }
}
