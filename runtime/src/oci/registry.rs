//! OCI registry client for pulling, pushing and searching images.
//!
//! Uses the `oci-distribution` crate for the distribution API and `reqwest`
//! for the v1 search endpoint.

use std::io::Write;
use std::path::Path;

use oci_distribution::client::{
    Certificate, CertificateEncoding, ClientConfig, ClientProtocol, Config, ImageLayer,
};
use oci_distribution::manifest::{ImageIndexEntry, OciDescriptor, OciImageManifest};
use oci_distribution::{Client, Reference};
use serde::Deserialize;
use wharf_core::error::{Result, WharfError};

use super::layout::{blob_path, IndexEntry, LayoutIndex, OciLayout};
use super::manifest::{ManifestFormat, OCI_MANIFEST_MEDIA_TYPE};
use super::reference::ImageReference;
use crate::backend::{RegistryOptions, SearchResult};

/// Client for a single registry call, configured from per-call options.
pub struct RegistryClient {
    client: Client,
    options: RegistryOptions,
}

impl RegistryClient {
    pub fn new(options: RegistryOptions) -> Result<Self> {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            accept_invalid_certificates: options.accept_invalid_certificates(),
            extra_root_certificates: load_certificates(options.cert_dir.as_deref())?,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };
        if let Some(policy) = &options.signature_policy {
            tracing::debug!(policy = %policy.display(), "Signature policy is not evaluated");
        }
        Ok(Self {
            client: Client::new(config),
            options,
        })
    }

    /// Pull an image and write it as an OCI image layout to `target_dir`.
    ///
    /// Blobs are stored under the digests the registry reported.
    pub async fn pull(&self, reference: &ImageReference, target_dir: &Path) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.options.auth.to_oci_auth();

        tracing::info!(
            reference = %reference,
            target = %target_dir.display(),
            "Pulling image from registry"
        );

        let blobs_dir = target_dir.join("blobs").join("sha256");
        std::fs::create_dir_all(&blobs_dir).map_err(|e| {
            WharfError::registry(
                &reference.registry,
                format!("Failed to create blobs directory: {}", e),
            )
        })?;

        let (manifest, manifest_digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| {
                WharfError::registry(&reference.registry, format!("Failed to pull manifest: {}", e))
            })?;

        let manifest_json = serde_json::to_vec(&manifest)?;
        std::fs::write(blob_path(target_dir, &manifest_digest), &manifest_json)?;

        self.pull_blob(&oci_ref, &manifest.config, target_dir, &reference.registry)
            .await?;
        for layer in &manifest.layers {
            tracing::debug!(digest = %layer.digest, size = layer.size, "Pulling layer");
            self.pull_blob(&oci_ref, layer, target_dir, &reference.registry)
                .await?;
        }

        let index = LayoutIndex {
            schema_version: 2,
            manifests: vec![IndexEntry {
                media_type: manifest
                    .media_type
                    .clone()
                    .unwrap_or_else(|| OCI_MANIFEST_MEDIA_TYPE.to_string()),
                digest: manifest_digest.clone(),
                size: manifest_json.len() as i64,
                annotations: None,
            }],
        };
        std::fs::write(
            target_dir.join("index.json"),
            serde_json::to_vec_pretty(&index)?,
        )?;
        std::fs::write(
            target_dir.join("oci-layout"),
            r#"{"imageLayoutVersion":"1.0.0"}"#,
        )?;

        tracing::info!(
            reference = %reference,
            digest = %manifest_digest,
            "Image pulled successfully"
        );
        Ok(())
    }

    async fn pull_blob(
        &self,
        oci_ref: &Reference,
        descriptor: &OciDescriptor,
        target_dir: &Path,
        registry: &str,
    ) -> Result<()> {
        let target = blob_path(target_dir, &descriptor.digest);
        if target.exists() {
            return Ok(());
        }
        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(oci_ref, descriptor, &mut data)
            .await
            .map_err(|e| {
                WharfError::registry(
                    registry,
                    format!("Failed to pull blob {}: {}", descriptor.digest, e),
                )
            })?;
        std::fs::write(&target, &data).map_err(|e| {
            WharfError::registry(
                registry,
                format!("Failed to write blob {}: {}", descriptor.digest, e),
            )
        })
    }

    /// Push a stored layout to `reference`, writing progress lines.
    ///
    /// `format` rewrites media types; `None` keeps the stored manifest type.
    pub async fn push(
        &self,
        layout: &OciLayout,
        reference: &ImageReference,
        format: Option<ManifestFormat>,
        progress: &mut (dyn Write + Send),
    ) -> Result<()> {
        let format = match format {
            Some(format) => format,
            None => ManifestFormat::from_media_type(layout.manifest_media_type())
                .unwrap_or(ManifestFormat::Oci),
        };
        if format == ManifestFormat::DockerV2Schema1 {
            return Err(WharfError::registry(
                &reference.registry,
                "pushing Docker schema 1 manifests is not supported",
            ));
        }
        let oci_ref = to_oci_reference(reference)?;

        tracing::info!(
            reference = %reference,
            source = %layout.root().display(),
            "Pushing image to registry"
        );
        progress_line(progress, "Getting image source signatures");

        let mut layers = Vec::with_capacity(layout.layers().len());
        let mut descriptors = Vec::with_capacity(layout.layers().len());
        for desc in layout.layers() {
            progress_line(progress, &format!("Copying blob {}", desc.digest));
            let data = std::fs::read(layout.blob_path(&desc.digest)).map_err(|e| {
                WharfError::StoreError(format!("Failed to read layer blob {}: {}", desc.digest, e))
            })?;
            layers.push(ImageLayer::new(
                data,
                format.layer_media_type().to_string(),
                None,
            ));
            descriptors.push(OciDescriptor {
                media_type: format.layer_media_type().to_string(),
                ..desc.clone()
            });
        }

        let config_desc = &layout.manifest().config;
        progress_line(progress, &format!("Copying config {}", config_desc.digest));
        let config_data = std::fs::read(layout.blob_path(&config_desc.digest)).map_err(|e| {
            WharfError::StoreError(format!("Failed to read config blob: {}", e))
        })?;
        let config = Config::new(config_data, format.config_media_type().to_string(), None);

        let manifest = OciImageManifest {
            schema_version: 2,
            media_type: Some(format.media_type().to_string()),
            config: OciDescriptor {
                media_type: format.config_media_type().to_string(),
                ..config_desc.clone()
            },
            layers: descriptors,
            annotations: layout.manifest().annotations.clone(),
            ..Default::default()
        };

        progress_line(progress, "Writing manifest to image destination");
        let auth = self.options.auth.to_oci_auth();
        let response = self
            .client
            .push(&oci_ref, &layers, config, &auth, Some(manifest))
            .await
            .map_err(|e| {
                WharfError::registry(&reference.registry, format!("Failed to push image: {}", e))
            })?;
        progress_line(progress, "Storing signatures");

        tracing::info!(
            reference = %reference,
            manifest_url = %response.manifest_url,
            "Image pushed successfully"
        );
        Ok(())
    }

    /// Query the v1 search endpoint of `registry`.
    pub async fn search(
        &self,
        registry: &str,
        term: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let host = search_host(registry);
        let url = format!("https://{}/v1/search", host);
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(self.options.accept_invalid_certificates())
            .build()
            .map_err(|e| WharfError::registry(registry, e.to_string()))?;

        let mut request = http
            .get(&url)
            .query(&[("q", term), ("n", &limit.to_string())]);
        if let Some(user) = self.options.auth.username() {
            request = request.basic_auth(user, self.options.auth.password());
        }

        tracing::debug!(registry, term, limit, "Searching registry");
        let response = request
            .send()
            .await
            .map_err(|e| WharfError::registry(registry, format!("search failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(WharfError::registry(
                registry,
                format!("search returned HTTP {}", response.status()),
            ));
        }
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| WharfError::registry(registry, format!("invalid search response: {}", e)))?;

        Ok(body
            .results
            .into_iter()
            .take(limit)
            .map(|hit| hit.into_result(registry))
            .collect())
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchHit {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    star_count: u64,
    #[serde(default)]
    is_official: bool,
    #[serde(default, alias = "is_trusted")]
    is_automated: bool,
}

impl SearchHit {
    fn into_result(self, registry: &str) -> SearchResult {
        let name = if self.name.contains('/') || registry != "docker.io" {
            format!("{}/{}", registry, self.name)
        } else {
            format!("{}/library/{}", registry, self.name)
        };
        SearchResult {
            name,
            description: self.description,
            star_count: self.star_count,
            is_official: self.is_official,
            is_automated: self.is_automated,
            index: registry.to_string(),
        }
    }
}

/// Docker Hub answers search on its index host.
fn search_host(registry: &str) -> &str {
    match registry {
        "docker.io" | "registry-1.docker.io" => "index.docker.io",
        other => other,
    }
}

fn progress_line(progress: &mut dyn Write, line: &str) {
    if let Err(e) = writeln!(progress, "{}", line) {
        tracing::debug!(error = %e, "Failed to write progress line");
    }
}

/// Load `*.crt` files from a certificate directory.
fn load_certificates(cert_dir: Option<&Path>) -> Result<Vec<Certificate>> {
    let Some(dir) = cert_dir else {
        return Ok(Vec::new());
    };
    let entries = std::fs::read_dir(dir).map_err(|e| {
        WharfError::InvalidArgument(format!(
            "failed to read certificate directory {}: {}",
            dir.display(),
            e
        ))
    })?;
    let mut certificates = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("crt") {
            certificates.push(Certificate {
                encoding: CertificateEncoding::Pem,
                data: std::fs::read(&path)?,
            });
        }
    }
    Ok(certificates)
}

/// Convert an ImageReference to an oci-distribution Reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = reference.full_reference();
    ref_str.parse::<Reference>().map_err(|e| {
        WharfError::InvalidArgument(format!("Invalid OCI reference '{}': {}", ref_str, e))
    })
}

/// Platform resolver that selects linux images matching the host architecture.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = super::image_config::host_architecture();
    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
