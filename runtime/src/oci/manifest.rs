//! Manifest format keywords and media types.

use wharf_core::error::{Result, WharfError};

/// OCI image manifest media type.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Docker schema 1 signed manifest media type.
pub const DOCKER_V2S1_SIGNED_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";

/// Docker schema 2 manifest media type.
pub const DOCKER_V2S2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

pub const OCI_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_LAYER_GZIP_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const OCI_LAYER_TAR_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar";
pub const DOCKER_CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";
pub const DOCKER_LAYER_GZIP_MEDIA_TYPE: &str =
    "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Manifest dialect used when pushing or committing an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Oci,
    DockerV2Schema1,
    DockerV2Schema2,
}

impl ManifestFormat {
    /// Map a push format keyword. `""` selects OCI.
    pub fn from_keyword(keyword: &str) -> Result<Self> {
        match keyword {
            "oci" | "" => Ok(Self::Oci),
            "v2s1" => Ok(Self::DockerV2Schema1),
            "v2s2" | "docker" => Ok(Self::DockerV2Schema2),
            other => Err(WharfError::UnknownFormat(other.to_string())),
        }
    }

    /// Map a commit format keyword. Commit only writes OCI or Docker schema 2.
    pub fn from_commit_keyword(keyword: &str) -> Result<Self> {
        match keyword {
            "oci" | "" => Ok(Self::Oci),
            "docker" => Ok(Self::DockerV2Schema2),
            other => Err(WharfError::UnknownFormat(other.to_string())),
        }
    }

    /// Recover the format from a stored manifest media type.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            OCI_MANIFEST_MEDIA_TYPE => Some(Self::Oci),
            DOCKER_V2S1_SIGNED_MEDIA_TYPE => Some(Self::DockerV2Schema1),
            DOCKER_V2S2_MEDIA_TYPE => Some(Self::DockerV2Schema2),
            _ => None,
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Oci => OCI_MANIFEST_MEDIA_TYPE,
            Self::DockerV2Schema1 => DOCKER_V2S1_SIGNED_MEDIA_TYPE,
            Self::DockerV2Schema2 => DOCKER_V2S2_MEDIA_TYPE,
        }
    }

    pub fn config_media_type(&self) -> &'static str {
        match self {
            Self::Oci => OCI_CONFIG_MEDIA_TYPE,
            _ => DOCKER_CONFIG_MEDIA_TYPE,
        }
    }

    /// Layer media type for a gzip-compressed layer in this dialect.
    pub fn layer_media_type(&self) -> &'static str {
        match self {
            Self::Oci => OCI_LAYER_GZIP_MEDIA_TYPE,
            _ => DOCKER_LAYER_GZIP_MEDIA_TYPE,
        }
    }
}

/// Map a push format keyword straight to its manifest media type.
pub fn manifest_type_for(keyword: &str) -> Result<&'static str> {
    ManifestFormat::from_keyword(keyword).map(|f| f.media_type())
}
