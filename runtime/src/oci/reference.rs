//! Image names and transport-qualified locations.
//!
//! `ImageReference` normalizes short names such as `alpine` into
//! `docker.io/library/alpine:latest`. `TransportRef` parses locations that
//! carry an explicit transport prefix (`docker://`, `docker-archive:`, …).

use std::path::PathBuf;

use wharf_core::error::{Result, WharfError};

/// Default registry when none is specified.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
pub const DEFAULT_TAG: &str = "latest";

/// Transport prefix for Docker-style tar archives.
pub const DOCKER_ARCHIVE_TRANSPORT: &str = "docker-archive";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname, optionally with a port
    pub registry: String,
    /// Repository path (`library/nginx`, `org/app`)
    pub repository: String,
    pub tag: Option<String>,
    /// Content digest (`sha256:…`)
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse and normalize an image name.
    ///
    /// - `nginx` → `docker.io/library/nginx:latest`
    /// - `org/app:1` → `docker.io/org/app:1`
    /// - `quay.io/org/app@sha256:…` keeps the digest and gets no default tag
    /// - `localhost:5000/app` treats the first component as a registry
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(WharfError::InvalidArgument(
                "empty image reference".to_string(),
            ));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(WharfError::InvalidArgument(format!(
                "invalid image reference {:?}: contains whitespace",
                reference
            )));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(WharfError::InvalidArgument(format!(
                        "invalid digest in reference {:?}: expected algorithm:hex",
                        reference
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        let (registry, repository) = split_registry(name)?;

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.map(str::to_string),
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// `registry/repository` without tag or digest.
    pub fn repository_name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Last path component of the repository (`docker.io/library/nginx` → `nginx`).
    pub fn base_name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    /// Full normalized reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.repository_name();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Normalize a name to its fully-qualified form.
pub fn normalize_name(name: &str) -> Result<String> {
    Ok(ImageReference::parse(name)?.full_reference())
}

/// Split the tag off the last path component. A colon in the first
/// component followed only by digits is a registry port, not a tag.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_slash = name_tag.rfind('/');
    let tail_start = last_slash.map(|p| p + 1).unwrap_or(0);
    match name_tag[tail_start..].rfind(':') {
        Some(colon) => {
            let colon = tail_start + colon;
            let tag = &name_tag[colon + 1..];
            if last_slash.is_none() && tag.chars().all(|c| c.is_ascii_digit()) {
                (name_tag, None)
            } else {
                (&name_tag[..colon], Some(tag))
            }
        }
        None => (name_tag, None),
    }
}

/// Split a name into registry and repository, defaulting to Docker Hub.
fn split_registry(name: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(WharfError::InvalidArgument(format!(
                    "empty repository in reference {:?}",
                    name
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
        return Ok((DEFAULT_REGISTRY.to_string(), name.to_string()));
    }
    Ok((DEFAULT_REGISTRY.to_string(), format!("library/{}", name)))
}

/// A transport-qualified image location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportRef {
    /// `docker://name`: a registry.
    Docker(ImageReference),
    /// `docker-archive:path[:name]`: a Docker-style tarball.
    DockerArchive {
        path: PathBuf,
        reference: Option<ImageReference>,
    },
    /// `oci:path[:tag]`: an OCI layout directory.
    Oci { path: PathBuf, tag: Option<String> },
    /// `oci-archive:path[:tag]`: a tarred OCI layout.
    OciArchive { path: PathBuf, tag: Option<String> },
    /// `dir:path`: an uncompressed directory of blobs.
    Dir(PathBuf),
}

impl TransportRef {
    /// Parse a location that must carry a transport prefix.
    pub fn parse(location: &str) -> Result<Self> {
        let location = location.trim();
        let (transport, rest) = location.split_once(':').ok_or_else(|| {
            WharfError::InvalidArgument(format!(
                "invalid image location {:?}: missing transport prefix",
                location
            ))
        })?;

        match transport {
            "docker" => {
                let name = rest.strip_prefix("//").ok_or_else(|| {
                    WharfError::InvalidArgument(format!(
                        "invalid image location {:?}: docker transport requires docker://",
                        location
                    ))
                })?;
                Ok(TransportRef::Docker(ImageReference::parse(name)?))
            }
            DOCKER_ARCHIVE_TRANSPORT => {
                let (path, name) = split_path_suffix(rest);
                let reference = name.map(ImageReference::parse).transpose()?;
                Ok(TransportRef::DockerArchive {
                    path: non_empty_path(path, location)?,
                    reference,
                })
            }
            "oci" => {
                let (path, tag) = split_path_suffix(rest);
                Ok(TransportRef::Oci {
                    path: non_empty_path(path, location)?,
                    tag: tag.map(str::to_string),
                })
            }
            "oci-archive" => {
                let (path, tag) = split_path_suffix(rest);
                Ok(TransportRef::OciArchive {
                    path: non_empty_path(path, location)?,
                    tag: tag.map(str::to_string),
                })
            }
            "dir" => Ok(TransportRef::Dir(non_empty_path(rest, location)?)),
            other => Err(WharfError::InvalidArgument(format!(
                "unknown transport {:?} in {:?}",
                other, location
            ))),
        }
    }

    /// Parse a location, treating anything without a known transport as a
    /// registry name.
    pub fn parse_heuristic(location: &str) -> Result<Self> {
        if has_transport_prefix(location) {
            Self::parse(location)
        } else {
            Ok(TransportRef::Docker(ImageReference::parse(location)?))
        }
    }

    /// Transport name as written in the prefix.
    pub fn transport_name(&self) -> &'static str {
        match self {
            TransportRef::Docker(_) => "docker",
            TransportRef::DockerArchive { .. } => DOCKER_ARCHIVE_TRANSPORT,
            TransportRef::Oci { .. } => "oci",
            TransportRef::OciArchive { .. } => "oci-archive",
            TransportRef::Dir(_) => "dir",
        }
    }

    /// Whether this location is a local archive that can be loaded directly.
    pub fn is_archive(&self) -> bool {
        matches!(
            self,
            TransportRef::DockerArchive { .. } | TransportRef::OciArchive { .. }
        )
    }
}

/// Whether `location` starts with a transport this crate understands.
pub fn has_transport_prefix(location: &str) -> bool {
    let location = location.trim_start();
    location.starts_with("docker://")
        || ["docker-archive:", "oci:", "oci-archive:", "dir:"]
            .iter()
            .any(|p| location.starts_with(p))
}

/// Split `path[:suffix]` at the first colon. Archive paths containing a
/// colon are not supported.
fn split_path_suffix(rest: &str) -> (&str, Option<&str>) {
    match rest.split_once(':') {
        Some((path, suffix)) if !suffix.is_empty() => (path, Some(suffix)),
        Some((path, _)) => (path, None),
        None => (rest, None),
    }
}

fn non_empty_path(path: &str, location: &str) -> Result<PathBuf> {
    if path.is_empty() {
        return Err(WharfError::InvalidArgument(format!(
            "invalid image location {:?}: empty path",
            location
        )));
    }
    Ok(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_user_repository_with_tag() {
        let r = ImageReference::parse("myuser/app:v1.0").unwrap();
        assert_eq!(r.full_reference(), "docker.io/myuser/app:v1.0");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("registry.local:5000/team/app:2").unwrap();
        assert_eq!(r.registry, "registry.local:5000");
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag.as_deref(), Some("2"));
    }

    #[test]
    fn test_parse_port_without_repository_path() {
        let (name, tag) = split_tag("localhost:5000");
        assert_eq!(name, "localhost:5000");
        assert_eq!(tag, None);
    }

    #[test]
    fn test_parse_digest_without_tag() {
        let r = ImageReference::parse("quay.io/org/app@sha256:0123abcd").unwrap();
        assert_eq!(r.tag, None);
        assert_eq!(r.digest.as_deref(), Some("sha256:0123abcd"));
        assert_eq!(r.full_reference(), "quay.io/org/app@sha256:0123abcd");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("nginx@nodigest").is_err());
        assert!(ImageReference::parse("two words").is_err());
        assert!(ImageReference::parse("quay.io/").is_err());
    }

    #[test]
    fn test_base_name() {
        let r = ImageReference::parse("quay.io/org/sub/tool:1").unwrap();
        assert_eq!(r.base_name(), "tool");
        assert_eq!(r.repository_name(), "quay.io/org/sub/tool");
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(
            normalize_name("alpine:3.19").unwrap(),
            "docker.io/library/alpine:3.19"
        );
    }

    #[test]
    fn test_transport_docker() {
        let t = TransportRef::parse("docker://quay.io/org/app:1").unwrap();
        match t {
            TransportRef::Docker(r) => assert_eq!(r.full_reference(), "quay.io/org/app:1"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(TransportRef::parse("docker:quay.io/app").is_err());
    }

    #[test]
    fn test_transport_docker_archive() {
        let t = TransportRef::parse("docker-archive:/tmp/img.tar").unwrap();
        assert_eq!(
            t,
            TransportRef::DockerArchive {
                path: PathBuf::from("/tmp/img.tar"),
                reference: None
            }
        );
        assert!(t.is_archive());

        let t = TransportRef::parse("docker-archive:/tmp/img.tar:app:v2").unwrap();
        match t {
            TransportRef::DockerArchive { path, reference } => {
                assert_eq!(path, PathBuf::from("/tmp/img.tar"));
                assert_eq!(
                    reference.unwrap().full_reference(),
                    "docker.io/library/app:v2"
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_transport_oci_with_tag() {
        let t = TransportRef::parse("oci:/srv/layout:latest").unwrap();
        assert_eq!(
            t,
            TransportRef::Oci {
                path: PathBuf::from("/srv/layout"),
                tag: Some("latest".to_string())
            }
        );
    }

    #[test]
    fn test_transport_dir_and_unknown() {
        assert_eq!(
            TransportRef::parse("dir:/srv/out").unwrap(),
            TransportRef::Dir(PathBuf::from("/srv/out"))
        );
        assert!(TransportRef::parse("ftp:/srv/out").is_err());
        assert!(TransportRef::parse("dir:").is_err());
        assert!(TransportRef::parse("nocolon").is_err());
    }

    #[test]
    fn test_parse_heuristic() {
        let t = TransportRef::parse_heuristic("fedora:39").unwrap();
        assert_eq!(t.transport_name(), "docker");
        let t = TransportRef::parse_heuristic("oci-archive:/tmp/x.tar").unwrap();
        assert_eq!(t.transport_name(), "oci-archive");
        assert!(has_transport_prefix("docker-archive:/x.tar"));
        assert!(!has_transport_prefix("localhost:5000/app"));
    }
}
