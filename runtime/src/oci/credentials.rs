//! Registry credentials supplied per call.
//!
//! Credentials arrive either as a `user:password` string or through a
//! docker-style auth file (`{"auths": {"<registry>": {"auth": "<base64>"}}}`).

use std::collections::HashMap;
use std::path::Path;

use base64::Engine;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use serde::Deserialize;
use wharf_core::error::{Result, WharfError};

/// Authentication credentials for a container registry.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl RegistryAuth {
    /// Anonymous access.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Convert to the oci-distribution auth type.
    pub(crate) fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Parse a `user:password` credential string.
///
/// An empty string means anonymous access. The password may itself contain
/// colons; only the first one separates it from the user name.
pub fn parse_registry_creds(creds: &str) -> Result<RegistryAuth> {
    if creds.is_empty() {
        return Ok(RegistryAuth::anonymous());
    }
    let (user, password) = creds.split_once(':').ok_or_else(|| {
        WharfError::InvalidArgument(
            "credentials must be in the form user:password".to_string(),
        )
    })?;
    if user.is_empty() {
        return Err(WharfError::InvalidArgument(
            "credentials must include a user name".to_string(),
        ));
    }
    Ok(RegistryAuth::basic(user, password))
}

#[derive(Debug, Default, Deserialize)]
struct AuthFileEntry {
    #[serde(default)]
    auth: String,
}

#[derive(Debug, Default, Deserialize)]
struct AuthFileContent {
    #[serde(default)]
    auths: HashMap<String, AuthFileEntry>,
}

/// Look up credentials for `registry` in a docker-style auth file.
///
/// Returns `Ok(None)` when the file has no entry for the registry.
pub fn auth_from_file(path: &Path, registry: &str) -> Result<Option<RegistryAuth>> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        WharfError::InvalidArgument(format!(
            "failed to read auth file {}: {}",
            path.display(),
            e
        ))
    })?;
    let content: AuthFileContent = serde_json::from_str(&data)?;

    let wanted = normalize_registry(registry);
    let entry = content.auths.iter().find(|(key, _)| {
        let key = key
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let host = key.split('/').next().unwrap_or(key);
        normalize_registry(host) == wanted
    });

    let Some((_, entry)) = entry else {
        return Ok(None);
    };
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(entry.auth.trim())
        .map_err(|e| {
            WharfError::InvalidArgument(format!(
                "invalid auth entry for {} in {}: {}",
                registry,
                path.display(),
                e
            ))
        })?;
    let decoded = String::from_utf8(decoded).map_err(|_| {
        WharfError::InvalidArgument(format!(
            "auth entry for {} in {} is not valid UTF-8",
            registry,
            path.display()
        ))
    })?;
    parse_registry_creds(&decoded).map(Some)
}

/// Resolve credentials: an explicit `user:password` string wins over the auth file.
pub fn resolve_auth(
    creds: &str,
    auth_file: Option<&Path>,
    registry: &str,
) -> Result<RegistryAuth> {
    if !creds.is_empty() {
        return parse_registry_creds(creds);
    }
    match auth_file {
        Some(path) => Ok(auth_from_file(path, registry)?.unwrap_or_default()),
        None => Ok(RegistryAuth::anonymous()),
    }
}

/// Normalize registry names (e.g., "docker.io" and "index.docker.io" → "index.docker.io").
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    if r == "docker.io" || r == "registry-1.docker.io" {
        "index.docker.io".to_string()
    } else {
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_auth_file(dir: &TempDir, registry: &str, user_pass: &str) -> std::path::PathBuf {
        let encoded = base64::engine::general_purpose::STANDARD.encode(user_pass);
        let path = dir.path().join("auth.json");
        let content = serde_json::json!({ "auths": { registry: { "auth": encoded } } });
        std::fs::write(&path, content.to_string()).unwrap();
        path
    }

    #[test]
    fn test_parse_creds() {
        let auth = parse_registry_creds("alice:s3cr:et").unwrap();
        assert_eq!(auth, RegistryAuth::basic("alice", "s3cr:et"));
        assert!(matches!(auth.to_oci_auth(), OciRegistryAuth::Basic(_, _)));
    }

    #[test]
    fn test_parse_creds_empty_is_anonymous() {
        let auth = parse_registry_creds("").unwrap();
        assert!(auth.is_anonymous());
        assert!(matches!(auth.to_oci_auth(), OciRegistryAuth::Anonymous));
    }

    #[test]
    fn test_parse_creds_malformed() {
        assert!(matches!(
            parse_registry_creds("alice"),
            Err(WharfError::InvalidArgument(_))
        ));
        assert!(parse_registry_creds(":pass").is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let auth = RegistryAuth::basic("alice", "hunter2");
        let rendered = format!("{:?}", auth);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_auth_from_file() {
        let dir = TempDir::new().unwrap();
        let path = write_auth_file(&dir, "quay.io", "bob:pw");

        let auth = auth_from_file(&path, "quay.io").unwrap();
        assert_eq!(auth, Some(RegistryAuth::basic("bob", "pw")));
        assert_eq!(auth_from_file(&path, "ghcr.io").unwrap(), None);
    }

    #[test]
    fn test_auth_from_file_docker_hub_alias() {
        let dir = TempDir::new().unwrap();
        let path = write_auth_file(&dir, "https://index.docker.io/v1/", "carol:pw");

        let auth = auth_from_file(&path, "docker.io").unwrap();
        assert_eq!(auth, Some(RegistryAuth::basic("carol", "pw")));
    }

    #[test]
    fn test_auth_from_file_missing() {
        let err = auth_from_file(Path::new("/nonexistent/auth.json"), "quay.io").unwrap_err();
        assert!(matches!(err, WharfError::InvalidArgument(_)));
    }

    #[test]
    fn test_resolve_auth_prefers_creds() {
        let dir = TempDir::new().unwrap();
        let path = write_auth_file(&dir, "quay.io", "bob:pw");

        let auth = resolve_auth("dave:x", Some(&path), "quay.io").unwrap();
        assert_eq!(auth.username(), Some("dave"));

        let auth = resolve_auth("", Some(&path), "quay.io").unwrap();
        assert_eq!(auth.username(), Some("bob"));

        let auth = resolve_auth("", None, "quay.io").unwrap();
        assert!(auth.is_anonymous());
    }
}
