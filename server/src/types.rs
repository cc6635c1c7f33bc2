//! Structures exchanged with clients, in their wire (camelCase) form.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// A locally stored image with its computed attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    pub parent_id: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    /// RFC 3339
    pub created: String,
    pub size: i64,
    /// Size of the image plus its ancestors
    pub virtual_size: i64,
    pub containers: i64,
    pub labels: BTreeMap<String, String>,
    pub is_parent: bool,
}

/// One layer history entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageHistory {
    pub id: String,
    pub created: String,
    pub created_by: String,
    pub tags: Vec<String>,
    pub size: i64,
    pub comment: String,
}

/// One registry search hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSearchResult {
    pub description: String,
    pub is_official: bool,
    pub is_automated: bool,
    pub name: String,
    pub star_count: i64,
}

/// Progress of a streaming call. Partial replies carry only `logs`; the
/// terminal reply also carries the resulting image id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoreResponse {
    /// Output lines, each with its trailing newline
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

/// Resource limits for build RUN steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildOptions {
    pub add_hosts: Vec<String>,
    pub cgroup_parent: String,
    pub cpu_period: i64,
    pub cpu_quota: i64,
    pub cpu_shares: i64,
    pub cpuset_cpus: String,
    pub cpuset_mems: String,
    pub memory: i64,
    pub memory_swap: i64,
    pub shm_size: String,
    pub ulimit: Vec<String>,
    pub volume: Vec<String>,
}

/// Everything a client supplies for a build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildInfo {
    pub additional_tags: Vec<String>,
    pub annotations: Vec<String>,
    pub build_args: HashMap<String, String>,
    pub build_options: BuildOptions,
    pub compression: String,
    /// Context archive (or directory) on the daemon's filesystem
    pub context_dir: String,
    pub dockerfiles: Vec<String>,
    pub label: Vec<String>,
    pub layers: bool,
    pub nocache: bool,
    pub output: String,
    /// `oci` or `docker`
    pub output_format: String,
    pub pull_policy: String,
    pub quiet: bool,
    pub signature_policy_path: String,
    pub squash: bool,
}

/// Run-label request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Runlabel {
    pub authfile: String,
    pub cert_dir: String,
    pub creds: String,
    pub display: bool,
    pub image: String,
    pub label: String,
    pub extra_args: Vec<String>,
    pub name: String,
    pub opts: HashMap<String, String>,
    pub pull: bool,
    pub signature_policy_path: String,
    /// `None` verifies certificates
    pub tls_verify: Option<bool>,
}

/// PushImage parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PushImageParams {
    pub name: String,
    /// Destination; the image name when empty
    pub tag: String,
    pub tls_verify: Option<bool>,
    pub signature_policy: String,
    pub creds: String,
    pub cert_dir: String,
    pub compress: bool,
    /// `oci`, `v2s1`, `v2s2` or `docker`; empty lets the destination choose
    pub format: String,
    pub remove_signatures: bool,
    pub sign_by: String,
}

/// PullImage parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PullImageParams {
    pub name: String,
    pub cert_dir: String,
    pub creds: String,
    pub signature_policy: String,
    pub tls_verify: Option<bool>,
}

/// Commit parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommitParams {
    /// Container name or id
    pub name: String,
    pub image_name: String,
    pub changes: Vec<String>,
    pub author: String,
    pub message: String,
    pub pause: bool,
    pub manifest_type: String,
}

/// ImportImage parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportImageParams {
    /// Tarball path or http(s) URL
    pub source: String,
    pub reference: String,
    pub message: String,
    pub changes: Vec<String>,
    /// Remove the source file after a successful import
    pub delete: bool,
}

/// ExportImage parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportImageParams {
    pub name: String,
    /// Transport-qualified destination
    pub destination: String,
    pub compress: bool,
    pub tags: Vec<String>,
}
