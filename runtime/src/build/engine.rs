//! Build engine for constructing OCI images from Dockerfiles.
//!
//! Orchestrates the build process: loads the Dockerfiles, resolves each
//! stage's base image, executes the instructions against a scratch rootfs,
//! turns filesystem changes into layers and stores the final stage.

use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
#[cfg(target_os = "linux")]
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
#[cfg(target_os = "linux")]
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use wharf_core::error::{Result, WharfError};

use super::dockerfile::{expand_args, Dockerfile, Instruction};
use super::layer::{layer_from_changes, DirSnapshot};
use crate::backend::{
    BuildEngine, BuildOptions, ImageBackend, ImageTransport, Progress, PullPolicy,
    ResourceLimits, StoredImage,
};
use crate::oci::archive::unpack_archive;
use crate::oci::changes::{apply_instructions, resolve_path};
use crate::oci::image_config::{History, ImageConfig};
use crate::oci::layout::{copy_dir_recursive, extract_layer, write_layout, LayerBlob, OciLayout};
use crate::oci::manifest::ManifestFormat;

/// Whether a Dockerfile reference points outside the local filesystem.
pub fn is_remote_reference(reference: &str) -> bool {
    reference.starts_with("http://")
        || reference.starts_with("https://")
        || reference.starts_with("git://")
        || reference.starts_with("github.com/")
}

/// Default [`BuildEngine`]: executes Dockerfiles against the local store.
pub struct DockerfileBuilder {
    backend: Arc<dyn ImageBackend>,
    transport: Arc<dyn ImageTransport>,
}

/// Rootfs and image state of one build stage.
struct Stage {
    /// `AS` alias
    name: Option<String>,
    rootfs: PathBuf,
    config: ImageConfig,
    layers: Vec<LayerBlob>,
    /// Layers and history entries inherited from the base image
    base_layers: usize,
    base_history: usize,
    parent: Option<String>,
}

/// Progress sink honoring the quiet flag.
struct StepOutput {
    progress: Progress,
    quiet: bool,
}

impl StepOutput {
    fn line(&mut self, line: &str) {
        if !self.quiet {
            self.always(line);
        }
    }

    fn always(&mut self, line: &str) {
        if let Err(e) = writeln!(self.progress, "{}", line) {
            tracing::debug!(error = %e, "Failed to write build output");
        }
    }
}

impl DockerfileBuilder {
    pub fn new(backend: Arc<dyn ImageBackend>, transport: Arc<dyn ImageTransport>) -> Self {
        Self { backend, transport }
    }

    /// Read every Dockerfile, fetching `http(s)` references.
    async fn load_dockerfiles(&self, entries: &[String]) -> Result<Dockerfile> {
        if entries.is_empty() {
            return Err(WharfError::BuildError("no Dockerfile given".to_string()));
        }
        let mut contents = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.starts_with("http://") || entry.starts_with("https://") {
                contents.push(fetch_text(entry).await?);
            } else if is_remote_reference(entry) {
                return Err(WharfError::BuildError(format!(
                    "building from version control references is not supported: {}",
                    entry
                )));
            } else {
                contents.push(std::fs::read_to_string(entry).map_err(|e| {
                    WharfError::BuildError(format!("Failed to read Dockerfile {}: {}", entry, e))
                })?);
            }
        }
        Dockerfile::parse_all(&contents)
    }

    /// Find or fetch a base image according to the pull policy.
    async fn resolve_base(&self, name: &str, options: &BuildOptions) -> Result<StoredImage> {
        match options.pull_policy {
            PullPolicy::Always => self.transport.pull(name, &options.registry).await,
            PullPolicy::IfMissing => match self.backend.lookup(name).await {
                Ok(image) => Ok(image),
                Err(e) if e.is_image_not_found() => {
                    self.transport.pull(name, &options.registry).await
                }
                Err(e) => Err(e),
            },
            PullPolicy::Never => self.backend.lookup(name).await,
        }
    }

    async fn start_stage(
        &self,
        image: &str,
        alias: Option<String>,
        previous: &[Stage],
        rootfs: PathBuf,
        options: &BuildOptions,
    ) -> Result<Stage> {
        std::fs::create_dir_all(&rootfs).map_err(|e| {
            WharfError::BuildError(format!("Failed to create rootfs directory: {}", e))
        })?;

        if image == "scratch" {
            return Ok(Stage {
                name: alias,
                rootfs,
                config: ImageConfig::for_host(),
                layers: Vec::new(),
                base_layers: 0,
                base_history: 0,
                parent: None,
            });
        }

        if let Some(earlier) = previous.iter().find(|s| s.name.as_deref() == Some(image)) {
            copy_dir_recursive(&earlier.rootfs, &rootfs)?;
            return Ok(Stage {
                name: alias,
                rootfs,
                config: earlier.config.clone(),
                layers: earlier.layers.clone(),
                base_layers: earlier.layers.len(),
                base_history: earlier.config.history.len(),
                parent: earlier.parent.clone(),
            });
        }

        let base = self.resolve_base(image, options).await?;
        let layout = OciLayout::open(&self.backend.layout_path(&base).await?)?;
        let layers = layout.layer_blobs();
        for layer in &layers {
            extract_layer(&layer.path, &rootfs)?;
        }
        tracing::debug!(image, image_id = %base.id, layers = layers.len(), "Prepared base image");

        Ok(Stage {
            name: alias,
            rootfs,
            config: layout.config().clone(),
            base_layers: layers.len(),
            base_history: layout.config().history.len(),
            layers,
            parent: Some(base.id),
        })
    }
}

#[async_trait]
impl BuildEngine for DockerfileBuilder {
    async fn build(&self, options: BuildOptions, progress: Progress) -> Result<String> {
        let dockerfile = self.load_dockerfiles(&options.dockerfiles).await?;
        let mut out = StepOutput {
            progress,
            quiet: options.quiet,
        };

        let work = tempfile::Builder::new()
            .prefix("wharf-build")
            .tempdir()
            .map_err(|e| WharfError::BuildError(format!("Failed to create build directory: {}", e)))?;
        let blobs_dir = work.path().join("blobs");

        if options.resources != ResourceLimits::default() {
            tracing::info!(resources = ?options.resources, "Resource limits requested for RUN steps");
        }
        if !options.annotations.is_empty() {
            tracing::debug!(annotations = ?options.annotations, "Annotations are not recorded on built images");
        }
        if options.layers || options.no_cache {
            tracing::debug!(
                layers = options.layers,
                no_cache = options.no_cache,
                "No build cache; every step is executed"
            );
        }

        let mut args = options.build_args.clone();
        let mut stages: Vec<Stage> = Vec::new();

        for (idx, instruction) in dockerfile.instructions.iter().enumerate() {
            let description = describe(instruction);
            out.line(&format!("STEP {}: {}", idx + 1, description));

            match instruction {
                Instruction::From { image, alias } => {
                    let image = expand_args(image, &args);
                    let rootfs = work.path().join(format!("stage-{}", stages.len()));
                    let stage = self
                        .start_stage(&image, alias.clone(), &stages, rootfs, &options)
                        .await?;
                    stages.push(stage);
                }
                Instruction::Arg { name, default } => {
                    if !args.contains_key(name) {
                        if let Some(value) = default {
                            let value = expand_args(value, &args);
                            args.insert(name.clone(), value);
                        }
                    }
                    if let Some(stage) = stages.last_mut() {
                        stage.config.history.push(History::new(description, true));
                    }
                }
                other => {
                    let (current, previous) = stages.split_last_mut().ok_or_else(|| {
                        WharfError::BuildError(format!("{} before FROM", other.keyword()))
                    })?;
                    let layer = execute(
                        other,
                        current,
                        previous,
                        &args,
                        &options.context_dir,
                        &blobs_dir,
                        &mut out,
                    )
                    .await?;
                    let produced = layer.is_some();
                    if let Some(layer) = layer {
                        current.layers.push(layer);
                    }
                    current
                        .config
                        .history
                        .push(History::new(description, !produced));
                }
            }
        }

        let mut stage = stages
            .pop()
            .ok_or_else(|| WharfError::BuildError("Dockerfile has no stages".to_string()))?;
        if options.squash {
            squash(&mut stage, &blobs_dir)?;
        }
        for label in &options.labels {
            let (key, value) = label.split_once('=').unwrap_or((label.as_str(), ""));
            stage
                .config
                .config
                .labels
                .insert(key.to_string(), value.to_string());
        }
        stage.config.created = Some(Utc::now().to_rfc3339());
        stage.config.rootfs.diff_ids = stage
            .layers
            .iter()
            .map(LayerBlob::prefixed_diff_id)
            .collect();

        let format = options.output_format.unwrap_or(ManifestFormat::Oci);
        let layout_dir = work.path().join("image");
        write_layout(&layout_dir, &stage.config, &stage.layers, format, None)?;

        let mut names = Vec::new();
        if !options.output.is_empty() {
            names.push(options.output.clone());
        }
        names.extend(options.additional_tags.iter().cloned());
        if !options.output.is_empty() {
            out.line(&format!("COMMIT {}", options.output));
        }

        let stored = self
            .backend
            .add_layout(&layout_dir, &names, stage.parent.clone())
            .await?;
        out.line(&format!("--> {}", &stored.id[..stored.id.len().min(12)]));
        out.always(&stored.id);

        tracing::info!(
            image_id = %stored.id,
            names = ?stored.names,
            layers = stage.layers.len(),
            "Build complete"
        );
        Ok(stored.id)
    }
}

/// Execute one non-FROM, non-ARG instruction. Returns the layer it produced.
async fn execute(
    instruction: &Instruction,
    stage: &mut Stage,
    previous: &[Stage],
    args: &HashMap<String, String>,
    context_dir: &Path,
    blobs_dir: &Path,
    out: &mut StepOutput,
) -> Result<Option<LayerBlob>> {
    match instruction {
        Instruction::Run { exec } => run_step(stage, exec, args, blobs_dir, out).await,
        Instruction::Copy { src, dst, from } => {
            let source_root = match from {
                Some(name) => find_stage(previous, name)?.rootfs.clone(),
                None => context_dir.to_path_buf(),
            };
            let before = DirSnapshot::capture(&stage.rootfs)?;
            let dst = expand_args(dst, args);
            let dst = resolve_path(workdir(stage), &dst);
            copy_sources(&source_root, src, &dst, &stage.rootfs, false).await?;
            layer_from_changes(&before, &stage.rootfs, blobs_dir)
        }
        Instruction::Add { src, dst } => {
            let before = DirSnapshot::capture(&stage.rootfs)?;
            let dst = expand_args(dst, args);
            let dst = resolve_path(workdir(stage), &dst);
            copy_sources(context_dir, src, &dst, &stage.rootfs, true).await?;
            layer_from_changes(&before, &stage.rootfs, blobs_dir)
        }
        Instruction::Env { vars } => {
            let vars = vars
                .iter()
                .map(|(k, v)| (k.clone(), expand_args(v, args)))
                .collect();
            apply_instructions(&mut stage.config, &[Instruction::Env { vars }]);
            Ok(None)
        }
        Instruction::Workdir { path } => {
            let path = expand_args(path, args);
            apply_instructions(&mut stage.config, &[Instruction::Workdir { path }]);
            let full = stage.rootfs.join(workdir(stage).trim_start_matches('/'));
            std::fs::create_dir_all(&full).map_err(|e| {
                WharfError::BuildError(format!("Failed to create WORKDIR: {}", e))
            })?;
            Ok(None)
        }
        Instruction::Ignored { keyword, .. } => {
            out.line(&format!("{} is not supported, skipping", keyword));
            Ok(None)
        }
        other => {
            apply_instructions(&mut stage.config, std::slice::from_ref(other));
            Ok(None)
        }
    }
}

fn workdir(stage: &Stage) -> &str {
    stage.config.config.working_dir.as_deref().unwrap_or("/")
}

fn find_stage<'a>(stages: &'a [Stage], name: &str) -> Result<&'a Stage> {
    if let Some(stage) = stages.iter().find(|s| s.name.as_deref() == Some(name)) {
        return Ok(stage);
    }
    name.parse::<usize>()
        .ok()
        .and_then(|i| stages.get(i))
        .ok_or_else(|| WharfError::BuildError(format!("unknown build stage {:?}", name)))
}

/// Copy COPY/ADD sources from `source_root` to `dst` inside `rootfs`.
async fn copy_sources(
    source_root: &Path,
    sources: &[String],
    dst: &str,
    rootfs: &Path,
    add: bool,
) -> Result<()> {
    let target = rootfs.join(dst.trim_start_matches('/'));
    let into_dir = dst.ends_with('/') || sources.len() > 1;
    if into_dir {
        std::fs::create_dir_all(&target).map_err(|e| {
            WharfError::BuildError(format!(
                "Failed to create destination {}: {}",
                target.display(),
                e
            ))
        })?;
    }

    for src in sources {
        if add && (src.starts_with("http://") || src.starts_with("https://")) {
            let file_name = src.rsplit('/').next().filter(|n| !n.is_empty()).unwrap_or("download");
            let file_target = if into_dir || target.is_dir() {
                target.join(file_name)
            } else {
                target.clone()
            };
            let data = fetch_bytes(src).await?;
            if let Some(parent) = file_target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&file_target, data)?;
            continue;
        }

        if Path::new(src).components().any(|c| c == Component::ParentDir) {
            return Err(WharfError::BuildError(format!(
                "source {} is outside the build context",
                src
            )));
        }
        let src_path = source_root.join(src.trim_start_matches('/'));
        if !src_path.exists() {
            return Err(WharfError::BuildError(format!(
                "source not found: {} (in {})",
                src,
                source_root.display()
            )));
        }

        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &target)?;
        } else if add && is_tar_archive(src) {
            unpack_archive(&src_path, &target)?;
        } else {
            let file_target = if into_dir || target.is_dir() {
                let name = src_path.file_name().ok_or_else(|| {
                    WharfError::BuildError(format!("invalid source path {}", src))
                })?;
                target.join(name)
            } else {
                target.clone()
            };
            if let Some(parent) = file_target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&src_path, &file_target).map_err(|e| {
                WharfError::BuildError(format!(
                    "Failed to copy {} to {}: {}",
                    src_path.display(),
                    file_target.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

fn is_tar_archive(name: &str) -> bool {
    [".tar", ".tar.gz", ".tgz"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

/// Collapse every layer added on top of the base into a single layer.
fn squash(stage: &mut Stage, blobs_dir: &Path) -> Result<()> {
    if stage.layers.len() <= stage.base_layers + 1 {
        return Ok(());
    }
    let before = DirSnapshot::from_layers(&stage.layers[..stage.base_layers])?;
    stage.layers.truncate(stage.base_layers);
    for entry in stage.config.history.iter_mut().skip(stage.base_history) {
        entry.empty_layer = true;
    }
    if let Some(layer) = layer_from_changes(&before, &stage.rootfs, blobs_dir)? {
        stage.layers.push(layer);
        stage
            .config
            .history
            .push(History::new("squashed build layers", false));
    }
    Ok(())
}

#[cfg(target_os = "linux")]
async fn run_step(
    stage: &mut Stage,
    exec: &[String],
    args: &HashMap<String, String>,
    blobs_dir: &Path,
    out: &mut StepOutput,
) -> Result<Option<LayerBlob>> {
    let before = DirSnapshot::capture(&stage.rootfs)?;

    let mut cmd = tokio::process::Command::new("chroot");
    cmd.arg(&stage.rootfs)
        .arg("/bin/sh")
        .arg("-c")
        .arg("cd \"$1\" && shift && exec \"$@\"")
        .arg("sh")
        .arg(workdir(stage))
        .args(exec);
    cmd.env_clear();
    cmd.env(
        "PATH",
        "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
    );
    cmd.env("HOME", "/root");
    for (key, value) in args {
        cmd.env(key, value);
    }
    for (key, value) in stage.config.env_pairs() {
        cmd.env(key, value);
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd
        .spawn()
        .map_err(|e| WharfError::BuildError(format!("Failed to execute RUN command: {}", e)))?;
    let stderr_tail = match (child.stdout.take(), child.stderr.take()) {
        (Some(stdout), Some(stderr)) => stream_output(stdout, stderr, out).await,
        _ => Vec::new(),
    };
    let status = child
        .wait()
        .await
        .map_err(|e| WharfError::BuildError(format!("Failed to wait for RUN command: {}", e)))?;
    if !status.success() {
        return Err(WharfError::BuildError(format!(
            "RUN command failed (exit {}): {}",
            status.code().unwrap_or(-1),
            stderr_tail.join("\n")
        )));
    }

    layer_from_changes(&before, &stage.rootfs, blobs_dir)
}

/// Stderr lines kept for the failure message of a RUN step.
#[cfg(target_os = "linux")]
const STDERR_TAIL_LINES: usize = 20;

/// Copy both output streams of a RUN command to `out` line by line as they
/// arrive. Returns the last stderr lines.
#[cfg(target_os = "linux")]
async fn stream_output<O, E>(stdout: O, stderr: E, out: &mut StepOutput) -> Vec<String>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut stdout_reader = BufReader::new(stdout).lines();
    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut tail = VecDeque::new();

    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout_reader.next_line(), if stdout_open => match line {
                Ok(Some(line)) => out.line(&line),
                Ok(None) => stdout_open = false,
                Err(e) => {
                    tracing::debug!(error = %e, "Failed to read RUN stdout");
                    stdout_open = false;
                }
            },
            line = stderr_reader.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    out.line(&line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Ok(None) => stderr_open = false,
                Err(e) => {
                    tracing::debug!(error = %e, "Failed to read RUN stderr");
                    stderr_open = false;
                }
            },
        }
    }
    tail.into()
}

#[cfg(not(target_os = "linux"))]
async fn run_step(
    _stage: &mut Stage,
    exec: &[String],
    _args: &HashMap<String, String>,
    _blobs_dir: &Path,
    _out: &mut StepOutput,
) -> Result<Option<LayerBlob>> {
    Err(WharfError::BuildError(format!(
        "RUN is only supported on Linux hosts: {}",
        exec.join(" ")
    )))
}

async fn fetch_text(url: &str) -> Result<String> {
    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| WharfError::BuildError(format!("Failed to fetch {}: {}", url, e)))?;
    response
        .text()
        .await
        .map_err(|e| WharfError::BuildError(format!("Failed to read {}: {}", url, e)))
}

async fn fetch_bytes(url: &str) -> Result<Vec<u8>> {
    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| WharfError::BuildError(format!("Failed to fetch {}: {}", url, e)))?;
    Ok(response
        .bytes()
        .await
        .map_err(|e| WharfError::BuildError(format!("Failed to read {}: {}", url, e)))?
        .to_vec())
}

/// Dockerfile-style rendering of an instruction for step lines and history.
fn describe(instruction: &Instruction) -> String {
    fn pairs(list: &[(String, String)]) -> String {
        list.iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
    fn exec_form(exec: &[String]) -> String {
        serde_json::to_string(exec).unwrap_or_else(|_| exec.join(" "))
    }

    match instruction {
        Instruction::From { image, alias } => match alias {
            Some(alias) => format!("FROM {} AS {}", image, alias),
            None => format!("FROM {}", image),
        },
        Instruction::Run { exec } => match exec.as_slice() {
            [sh, c, command] if sh == "/bin/sh" && c == "-c" => format!("RUN {}", command),
            _ => format!("RUN {}", exec_form(exec)),
        },
        Instruction::Copy { src, dst, from } => match from {
            Some(from) => format!("COPY --from={} {} {}", from, src.join(" "), dst),
            None => format!("COPY {} {}", src.join(" "), dst),
        },
        Instruction::Add { src, dst } => format!("ADD {} {}", src.join(" "), dst),
        Instruction::Workdir { path } => format!("WORKDIR {}", path),
        Instruction::Env { vars } => format!("ENV {}", pairs(vars)),
        Instruction::Entrypoint { exec } => format!("ENTRYPOINT {}", exec_form(exec)),
        Instruction::Cmd { exec } => format!("CMD {}", exec_form(exec)),
        Instruction::Expose { ports } => format!("EXPOSE {}", ports.join(" ")),
        Instruction::Label { labels } => format!("LABEL {}", pairs(labels)),
        Instruction::User { user } => format!("USER {}", user),
        Instruction::Volume { paths } => format!("VOLUME {}", exec_form(paths)),
        Instruction::StopSignal { signal } => format!("STOPSIGNAL {}", signal),
        Instruction::Arg { name, default } => match default {
            Some(default) => format!("ARG {}={}", name, default),
            None => format!("ARG {}", name),
        },
        Instruction::Ignored { keyword, args } => format!("{} {}", keyword, args),
    }
}
