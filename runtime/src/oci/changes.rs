//! Config change directives for commit and import.
//!
//! A change is a single Dockerfile-style instruction (`CMD ["/bin/sh"]`,
//! `ENV A=1`, `EXPOSE 8080`). `KEY=value` is accepted as a spelling of
//! `KEY value`.

use wharf_core::error::{Result, WharfError};

use super::image_config::ImageConfig;
use crate::build::dockerfile::{parse_instruction, Instruction};

const SUPPORTED: &[&str] = &[
    "USER",
    "EXPOSE",
    "ENV",
    "ENTRYPOINT",
    "CMD",
    "VOLUME",
    "WORKDIR",
    "LABEL",
    "STOPSIGNAL",
];

/// Parse change strings into instructions without applying them.
pub fn parse_changes(changes: &[String]) -> Result<Vec<Instruction>> {
    changes
        .iter()
        .filter(|c| !c.trim().is_empty())
        .map(|c| parse_change(c))
        .collect()
}

fn parse_change(change: &str) -> Result<Instruction> {
    let change = change.trim();
    let split_at = change
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(change.len());
    let keyword = change[..split_at].to_uppercase();
    if !SUPPORTED.contains(&keyword.as_str()) {
        return Err(WharfError::InvalidArgument(format!(
            "invalid change {:?}: {} is not one of {}",
            change,
            if keyword.is_empty() { "<empty>" } else { &keyword },
            SUPPORTED.join(", ")
        )));
    }
    let args = change[split_at..].trim_start_matches('=').trim();
    parse_instruction(&format!("{} {}", keyword, args), 1).map_err(|e| {
        WharfError::InvalidArgument(format!("invalid change {:?}: {}", change, e))
    })
}

/// Apply parsed instructions to an image configuration.
pub fn apply_instructions(config: &mut ImageConfig, instructions: &[Instruction]) {
    for instruction in instructions {
        match instruction {
            Instruction::User { user } => config.config.user = Some(user.clone()),
            Instruction::Expose { ports } => {
                for port in ports {
                    config.add_exposed_port(port);
                }
            }
            Instruction::Env { vars } => {
                for (key, value) in vars {
                    config.set_env(key, value);
                }
            }
            Instruction::Entrypoint { exec } => config.config.entrypoint = Some(exec.clone()),
            Instruction::Cmd { exec } => config.config.cmd = Some(exec.clone()),
            Instruction::Volume { paths } => {
                for path in paths {
                    config.add_volume(path);
                }
            }
            Instruction::Workdir { path } => {
                let current = config.config.working_dir.as_deref().unwrap_or("/");
                config.config.working_dir = Some(resolve_path(current, path));
            }
            Instruction::Label { labels } => {
                for (key, value) in labels {
                    config.config.labels.insert(key.clone(), value.clone());
                }
            }
            Instruction::StopSignal { signal } => {
                config.config.stop_signal = Some(signal.clone())
            }
            other => {
                tracing::debug!(instruction = other.keyword(), "Not a config change, skipping");
            }
        }
    }
}

/// Parse and apply change strings in one step.
pub fn apply_changes(config: &mut ImageConfig, changes: &[String]) -> Result<()> {
    let instructions = parse_changes(changes)?;
    apply_instructions(config, &instructions);
    Ok(())
}

/// Resolve `path` against the working directory `base`.
pub fn resolve_path(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}
