//! Run-label command templates.
//!
//! An image label such as `INSTALL` holds a command template like
//! `docker run --privileged -v /:/host IMAGE /install.sh`. The template is
//! expanded with the image name, a container name and caller options, then
//! executed on the daemon's standard streams.

use std::collections::HashMap;
use std::process::Stdio;

use wharf_core::error::{Result, WharfError};

use crate::build::dockerfile::split_words;
use crate::oci::reference::ImageReference;

/// Environment variable set for commands started from a run label.
pub const NESTED_ENV: &str = "WHARF_RUNLABEL_NESTED";

/// A fully expanded run-label command.
#[derive(Debug, Clone, PartialEq)]
pub struct RunLabelCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Added on top of the daemon's environment
    pub env: Vec<(String, String)>,
}

/// Expand `template` for `image`.
///
/// `name` defaults to the image's base name. `opts` provides `OPT1`..`OPT3`
/// (keys are case-insensitive); other entries are exported as given.
pub fn generate_command(
    template: &str,
    image: &str,
    name: &str,
    opts: &HashMap<String, String>,
    extra_args: &[String],
) -> Result<RunLabelCommand> {
    let name = if name.is_empty() {
        ImageReference::parse(image)?.base_name().to_string()
    } else {
        name.to_string()
    };

    let mut env = Vec::new();
    for key in ["OPT1", "OPT2", "OPT3"] {
        let value = opts
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        env.push((key.to_string(), value));
    }
    let mut others: Vec<(&String, &String)> = opts
        .iter()
        .filter(|(k, _)| !["OPT1", "OPT2", "OPT3"].iter().any(|o| k.eq_ignore_ascii_case(o)))
        .collect();
    others.sort();
    env.extend(others.into_iter().map(|(k, v)| (k.clone(), v.clone())));
    env.push(("IMAGE".to_string(), image.to_string()));
    env.push(("NAME".to_string(), name.clone()));
    env.push((NESTED_ENV.to_string(), "1".to_string()));

    let substituted: Vec<String> = template
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(|token| match token {
            "IMAGE" | "$IMAGE" => image.to_string(),
            "IMAGE=IMAGE" | "IMAGE=$IMAGE" => format!("IMAGE={}", image),
            "NAME" | "$NAME" => name.clone(),
            "NAME=NAME" | "NAME=$NAME" => format!("NAME={}", name),
            other => other.to_string(),
        })
        .collect();

    let pwd = std::env::current_dir()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    let expanded = expand_vars(&substituted.join(" "), &env, &pwd);

    let mut words = split_words(&expanded);
    words.extend(extra_args.iter().cloned());
    if words.is_empty() {
        return Err(WharfError::InvalidArgument(
            "run label expands to an empty command".to_string(),
        ));
    }
    let program = words.remove(0);
    Ok(RunLabelCommand {
        program,
        args: words,
        env,
    })
}

/// Replace `$OPT1`..`$OPT3` and `$PWD` (bare or braced). Other variables are kept.
fn expand_vars(s: &str, env: &[(String, String)], pwd: &str) -> String {
    let lookup = |key: &str| -> Option<String> {
        match key {
            "PWD" => Some(pwd.to_string()),
            "OPT1" | "OPT2" | "OPT3" => env
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    };

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (key, consumed) = match after.strip_prefix('{') {
            Some(inner) => match inner.find('}') {
                Some(end) => (&inner[..end], end + 2),
                None => ("", 0),
            },
            None => {
                let end = after
                    .find(|c: char| !c.is_ascii_alphanumeric())
                    .unwrap_or(after.len());
                (&after[..end], end)
            }
        };
        match lookup(key) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}

/// Run the command with the daemon's stdin, stdout and stderr.
pub async fn execute(command: &RunLabelCommand) -> Result<()> {
    tracing::info!(program = %command.program, args = ?command.args, "Running label command");
    let status = tokio::process::Command::new(&command.program)
        .args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| {
            WharfError::ExecError(format!("failed to start {}: {}", command.program, e))
        })?;
    if !status.success() {
        return Err(WharfError::ExecError(format!(
            "{} exited with {}",
            command.program,
            status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "a signal".to_string())
        )));
    }
    Ok(())
}
