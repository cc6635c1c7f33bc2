//! Dockerfile parser.
//!
//! Parses a Dockerfile into a sequence of build instructions.
//! Supports line continuations (`\`), comments, quoted words and both shell
//! and JSON (exec) forms for RUN/CMD/ENTRYPOINT. The same instruction parser
//! backs the `changes` directives accepted by commit and import.

use wharf_core::error::{Result, WharfError};

/// A single Dockerfile instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `FROM <image> [AS <alias>]`
    From {
        image: String,
        alias: Option<String>,
    },
    /// `RUN <command>`; shell form is wrapped in `/bin/sh -c`
    Run { exec: Vec<String> },
    /// `COPY [--from=<stage>] <src>... <dst>`
    Copy {
        src: Vec<String>,
        dst: String,
        from: Option<String>,
    },
    /// `ADD <src>... <dst>`; local sources only, archives are unpacked
    Add { src: Vec<String>, dst: String },
    /// `WORKDIR <path>`
    Workdir { path: String },
    /// `ENV <key>=<value> ...` or `ENV <key> <value>`
    Env { vars: Vec<(String, String)> },
    /// `ENTRYPOINT ["exec", "form"]` or `ENTRYPOINT command`
    Entrypoint { exec: Vec<String> },
    /// `CMD ["exec", "form"]` or `CMD command`
    Cmd { exec: Vec<String> },
    /// `EXPOSE <port>[/<proto>] ...`
    Expose { ports: Vec<String> },
    /// `LABEL <key>=<value> ...`
    Label { labels: Vec<(String, String)> },
    /// `USER <user>[:<group>]`
    User { user: String },
    /// `VOLUME ["/a", "/b"]` or `VOLUME /a /b`
    Volume { paths: Vec<String> },
    /// `STOPSIGNAL <signal>`
    StopSignal { signal: String },
    /// `ARG <name>[=<default>]`
    Arg {
        name: String,
        default: Option<String>,
    },
    /// Recognized but not executed (SHELL, HEALTHCHECK, ONBUILD, MAINTAINER)
    Ignored { keyword: String, args: String },
}

impl Instruction {
    /// Keyword as written in a Dockerfile.
    pub fn keyword(&self) -> &str {
        match self {
            Instruction::From { .. } => "FROM",
            Instruction::Run { .. } => "RUN",
            Instruction::Copy { .. } => "COPY",
            Instruction::Add { .. } => "ADD",
            Instruction::Workdir { .. } => "WORKDIR",
            Instruction::Env { .. } => "ENV",
            Instruction::Entrypoint { .. } => "ENTRYPOINT",
            Instruction::Cmd { .. } => "CMD",
            Instruction::Expose { .. } => "EXPOSE",
            Instruction::Label { .. } => "LABEL",
            Instruction::User { .. } => "USER",
            Instruction::Volume { .. } => "VOLUME",
            Instruction::StopSignal { .. } => "STOPSIGNAL",
            Instruction::Arg { .. } => "ARG",
            Instruction::Ignored { keyword, .. } => keyword,
        }
    }
}

/// Parsed Dockerfile: a list of instructions in order.
#[derive(Debug, Clone)]
pub struct Dockerfile {
    pub instructions: Vec<Instruction>,
}

impl Dockerfile {
    /// Parse a Dockerfile from its text content.
    pub fn parse(content: &str) -> Result<Self> {
        let logical_lines = join_continuation_lines(content);
        let mut instructions = Vec::new();

        for (line_num, line) in logical_lines.iter().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            instructions.push(parse_instruction(trimmed, line_num + 1)?);
        }

        if instructions.is_empty() {
            return Err(WharfError::BuildError(
                "Dockerfile is empty or contains no instructions".to_string(),
            ));
        }

        let first_non_arg = instructions
            .iter()
            .find(|i| !matches!(i, Instruction::Arg { .. }));
        if !matches!(first_non_arg, Some(Instruction::From { .. })) {
            return Err(WharfError::BuildError(
                "First instruction must be FROM (or ARG before FROM)".to_string(),
            ));
        }

        Ok(Dockerfile { instructions })
    }

    /// Parse several Dockerfiles as one, in order.
    pub fn parse_all(contents: &[String]) -> Result<Self> {
        Self::parse(&contents.join("\n"))
    }

    /// Parse a Dockerfile from a file path.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WharfError::BuildError(format!(
                "Failed to read Dockerfile at {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Number of build stages (FROM instructions).
    pub fn stage_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|i| matches!(i, Instruction::From { .. }))
            .count()
    }
}

/// Join lines ending with `\` into single logical lines.
fn join_continuation_lines(content: &str) -> Vec<String> {
    let mut logical_lines = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if current.is_empty() && line.trim_start().starts_with('#') {
            logical_lines.push(line.to_string());
            continue;
        }
        if let Some(stripped) = line.strip_suffix('\\') {
            current.push_str(stripped.trim_end());
            current.push(' ');
        } else {
            current.push_str(line);
            logical_lines.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        logical_lines.push(current);
    }

    logical_lines
}

/// Parse a single logical line into an Instruction.
pub fn parse_instruction(line: &str, line_num: usize) -> Result<Instruction> {
    let (keyword, rest) = split_first_word(line);
    let keyword_upper = keyword.to_uppercase();

    match keyword_upper.as_str() {
        "FROM" => parse_from(rest, line_num),
        "RUN" => Ok(Instruction::Run {
            exec: parse_command(rest, "RUN", line_num)?,
        }),
        "COPY" => parse_copy(rest, line_num),
        "ADD" => {
            let (src, dst) = parse_src_dst(rest, "ADD", line_num)?;
            Ok(Instruction::Add { src, dst })
        }
        "WORKDIR" => Ok(Instruction::Workdir {
            path: require(rest, "WORKDIR", line_num)?.to_string(),
        }),
        "ENV" => Ok(Instruction::Env {
            vars: parse_key_values(rest, "ENV", line_num)?,
        }),
        "ENTRYPOINT" => Ok(Instruction::Entrypoint {
            exec: parse_command(rest, "ENTRYPOINT", line_num)?,
        }),
        "CMD" => Ok(Instruction::Cmd {
            exec: parse_command(rest, "CMD", line_num)?,
        }),
        "EXPOSE" => Ok(Instruction::Expose {
            ports: split_words(require(rest, "EXPOSE", line_num)?),
        }),
        "LABEL" => Ok(Instruction::Label {
            labels: parse_key_values(rest, "LABEL", line_num)?,
        }),
        "USER" => Ok(Instruction::User {
            user: first_word(require(rest, "USER", line_num)?),
        }),
        "VOLUME" => parse_volume(rest, line_num),
        "STOPSIGNAL" => Ok(Instruction::StopSignal {
            signal: first_word(require(rest, "STOPSIGNAL", line_num)?),
        }),
        "ARG" => parse_arg(rest, line_num),
        "SHELL" | "HEALTHCHECK" | "ONBUILD" | "MAINTAINER" => {
            tracing::warn!(
                line = line_num,
                instruction = keyword_upper.as_str(),
                "Unsupported Dockerfile instruction, skipping"
            );
            Ok(Instruction::Ignored {
                keyword: keyword_upper,
                args: rest.to_string(),
            })
        }
        _ => Err(WharfError::BuildError(format!(
            "Line {}: Unknown instruction '{}'",
            line_num, keyword
        ))),
    }
}

/// Split a string into the first word and the rest.
fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

fn first_word(s: &str) -> String {
    s.split_whitespace().next().unwrap_or(s).to_string()
}

fn require<'a>(rest: &'a str, keyword: &str, line_num: usize) -> Result<&'a str> {
    if rest.trim().is_empty() {
        return Err(WharfError::BuildError(format!(
            "Line {}: {} requires an argument",
            line_num, keyword
        )));
    }
    Ok(rest.trim())
}

// --- Individual instruction parsers ---

fn parse_from(rest: &str, line_num: usize) -> Result<Instruction> {
    let rest = require(rest, "FROM", line_num)?;
    let words = split_words(rest);
    let (image, alias) = match words.as_slice() {
        [image] => (image.clone(), None),
        [image, as_kw, alias] if as_kw.eq_ignore_ascii_case("AS") => {
            (image.clone(), Some(alias.clone()))
        }
        _ => {
            return Err(WharfError::BuildError(format!(
                "Line {}: FROM expects '<image> [AS <name>]'",
                line_num
            )))
        }
    };
    Ok(Instruction::From { image, alias })
}

/// Exec form when the argument is a JSON array, else `/bin/sh -c <rest>`.
fn parse_command(rest: &str, keyword: &str, line_num: usize) -> Result<Vec<String>> {
    let rest = require(rest, keyword, line_num)?;
    if rest.starts_with('[') {
        parse_json_array(rest, line_num)
    } else {
        Ok(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            rest.to_string(),
        ])
    }
}

fn parse_copy(rest: &str, line_num: usize) -> Result<Instruction> {
    let rest = require(rest, "COPY", line_num)?;
    let (from, remaining) = match rest.strip_prefix("--from=") {
        Some(after) => {
            let (stage, remaining) = split_first_word(after);
            (Some(stage.to_string()), remaining)
        }
        None => (None, rest),
    };
    let (src, dst) = parse_src_dst(remaining, "COPY", line_num)?;
    Ok(Instruction::Copy { src, dst, from })
}

fn parse_src_dst(rest: &str, keyword: &str, line_num: usize) -> Result<(Vec<String>, String)> {
    let rest = require(rest, keyword, line_num)?;
    let mut parts = if rest.starts_with('[') {
        parse_json_array(rest, line_num)?
    } else {
        split_words(rest)
    };
    if parts.len() < 2 {
        return Err(WharfError::BuildError(format!(
            "Line {}: {} requires at least one source and a destination",
            line_num, keyword
        )));
    }
    let dst = parts.pop().unwrap_or_default();
    Ok((parts, dst))
}

fn parse_volume(rest: &str, line_num: usize) -> Result<Instruction> {
    let rest = require(rest, "VOLUME", line_num)?;
    let paths = if rest.starts_with('[') {
        parse_json_array(rest, line_num)?
    } else {
        split_words(rest)
    };
    Ok(Instruction::Volume { paths })
}

fn parse_arg(rest: &str, line_num: usize) -> Result<Instruction> {
    let rest = require(rest, "ARG", line_num)?;
    match rest.split_once('=') {
        Some((name, default)) => Ok(Instruction::Arg {
            name: name.trim().to_string(),
            default: Some(unquote(default)),
        }),
        None => Ok(Instruction::Arg {
            name: rest.to_string(),
            default: None,
        }),
    }
}

/// `KEY=VALUE [KEY=VALUE...]`, or the legacy single `KEY VALUE` form.
fn parse_key_values(rest: &str, keyword: &str, line_num: usize) -> Result<Vec<(String, String)>> {
    let rest = require(rest, keyword, line_num)?;
    let (first, after) = split_first_word(rest);
    if !first.contains('=') {
        return Ok(vec![(first.to_string(), unquote(after))]);
    }

    split_words(rest)
        .into_iter()
        .map(|word| match word.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
            _ => Err(WharfError::BuildError(format!(
                "Line {}: {} expects KEY=VALUE pairs, got '{}'",
                line_num, keyword, word
            ))),
        })
        .collect()
}

// --- Helpers ---

/// Parse a JSON array string like `["a", "b", "c"]` into a Vec<String>.
fn parse_json_array(s: &str, line_num: usize) -> Result<Vec<String>> {
    serde_json::from_str(s).map_err(|e| {
        WharfError::BuildError(format!(
            "Line {}: Invalid JSON array '{}': {}",
            line_num, s, e
        ))
    })
}

/// Remove surrounding quotes from a string.
fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// Whitespace split that keeps quoted sections together and drops the quotes.
pub(crate) fn split_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_word = false;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Substitute `$NAME` and `${NAME}` from `args`; unknown names are left as written.
pub fn expand_args(value: &str, args: &std::collections::HashMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, consumed) = if let Some(inner) = after.strip_prefix('{') {
            match inner.find('}') {
                Some(end) => (&inner[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };
        match args.get(name) {
            Some(v) if !name.is_empty() => out.push_str(v),
            _ => {
                out.push('$');
                out.push_str(&after[..consumed]);
            }
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}
