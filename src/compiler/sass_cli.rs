//! Ruby-style `sass` command line backend.
//!
//! Runs the CLI once per request, reads the CSS and `.map` it wrote, then
//! removes the map (the caller decides whether to persist one). Errors and
//! warnings are recovered from stderr.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use super::protocol::{RawError, RawPos, RenderMessage, WorkerReply};
use super::worker::WorkerFailure;
use crate::config::SourceComments;
use crate::config::options::default_map_path;

// Error: [message]\n on line [line] of [path]
static RUBY_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Error: ([\s\S]*)on line ([0-9]+) of (.*)").unwrap());

// WARNING: [message]\n from line [line] of [path]
static RUBY_WARNING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(WARNING: [\s\S]*)from line ([0-9]+) of (.*)").unwrap());

/// Parse ruby `sass` stderr into an error or warning.
///
/// Unrecognized text becomes an error on `file` at line 0.
pub fn parse_ruby_error(file: &Path, stderr: &str) -> RawError {
    let (captures, kind) = match RUBY_ERROR.captures(stderr) {
        Some(c) => (Some(c), "error"),
        None => (RUBY_WARNING.captures(stderr), "warning"),
    };

    let Some(captures) = captures else {
        return RawError {
            error_string: stderr.to_string(),
            path: file.to_path_buf(),
            pos: Some(RawPos {
                line: Some(0),
                ch: 0,
            }),
            message: stderr.to_string(),
            kind: Some("error".into()),
            ..Default::default()
        };
    };

    let line: i64 = captures[2].parse().unwrap_or(1);
    RawError {
        error_string: stderr.to_string(),
        path: PathBuf::from(captures[3].trim()),
        pos: Some(RawPos {
            line: Some(line - 1),
            ch: 0,
        }),
        message: captures[1].trim().to_string(),
        kind: Some(kind.into()),
        ..Default::default()
    }
}

/// Per-request `sass` CLI runner.
pub struct SassCli {
    command: Vec<String>,
}

impl SassCli {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn build(&self, message: &RenderMessage) -> Result<Command, WorkerFailure> {
        let (program, base_args) = self.command.split_first().ok_or_else(|| WorkerFailure::Spawn {
            command: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty sass command"),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(base_args)
            .arg(&message.file)
            .arg(&message.out_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if message.source_comments != SourceComments::Off {
            cmd.arg("--line-numbers");
        }
        cmd.arg("--style").arg(message.output_style.as_str());

        match &message.compass {
            // config.rb is resolved relative to the project root
            Some(compass) => {
                cmd.arg("--compass").current_dir(&compass.project_root);
            }
            None => {
                for path in &message.include_paths {
                    cmd.arg("--load-path").arg(path);
                }
            }
        }

        Ok(cmd)
    }

    pub async fn render(&self, message: &RenderMessage) -> Result<WorkerReply, WorkerFailure> {
        if let Some(parent) = message.out_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let output = self
            .build(message)?
            .output()
            .await
            .map_err(|source| WorkerFailure::Spawn {
                command: self.command.join(" "),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut error = None;
        if !stderr.trim().is_empty() {
            error = Some(parse_ruby_error(&message.file, &stderr));
        } else if !output.status.success() {
            return Err(WorkerFailure::from_status(output.status));
        }

        if let Some(err) = error.take_if(|e| e.kind.as_deref() == Some("error")) {
            return Ok(WorkerReply::Failure(err));
        }

        let map_file = default_map_path(&message.out_file);
        let css = tokio::fs::read_to_string(&message.out_file).await;
        let map = tokio::fs::read_to_string(&map_file).await;
        let _ = tokio::fs::remove_file(&map_file).await;

        match (css, map) {
            (Ok(css), Ok(map)) => Ok(WorkerReply::Success {
                css,
                map: serde_json::Value::String(map),
                warning: error,
            }),
            (Err(e), _) | (_, Err(e)) => Ok(WorkerReply::Failure(
                error.unwrap_or_else(|| parse_ruby_error(&message.file, &e.to_string())),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error() {
        let stderr = "Error: Undefined variable: \"$color\".\n        on line 12 of /p/scss/_vars.scss\n  Use --trace for backtrace.";
        let err = parse_ruby_error(Path::new("/p/scss/main.scss"), stderr);
        assert_eq!(err.kind.as_deref(), Some("error"));
        assert_eq!(err.path, PathBuf::from("/p/scss/_vars.scss"));
        assert_eq!(err.pos.unwrap().line, Some(11));
        assert_eq!(err.message, "Undefined variable: \"$color\".");
    }

    #[test]
    fn test_parse_warning() {
        let stderr = "WARNING: deprecated syntax\n         from line 3 of /p/a.scss";
        let err = parse_ruby_error(Path::new("/p/main.scss"), stderr);
        assert_eq!(err.kind.as_deref(), Some("warning"));
        assert_eq!(err.pos.unwrap().line, Some(2));
        assert!(err.message.starts_with("WARNING: deprecated syntax"));
    }

    #[test]
    fn test_unrecognized_stderr() {
        let err = parse_ruby_error(Path::new("/p/main.scss"), "sass: command not found");
        assert_eq!(err.path, PathBuf::from("/p/main.scss"));
        assert_eq!(err.pos.unwrap().line, Some(0));
        assert_eq!(err.message, "sass: command not found");
    }
}
