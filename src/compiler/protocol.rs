//! Worker wire protocol.
//!
//! One JSON object per line in each direction.
//!
//! ```text
//! → {"file":..,"outFile":..,"includePaths":[..],"imagePaths":[..],
//!    "outputStyle":"nested","sourceComments":"map","sourceMap":"..",
//!    "_compiler":"libsass","compass":false}
//! ← {"css":"..","map":{..},"error":{..}?}     success (error = warning)
//! ← {"error":{"errorString":..,"path":..,"pos":{"line":..,"ch":..},"message":..}}
//! ← {"exitcode":N}                             worker is exiting
//! ← {"log":".."}                               diagnostic line, ignored
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::config::{Compass, Compiler, OutputStyle, SourceComments, SourceMapTarget};
use crate::diagnostics::{CompileError, ErrorPos, Severity};

// ============================================================================
// Request
// ============================================================================

/// One render request, as sent to the worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderMessage {
    pub file: PathBuf,
    pub out_file: PathBuf,
    pub include_paths: Vec<PathBuf>,
    pub image_paths: Vec<PathBuf>,
    pub output_style: OutputStyle,
    pub source_comments: SourceComments,
    pub source_map: SourceMapTarget,
    #[serde(rename = "_compiler")]
    pub compiler: Compiler,
    #[serde(serialize_with = "compass_or_false")]
    pub compass: Option<Compass>,
}

fn compass_or_false<S: Serializer>(compass: &Option<Compass>, s: S) -> Result<S::Ok, S::Error> {
    match compass {
        Some(compass) => compass.serialize(s),
        None => s.serialize_bool(false),
    }
}

impl RenderMessage {
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

// ============================================================================
// Reply
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPos {
    #[serde(default)]
    pub line: Option<i64>,
    #[serde(default)]
    pub ch: i64,
}

/// Error object as reported by a backend.
///
/// Accepts both the normalized `{path, pos}` form and the libsass-native
/// `{file, line, column}` form (1-based line).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawError {
    pub error_string: String,
    #[serde(alias = "file")]
    pub path: PathBuf,
    pub pos: Option<RawPos>,
    pub line: Option<i64>,
    pub column: Option<i64>,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl RawError {
    fn position(&self) -> ErrorPos {
        let (line, ch) = match (self.pos, self.line) {
            (Some(pos), _) => (pos.line, pos.ch),
            (None, Some(line)) => (Some(line - 1), self.column.unwrap_or(0)),
            (None, None) => (None, 0),
        };
        ErrorPos {
            line: line.and_then(|l| usize::try_from(l).ok()),
            ch: usize::try_from(ch).unwrap_or(0),
        }
    }

    /// Convert into a [`CompileError`]; an empty path falls back to `file`.
    pub fn into_compile_error(self, file: &Path) -> CompileError {
        let pos = self.position();
        let severity = match self.kind.as_deref() {
            Some("warning") => Severity::Warning,
            _ => Severity::Error,
        };
        let message = if self.message.is_empty() {
            self.error_string.clone()
        } else {
            self.message
        };
        let error_string = if self.error_string.is_empty() {
            message.clone()
        } else {
            self.error_string
        };
        let path = if self.path.as_os_str().is_empty() {
            file.to_path_buf()
        } else {
            self.path
        };
        CompileError {
            path,
            pos,
            message,
            severity,
            error_string,
        }
    }
}

/// One decoded worker line.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WireReply {
    pub css: Option<String>,
    pub map: Option<Value>,
    pub error: Option<Value>,
    pub exitcode: Option<i32>,
    pub log: Option<Value>,
}

/// A worker's answer to one [`RenderMessage`].
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReply {
    Success {
        css: String,
        /// Source map, either an object or a string holding JSON.
        map: Value,
        warning: Option<RawError>,
    },
    Failure(RawError),
}

/// What a line from the worker means for the request in flight.
#[derive(Debug)]
pub enum Decoded {
    Reply(WorkerReply),
    Exit(i32),
    /// Log line or anything else not answering the request.
    Skip,
}

/// Decode one worker output line.
pub fn decode_line(line: &str) -> serde_json::Result<Decoded> {
    let wire: WireReply = serde_json::from_str(line)?;

    if let Some(log) = wire.log {
        crate::debug!("queue"; "worker: {}", log);
    }

    if let Some(css) = wire.css {
        let warning = wire.error.map(raw_error_from_value);
        return Ok(Decoded::Reply(WorkerReply::Success {
            css,
            map: wire.map.unwrap_or(Value::Null),
            warning,
        }));
    }
    if let Some(error) = wire.error {
        return Ok(Decoded::Reply(WorkerReply::Failure(raw_error_from_value(error))));
    }
    if let Some(code) = wire.exitcode {
        return Ok(Decoded::Exit(code));
    }
    Ok(Decoded::Skip)
}

/// Errors may arrive as objects or as bare strings (uncaught exceptions).
fn raw_error_from_value(value: Value) -> RawError {
    match value {
        Value::String(text) => RawError {
            error_string: text.clone(),
            message: text,
            ..Default::default()
        },
        other => serde_json::from_value(other.clone()).unwrap_or_else(|_| {
            let text = other.to_string();
            RawError {
                error_string: text.clone(),
                message: text,
                ..Default::default()
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> RenderMessage {
        RenderMessage {
            file: "/p/main.scss".into(),
            out_file: "/p/main.css".into(),
            include_paths: vec!["/p/vendor".into()],
            image_paths: Vec::new(),
            output_style: OutputStyle::Nested,
            source_comments: SourceComments::Map,
            source_map: SourceMapTarget::Path("/p/main.css.map".into()),
            compiler: Compiler::Libsass,
            compass: None,
        }
    }

    #[test]
    fn test_request_shape() {
        let value: Value = serde_json::from_str(&message().to_line().unwrap()).unwrap();
        assert_eq!(value["outFile"], "/p/main.css");
        assert_eq!(value["_compiler"], "libsass");
        assert_eq!(value["compass"], false);
        assert_eq!(value["sourceComments"], "map");
        assert_eq!(value["sourceMap"], "/p/main.css.map");
    }

    #[test]
    fn test_request_with_compass() {
        let mut msg = message();
        msg.compass = Some(Compass {
            project_root: "/p".into(),
        });
        let value: Value = serde_json::from_str(&msg.to_line().unwrap()).unwrap();
        assert_eq!(value["compass"]["projectRoot"], "/p");
    }

    #[test]
    fn test_decode_success_with_warning() {
        let line = r#"{"css":"a{}","map":"{\"sources\":[]}","error":{"type":"warning","message":"deprecated","path":"/p/a.scss","pos":{"line":2,"ch":0}}}"#;
        let Decoded::Reply(WorkerReply::Success { css, warning, .. }) = decode_line(line).unwrap()
        else {
            panic!("expected success");
        };
        assert_eq!(css, "a{}");
        let warning = warning.unwrap().into_compile_error(Path::new("/p/main.scss"));
        assert_eq!(warning.severity, Severity::Warning);
        assert_eq!(warning.pos, ErrorPos::at(2, 0));
    }

    #[test]
    fn test_decode_libsass_native_error() {
        let line = r#"{"error":{"message":"invalid","file":"/p/_a.scss","line":3,"column":7}}"#;
        let Decoded::Reply(WorkerReply::Failure(raw)) = decode_line(line).unwrap() else {
            panic!("expected failure");
        };
        let err = raw.into_compile_error(Path::new("/p/main.scss"));
        assert_eq!(err.path, PathBuf::from("/p/_a.scss"));
        assert_eq!(err.pos, ErrorPos::at(2, 7));
        assert_eq!(err.error_string, "invalid");
    }

    #[test]
    fn test_decode_string_error_and_exit() {
        let Decoded::Reply(WorkerReply::Failure(raw)) =
            decode_line(r#"{"error":"TypeError: x"}"#).unwrap()
        else {
            panic!("expected failure");
        };
        let err = raw.into_compile_error(Path::new("/p/main.scss"));
        assert_eq!(err.path, PathBuf::from("/p/main.scss"));
        assert_eq!(err.pos.line, None);

        assert!(matches!(decode_line(r#"{"exitcode":1}"#).unwrap(), Decoded::Exit(1)));
        assert!(matches!(decode_line(r#"{"log":"hi"}"#).unwrap(), Decoded::Skip));
        assert!(decode_line("garbage").is_err());
    }
}
