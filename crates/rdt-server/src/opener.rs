use serde::Deserialize;
use std::{env, io, path::Path, process::Stdio};
use tokio::process::Command;
use tracing::{debug, warn};

/// Location requested through the open-source endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSourceRequest {
    pub source: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct OpenSourceQuery {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    line: Option<String>,
    #[serde(default)]
    column: Option<String>,
}

impl OpenSourceQuery {
    /// Missing or non-numeric `line`/`column` read as 0.
    pub(crate) fn into_request(self) -> Option<OpenSourceRequest> {
        let source = self.source.filter(|value| !value.trim().is_empty())?;
        Some(OpenSourceRequest {
            source,
            line: parse_position(self.line.as_deref()),
            column: parse_position(self.column.as_deref()),
        })
    }
}

fn parse_position(value: Option<&str>) -> u32 {
    value
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(0)
}

pub trait SourceOpener: Send + Sync {
    fn open(&self, request: &OpenSourceRequest) -> io::Result<()>;
}

/// Opens the requested file in the developer's editor.
#[derive(Debug, Clone)]
pub struct EditorLauncher {
    editor: String,
}

impl EditorLauncher {
    pub fn new(editor: impl Into<String>) -> Self {
        Self {
            editor: editor.into(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(resolve_editor())
    }

    pub fn editor(&self) -> &str {
        &self.editor
    }

    pub fn args(&self, request: &OpenSourceRequest) -> Vec<String> {
        let program = Path::new(&self.editor)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        match program.as_str() {
            "code" | "code-insiders" | "codium" | "cursor" | "windsurf" => vec![
                "-g".to_string(),
                format!("{}:{}:{}", request.source, request.line, request.column),
            ],
            "vim" | "nvim" | "vi" if request.line > 0 => vec![
                format!("+{}", request.line),
                "--".to_string(),
                request.source.clone(),
            ],
            _ => vec!["--".to_string(), request.source.clone()],
        }
    }
}

/// Editors would parse these as options rather than paths.
fn is_option_like(source: &str) -> bool {
    source.starts_with('-') || source.starts_with('+')
}

impl SourceOpener for EditorLauncher {
    fn open(&self, request: &OpenSourceRequest) -> io::Result<()> {
        if is_option_like(&request.source) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing option-like source {:?}", request.source),
            ));
        }
        let args = self.args(request);
        let mut child = Command::new(&self.editor)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        debug!(event = "editor_spawned", editor = %self.editor, source = %request.source);
        let editor = self.editor.clone();
        tokio::spawn(async move {
            if let Err(err) = child.wait().await {
                warn!(event = "editor_wait_error", editor = %editor, error = %err);
            }
        });
        Ok(())
    }
}

fn resolve_editor() -> String {
    for key in ["RDT_EDITOR", "EDITOR"] {
        if let Ok(value) = env::var(key) {
            if !value.trim().is_empty() {
                return value;
            }
        }
    }
    "code".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(line: u32, column: u32) -> OpenSourceRequest {
        OpenSourceRequest {
            source: "app/root.tsx".to_string(),
            line,
            column,
        }
    }

    #[test]
    fn code_like_editors_jump_to_position() {
        let launcher = EditorLauncher::new("/usr/local/bin/code");
        assert_eq!(
            launcher.args(&request(12, 4)),
            vec!["-g".to_string(), "app/root.tsx:12:4".to_string()]
        );
    }

    #[test]
    fn vim_gets_line_only_and_others_get_path() {
        assert_eq!(
            EditorLauncher::new("nvim").args(&request(3, 1)),
            vec!["+3", "--", "app/root.tsx"]
        );
        assert_eq!(
            EditorLauncher::new("subl").args(&request(3, 1)),
            vec!["--", "app/root.tsx"]
        );
    }

    #[test]
    fn option_like_sources_are_refused() {
        let hostile = OpenSourceRequest {
            source: "+:!touch /tmp/rdt-opened".to_string(),
            line: 3,
            column: 0,
        };
        assert_eq!(
            EditorLauncher::new("vim").args(&hostile),
            vec!["+3", "--", "+:!touch /tmp/rdt-opened"]
        );

        let launcher = EditorLauncher::new("/nonexistent/editor");
        let err = launcher.open(&hostile).expect_err("option-like source");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let dash = OpenSourceRequest {
            source: "--help".to_string(),
            line: 0,
            column: 0,
        };
        let err = launcher.open(&dash).expect_err("dash source");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn query_defaults_positions_to_zero() {
        let query = OpenSourceQuery {
            source: Some("app/root.tsx".to_string()),
            line: None,
            column: Some("abc".to_string()),
        };
        assert_eq!(query.into_request(), Some(request(0, 0)));
        assert_eq!(OpenSourceQuery::default().into_request(), None);
    }
}
