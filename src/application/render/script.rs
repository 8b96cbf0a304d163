use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read render script `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("render script `{path}` is empty")]
    Empty { path: PathBuf },
}

/// The Mermaid bundle inlined into every generated document.
///
/// Loaded once at startup and shared by reference afterwards.
#[derive(Clone)]
pub struct RenderScript(Arc<str>);

impl RenderScript {
    pub fn from_source(source: impl Into<Arc<str>>) -> Self {
        Self(source.into())
    }

    pub async fn load(path: &Path) -> Result<Self, ScriptError> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ScriptError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if source.trim().is_empty() {
            return Err(ScriptError::Empty {
                path: path.to_path_buf(),
            });
        }

        info!(
            target = "application::render::script",
            op = "script::load",
            path = %path.display(),
            bytes = source.len(),
            "Loaded render script"
        );
        Ok(Self(source.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RenderScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderScript")
            .field("bytes", &self.0.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_reads_script_once() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("mermaid.min.js");
        std::fs::write(&path, "window.mermaid = {};").expect("write");

        let script = RenderScript::load(&path).await.expect("loaded");
        let shared = script.clone();
        assert_eq!(shared.as_str(), "window.mermaid = {};");
    }

    #[tokio::test]
    async fn missing_and_empty_scripts_are_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let missing = dir.path().join("absent.js");
        assert!(matches!(
            RenderScript::load(&missing).await,
            Err(ScriptError::Read { .. })
        ));

        let empty = dir.path().join("empty.js");
        std::fs::write(&empty, "  \n").expect("write");
        assert!(matches!(
            RenderScript::load(&empty).await,
            Err(ScriptError::Empty { .. })
        ));
    }
}
