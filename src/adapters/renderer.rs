// src/adapters/renderer.rs — Snapshot artifacts with an external command

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::collaborators::{ArtifactHandle, ImageRef, Renderer};
use crate::infra::config::RendererConfig;
use crate::infra::errors::CadLoopError;

/// Subdirectory of the attempt dir that receives the snapshots.
const RENDER_DIR: &str = "renders";

pub struct ProcessRenderer {
    config: RendererConfig,
}

impl ProcessRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    fn args(&self, artifact: &Path, output_dir: &Path) -> Vec<String> {
        let artifact = artifact.to_string_lossy();
        let output_dir = output_dir.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|a| {
                a.replace("{artifact}", &artifact)
                    .replace("{output_dir}", &output_dir)
            })
            .collect()
    }

    fn failure(&self, message: impl Into<String>) -> CadLoopError {
        CadLoopError::Subprocess {
            command: self.config.command.clone(),
            message: message.into(),
        }
    }

    fn collect_images(&self, output_dir: &Path) -> Result<Vec<PathBuf>, CadLoopError> {
        let pattern = output_dir.join(&self.config.image_glob);
        let pattern = pattern.to_string_lossy();
        let mut images: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| CadLoopError::Config(format!("renderer.image_glob: {e}")))?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .collect();
        images.sort();
        Ok(images)
    }
}

#[async_trait]
impl Renderer for ProcessRenderer {
    async fn render(&self, artifact: &ArtifactHandle) -> Result<Vec<ImageRef>, CadLoopError> {
        let output_dir = artifact.workdir.join(RENDER_DIR);
        tokio::fs::create_dir_all(&output_dir).await?;

        let output = Command::new(&self.config.command)
            .args(self.args(artifact.primary(), &output_dir))
            .current_dir(&artifact.workdir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.failure(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failure(format!("{}: {}", output.status, stderr.trim())));
        }

        let images = self.collect_images(&output_dir)?;
        if images.is_empty() {
            return Err(self.failure(format!(
                "no images matching '{}' in {}",
                self.config.image_glob,
                output_dir.display()
            )));
        }
        tracing::debug!(count = images.len(), "rendered snapshots");
        Ok(images.into_iter().map(ImageRef::new).collect())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn renderer(script: &str) -> ProcessRenderer {
        ProcessRenderer::new(RendererConfig {
            command: "sh".into(),
            args: vec![
                "-c".into(),
                script.into(),
                "sh".into(),
                "{artifact}".into(),
                "{output_dir}".into(),
            ],
            image_glob: "*.png".into(),
        })
    }

    fn artifact() -> (tempfile::TempDir, ArtifactHandle) {
        let dir = tempfile::tempdir().unwrap();
        let stl = dir.path().join("model.stl");
        std::fs::write(&stl, "solid").unwrap();
        let handle = ArtifactHandle::new(dir.path(), vec![stl]);
        (dir, handle)
    }

    #[test]
    fn test_placeholders_substituted() {
        let r = ProcessRenderer::new(RendererConfig::default());
        let args = r.args(Path::new("/w/a.stl"), Path::new("/w/renders"));
        assert_eq!(args, vec!["/w/a.stl", "/w/renders"]);
    }

    #[tokio::test]
    async fn test_render_globs_images_sorted() {
        let (_dir, handle) = artifact();
        let images = renderer("test -f \"$1\" && touch \"$2/b.png\" \"$2/a.png\" \"$2/x.txt\"")
            .render(&handle)
            .await
            .unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|i| i.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[tokio::test]
    async fn test_render_without_images_fails() {
        let (_dir, handle) = artifact();
        let err = renderer("true").render(&handle).await.unwrap_err();
        assert!(matches!(err, CadLoopError::Subprocess { .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_render_command_failure() {
        let (_dir, handle) = artifact();
        let err = renderer("echo broken >&2; exit 3").render(&handle).await.unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
