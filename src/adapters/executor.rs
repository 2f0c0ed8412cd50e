// src/adapters/executor.rs — Run candidate scripts in a subprocess
//
// Each attempt gets a fresh directory. The script is written there as
// `candidate.py`, optionally syntax-checked, then run with the directory as
// its cwd so exports land next to it.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::classifier::SCRIPT_NAME;
use crate::core::collaborators::{
    ArtifactHandle, ExecutionFailure, ExecutionResult, Executor, FailureStage,
};
use crate::infra::config::ExecutorConfig;
use crate::infra::errors::CadLoopError;

/// Environment variable pointing the script at its output directory.
pub const OUTPUT_DIR_ENV: &str = "CADLOOP_OUTPUT_DIR";

pub struct ProcessExecutor {
    config: ExecutorConfig,
    /// When set, attempt directories are created here and kept after the run.
    keep_in: Option<PathBuf>,
}

impl ProcessExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            keep_in: None,
        }
    }

    pub fn keep_artifacts_in(mut self, dir: impl Into<PathBuf>) -> Self {
        self.keep_in = Some(dir.into());
        self
    }

    fn attempt_dir(&self) -> Result<tempfile::TempDir, CadLoopError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("attempt-");
        let dir = match &self.keep_in {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    /// Run a command in `cwd` under the executor timeout. `None` means it timed out.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        script: &Path,
        cwd: &Path,
    ) -> Result<Option<Output>, CadLoopError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(script)
            .current_dir(cwd)
            .env(OUTPUT_DIR_ENV, cwd)
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout(), cmd.output()).await {
            Ok(output) => Ok(Some(output.map_err(|e| CadLoopError::Subprocess {
                command: program.to_string(),
                message: e.to_string(),
            })?)),
            Err(_) => Ok(None),
        }
    }

    async fn syntax_check(
        &self,
        script: &Path,
        cwd: &Path,
    ) -> Result<Option<ExecutionFailure>, CadLoopError> {
        let Some((program, args)) = self
            .config
            .syntax_check
            .as_deref()
            .and_then(|cmd| cmd.split_first())
        else {
            return Ok(None);
        };

        let Some(output) = self.run(program, args, script, cwd).await? else {
            return Ok(Some(self.timed_out()));
        };
        if output.status.success() {
            return Ok(None);
        }
        Ok(Some(ExecutionFailure::new(
            FailureStage::Parse,
            combined_output(&output),
        )))
    }

    fn timed_out(&self) -> ExecutionFailure {
        ExecutionFailure::new(
            FailureStage::Timeout {
                seconds: self.config.timeout_seconds,
            },
            "",
        )
    }

    /// Produced files with a known artifact extension, in preference order.
    fn collect_artifacts(&self, dir: &Path) -> Result<Vec<PathBuf>, CadLoopError> {
        let mut found: Vec<(usize, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if let Some(rank) = self
                .config
                .artifact_extensions
                .iter()
                .position(|want| want.eq_ignore_ascii_case(ext))
            {
                found.push((rank, path));
            }
        }
        found.sort();
        Ok(found.into_iter().map(|(_, p)| p).collect())
    }
}

fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (_, true) => stdout.into_owned(),
        (true, false) => stderr.into_owned(),
        (false, false) => format!("{stdout}\n{stderr}"),
    }
}

#[cfg(unix)]
fn killed_by_limit(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    // SIGKILL (OOM killer, ulimit) and SIGXCPU.
    matches!(status.signal(), Some(9) | Some(24))
}

#[cfg(not(unix))]
fn killed_by_limit(_status: &ExitStatus) -> bool {
    false
}

fn failure_stage(output: &Output) -> FailureStage {
    let out_of_memory = String::from_utf8_lossy(&output.stderr).contains("MemoryError");
    if killed_by_limit(&output.status) || out_of_memory {
        FailureStage::ResourceLimit
    } else {
        FailureStage::Unknown
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, code: &str) -> Result<ExecutionResult, CadLoopError> {
        let dir = self.attempt_dir()?;
        let script = dir.path().join(SCRIPT_NAME);
        tokio::fs::write(&script, code).await?;

        if let Some(failure) = self.syntax_check(&script, dir.path()).await? {
            tracing::debug!(dir = %dir.path().display(), "syntax check failed");
            return Ok(Err(failure));
        }

        let Some(output) = self
            .run(&self.config.interpreter, &self.config.args, &script, dir.path())
            .await?
        else {
            tracing::debug!(timeout_s = self.config.timeout_seconds, "candidate timed out");
            return Ok(Err(self.timed_out()));
        };

        if !output.status.success() {
            return Ok(Err(ExecutionFailure::new(
                failure_stage(&output),
                combined_output(&output),
            )));
        }

        let artifacts = self.collect_artifacts(dir.path())?;
        if artifacts.is_empty() {
            return Ok(Err(ExecutionFailure::new(
                FailureStage::Run,
                format!(
                    "script finished without exporting an artifact (expected one of: {})",
                    self.config.artifact_extensions.join(", ")
                ),
            )));
        }
        tracing::debug!(count = artifacts.len(), "candidate produced artifacts");

        if self.keep_in.is_some() {
            let kept = dir.keep();
            let artifacts = artifacts
                .into_iter()
                .filter_map(|p| p.file_name().map(|n| kept.join(n)))
                .collect();
            return Ok(Ok(ArtifactHandle::new(kept, artifacts)));
        }
        Ok(Ok(ArtifactHandle::scratch(dir, artifacts)))
    }
}
