// src/core/collaborators.rs — Contracts for the four external collaborators
//
// Every call here is an oracle or a subprocess: slow, fallible, and
// non-deterministic. The orchestrator wraps each one in a timeout and
// bounded retry; implementations only report what happened.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::repair::RepairContext;
use super::types::{ErrorRecord, Feedback};
use crate::infra::errors::CadLoopError;

/// Everything the Generator gets for one attempt.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationRequest {
    pub goal: String,
    /// Session coding plan, when one was drafted.
    pub plan: Option<String>,
    /// Code of the most recent attempt, if any.
    pub prior_code: Option<String>,
    pub prior_error: Option<ErrorRecord>,
    pub prior_feedback: Option<Feedback>,
    pub repair: Option<RepairContext>,
}

impl GenerationRequest {
    pub fn fresh(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Default::default()
        }
    }

    pub fn with_plan(mut self, plan: Option<&str>) -> Self {
        self.plan = plan.map(str::to_string);
        self
    }

    pub fn is_first_attempt(&self) -> bool {
        self.prior_code.is_none()
    }
}

/// Where a successful execution left its output.
///
/// Holds the backing temp dir (when there is one) so artifacts survive until
/// rendering is done with them.
#[derive(Debug, Clone)]
pub struct ArtifactHandle {
    pub workdir: PathBuf,
    pub artifacts: Vec<PathBuf>,
    _scratch: Option<Arc<tempfile::TempDir>>,
}

impl ArtifactHandle {
    pub fn new(workdir: impl Into<PathBuf>, artifacts: Vec<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            artifacts,
            _scratch: None,
        }
    }

    /// Take ownership of a temp dir; it is removed when the last clone drops.
    pub fn scratch(dir: tempfile::TempDir, artifacts: Vec<PathBuf>) -> Self {
        Self {
            workdir: dir.path().to_path_buf(),
            artifacts,
            _scratch: Some(Arc::new(dir)),
        }
    }

    /// The artifact a renderer should load: the first one produced, or the workdir.
    pub fn primary(&self) -> &Path {
        self.artifacts
            .first()
            .map(PathBuf::as_path)
            .unwrap_or(&self.workdir)
    }
}

/// A rendered view of the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub path: PathBuf,
}

impl ImageRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Which phase of execution the candidate died in, as far as the executor knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Parse,
    Run,
    Timeout { seconds: u64 },
    ResourceLimit,
    Unknown,
}

/// Raw failure surface of an execution. Always recoverable: it becomes an
/// ErrorRecord and the loop tries again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub stage: FailureStage,
    /// Raw stderr / traceback.
    pub output: String,
}

impl ExecutionFailure {
    pub fn new(stage: FailureStage, output: impl Into<String>) -> Self {
        Self {
            stage,
            output: output.into(),
        }
    }
}

/// Inner `Err` is a candidate failure; the outer `Result` is for infrastructure.
pub type ExecutionResult = Result<ArtifactHandle, ExecutionFailure>;

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CadLoopError>;
}

/// Drafts the modelling approach once per session, before any code exists.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, goal: &str) -> Result<String, CadLoopError>;
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, code: &str) -> Result<ExecutionResult, CadLoopError>;
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, artifact: &ArtifactHandle) -> Result<Vec<ImageRef>, CadLoopError>;
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, goal: &str, images: &[ImageRef]) -> Result<Feedback, CadLoopError>;
}
