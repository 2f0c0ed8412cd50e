// tests/common/mod.rs — Deterministic collaborators for engine tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use cadloop::core::collaborators::*;
use cadloop::core::orchestrator::{Collaborators, Orchestrator};
use cadloop::core::types::{Feedback, IterationEngineConfig, ProgressEvent};
use cadloop::evaluator::{AchievementVerdict, ConvergenceJudge, ImprovementVerdict};
use cadloop::infra::errors::CadLoopError;
use cadloop::memory;
use cadloop::memory::store::Store;
use cadloop::provider::retry::RetryConfig;

/// Code that makes the fake executor fail at parse stage.
pub const SYNTAX_BREAK: &str = "SYNTAX";
/// Code that makes the fake executor raise at runtime.
pub const RUNTIME_BREAK: &str = "RUNTIME";
/// Code that makes the fake executor hang past the call timeout.
pub const HANG: &str = "HANG";
/// Code the fake executor takes a while over, then runs fine.
pub const SLOW: &str = "SLOW";
/// Code for which the executor itself cannot start.
pub const NO_EXECUTOR: &str = "NOEXEC";
/// Full output the fake executor prints for `RUNTIME_BREAK`.
pub const RUNTIME_TRACE: &str = "Traceback (most recent call last):\n  File \"/w/candidate.py\", line 3, in <module>\n    part = fillet(box.edges(), radius=50)\n  File \"/site-packages/build123d/operations_generic.py\", line 1220, in fillet\nValueError: no edges selected";

pub fn transient(msg: &str) -> CadLoopError {
    CadLoopError::Provider {
        provider: "fake".into(),
        message: msg.into(),
        retriable: true,
    }
}

// ─── Generator ──────────────────────────────────────────────

/// Returns scripted codes in order, then `attempt_<n>()`. Records every request.
#[derive(Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, CadLoopError>>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
    calls: Mutex<u32>,
}

impl ScriptedGenerator {
    pub fn new(codes: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(codes.iter().map(|c| Ok(c.to_string())).collect()),
            ..Default::default()
        })
    }

    pub fn failing(errors: Vec<CadLoopError>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(errors.into_iter().map(Err).collect()),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }

    pub fn request(&self, idx: usize) -> GenerationRequest {
        self.requests.lock().unwrap()[idx].clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CadLoopError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        self.requests.lock().unwrap().push(request.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(next) => next,
            None => Ok(format!("attempt_{n}()")),
        }
    }
}

// ─── Planner ────────────────────────────────────────────────

/// Returns a fixed plan, or fails every call. Counts calls.
pub struct ScriptedPlanner {
    plan: Option<String>,
    calls: Mutex<u32>,
}

impl ScriptedPlanner {
    pub fn new(plan: &str) -> Arc<Self> {
        Arc::new(Self {
            plan: Some(plan.to_string()),
            calls: Mutex::new(0),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            plan: None,
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, _goal: &str) -> Result<String, CadLoopError> {
        *self.calls.lock().unwrap() += 1;
        self.plan.clone().ok_or_else(|| transient("planner overloaded"))
    }
}

// ─── Executor / Renderer / Evaluator ────────────────────────

/// Fails on the marker codes above, succeeds otherwise.
pub struct FakeExecutor;

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(&self, code: &str) -> Result<ExecutionResult, CadLoopError> {
        if code.starts_with(SYNTAX_BREAK) {
            return Ok(Err(ExecutionFailure::new(
                FailureStage::Parse,
                "SyntaxError: invalid syntax",
            )));
        }
        if code.starts_with(RUNTIME_BREAK) {
            return Ok(Err(ExecutionFailure::new(FailureStage::Run, RUNTIME_TRACE)));
        }
        if code.starts_with(NO_EXECUTOR) {
            return Err(CadLoopError::Subprocess {
                command: "python3".into(),
                message: "No such file or directory".into(),
            });
        }
        if code.starts_with(HANG) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if code.starts_with(SLOW) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(Ok(ArtifactHandle::new("/tmp/fake", vec!["/tmp/fake/out.stl".into()])))
    }
}

pub struct StubRenderer;

#[async_trait]
impl Renderer for StubRenderer {
    async fn render(&self, _artifact: &ArtifactHandle) -> Result<Vec<ImageRef>, CadLoopError> {
        Ok(vec![ImageRef::new("/tmp/fake/renders/front.png")])
    }
}

/// Numbered feedback per call: `hits <n>`, `misses <n>`, `suggestions <n>`.
#[derive(Default)]
pub struct NumberedEvaluator {
    calls: Mutex<u32>,
    fail_with: Mutex<Option<CadLoopError>>,
}

impl NumberedEvaluator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call fails with a non-retriable error.
    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            fail_with: Mutex::new(Some(CadLoopError::Provider {
                provider: "fake".into(),
                message: "HTTP 401".into(),
                retriable: false,
            })),
            ..Default::default()
        })
    }
}

#[async_trait]
impl Evaluator for NumberedEvaluator {
    async fn evaluate(&self, _goal: &str, _images: &[ImageRef]) -> Result<Feedback, CadLoopError> {
        if let Some(CadLoopError::Provider {
            provider,
            message,
            retriable,
        }) = &*self.fail_with.lock().unwrap()
        {
            return Err(CadLoopError::Provider {
                provider: provider.clone(),
                message: message.clone(),
                retriable: *retriable,
            });
        }
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        Ok(Feedback::new(
            format!("hits {calls}"),
            format!("misses {calls}"),
            format!("suggestions {calls}"),
        ))
    }
}

// ─── Judge ──────────────────────────────────────────────────

/// Hands out scripted scores in evaluation order; achieved at or above `achieved_at`.
pub struct FixedScoreJudge {
    scores: Mutex<VecDeque<f32>>,
    achieved_at: f32,
    better: bool,
    pub comparisons: Mutex<Vec<(String, String)>>,
}

impl FixedScoreJudge {
    pub fn new(scores: &[f32]) -> Arc<Self> {
        Self::with(scores, 0.9, true)
    }

    pub fn with(scores: &[f32], achieved_at: f32, better: bool) -> Arc<Self> {
        Arc::new(Self {
            scores: Mutex::new(scores.iter().copied().collect()),
            achieved_at,
            better,
            comparisons: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ConvergenceJudge for FixedScoreJudge {
    async fn is_improvement(
        &self,
        _goal: &str,
        old_hits: &str,
        new_hits: &str,
    ) -> Result<ImprovementVerdict, CadLoopError> {
        self.comparisons
            .lock()
            .unwrap()
            .push((old_hits.to_string(), new_hits.to_string()));
        Ok(ImprovementVerdict {
            better: self.better,
            rationale: "scripted".into(),
        })
    }

    async fn is_achieved(
        &self,
        _goal: &str,
        _feedback: &Feedback,
    ) -> Result<AchievementVerdict, CadLoopError> {
        let score = self.scores.lock().unwrap().pop_front().unwrap_or(0.0);
        Ok(AchievementVerdict::new(
            score >= self.achieved_at,
            score,
            format!("scripted {score}"),
        ))
    }
}

// ─── Harness ────────────────────────────────────────────────

pub fn fast_config() -> IterationEngineConfig {
    IterationEngineConfig {
        max_attempts: 5,
        score_threshold: 0.9,
        call_timeout: Duration::from_millis(500),
        retry: RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(5),
            jitter_fraction: 0.0,
        },
        master_after: 2.0 / 3.0,
        lease_ttl: Duration::from_secs(5),
    }
}

pub fn shared_store() -> Arc<Mutex<Store>> {
    Arc::new(Mutex::new(memory::in_memory().unwrap()))
}

pub fn collaborators(
    generator: Arc<dyn Generator>,
    evaluator: Arc<dyn Evaluator>,
    judge: Arc<dyn ConvergenceJudge>,
) -> Collaborators {
    Collaborators {
        generator,
        executor: Arc::new(FakeExecutor),
        renderer: Arc::new(StubRenderer),
        evaluator,
        judge,
        planner: None,
        master: None,
    }
}

/// Orchestrator over the fakes, recording every progress event.
pub fn orchestrator(
    store: Arc<Mutex<Store>>,
    generator: Arc<ScriptedGenerator>,
    judge: Arc<FixedScoreJudge>,
) -> (Orchestrator, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let orch = Orchestrator::new(
        collaborators(generator, NumberedEvaluator::new(), judge),
        store,
        fast_config(),
    )
    .with_progress(move |e| sink.lock().unwrap().push(e));
    (orch, events)
}
