// src/core/orchestrator.rs — Iteration engine

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::classifier::classify;
use super::collaborators::{
    ArtifactHandle, Evaluator, ExecutionFailure, ExecutionResult, Executor, FailureStage,
    GenerationRequest, Generator, ImageRef, Planner, Renderer,
};
use super::replay::{replay, LoopState};
use super::types::*;
use crate::evaluator::{AchievementVerdict, ConvergenceJudge};
use crate::infra::errors::CadLoopError;
use crate::memory::lease::SessionLease;
use crate::memory::store::Store;
use crate::provider::retry::{retry_with_backoff, RetryExhausted};

/// Cooperative cancellation, checked between states.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The four collaborators plus the convergence judge.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn Generator>,
    pub executor: Arc<dyn Executor>,
    pub renderer: Arc<dyn Renderer>,
    pub evaluator: Arc<dyn Evaluator>,
    pub judge: Arc<dyn ConvergenceJudge>,
    /// Drafts the session's coding plan. Sessions run unplanned without one.
    pub planner: Option<Arc<dyn Planner>>,
    /// Takes over generation for the last stretch of the budget.
    pub master: Option<Arc<dyn Generator>>,
}

/// Drives sessions through generate → execute → render → evaluate until the
/// goal is met or the attempt budget runs out.
pub struct Orchestrator {
    collaborators: Collaborators,
    store: Arc<Mutex<Store>>,
    config: IterationEngineConfig,
    cancel: CancelToken,
    /// Optional callback for real-time progress events.
    on_progress: Option<Box<dyn Fn(ProgressEvent) + Send + Sync>>,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        store: Arc<Mutex<Store>>,
        config: IterationEngineConfig,
    ) -> Self {
        Self {
            collaborators,
            store,
            config,
            cancel: CancelToken::new(),
            on_progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Set a callback for real-time progress events.
    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    pub fn config(&self) -> &IterationEngineConfig {
        &self.config
    }

    /// Fire a progress event if a callback is set.
    fn emit(&self, event: ProgressEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    fn with_store<T>(
        &self,
        f: impl FnOnce(&Store) -> Result<T, CadLoopError>,
    ) -> Result<T, CadLoopError> {
        let store = self
            .store
            .lock()
            .map_err(|_| CadLoopError::Other(anyhow::anyhow!("store mutex poisoned")))?;
        f(&store)
    }

    fn check_cancelled(&self, session_id: &str) -> Result<(), CadLoopError> {
        if self.cancel.is_cancelled() {
            info!(session_id, "session cancelled");
            return Err(CadLoopError::Cancelled {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    /// State boundary: stop if cancelled, otherwise keep the lease alive.
    fn checkpoint(&self, lease: &SessionLease) -> Result<(), CadLoopError> {
        self.check_cancelled(lease.session_id())?;
        lease.renew()
    }

    /// Start a new session for `goal` and drive it to a terminal outcome.
    pub async fn run_session(
        &self,
        goal: &str,
        max_attempts: u32,
        score_threshold: f32,
        parent_session_id: Option<&str>,
    ) -> Result<SessionResult, CadLoopError> {
        let session_id = self.with_store(|s| s.create_session(goal, parent_session_id))?;
        info!(session_id = %session_id, parent = ?parent_session_id, "session created");
        self.drive(&session_id, max_attempts, score_threshold).await
    }

    /// Replay a persisted session and continue from attempt N+1.
    pub async fn resume_session(
        &self,
        session_id: &str,
        max_attempts: u32,
        score_threshold: f32,
    ) -> Result<SessionResult, CadLoopError> {
        self.with_store(|s| s.get_session(session_id))?;
        self.drive(session_id, max_attempts, score_threshold).await
    }

    /// A revised goal is a new child session of the one it revises.
    pub async fn branch_session(
        &self,
        parent_session_id: &str,
        goal: &str,
        max_attempts: u32,
        score_threshold: f32,
    ) -> Result<SessionResult, CadLoopError> {
        self.run_session(goal, max_attempts, score_threshold, Some(parent_session_id))
            .await
    }

    async fn drive(
        &self,
        session_id: &str,
        max_attempts: u32,
        score_threshold: f32,
    ) -> Result<SessionResult, CadLoopError> {
        let lease = SessionLease::acquire(self.store.clone(), session_id, self.config.lease_ttl)?;

        // Init
        let history = self.with_store(|s| s.history(session_id))?;
        let goal = history.session.design_goal.clone();
        let mut state = replay(&history, score_threshold);
        debug!(
            session_id,
            attempts = state.attempts,
            best = ?state.best_score(),
            "replayed history"
        );
        self.emit(ProgressEvent::SessionStart {
            session_id: session_id.to_string(),
            resumed_attempts: state.attempts,
            max_attempts,
        });

        // Planning, only ahead of the first attempt
        let plan = match history.session.coding_plan {
            Some(plan) => Some(plan),
            None if state.attempts == 0 => self.draft_plan(session_id, &goal).await?,
            None => None,
        };

        loop {
            if state.converged.is_some() {
                return self.finish(session_id, &state, Outcome::Converged);
            }
            if !state.budget_left(max_attempts) {
                return self.finish(session_id, &state, Outcome::Exhausted);
            }
            self.checkpoint(&lease)?;

            let attempt = state.attempts + 1;
            self.emit(ProgressEvent::AttemptStart {
                attempt,
                max_attempts,
            });
            let generator = self.generator_for(&state, max_attempts);
            let request = state.generation_request(&goal).with_plan(plan.as_deref());
            let record = self.attempt(&lease, generator, &request, attempt).await?;

            let previous_base = state.base.clone();
            state.observe(&record, score_threshold);
            let retrying = state.converged.is_none() && state.budget_left(max_attempts);

            if let Some(score) = record.iteration.score() {
                let mut improved = previous_base.is_none();
                if retrying {
                    if let Some(base) = previous_base {
                        improved = self.judge_improvement(&goal, &base, &record.iteration).await;
                        state.base = Some(if improved {
                            record.iteration.clone()
                        } else {
                            base
                        });
                    }
                }
                self.emit(ProgressEvent::Evaluated {
                    attempt,
                    score,
                    best_score: state.best_score(),
                    improved,
                });
            }
            if retrying {
                self.emit(ProgressEvent::StateChange {
                    attempt,
                    state: EngineState::Retry,
                });
            }
        }
    }

    /// Planning: draft and persist the coding plan. A planner that stays
    /// unavailable leaves the session unplanned rather than failing it.
    async fn draft_plan(
        &self,
        session_id: &str,
        goal: &str,
    ) -> Result<Option<String>, CadLoopError> {
        let Some(planner) = &self.collaborators.planner else {
            return Ok(None);
        };
        self.emit(ProgressEvent::StateChange {
            attempt: 0,
            state: EngineState::Planning,
        });
        match self.call("plan", || planner.plan(goal)).await {
            Ok(plan) => {
                self.with_store(|s| s.set_coding_plan(session_id, &plan))?;
                debug!(session_id, "coding plan drafted");
                Ok(Some(plan))
            }
            Err(e) => {
                warn!(
                    session_id,
                    attempts = e.attempts,
                    "planner unavailable, continuing without a coding plan: {}",
                    e.last_error
                );
                Ok(None)
            }
        }
    }

    /// The master generator, once the budget is far enough along, else the regular one.
    fn generator_for(&self, state: &LoopState, max_attempts: u32) -> &Arc<dyn Generator> {
        match &self.collaborators.master {
            Some(master) if state.escalated(max_attempts, self.config.master_after) => {
                debug!(attempt = state.attempts + 1, "generating with master model");
                master
            }
            _ => &self.collaborators.generator,
        }
    }

    /// One pass Generating → Executing → (ExecFailed | Rendering → Evaluating).
    /// Returns what was committed for this attempt.
    async fn attempt(
        &self,
        lease: &SessionLease,
        generator: &Arc<dyn Generator>,
        request: &GenerationRequest,
        attempt: u32,
    ) -> Result<IterationRecord, CadLoopError> {
        let session_id = lease.session_id();
        let goal = request.goal.as_str();
        let state_change = |next: EngineState| {
            self.emit(ProgressEvent::StateChange {
                attempt,
                state: next,
            })
        };

        // Generating
        state_change(EngineState::Generating);
        let code = self
            .call("generate", || generator.generate(request))
            .await
            .map_err(|e| CadLoopError::GenerationFailed {
                attempts: e.attempts,
                message: e.last_error.to_string(),
            })?;
        self.checkpoint(lease)?;

        let iteration_id = self.with_store(|s| s.append_iteration(session_id, &code))?;
        let iteration = self.with_store(|s| s.get_iteration(&iteration_id))?;
        debug!(session_id, attempt, iteration_id = %iteration_id, "iteration persisted");

        // Executing
        state_change(EngineState::Executing);
        let artifact = match self.execute(&code).await? {
            Ok(artifact) => artifact,
            Err(failure) => {
                state_change(EngineState::ExecFailed);
                let classified = classify(&failure);
                let errors = self.with_store(|s| {
                    s.record_error(
                        &iteration_id,
                        classified.kind,
                        &classified.message,
                        classified.line,
                        classified.trace.as_deref(),
                    )?;
                    s.list_errors(&iteration_id)
                })?;
                info!(
                    session_id,
                    attempt,
                    kind = %classified.kind,
                    line = ?classified.line,
                    "execution failed: {}",
                    classified.message
                );
                self.emit(ProgressEvent::ExecutionFailed {
                    attempt,
                    kind: classified.kind,
                    line: classified.line,
                });
                return Ok(IterationRecord { iteration, errors });
            }
        };
        self.checkpoint(lease)?;

        // Rendering
        state_change(EngineState::Rendering);
        let images = self.render(&artifact).await?;
        self.checkpoint(lease)?;

        // Evaluating
        state_change(EngineState::Evaluating);
        let feedback = self.evaluate(goal, &images).await?;
        let verdict = self.judge_achievement(goal, &feedback).await?;
        let feedback = feedback.with_verdict(verdict.achieved, verdict.score, verdict.rationale);
        self.with_store(|s| s.attach_feedback(&iteration_id, &feedback))?;
        info!(
            session_id,
            attempt,
            score = feedback.score.unwrap_or(0.0),
            achieved = verdict.achieved,
            "attempt evaluated"
        );

        Ok(IterationRecord {
            iteration: Iteration {
                feedback: Some(feedback),
                ..iteration
            },
            errors: Vec::new(),
        })
    }

    /// Run a collaborator call under the call timeout with bounded retry.
    async fn call<T, F, Fut>(&self, step: &str, mut op: F) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CadLoopError>>,
    {
        let timeout = self.config.call_timeout;
        retry_with_backoff(&self.config.retry, step, |_| {
            let fut = op();
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(CadLoopError::Timeout {
                        step: step.to_string(),
                        seconds: timeout.as_secs(),
                    }),
                }
            }
        })
        .await
    }

    /// A hung executor is the candidate's fault: it becomes a runtime failure.
    async fn execute(&self, code: &str) -> Result<ExecutionResult, CadLoopError> {
        let timeout = self.config.call_timeout;
        retry_with_backoff(&self.config.retry, "execute", |_| async move {
            match tokio::time::timeout(timeout, self.collaborators.executor.execute(code)).await {
                Ok(result) => result,
                Err(_) => Ok(Err(ExecutionFailure::new(
                    FailureStage::Timeout {
                        seconds: timeout.as_secs(),
                    },
                    "",
                ))),
            }
        })
        .await
        .map_err(|e| CadLoopError::ExecutionUnavailable {
            attempts: e.attempts,
            message: e.last_error.to_string(),
        })
    }

    async fn render(&self, artifact: &ArtifactHandle) -> Result<Vec<ImageRef>, CadLoopError> {
        self.call("render", || self.collaborators.renderer.render(artifact))
            .await
            .map_err(|e| evaluation_failed("render", e))
    }

    async fn evaluate(&self, goal: &str, images: &[ImageRef]) -> Result<Feedback, CadLoopError> {
        self.call("evaluate", || self.collaborators.evaluator.evaluate(goal, images))
            .await
            .map_err(|e| evaluation_failed("evaluate", e))
    }

    async fn judge_achievement(
        &self,
        goal: &str,
        feedback: &Feedback,
    ) -> Result<AchievementVerdict, CadLoopError> {
        self.call("judge", || self.collaborators.judge.is_achieved(goal, feedback))
            .await
            .map_err(|e| evaluation_failed("judge", e))
    }

    /// Advisory: an unavailable judge keeps the current base.
    async fn judge_improvement(&self, goal: &str, base: &Iteration, candidate: &Iteration) -> bool {
        let (Some(old), Some(new)) = (&base.feedback, &candidate.feedback) else {
            return false;
        };
        match self
            .call("compare", || {
                self.collaborators
                    .judge
                    .is_improvement(goal, &old.hits, &new.hits)
            })
            .await
        {
            Ok(verdict) => {
                debug!(better = verdict.better, rationale = %verdict.rationale, "improvement verdict");
                verdict.better
            }
            Err(e) => {
                warn!(
                    attempts = e.attempts,
                    "improvement judgment unavailable, keeping refinement base: {}",
                    e.last_error
                );
                false
            }
        }
    }

    fn finish(
        &self,
        session_id: &str,
        state: &LoopState,
        outcome: Outcome,
    ) -> Result<SessionResult, CadLoopError> {
        let history = self.with_store(|s| s.history(session_id))?;
        let best = match outcome {
            Outcome::Converged => state.converged.clone().map(|iteration| BestCandidate {
                score: iteration.score(),
                iteration,
            }),
            Outcome::Exhausted => state.best_candidate(),
        };
        let best_score = best.as_ref().and_then(|b| b.score);

        let warning = match outcome {
            Outcome::Converged => None,
            Outcome::Exhausted => Some(match best_score {
                Some(score) => format!(
                    "attempt budget exhausted after {} attempt(s); best score {score:.2} may not meet the goal",
                    state.attempts
                ),
                None => format!(
                    "attempt budget exhausted after {} attempt(s); no attempt was evaluated",
                    state.attempts
                ),
            }),
        };
        if let Some(ref w) = warning {
            warn!(session_id, "{w}");
        } else {
            info!(session_id, attempts = state.attempts, "session converged");
        }

        self.emit(ProgressEvent::StateChange {
            attempt: state.attempts,
            state: match outcome {
                Outcome::Converged => EngineState::Converged,
                Outcome::Exhausted => EngineState::Exhausted,
            },
        });
        self.emit(ProgressEvent::Complete {
            outcome,
            attempts: state.attempts,
            best_score,
        });

        Ok(SessionResult {
            session_id: session_id.to_string(),
            outcome,
            best,
            history,
            warning,
        })
    }
}

fn evaluation_failed(step: &str, e: RetryExhausted) -> CadLoopError {
    CadLoopError::EvaluationFailed {
        step: step.to_string(),
        attempts: e.attempts,
        message: e.last_error.to_string(),
    }
}
