// src/core/types.rs — Core domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::provider::retry::RetryConfig;

/// One design task: an immutable goal and an optional parent for goal lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub design_goal: String,
    pub parent_session_id: Option<String>,
    /// Drafted before the first attempt and handed to every generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coding_plan: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One attempt within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    pub id: String,
    pub session_id: String,
    /// 1-based attempt index within the session.
    pub seq: u32,
    pub code: String,
    pub feedback: Option<Feedback>,
    pub created_at: DateTime<Utc>,
}

impl Iteration {
    pub fn score(&self) -> Option<f32> {
        self.feedback.as_ref().and_then(|f| f.score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Failed before any execution semantics ran.
    Syntax,
    /// Parsed, then failed while running (exceptions, timeouts, limits).
    Runtime,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::Runtime => "runtime",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "syntax" => Some(ErrorKind::Syntax),
            "runtime" => Some(ErrorKind::Runtime),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified execution failure attached to an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub iteration_id: String,
    pub error_type: ErrorKind,
    pub error_message: String,
    pub error_line: Option<u32>,
    /// Raw interpreter output the message was summarized from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Structured evaluator output, normalized once at the evaluator boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub hits: String,
    pub misses: String,
    pub suggestions: String,
    /// Normalized goal-alignment score in [0, 1] from the achievement judgment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub achieved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl Feedback {
    pub fn new(
        hits: impl Into<String>,
        misses: impl Into<String>,
        suggestions: impl Into<String>,
    ) -> Self {
        Self {
            hits: hits.into(),
            misses: misses.into(),
            suggestions: suggestions.into(),
            ..Default::default()
        }
    }

    pub fn with_verdict(mut self, achieved: bool, score: f32, rationale: impl Into<String>) -> Self {
        self.achieved = Some(achieved);
        self.score = Some(score.clamp(0.0, 1.0));
        self.rationale = Some(rationale.into());
        self
    }
}

/// An iteration together with its error records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: Iteration,
    pub errors: Vec<ErrorRecord>,
}

impl IterationRecord {
    pub fn failed(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Session + all iterations + all errors, assembled for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHistory {
    pub session: Session,
    pub iterations: Vec<IterationRecord>,
}

impl SessionHistory {
    pub fn attempts(&self) -> u32 {
        self.iterations.len() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Converged,
    Exhausted,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Converged => write!(f, "converged"),
            Outcome::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// The candidate the engine would hand back right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestCandidate {
    pub iteration: Iteration,
    /// `None` when no attempt was ever scored and this is the most recent fallback.
    pub score: Option<f32>,
}

/// Final result of `run_session` / `resume_session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: String,
    pub outcome: Outcome,
    pub best: Option<BestCandidate>,
    pub history: SessionHistory,
    /// Set when the session ended without meeting the goal.
    pub warning: Option<String>,
}

/// States of the per-session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Init,
    /// Drafting the coding plan before the first attempt.
    Planning,
    Generating,
    Executing,
    ExecFailed,
    Rendering,
    Evaluating,
    Retry,
    Converged,
    Exhausted,
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Converged | EngineState::Exhausted)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineState::Init => "init",
            EngineState::Planning => "planning",
            EngineState::Generating => "generating",
            EngineState::Executing => "executing",
            EngineState::ExecFailed => "exec_failed",
            EngineState::Rendering => "rendering",
            EngineState::Evaluating => "evaluating",
            EngineState::Retry => "retry",
            EngineState::Converged => "converged",
            EngineState::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// Configuration for the iteration engine.
#[derive(Debug, Clone)]
pub struct IterationEngineConfig {
    pub max_attempts: u32,
    pub score_threshold: f32,
    pub call_timeout: Duration,
    pub retry: RetryConfig,
    /// Share of the attempt budget after which the master generator takes over.
    pub master_after: f32,
    /// How long a session lease outlives its last heartbeat.
    pub lease_ttl: Duration,
}

impl Default for IterationEngineConfig {
    fn default() -> Self {
        let call_timeout = Duration::from_secs(300);
        let retry = RetryConfig::default();
        Self {
            max_attempts: 5,
            score_threshold: 0.8,
            lease_ttl: lease_ttl_for(call_timeout, &retry),
            call_timeout,
            retry,
            master_after: 2.0 / 3.0,
        }
    }
}

impl From<&crate::infra::config::Config> for IterationEngineConfig {
    fn from(cfg: &crate::infra::config::Config) -> Self {
        let call_timeout = Duration::from_secs(cfg.iteration.call_timeout_seconds);
        let retry = RetryConfig::from(&cfg.retry);
        Self {
            max_attempts: cfg.iteration.max_attempts,
            score_threshold: cfg.iteration.score_threshold,
            lease_ttl: lease_ttl_for(call_timeout, &retry),
            call_timeout,
            retry,
            master_after: cfg.iteration.master_after,
        }
    }
}

/// Heartbeats happen between states; the longest stretch without one is
/// render, evaluate, judge and compare back to back, each retried in full.
pub fn lease_ttl_for(call_timeout: Duration, retry: &RetryConfig) -> Duration {
    let per_call = call_timeout * (retry.max_retries + 1) + retry.max_delay * retry.max_retries;
    per_call * 4
}

/// Events emitted during a session for real-time progress display.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    SessionStart {
        session_id: String,
        resumed_attempts: u32,
        max_attempts: u32,
    },
    AttemptStart {
        attempt: u32,
        max_attempts: u32,
    },
    StateChange {
        attempt: u32,
        state: EngineState,
    },
    ExecutionFailed {
        attempt: u32,
        kind: ErrorKind,
        line: Option<u32>,
    },
    Evaluated {
        attempt: u32,
        score: f32,
        best_score: Option<f32>,
        improved: bool,
    },
    Complete {
        outcome: Outcome,
        attempts: u32,
        best_score: Option<f32>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iteration(score: Option<f32>) -> Iteration {
        Iteration {
            id: "it-1".into(),
            session_id: "s-1".into(),
            seq: 1,
            code: "box(1, 1, 1)".into(),
            feedback: score.map(|s| Feedback::new("h", "m", "s").with_verdict(false, s, "r")),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_error_kind_roundtrip_str() {
        assert_eq!(ErrorKind::parse("syntax"), Some(ErrorKind::Syntax));
        assert_eq!(ErrorKind::parse("runtime"), Some(ErrorKind::Runtime));
        assert_eq!(ErrorKind::parse("fatal"), None);
        assert_eq!(ErrorKind::Runtime.to_string(), "runtime");
    }

    #[test]
    fn test_iteration_score() {
        assert_eq!(iteration(None).score(), None);
        assert_eq!(iteration(Some(0.6)).score(), Some(0.6));
    }

    #[test]
    fn test_feedback_verdict_clamps_score() {
        let f = Feedback::new("a", "b", "c").with_verdict(true, 1.7, "over");
        assert_eq!(f.score, Some(1.0));
        let f = Feedback::new("a", "b", "c").with_verdict(false, -0.2, "under");
        assert_eq!(f.score, Some(0.0));
    }

    #[test]
    fn test_feedback_json_omits_missing_verdict() {
        let f = Feedback::new("legs", "symmetry", "mirror");
        let json = serde_json::to_string(&f).unwrap();
        assert!(!json.contains("score"));
        let back: Feedback = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn test_engine_state_terminal() {
        assert!(EngineState::Converged.is_terminal());
        assert!(EngineState::Exhausted.is_terminal());
        assert!(!EngineState::Retry.is_terminal());
        assert_eq!(EngineState::ExecFailed.to_string(), "exec_failed");
        assert_eq!(EngineState::Planning.to_string(), "planning");
    }

    #[test]
    fn test_engine_config_from_config() {
        let mut cfg = crate::infra::config::Config::default();
        cfg.iteration.max_attempts = 7;
        cfg.iteration.call_timeout_seconds = 42;
        cfg.retry.max_retries = 1;
        let engine = IterationEngineConfig::from(&cfg);
        assert_eq!(engine.max_attempts, 7);
        assert_eq!(engine.call_timeout, Duration::from_secs(42));
        assert_eq!(engine.retry.max_retries, 1);
        assert!((engine.master_after - 2.0 / 3.0).abs() < 0.001);
        assert!(engine.lease_ttl > Duration::from_secs(42 * 2 * 4));
    }

    #[test]
    fn test_lease_ttl_covers_retried_calls() {
        let retry = RetryConfig {
            max_retries: 2,
            max_delay: Duration::from_secs(10),
            ..RetryConfig::default()
        };
        let ttl = lease_ttl_for(Duration::from_secs(60), &retry);
        assert_eq!(ttl, Duration::from_secs((60 * 3 + 10 * 2) * 4));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Converged.to_string(), "converged");
        assert_eq!(Outcome::Exhausted.to_string(), "exhausted");
    }
}
