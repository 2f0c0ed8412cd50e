// src/evaluator/mod.rs — Convergence judgments over evaluator feedback
//
// Both judgments come from an oracle and are advisory. The engine keeps its
// own budget and best-candidate bookkeeping and never lets a single verdict
// discard a better-scored candidate.

pub mod judge;
pub mod parser;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::types::Feedback;
use crate::infra::errors::CadLoopError;

/// Pairwise judgment: is the newer attempt at least as aligned as the older one?
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementVerdict {
    pub better: bool,
    pub rationale: String,
}

/// Absolute judgment of one feedback snapshot against the goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementVerdict {
    pub achieved: bool,
    /// 0 = no alignment, ~0.5 = partial, ~0.8 = near-full, 1 = full.
    pub score: f32,
    pub rationale: String,
}

impl AchievementVerdict {
    pub fn new(achieved: bool, score: f32, rationale: impl Into<String>) -> Self {
        Self {
            achieved,
            score: clamp_score(score),
            rationale: rationale.into(),
        }
    }
}

/// Clamp into [0, 1]; NaN counts as no alignment.
pub fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[async_trait]
pub trait ConvergenceJudge: Send + Sync {
    /// Compares hits only. Misses and suggestions are deliberately ignored.
    async fn is_improvement(
        &self,
        goal: &str,
        old_hits: &str,
        new_hits: &str,
    ) -> Result<ImprovementVerdict, CadLoopError>;

    async fn is_achieved(
        &self,
        goal: &str,
        feedback: &Feedback,
    ) -> Result<AchievementVerdict, CadLoopError>;
}
