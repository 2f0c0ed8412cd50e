// src/core/replay.rs — Rebuild loop state from persisted history
//
// The live loop and a resumed loop share `LoopState::observe`, so a session
// resumed after N attempts is in the same state a fresh run would have been.

use super::collaborators::GenerationRequest;
use super::repair::RepairContext;
use super::types::{BestCandidate, Iteration, IterationRecord, SessionHistory};

/// Loop state carried through the state machine.
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    /// Iterations consumed so far, including ones that crashed mid-attempt.
    pub attempts: u32,
    /// Highest-scoring iteration seen. Replaced only by a strictly higher score.
    pub best: Option<BestCandidate>,
    /// What the next generation refines. Advisory; set by improvement judgments.
    pub base: Option<Iteration>,
    pub last: Option<IterationRecord>,
    /// First iteration judged achieved or scored at the threshold.
    pub converged: Option<Iteration>,
}

impl LoopState {
    /// Fold one finished (or abandoned) attempt into the state.
    pub fn observe(&mut self, record: &IterationRecord, score_threshold: f32) {
        self.attempts += 1;
        let iteration = &record.iteration;

        if let Some(score) = iteration.score() {
            let beats_best = match self.best.as_ref().and_then(|b| b.score) {
                Some(best) => score > best,
                None => true,
            };
            if beats_best {
                self.best = Some(BestCandidate {
                    iteration: iteration.clone(),
                    score: Some(score),
                });
            }
            if self.converged.is_none() && meets_goal(iteration, score_threshold) {
                self.converged = Some(iteration.clone());
            }
            if self.base.is_none() {
                self.base = Some(iteration.clone());
            }
        }

        self.last = Some(record.clone());
    }

    pub fn best_score(&self) -> Option<f32> {
        self.best.as_ref().and_then(|b| b.score)
    }

    /// The candidate to hand back: best by score, else the most recent attempt.
    pub fn best_candidate(&self) -> Option<BestCandidate> {
        self.best.clone().or_else(|| {
            self.last.as_ref().map(|r| BestCandidate {
                iteration: r.iteration.clone(),
                score: None,
            })
        })
    }

    pub fn budget_left(&self, max_attempts: u32) -> bool {
        self.attempts < max_attempts
    }

    /// Whether the next attempt falls in the last `1 - fraction` of the budget.
    pub fn escalated(&self, max_attempts: u32, fraction: f32) -> bool {
        // Nudged down so 3 * (2/3) lands on 2 despite f32 rounding.
        let first = (f64::from(max_attempts) * f64::from(fraction) - 1e-6).ceil();
        f64::from(self.attempts) >= first.max(1.0)
    }

    /// What the Generator gets for the next attempt.
    pub fn generation_request(&self, goal: &str) -> GenerationRequest {
        let Some(last) = &self.last else {
            return GenerationRequest::fresh(goal);
        };
        GenerationRequest {
            goal: goal.to_string(),
            prior_code: Some(last.iteration.code.clone()),
            prior_error: last.errors.last().cloned(),
            prior_feedback: last.iteration.feedback.clone(),
            repair: RepairContext::for_attempt(last, self.base.as_ref()),
            ..Default::default()
        }
    }
}

/// Achieved by the judge, or scored at or above the threshold. Either verdict
/// alone ends the session.
pub fn meets_goal(iteration: &Iteration, score_threshold: f32) -> bool {
    let Some(feedback) = &iteration.feedback else {
        return false;
    };
    feedback.achieved == Some(true) || feedback.score.is_some_and(|s| s >= score_threshold)
}

/// Pure fold over a session's history. The refinement base restarts from the
/// best candidate, since improvement verdicts are not persisted.
pub fn replay(history: &SessionHistory, score_threshold: f32) -> LoopState {
    let mut state = history
        .iterations
        .iter()
        .fold(LoopState::default(), |mut state, record| {
            state.observe(record, score_threshold);
            state
        });
    if let Some(best) = &state.best {
        state.base = Some(best.iteration.clone());
    }
    state
}
