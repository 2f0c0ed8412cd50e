// src/evaluator/judge.rs — LLM-backed convergence judge

use std::sync::Arc;

use async_trait::async_trait;

use super::parser::{parse_achievement, parse_improvement};
use super::{AchievementVerdict, ConvergenceJudge, ImprovementVerdict};
use crate::core::types::Feedback;
use crate::infra::errors::CadLoopError;
use crate::provider::{ChatRequest, Message, ModelProvider};

const JUDGE_SYSTEM: &str = "You judge how well a CAD model matches a design goal. \
You only see textual feedback about rendered views of the model, never the model itself. \
Answer in the exact format requested.";

/// `ConvergenceJudge` over any chat model.
pub struct LlmJudge {
    provider: Arc<dyn ModelProvider>,
    model: String,
    temperature: Option<f32>,
}

impl LlmJudge {
    pub fn new(provider: Arc<dyn ModelProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: Some(0.0),
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    async fn ask(&self, prompt: String) -> Result<String, CadLoopError> {
        let response = self
            .provider
            .chat(ChatRequest {
                model: self.model.clone(),
                messages: vec![Message::user(prompt)],
                max_tokens: Some(500),
                temperature: self.temperature,
                system: Some(JUDGE_SYSTEM.to_string()),
            })
            .await?;
        Ok(response.content)
    }

    /// An unreadable verdict is worth asking again.
    fn unparseable(&self, what: &str, response: &str) -> CadLoopError {
        CadLoopError::Provider {
            provider: self.provider.id().to_string(),
            message: format!("could not read {what} verdict from: {}", preview(response)),
            retriable: true,
        }
    }
}

fn preview(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(120) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

pub(crate) fn improvement_prompt(goal: &str, old_hits: &str, new_hits: &str) -> String {
    format!(
        "## Design goal\n{goal}\n\n\
         ## What the previous attempt got right\n{old_hits}\n\n\
         ## What the new attempt gets right\n{new_hits}\n\n\
         Is the new attempt at least as aligned with the design goal as the previous one? \
         Consider only what each attempt gets right.\n\
         Respond as JSON: {{\"better\": true|false, \"rationale\": \"one sentence\"}}"
    )
}

pub(crate) fn achievement_prompt(goal: &str, feedback: &Feedback) -> String {
    format!(
        "## Design goal\n{goal}\n\n\
         ## Hits\n{}\n\n\
         ## Misses\n{}\n\n\
         Has the design goal been achieved? Score alignment from 0.0 to 1.0: \
         0 = no alignment, 0.5 = partial with key aspects missing, \
         0.8 = near-full alignment with minor or ambiguous gaps, 1 = full alignment.\n\
         Respond as JSON: {{\"achieved\": true|false, \"score\": 0.0, \"rationale\": \"one sentence\"}}",
        feedback.hits, feedback.misses
    )
}

#[async_trait]
impl ConvergenceJudge for LlmJudge {
    async fn is_improvement(
        &self,
        goal: &str,
        old_hits: &str,
        new_hits: &str,
    ) -> Result<ImprovementVerdict, CadLoopError> {
        let response = self.ask(improvement_prompt(goal, old_hits, new_hits)).await?;
        let verdict =
            parse_improvement(&response).ok_or_else(|| self.unparseable("improvement", &response))?;
        tracing::debug!(better = verdict.better, rationale = %verdict.rationale, "improvement verdict");
        Ok(verdict)
    }

    async fn is_achieved(
        &self,
        goal: &str,
        feedback: &Feedback,
    ) -> Result<AchievementVerdict, CadLoopError> {
        let response = self.ask(achievement_prompt(goal, feedback)).await?;
        let verdict = parse_achievement(&response)
            .ok_or_else(|| self.unparseable("achievement", &response))?;
        tracing::debug!(
            achieved = verdict.achieved,
            score = verdict.score,
            "achievement verdict"
        );
        Ok(verdict)
    }
}
