// src/adapters/vision.rs — Visual feedback from a vision-language model

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;

use crate::core::collaborators::{Evaluator, ImageRef};
use crate::core::types::Feedback;
use crate::evaluator::parser::parse_feedback;
use crate::infra::errors::CadLoopError;
use crate::provider::{ChatRequest, Message, ModelProvider};

const SYSTEM_PROMPT: &str = "You review rendered views of a CAD model against a design goal. \
Focus on geometry, proportions, and physical feasibility. Ignore colors and lighting.";

/// Evaluator that shows snapshots (and optional reference images) to a VLM.
pub struct VisionEvaluator {
    provider: Arc<dyn ModelProvider>,
    model: String,
    temperature: Option<f32>,
    references: Vec<PathBuf>,
}

impl VisionEvaluator {
    pub fn new(provider: Arc<dyn ModelProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: Some(0.2),
            references: Vec::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Reference images of what the goal should look like, shown before the renders.
    pub fn with_references(mut self, references: Vec<PathBuf>) -> Self {
        self.references = references;
        self
    }

    fn prompt(&self, goal: &str, renders: usize) -> String {
        let mut prompt = format!("## Design goal\n{goal}\n\n");
        if !self.references.is_empty() {
            prompt.push_str(&format!(
                "The first {} image(s) are references for the goal. ",
                self.references.len()
            ));
        }
        prompt.push_str(&format!(
            "The {renders} rendered view(s) of the model follow.\n\n\
             Respond in this format:\n\
             HITS:\n- aspects of the goal the model satisfies\n\
             MISSES:\n- aspects of the goal the model gets wrong or lacks\n\
             SUGGESTIONS:\n- concrete geometric changes that would fix the misses"
        ));
        prompt
    }
}

fn media_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

/// Read an image into a `data:` URL.
pub async fn data_url(path: &Path) -> Result<String, CadLoopError> {
    let bytes = tokio::fs::read(path).await?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{encoded}", media_type(path)))
}

#[async_trait]
impl Evaluator for VisionEvaluator {
    async fn evaluate(&self, goal: &str, images: &[ImageRef]) -> Result<Feedback, CadLoopError> {
        let paths = self.references.iter().chain(images.iter().map(|i| &i.path));
        let urls = futures::future::try_join_all(paths.map(|p| data_url(p))).await?;

        let response = self
            .provider
            .chat(ChatRequest {
                model: self.model.clone(),
                messages: vec![Message::user_with_images(
                    self.prompt(goal, images.len()),
                    urls,
                )],
                max_tokens: Some(1500),
                temperature: self.temperature,
                system: Some(SYSTEM_PROMPT.to_string()),
            })
            .await?;

        let feedback = parse_feedback(&response.content);
        tracing::debug!(
            hits = feedback.hits.lines().count(),
            misses = feedback.misses.lines().count(),
            "visual feedback"
        );
        Ok(feedback)
    }
}
