// src/adapters/generator.rs — LLM code generator

use std::sync::Arc;

use async_trait::async_trait;
use minijinja::{context, Environment};

use crate::core::classifier::SCRIPT_NAME;
use crate::core::collaborators::{GenerationRequest, Generator, Planner};
use crate::core::repair::RepairContext;
use crate::infra::errors::CadLoopError;
use crate::provider::{ChatRequest, Message, ModelProvider};

pub const DEFAULT_CAD_LIBRARY: &str = "build123d";

const SYSTEM_TEMPLATE: &str = "You write complete, runnable Python CAD scripts using {{ library }}. \
The script must export the final model as an STL file into the current working directory. \
Reply with a single ```python fenced code block and nothing else.";

const PLAN_SYSTEM_TEMPLATE: &str = "You plan Python CAD scripts written with {{ library }}. \
Do not write code.";

const PLAN_TEMPLATE: &str = r#"## Design goal
{{ goal }}

Break the design into its elements. For each element give its shape, its
dimensions and where it sits relative to the others. Then list, as numbered
steps, how to build and combine the elements with {{ library }}."#;

const USER_TEMPLATE: &str = r#"## Design goal
{{ request.goal }}
{% if request.plan %}
## Coding plan
{{ request.plan }}
{% endif %}{% if request.prior_code %}
## Previous attempt ({{ script }})
```python
{{ request.prior_code }}
```
{% if repair_kind == "syntax" %}
## The previous attempt did not parse
{{ repair.message }}{% if repair.line %} (line {{ repair.line }}){% endif %}
{% if repair.excerpt %}
```
{{ repair.excerpt }}
```
{% endif %}{% if repair.trace %}
Interpreter output:
```
{{ repair.trace }}
```
{% endif %}
Fix the syntax error. Keep everything else that was intended.
{% elif repair_kind == "runtime" %}
## The previous attempt failed while running
{{ repair.message }}{% if repair.line %} (line {{ repair.line }}){% endif %}
{% if repair.excerpt %}
```
{{ repair.excerpt }}
```
{% endif %}{% if repair.trace %}
Full traceback:
```
{{ repair.trace }}
```
{% endif %}{% if repair.last_good_code %}
## Last version that ran successfully
```python
{{ repair.last_good_code }}
```
{% endif %}
Fix the failure so the script runs to completion and exports the model.
{% elif repair_kind == "alignment" %}
## Review of the rendered model
What matches the goal:
{{ repair.feedback.hits }}

What is missing or wrong:
{{ repair.feedback.misses }}

Suggestions:
{{ repair.feedback.suggestions }}
{% if repair.base_code %}
## Best version so far (refine this one)
```python
{{ repair.base_code }}
```
{% endif %}
Revise the model so it matches the design goal more closely.
{% endif %}{% else %}
Write the script from scratch.
{% endif %}"#;

/// Generator backed by a chat model. Also drafts coding plans.
pub struct LlmGenerator {
    provider: Arc<dyn ModelProvider>,
    model: String,
    temperature: Option<f32>,
    library: String,
    env: Environment<'static>,
}

fn template_error(e: minijinja::Error) -> CadLoopError {
    CadLoopError::Config(format!("generator template: {e}"))
}

impl LlmGenerator {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        model: impl Into<String>,
    ) -> Result<Self, CadLoopError> {
        let mut env = Environment::new();
        for (name, source) in [
            ("system", SYSTEM_TEMPLATE),
            ("user", USER_TEMPLATE),
            ("plan_system", PLAN_SYSTEM_TEMPLATE),
            ("plan", PLAN_TEMPLATE),
        ] {
            env.add_template(name, source).map_err(template_error)?;
        }
        Ok(Self {
            provider,
            model: model.into(),
            temperature: None,
            library: DEFAULT_CAD_LIBRARY.to_string(),
            env,
        })
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Python CAD library the scripts are written against.
    pub fn with_library(mut self, library: impl Into<String>) -> Self {
        self.library = library.into();
        self
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, CadLoopError> {
        self.env
            .get_template(name)
            .and_then(|t| t.render(ctx))
            .map_err(template_error)
    }

    pub fn system_prompt(&self) -> Result<String, CadLoopError> {
        self.render("system", context! { library => &self.library })
    }

    pub fn prompt(&self, request: &GenerationRequest) -> Result<String, CadLoopError> {
        self.render(
            "user",
            context! {
                request => request,
                repair => &request.repair,
                repair_kind => request.repair.as_ref().map(RepairContext::kind),
                script => SCRIPT_NAME,
            },
        )
    }

    pub fn plan_prompt(&self, goal: &str) -> Result<String, CadLoopError> {
        self.render("plan", context! { goal => goal, library => &self.library })
    }

    fn no_output(&self, what: &str) -> CadLoopError {
        CadLoopError::Provider {
            provider: self.provider.id().to_string(),
            message: format!("model returned no {what}"),
            retriable: true,
        }
    }
}

/// The code inside the first ```python block, else the first fenced block,
/// else the whole reply.
pub fn extract_code(reply: &str) -> String {
    let blocks = fenced_blocks(reply);
    let chosen = blocks
        .iter()
        .find(|(lang, _)| matches!(*lang, "python" | "py"))
        .or_else(|| blocks.first())
        .map(|(_, body)| *body)
        .unwrap_or(reply);
    chosen.trim().to_string()
}

fn fenced_blocks(text: &str) -> Vec<(&str, &str)> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let Some(nl) = after.find('\n') else { break };
        let lang = after[..nl].trim();
        let body_start = &after[nl + 1..];
        let Some(close) = body_start.find("```") else { break };
        blocks.push((lang, &body_start[..close]));
        rest = &body_start[close + 3..];
    }
    blocks
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CadLoopError> {
        let prompt = self.prompt(request)?;
        let response = self
            .provider
            .chat(ChatRequest {
                model: self.model.clone(),
                messages: vec![Message::user(prompt)],
                max_tokens: Some(4096),
                temperature: self.temperature,
                system: Some(self.system_prompt()?),
            })
            .await?;

        let code = extract_code(&response.content);
        if code.is_empty() {
            return Err(self.no_output("code"));
        }
        tracing::debug!(
            lines = code.lines().count(),
            output_tokens = response.usage.output_tokens,
            "generated candidate"
        );
        Ok(code)
    }
}

#[async_trait]
impl Planner for LlmGenerator {
    async fn plan(&self, goal: &str) -> Result<String, CadLoopError> {
        let response = self
            .provider
            .chat(ChatRequest {
                model: self.model.clone(),
                messages: vec![Message::user(self.plan_prompt(goal)?)],
                max_tokens: Some(2048),
                temperature: self.temperature,
                system: Some(self.render("plan_system", context! { library => &self.library })?),
            })
            .await?;

        let plan = response.content.trim();
        if plan.is_empty() {
            return Err(self.no_output("plan"));
        }
        tracing::debug!(lines = plan.lines().count(), "drafted coding plan");
        Ok(plan.to_string())
    }
}
