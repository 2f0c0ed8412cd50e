// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub iteration: IterationConfig,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub renderer: RendererConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationConfig {
    pub max_attempts: u32,
    pub score_threshold: f32,
    /// Upper bound for any single collaborator call.
    pub call_timeout_seconds: u64,
    /// Draft a coding plan before the first attempt.
    #[serde(default = "default_true")]
    pub plan: bool,
    /// Share of the budget after which `models.master` generates, when set.
    #[serde(default = "default_master_after")]
    pub master_after: f32,
}

fn default_true() -> bool {
    true
}

fn default_master_after() -> f32 {
    2.0 / 3.0
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            score_threshold: 0.8,
            call_timeout_seconds: 300,
            plan: true,
            master_after: default_master_after(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter_fraction: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 2_000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            jitter_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// OpenAI-compatible endpoint, including the version prefix.
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub generator: String,
    pub evaluator: String,
    /// Falls back to `evaluator` when unset.
    pub judge: Option<String>,
    /// Stronger generator for the late attempts of a session.
    #[serde(default)]
    pub master: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Python CAD library the generator writes against.
    #[serde(default = "default_cad_library")]
    pub cad_library: String,
}

fn default_cad_library() -> String {
    "build123d".into()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            generator: "gpt-4o".into(),
            evaluator: "gpt-4o".into(),
            judge: None,
            master: None,
            temperature: None,
            cad_library: default_cad_library(),
        }
    }
}

impl ModelsConfig {
    pub fn judge_model(&self) -> &str {
        self.judge.as_deref().unwrap_or(&self.evaluator)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Interpreter used to run the candidate script.
    pub interpreter: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Optional parse-only check run before execution, e.g.
    /// `["python3", "-m", "py_compile"]`. The script path is appended.
    #[serde(default)]
    pub syntax_check: Option<Vec<String>>,
    pub timeout_seconds: u64,
    /// File extensions that count as a produced artifact, in preference order.
    pub artifact_extensions: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".into(),
            args: Vec::new(),
            syntax_check: Some(vec![
                "python3".into(),
                "-m".into(),
                "py_compile".into(),
            ]),
            timeout_seconds: 60,
            artifact_extensions: vec!["stl".into(), "step".into(), "obj".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Snapshot command. `{artifact}` and `{output_dir}` in `args` are substituted.
    pub command: String,
    #[serde(default = "default_renderer_args")]
    pub args: Vec<String>,
    #[serde(default = "default_image_glob")]
    pub image_glob: String,
}

fn default_renderer_args() -> Vec<String> {
    vec!["{artifact}".into(), "{output_dir}".into()]
}

fn default_image_glob() -> String {
    "*.png".into()
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            command: "cadloop-snapshot".into(),
            args: default_renderer_args(),
            image_glob: default_image_glob(),
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.iteration.score_threshold) {
            anyhow::bail!(
                "iteration.score_threshold must be within [0, 1], got {}",
                self.iteration.score_threshold
            );
        }
        if self.iteration.call_timeout_seconds == 0 {
            anyhow::bail!("iteration.call_timeout_seconds must be positive");
        }
        if !(self.iteration.master_after > 0.0 && self.iteration.master_after <= 1.0) {
            anyhow::bail!(
                "iteration.master_after must be within (0, 1], got {}",
                self.iteration.master_after
            );
        }
        if self.retry.backoff_factor < 1.0 {
            anyhow::bail!("retry.backoff_factor must be >= 1.0");
        }
        Ok(())
    }
}
