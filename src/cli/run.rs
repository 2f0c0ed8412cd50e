// src/cli/run.rs — Drive sessions from the command line

use std::sync::{Arc, Mutex};

use crate::adapters::{LlmGenerator, ProcessExecutor, ProcessRenderer, VisionEvaluator};
use crate::core::collaborators::{Generator, Planner};
use crate::core::orchestrator::{CancelToken, Collaborators, Orchestrator};
use crate::core::types::{IterationEngineConfig, SessionResult};
use crate::evaluator::judge::LlmJudge;
use crate::infra::config::Config;
use crate::infra::paths;
use crate::memory::store::Store;
use crate::provider::openai_compat::OpenAICompatProvider;
use crate::provider::ModelProvider;

use super::progress::terminal_progress;
use super::LoopArgs;

/// How the session is entered.
pub enum Mode {
    New {
        goal: String,
        parent: Option<String>,
    },
    Resume {
        session_id: String,
        /// Drop a lease left behind by a writer that died.
        force: bool,
    },
}

/// Wire the bundled adapters from config.
pub fn build_collaborators(config: &Config, args: &LoopArgs) -> anyhow::Result<Collaborators> {
    let provider: Arc<dyn ModelProvider> = Arc::new(OpenAICompatProvider::from_env(
        &config.models.base_url,
        &config.models.api_key_env,
    )?);
    let temperature = config.models.temperature;
    let llm = |model: &str| -> anyhow::Result<Arc<LlmGenerator>> {
        Ok(Arc::new(
            LlmGenerator::new(provider.clone(), model)?
                .with_temperature(temperature)
                .with_library(config.models.cad_library.as_str()),
        ))
    };
    let generator = llm(&config.models.generator)?;
    let master = match &config.models.master {
        Some(model) => Some(llm(model)? as Arc<dyn Generator>),
        None => None,
    };
    let planner = config
        .iteration
        .plan
        .then(|| generator.clone() as Arc<dyn Planner>);

    let mut executor = ProcessExecutor::new(config.executor.clone());
    if args.keep_artifacts {
        executor = executor.keep_artifacts_in(paths::workspace_dir());
    }

    Ok(Collaborators {
        generator,
        executor: Arc::new(executor),
        renderer: Arc::new(ProcessRenderer::new(config.renderer.clone())),
        evaluator: Arc::new(
            VisionEvaluator::new(provider.clone(), &config.models.evaluator)
                .with_references(args.references.clone()),
        ),
        judge: Arc::new(LlmJudge::new(provider.clone(), config.models.judge_model())),
        planner,
        master,
    })
}

/// Run or resume a session and print the outcome.
pub async fn run_session(
    mode: Mode,
    args: &LoopArgs,
    config: &Config,
    store: Arc<Mutex<Store>>,
    quiet: bool,
) -> anyhow::Result<()> {
    let engine_config = IterationEngineConfig::from(config);
    let max_attempts = args.max_attempts.unwrap_or(engine_config.max_attempts);
    let threshold = args.threshold.unwrap_or(engine_config.score_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        anyhow::bail!("--threshold must be within [0, 1], got {threshold}");
    }

    let cancel = CancelToken::new();
    let mut orchestrator =
        Orchestrator::new(build_collaborators(config, args)?, store.clone(), engine_config)
        .with_cancel(cancel.clone());
    if !quiet {
        orchestrator = orchestrator.with_progress(terminal_progress());
    }

    // Ctrl-C stops the loop at the next state boundary.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("[cancel] stopping after the current step...");
            cancel.cancel();
        }
    });

    let result = match mode {
        Mode::New { goal, parent } => {
            orchestrator
                .run_session(&goal, max_attempts, threshold, parent.as_deref())
                .await?
        }
        Mode::Resume { session_id, force } => {
            if force {
                let cleared = store
                    .lock()
                    .map_err(|_| anyhow::anyhow!("store mutex poisoned"))?
                    .clear_lease(&session_id)?;
                if cleared {
                    tracing::warn!(session_id = %session_id, "cleared existing session lease");
                }
            }
            orchestrator
                .resume_session(&session_id, max_attempts, threshold)
                .await?
        }
    };

    print_result(&result, args.json)
}

fn print_result(result: &SessionResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    if let Some(ref warning) = result.warning {
        eprintln!("warning: {warning}");
    }
    eprintln!("session: {}", result.session_id);
    eprintln!("outcome: {}", result.outcome);
    match &result.best {
        Some(best) => {
            eprintln!(
                "best:    attempt {} ({})",
                best.iteration.seq,
                best.score
                    .map_or("unscored".to_string(), |s| format!("score {s:.2}"))
            );
            // Code on stdout so it can be piped into a file.
            println!("{}", best.iteration.code);
        }
        None => eprintln!("best:    none"),
    }
    Ok(())
}
