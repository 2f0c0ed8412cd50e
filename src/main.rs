// src/main.rs — cadloop entry point

use std::sync::{Arc, Mutex};

use clap::Parser;

use cadloop::cli::run::Mode;
use cadloop::cli::{history, run, Cli, Commands};
use cadloop::infra::config::Config;
use cadloop::infra::{logger, paths};
use cadloop::memory;

#[tokio::main]
async fn main() {
    // Initialize logging (respects RUST_LOG / CADLOOP_LOG)
    logger::init_logging("warn");

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?
    } else {
        Config::load()?
    };

    paths::ensure_dirs()?;
    let store = memory::open(&paths::db_path())?;
    tracing::debug!(db = %paths::db_path().display(), "store opened");

    match cli.command {
        Commands::Run { goal, parent, args } => {
            let mode = Mode::New {
                goal: goal.join(" "),
                parent,
            };
            run::run_session(mode, &args, &config, Arc::new(Mutex::new(store)), cli.quiet).await
        }
        Commands::Branch {
            parent_id,
            goal,
            args,
        } => {
            let mode = Mode::New {
                goal: goal.join(" "),
                parent: Some(parent_id),
            };
            run::run_session(mode, &args, &config, Arc::new(Mutex::new(store)), cli.quiet).await
        }
        Commands::Resume {
            session_id,
            force,
            args,
        } => {
            let mode = Mode::Resume { session_id, force };
            run::run_session(mode, &args, &config, Arc::new(Mutex::new(store)), cli.quiet).await
        }
        Commands::History { session_id, json } => history::show_history(&store, &session_id, json),
        Commands::Sessions { limit } => history::list_sessions(&store, limit),
        Commands::Lineage { session_id } => history::show_lineage(&store, &session_id),
        Commands::SetParent {
            session_id,
            parent_id,
        } => history::set_parent(&store, &session_id, parent_id.as_deref()),
        Commands::AmendGoal { session_id, goal } => {
            history::amend_goal(&store, &session_id, &goal.join(" "))
        }
    }
}
