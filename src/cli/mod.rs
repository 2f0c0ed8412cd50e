// src/cli/mod.rs — CLI definition (clap derive)

pub mod history;
pub mod progress;
pub mod run;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cadloop",
    about = "Iteratively generate and refine CAD programs against a design goal",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Suppress progress output (only emit final result)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Budget and output options shared by every command that drives a session.
#[derive(Args, Clone, Debug, Default)]
pub struct LoopArgs {
    /// Max attempts for the session, counting attempts made before a resume
    #[arg(short = 'n', long)]
    pub max_attempts: Option<u32>,

    /// Alignment score (0.0-1.0) that stops the loop even if the goal is not judged achieved
    #[arg(short = 't', long)]
    pub threshold: Option<f32>,

    /// Reference image of the intended design (repeatable)
    #[arg(short, long = "reference")]
    pub references: Vec<std::path::PathBuf>,

    /// Keep each attempt's working directory under the data dir
    #[arg(long)]
    pub keep_artifacts: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new session for a design goal
    Run {
        /// Design goal, in plain language
        #[arg(required = true, trailing_var_arg = true)]
        goal: Vec<String>,
        /// Make the new session a child of this one
        #[arg(long)]
        parent: Option<String>,
        #[command(flatten)]
        args: LoopArgs,
    },
    /// Continue a session from where it stopped
    Resume {
        session_id: String,
        /// Take over a session whose previous writer died without releasing it
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        args: LoopArgs,
    },
    /// Start a child session with a revised goal
    Branch {
        parent_id: String,
        /// Revised design goal
        #[arg(required = true, trailing_var_arg = true)]
        goal: Vec<String>,
        #[command(flatten)]
        args: LoopArgs,
    },
    /// Show every attempt of a session with its errors and feedback
    History {
        session_id: String,
        #[arg(long)]
        json: bool,
    },
    /// List recent sessions
    Sessions {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
    /// Show a session's ancestors and children
    Lineage { session_id: String },
    /// Re-parent a session that has no attempts yet (omit PARENT_ID to detach)
    SetParent {
        session_id: String,
        parent_id: Option<String>,
    },
    /// Correct the goal of a session that has no attempts yet
    AmendGoal {
        session_id: String,
        #[arg(required = true, trailing_var_arg = true)]
        goal: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["cadloop", "run", "-n", "3", "a", "four-legged", "table"]);
        match cli.command {
            Commands::Run { goal, parent, args } => {
                assert_eq!(goal.join(" "), "a four-legged table");
                assert!(parent.is_none());
                assert_eq!(args.max_attempts, Some(3));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_resume_with_threshold() {
        let cli = Cli::parse_from(["cadloop", "--quiet", "resume", "abc", "-t", "0.9", "--json"]);
        assert!(cli.quiet);
        match cli.command {
            Commands::Resume {
                session_id,
                force,
                args,
            } => {
                assert_eq!(session_id, "abc");
                assert!(!force);
                assert_eq!(args.threshold, Some(0.9));
                assert!(args.json);
            }
            _ => panic!("expected resume"),
        }
    }

    #[test]
    fn test_parse_resume_force() {
        let cli = Cli::parse_from(["cadloop", "resume", "--force", "abc"]);
        assert!(matches!(cli.command, Commands::Resume { force: true, .. }));
    }

    #[test]
    fn test_parse_set_parent_optional() {
        let cli = Cli::parse_from(["cadloop", "set-parent", "child"]);
        assert!(matches!(
            cli.command,
            Commands::SetParent { parent_id: None, .. }
        ));
    }

    #[test]
    fn test_goal_required() {
        assert!(Cli::try_parse_from(["cadloop", "run"]).is_err());
    }
}
