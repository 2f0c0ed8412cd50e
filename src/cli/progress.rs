// src/cli/progress.rs — Terminal progress renderer for real-time session feedback

use crate::core::types::{EngineState, ProgressEvent};

/// One line per event worth showing; `None` for the chatty ones.
pub fn format_event(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::SessionStart {
            session_id,
            resumed_attempts,
            max_attempts,
        } => Some(if *resumed_attempts > 0 {
            format!(
                "[session {session_id}] resuming after {resumed_attempts}/{max_attempts} attempt(s)"
            )
        } else {
            format!("[session {session_id}] budget {max_attempts} attempt(s)")
        }),
        ProgressEvent::AttemptStart {
            attempt,
            max_attempts,
        } => Some(format!("[attempt {attempt}/{max_attempts}] generating...")),
        ProgressEvent::StateChange { attempt, state } => match state {
            EngineState::Planning => Some("[plan] drafting coding plan...".to_string()),
            EngineState::Executing | EngineState::Rendering | EngineState::Evaluating => {
                Some(format!("[attempt {attempt}]   {state}"))
            }
            _ => None,
        },
        ProgressEvent::ExecutionFailed {
            attempt,
            kind,
            line,
        } => Some(match line {
            Some(l) => format!("[attempt {attempt}] {kind} error at line {l}"),
            None => format!("[attempt {attempt}] {kind} error"),
        }),
        ProgressEvent::Evaluated {
            attempt,
            score,
            best_score,
            improved,
        } => Some(format!(
            "[attempt {attempt}] score={score:.2} best={}{}",
            best_score.map_or("-".to_string(), |b| format!("{b:.2}")),
            if *improved { " (new base)" } else { "" },
        )),
        ProgressEvent::Complete {
            outcome,
            attempts,
            best_score,
        } => Some(format!(
            "[done] {outcome} after {attempts} attempt(s), best score {}",
            best_score.map_or("n/a".to_string(), |b| format!("{b:.2}")),
        )),
    }
}

/// Build a progress callback that writes formatted output to stderr.
///
/// All progress output goes to stderr so stdout remains clean for the result.
/// Returns a closure suitable for `Orchestrator::with_progress()`.
pub fn terminal_progress() -> impl Fn(ProgressEvent) + Send + Sync + 'static {
    move |event| {
        if let Some(line) = format_event(&event) {
            eprintln!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ErrorKind, Outcome};

    #[test]
    fn test_session_start_format() {
        let fresh = format_event(&ProgressEvent::SessionStart {
            session_id: "s1".into(),
            resumed_attempts: 0,
            max_attempts: 5,
        });
        assert_eq!(fresh.unwrap(), "[session s1] budget 5 attempt(s)");

        let resumed = format_event(&ProgressEvent::SessionStart {
            session_id: "s1".into(),
            resumed_attempts: 2,
            max_attempts: 5,
        });
        assert_eq!(resumed.unwrap(), "[session s1] resuming after 2/5 attempt(s)");
    }

    #[test]
    fn test_attempt_start_format() {
        let msg = format_event(&ProgressEvent::AttemptStart {
            attempt: 1,
            max_attempts: 3,
        });
        assert_eq!(msg.unwrap(), "[attempt 1/3] generating...");
    }

    #[test]
    fn test_state_changes_filtered() {
        assert!(format_event(&ProgressEvent::StateChange {
            attempt: 1,
            state: EngineState::Generating,
        })
        .is_none());
        assert_eq!(
            format_event(&ProgressEvent::StateChange {
                attempt: 2,
                state: EngineState::Rendering,
            })
            .unwrap(),
            "[attempt 2]   rendering"
        );
        assert_eq!(
            format_event(&ProgressEvent::StateChange {
                attempt: 0,
                state: EngineState::Planning,
            })
            .unwrap(),
            "[plan] drafting coding plan..."
        );
    }

    #[test]
    fn test_execution_failed_format() {
        let msg = format_event(&ProgressEvent::ExecutionFailed {
            attempt: 1,
            kind: ErrorKind::Syntax,
            line: None,
        });
        assert_eq!(msg.unwrap(), "[attempt 1] syntax error");

        let msg = format_event(&ProgressEvent::ExecutionFailed {
            attempt: 2,
            kind: ErrorKind::Runtime,
            line: Some(14),
        });
        assert_eq!(msg.unwrap(), "[attempt 2] runtime error at line 14");
    }

    #[test]
    fn test_evaluated_format() {
        let msg = format_event(&ProgressEvent::Evaluated {
            attempt: 2,
            score: 0.6,
            best_score: Some(0.7),
            improved: false,
        });
        assert_eq!(msg.unwrap(), "[attempt 2] score=0.60 best=0.70");

        let msg = format_event(&ProgressEvent::Evaluated {
            attempt: 1,
            score: 0.4,
            best_score: Some(0.4),
            improved: true,
        });
        assert_eq!(msg.unwrap(), "[attempt 1] score=0.40 best=0.40 (new base)");
    }

    #[test]
    fn test_complete_format() {
        let msg = format_event(&ProgressEvent::Complete {
            outcome: Outcome::Exhausted,
            attempts: 2,
            best_score: None,
        });
        assert_eq!(msg.unwrap(), "[done] exhausted after 2 attempt(s), best score n/a");
    }

    #[test]
    fn test_terminal_progress_is_callable() {
        let cb = terminal_progress();
        cb(ProgressEvent::AttemptStart {
            attempt: 1,
            max_attempts: 1,
        });
    }
}
