// src/core/repair.rs — Repair context handed to the Generator
//
// Built only from persisted records so a resumed session asks the Generator
// exactly what an uninterrupted one would have.

use serde::Serialize;

use super::types::{ErrorKind, Feedback, Iteration, IterationRecord};

/// Lines of code shown on each side of a failing line.
const EXCERPT_RADIUS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RepairContext {
    /// The candidate never parsed: show the broken code range.
    Syntax {
        message: String,
        line: Option<u32>,
        excerpt: Option<String>,
        trace: Option<String>,
    },
    /// The candidate parsed but blew up: show the failure and the last code that ran.
    Runtime {
        message: String,
        line: Option<u32>,
        excerpt: Option<String>,
        /// Full interpreter output, traceback included.
        trace: Option<String>,
        last_good_code: Option<String>,
    },
    /// The candidate ran but misses the goal.
    Alignment {
        feedback: Feedback,
        /// Set when the refinement base is an earlier attempt than the last one.
        base_code: Option<String>,
    },
}

impl RepairContext {
    /// Context for the attempt after `last`. `None` when `last` left nothing
    /// to learn from (it crashed before an error or feedback was written).
    pub fn for_attempt(last: &IterationRecord, base: Option<&Iteration>) -> Option<Self> {
        let code = &last.iteration.code;

        if let Some(err) = last.errors.last() {
            let excerpt = err.error_line.and_then(|l| excerpt(code, l, EXCERPT_RADIUS));
            return Some(match err.error_type {
                ErrorKind::Syntax => RepairContext::Syntax {
                    message: err.error_message.clone(),
                    line: err.error_line,
                    excerpt,
                    trace: err.trace.clone(),
                },
                ErrorKind::Runtime => RepairContext::Runtime {
                    message: err.error_message.clone(),
                    line: err.error_line,
                    excerpt,
                    trace: err.trace.clone(),
                    last_good_code: base.map(|b| b.code.clone()),
                },
            });
        }

        let feedback = last.iteration.feedback.clone()?;
        let base_code = base
            .filter(|b| b.id != last.iteration.id)
            .map(|b| b.code.clone());
        Some(RepairContext::Alignment {
            feedback,
            base_code,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RepairContext::Syntax { .. } => "syntax",
            RepairContext::Runtime { .. } => "runtime",
            RepairContext::Alignment { .. } => "alignment",
        }
    }
}

/// Numbered code lines around `line` (1-based), the failing one marked with `>`.
pub fn excerpt(code: &str, line: u32, radius: usize) -> Option<String> {
    let lines: Vec<&str> = code.lines().collect();
    let target = (line as usize).checked_sub(1)?;
    if target >= lines.len() {
        return None;
    }
    let start = target.saturating_sub(radius);
    let end = (target + radius + 1).min(lines.len());

    let out = (start..end)
        .map(|i| {
            let marker = if i == target { '>' } else { ' ' };
            format!("{marker}{:>4} | {}", i + 1, lines[i])
        })
        .collect::<Vec<_>>()
        .join("\n");
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ErrorRecord;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn iteration(id: &str, code: &str, feedback: Option<Feedback>) -> Iteration {
        Iteration {
            id: id.into(),
            session_id: "s".into(),
            seq: 1,
            code: code.into(),
            feedback,
            created_at: Utc::now(),
        }
    }

    fn error(kind: ErrorKind, message: &str, line: Option<u32>) -> ErrorRecord {
        ErrorRecord {
            id: "e".into(),
            iteration_id: "it".into(),
            error_type: kind,
            error_message: message.into(),
            error_line: line,
            trace: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_excerpt_marks_failing_line() {
        let code = "a\nb\nc\nd\ne";
        let ex = excerpt(code, 3, 1).unwrap();
        assert_eq!(ex, "    2 | b\n>   3 | c\n    4 | d");
    }

    #[test]
    fn test_excerpt_out_of_range() {
        assert_eq!(excerpt("a\nb", 0, 2), None);
        assert_eq!(excerpt("a\nb", 5, 2), None);
        assert_eq!(excerpt("a\nb", 1, 5).unwrap().lines().count(), 2);
    }

    #[test]
    fn test_syntax_context_carries_code_range() {
        let last = IterationRecord {
            iteration: iteration("it", "x = (\ny = 1", None),
            errors: vec![error(ErrorKind::Syntax, "SyntaxError: '(' was never closed", Some(1))],
        };
        let ctx = RepairContext::for_attempt(&last, None).unwrap();
        assert_eq!(ctx.kind(), "syntax");
        match ctx {
            RepairContext::Syntax { excerpt, line, .. } => {
                assert_eq!(line, Some(1));
                assert!(excerpt.unwrap().contains(">   1 | x = ("));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_syntax_context_without_line() {
        let last = IterationRecord {
            iteration: iteration("it", "???", None),
            errors: vec![error(ErrorKind::Syntax, "SyntaxError", None)],
        };
        match RepairContext::for_attempt(&last, None).unwrap() {
            RepairContext::Syntax { excerpt, line, .. } => {
                assert_eq!(line, None);
                assert_eq!(excerpt, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_runtime_context_carries_last_good_code() {
        let base = iteration("b", "box(1, 1, 1)", Some(Feedback::new("box", "", "")));
        let last = IterationRecord {
            iteration: iteration("it", "box(1, 1, 1).fillet(9)", None),
            errors: vec![error(ErrorKind::Runtime, "ValueError: no edges", Some(1))],
        };
        match RepairContext::for_attempt(&last, Some(&base)).unwrap() {
            RepairContext::Runtime { last_good_code, message, .. } => {
                assert_eq!(last_good_code.as_deref(), Some("box(1, 1, 1)"));
                assert_eq!(message, "ValueError: no edges");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_runtime_context_carries_full_trace() {
        let trace = "Traceback (most recent call last):\n  File \"candidate.py\", line 1, in <module>\nValueError: no edges";
        let mut err = error(ErrorKind::Runtime, "ValueError: no edges", Some(1));
        err.trace = Some(trace.into());
        let last = IterationRecord {
            iteration: iteration("it", "box(1, 1, 1).fillet(9)", None),
            errors: vec![err],
        };
        match RepairContext::for_attempt(&last, None).unwrap() {
            RepairContext::Runtime { trace: got, .. } => {
                assert_eq!(got.as_deref(), Some(trace));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_alignment_context_omits_base_when_same_attempt() {
        let fb = Feedback::new("four legs", "symmetry", "mirror the legs");
        let it = iteration("it", "legs()", Some(fb.clone()));
        let last = IterationRecord {
            iteration: it.clone(),
            errors: vec![],
        };
        assert_eq!(
            RepairContext::for_attempt(&last, Some(&it)),
            Some(RepairContext::Alignment {
                feedback: fb,
                base_code: None,
            })
        );
    }

    #[test]
    fn test_alignment_context_points_back_to_base() {
        let base = iteration("b", "good()", Some(Feedback::new("a", "b", "c")));
        let last = IterationRecord {
            iteration: iteration("it", "worse()", Some(Feedback::new("x", "y", "z"))),
            errors: vec![],
        };
        match RepairContext::for_attempt(&last, Some(&base)).unwrap() {
            RepairContext::Alignment { base_code, .. } => {
                assert_eq!(base_code.as_deref(), Some("good()"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_no_context_for_crashed_attempt() {
        let last = IterationRecord {
            iteration: iteration("it", "half-written", None),
            errors: vec![],
        };
        assert_eq!(RepairContext::for_attempt(&last, None), None);
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let ctx = RepairContext::Syntax {
            message: "m".into(),
            line: None,
            excerpt: None,
            trace: None,
        };
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["kind"], "syntax");
    }
}
