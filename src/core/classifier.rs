// src/core/classifier.rs — Turn raw execution failures into typed diagnostics
//
// Pure: same failure in, same diagnostic out. The executor decides the stage
// when it knows it; for `Unknown` the trace itself is inspected.

use super::collaborators::{ExecutionFailure, FailureStage};
use super::types::ErrorKind;

/// File name the executor writes candidates to. Traceback frames naming it
/// belong to the candidate rather than to the CAD library.
pub const SCRIPT_NAME: &str = "candidate.py";

/// Pseudo file names interpreters use for code fed without a path.
const INLINE_SCRIPT_NAMES: &[&str] = &["<string>", "<script>", "<stdin>"];

/// Exception names raised before any statement runs.
const PARSE_ERRORS: &[&str] = &["SyntaxError", "IndentationError", "TabError"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    /// One-line summary.
    pub message: String,
    pub line: Option<u32>,
    /// The full output the summary came from; `None` when there was none.
    pub trace: Option<String>,
}

pub fn classify(failure: &ExecutionFailure) -> ClassifiedError {
    let mut classified = summarize(failure);
    classified.trace = raw_trace(&failure.output);
    classified
}

fn summarize(failure: &ExecutionFailure) -> ClassifiedError {
    match failure.stage {
        FailureStage::Parse => syntax(&failure.output),
        FailureStage::Run => runtime(&failure.output),
        FailureStage::Timeout { seconds } => ClassifiedError {
            kind: ErrorKind::Runtime,
            message: format!("execution timed out after {seconds}s"),
            line: None,
            trace: None,
        },
        FailureStage::ResourceLimit => ClassifiedError {
            kind: ErrorKind::Runtime,
            message: last_line(&failure.output)
                .map(|l| format!("resource limit exceeded: {l}"))
                .unwrap_or_else(|| "resource limit exceeded".to_string()),
            line: None,
            trace: None,
        },
        FailureStage::Unknown => {
            if names_parse_error(&failure.output) {
                syntax(&failure.output)
            } else {
                runtime(&failure.output)
            }
        }
    }
}

fn names_parse_error(output: &str) -> bool {
    output
        .lines()
        .any(|l| PARSE_ERRORS.iter().any(|e| l.contains(e)))
}

fn syntax(output: &str) -> ClassifiedError {
    let summary = output
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| PARSE_ERRORS.iter().any(|e| l.contains(e)))
        .or_else(|| last_line(output));

    let message = match summary {
        Some(s) => strip_location(s.trim_start_matches("Sorry: ")).to_string(),
        None => "candidate failed to parse".to_string(),
    };

    ClassifiedError {
        kind: ErrorKind::Syntax,
        message,
        line: output.lines().find_map(line_after_marker),
        trace: None,
    }
}

fn runtime(output: &str) -> ClassifiedError {
    ClassifiedError {
        kind: ErrorKind::Runtime,
        message: last_line(output)
            .map(str::to_string)
            .unwrap_or_else(|| "execution failed without output".to_string()),
        line: innermost_script_frame(output),
        trace: None,
    }
}

fn raw_trace(output: &str) -> Option<String> {
    let trimmed = output.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn last_line(output: &str) -> Option<&str> {
    output.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

/// `"invalid syntax (candidate.py, line 3)"` -> `"invalid syntax"`.
fn strip_location(summary: &str) -> &str {
    match summary.rfind(" (") {
        Some(idx) if summary.ends_with(')') && summary[idx..].contains("line ") => {
            summary[..idx].trim_end()
        }
        _ => summary,
    }
}

/// First `line N` on a line of output.
fn line_after_marker(text: &str) -> Option<u32> {
    let idx = text.find("line ")?;
    leading_number(&text[idx + "line ".len()..])
}

fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Line of the last `File "...", line N` frame that points at the candidate.
fn innermost_script_frame(output: &str) -> Option<u32> {
    output
        .lines()
        .filter_map(|l| {
            let rest = l.trim_start().strip_prefix("File \"")?;
            let (file, tail) = rest.split_once('"')?;
            is_candidate_file(file).then(|| line_after_marker(tail))?
        })
        .last()
}

fn is_candidate_file(file: &str) -> bool {
    file.ends_with(SCRIPT_NAME) || INLINE_SCRIPT_NAMES.contains(&file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RUNTIME_TRACE: &str = r#"Traceback (most recent call last):
  File "/tmp/.tmpX/candidate.py", line 7, in <module>
    table = build_table()
  File "/tmp/.tmpX/candidate.py", line 4, in build_table
    return fillet(Box(w, d, h).edges(), radius=50)
  File "/usr/lib/python3/site-packages/build123d/operations_generic.py", line 1220, in fillet
    raise ValueError("Fillets requires that edges be selected")
ValueError: Fillets requires that edges be selected
"#;

    #[test]
    fn test_parse_stage_without_line() {
        let f = ExecutionFailure::new(FailureStage::Parse, "SyntaxError: unexpected EOF");
        let c = classify(&f);
        assert_eq!(c.kind, ErrorKind::Syntax);
        assert_eq!(c.line, None);
        assert_eq!(c.message, "SyntaxError: unexpected EOF");
    }

    #[test]
    fn test_parse_stage_with_line() {
        let out = "  File \"/tmp/w/candidate.py\", line 3\n    def f(\n         ^\nSyntaxError: '(' was never closed\n";
        let c = classify(&ExecutionFailure::new(FailureStage::Parse, out));
        assert_eq!(c.kind, ErrorKind::Syntax);
        assert_eq!(c.line, Some(3));
        assert_eq!(c.message, "SyntaxError: '(' was never closed");
    }

    #[test]
    fn test_py_compile_summary_location_stripped() {
        let out = "Sorry: IndentationError: unexpected indent (candidate.py, line 5)";
        let c = classify(&ExecutionFailure::new(FailureStage::Parse, out));
        assert_eq!(c.message, "IndentationError: unexpected indent");
        assert_eq!(c.line, Some(5));
    }

    #[test]
    fn test_runtime_takes_innermost_candidate_frame() {
        let c = classify(&ExecutionFailure::new(FailureStage::Run, RUNTIME_TRACE));
        assert_eq!(c.kind, ErrorKind::Runtime);
        assert_eq!(c.line, Some(4));
        assert_eq!(
            c.message,
            "ValueError: Fillets requires that edges be selected"
        );
    }

    #[test]
    fn test_runtime_without_candidate_frame() {
        let out = "Segmentation fault (core dumped)\n";
        let c = classify(&ExecutionFailure::new(FailureStage::Run, out));
        assert_eq!(c.kind, ErrorKind::Runtime);
        assert_eq!(c.line, None);
        assert_eq!(c.message, "Segmentation fault (core dumped)");
    }

    #[test]
    fn test_runtime_empty_output() {
        let c = classify(&ExecutionFailure::new(FailureStage::Run, "  \n"));
        assert_eq!(c.message, "execution failed without output");
    }

    #[test]
    fn test_timeout_is_runtime_without_line() {
        let c = classify(&ExecutionFailure::new(
            FailureStage::Timeout { seconds: 60 },
            RUNTIME_TRACE,
        ));
        assert_eq!(c.kind, ErrorKind::Runtime);
        assert_eq!(c.line, None);
        assert_eq!(c.message, "execution timed out after 60s");
    }

    #[test]
    fn test_resource_limit_is_runtime() {
        let c = classify(&ExecutionFailure::new(FailureStage::ResourceLimit, "MemoryError"));
        assert_eq!(c.kind, ErrorKind::Runtime);
        assert_eq!(c.message, "resource limit exceeded: MemoryError");
    }

    #[test]
    fn test_unknown_stage_inspects_trace() {
        let parse = ExecutionFailure::new(
            FailureStage::Unknown,
            "  File \"<string>\", line 2\nTabError: inconsistent use of tabs",
        );
        let c = classify(&parse);
        assert_eq!(c.kind, ErrorKind::Syntax);
        assert_eq!(c.line, Some(2));

        let run = ExecutionFailure::new(FailureStage::Unknown, RUNTIME_TRACE);
        assert_eq!(classify(&run).kind, ErrorKind::Runtime);
    }

    #[test]
    fn test_inline_script_frame() {
        let out = "Traceback (most recent call last):\n  File \"<string>\", line 9, in <module>\nNameError: name 'Box' is not defined";
        let c = classify(&ExecutionFailure::new(FailureStage::Run, out));
        assert_eq!(c.line, Some(9));
    }

    #[test]
    fn test_full_trace_kept_beside_summary() {
        let c = classify(&ExecutionFailure::new(FailureStage::Run, RUNTIME_TRACE));
        let trace = c.trace.unwrap();
        assert!(trace.starts_with("Traceback (most recent call last):"));
        assert!(trace.contains("line 4, in build_table"));
        assert!(trace.ends_with("ValueError: Fillets requires that edges be selected"));
    }

    #[test]
    fn test_no_trace_for_silent_failure() {
        let c = classify(&ExecutionFailure::new(
            FailureStage::Timeout { seconds: 5 },
            "",
        ));
        assert!(c.trace.is_none());
        let c = classify(&ExecutionFailure::new(FailureStage::Run, " \n"));
        assert!(c.trace.is_none());
    }

    #[test]
    fn test_classify_is_pure() {
        let f = ExecutionFailure::new(FailureStage::Run, RUNTIME_TRACE);
        assert_eq!(classify(&f), classify(&f));
    }
}
