// src/cli/history.rs — Read-only views over the session store, plus the two
// edits allowed before a session's first attempt

use crate::core::types::{Session, SessionHistory};
use crate::memory::store::Store;

pub fn show_history(store: &Store, session_id: &str, json: bool) -> anyhow::Result<()> {
    let history = store.history(session_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
    } else {
        print!("{}", render_history(&history));
    }
    Ok(())
}

pub fn render_history(history: &SessionHistory) -> String {
    let mut out = String::new();
    out.push_str(&session_line(&history.session));
    out.push('\n');
    if let Some(plan) = &history.session.coding_plan {
        for line in plan.lines() {
            out.push_str(&format!("  | {line}\n"));
        }
    }
    if history.iterations.is_empty() {
        out.push_str("  (no attempts)\n");
    }
    for record in &history.iterations {
        let it = &record.iteration;
        let status = match (&it.feedback, record.errors.last()) {
            (_, Some(err)) => match err.error_line {
                Some(line) => format!("{} error (line {line}): {}", err.error_type, err.error_message),
                None => format!("{} error: {}", err.error_type, err.error_message),
            },
            (Some(fb), None) => format!(
                "score {} {}",
                fb.score.map_or("-".to_string(), |s| format!("{s:.2}")),
                if fb.achieved == Some(true) { "achieved" } else { "not achieved" }
            ),
            (None, None) => "incomplete".to_string(),
        };
        out.push_str(&format!(
            "  #{:<3} {}  {}\n",
            it.seq,
            it.created_at.format("%Y-%m-%d %H:%M:%S"),
            status
        ));
    }
    out
}

fn session_line(s: &Session) -> String {
    let goal: String = s.design_goal.chars().take(70).collect();
    match &s.parent_session_id {
        Some(parent) => format!("{}  {goal}  (parent {parent})", s.id),
        None => format!("{}  {goal}", s.id),
    }
}

pub fn list_sessions(store: &Store, limit: u32) -> anyhow::Result<()> {
    let sessions = store.list_sessions(limit)?;
    if sessions.is_empty() {
        println!("No sessions yet.");
        return Ok(());
    }
    for s in sessions {
        let attempts = store.count_iterations(&s.id)?;
        println!(
            "{}  {} attempt(s)  {}",
            s.created_at.format("%Y-%m-%d %H:%M"),
            attempts,
            session_line(&s)
        );
    }
    Ok(())
}

pub fn show_lineage(store: &Store, session_id: &str) -> anyhow::Result<()> {
    let session = store.get_session(session_id)?;
    let ancestors = store.lineage(session_id)?;
    for (depth, ancestor) in ancestors.iter().rev().enumerate() {
        println!("{}{}", "  ".repeat(depth), session_line(ancestor));
    }
    let depth = ancestors.len();
    println!("{}* {}", "  ".repeat(depth), session_line(&session));
    for child in store.children(session_id)? {
        println!("{}  {}", "  ".repeat(depth + 1), session_line(&child));
    }
    Ok(())
}

pub fn set_parent(store: &Store, session_id: &str, parent_id: Option<&str>) -> anyhow::Result<()> {
    store.set_parent(session_id, parent_id)?;
    match parent_id {
        Some(p) => eprintln!("{session_id} is now a child of {p}"),
        None => eprintln!("{session_id} detached from its parent"),
    }
    Ok(())
}

pub fn amend_goal(store: &Store, session_id: &str, goal: &str) -> anyhow::Result<()> {
    store.update_goal(session_id, goal)?;
    eprintln!("goal of {session_id} updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ErrorKind, Feedback};
    use crate::memory;

    #[test]
    fn test_render_history_lists_attempts() {
        let store = memory::in_memory().unwrap();
        let sid = store.create_session("a four-legged table", None).unwrap();

        let it1 = store.append_iteration(&sid, "x = (").unwrap();
        store
            .record_error(&it1, ErrorKind::Syntax, "SyntaxError: '(' was never closed", Some(1), None)
            .unwrap();
        let it2 = store.append_iteration(&sid, "table()").unwrap();
        store
            .attach_feedback(
                &it2,
                &Feedback::new("legs", "symmetry", "mirror").with_verdict(false, 0.6, "partial"),
            )
            .unwrap();
        store.append_iteration(&sid, "crashed()").unwrap();

        let text = render_history(&store.history(&sid).unwrap());
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].contains("a four-legged table"));
        assert!(lines[1].contains("syntax error (line 1)"));
        assert!(lines[2].contains("score 0.60 not achieved"));
        assert!(lines[3].contains("incomplete"));
    }

    #[test]
    fn test_render_history_shows_plan() {
        let store = memory::in_memory().unwrap();
        let sid = store.create_session("a mug", None).unwrap();
        store
            .set_coding_plan(&sid, "1. cylinder body\n2. handle")
            .unwrap();
        store.append_iteration(&sid, "mug()").unwrap();

        let text = render_history(&store.history(&sid).unwrap());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "  | 1. cylinder body");
        assert_eq!(lines[2], "  | 2. handle");
        assert!(lines[3].contains("#1"));
    }

    #[test]
    fn test_render_empty_history() {
        let store = memory::in_memory().unwrap();
        let sid = store.create_session("goal", None).unwrap();
        let text = render_history(&store.history(&sid).unwrap());
        assert!(text.contains("(no attempts)"));
    }

    #[test]
    fn test_session_line_shows_parent() {
        let store = memory::in_memory().unwrap();
        let parent = store.create_session("v1", None).unwrap();
        let child = store.create_session("v2", Some(&parent)).unwrap();
        let line = session_line(&store.get_session(&child).unwrap());
        assert!(line.contains(&format!("(parent {parent})")));
    }
}
