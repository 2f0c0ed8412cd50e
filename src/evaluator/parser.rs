// src/evaluator/parser.rs — Parse oracle responses into feedback and verdicts
//
// This is the only place raw oracle text is read. Everything downstream works
// with `Feedback`, `ImprovementVerdict` and `AchievementVerdict`.

use serde::Deserialize;

use super::{AchievementVerdict, ImprovementVerdict};
use crate::core::types::Feedback;

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Hits,
    Misses,
    Suggestions,
}

/// Parse an evaluator response into Hits / Misses / Suggestions.
///
/// Expected format:
/// ```text
/// HITS:
/// - four legs of equal length
/// MISSES:
/// - legs are not symmetric
/// SUGGESTIONS:
/// - mirror the legs across both axes
/// ```
/// Markdown headings (`## Hits`, `**Misses:**`) are accepted too. A response
/// with no recognizable sections is kept whole as hits.
pub fn parse_feedback(response: &str) -> Feedback {
    let mut hits = Vec::new();
    let mut misses = Vec::new();
    let mut suggestions = Vec::new();
    let mut section = Section::None;
    let mut saw_header = false;

    for line in response.lines() {
        let trimmed = line.trim();

        if let Some((next, rest)) = section_header(trimmed) {
            section = next;
            saw_header = true;
            if !rest.is_empty() {
                push_line(&mut hits, &mut misses, &mut suggestions, section, rest);
            }
            continue;
        }

        if !trimmed.is_empty() {
            push_line(&mut hits, &mut misses, &mut suggestions, section, trimmed);
        }
    }

    if !saw_header {
        return Feedback::new(response.trim(), "", "");
    }

    Feedback::new(hits.join("\n"), misses.join("\n"), suggestions.join("\n"))
}

fn push_line(
    hits: &mut Vec<String>,
    misses: &mut Vec<String>,
    suggestions: &mut Vec<String>,
    section: Section,
    line: &str,
) {
    let target = match section {
        Section::Hits => hits,
        Section::Misses => misses,
        Section::Suggestions => suggestions,
        Section::None => return,
    };
    target.push(line.to_string());
}

/// Recognize `HITS:`, `## Hits`, `**Misses:**`, `Suggestions: text`.
fn section_header(line: &str) -> Option<(Section, &str)> {
    let stripped = line.trim_start_matches(['#', '*', ' ']);
    let (word, rest) = match stripped.find(|c: char| !c.is_ascii_alphabetic()) {
        Some(idx) => stripped.split_at(idx),
        None => (stripped, ""),
    };
    let section = match word.to_ascii_lowercase().as_str() {
        "hits" | "hit" => Section::Hits,
        "misses" | "miss" => Section::Misses,
        "suggestions" | "suggestion" => Section::Suggestions,
        _ => return None,
    };

    // `Hits the floor` is prose, `Hits:` / `**Hits**:` / `## Hits` are headers.
    let after = rest.trim_start_matches('*');
    let is_header = after.starts_with(':') || after.trim().is_empty() || line.starts_with('#');
    if !is_header {
        return None;
    }
    let rest = after.trim_start_matches(':').trim_start_matches('*');
    Some((section, rest.trim_end_matches('*').trim()))
}

#[derive(Deserialize)]
struct ImprovementJson {
    better: bool,
    #[serde(default)]
    rationale: String,
}

#[derive(Deserialize)]
struct AchievementJson {
    #[serde(default)]
    achieved: Option<bool>,
    score: f32,
    #[serde(default)]
    rationale: String,
}

/// Parse `{"better": true, "rationale": "..."}` or `BETTER: yes` lines.
pub fn parse_improvement(response: &str) -> Option<ImprovementVerdict> {
    if let Some(json) = json_object::<ImprovementJson>(response) {
        return Some(ImprovementVerdict {
            better: json.better,
            rationale: json.rationale,
        });
    }

    let better = key_value(response, "better").and_then(parse_bool)?;
    Some(ImprovementVerdict {
        better,
        rationale: key_value(response, "rationale").unwrap_or_default().to_string(),
    })
}

/// Parse `{"achieved": true, "score": 0.85, ...}` or `ACHIEVED:` / `SCORE:` lines.
/// A missing `achieved` flag is read as not achieved.
pub fn parse_achievement(response: &str) -> Option<AchievementVerdict> {
    if let Some(json) = json_object::<AchievementJson>(response) {
        return Some(AchievementVerdict::new(
            json.achieved.unwrap_or(false),
            json.score,
            json.rationale,
        ));
    }

    let score = key_value(response, "score").and_then(parse_score)?;
    let achieved = key_value(response, "achieved")
        .and_then(parse_bool)
        .unwrap_or(false);
    Some(AchievementVerdict::new(
        achieved,
        score,
        key_value(response, "rationale").unwrap_or_default(),
    ))
}

/// First `{ ... }` span that deserializes as `T`.
fn json_object<T: for<'de> Deserialize<'de>>(response: &str) -> Option<T> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&response[start..=end]).ok()
}

/// Value of the first `KEY: value` line, case-insensitive, markdown emphasis ignored.
fn key_value<'a>(response: &'a str, key: &str) -> Option<&'a str> {
    response.lines().find_map(|line| {
        let line = line.trim().trim_start_matches(['-', '*', '#', ' ']);
        let (k, v) = line.split_once(':')?;
        k.trim_matches(['*', ' '])
            .eq_ignore_ascii_case(key)
            .then(|| v.trim().trim_matches('*').trim())
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    let word = value
        .split(|c: char| !c.is_ascii_alphabetic())
        .find(|w| !w.is_empty())?;
    match word.to_ascii_lowercase().as_str() {
        "yes" | "true" | "better" | "achieved" => Some(true),
        "no" | "false" | "worse" | "not" => Some(false),
        _ => None,
    }
}

/// `0.85`, `85%`, or `8.5/10`.
pub(crate) fn parse_score(value: &str) -> Option<f32> {
    let value = value.trim();
    if let Some(pct) = value.strip_suffix('%') {
        return pct.trim().parse::<f32>().ok().map(|p| p / 100.0);
    }
    if let Some((num, den)) = value.split_once('/') {
        let num: f32 = num.trim().parse().ok()?;
        let den: f32 = den.trim().parse().ok()?;
        return (den > 0.0).then(|| num / den);
    }
    let token = value.split_whitespace().next()?;
    token.trim_end_matches(['.', ',']).parse().ok()
}
