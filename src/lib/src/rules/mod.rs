//! Artifact rules: the pattern language, the rule parser, and the engine that
//! applies a rule list to a step's recorded artifacts.

mod engine;
mod glob;
mod rule;

pub use engine::*;
pub use glob::Glob;
pub use rule::{ArtifactRule, ArtifactType, MatchDestination, RuleVerb};

/// Lexically normalize a `/`-separated path: collapse repeated separators,
/// drop `.` elements and resolve `..` against the preceding element.
pub(crate) fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if !rooted => parts.push(".."),
                _ => {}
            },
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
