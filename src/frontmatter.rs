//! Frontmatter splitting and trigger validation
//!
//! A workflow file is YAML frontmatter between `---` fences followed by a
//! Markdown body. Main workflows need both; shared (imported) fragments may
//! carry only one of the two.

use serde_yaml::{Mapping, Value};

use crate::error::{CompilerError, Diagnostics, Result};

/// Internal frontmatter keys placed by compiler passes. They must never
/// survive into emitted YAML.
pub const MARKER_PREFIX: &str = "__gh_aw_";
pub const MARKER_SUFFIX: &str = "__";

/// A parsed workflow source file
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub frontmatter: Mapping,
    pub body: String,
}

impl SourceFile {
    pub fn has_frontmatter(&self) -> bool {
        !self.frontmatter.is_empty()
    }
}

/// Split raw file content into frontmatter and body.
///
/// `is_main` selects the strict contract: a main workflow fails without
/// frontmatter or without body; a shared fragment may omit either.
pub fn parse_source(path: &str, content: &str, is_main: bool) -> Result<SourceFile> {
    let (frontmatter_text, body) = split_fences(content);

    if is_main && frontmatter_text.is_none() {
        return Err(CompilerError::parse(path, "missing frontmatter")
            .with_suggestion("start the file with a '---' fenced YAML block"));
    }

    let frontmatter = match frontmatter_text {
        Some(text) => parse_frontmatter_yaml(path, &text)?,
        None => Mapping::new(),
    };

    if is_main && body.trim().is_empty() {
        return Err(CompilerError::parse(path, "missing markdown content")
            .with_suggestion("add the agent prompt after the closing '---' fence"));
    }

    let mut source = SourceFile {
        path: path.to_string(),
        frontmatter,
        body,
    };
    normalize_schedule(&mut source.frontmatter);
    Ok(source)
}

/// Returns (frontmatter text if fenced, body). The opening fence must be the
/// very first line.
fn split_fences(content: &str) -> (Option<String>, String) {
    let mut lines = content.lines();
    match lines.next() {
        Some(first) if first.trim_end() == "---" => {}
        _ => return (None, content.to_string()),
    }

    let mut frontmatter_lines: Vec<&str> = Vec::new();
    let mut rest: Vec<&str> = Vec::new();
    let mut in_frontmatter = true;
    for line in lines {
        if in_frontmatter && line.trim_end() == "---" {
            in_frontmatter = false;
            continue;
        }
        if in_frontmatter {
            frontmatter_lines.push(line);
        } else {
            rest.push(line);
        }
    }

    if in_frontmatter {
        // Unterminated fence: treat the whole file as body.
        return (None, content.to_string());
    }

    (Some(frontmatter_lines.join("\n")), rest.join("\n"))
}

fn parse_frontmatter_yaml(path: &str, text: &str) -> Result<Mapping> {
    let value: Value = serde_yaml::from_str(text)
        .map_err(|e| CompilerError::parse(path, format!("invalid YAML in frontmatter: {e}")))?;
    match value {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(map) => Ok(map),
        _ => Err(CompilerError::parse(path, "frontmatter must be a YAML mapping")),
    }
}

/// Normalize the `on.schedule` shape: accept a bare cron string or a single
/// `{cron: ...}` mapping and rewrite both to the canonical list-of-mappings
/// form GitHub Actions expects.
pub fn normalize_schedule(frontmatter: &mut Mapping) {
    let Some(Value::Mapping(on)) = frontmatter.get_mut("on") else {
        return;
    };
    let schedule_key = Value::String("schedule".into());
    let Some(schedule) = on.get(&schedule_key).cloned() else {
        return;
    };

    let normalized = match schedule {
        Value::String(cron) => vec![cron_entry(&cron)],
        Value::Mapping(map) => vec![Value::Mapping(map)],
        Value::Sequence(entries) => entries
            .into_iter()
            .map(|entry| match entry {
                Value::String(cron) => cron_entry(&cron),
                other => other,
            })
            .collect(),
        other => {
            on.insert(schedule_key, other);
            return;
        }
    };
    on.insert(schedule_key, Value::Sequence(normalized));
}

fn cron_entry(cron: &str) -> Value {
    let mut map = Mapping::new();
    map.insert(
        Value::String("cron".into()),
        Value::String(cron.to_string()),
    );
    Value::Mapping(map)
}

/// Validate event filters under `on:`: `branches` / `branches-ignore` are
/// mutually exclusive per event, as are `paths` / `paths-ignore`.
/// All conflicts are accumulated so the user sees them in one pass.
pub fn validate_event_filters(frontmatter: &Mapping, path: &str) -> Diagnostics {
    let mut diags = Diagnostics::new();
    let Some(Value::Mapping(on)) = frontmatter.get("on") else {
        return diags;
    };

    const EXCLUSIVE_PAIRS: [(&str, &str); 2] =
        [("branches", "branches-ignore"), ("paths", "paths-ignore")];

    for (event_key, event_value) in on {
        let Some(event) = event_key.as_str() else { continue };
        let Value::Mapping(filters) = event_value else { continue };

        for (a, b) in EXCLUSIVE_PAIRS {
            let has_a = filters.contains_key(a);
            let has_b = filters.contains_key(b);
            if has_a && has_b {
                diags.push(
                    CompilerError::validation(
                        path,
                        format!("event '{event}' declares both '{a}' and '{b}'"),
                    )
                    .with_suggestion(format!("keep one of '{a}' or '{b}' on '{event}'")),
                );
            }
        }
    }
    diags
}

pub fn is_internal_marker(key: &str) -> bool {
    key.starts_with(MARKER_PREFIX) && key.ends_with(MARKER_SUFFIX)
}

/// Recursively remove `__gh_aw_*__` keys placed by compiler passes.
pub fn strip_internal_markers(value: &mut Value) {
    match value {
        Value::Mapping(map) => {
            let marked: Vec<Value> = map
                .keys()
                .filter(|k| k.as_str().is_some_and(is_internal_marker))
                .cloned()
                .collect();
            for key in marked {
                map.remove(&key);
            }
            for (_, v) in map.iter_mut() {
                strip_internal_markers(v);
            }
        }
        Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                strip_internal_markers(v);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_file_splits_into_frontmatter_and_body() {
        let content = "---\non: push\nengine: copilot\n---\n# Hi\n";
        let source = parse_source("wf.md", content, true).unwrap();
        assert!(source.has_frontmatter());
        assert_eq!(source.body.trim(), "# Hi");
        assert!(source
            .frontmatter
            .contains_key("on"));
    }

    #[test]
    fn main_file_without_frontmatter_fails() {
        let err = parse_source("wf.md", "# Just markdown\n", true).unwrap_err();
        assert!(err.to_string().contains("missing frontmatter"));
    }

    #[test]
    fn main_file_without_body_fails() {
        let err = parse_source("wf.md", "---\non: push\n---\n\n", true).unwrap_err();
        assert!(err.to_string().contains("missing markdown content"));
    }

    #[test]
    fn shared_file_may_have_body_only() {
        let source = parse_source("inc.md", "Some shared prompt text\n", false).unwrap();
        assert!(!source.has_frontmatter());
        assert!(source.body.contains("shared prompt"));
    }

    #[test]
    fn shared_file_may_have_frontmatter_only() {
        let source = parse_source("inc.md", "---\ntools:\n  playwright:\n---\n", false).unwrap();
        assert!(source.has_frontmatter());
        assert!(source.body.trim().is_empty());
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = parse_source("wf.md", "---\non: [unclosed\n---\nbody\n", true).unwrap_err();
        assert_eq!(err.category, crate::error::Category::Parse);
        assert!(err.to_string().contains("invalid YAML"));
    }

    #[test]
    fn schedule_string_normalizes_to_cron_list() {
        let content = "---\non:\n  schedule: '0 9 * * 1'\n---\nbody\n";
        let source = parse_source("wf.md", content, true).unwrap();
        let on = source.frontmatter.get("on").unwrap();
        let schedule = &on["schedule"];
        assert!(schedule.is_sequence());
        assert_eq!(schedule[0]["cron"], Value::String("0 9 * * 1".into()));
    }

    #[test]
    fn schedule_string_entries_normalize_inside_list() {
        let content = "---\non:\n  schedule:\n    - '0 9 * * 1'\n    - cron: '0 12 * * 2'\n---\nbody\n";
        // second entry already canonical; first should be wrapped
        let source = parse_source("wf.md", content, true).unwrap();
        let on = source.frontmatter.get("on").unwrap();
        assert!(on["schedule"][0]["cron"].is_string());
        assert!(on["schedule"][1]["cron"].is_string());
    }

    #[test]
    fn branches_and_branches_ignore_conflict() {
        let content = "---\non:\n  push:\n    branches: [main]\n    branches-ignore: [dev]\n---\nbody\n";
        let source = parse_source("wf.md", content, true).unwrap();
        let diags = validate_event_filters(&source.frontmatter, "wf.md");
        assert!(diags.has_errors());
        assert!(diags.items[0]
            .to_string()
            .contains("event 'push' declares both 'branches' and 'branches-ignore'"));
    }

    #[test]
    fn paths_conflicts_accumulate_with_branches_conflicts() {
        let content = "---\non:\n  pull_request:\n    branches: [main]\n    branches-ignore: [dev]\n    paths: [src]\n    paths-ignore: [docs]\n---\nbody\n";
        let source = parse_source("wf.md", content, true).unwrap();
        let diags = validate_event_filters(&source.frontmatter, "wf.md");
        assert_eq!(diags.items.len(), 2);
    }

    #[test]
    fn string_trigger_has_no_filter_conflicts() {
        let content = "---\non: push\n---\nbody\n";
        let source = parse_source("wf.md", content, true).unwrap();
        let diags = validate_event_filters(&source.frontmatter, "wf.md");
        assert!(diags.is_empty());
    }

    #[test]
    fn marker_detection() {
        assert!(is_internal_marker("__gh_aw_activation__"));
        assert!(!is_internal_marker("__gh_aw_activation"));
        assert!(!is_internal_marker("on"));
    }

    #[test]
    fn markers_are_stripped_recursively() {
        let mut value: Value = serde_yaml::from_str(
            "on: push\n__gh_aw_stop_after__: '2026-01-01'\njobs:\n  agent:\n    __gh_aw_engine__: copilot\n    runs-on: ubuntu-latest\n",
        )
        .unwrap();
        strip_internal_markers(&mut value);
        let text = serde_yaml::to_string(&value).unwrap();
        assert!(!text.contains("__gh_aw_"));
        assert!(text.contains("runs-on"));
    }
}
