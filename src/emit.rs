//! Lock-file YAML emission
//!
//! Output is byte-identical across runs for identical input: keys are
//! written in a fixed order, event keys under `on:` follow a stable
//! priority group, and nothing time- or host-dependent is embedded. After
//! serialization a few GitHub-Actions-specific fixups run over the text:
//! `"on":` is unquoted, `key: null` events become bare `key:`, and the
//! first `workflow_run:` trigger gets a zizmor suppression when the
//! activation job carries the matching safety checks.

use serde_yaml::{Mapping, Value};

use crate::error::{CompilerError, Result};
use crate::frontmatter;

/// Banner logo. Leading spaces are part of the alignment; only trailing
/// newlines are trimmed before emission.
const LOGO: &str = r"
                _  __ _
  _ __ ___   __| |/ _| | _____      __
 | '_ ` _ \ / _` | |_| |/ _ \ \ /\ / /
 | | | | | | (_| |  _| | (_) \ V  V /
 |_| |_| |_|\__,_|_| |_|\___/ \_/\_/
";

/// Event keys emitted ahead of the alphabetic rest under `on:`
const ON_PRIORITY: [&str; 4] = ["push", "pull_request", "issues", "workflow_dispatch"];

/// Top-level keys emitted ahead of the alphabetic rest
const TOP_PRIORITY: [&str; 7] = [
    "name",
    "on",
    "run-name",
    "permissions",
    "concurrency",
    "env",
    "defaults",
];

#[derive(Debug, Default)]
pub struct LockFile {
    pub name: String,
    pub on: Value,
    pub run_name: Option<Value>,
    pub permissions: Option<Value>,
    pub concurrency: Option<Value>,
    pub env: Option<Value>,
    pub defaults: Option<Value>,
    /// Remaining top-level keys, emitted alphabetically before `jobs`
    pub extra: Vec<(String, Value)>,
    pub jobs: Value,
    /// Contributing file paths, forward slashes, resolution order
    pub manifest: Vec<String>,
    /// Top-level Markdown source path
    pub source: String,
    /// Insert the zizmor suppression under the first `workflow_run:` event
    pub zizmor_workflow_run: bool,
}

impl LockFile {
    /// Render the complete `.lock.yml` content.
    pub fn render(&self) -> Result<String> {
        let mut doc = Mapping::new();
        doc.insert(Value::String("name".into()), Value::String(self.name.clone()));
        doc.insert(Value::String("on".into()), order_on_events(self.on.clone()));
        if let Some(run_name) = &self.run_name {
            doc.insert(Value::String("run-name".into()), run_name.clone());
        }
        if let Some(permissions) = &self.permissions {
            doc.insert(Value::String("permissions".into()), permissions.clone());
        }
        if let Some(concurrency) = &self.concurrency {
            doc.insert(Value::String("concurrency".into()), concurrency.clone());
        }
        if let Some(env) = &self.env {
            doc.insert(Value::String("env".into()), env.clone());
        }
        if let Some(defaults) = &self.defaults {
            doc.insert(Value::String("defaults".into()), defaults.clone());
        }
        let mut extra = self.extra.clone();
        extra.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (key, value) in extra {
            if TOP_PRIORITY.contains(&key.as_str()) || key == "jobs" {
                continue;
            }
            doc.insert(Value::String(key), value);
        }
        doc.insert(Value::String("jobs".into()), self.jobs.clone());

        let mut doc = Value::Mapping(doc);
        frontmatter::strip_internal_markers(&mut doc);

        let yaml = serde_yaml::to_string(&doc).map_err(|e| {
            CompilerError::emit(&self.source, format!("failed to marshal workflow YAML: {e}"))
        })?;
        let yaml = unquote_on_key(&yaml);
        let yaml = rewrite_null_events(&yaml);
        let yaml = if self.zizmor_workflow_run {
            annotate_workflow_run(&yaml)
        } else {
            yaml
        };

        Ok(format!("{}{yaml}", self.header()))
    }

    fn header(&self) -> String {
        let mut header = String::new();
        for line in LOGO.trim_end_matches('\n').lines() {
            if line.is_empty() {
                header.push_str("#\n");
            } else {
                header.push_str("# ");
                header.push_str(line);
                header.push('\n');
            }
        }
        header.push_str("#\n");
        header.push_str("# Resolved workflow manifest:\n");
        for path in &self.manifest {
            header.push_str("#   - ");
            header.push_str(&path.replace('\\', "/"));
            header.push('\n');
        }
        header.push_str("#\n");
        header.push_str("# Source: ");
        header.push_str(&self.source.replace('\\', "/"));
        header.push_str("\n#\n");
        header.push_str("# Do not edit: regenerate with `mdflow compile`.\n\n");
        header
    }
}

/// Priority events first, then the rest alphabetically.
fn order_on_events(on: Value) -> Value {
    let Value::Mapping(map) = on else {
        return on;
    };

    let mut ordered = Mapping::new();
    for event in ON_PRIORITY {
        if let Some(value) = map.get(event) {
            ordered.insert(Value::String(event.into()), value.clone());
        }
    }
    let mut rest: Vec<(String, Value)> = map
        .iter()
        .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), v.clone())))
        .filter(|(k, _)| !ON_PRIORITY.contains(&k.as_str()))
        .collect();
    rest.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (key, value) in rest {
        ordered.insert(Value::String(key), value);
    }
    Value::Mapping(ordered)
}

/// The YAML library may quote `on` (YAML 1.1 treats it as a boolean alias).
/// GitHub Actions wants it bare.
fn unquote_on_key(yaml: &str) -> String {
    yaml.lines()
        .map(|line| {
            if line == "\"on\":" || line == "'on':" {
                "on:".to_string()
            } else if let Some(rest) = line.strip_prefix("\"on\": ") {
                format!("on: {rest}")
            } else if let Some(rest) = line.strip_prefix("'on': ") {
                format!("on: {rest}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        + "\n"
}

/// Inside the top-level `on:` block, `key: null` becomes bare `key:`,
/// the empty-event form GitHub Actions requires.
fn rewrite_null_events(yaml: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_on = false;
    for line in yaml.lines() {
        let at_top_level = !line.starts_with(' ') && !line.is_empty();
        if at_top_level {
            in_on = line == "on:" || line.starts_with("on: ");
        }
        if in_on && line.starts_with(' ') && line.ends_with(": null") {
            out.push(line.trim_end_matches(" null").to_string());
        } else {
            out.push(line.to_string());
        }
    }
    out.join("\n") + "\n"
}

/// Insert `# zizmor: ignore[dangerous-triggers]` as the first child of the
/// first `workflow_run:` event under `on:`.
fn annotate_workflow_run(yaml: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_on = false;
    let mut annotated = false;
    for line in yaml.lines() {
        let at_top_level = !line.starts_with(' ') && !line.is_empty();
        if at_top_level {
            in_on = line == "on:" || line.starts_with("on: ");
        }
        out.push(line.to_string());
        if !annotated && in_on && line.trim_end() == "  workflow_run:" {
            out.push("    # zizmor: ignore[dangerous-triggers]".to_string());
            annotated = true;
        }
    }
    out.join("\n") + "\n"
}
