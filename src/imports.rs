//! Import resolution for workflow files
//!
//! A main workflow pulls in shared fragments three ways: the `imports:`
//! frontmatter list, `{{#import <path>}}` body directives (inlined at
//! compile time), and `{{#runtime-import <path>[:start-end]}}` directives
//! (validated here, resolved by the emitted workflow at run time). Paths
//! are relative to the including file; URLs stay opaque at compile time.
//!
//! The resolver owns all nodes for the duration of one resolution and
//! tracks in-progress files to turn revisits into a cycle diagnostic.

use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde_yaml::{Mapping, Value};

use crate::error::{CompilerError, Result};
use crate::frontmatter::{self, SourceFile};

static IMPORT_DIRECTIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{#(import|runtime-import)(\?)?\s+([^}\s][^}]*?)\s*\}\}")
        .expect("import directive regex compiles")
});

static LINE_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*):(\d+)-(\d+)$").expect("line range regex compiles"));

/// A `{{#runtime-import}}` dependency the emitted workflow reads at run time
#[derive(Debug, Clone)]
pub struct RuntimeImport {
    /// Path as written in the directive (without any line range)
    pub raw_path: String,
    /// Resolved on-disk location for local files; `None` for URLs
    pub resolved: Option<PathBuf>,
    /// `{{#runtime-import? ...}}` marks the dependency optional
    pub optional: bool,
    /// Optional `:start-end` line range
    pub line_range: Option<(usize, usize)>,
}

/// The result of merging a main workflow with its transitive imports
#[derive(Debug)]
pub struct ResolvedWorkflow {
    /// Path of the top-level Markdown file, forward slashes
    pub path: String,
    /// Merged frontmatter (main wins; `imports:` consumed)
    pub frontmatter: Mapping,
    /// Assembled prompt body, before expression rewriting
    pub body: String,
    /// Every contributing file path, once, in resolution order
    pub manifest: Vec<String>,
    pub runtime_imports: Vec<RuntimeImport>,
}

/// Resolve a main workflow file and its import closure.
pub fn resolve_workflow(path: &Path) -> Result<ResolvedWorkflow> {
    let mut resolver = ImportResolver::new();
    let display = display_path(path);
    let node = resolver.resolve_file(path, &display, true)?;

    let mut frontmatter = node.frontmatter;
    frontmatter.remove("imports");

    Ok(ResolvedWorkflow {
        path: display,
        frontmatter,
        body: node.body,
        manifest: resolver.manifest,
        runtime_imports: resolver.runtime_imports,
    })
}

struct ResolvedNode {
    frontmatter: Mapping,
    body: String,
}

struct ImportResolver {
    /// Canonical paths currently being resolved (cycle detection)
    visiting: FxHashSet<PathBuf>,
    /// Display paths in stack order, for the cycle diagnostic
    visiting_stack: Vec<String>,
    manifest: Vec<String>,
    runtime_imports: Vec<RuntimeImport>,
}

impl ImportResolver {
    fn new() -> Self {
        Self {
            visiting: FxHashSet::default(),
            visiting_stack: Vec::new(),
            manifest: Vec::new(),
            runtime_imports: Vec::new(),
        }
    }

    fn resolve_file(&mut self, path: &Path, display: &str, is_main: bool) -> Result<ResolvedNode> {
        let canonical = path.canonicalize().map_err(|e| {
            let category = if is_main {
                CompilerError::parse(display, format!("failed to read file: {e}"))
            } else {
                CompilerError::import(display, format!("import not found: {display}"))
            };
            category.with_cause(e)
        })?;

        if self.visiting.contains(&canonical) {
            let mut chain: Vec<&str> = self
                .visiting_stack
                .iter()
                .skip_while(|p| {
                    !same_file(p, display)
                })
                .map(|s| s.as_str())
                .collect();
            chain.push(display);
            return Err(CompilerError::import(
                display,
                format!("import cycle: {}", chain.join(" → ")),
            ));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            CompilerError::import(display, format!("failed to read import: {e}")).with_cause(e)
        })?;
        let source = frontmatter::parse_source(display, &content, is_main)?;

        if !self.manifest.iter().any(|p| p == display) {
            self.manifest.push(display.to_string());
        }

        self.visiting.insert(canonical.clone());
        self.visiting_stack.push(display.to_string());

        let result = self.resolve_source(path, source);

        self.visiting.remove(&canonical);
        self.visiting_stack.pop();

        result
    }

    fn resolve_source(&mut self, path: &Path, source: SourceFile) -> Result<ResolvedNode> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let display = source.path.clone();

        // Fragments contributing frontmatter, in resolution order.
        let mut fragments: Vec<Mapping> = Vec::new();
        // Bodies of frontmatter-list imports get appended after the main body.
        let mut appended_bodies: Vec<String> = Vec::new();

        if let Some(Value::Sequence(imports)) = source.frontmatter.get("imports") {
            let imports = imports.clone();
            for entry in imports {
                let Some(spec) = entry.as_str() else {
                    return Err(CompilerError::validation(
                        &display,
                        "imports entries must be strings",
                    ));
                };
                if is_url(spec) {
                    // URLs are opaque at compile time.
                    continue;
                }
                let child_path = parent.join(spec);
                let child_display = display_path(&child_path);
                let child = self.resolve_file(&child_path, &child_display, false)?;
                if !child.body.trim().is_empty() {
                    appended_bodies.push(child.body.trim_end().to_string());
                }
                fragments.push(child.frontmatter);
            }
        }

        let body = self.assemble_body(&source.body, parent, &display, &mut fragments)?;

        // Merge sibling fragments first (conflicts are errors), then let the
        // main file win on whatever remains.
        let mut merged_imports = Mapping::new();
        for fragment in fragments {
            merge_import_fragment(&mut merged_imports, fragment, &display)?;
        }
        let frontmatter = merge_main_over_imports(source.frontmatter, merged_imports);

        let mut full_body = body.trim_end().to_string();
        for appended in appended_bodies {
            if !full_body.is_empty() {
                full_body.push_str("\n\n");
            }
            full_body.push_str(&appended);
        }
        if !full_body.is_empty() {
            full_body.push('\n');
        }

        Ok(ResolvedNode {
            frontmatter,
            body: full_body,
        })
    }

    /// Substitute `{{#import}}` directives, record `{{#runtime-import}}`.
    fn assemble_body(
        &mut self,
        body: &str,
        parent: &Path,
        display: &str,
        fragments: &mut Vec<Mapping>,
    ) -> Result<String> {
        let mut out = String::with_capacity(body.len());
        let mut last_end = 0;

        let captures: Vec<regex::Captures> = IMPORT_DIRECTIVE_RE.captures_iter(body).collect();
        for cap in captures {
            let whole = cap.get(0).unwrap();
            let kind = &cap[1];
            let optional = cap.get(2).is_some();
            let spec = cap[3].trim().to_string();

            out.push_str(&body[last_end..whole.start()]);
            last_end = whole.end();

            match kind {
                "import" => {
                    if is_url(&spec) {
                        return Err(CompilerError::import(
                            display,
                            format!("URL imports cannot be inlined at compile time: {spec}"),
                        )
                        .with_suggestion("use {{#runtime-import}} for URLs"));
                    }
                    let child_path = parent.join(&spec);
                    let child_display = display_path(&child_path);
                    match self.resolve_file(&child_path, &child_display, false) {
                        Ok(child) => {
                            out.push_str(child.body.trim_end());
                            fragments.push(child.frontmatter);
                        }
                        Err(e)
                            if optional
                                && e.category == crate::error::Category::Import
                                && e.message.contains("not found") =>
                        {
                            // {{#import? ...}}: a missing file is fine.
                        }
                        Err(e) => return Err(e),
                    }
                }
                "runtime-import" => {
                    let (raw_path, line_range) = split_line_range(&spec)?;
                    let resolved = if is_url(&raw_path) {
                        None
                    } else {
                        let child_path = parent.join(&raw_path);
                        if !child_path.exists() && !optional {
                            return Err(CompilerError::import(
                                display,
                                format!("runtime import not found: {raw_path}"),
                            ));
                        }
                        child_path.exists().then_some(child_path)
                    };
                    self.runtime_imports.push(RuntimeImport {
                        raw_path,
                        resolved,
                        optional,
                        line_range,
                    });
                    // The directive stays in the prompt; the emitted workflow
                    // resolves it at run time.
                    out.push_str(whole.as_str());
                }
                _ => unreachable!("regex only matches import kinds"),
            }
        }
        out.push_str(&body[last_end..]);
        Ok(out)
    }
}

fn split_line_range(spec: &str) -> Result<(String, Option<(usize, usize)>)> {
    if let Some(cap) = LINE_RANGE_RE.captures(spec) {
        let path = cap[1].to_string();
        // URL port numbers never match here: the pattern needs `N-N`.
        let start: usize = cap[2].parse().unwrap_or(0);
        let end: usize = cap[3].parse().unwrap_or(0);
        if start == 0 || end < start {
            return Err(CompilerError::validation(
                &path,
                format!("invalid line range '{}-{}' in runtime import", &cap[2], &cap[3]),
            ));
        }
        return Ok((path, Some((start, end))));
    }
    Ok((spec.to_string(), None))
}

fn is_url(spec: &str) -> bool {
    url::Url::parse(spec)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Lexically cleaned display path with forward slashes.
fn display_path(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.last().map(|p| p != "..").unwrap_or(false) {
                    parts.pop();
                } else {
                    parts.push("..".to_string());
                }
            }
            Component::RootDir => parts.push(String::new()),
            Component::Prefix(p) => parts.push(p.as_os_str().to_string_lossy().into_owned()),
            Component::Normal(p) => parts.push(p.to_string_lossy().into_owned()),
        }
    }
    parts.join("/")
}

fn same_file(display_a: &str, display_b: &str) -> bool {
    display_a == display_b
}

/// Merge one imported fragment into the accumulated import frontmatter.
/// Same-key conflicts between two imports are errors unless the values are
/// identical; `tools` / `mcp-servers` merge per key recursively.
fn merge_import_fragment(base: &mut Mapping, fragment: Mapping, path: &str) -> Result<()> {
    for (key, value) in fragment {
        let key_str = key.as_str().unwrap_or_default().to_string();
        if key_str == "imports" {
            continue;
        }
        match base.get_mut(&key) {
            None => {
                base.insert(key, value);
            }
            Some(existing) => {
                if key_str == "tools" || key_str == "mcp-servers" {
                    merge_value_strict(existing, value, &key_str, path)?;
                } else if *existing != value {
                    return Err(CompilerError::import(
                        path,
                        format!(
                            "conflicting values for '{key_str}' between imported fragments"
                        ),
                    )
                    .with_suggestion(format!(
                        "override '{key_str}' in the main workflow to resolve the conflict"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Recursive merge where a leaf conflict between two imports is an error.
fn merge_value_strict(existing: &mut Value, incoming: Value, keypath: &str, path: &str) -> Result<()> {
    match (existing, incoming) {
        (Value::Mapping(a), Value::Mapping(b)) => {
            for (key, value) in b {
                let sub = key.as_str().unwrap_or_default().to_string();
                match a.get_mut(&key) {
                    None => {
                        a.insert(key, value);
                    }
                    Some(nested) => {
                        merge_value_strict(nested, value, &format!("{keypath}.{sub}"), path)?;
                    }
                }
            }
            Ok(())
        }
        (a, b) => {
            if *a == b {
                Ok(())
            } else {
                Err(CompilerError::import(
                    path,
                    format!("conflicting values for '{keypath}' between imported fragments"),
                ))
            }
        }
    }
}

/// Main frontmatter wins on any collision; `tools` / `mcp-servers` merge
/// per key recursively with the main side winning at leaves. Sequences are
/// never merged.
fn merge_main_over_imports(main: Mapping, imports: Mapping) -> Mapping {
    let mut result = imports;
    for (key, value) in main {
        let key_str = key.as_str().unwrap_or_default().to_string();
        if (key_str == "tools" || key_str == "mcp-servers") && result.contains_key(&key) {
            let mut existing = result.remove(&key).unwrap();
            merge_value_main_wins(&mut existing, value);
            result.insert(key, existing);
        } else {
            result.insert(key, value);
        }
    }
    result
}

fn merge_value_main_wins(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Mapping(a), Value::Mapping(b)) => {
            for (key, value) in b {
                match a.get_mut(&key) {
                    None => {
                        a.insert(key, value);
                    }
                    Some(nested) => merge_value_main_wins(nested, value),
                }
            }
        }
        (a, b) => *a = b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn single_file_resolves_with_manifest() {
        let dir = TempDir::new().unwrap();
        let main = write(&dir, "main.md", "---\non: push\nengine: copilot\n---\n# Hi\n");

        let resolved = resolve_workflow(&main).unwrap();
        assert_eq!(resolved.manifest.len(), 1);
        assert!(resolved.manifest[0].ends_with("main.md"));
        assert!(!resolved.manifest[0].contains('\\'));
        assert!(resolved.body.contains("# Hi"));
    }

    #[test]
    fn body_import_is_inlined() {
        let dir = TempDir::new().unwrap();
        write(&dir, "shared.md", "Shared instructions here.\n");
        let main = write(
            &dir,
            "main.md",
            "---\non: push\n---\nIntro.\n\n{{#import shared.md}}\n\nOutro.\n",
        );

        let resolved = resolve_workflow(&main).unwrap();
        assert!(resolved.body.contains("Shared instructions here."));
        assert!(!resolved.body.contains("{{#import"));
        assert_eq!(resolved.manifest.len(), 2);
    }

    #[test]
    fn frontmatter_imports_merge_tools_per_key() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "tools.md",
            "---\ntools:\n  playwright:\n  github:\n    toolsets: [repos]\n---\n",
        );
        let main = write(
            &dir,
            "main.md",
            "---\non: push\nimports:\n  - tools.md\ntools:\n  github:\n    toolsets: [issues]\n---\nbody\n",
        );

        let resolved = resolve_workflow(&main).unwrap();
        let tools = resolved.frontmatter.get("tools").unwrap();
        // Main wins on the github sub-key; playwright arrives from the import.
        assert_eq!(tools["github"]["toolsets"][0], Value::String("issues".into()));
        assert!(tools
            .as_mapping()
            .unwrap()
            .contains_key("playwright"));
        // imports: is consumed
        assert!(!resolved.frontmatter.contains_key("imports"));
    }

    #[test]
    fn main_scalar_wins_over_import() {
        let dir = TempDir::new().unwrap();
        write(&dir, "shared.md", "---\nengine: claude\ntimeout_minutes: 30\n---\n");
        let main = write(
            &dir,
            "main.md",
            "---\non: push\nengine: copilot\nimports: [shared.md]\n---\nbody\n",
        );

        let resolved = resolve_workflow(&main).unwrap();
        assert_eq!(
            resolved.frontmatter.get("engine").unwrap(),
            &Value::String("copilot".into())
        );
        // Non-conflicting import key survives.
        assert_eq!(
            resolved.frontmatter.get("timeout_minutes").unwrap(),
            &Value::Number(30.into())
        );
    }

    #[test]
    fn sibling_import_conflict_is_an_error() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.md", "---\ntools:\n  github:\n    read-only: true\n---\n");
        write(&dir, "b.md", "---\ntools:\n  github:\n    read-only: false\n---\n");
        let main = write(
            &dir,
            "main.md",
            "---\non: push\nimports: [a.md, b.md]\n---\nbody\n",
        );

        let err = resolve_workflow(&main).unwrap_err();
        assert!(err.to_string().contains("conflicting values"));
        assert!(err.to_string().contains("tools.github.read-only"));
    }

    #[test]
    fn identical_sibling_values_do_not_conflict() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.md", "---\ntools:\n  github:\n    read-only: true\n---\n");
        write(&dir, "b.md", "---\ntools:\n  github:\n    read-only: true\n---\n");
        let main = write(
            &dir,
            "main.md",
            "---\non: push\nimports: [a.md, b.md]\n---\nbody\n",
        );

        assert!(resolve_workflow(&main).is_ok());
    }

    #[test]
    fn import_cycle_is_reported_with_chain() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.md", "{{#import b.md}}\n");
        write(&dir, "b.md", "{{#import a.md}}\n");
        let main = write(&dir, "main.md", "---\non: push\n---\n{{#import a.md}}\n");

        let err = resolve_workflow(&main).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("import cycle:"), "{msg}");
        assert!(msg.contains(" → "), "{msg}");
    }

    #[test]
    fn self_import_is_a_cycle() {
        let dir = TempDir::new().unwrap();
        let main = write(&dir, "main.md", "---\non: push\n---\n{{#import main.md}}\n");
        let err = resolve_workflow(&main).unwrap_err();
        assert!(err.to_string().contains("import cycle:"));
    }

    #[test]
    fn missing_import_is_an_import_error() {
        let dir = TempDir::new().unwrap();
        let main = write(&dir, "main.md", "---\non: push\n---\n{{#import nope.md}}\n");
        let err = resolve_workflow(&main).unwrap_err();
        assert_eq!(err.category, crate::error::Category::Import);
        assert!(err.to_string().contains("import not found"));
    }

    #[test]
    fn optional_import_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        let main = write(&dir, "main.md", "---\non: push\n---\nBody.\n{{#import? nope.md}}\n");
        assert!(resolve_workflow(&main).is_ok());
    }

    #[test]
    fn diamond_import_lists_each_path_once() {
        let dir = TempDir::new().unwrap();
        write(&dir, "base.md", "Base text.\n");
        write(&dir, "left.md", "{{#import base.md}}\n");
        write(&dir, "right.md", "{{#import base.md}}\n");
        let main = write(
            &dir,
            "main.md",
            "---\non: push\n---\n{{#import left.md}}\n{{#import right.md}}\n",
        );

        let resolved = resolve_workflow(&main).unwrap();
        let base_entries = resolved
            .manifest
            .iter()
            .filter(|p| p.ends_with("base.md"))
            .count();
        assert_eq!(base_entries, 1);
        assert_eq!(resolved.manifest.len(), 4);
    }

    #[test]
    fn runtime_import_is_recorded_not_inlined() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ref.md", "Reference content.\n");
        let main = write(
            &dir,
            "main.md",
            "---\non: push\n---\nSee {{#runtime-import ref.md}} for details.\n",
        );

        let resolved = resolve_workflow(&main).unwrap();
        assert!(resolved.body.contains("{{#runtime-import ref.md}}"));
        assert_eq!(resolved.runtime_imports.len(), 1);
        assert_eq!(resolved.runtime_imports[0].raw_path, "ref.md");
        assert!(resolved.runtime_imports[0].resolved.is_some());
        assert!(!resolved.runtime_imports[0].optional);
    }

    #[test]
    fn runtime_import_line_range_parses() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ref.md", "line1\nline2\nline3\n");
        let main = write(
            &dir,
            "main.md",
            "---\non: push\n---\n{{#runtime-import ref.md:2-3}}\n",
        );

        let resolved = resolve_workflow(&main).unwrap();
        assert_eq!(resolved.runtime_imports[0].line_range, Some((2, 3)));
        assert_eq!(resolved.runtime_imports[0].raw_path, "ref.md");
    }

    #[test]
    fn missing_runtime_import_fails_unless_optional() {
        let dir = TempDir::new().unwrap();
        let main = write(&dir, "main.md", "---\non: push\n---\n{{#runtime-import gone.md}}\n");
        let err = resolve_workflow(&main).unwrap_err();
        assert!(err.to_string().contains("runtime import not found"));

        let main2 = write(&dir, "main2.md", "---\non: push\n---\n{{#runtime-import? gone.md}}\n");
        let resolved = resolve_workflow(&main2).unwrap();
        assert!(resolved.runtime_imports[0].optional);
        assert!(resolved.runtime_imports[0].resolved.is_none());
    }

    #[test]
    fn url_imports_stay_opaque() {
        let dir = TempDir::new().unwrap();
        let main = write(
            &dir,
            "main.md",
            "---\non: push\nimports:\n  - https://example.com/shared.md\n---\nBody.\n{{#runtime-import https://example.com/live.md}}\n",
        );

        let resolved = resolve_workflow(&main).unwrap();
        assert_eq!(resolved.manifest.len(), 1);
        assert_eq!(resolved.runtime_imports.len(), 1);
        assert!(resolved.runtime_imports[0].resolved.is_none());
    }
}
