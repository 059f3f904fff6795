//! Static validation of runtime-imported files
//!
//! `{{#runtime-import}}` content is interpolated by the emitted workflow at
//! run time, where `${{ }}` expressions would be evaluated with the
//! workflow's credentials. Compile time is the only safe place to check
//! them, so every expression in a referenced local file must come from a
//! fixed allowlist of harmless context values.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CompilerError, Diagnostics};
use crate::imports::RuntimeImport;

static EXPRESSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{\{([^{}]*)\}\}").expect("expression regex compiles"));

/// Context values that are safe to interpolate at run time.
const ALLOWED_EXACT: &[&str] = &[
    "github.actor",
    "github.repository",
    "github.repository_owner",
    "github.workflow",
    "github.workspace",
    "github.run_id",
    "github.run_number",
    "github.server_url",
    "github.ref",
    "github.ref_name",
    "github.sha",
    "github.event_name",
    "github.triggering_actor",
];

static ALLOWED_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // github.event.<entity>.number (issue, pull_request, discussion, ...)
        Regex::new(r"^github\.event\.[A-Za-z0-9_]+\.number$").unwrap(),
        // outputs of upstream jobs and steps
        Regex::new(r"^needs\.[A-Za-z0-9_-]+\.outputs\.[A-Za-z0-9_-]+$").unwrap(),
        Regex::new(r"^steps\.[A-Za-z0-9_-]+\.outputs\.[A-Za-z0-9_-]+$").unwrap(),
    ]
});

fn is_allowed(content: &str) -> bool {
    if content.contains('\n') {
        return false;
    }
    if content.contains("secrets.") || content.contains("runner.") {
        return false;
    }
    if ALLOWED_EXACT.contains(&content) {
        return true;
    }
    ALLOWED_PATTERNS.iter().any(|re| re.is_match(content))
}

/// Validate the expressions inside one runtime-imported file's content.
pub fn validate_content(content: &str, file_display: &str) -> Diagnostics {
    let mut diags = Diagnostics::new();
    for cap in EXPRESSION_RE.captures_iter(content) {
        let body = cap[1].trim();
        if body.is_empty() {
            continue;
        }
        if !is_allowed(body) {
            diags.push(
                CompilerError::validation(
                    file_display,
                    format!("runtime import uses disallowed expression '${{{{ {body} }}}}'"),
                )
                .with_suggestion(
                    "runtime imports may only interpolate safe context values \
                     (github.actor, github.repository, github.event.*.number, \
                     needs.*.outputs.*, ...)",
                ),
            );
        }
    }
    diags
}

/// Validate every local runtime import of a workflow. All offending
/// expressions across all files are accumulated before the compile aborts.
pub fn validate_runtime_imports(imports: &[RuntimeImport], workflow_path: &str) -> Diagnostics {
    let mut diags = Diagnostics::new();
    for import in imports {
        let Some(ref resolved) = import.resolved else {
            continue;
        };
        match std::fs::read_to_string(resolved) {
            Ok(content) => {
                let display = resolved.to_string_lossy().replace('\\', "/");
                diags.extend(validate_content(&content, &display));
            }
            Err(e) if import.optional => {
                tracing::debug!(path = %resolved.display(), error = %e, "optional runtime import unreadable");
            }
            Err(e) => {
                diags.push(
                    CompilerError::import(
                        workflow_path,
                        format!("failed to read runtime import '{}'", import.raw_path),
                    )
                    .with_cause(e),
                );
            }
        }
    }
    diags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_context_values_pass() {
        let content = "Actor: ${{ github.actor }} in ${{ github.repository }}\n\
                       Issue: ${{ github.event.issue.number }}\n\
                       Output: ${{ needs.agent.outputs.text }}\n";
        let diags = validate_content(content, "ref.md");
        assert!(diags.is_empty(), "{:?}", diags.items);
    }

    #[test]
    fn secrets_are_rejected_with_the_expression_named() {
        let content = "Token: ${{ secrets.GITHUB_TOKEN }}\n";
        let diags = validate_content(content, "ref.md");
        assert!(diags.has_errors());
        assert!(diags.items[0].to_string().contains("secrets.GITHUB_TOKEN"));
    }

    #[test]
    fn runner_context_is_rejected() {
        let diags = validate_content("${{ runner.temp }}", "ref.md");
        assert!(diags.has_errors());
    }

    #[test]
    fn multi_line_expressions_are_rejected() {
        let diags = validate_content("${{ github.actor\n|| github.repository }}", "ref.md");
        assert!(diags.has_errors());
    }

    #[test]
    fn arbitrary_expressions_are_rejected() {
        let diags = validate_content("${{ github.event.issue.title }}", "ref.md");
        assert!(diags.has_errors());
    }

    #[test]
    fn all_violations_accumulate() {
        let content = "${{ secrets.A }} and ${{ runner.os }} and ${{ github.actor }}";
        let diags = validate_content(content, "ref.md");
        assert_eq!(diags.items.len(), 2);
    }

    #[test]
    fn plain_text_passes() {
        let diags = validate_content("No expressions at all.", "ref.md");
        assert!(diags.is_empty());
    }
}
