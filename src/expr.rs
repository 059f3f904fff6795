//! GitHub Actions expression extraction
//!
//! Scans prompt text for `${{ ... }}` expressions, assigns each distinct
//! expression a deterministic environment variable name, and rewrites the
//! prompt with `__NAME__` placeholders. The emitted workflow passes the
//! original expressions as step `env:` entries, so the agent-facing prompt
//! contains no expression syntax at all.

use std::hash::Hasher;

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHasher;

/// `${{ content }}` with any non-brace content
static EXPRESSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{\{([^{}]*)\}\}").expect("expression regex compiles"));

/// Simple dotted path: `github.actor`, `needs.agent.outputs.text`, ...
static SIMPLE_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("path regex compiles"));

/// One extracted expression and the env var that will carry its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionMapping {
    /// Trimmed expression body, e.g. `github.repository`
    pub content: String,
    /// Deterministic identifier, e.g. `GH_AW_GITHUB_REPOSITORY`
    pub env_var: String,
}

/// Derive the env var name for a trimmed expression body.
///
/// Simple dotted paths get a readable `GH_AW_<UPPER_SNAKE>` form; anything
/// with operators or literals falls back to a stable 40-bit digest.
pub fn derive_env_var(content: &str) -> String {
    let content = content.trim();
    if SIMPLE_PATH_RE.is_match(content) {
        let upper = content.replace('.', "_").to_uppercase();
        format!("GH_AW_{upper}")
    } else {
        format!("GH_AW_EXPR_{}", short_digest(content))
    }
}

/// 40-bit hex digest of the trimmed content. FxHasher is unseeded and
/// deterministic, so the same content always yields the same digest.
fn short_digest(content: &str) -> String {
    let mut hasher = FxHasher::default();
    hasher.write(content.as_bytes());
    let hash = hasher.finish() & 0xFF_FFFF_FFFF;
    format!("{hash:010x}")
}

/// Extract every distinct expression from the prompt, in order of first
/// occurrence. Textually identical contents map to one entry.
pub fn extract(prompt: &str) -> Vec<ExpressionMapping> {
    let mut mappings: Vec<ExpressionMapping> = Vec::new();
    for cap in EXPRESSION_RE.captures_iter(prompt) {
        let content = cap[1].trim().to_string();
        if content.is_empty() {
            continue;
        }
        if mappings.iter().any(|m| m.content == content) {
            continue;
        }
        let env_var = derive_env_var(&content);
        mappings.push(ExpressionMapping { content, env_var });
    }
    mappings
}

/// Rewrite the prompt, replacing each `${{ ... }}` with the double-underscore
/// placeholder of its env var.
pub fn replace(prompt: &str) -> String {
    EXPRESSION_RE
        .replace_all(prompt, |cap: &regex::Captures| {
            let content = cap[1].trim();
            if content.is_empty() {
                // Nothing to name; drop the empty expression entirely.
                String::new()
            } else {
                format!("__{}__", derive_env_var(content))
            }
        })
        .into_owned()
}
