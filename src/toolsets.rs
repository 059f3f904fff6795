//! GitHub toolset registry and permission inference
//!
//! The toolset-permissions table is the single source of truth for which
//! GitHub permissions each toolset of the `github` MCP server requires. It
//! is loaded once from an embedded JSON resource and read-only thereafter.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::error::{CompilerError, Diagnostics, WarningCode};
use crate::permissions::{Level, Permissions, Scope};

/// Toolsets the `default` sentinel expands to.
pub const DEFAULT_TOOLSETS: [&str; 4] = ["context", "repos", "issues", "pull_requests"];

/// Per-toolset entry in the embedded table
#[derive(Debug, Deserialize)]
struct ToolsetEntryRaw {
    read: BTreeMap<String, String>,
    write: BTreeMap<String, String>,
    #[serde(default)]
    tools: Vec<String>,
}

/// Typed view over one toolset's requirements
#[derive(Debug)]
pub struct ToolsetInfo {
    /// Permissions required when the github tool is read-only
    pub read_required: Permissions,
    /// Permissions required with write access
    pub write_required: Permissions,
    /// Tool names the toolset exposes
    pub tools: Vec<String>,
}

const TOOLSET_PERMISSIONS_JSON: &str = include_str!("data/toolset_permissions.json");

/// toolset name -> requirements, initialized once at first use.
static TOOLSET_PERMISSIONS: Lazy<BTreeMap<String, ToolsetInfo>> = Lazy::new(|| {
    let raw: BTreeMap<String, ToolsetEntryRaw> = serde_json::from_str(TOOLSET_PERMISSIONS_JSON)
        .expect("embedded toolset permissions table is valid JSON");

    raw.into_iter()
        .map(|(name, entry)| {
            let info = ToolsetInfo {
                read_required: permissions_from_table(&entry.read, &name),
                write_required: permissions_from_table(&entry.write, &name),
                tools: entry.tools,
            };
            (name, info)
        })
        .collect()
});

fn permissions_from_table(table: &BTreeMap<String, String>, toolset: &str) -> Permissions {
    let mut perms = Permissions::new();
    for (scope_str, level_str) in table {
        let scope = Scope::parse(scope_str).unwrap_or_else(|| {
            panic!("embedded table: unknown scope '{scope_str}' in toolset '{toolset}'")
        });
        let level = Level::parse(level_str).unwrap_or_else(|| {
            panic!("embedded table: unknown level '{level_str}' in toolset '{toolset}'")
        });
        perms.set(scope, level);
    }
    perms
}

pub fn lookup(toolset: &str) -> Option<&'static ToolsetInfo> {
    TOOLSET_PERMISSIONS.get(toolset)
}

pub fn is_known(toolset: &str) -> bool {
    TOOLSET_PERMISSIONS.contains_key(toolset)
}

pub fn known_toolsets() -> impl Iterator<Item = &'static str> {
    TOOLSET_PERMISSIONS.keys().map(|s| s.as_str())
}

pub fn toolset_count() -> usize {
    TOOLSET_PERMISSIONS.len()
}

/// Expand a toolset list: the `default` sentinel expands to
/// [`DEFAULT_TOOLSETS`], `all` to every toolset in the table. Entries are
/// trimmed, first-occurrence order is preserved, duplicates are dropped.
/// An empty input means `default`.
pub fn expand_toolsets(entries: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |name: &str, out: &mut Vec<String>| {
        if !name.is_empty() && !out.iter().any(|t| t == name) {
            out.push(name.to_string());
        }
    };

    if entries.is_empty() {
        for ts in DEFAULT_TOOLSETS {
            push(ts, &mut out);
        }
        return out;
    }

    for entry in entries {
        let entry = entry.trim();
        match entry {
            "default" => {
                for ts in DEFAULT_TOOLSETS {
                    push(ts, &mut out);
                }
            }
            "all" => {
                for ts in TOOLSET_PERMISSIONS.keys() {
                    push(ts, &mut out);
                }
            }
            other => push(other, &mut out),
        }
    }
    out
}

/// Union of required permissions over the selected toolsets.
/// Read-only mode takes each toolset's read requirement instead.
pub fn infer_permissions(toolsets: &[String], read_only: bool) -> Permissions {
    let mut required = Permissions::new();
    for name in toolsets {
        if let Some(info) = lookup(name) {
            let source = if read_only {
                &info.read_required
            } else {
                &info.write_required
            };
            required.union(source);
        }
    }
    required
}

/// Check the user's declared permissions against what the selected toolsets
/// require. Accumulates one diagnostic listing every missing grant with both
/// remediation paths; strict mode escalates it via [`WarningCode`].
pub fn validate_declared_permissions(
    toolsets: &[String],
    read_only: bool,
    declared: &Permissions,
    path: &str,
) -> Diagnostics {
    let mut diags = Diagnostics::new();

    // Unknown toolset names are their own diagnostic.
    for name in toolsets {
        if !is_known(name) {
            let known: Vec<&str> = known_toolsets().collect();
            diags.push(
                CompilerError::validation(path, format!("unknown github toolset '{name}'"))
                    .with_suggestion(format!("known toolsets: {}", known.join(", "))),
            );
        }
    }

    // scope/level -> toolsets that demand it
    let mut missing: Vec<(Scope, Level, Vec<&str>)> = Vec::new();
    for name in toolsets {
        let Some(info) = lookup(name) else { continue };
        let required = if read_only {
            &info.read_required
        } else {
            &info.write_required
        };
        for (scope, level) in required.iter() {
            if declared.satisfies(scope, level) {
                continue;
            }
            match missing.iter_mut().find(|(s, l, _)| *s == scope && *l == level) {
                Some((_, _, names)) => names.push(name.as_str()),
                None => missing.push((scope, level, vec![name.as_str()])),
            }
        }
    }

    if !missing.is_empty() {
        let listing: Vec<String> = missing
            .iter()
            .map(|(scope, level, names)| {
                format!("{scope}: {level} (required by {})", names.join(", "))
            })
            .collect();
        let offending: Vec<&str> = missing
            .iter()
            .flat_map(|(_, _, names)| names.iter().copied())
            .collect();
        let add_lines: Vec<String> = missing
            .iter()
            .map(|(scope, level, _)| format!("{scope}: {level}"))
            .collect();

        diags.push(
            CompilerError::warning(
                crate::error::Category::Permission,
                path,
                format!(
                    "declared permissions are missing grants required by github toolsets: {}",
                    listing.join(", ")
                ),
            )
            .with_code(WarningCode::PermissionMissing)
            .with_suggestion(format!(
                "add the missing permissions ({}) or remove the toolsets that need them ({})",
                add_lines.join(", "),
                offending.join(", ")
            )),
        );
    }

    diags
}
