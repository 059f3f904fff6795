//! GitHub Actions permission model
//!
//! Scopes and levels mirror the `permissions:` block of a workflow. The
//! shorthand forms `read-all` / `write-all` expand to every scope, and an
//! `all:` key inside a mapping expands to every scope except `id-token`
//! (which has no read level on GitHub). Explicit scopes override the
//! expansion.

use std::collections::BTreeMap;

use serde_yaml::Value;

use crate::error::{CompilerError, Result};

/// All permission scopes GitHub Actions understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scope {
    Actions,
    Attestations,
    Checks,
    Contents,
    Deployments,
    Discussions,
    IdToken,
    Issues,
    Models,
    Packages,
    Pages,
    PullRequests,
    SecurityEvents,
    Statuses,
}

impl Scope {
    pub const ALL: [Scope; 14] = [
        Scope::Actions,
        Scope::Attestations,
        Scope::Checks,
        Scope::Contents,
        Scope::Deployments,
        Scope::Discussions,
        Scope::IdToken,
        Scope::Issues,
        Scope::Models,
        Scope::Packages,
        Scope::Pages,
        Scope::PullRequests,
        Scope::SecurityEvents,
        Scope::Statuses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Actions => "actions",
            Scope::Attestations => "attestations",
            Scope::Checks => "checks",
            Scope::Contents => "contents",
            Scope::Deployments => "deployments",
            Scope::Discussions => "discussions",
            Scope::IdToken => "id-token",
            Scope::Issues => "issues",
            Scope::Models => "models",
            Scope::Packages => "packages",
            Scope::Pages => "pages",
            Scope::PullRequests => "pull-requests",
            Scope::SecurityEvents => "security-events",
            Scope::Statuses => "statuses",
        }
    }

    pub fn parse(s: &str) -> Option<Scope> {
        Scope::ALL.iter().copied().find(|scope| scope.as_str() == s)
    }

    /// `id-token` has no read level on GitHub, so blanket read expansion
    /// skips it.
    pub fn has_read_level(&self) -> bool {
        !matches!(self, Scope::IdToken)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Access level for a scope. Ordering is meaningful: `None < Read < Write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    None,
    Read,
    Write,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::None => "none",
            Level::Read => "read",
            Level::Write => "write",
        }
    }

    pub fn parse(s: &str) -> Option<Level> {
        match s {
            "none" => Some(Level::None),
            "read" => Some(Level::Read),
            "write" => Some(Level::Write),
            _ => None,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A set of scope -> level grants. BTreeMap keeps emission deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    grants: BTreeMap<Scope, Level>,
}

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every scope at the given level; `Read` skips `id-token`.
    pub fn all_at(level: Level) -> Self {
        let mut perms = Permissions::new();
        for scope in Scope::ALL {
            if level == Level::Read && !scope.has_read_level() {
                continue;
            }
            perms.grants.insert(scope, level);
        }
        perms
    }

    pub fn set(&mut self, scope: Scope, level: Level) {
        self.grants.insert(scope, level);
    }

    pub fn get(&self, scope: Scope) -> Level {
        self.grants.get(&scope).copied().unwrap_or(Level::None)
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Scope, Level)> + '_ {
        self.grants.iter().map(|(s, l)| (*s, *l))
    }

    /// Does this grant satisfy `level` on `scope`?
    pub fn satisfies(&self, scope: Scope, level: Level) -> bool {
        self.get(scope) >= level
    }

    /// Union with another set, keeping the higher level per scope.
    pub fn union(&mut self, other: &Permissions) {
        for (scope, level) in other.iter() {
            let current = self.get(scope);
            if level > current {
                self.grants.insert(scope, level);
            }
        }
    }

    /// Downgrade every write grant to read. `id-token` write drops to none
    /// since it has no read level.
    pub fn downgrade_to_read(&mut self) {
        for (scope, level) in self.grants.clone() {
            if level == Level::Write {
                if scope.has_read_level() {
                    self.grants.insert(scope, Level::Read);
                } else {
                    self.grants.insert(scope, Level::None);
                }
            }
        }
    }

    /// Parse a `permissions:` value: shorthand string, or scope mapping.
    pub fn parse(value: &Value, path: &str) -> Result<Permissions> {
        match value {
            Value::String(s) => match s.trim() {
                "read-all" => Ok(Permissions::all_at(Level::Read)),
                "write-all" => Ok(Permissions::all_at(Level::Write)),
                other => Err(CompilerError::validation(
                    path,
                    format!("invalid permissions shorthand '{other}'"),
                )
                .with_suggestion("use 'read-all' or 'write-all' (note the hyphen)")),
            },
            Value::Mapping(map) => {
                let mut perms = Permissions::new();
                let mut explicit: Vec<(Scope, Level)> = Vec::new();
                for (k, v) in map {
                    let key = k.as_str().ok_or_else(|| {
                        CompilerError::validation(path, "permissions keys must be strings")
                    })?;
                    let level_str = v.as_str().ok_or_else(|| {
                        CompilerError::validation(
                            path,
                            format!("permission level for '{key}' must be a string"),
                        )
                    })?;
                    let level = Level::parse(level_str).ok_or_else(|| {
                        CompilerError::validation(
                            path,
                            format!("invalid permission level '{level_str}' for '{key}'"),
                        )
                        .with_suggestion("valid levels: none, read, write")
                    })?;

                    if key == "all" {
                        // Blanket grant; explicit scopes override below.
                        for scope in Scope::ALL {
                            if level == Level::Read && !scope.has_read_level() {
                                continue;
                            }
                            perms.grants.insert(scope, level);
                        }
                    } else {
                        let scope = Scope::parse(key).ok_or_else(|| {
                            CompilerError::validation(
                                path,
                                format!("unknown permission scope '{key}'"),
                            )
                        })?;
                        explicit.push((scope, level));
                    }
                }
                for (scope, level) in explicit {
                    perms.grants.insert(scope, level);
                }
                Ok(perms)
            }
            Value::Null => Ok(Permissions::new()),
            _ => Err(CompilerError::validation(
                path,
                "permissions must be a shorthand string or a scope mapping",
            )),
        }
    }

    /// Render as a YAML mapping value with scopes in alphabetical order.
    pub fn to_yaml(&self) -> Value {
        let mut map = serde_yaml::Mapping::new();
        for (scope, level) in self.iter() {
            map.insert(
                Value::String(scope.as_str().to_string()),
                Value::String(level.as_str().to_string()),
            );
        }
        Value::Mapping(map)
    }
}
