//! Network access configuration
//!
//! `network.allowed` lists the egress domains the agent may reach. The
//! `defaults` token stands for the built-in ecosystem allow-list and is
//! expanded when the domains are consumed, not at parse time: the parsed
//! config keeps the raw entries. An omitted `network:` block means
//! `[defaults]`; an explicitly empty `allowed: []` means deny-all.

use serde_yaml::{Mapping, Value};

use crate::error::{Category, CompilerError, Diagnostics, Result, WarningCode};

/// Dependency registries and toolchain hosts the `defaults` token covers.
pub const ECOSYSTEM_DOMAINS: &[&str] = &[
    "crates.io",
    "static.crates.io",
    "index.crates.io",
    "registry.npmjs.org",
    "pypi.org",
    "files.pythonhosted.org",
    "rubygems.org",
    "proxy.golang.org",
    "sum.golang.org",
    "repo.maven.apache.org",
    "packagist.org",
    "nuget.org",
    "api.nuget.org",
    "github.com",
    "objects.githubusercontent.com",
    "raw.githubusercontent.com",
    "codeload.github.com",
    "ghcr.io",
];

#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    /// Raw `allowed` entries; `None` when the `network:` block was omitted
    pub allowed: Option<Vec<String>>,
    /// `firewall: disable`
    pub firewall_disabled: bool,
    /// The old `firewall: disabled` spelling was used
    pub legacy_firewall_spelling: bool,
}

impl NetworkConfig {
    /// Effective allow-list with the `defaults` token expanded.
    pub fn allowed_domains(&self) -> Vec<String> {
        let raw: &[String] = match &self.allowed {
            // Omitted network means the ecosystem defaults.
            None => return ECOSYSTEM_DOMAINS.iter().map(|d| d.to_string()).collect(),
            Some(entries) => entries,
        };

        let mut domains: Vec<String> = Vec::new();
        for entry in raw {
            if entry == "defaults" {
                for domain in ECOSYSTEM_DOMAINS {
                    if !domains.iter().any(|d| d == domain) {
                        domains.push(domain.to_string());
                    }
                }
            } else if !domains.iter().any(|d| d == entry) {
                domains.push(entry.clone());
            }
        }
        domains
    }

    /// `allowed: []` denies all egress.
    pub fn is_deny_all(&self) -> bool {
        matches!(&self.allowed, Some(entries) if entries.is_empty())
    }

    /// Does the config name at least one entry (or the `defaults` token)?
    pub fn has_entries(&self) -> bool {
        matches!(&self.allowed, Some(entries) if !entries.is_empty())
    }
}

/// Parse the top-level `network:` block.
pub fn parse_network(frontmatter: &Mapping, path: &str) -> Result<NetworkConfig> {
    let Some(value) = frontmatter.get("network") else {
        return Ok(NetworkConfig::default());
    };

    match value {
        // `network: defaults` shorthand
        Value::String(s) if s == "defaults" => Ok(NetworkConfig {
            allowed: Some(vec!["defaults".to_string()]),
            ..NetworkConfig::default()
        }),
        Value::String(other) => Err(CompilerError::validation(
            path,
            format!("invalid network shorthand '{other}'"),
        )
        .with_suggestion("use 'defaults' or a mapping with an 'allowed' list")),
        Value::Mapping(map) => {
            let allowed = match map.get("allowed") {
                Some(Value::Sequence(entries)) => {
                    let mut list = Vec::new();
                    for entry in entries {
                        let Some(s) = entry.as_str() else {
                            return Err(CompilerError::validation(
                                path,
                                "network.allowed entries must be strings",
                            ));
                        };
                        list.push(s.trim().to_string());
                    }
                    Some(list)
                }
                Some(_) => {
                    return Err(CompilerError::validation(
                        path,
                        "network.allowed must be a list of domains",
                    ));
                }
                None => Some(Vec::new()),
            };

            let firewall = map.get("firewall").and_then(Value::as_str);
            let firewall_disabled = matches!(firewall, Some("disable") | Some("disabled"));
            let legacy_firewall_spelling = firewall == Some("disabled");

            Ok(NetworkConfig {
                allowed,
                firewall_disabled,
                legacy_firewall_spelling,
            })
        }
        Value::Null => Ok(NetworkConfig {
            allowed: Some(Vec::new()),
            ..NetworkConfig::default()
        }),
        _ => Err(CompilerError::validation(
            path,
            "network must be a mapping with an 'allowed' list",
        )),
    }
}

/// Cross-cutting network validation. Warnings here are strict-upgradeable.
pub fn validate_network(
    network: &NetworkConfig,
    has_container_server: bool,
    strict: bool,
    path: &str,
) -> Diagnostics {
    let mut diags = Diagnostics::new();

    if network.legacy_firewall_spelling {
        diags.push(
            CompilerError::warning(
                Category::Validation,
                path,
                "'firewall: disabled' is deprecated; use 'firewall: disable'",
            )
            .with_code(WarningCode::DeprecatedOption),
        );
    }

    if network.firewall_disabled && network.has_entries() {
        diags.push(
            CompilerError::warning(
                Category::Validation,
                path,
                "firewall is disabled but network.allowed lists domains; \
                 the allow-list will not be enforced",
            )
            .with_code(WarningCode::FirewallDisabledWithAllowlist)
            .with_suggestion("remove 'firewall: disable' or drop the allowed list"),
        );
    }

    // Containerized MCP servers must run behind an explicit egress policy.
    if strict && has_container_server && !network.has_entries() {
        diags.push(
            CompilerError::validation(
                path,
                "strict mode: custom MCP servers with a container require a top-level \
                 'network' configuration with at least one allowed entry",
            )
            .with_suggestion("add 'network: { allowed: [defaults] }' or list specific domains"),
        );
    }

    if strict {
        diags.escalate_for_strict();
    }
    diags
}
