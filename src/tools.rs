//! Tool and MCP server configuration model
//!
//! The `tools:` frontmatter block configures built-in tools (github,
//! playwright, cache-memory, agentic-workflows); `mcp-servers:` declares
//! custom MCP servers. Custom servers are a tagged union over transports:
//! explicit `type:` wins, otherwise the transport is inferred from which of
//! `container` / `command` / `url` is present. Exactly one transport must
//! be determined per server.

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

use crate::error::{CompilerError, Result};
use crate::toolsets;

/// Bounds for `cache-memory.retention-days`
pub const RETENTION_DAYS_MIN: u64 = 1;
pub const RETENTION_DAYS_MAX: u64 = 90;

#[derive(Debug, Default)]
pub struct ToolsConfig {
    pub github: Option<GithubTool>,
    pub playwright: Option<PlaywrightTool>,
    pub cache_memory: Option<CacheMemoryTool>,
    pub agentic_workflows: bool,
    /// MCP server startup timeout in seconds
    pub startup_timeout: Option<u64>,
    pub mcp_servers: Vec<McpServer>,
}

impl ToolsConfig {
    /// Any custom server running in a container (strict-mode network rule)
    pub fn has_container_server(&self) -> bool {
        self.mcp_servers.iter().any(|s| s.is_container())
    }
}

#[derive(Debug)]
pub struct GithubTool {
    /// Expanded toolset list (sentinels resolved, deduplicated)
    pub toolsets: Vec<String>,
    pub read_only: bool,
    /// Optional PAT expression overriding the default token
    pub github_token: Option<String>,
}

#[derive(Debug, Default)]
pub struct PlaywrightTool {
    pub version: Option<String>,
    pub allowed_domains: Vec<String>,
}

#[derive(Debug, Default)]
pub struct CacheMemoryTool {
    pub retention_days: Option<u64>,
    pub key: Option<String>,
}

#[derive(Debug)]
pub struct McpServer {
    pub name: String,
    pub transport: McpTransport,
    pub env: BTreeMap<String, String>,
    /// Per-server allowed domains (`network.allowed`)
    pub allowed_domains: Option<Vec<String>>,
}

impl McpServer {
    pub fn is_container(&self) -> bool {
        matches!(
            &self.transport,
            McpTransport::Stdio { container: Some(_), .. }
        )
    }
}

#[derive(Debug)]
pub enum McpTransport {
    Stdio {
        command: Option<String>,
        args: Vec<String>,
        container: Option<String>,
        entrypoint: Option<String>,
        entrypoint_args: Vec<String>,
        mounts: Vec<String>,
    },
    Http {
        url: String,
    },
}

/// Parse `tools:` and `mcp-servers:` out of the merged frontmatter.
pub fn parse_tools(frontmatter: &Mapping, path: &str) -> Result<ToolsConfig> {
    let mut config = ToolsConfig::default();

    if let Some(tools) = frontmatter.get("tools") {
        let tools = tools.as_mapping().ok_or_else(|| {
            CompilerError::validation(path, "'tools' must be a mapping")
        })?;
        for (key, value) in tools {
            let Some(name) = key.as_str() else {
                return Err(CompilerError::validation(path, "tool names must be strings"));
            };
            match name {
                "github" => config.github = Some(parse_github_tool(value, path)?),
                "playwright" => config.playwright = Some(parse_playwright_tool(value, path)?),
                "cache-memory" => {
                    config.cache_memory = Some(parse_cache_memory_tool(value, path)?)
                }
                "agentic-workflows" => config.agentic_workflows = true,
                "startup-timeout" => {
                    config.startup_timeout = Some(parse_startup_timeout(value, path)?)
                }
                other => {
                    return Err(CompilerError::validation(
                        path,
                        format!("unknown tool '{other}'"),
                    )
                    .with_suggestion(
                        "built-in tools: github, playwright, cache-memory, agentic-workflows; \
                         declare custom servers under 'mcp-servers'",
                    ));
                }
            }
        }
    }

    if let Some(servers) = frontmatter.get("mcp-servers") {
        let servers = servers.as_mapping().ok_or_else(|| {
            CompilerError::validation(path, "'mcp-servers' must be a mapping")
        })?;
        for (key, value) in servers {
            let Some(name) = key.as_str() else {
                return Err(CompilerError::validation(path, "MCP server names must be strings"));
            };
            config.mcp_servers.push(parse_mcp_server(name, value, path)?);
        }
    }

    Ok(config)
}

fn parse_github_tool(value: &Value, path: &str) -> Result<GithubTool> {
    let mut declared: Vec<String> = Vec::new();
    let mut read_only = false;
    let mut github_token = None;

    if let Value::Mapping(map) = value {
        if let Some(toolsets) = map.get("toolsets") {
            match toolsets {
                Value::Sequence(entries) => {
                    for entry in entries {
                        let Some(s) = entry.as_str() else {
                            return Err(CompilerError::validation(
                                path,
                                "github toolsets must be strings",
                            ));
                        };
                        declared.push(s.to_string());
                    }
                }
                // Comma-separated string form is also accepted.
                Value::String(s) => {
                    declared.extend(s.split(',').map(|t| t.trim().to_string()));
                }
                _ => {
                    return Err(CompilerError::validation(
                        path,
                        "github toolsets must be a list or comma-separated string",
                    ));
                }
            }
        }
        read_only = map
            .get("read-only")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        github_token = map
            .get("github-token")
            .and_then(Value::as_str)
            .map(str::to_string);
    } else if !value.is_null() {
        return Err(CompilerError::validation(
            path,
            "'tools.github' must be a mapping or null",
        ));
    }

    Ok(GithubTool {
        toolsets: toolsets::expand_toolsets(&declared),
        read_only,
        github_token,
    })
}

fn parse_playwright_tool(value: &Value, path: &str) -> Result<PlaywrightTool> {
    let mut tool = PlaywrightTool::default();
    if let Value::Mapping(map) = value {
        tool.version = map.get("version").and_then(Value::as_str).map(str::to_string);
        if let Some(Value::Sequence(domains)) = map.get("allowed-domains") {
            for domain in domains {
                if let Some(s) = domain.as_str() {
                    tool.allowed_domains.push(s.to_string());
                }
            }
        }
    } else if !value.is_null() {
        return Err(CompilerError::validation(
            path,
            "'tools.playwright' must be a mapping or null",
        ));
    }
    Ok(tool)
}

fn parse_cache_memory_tool(value: &Value, path: &str) -> Result<CacheMemoryTool> {
    let mut tool = CacheMemoryTool::default();
    match value {
        Value::Null | Value::Bool(true) => {}
        Value::Bool(false) => {}
        Value::Mapping(map) => {
            if let Some(days) = map.get("retention-days") {
                let days_u64 = days.as_u64().ok_or_else(|| {
                    CompilerError::validation(
                        path,
                        format!(
                            "cache-memory retention-days must be an integer, got {}",
                            yaml_scalar_display(days)
                        ),
                    )
                })?;
                if !(RETENTION_DAYS_MIN..=RETENTION_DAYS_MAX).contains(&days_u64) {
                    return Err(CompilerError::validation(
                        path,
                        format!(
                            "cache-memory retention-days must be between {RETENTION_DAYS_MIN} \
                             and {RETENTION_DAYS_MAX}, got {days_u64}"
                        ),
                    ));
                }
                tool.retention_days = Some(days_u64);
            }
            tool.key = map.get("key").and_then(Value::as_str).map(str::to_string);
        }
        _ => {
            return Err(CompilerError::validation(
                path,
                "'tools.cache-memory' must be a mapping, boolean, or null",
            ));
        }
    }
    Ok(tool)
}

fn parse_startup_timeout(value: &Value, path: &str) -> Result<u64> {
    let display = yaml_scalar_display(value);
    let seconds = value.as_i64().ok_or_else(|| {
        CompilerError::validation(
            path,
            format!("startup-timeout must be a positive integer, got {display}"),
        )
    })?;
    if seconds <= 0 {
        return Err(CompilerError::validation(
            path,
            format!("startup-timeout must be a positive integer, got {seconds}"),
        ));
    }
    Ok(seconds as u64)
}

fn parse_mcp_server(name: &str, value: &Value, path: &str) -> Result<McpServer> {
    let map = value.as_mapping().ok_or_else(|| {
        CompilerError::validation(path, format!("MCP server '{name}' must be a mapping"))
    })?;

    let get_str = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
    let get_list = |key: &str| -> Vec<String> {
        match map.get(key) {
            Some(Value::Sequence(entries)) => entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    };

    let explicit_type = get_str("type");
    let container = get_str("container");
    let command = get_str("command");
    let url_field = get_str("url");

    let transport_kind = match explicit_type.as_deref() {
        Some("stdio") | Some("local") => "stdio",
        Some("http") => "http",
        Some(other) => {
            return Err(CompilerError::validation(
                path,
                format!("MCP server '{name}' has unknown type '{other}'"),
            )
            .with_suggestion("valid types: stdio, http, local"));
        }
        None => {
            // Infer from the fields present.
            let has_stdio = container.is_some() || command.is_some();
            let has_http = url_field.is_some();
            match (has_stdio, has_http) {
                (true, false) => "stdio",
                (false, true) => "http",
                (true, true) => {
                    return Err(CompilerError::validation(
                        path,
                        format!(
                            "MCP server '{name}' is ambiguous: both stdio fields and 'url' present"
                        ),
                    )
                    .with_suggestion("set an explicit 'type' to disambiguate"));
                }
                (false, false) => {
                    return Err(CompilerError::validation(
                        path,
                        format!(
                            "MCP server '{name}' declares no transport: \
                             need 'container', 'command', or 'url'"
                        ),
                    ));
                }
            }
        }
    };

    let transport = match transport_kind {
        "stdio" => McpTransport::Stdio {
            command,
            args: get_list("args"),
            container,
            entrypoint: get_str("entrypoint"),
            entrypoint_args: get_list("entrypoint-args"),
            mounts: get_list("mounts"),
        },
        "http" => {
            let url_str = url_field.ok_or_else(|| {
                CompilerError::validation(
                    path,
                    format!("MCP server '{name}' has type http but no 'url'"),
                )
            })?;
            url::Url::parse(&url_str).map_err(|e| {
                CompilerError::validation(
                    path,
                    format!("MCP server '{name}' has invalid url '{url_str}': {e}"),
                )
            })?;
            McpTransport::Http { url: url_str }
        }
        _ => unreachable!(),
    };

    let mut env = BTreeMap::new();
    if let Some(Value::Mapping(env_map)) = map.get("env") {
        for (k, v) in env_map {
            if let (Some(k), Some(v)) = (k.as_str(), v.as_str()) {
                env.insert(k.to_string(), v.to_string());
            }
        }
    }

    let allowed_domains = match map.get("network") {
        Some(Value::Mapping(net)) => match net.get("allowed") {
            Some(Value::Sequence(domains)) => Some(
                domains
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            ),
            _ => Some(Vec::new()),
        },
        _ => None,
    };

    Ok(McpServer {
        name: name.to_string(),
        transport,
        env,
        allowed_domains,
    })
}

fn yaml_scalar_display(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => "a non-scalar value".to_string(),
    }
}
