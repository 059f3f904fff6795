//! MCP server config rendering for the agent job
//!
//! The agent engine reads one JSON config file listing every MCP server it
//! may talk to. Built-in servers (github, playwright) get their canonical
//! launch commands; custom servers render from their parsed transport.
//! Key order is deterministic so the emitted workflow is byte-stable.

use serde_json::{json, Map, Value as Json};

use crate::tools::{McpServer, McpTransport, ToolsConfig};

/// Default `startup-timeout` in seconds when `tools` does not set one
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 120;

/// Render the complete MCP config document for the agent job.
pub fn render_mcp_config(tools: &ToolsConfig) -> Json {
    let mut servers = Map::new();

    if let Some(github) = &tools.github {
        let mut env = Map::new();
        env.insert(
            "GITHUB_PERSONAL_ACCESS_TOKEN".into(),
            Json::String(
                github
                    .github_token
                    .clone()
                    .unwrap_or_else(|| "${{ secrets.GITHUB_TOKEN }}".to_string()),
            ),
        );
        env.insert(
            "GITHUB_TOOLSETS".into(),
            Json::String(github.toolsets.join(",")),
        );
        if github.read_only {
            env.insert("GITHUB_READ_ONLY".into(), Json::String("1".into()));
        }
        servers.insert(
            "github".into(),
            json!({
                "command": "docker",
                "args": [
                    "run", "--rm", "-i",
                    "-e", "GITHUB_PERSONAL_ACCESS_TOKEN",
                    "-e", "GITHUB_TOOLSETS",
                    "ghcr.io/github/github-mcp-server:latest",
                ],
                "env": Json::Object(env),
            }),
        );
    }

    if let Some(playwright) = &tools.playwright {
        let mut args = vec![Json::String("-y".into())];
        match &playwright.version {
            Some(version) => args.push(Json::String(format!("@playwright/mcp@{version}"))),
            None => args.push(Json::String("@playwright/mcp".into())),
        }
        for domain in &playwright.allowed_domains {
            args.push(Json::String("--allowed-origins".into()));
            args.push(Json::String(domain.clone()));
        }
        servers.insert(
            "playwright".into(),
            json!({ "command": "npx", "args": args }),
        );
    }

    for server in &tools.mcp_servers {
        servers.insert(server.name.clone(), render_custom_server(server));
    }

    json!({
        "mcpServers": Json::Object(servers),
        "startupTimeoutSec": tools.startup_timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT_SECS),
    })
}

fn render_custom_server(server: &McpServer) -> Json {
    let mut out = Map::new();
    match &server.transport {
        McpTransport::Http { url } => {
            out.insert("type".into(), Json::String("http".into()));
            out.insert("url".into(), Json::String(url.clone()));
        }
        McpTransport::Stdio {
            command,
            args,
            container,
            entrypoint,
            entrypoint_args,
            mounts,
        } => match container {
            Some(image) => {
                let mut docker_args: Vec<Json> =
                    ["run", "--rm", "-i"].iter().map(|s| Json::String(s.to_string())).collect();
                for key in server.env.keys() {
                    docker_args.push(Json::String("-e".into()));
                    docker_args.push(Json::String(key.clone()));
                }
                for mount in mounts {
                    docker_args.push(Json::String("-v".into()));
                    docker_args.push(Json::String(mount.clone()));
                }
                if let Some(entrypoint) = entrypoint {
                    docker_args.push(Json::String("--entrypoint".into()));
                    docker_args.push(Json::String(entrypoint.clone()));
                }
                docker_args.push(Json::String(image.clone()));
                docker_args.extend(entrypoint_args.iter().cloned().map(Json::String));

                out.insert("command".into(), Json::String("docker".into()));
                out.insert("args".into(), Json::Array(docker_args));
            }
            None => {
                out.insert(
                    "command".into(),
                    Json::String(command.clone().unwrap_or_default()),
                );
                if !args.is_empty() {
                    out.insert(
                        "args".into(),
                        Json::Array(args.iter().cloned().map(Json::String).collect()),
                    );
                }
            }
        },
    }

    if !server.env.is_empty() {
        let env: Map<String, Json> = server
            .env
            .iter()
            .map(|(k, v)| (k.clone(), Json::String(v.clone())))
            .collect();
        out.insert("env".into(), Json::Object(env));
    }
    if let Some(domains) = &server.allowed_domains {
        out.insert(
            "allowedDomains".into(),
            Json::Array(domains.iter().cloned().map(Json::String).collect()),
        );
    }
    Json::Object(out)
}

/// The agent-job step that writes the config file, or `None` when no MCP
/// servers are configured.
pub fn mcp_config_step(tools: &ToolsConfig) -> Option<String> {
    if tools.github.is_none() && tools.playwright.is_none() && tools.mcp_servers.is_empty() {
        return None;
    }
    let config = render_mcp_config(tools);
    let pretty = serde_json::to_string_pretty(&config).expect("MCP config serializes");
    let indented: String = pretty.lines().map(|line| format!("    {line}\n")).collect();
    Some(format!(
        "- name: Write MCP config\n  run: |\n    mkdir -p /tmp/gh-aw\n    cat > /tmp/gh-aw/mcp-config.json << 'MCP_EOF'\n{indented}    MCP_EOF\n"
    ))
}
