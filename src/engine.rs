//! Agentic engine selection and core job assembly
//!
//! `engine:` picks which agent runtime executes the prompt. The activation
//! job gates the agent behind a role check and, when `on.stop-after` is
//! set, a timestamp check; the agent job writes the prompt file, runs the
//! engine, collects declared output types, redacts secrets, and uploads
//! its logs.

use serde_yaml::{Mapping, Value};

use crate::artifacts::ArtifactManager;
use crate::error::{CompilerError, Result};
use crate::expr::ExpressionMapping;
use crate::jobs::Job;
use crate::mcp;
use crate::permissions::{Level, Permissions, Scope};
use crate::safe_outputs::AGENT_OUTPUT_ARTIFACT;
use crate::step_order::StepOrderTracker;
use crate::tools::ToolsConfig;

pub const ACTIVATION_JOB: &str = "activation";
pub const AGENT_JOB: &str = "agent";

/// Roles allowed to trigger a workflow when `roles:` is omitted
pub const DEFAULT_ROLES: [&str; 3] = ["admin", "maintainer", "write"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineId {
    Copilot,
    Claude,
    Codex,
}

impl EngineId {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineId::Copilot => "copilot",
            EngineId::Claude => "claude",
            EngineId::Codex => "codex",
        }
    }

    fn parse(s: &str, path: &str) -> Result<EngineId> {
        match s {
            "copilot" => Ok(EngineId::Copilot),
            "claude" => Ok(EngineId::Claude),
            "codex" => Ok(EngineId::Codex),
            other => Err(CompilerError::validation(
                path,
                format!("unknown engine '{other}'"),
            )
            .with_suggestion("known engines: copilot, claude, codex")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub id: EngineId,
    pub model: Option<String>,
    pub version: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            id: EngineId::Copilot,
            model: None,
            version: None,
        }
    }
}

/// Parse `engine:` as a bare id string or a mapping with `id` and optional
/// `model` / `version`.
pub fn parse_engine(frontmatter: &Mapping, path: &str) -> Result<EngineConfig> {
    let Some(value) = frontmatter.get("engine") else {
        return Ok(EngineConfig::default());
    };
    match value {
        Value::String(id) => Ok(EngineConfig {
            id: EngineId::parse(id, path)?,
            ..EngineConfig::default()
        }),
        Value::Mapping(map) => {
            let id = map
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| CompilerError::validation(path, "engine mapping requires 'id'"))?;
            Ok(EngineConfig {
                id: EngineId::parse(id, path)?,
                model: map.get("model").and_then(Value::as_str).map(str::to_string),
                version: map.get("version").and_then(Value::as_str).map(str::to_string),
            })
        }
        _ => Err(CompilerError::validation(
            path,
            "engine must be a string or a mapping",
        )),
    }
}

/// `on.stop-after`: absolute ISO timestamp or `+<n>d/h/m` delta, compiled
/// into the activation gate and stripped from the emitted `on:` section.
pub fn take_stop_after(frontmatter: &mut Mapping, path: &str) -> Result<Option<String>> {
    let Some(Value::Mapping(on)) = frontmatter.get_mut("on") else {
        return Ok(None);
    };
    let Some(value) = on.remove("stop-after") else {
        return Ok(None);
    };
    let text = value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CompilerError::validation(path, "on.stop-after must be a string"))?;
    if text.is_empty() {
        return Err(CompilerError::validation(path, "on.stop-after cannot be empty"));
    }
    Ok(Some(text))
}

/// Roles allowed to trigger the workflow. `roles: all` disables the check.
pub fn parse_roles(frontmatter: &Mapping) -> Option<Vec<String>> {
    match frontmatter.get("roles") {
        Some(Value::String(s)) if s == "all" => None,
        Some(Value::String(s)) => Some(vec![s.clone()]),
        Some(Value::Sequence(entries)) => Some(
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ),
        _ => Some(DEFAULT_ROLES.iter().map(|r| r.to_string()).collect()),
    }
}

/// Triggers arbitrary users can fire; these need the role gate.
const ROLE_GATED_EVENTS: [&str; 9] = [
    "issues",
    "issue_comment",
    "pull_request",
    "pull_request_target",
    "pull_request_review_comment",
    "discussion",
    "discussion_comment",
    "fork",
    "workflow_run",
];

fn trigger_events(frontmatter: &Mapping) -> Vec<String> {
    match frontmatter.get("on") {
        Some(Value::Mapping(on)) => on
            .keys()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Sequence(events)) => events
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn has_workflow_run_trigger(frontmatter: &Mapping) -> bool {
    trigger_events(frontmatter).iter().any(|e| e == "workflow_run")
}

fn needs_role_check(frontmatter: &Mapping) -> bool {
    trigger_events(frontmatter)
        .iter()
        .any(|e| ROLE_GATED_EVENTS.contains(&e.as_str()))
}

/// The gate job: role/fork membership check plus the stop-after timestamp
/// check. Push/schedule/dispatch triggers already run with collaborator
/// credentials, so a workflow with only those and no stop time needs no
/// gate at all.
pub fn build_activation_job(
    frontmatter: &Mapping,
    stop_after: Option<&str>,
    action_mode: &str,
) -> Option<Job> {
    let roles = parse_roles(frontmatter).filter(|_| needs_role_check(frontmatter));
    if roles.is_none() && stop_after.is_none() {
        return None;
    }

    let mut job = Job::new(ACTIVATION_JOB);
    job.runs_on = Some(Value::String("ubuntu-latest".into()));
    let mut perms = Permissions::new();
    perms.set(Scope::Contents, Level::Read);
    job.permissions = Some(perms);
    job.has_workflow_run_safety_checks = has_workflow_run_trigger(frontmatter);

    if let Some(stop_after) = stop_after {
        job.steps.push(format!(
            "- name: Check stop time\n  uses: actions/github-script@v7\n  env:\n    GH_AW_STOP_AFTER: {stop_after:?}\n  with:\n    script: |\n      const {{ main }} = require('{}');\n      await main({{ context, core }});\n",
            activation_script("check_stop_time", action_mode),
        ));
    }

    if let Some(roles) = roles {
        let roles_csv = roles.join(",");
        job.steps.push(format!(
            "- name: Check team membership\n  uses: actions/github-script@v7\n  env:\n    GH_AW_REQUIRED_ROLES: {roles_csv:?}\n  with:\n    script: |\n      const {{ main }} = require('{}');\n      await main({{ github, context, core }});\n",
            activation_script("check_membership", action_mode),
        ));
    }

    Some(job)
}

fn activation_script(stem: &str, action_mode: &str) -> String {
    match action_mode {
        "dev" => format!("./.github/actions/activation/{stem}.cjs"),
        _ => format!("/opt/gh-aw/activation/{stem}.cjs"),
    }
}

/// Engine invocation command line
fn engine_command(engine: &EngineConfig) -> String {
    let model_flag = engine
        .model
        .as_deref()
        .map(|m| format!(" --model {m}"))
        .unwrap_or_default();
    match engine.id {
        EngineId::Copilot => format!(
            "npx -y @github/copilot{} --prompt-file /tmp/gh-aw/aw-prompts/prompt.txt --log-dir /tmp/gh-aw/agent-logs/",
            model_flag
        ),
        EngineId::Claude => format!(
            "npx -y @anthropic-ai/claude-code{} -p \"$(cat /tmp/gh-aw/aw-prompts/prompt.txt)\"",
            model_flag
        ),
        EngineId::Codex => format!(
            "codex exec{} \"$(cat /tmp/gh-aw/aw-prompts/prompt.txt)\"",
            model_flag
        ),
    }
}

/// Assemble the agent job: prompt file, engine run, output collection,
/// secret redaction, log upload. Every upload and redaction step is also
/// recorded against the tracker and artifact manager so the cross-cutting
/// validators see the same picture the YAML shows.
#[allow(clippy::too_many_arguments)]
pub fn build_agent_job(
    engine: &EngineConfig,
    tools: &ToolsConfig,
    permissions: Permissions,
    mappings: &[ExpressionMapping],
    prompt: &str,
    has_activation: bool,
    timeout_minutes: Option<u64>,
    runs_on: Option<Value>,
    tracker: &mut StepOrderTracker,
    artifacts: &mut ArtifactManager,
) -> Result<Job> {
    let mut job = Job::new(AGENT_JOB);
    if has_activation {
        job.needs.push(ACTIVATION_JOB.to_string());
    }
    job.runs_on = Some(runs_on.unwrap_or_else(|| Value::String("ubuntu-latest".into())));
    job.permissions = Some(permissions);
    job.timeout_minutes = Some(timeout_minutes.unwrap_or(20));
    job.outputs.insert(
        "output_types".into(),
        "${{ steps.collect_output.outputs.output_types }}".into(),
    );
    for mapping in mappings {
        job.env.insert(
            mapping.env_var.clone(),
            format!("${{{{ {} }}}}", mapping.content),
        );
    }

    job.steps.push(
        "- name: Checkout repository\n  uses: actions/checkout@v5\n  with:\n    persist-credentials: false\n"
            .to_string(),
    );

    if let Some(step) = mcp::mcp_config_step(tools) {
        job.steps.push(step);
    }

    // Prompt file with placeholder interpolation from the env above.
    // Trailing whitespace would force the YAML emitter out of literal
    // block style for the run script.
    let indented_prompt: String = prompt
        .lines()
        .map(|line| {
            if line.trim_end().is_empty() {
                "\n".to_string()
            } else {
                format!("    {}\n", line.trim_end())
            }
        })
        .collect();
    job.steps.push(format!(
        "- name: Write prompt\n  run: |\n    mkdir -p /tmp/gh-aw/aw-prompts\n    cat > /tmp/gh-aw/aw-prompts/prompt.txt << 'PROMPT_EOF'\n{indented_prompt}    PROMPT_EOF\n"
    ));

    job.steps.push(format!(
        "- name: Run {engine_name}\n  run: |\n    mkdir -p /tmp/gh-aw/agent-logs /tmp/gh-aw/safeoutputs\n    {command} 2>&1 | tee /tmp/gh-aw/agent-stdio.log\n  env:\n    GH_AW_SAFE_OUTPUTS: /tmp/gh-aw/safeoutputs/{artifact}.json\n",
        engine_name = engine.id.as_str(),
        command = engine_command(engine),
        artifact = AGENT_OUTPUT_ARTIFACT,
    ));
    tracker.mark_agent_execution_complete();

    job.steps.push(format!(
        "- name: Collect agent output types\n  id: collect_output\n  run: |\n    types=$(jq -rs '[.[].type] | unique | join(\",\")' /tmp/gh-aw/safeoutputs/{AGENT_OUTPUT_ARTIFACT}.json 2>/dev/null || echo '')\n    echo \"output_types=$types\" >> \"$GITHUB_OUTPUT\"\n"
    ));

    job.steps.push(
        "- name: Redact secrets in logs\n  run: node /opt/gh-aw/redact_secrets.cjs /tmp/gh-aw/ /opt/gh-aw/\n"
            .to_string(),
    );
    tracker.record_secret_redaction("Redact secrets in logs");

    let output_paths = vec![format!("/tmp/gh-aw/safeoutputs/{AGENT_OUTPUT_ARTIFACT}.json")];
    job.steps.push(format!(
        "- name: Upload agent output\n  if: always()\n  uses: actions/upload-artifact@v4\n  with:\n    name: {AGENT_OUTPUT_ARTIFACT}\n    path: {}\n    if-no-files-found: ignore\n",
        output_paths[0]
    ));
    tracker.record_artifact_upload("Upload agent output", output_paths.clone());
    artifacts.record_upload(AGENT_OUTPUT_ARTIFACT, output_paths, Some(AGENT_JOB.into()))?;

    let log_paths = vec![
        "/tmp/gh-aw/agent-stdio.log".to_string(),
        "/tmp/gh-aw/agent-logs/".to_string(),
    ];
    job.steps.push(format!(
        "- name: Upload agent logs\n  if: always()\n  uses: actions/upload-artifact@v4\n  with:\n    name: agent_logs\n    path: |\n      {}\n      {}\n    if-no-files-found: ignore\n",
        log_paths[0], log_paths[1]
    ));
    tracker.record_artifact_upload("Upload agent logs", log_paths.clone());
    artifacts.record_upload("agent_logs", log_paths, Some(AGENT_JOB.into()))?;

    Ok(job)
}
