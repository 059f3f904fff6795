//! Safe-output configuration and post-job builder
//!
//! Safe outputs are declarative post-processing actions (create an issue,
//! open a PR, upload an asset, ...) gated on the output kinds the agent
//! actually declared. Each declared kind compiles to one post-job whose
//! condition uses the `!cancelled() && result != 'skipped'` form: `always()`
//! would also run on workflow cancellation, and a bare `!cancelled()` is
//! true when `needs` were skipped by cancellation.

use serde_yaml::{Mapping, Value};

use crate::artifacts::{ArtifactDownload, ArtifactManager};
use crate::error::{CompilerError, Result};
use crate::jobs::Job;
use crate::permissions::{Level, Permissions, Scope};

/// Default extension allow-list for `upload-asset`
pub const DEFAULT_ASSET_EXTENSIONS: [&str; 3] = [".png", ".jpg", ".jpeg"];

/// Default `upload-asset` size cap in KB
pub const DEFAULT_ASSET_MAX_SIZE_KB: u64 = 10240;

/// Artifact carrying the agent's declared outputs between jobs
pub const AGENT_OUTPUT_ARTIFACT: &str = "agent_output";

#[derive(Debug, Clone, PartialEq)]
pub enum SafeOutputKind {
    CreateIssue {
        title_prefix: Option<String>,
        labels: Vec<String>,
        assignees: Vec<String>,
        max: Option<u64>,
    },
    CreatePullRequest {
        title_prefix: Option<String>,
        labels: Vec<String>,
        reviewers: Vec<String>,
        draft: bool,
    },
    CreatePullRequestReviewComment {
        max: Option<u64>,
    },
    AddComment {
        max: Option<u64>,
        target: Option<String>,
    },
    PushToPullRequestBranch {
        target: Option<String>,
    },
    UploadAsset {
        allowed_extensions: Vec<String>,
        max_size_kb: u64,
    },
    CreateDiscussion {
        title_prefix: Option<String>,
        max: Option<u64>,
    },
    AddLabels {
        allowed: Vec<String>,
        max: Option<u64>,
    },
    UpdateIssue,
    MissingTool,
}

impl SafeOutputKind {
    /// Kind name as written in frontmatter and in the agent's output_types
    pub fn kind_name(&self) -> &'static str {
        match self {
            SafeOutputKind::CreateIssue { .. } => "create-issue",
            SafeOutputKind::CreatePullRequest { .. } => "create-pull-request",
            SafeOutputKind::CreatePullRequestReviewComment { .. } => {
                "create-pull-request-review-comment"
            }
            SafeOutputKind::AddComment { .. } => "add-comment",
            SafeOutputKind::PushToPullRequestBranch { .. } => "push-to-pull-request-branch",
            SafeOutputKind::UploadAsset { .. } => "upload-asset",
            SafeOutputKind::CreateDiscussion { .. } => "create-discussion",
            SafeOutputKind::AddLabels { .. } => "add-labels",
            SafeOutputKind::UpdateIssue => "update-issue",
            SafeOutputKind::MissingTool => "missing-tool",
        }
    }

    /// Post-job name in the job graph
    pub fn job_name(&self) -> String {
        self.kind_name().replace('-', "_")
    }

    /// Minimum permissions the post-job needs
    pub fn permissions(&self) -> Permissions {
        let mut perms = Permissions::new();
        match self {
            SafeOutputKind::CreateIssue { .. } | SafeOutputKind::UpdateIssue => {
                perms.set(Scope::Issues, Level::Write);
            }
            SafeOutputKind::CreatePullRequest { .. } => {
                perms.set(Scope::Contents, Level::Write);
                perms.set(Scope::PullRequests, Level::Write);
            }
            SafeOutputKind::CreatePullRequestReviewComment { .. } => {
                perms.set(Scope::PullRequests, Level::Write);
            }
            SafeOutputKind::AddComment { .. } => {
                perms.set(Scope::Issues, Level::Write);
                perms.set(Scope::PullRequests, Level::Write);
            }
            SafeOutputKind::PushToPullRequestBranch { .. } => {
                perms.set(Scope::Contents, Level::Write);
            }
            SafeOutputKind::UploadAsset { .. } => {
                perms.set(Scope::Contents, Level::Write);
            }
            SafeOutputKind::CreateDiscussion { .. } => {
                perms.set(Scope::Discussions, Level::Write);
            }
            SafeOutputKind::AddLabels { .. } => {
                perms.set(Scope::Issues, Level::Write);
            }
            SafeOutputKind::MissingTool => {
                perms.set(Scope::Contents, Level::Read);
            }
        }
        perms
    }
}

#[derive(Debug, Default)]
pub struct SafeOutputsConfig {
    pub kinds: Vec<SafeOutputKind>,
}

impl SafeOutputsConfig {
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Parse the `safe-outputs:` frontmatter block. `missing-tool` is implicitly
/// enabled whenever any other kind is declared; `missing-tool: false` opts
/// out.
pub fn parse_safe_outputs(frontmatter: &Mapping, path: &str) -> Result<Option<SafeOutputsConfig>> {
    let Some(value) = frontmatter.get("safe-outputs") else {
        return Ok(None);
    };
    let map = value.as_mapping().ok_or_else(|| {
        CompilerError::validation(path, "'safe-outputs' must be a mapping")
    })?;

    let mut config = SafeOutputsConfig::default();
    let mut missing_tool_disabled = false;

    for (key, entry) in map {
        let Some(kind_name) = key.as_str() else {
            return Err(CompilerError::validation(path, "safe-output kinds must be strings"));
        };
        let entry_map = entry.as_mapping().cloned().unwrap_or_default();

        let kind = match kind_name {
            "create-issue" => SafeOutputKind::CreateIssue {
                title_prefix: str_field(&entry_map, "title-prefix"),
                labels: list_field(&entry_map, "labels"),
                assignees: list_field(&entry_map, "assignees"),
                max: u64_field(&entry_map, "max"),
            },
            "create-pull-request" => SafeOutputKind::CreatePullRequest {
                title_prefix: str_field(&entry_map, "title-prefix"),
                labels: list_field(&entry_map, "labels"),
                reviewers: list_field(&entry_map, "reviewers"),
                draft: entry_map.get("draft").and_then(Value::as_bool).unwrap_or(true),
            },
            "create-pull-request-review-comment" => {
                SafeOutputKind::CreatePullRequestReviewComment {
                    max: u64_field(&entry_map, "max"),
                }
            }
            "add-comment" => SafeOutputKind::AddComment {
                max: u64_field(&entry_map, "max"),
                target: str_field(&entry_map, "target"),
            },
            "push-to-pull-request-branch" => SafeOutputKind::PushToPullRequestBranch {
                target: str_field(&entry_map, "target"),
            },
            "upload-asset" => {
                let allowed = list_field(&entry_map, "allowed-exts");
                let allowed_extensions = if allowed.is_empty() {
                    DEFAULT_ASSET_EXTENSIONS.iter().map(|s| s.to_string()).collect()
                } else {
                    allowed
                };
                SafeOutputKind::UploadAsset {
                    allowed_extensions,
                    max_size_kb: u64_field(&entry_map, "max-size-kb")
                        .unwrap_or(DEFAULT_ASSET_MAX_SIZE_KB),
                }
            }
            "create-discussion" => SafeOutputKind::CreateDiscussion {
                title_prefix: str_field(&entry_map, "title-prefix"),
                max: u64_field(&entry_map, "max"),
            },
            "add-labels" => SafeOutputKind::AddLabels {
                allowed: list_field(&entry_map, "allowed"),
                max: u64_field(&entry_map, "max"),
            },
            "update-issue" => SafeOutputKind::UpdateIssue,
            "missing-tool" => {
                if entry.as_bool() == Some(false) {
                    missing_tool_disabled = true;
                } else {
                    config.kinds.push(SafeOutputKind::MissingTool);
                }
                continue;
            }
            other => {
                return Err(CompilerError::validation(
                    path,
                    format!("unknown safe-output kind '{other}'"),
                ));
            }
        };
        config.kinds.push(kind);
    }

    let has_missing_tool = config
        .kinds
        .iter()
        .any(|k| matches!(k, SafeOutputKind::MissingTool));
    if !config.kinds.is_empty() && !has_missing_tool && !missing_tool_disabled {
        config.kinds.push(SafeOutputKind::MissingTool);
    }

    Ok(Some(config))
}

fn str_field(map: &Mapping, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn list_field(map: &Mapping, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Sequence(entries)) => entries
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn u64_field(map: &Mapping, key: &str) -> Option<u64> {
    map.get(key).and_then(Value::as_u64)
}

/// The gate every safe-output post-job runs behind.
pub fn output_gate(agent_job: &str, kind: &str) -> String {
    format!(
        "!cancelled() && needs.{agent_job}.result != 'skipped' && \
         contains(needs.{agent_job}.outputs.output_types, '{kind}')"
    )
}

/// Where the post-job script lives. Dev mode references the checked-out
/// action sources; release mode the published runtime image path.
fn script_path(kind: &SafeOutputKind, action_mode: &str) -> String {
    let stem = kind.job_name();
    match action_mode {
        "dev" => format!("./.github/actions/safe-outputs/{stem}.cjs"),
        _ => format!("/opt/gh-aw/safeoutputs/{stem}.cjs"),
    }
}

/// Build one post-job per declared safe-output kind. Downloads are recorded
/// against the artifact manager so reachability validation covers them.
pub fn build_safe_output_jobs(
    config: &SafeOutputsConfig,
    agent_job: &str,
    activation_job: Option<&str>,
    action_mode: &str,
    artifacts: &mut ArtifactManager,
) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();

    for kind in &config.kinds {
        let mut job = Job::new(kind.job_name());
        job.needs.push(agent_job.to_string());
        if let Some(activation) = activation_job {
            job.needs.push(activation.to_string());
        }
        job.condition = Some(output_gate(agent_job, kind.kind_name()));
        job.permissions = Some(kind.permissions());
        job.runs_on = Some(Value::String("ubuntu-latest".into()));
        job.timeout_minutes = Some(10);

        artifacts.record_download(ArtifactDownload {
            name: Some(AGENT_OUTPUT_ARTIFACT.to_string()),
            path: "/tmp/gh-aw/safeoutputs".into(),
            job_name: job.name.clone(),
            depends_on: vec![agent_job.to_string()],
            ..ArtifactDownload::default()
        })?;

        job.steps.push(format!(
            "- name: Download agent outputs\n  uses: actions/download-artifact@v4\n  with:\n    name: {AGENT_OUTPUT_ARTIFACT}\n    path: /tmp/gh-aw/safeoutputs\n"
        ));

        let mut env_lines = vec![format!(
            "    GH_AW_AGENT_OUTPUT: /tmp/gh-aw/safeoutputs/{AGENT_OUTPUT_ARTIFACT}.json"
        )];
        append_kind_env(kind, &mut env_lines);

        job.steps.push(format!(
            "- name: {title}\n  uses: actions/github-script@v7\n  env:\n{env}\n  with:\n    script: |\n      const {{ main }} = require('{script}');\n      await main({{ github, context, core }});\n",
            title = step_title(kind),
            env = env_lines.join("\n"),
            script = script_path(kind, action_mode),
        ));

        jobs.push(job);
    }
    Ok(jobs)
}

fn step_title(kind: &SafeOutputKind) -> &'static str {
    match kind {
        SafeOutputKind::CreateIssue { .. } => "Create issue",
        SafeOutputKind::CreatePullRequest { .. } => "Create pull request",
        SafeOutputKind::CreatePullRequestReviewComment { .. } => "Create PR review comment",
        SafeOutputKind::AddComment { .. } => "Add comment",
        SafeOutputKind::PushToPullRequestBranch { .. } => "Push to pull request branch",
        SafeOutputKind::UploadAsset { .. } => "Upload assets",
        SafeOutputKind::CreateDiscussion { .. } => "Create discussion",
        SafeOutputKind::AddLabels { .. } => "Add labels",
        SafeOutputKind::UpdateIssue => "Update issue",
        SafeOutputKind::MissingTool => "Record missing tools",
    }
}

fn append_kind_env(kind: &SafeOutputKind, env_lines: &mut Vec<String>) {
    let mut push = |key: &str, value: String| {
        env_lines.push(format!("    {key}: {value:?}"));
    };
    match kind {
        SafeOutputKind::CreateIssue {
            title_prefix,
            labels,
            assignees,
            max,
        } => {
            if let Some(prefix) = title_prefix {
                push("GH_AW_ISSUE_TITLE_PREFIX", prefix.clone());
            }
            if !labels.is_empty() {
                push("GH_AW_ISSUE_LABELS", labels.join(","));
            }
            if !assignees.is_empty() {
                push("GH_AW_ISSUE_ASSIGNEES", assignees.join(","));
            }
            if let Some(max) = max {
                push("GH_AW_ISSUE_MAX", max.to_string());
            }
        }
        SafeOutputKind::CreatePullRequest {
            title_prefix,
            labels,
            reviewers,
            draft,
        } => {
            if let Some(prefix) = title_prefix {
                push("GH_AW_PR_TITLE_PREFIX", prefix.clone());
            }
            if !labels.is_empty() {
                push("GH_AW_PR_LABELS", labels.join(","));
            }
            if !reviewers.is_empty() {
                push("GH_AW_PR_REVIEWERS", reviewers.join(","));
            }
            push("GH_AW_PR_DRAFT", draft.to_string());
        }
        SafeOutputKind::AddComment { max, target } => {
            if let Some(max) = max {
                push("GH_AW_COMMENT_MAX", max.to_string());
            }
            if let Some(target) = target {
                push("GH_AW_COMMENT_TARGET", target.clone());
            }
        }
        SafeOutputKind::PushToPullRequestBranch { target } => {
            if let Some(target) = target {
                push("GH_AW_PUSH_TARGET", target.clone());
            }
        }
        SafeOutputKind::UploadAsset {
            allowed_extensions,
            max_size_kb,
        } => {
            push("GH_AW_ASSET_ALLOWED_EXTS", allowed_extensions.join(","));
            push("GH_AW_ASSET_MAX_SIZE_KB", max_size_kb.to_string());
        }
        SafeOutputKind::AddLabels { allowed, max } => {
            if !allowed.is_empty() {
                push("GH_AW_LABELS_ALLOWED", allowed.join(","));
            }
            if let Some(max) = max {
                push("GH_AW_LABELS_MAX", max.to_string());
            }
        }
        SafeOutputKind::CreateDiscussion { title_prefix, max } => {
            if let Some(prefix) = title_prefix {
                push("GH_AW_DISCUSSION_TITLE_PREFIX", prefix.clone());
            }
            if let Some(max) = max {
                push("GH_AW_DISCUSSION_MAX", max.to_string());
            }
        }
        SafeOutputKind::CreatePullRequestReviewComment { max } => {
            if let Some(max) = max {
                push("GH_AW_REVIEW_COMMENT_MAX", max.to_string());
            }
        }
        SafeOutputKind::UpdateIssue | SafeOutputKind::MissingTool => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Option<SafeOutputsConfig> {
        let fm: Mapping = serde_yaml::from_str(yaml).unwrap();
        parse_safe_outputs(&fm, "wf.md").unwrap()
    }

    #[test]
    fn absent_block_parses_to_none() {
        assert!(parse("on: push\n").is_none());
    }

    #[test]
    fn create_issue_fields_parse() {
        let config = parse(
            "safe-outputs:\n  create-issue:\n    title-prefix: '[bot] '\n    labels: [automation]\n    max: 3\n",
        )
        .unwrap();
        let issue = config
            .kinds
            .iter()
            .find(|k| k.kind_name() == "create-issue")
            .unwrap();
        match issue {
            SafeOutputKind::CreateIssue {
                title_prefix,
                labels,
                max,
                ..
            } => {
                assert_eq!(title_prefix.as_deref(), Some("[bot] "));
                assert_eq!(labels, &["automation"]);
                assert_eq!(*max, Some(3));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn missing_tool_is_implicit() {
        let config = parse("safe-outputs:\n  create-issue:\n").unwrap();
        assert!(config
            .kinds
            .iter()
            .any(|k| matches!(k, SafeOutputKind::MissingTool)));
    }

    #[test]
    fn missing_tool_can_be_disabled() {
        let config = parse("safe-outputs:\n  create-issue:\n  missing-tool: false\n").unwrap();
        assert!(!config
            .kinds
            .iter()
            .any(|k| matches!(k, SafeOutputKind::MissingTool)));
    }

    #[test]
    fn upload_asset_defaults() {
        let config = parse("safe-outputs:\n  upload-asset:\n").unwrap();
        let asset = config
            .kinds
            .iter()
            .find(|k| k.kind_name() == "upload-asset")
            .unwrap();
        match asset {
            SafeOutputKind::UploadAsset {
                allowed_extensions,
                max_size_kb,
            } => {
                assert_eq!(allowed_extensions, &[".png", ".jpg", ".jpeg"]);
                assert_eq!(*max_size_kb, DEFAULT_ASSET_MAX_SIZE_KB);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn upload_asset_config_replaces_defaults() {
        let config = parse(
            "safe-outputs:\n  upload-asset:\n    allowed-exts: ['.svg']\n    max-size-kb: 512\n",
        )
        .unwrap();
        match config
            .kinds
            .iter()
            .find(|k| k.kind_name() == "upload-asset")
            .unwrap()
        {
            SafeOutputKind::UploadAsset {
                allowed_extensions,
                max_size_kb,
            } => {
                assert_eq!(allowed_extensions, &[".svg"]);
                assert_eq!(*max_size_kb, 512);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let fm: Mapping = serde_yaml::from_str("safe-outputs:\n  send-email:\n").unwrap();
        let err = parse_safe_outputs(&fm, "wf.md").unwrap_err();
        assert!(err.to_string().contains("unknown safe-output kind 'send-email'"));
    }

    #[test]
    fn gate_condition_has_exact_form() {
        assert_eq!(
            output_gate("agent", "create-issue"),
            "!cancelled() && needs.agent.result != 'skipped' && \
             contains(needs.agent.outputs.output_types, 'create-issue')"
        );
    }

    #[test]
    fn jobs_are_gated_and_wired() {
        let config = parse("safe-outputs:\n  create-issue:\n  add-comment:\n").unwrap();
        let mut artifacts = ArtifactManager::new("wf.md");
        let jobs =
            build_safe_output_jobs(&config, "agent", Some("activation"), "dev", &mut artifacts)
                .unwrap();

        // create-issue, add-comment, implicit missing-tool
        assert_eq!(jobs.len(), 3);
        let issue_job = jobs.iter().find(|j| j.name == "create_issue").unwrap();
        assert!(issue_job.needs.contains(&"agent".to_string()));
        assert!(issue_job.needs.contains(&"activation".to_string()));
        assert!(issue_job
            .condition
            .as_deref()
            .unwrap()
            .contains("contains(needs.agent.outputs.output_types, 'create-issue')"));
        assert_eq!(
            issue_job.permissions.as_ref().unwrap().get(Scope::Issues),
            Level::Write
        );
        // Each job downloads the agent output artifact.
        assert_eq!(artifacts.downloads().len(), 3);
    }

    #[test]
    fn dev_mode_references_local_scripts() {
        let config = parse("safe-outputs:\n  create-issue:\n  missing-tool: false\n").unwrap();
        let mut artifacts = ArtifactManager::new("wf.md");
        let jobs = build_safe_output_jobs(&config, "agent", None, "dev", &mut artifacts).unwrap();
        assert!(jobs[0].steps[1].contains("./.github/actions/safe-outputs/create_issue.cjs"));

        let mut artifacts = ArtifactManager::new("wf.md");
        let jobs =
            build_safe_output_jobs(&config, "agent", None, "release", &mut artifacts).unwrap();
        assert!(jobs[0].steps[1].contains("/opt/gh-aw/safeoutputs/create_issue.cjs"));
    }

    #[test]
    fn permissions_are_minimal_per_kind() {
        let pr = SafeOutputKind::CreatePullRequest {
            title_prefix: None,
            labels: vec![],
            reviewers: vec![],
            draft: true,
        };
        let perms = pr.permissions();
        assert_eq!(perms.get(Scope::Contents), Level::Write);
        assert_eq!(perms.get(Scope::PullRequests), Level::Write);
        assert_eq!(perms.get(Scope::Issues), Level::None);
    }
}
