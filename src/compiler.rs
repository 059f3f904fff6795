//! Compilation pipeline
//!
//! One `Compiler` value holds the per-process options; each call to
//! [`Compiler::compile_workflow`] owns its JobManager, ArtifactManager,
//! ExpressionExtractor state and StepOrderTracker for the duration of that
//! call. Phases that accumulate diagnostics (schema shape, event filters,
//! runtime imports, permissions, network) report everything before the
//! compile aborts; structural phases fail fast. No `.lock.yml` content is
//! written here; the caller writes the rendered text only on success, so
//! a failed compile leaves any previous lock file untouched.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::artifacts::ArtifactManager;
use crate::emit::LockFile;
use crate::engine::{self, ACTIVATION_JOB, AGENT_JOB};
use crate::error::{CompilerError, Diagnostics, Severity};
use crate::expr;
use crate::frontmatter;
use crate::imports;
use crate::jobs::{Job, JobManager};
use crate::network;
use crate::permissions::{Level, Permissions, Scope};
use crate::runtime_imports;
use crate::safe_outputs;
use crate::schema;
use crate::step_order::StepOrderTracker;
use crate::toolsets;
use crate::tools;

#[derive(Debug, Clone)]
pub struct Compiler {
    /// `dev` references local action paths, `release` published refs
    pub action_mode: String,
    /// Escalate upgradeable warnings to errors
    pub strict: bool,
    /// Compile and report, but never write the lock file
    pub trial_mode: bool,
    /// Skip the cross-cutting validation passes (still parses and emits)
    pub skip_validation: bool,
}

impl Default for Compiler {
    fn default() -> Self {
        Self {
            action_mode: "release".to_string(),
            strict: false,
            trial_mode: false,
            skip_validation: false,
        }
    }
}

#[derive(Debug)]
pub struct CompileResult {
    /// Sibling `.lock.yml` path for the input file
    pub lock_path: PathBuf,
    /// Rendered lock-file content
    pub content: String,
    /// Non-fatal diagnostics to surface to the user
    pub warnings: Vec<CompilerError>,
}

impl Compiler {
    pub fn new(action_mode: impl Into<String>, strict: bool) -> Self {
        Self {
            action_mode: action_mode.into(),
            strict,
            ..Self::default()
        }
    }

    /// Compile one Markdown workflow to lock-file content.
    pub fn compile_workflow(&self, path: &Path) -> Result<CompileResult, Diagnostics> {
        let resolved = imports::resolve_workflow(path).map_err(single)?;
        let wf_path = resolved.path.clone();
        tracing::debug!(
            workflow = %wf_path,
            imports = resolved.manifest.len(),
            "resolved workflow imports"
        );
        let mut frontmatter = resolved.frontmatter;

        let strict = self.strict
            || frontmatter
                .get("strict")
                .and_then(Value::as_bool)
                .unwrap_or(false);

        // Typed config parses; each failure is fatal on its own.
        let engine_config = engine::parse_engine(&frontmatter, &wf_path).map_err(single)?;
        let tools_config = tools::parse_tools(&frontmatter, &wf_path).map_err(single)?;
        let network_config = network::parse_network(&frontmatter, &wf_path).map_err(single)?;
        let safe_outputs_config =
            safe_outputs::parse_safe_outputs(&frontmatter, &wf_path).map_err(single)?;

        let declared_permissions = match frontmatter.get("permissions") {
            Some(value) => Permissions::parse(value, &wf_path).map_err(single)?,
            None => {
                let mut perms = Permissions::new();
                perms.set(Scope::Contents, Level::Read);
                perms
            }
        };

        // Accumulating validation passes: the user sees the complete list.
        let mut diags = Diagnostics::new();
        if !self.skip_validation {
            diags.extend(schema::validate_frontmatter(&frontmatter, &wf_path));
            diags.extend(frontmatter::validate_event_filters(&frontmatter, &wf_path));
            diags.extend(runtime_imports::validate_runtime_imports(
                &resolved.runtime_imports,
                &wf_path,
            ));
            if let Some(github) = &tools_config.github {
                diags.extend(toolsets::validate_declared_permissions(
                    &github.toolsets,
                    github.read_only,
                    &declared_permissions,
                    &wf_path,
                ));
            }
            diags.extend(network::validate_network(
                &network_config,
                tools_config.has_container_server(),
                strict,
                &wf_path,
            ));
        }
        if strict {
            diags.escalate_for_strict();
        }
        if diags.has_errors() {
            return Err(diags);
        }
        let warnings: Vec<CompilerError> = diags
            .items
            .into_iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect();

        let stop_after = engine::take_stop_after(&mut frontmatter, &wf_path).map_err(single)?;

        // Expression extraction rewrites the prompt before job assembly.
        let mappings = expr::extract(&resolved.body);
        let prompt = expr::replace(&resolved.body);

        let mut job_manager = JobManager::new(&wf_path);
        let mut artifacts = ArtifactManager::new(&wf_path);
        let mut tracker = StepOrderTracker::new(&wf_path);

        let activation =
            engine::build_activation_job(&frontmatter, stop_after.as_deref(), &self.action_mode);
        let has_activation = activation.is_some();
        let zizmor_workflow_run = activation
            .as_ref()
            .map(|j| j.has_workflow_run_safety_checks)
            .unwrap_or(false);
        if let Some(job) = activation {
            job_manager.add_job(job).map_err(single)?;
        }

        artifacts.set_current_job(AGENT_JOB);
        let mut agent_job = engine::build_agent_job(
            &engine_config,
            &tools_config,
            declared_permissions.clone(),
            &mappings,
            &prompt,
            has_activation,
            frontmatter.get("timeout_minutes").and_then(Value::as_u64),
            frontmatter.get("runs-on").cloned(),
            &mut tracker,
            &mut artifacts,
        )
        .map_err(single)?;
        if let Some(condition) = frontmatter.get("if").and_then(Value::as_str) {
            agent_job.condition = Some(condition.to_string());
        }
        job_manager.add_job(agent_job).map_err(single)?;

        if let Some(config) = &safe_outputs_config {
            let post_jobs = safe_outputs::build_safe_output_jobs(
                config,
                AGENT_JOB,
                has_activation.then_some(ACTIVATION_JOB),
                &self.action_mode,
                &mut artifacts,
            )
            .map_err(single)?;
            for job in post_jobs {
                job_manager.add_job(job).map_err(single)?;
            }
        }

        for job in parse_custom_jobs(&frontmatter, &wf_path).map_err(single)? {
            job_manager.add_job(job).map_err(single)?;
        }

        // Graph and artifact validation.
        job_manager.validate_dependencies().map_err(single)?;
        job_manager.validate_duplicate_steps().map_err(single)?;
        // Exercised for its cycle-freedom guarantee; order itself is not
        // emitted (GitHub derives scheduling from `needs`).
        job_manager.topological_order().map_err(single)?;

        if !self.skip_validation {
            let artifact_errors = artifacts.validate_all_downloads(&job_manager.needs_map());
            if !artifact_errors.is_empty() {
                let mut diags = Diagnostics::new();
                for err in artifact_errors {
                    diags.push(err);
                }
                return Err(diags);
            }
            tracker.validate_step_ordering().map_err(single)?;
        }

        let lock = LockFile {
            name: workflow_name(&frontmatter, &resolved.body, &wf_path),
            on: frontmatter
                .get("on")
                .cloned()
                .unwrap_or(Value::String("workflow_dispatch".into())),
            run_name: frontmatter.get("run-name").cloned(),
            permissions: Some(declared_permissions.to_yaml()),
            concurrency: Some(concurrency_value(&frontmatter)),
            env: frontmatter.get("env").cloned(),
            defaults: frontmatter.get("defaults").cloned(),
            extra: Vec::new(),
            jobs: job_manager.render_jobs().map_err(single)?,
            manifest: resolved.manifest,
            source: wf_path.clone(),
            zizmor_workflow_run,
        };
        let content = lock.render().map_err(single)?;

        Ok(CompileResult {
            lock_path: lock_path_for(path),
            content,
            warnings,
        })
    }

    /// Compile and, on success, write the sibling `.lock.yml`. Trial mode
    /// stops after rendering.
    pub fn compile_and_write(&self, path: &Path) -> Result<CompileResult, Diagnostics> {
        let result = self.compile_workflow(path)?;
        if self.trial_mode {
            tracing::debug!(lock = %result.lock_path.display(), "trial mode, not writing");
            return Ok(result);
        }
        std::fs::write(&result.lock_path, &result.content).map_err(|e| {
            single(
                CompilerError::emit(
                    result.lock_path.to_string_lossy().replace('\\', "/"),
                    format!("failed to write lock file: {e}"),
                )
                .with_cause(e),
            )
        })?;
        Ok(result)
    }
}

fn single(err: CompilerError) -> Diagnostics {
    let mut diags = Diagnostics::new();
    diags.push(err);
    diags
}

pub fn lock_path_for(path: &Path) -> PathBuf {
    path.with_extension("lock.yml")
}

/// Workflow display name: frontmatter `name`, else the first Markdown H1,
/// else the file stem.
fn workflow_name(frontmatter: &Mapping, body: &str, wf_path: &str) -> String {
    if let Some(name) = frontmatter.get("name").and_then(Value::as_str) {
        return name.to_string();
    }
    for line in body.lines() {
        if let Some(title) = line.strip_prefix("# ") {
            let title = title.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }
    Path::new(wf_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| wf_path.to_string())
}

/// One concurrency group per workflow unless the user declares their own.
fn concurrency_value(frontmatter: &Mapping) -> Value {
    if let Some(concurrency) = frontmatter.get("concurrency") {
        return concurrency.clone();
    }
    let mut map = Mapping::new();
    map.insert(
        Value::String("group".into()),
        Value::String("gh-aw-${{ github.workflow }}".into()),
    );
    Value::Mapping(map)
}

/// User-declared custom jobs from the `jobs:` frontmatter block.
fn parse_custom_jobs(frontmatter: &Mapping, wf_path: &str) -> crate::error::Result<Vec<Job>> {
    let Some(value) = frontmatter.get("jobs") else {
        return Ok(Vec::new());
    };
    let map = value.as_mapping().ok_or_else(|| {
        CompilerError::validation(wf_path, "'jobs' must be a mapping of job definitions")
    })?;

    let mut custom = Vec::new();
    for (key, definition) in map {
        let Some(name) = key.as_str() else {
            return Err(CompilerError::validation(wf_path, "job names must be strings"));
        };
        let def = definition.as_mapping().ok_or_else(|| {
            CompilerError::validation(wf_path, format!("job '{name}' must be a mapping"))
        })?;

        let mut job = Job::new(name);
        job.runs_on = def.get("runs-on").cloned();
        job.condition = def.get("if").and_then(Value::as_str).map(str::to_string);
        job.uses = def.get("uses").and_then(Value::as_str).map(str::to_string);
        match def.get("needs") {
            Some(Value::String(dep)) => job.needs.push(dep.clone()),
            Some(Value::Sequence(deps)) => {
                job.needs
                    .extend(deps.iter().filter_map(Value::as_str).map(str::to_string));
            }
            _ => {}
        }
        if let Some(perms) = def.get("permissions") {
            job.permissions = Some(Permissions::parse(perms, wf_path)?);
        }
        if let Some(Value::Sequence(steps)) = def.get("steps") {
            for step in steps {
                let fragment = serde_yaml::to_string(&Value::Sequence(vec![step.clone()]))
                    .map_err(|e| {
                        CompilerError::validation(
                            wf_path,
                            format!("job '{name}' has an unserializable step: {e}"),
                        )
                    })?;
                job.steps.push(fragment);
            }
        }
        custom.push(job);
    }
    Ok(custom)
}
