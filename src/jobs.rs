//! Job graph assembly and validation
//!
//! Jobs collect here as they are built (activation gate, agent, safe-output
//! post-jobs, user-declared custom jobs). Before emission the graph is
//! checked for unique names, resolvable and acyclic `needs`, and duplicate
//! step names within a job. Jobs render in alphabetical order: GitHub
//! Actions derives execution order from `needs`, and alphabetical keys keep
//! human diffs stable.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::{Mapping, Value};

use crate::error::{CompilerError, Result};
use crate::permissions::Permissions;

/// First `name:` key of a step fragment, for duplicate detection when the
/// fragment is not parseable YAML on its own.
static STEP_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*-?\s*name:\s*(.+?)\s*$").expect("step name regex compiles"));

#[derive(Debug, Default)]
pub struct Job {
    pub name: String,
    pub runs_on: Option<Value>,
    pub needs: Vec<String>,
    pub condition: Option<String>,
    pub permissions: Option<Permissions>,
    pub outputs: BTreeMap<String, String>,
    /// Rendered YAML list-item fragments, one per step
    pub steps: Vec<String>,
    /// Reusable-workflow reference; mutually exclusive with steps
    pub uses: Option<String>,
    pub env: BTreeMap<String, String>,
    pub timeout_minutes: Option<u64>,
    /// Set when the activation job guards a `workflow_run` trigger
    pub has_workflow_run_safety_checks: bool,
}

impl Job {
    pub fn new(name: impl Into<String>) -> Self {
        Job {
            name: name.into(),
            ..Job::default()
        }
    }
}

/// Extract the step's `name:` for duplicate detection.
pub fn step_name(fragment: &str) -> Option<String> {
    if let Ok(value) = serde_yaml::from_str::<Value>(fragment) {
        let step = match &value {
            Value::Sequence(seq) => seq.first(),
            other => Some(other),
        };
        if let Some(Value::Mapping(map)) = step {
            if let Some(name) = map.get("name").and_then(Value::as_str) {
                return Some(name.trim().trim_matches('"').to_string());
            }
        }
    }
    STEP_NAME_RE
        .captures(fragment)
        .map(|cap| cap[1].trim_matches('"').to_string())
}

#[derive(Debug)]
pub struct JobManager {
    /// BTreeMap keeps job iteration (and rendering) alphabetical.
    jobs: BTreeMap<String, Job>,
    workflow_path: String,
}

impl JobManager {
    pub fn new(workflow_path: impl Into<String>) -> Self {
        Self {
            jobs: BTreeMap::new(),
            workflow_path: workflow_path.into(),
        }
    }

    pub fn add_job(&mut self, job: Job) -> Result<()> {
        if job.name.is_empty() {
            return Err(CompilerError::graph(
                &self.workflow_path,
                "job name cannot be empty",
            ));
        }
        if self.jobs.contains_key(&job.name) {
            return Err(CompilerError::graph(
                &self.workflow_path,
                format!("duplicate job name '{}'", job.name),
            ));
        }
        self.jobs.insert(job.name.clone(), job);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Job> {
        self.jobs.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Job> {
        self.jobs.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// `needs` map for reachability computations elsewhere.
    pub fn needs_map(&self) -> BTreeMap<String, Vec<String>> {
        self.jobs
            .iter()
            .map(|(name, job)| (name.clone(), job.needs.clone()))
            .collect()
    }

    /// Every `needs` entry must resolve to a registered job, and the graph
    /// must be acyclic. Self-loops count as cycles.
    pub fn validate_dependencies(&self) -> Result<()> {
        for job in self.jobs.values() {
            for dep in &job.needs {
                if !self.jobs.contains_key(dep) {
                    return Err(CompilerError::graph(
                        &self.workflow_path,
                        format!("job '{}' needs unknown job '{}'", job.name, dep),
                    ));
                }
            }
        }

        // Kahn's algorithm; anything left over sits on a cycle.
        let mut in_degree: BTreeMap<&str, usize> =
            self.jobs.keys().map(|name| (name.as_str(), 0)).collect();
        for job in self.jobs.values() {
            let unique: BTreeSet<&str> = job.needs.iter().map(String::as_str).collect();
            *in_degree.get_mut(job.name.as_str()).unwrap() += unique.len();
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut processed = 0usize;
        while let Some(&name) = ready.iter().next() {
            ready.remove(name);
            processed += 1;
            for job in self.jobs.values() {
                if job.needs.iter().any(|dep| dep == name) {
                    let deg = in_degree.get_mut(job.name.as_str()).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(job.name.as_str());
                    }
                }
            }
        }

        if processed < self.jobs.len() {
            let participant = in_degree
                .iter()
                .filter(|(_, deg)| **deg > 0)
                .map(|(name, _)| *name)
                .next()
                .unwrap_or_default();
            return Err(CompilerError::graph(
                &self.workflow_path,
                format!("dependency cycle detected involving job '{participant}'"),
            ));
        }
        Ok(())
    }

    /// No two steps within one job may share a non-empty `name`. Duplicates
    /// across different jobs are fine.
    pub fn validate_duplicate_steps(&self) -> Result<()> {
        for job in self.jobs.values() {
            let mut seen: BTreeMap<String, usize> = BTreeMap::new();
            for (position, fragment) in job.steps.iter().enumerate() {
                let Some(name) = step_name(fragment) else {
                    continue;
                };
                if name.is_empty() {
                    continue;
                }
                match seen.get(&name) {
                    Some(&first) => {
                        return Err(CompilerError::graph(
                            &self.workflow_path,
                            format!(
                                "duplicate step name '{name}' in job '{}' at positions {first} and {position}",
                                job.name
                            ),
                        ));
                    }
                    None => {
                        seen.insert(name, position);
                    }
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm with alphabetic tie-breaking on the ready set.
    /// Stable across runs for identical input.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        self.validate_dependencies()?;

        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = self
            .jobs
            .values()
            .map(|job| {
                (
                    job.name.as_str(),
                    job.needs.iter().map(String::as_str).collect(),
                )
            })
            .collect();
        let mut order = Vec::with_capacity(self.jobs.len());

        while !remaining.is_empty() {
            // BTreeMap iteration gives the alphabetically first ready job.
            let next = remaining
                .iter()
                .find(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name)
                .expect("acyclic graph always has a ready job");
            remaining.remove(next);
            for deps in remaining.values_mut() {
                deps.remove(next);
            }
            order.push(next.to_string());
        }
        Ok(order)
    }

    /// Render `jobs:` as a YAML mapping, jobs alphabetical, keys per job in
    /// fixed order: `if`, `needs`, `runs-on`, `permissions`, `env`,
    /// `timeout-minutes`, `outputs`, then `uses` or `steps`.
    pub fn render_jobs(&self) -> Result<Value> {
        let mut jobs_map = Mapping::new();
        for (name, job) in &self.jobs {
            jobs_map.insert(
                Value::String(name.clone()),
                self.render_job(job)?,
            );
        }
        Ok(Value::Mapping(jobs_map))
    }

    fn render_job(&self, job: &Job) -> Result<Value> {
        let mut map = Mapping::new();

        if let Some(condition) = &job.condition {
            map.insert(Value::String("if".into()), Value::String(condition.clone()));
        }

        if !job.needs.is_empty() {
            let mut needs = job.needs.clone();
            needs.sort();
            needs.dedup();
            let value = if needs.len() == 1 {
                Value::String(needs.remove(0))
            } else {
                Value::Sequence(needs.into_iter().map(Value::String).collect())
            };
            map.insert(Value::String("needs".into()), value);
        }

        if let Some(runs_on) = &job.runs_on {
            map.insert(Value::String("runs-on".into()), runs_on.clone());
        }

        if let Some(permissions) = &job.permissions {
            if !permissions.is_empty() {
                map.insert(Value::String("permissions".into()), permissions.to_yaml());
            }
        }

        if !job.env.is_empty() {
            let mut env = Mapping::new();
            for (k, v) in &job.env {
                env.insert(Value::String(k.clone()), Value::String(v.clone()));
            }
            map.insert(Value::String("env".into()), Value::Mapping(env));
        }

        if let Some(timeout) = job.timeout_minutes {
            map.insert(
                Value::String("timeout-minutes".into()),
                Value::Number(timeout.into()),
            );
        }

        if !job.outputs.is_empty() {
            let mut outputs = Mapping::new();
            for (k, v) in &job.outputs {
                outputs.insert(Value::String(k.clone()), Value::String(v.clone()));
            }
            map.insert(Value::String("outputs".into()), Value::Mapping(outputs));
        }

        if let Some(uses) = &job.uses {
            map.insert(Value::String("uses".into()), Value::String(uses.clone()));
        } else {
            let mut steps = Vec::new();
            for fragment in &job.steps {
                let parsed: Value = serde_yaml::from_str(fragment).map_err(|e| {
                    CompilerError::emit(
                        &self.workflow_path,
                        format!("step in job '{}' is not valid YAML: {e}", job.name),
                    )
                })?;
                match parsed {
                    Value::Sequence(items) => steps.extend(items),
                    other => steps.push(other),
                }
            }
            map.insert(Value::String("steps".into()), Value::Sequence(steps));
        }

        Ok(Value::Mapping(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JobManager {
        JobManager::new("wf.md")
    }

    fn job_with_needs(name: &str, needs: &[&str]) -> Job {
        let mut job = Job::new(name);
        job.needs = needs.iter().map(|s| s.to_string()).collect();
        job
    }

    #[test]
    fn add_job_rejects_duplicates() {
        let mut mgr = manager();
        mgr.add_job(Job::new("agent")).unwrap();
        let err = mgr.add_job(Job::new("agent")).unwrap_err();
        assert!(err.to_string().contains("duplicate job name 'agent'"));
    }

    #[test]
    fn add_job_rejects_empty_name() {
        let mut mgr = manager();
        assert!(mgr.add_job(Job::new("")).is_err());
    }

    #[test]
    fn dangling_needs_is_rejected() {
        let mut mgr = manager();
        mgr.add_job(job_with_needs("deploy", &["build"])).unwrap();
        let err = mgr.validate_dependencies().unwrap_err();
        assert!(err
            .to_string()
            .contains("job 'deploy' needs unknown job 'build'"));
    }

    #[test]
    fn cycle_is_rejected_with_participant_named() {
        let mut mgr = manager();
        mgr.add_job(job_with_needs("a", &["b"])).unwrap();
        mgr.add_job(job_with_needs("b", &["a"])).unwrap();
        let err = mgr.validate_dependencies().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("dependency cycle"));
        assert!(msg.contains("'a'") || msg.contains("'b'"));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut mgr = manager();
        mgr.add_job(job_with_needs("a", &["a"])).unwrap();
        assert!(mgr.validate_dependencies().is_err());
    }

    #[test]
    fn valid_dag_passes() {
        let mut mgr = manager();
        mgr.add_job(Job::new("activation")).unwrap();
        mgr.add_job(job_with_needs("agent", &["activation"])).unwrap();
        mgr.add_job(job_with_needs("create_issue", &["agent", "activation"]))
            .unwrap();
        assert!(mgr.validate_dependencies().is_ok());
    }

    #[test]
    fn topological_order_breaks_ties_alphabetically() {
        let mut mgr = manager();
        mgr.add_job(Job::new("zeta")).unwrap();
        mgr.add_job(Job::new("alpha")).unwrap();
        mgr.add_job(job_with_needs("omega", &["alpha", "zeta"])).unwrap();

        let order = mgr.topological_order().unwrap();
        assert_eq!(order, vec!["alpha", "zeta", "omega"]);
    }

    #[test]
    fn duplicate_step_in_one_job_is_rejected_with_positions() {
        let mut mgr = manager();
        let mut job = Job::new("agent");
        job.steps = vec![
            "- name: Checkout code\n  uses: actions/checkout@v5\n".to_string(),
            "- name: Setup\n  run: ./setup.sh\n".to_string(),
            "- name: Checkout code\n  uses: actions/checkout@v5\n".to_string(),
        ];
        mgr.add_job(job).unwrap();

        let err = mgr.validate_duplicate_steps().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Checkout code"));
        assert!(msg.contains("'agent'"));
        assert!(msg.contains("positions 0 and 2"));
    }

    #[test]
    fn duplicate_steps_across_jobs_are_permitted() {
        let mut mgr = manager();
        let mut a = Job::new("a");
        a.steps = vec!["- name: Checkout code\n  uses: actions/checkout@v5\n".to_string()];
        let mut b = Job::new("b");
        b.steps = vec!["- name: Checkout code\n  uses: actions/checkout@v5\n".to_string()];
        mgr.add_job(a).unwrap();
        mgr.add_job(b).unwrap();
        assert!(mgr.validate_duplicate_steps().is_ok());
    }

    #[test]
    fn unnamed_steps_never_collide() {
        let mut mgr = manager();
        let mut job = Job::new("agent");
        job.steps = vec![
            "- run: echo one\n".to_string(),
            "- run: echo two\n".to_string(),
        ];
        mgr.add_job(job).unwrap();
        assert!(mgr.validate_duplicate_steps().is_ok());
    }

    #[test]
    fn singleton_needs_renders_as_scalar() {
        let mut mgr = manager();
        mgr.add_job(Job::new("agent")).unwrap();
        let mut job = job_with_needs("post", &["agent"]);
        job.steps = vec!["- run: echo done\n".to_string()];
        mgr.add_job(job).unwrap();

        let rendered = mgr.render_jobs().unwrap();
        assert_eq!(rendered["post"]["needs"], Value::String("agent".into()));
    }

    #[test]
    fn multi_needs_render_as_sorted_list() {
        let mut mgr = manager();
        mgr.add_job(Job::new("agent")).unwrap();
        mgr.add_job(Job::new("activation")).unwrap();
        let job = job_with_needs("post", &["agent", "activation"]);
        mgr.add_job(job).unwrap();

        let rendered = mgr.render_jobs().unwrap();
        let needs = rendered["post"]["needs"].as_sequence().unwrap();
        assert_eq!(needs[0], Value::String("activation".into()));
        assert_eq!(needs[1], Value::String("agent".into()));
    }

    #[test]
    fn job_keys_follow_fixed_order() {
        let mut mgr = manager();
        mgr.add_job(Job::new("agent")).unwrap();
        let mut job = job_with_needs("post", &["agent"]);
        job.condition = Some("!cancelled()".to_string());
        job.runs_on = Some(Value::String("ubuntu-latest".into()));
        let mut perms = Permissions::new();
        perms.set(crate::permissions::Scope::Issues, crate::permissions::Level::Write);
        job.permissions = Some(perms);
        job.steps = vec!["- run: echo hi\n".to_string()];
        mgr.add_job(job).unwrap();

        let rendered = mgr.render_jobs().unwrap();
        let keys: Vec<String> = rendered["post"]
            .as_mapping()
            .unwrap()
            .keys()
            .map(|k| k.as_str().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["if", "needs", "runs-on", "permissions", "steps"]);
    }

    #[test]
    fn jobs_render_alphabetically() {
        let mut mgr = manager();
        mgr.add_job(Job::new("zeta")).unwrap();
        mgr.add_job(Job::new("alpha")).unwrap();

        let rendered = mgr.render_jobs().unwrap();
        let keys: Vec<&str> = rendered
            .as_mapping()
            .unwrap()
            .keys()
            .map(|k| k.as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
    }

    #[test]
    fn step_name_extracts_from_fragment() {
        assert_eq!(
            step_name("- name: Checkout code\n  uses: actions/checkout@v5\n"),
            Some("Checkout code".to_string())
        );
        assert_eq!(step_name("- run: echo hi\n"), None);
    }

    #[test]
    fn uses_job_renders_without_steps() {
        let mut mgr = manager();
        let mut job = Job::new("reusable");
        job.uses = Some("octo/workflows/.github/workflows/ci.yml@main".to_string());
        mgr.add_job(job).unwrap();

        let rendered = mgr.render_jobs().unwrap();
        assert!(rendered["reusable"]["uses"].is_string());
        assert!(rendered["reusable"].get("steps").is_none());
    }
}
