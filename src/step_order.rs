//! Step-order tracking for the secret-redaction invariant
//!
//! The agent job writes logs and outputs that may contain secrets. Every
//! artifact upload emitted after agent execution must therefore be preceded
//! by a secret-redaction step whose scan scope covers the uploaded paths.
//! Steps emitted before agent execution carry no agent output and are
//! exempt.

use crate::error::{CompilerError, Result};

/// Directories the redaction step scans
pub const SCAN_ROOTS: [&str; 2] = ["/tmp/gh-aw/", "/opt/gh-aw/"];

/// Text file extensions the redaction step scans
pub const SCANNABLE_EXTENSIONS: [&str; 5] = ["json", "jsonl", "txt", "log", "md"];

#[derive(Debug)]
enum StepEvent {
    AgentExecutionComplete,
    SecretRedaction {
        #[allow(dead_code)] // Kept for diagnostics and debug output
        name: String,
    },
    ArtifactUpload {
        name: String,
        paths: Vec<String>,
    },
}

/// Append-only log of compiler-emitted step events for one job
#[derive(Debug, Default)]
pub struct StepOrderTracker {
    events: Vec<StepEvent>,
    workflow_path: String,
}

impl StepOrderTracker {
    pub fn new(workflow_path: impl Into<String>) -> Self {
        Self {
            events: Vec::new(),
            workflow_path: workflow_path.into(),
        }
    }

    pub fn mark_agent_execution_complete(&mut self) {
        self.events.push(StepEvent::AgentExecutionComplete);
    }

    pub fn record_secret_redaction(&mut self, name: impl Into<String>) {
        self.events.push(StepEvent::SecretRedaction { name: name.into() });
    }

    pub fn record_artifact_upload(&mut self, name: impl Into<String>, paths: Vec<String>) {
        self.events.push(StepEvent::ArtifactUpload {
            name: name.into(),
            paths,
        });
    }

    /// Check the redaction-before-upload invariant over the recorded events.
    pub fn validate_step_ordering(&self) -> Result<()> {
        let any_redaction = self
            .events
            .iter()
            .any(|e| matches!(e, StepEvent::SecretRedaction { .. }));

        let mut after_agent = false;
        let mut redaction_seen = false;

        for event in &self.events {
            match event {
                StepEvent::AgentExecutionComplete => after_agent = true,
                StepEvent::SecretRedaction { .. } => redaction_seen = true,
                StepEvent::ArtifactUpload { name, paths } => {
                    if !after_agent {
                        continue;
                    }
                    if !any_redaction {
                        return Err(CompilerError::artifact(
                            &self.workflow_path,
                            "artifact uploads found but no secret redaction step was added",
                        ));
                    }
                    if !redaction_seen {
                        return Err(CompilerError::artifact(
                            &self.workflow_path,
                            format!(
                                "artifact upload '{name}' appears before secret redaction. \
                                 This is a compiler bug - secret redaction must happen \
                                 before artifact uploads"
                            ),
                        ));
                    }
                    for path in paths {
                        if !is_path_scanned_by_secret_redaction(path) {
                            return Err(CompilerError::artifact(
                                &self.workflow_path,
                                format!(
                                    "artifact upload '{name}' path '{path}' is \
                                     not covered by secret redaction"
                                ),
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Is this upload path inside the redaction scan scope?
///
/// Covered: directories and scannable text files under a scan root, and
/// `${{ env.* }}` references (their values resolve inside the scan roots).
pub fn is_path_scanned_by_secret_redaction(path: &str) -> bool {
    if path.starts_with("${{") {
        return true;
    }
    if !SCAN_ROOTS.iter().any(|root| path.starts_with(root)) {
        return false;
    }
    if path.ends_with('/') {
        return true;
    }
    match path.rsplit('.').next() {
        Some(ext) if !ext.contains('/') => SCANNABLE_EXTENSIONS.contains(&ext),
        _ => false,
    }
}
