//! Artifact upload/download bookkeeping
//!
//! Every `upload-artifact` and `download-artifact` step the compiler emits
//! is recorded here. Validation checks that each download resolves to an
//! upload in a job the downloading job transitively depends on, and
//! [`ArtifactManager::compute_download_path`] predicts the exact on-disk
//! location a downloaded file will occupy, matching the runtime behavior of
//! the download action (common-parent stripping, pattern directories,
//! merge semantics). All paths use forward slashes regardless of host OS.

use std::collections::BTreeMap;

use glob::Pattern;
use rustc_hash::FxHashSet;

use crate::error::{CompilerError, Result};

#[derive(Debug, Clone)]
pub struct ArtifactUpload {
    pub name: String,
    pub paths: Vec<String>,
    /// original path -> path after common-parent stripping
    pub normalized_paths: BTreeMap<String, String>,
    pub job_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactDownload {
    /// Exactly one of `name` or `pattern` must be set
    pub name: Option<String>,
    pub pattern: Option<String>,
    pub path: String,
    pub merge_multiple: bool,
    pub job_name: String,
    pub depends_on: Vec<String>,
}

#[derive(Debug)]
pub struct ArtifactManager {
    uploads: Vec<ArtifactUpload>,
    downloads: Vec<ArtifactDownload>,
    current_job: Option<String>,
    workflow_path: String,
}

impl ArtifactManager {
    pub fn new(workflow_path: impl Into<String>) -> Self {
        Self {
            uploads: Vec::new(),
            downloads: Vec::new(),
            current_job: None,
            workflow_path: workflow_path.into(),
        }
    }

    /// Steps recorded after this call attribute to `job`.
    pub fn set_current_job(&mut self, job: impl Into<String>) {
        self.current_job = Some(job.into());
    }

    pub fn uploads(&self) -> &[ArtifactUpload] {
        &self.uploads
    }

    pub fn downloads(&self) -> &[ArtifactDownload] {
        &self.downloads
    }

    /// Record an upload; normalized paths are computed once, here.
    pub fn record_upload(
        &mut self,
        name: impl Into<String>,
        paths: Vec<String>,
        job_name: Option<String>,
    ) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(CompilerError::artifact(
                &self.workflow_path,
                "artifact upload requires a name",
            ));
        }
        if paths.is_empty() {
            return Err(CompilerError::artifact(
                &self.workflow_path,
                format!("artifact upload '{name}' lists no paths"),
            ));
        }
        let job_name = job_name
            .or_else(|| self.current_job.clone())
            .unwrap_or_default();

        let unix_paths: Vec<String> = paths.iter().map(|p| p.replace('\\', "/")).collect();
        let normalized_paths = normalize_paths(&unix_paths);

        self.uploads.push(ArtifactUpload {
            name,
            paths: unix_paths,
            normalized_paths,
            job_name,
        });
        Ok(())
    }

    pub fn record_download(&mut self, mut download: ArtifactDownload) -> Result<()> {
        match (&download.name, &download.pattern) {
            (Some(_), Some(_)) => {
                return Err(CompilerError::artifact(
                    &self.workflow_path,
                    "artifact download cannot set both name and pattern",
                ));
            }
            (None, None) => {
                return Err(CompilerError::artifact(
                    &self.workflow_path,
                    "artifact download requires a name or a pattern",
                ));
            }
            _ => {}
        }
        if download.path.is_empty() {
            return Err(CompilerError::artifact(
                &self.workflow_path,
                "artifact download requires a destination path",
            ));
        }
        if download.job_name.is_empty() {
            download.job_name = self.current_job.clone().unwrap_or_default();
        }
        self.downloads.push(download);
        Ok(())
    }

    /// Check every download against the uploads reachable through its
    /// `depends_on` closure. Returns all mismatches, not just the first.
    pub fn validate_all_downloads(
        &self,
        needs: &BTreeMap<String, Vec<String>>,
    ) -> Vec<CompilerError> {
        let mut errors = Vec::new();
        for download in &self.downloads {
            let reachable = transitive_closure(&download.depends_on, needs);
            let candidate_uploads: Vec<&ArtifactUpload> = self
                .uploads
                .iter()
                .filter(|u| reachable.contains(u.job_name.as_str()))
                .collect();

            if let Some(name) = &download.name {
                if !candidate_uploads.iter().any(|u| &u.name == name) {
                    errors.push(CompilerError::artifact(
                        &self.workflow_path,
                        format!("artifact {name} not found in any dependent job"),
                    ));
                }
            } else if let Some(pattern_str) = &download.pattern {
                match Pattern::new(pattern_str) {
                    Ok(pattern) => {
                        if !candidate_uploads.iter().any(|u| pattern.matches(&u.name)) {
                            errors.push(CompilerError::artifact(
                                &self.workflow_path,
                                format!("no artifacts matching pattern {pattern_str}"),
                            ));
                        }
                    }
                    Err(e) => {
                        errors.push(CompilerError::artifact(
                            &self.workflow_path,
                            format!("invalid artifact pattern '{pattern_str}': {e}"),
                        ));
                    }
                }
            }
        }
        errors
    }

    /// Exact on-disk path for `original_path` of `upload` after `download`
    /// runs. Pattern downloads without merging place each artifact under a
    /// directory named after it, matching the download action's behavior.
    pub fn compute_download_path(
        &self,
        download: &ArtifactDownload,
        upload: &ArtifactUpload,
        original_path: &str,
    ) -> String {
        let original_unix = original_path.replace('\\', "/");
        let rel = match upload.normalized_paths.get(&original_unix) {
            Some(rel) => rel.clone(),
            None => {
                let trimmed = original_unix.trim_start_matches("./");
                if trimmed.starts_with('/') {
                    base_name(trimmed).to_string()
                } else {
                    trimmed.to_string()
                }
            }
        };

        let base = download.path.trim_end_matches('/');
        if download.pattern.is_some() && !download.merge_multiple {
            format!("{base}/{}/{rel}", upload.name)
        } else {
            format!("{base}/{rel}")
        }
    }
}

/// Strip the longest common directory prefix from a set of paths. A single
/// path strips down to its base name.
fn normalize_paths(paths: &[String]) -> BTreeMap<String, String> {
    let mut normalized = BTreeMap::new();

    if paths.len() == 1 {
        let path = &paths[0];
        normalized.insert(path.clone(), base_name(path).to_string());
        return normalized;
    }

    // Component-wise common prefix over the directory parts.
    let split: Vec<Vec<&str>> = paths
        .iter()
        .map(|p| {
            let trimmed = p.trim_end_matches('/');
            let mut parts: Vec<&str> = trimmed.split('/').collect();
            parts.pop(); // final component is the file name
            parts
        })
        .collect();

    let mut common_len = split.iter().map(Vec::len).min().unwrap_or(0);
    'outer: for i in 0..common_len {
        let first = split[0][i];
        for parts in &split[1..] {
            if parts[i] != first {
                common_len = i;
                break 'outer;
            }
        }
    }

    let prefix_parts = &split[0][..common_len];
    let prefix = if prefix_parts.is_empty() {
        String::new()
    } else {
        format!("{}/", prefix_parts.join("/"))
    };

    for path in paths {
        let trimmed = path.trim_end_matches('/');
        let rel = trimmed.strip_prefix(&prefix).unwrap_or(trimmed);
        let rel = rel.trim_start_matches('/');
        normalized.insert(path.clone(), rel.to_string());
    }
    normalized
}

fn base_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Jobs reachable from the seeds through the `needs` edges, seeds included.
fn transitive_closure<'a>(
    seeds: &'a [String],
    needs: &'a BTreeMap<String, Vec<String>>,
) -> FxHashSet<&'a str> {
    let mut reachable: FxHashSet<&str> = FxHashSet::default();
    let mut stack: Vec<&str> = seeds.iter().map(String::as_str).collect();
    while let Some(job) = stack.pop() {
        if !reachable.insert(job) {
            continue;
        }
        if let Some(deps) = needs.get(job) {
            stack.extend(deps.iter().map(String::as_str));
        }
    }
    reachable
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ArtifactManager {
        ArtifactManager::new("wf.md")
    }

    fn no_needs() -> BTreeMap<String, Vec<String>> {
        BTreeMap::new()
    }

    #[test]
    fn upload_requires_name_and_paths() {
        let mut mgr = manager();
        assert!(mgr.record_upload("", vec!["/a".into()], None).is_err());
        assert!(mgr.record_upload("logs", vec![], None).is_err());
    }

    #[test]
    fn upload_takes_current_job_when_absent() {
        let mut mgr = manager();
        mgr.set_current_job("build");
        mgr.record_upload("logs", vec!["/tmp/x.log".into()], None).unwrap();
        assert_eq!(mgr.uploads()[0].job_name, "build");
    }

    #[test]
    fn single_path_normalizes_to_base_name() {
        let mut mgr = manager();
        mgr.record_upload("logs", vec!["/tmp/gh-aw/agent-stdio.log".into()], Some("agent".into()))
            .unwrap();
        assert_eq!(
            mgr.uploads()[0].normalized_paths["/tmp/gh-aw/agent-stdio.log"],
            "agent-stdio.log"
        );
    }

    #[test]
    fn multi_path_strips_common_parent() {
        let mut mgr = manager();
        mgr.record_upload(
            "build-linux",
            vec![
                "/build/output/linux/app".into(),
                "/build/output/linux/lib.so".into(),
            ],
            Some("build".into()),
        )
        .unwrap();
        let upload = &mgr.uploads()[0];
        assert_eq!(upload.normalized_paths["/build/output/linux/app"], "app");
        assert_eq!(upload.normalized_paths["/build/output/linux/lib.so"], "lib.so");
    }

    #[test]
    fn divergent_paths_keep_distinguishing_directories() {
        let mut mgr = manager();
        mgr.record_upload(
            "out",
            vec!["/build/linux/app".into(), "/build/darwin/app".into()],
            Some("build".into()),
        )
        .unwrap();
        let upload = &mgr.uploads()[0];
        assert_eq!(upload.normalized_paths["/build/linux/app"], "linux/app");
        assert_eq!(upload.normalized_paths["/build/darwin/app"], "darwin/app");
    }

    #[test]
    fn download_requires_exactly_one_selector() {
        let mut mgr = manager();
        let both = ArtifactDownload {
            name: Some("a".into()),
            pattern: Some("a-*".into()),
            path: "/deploy".into(),
            ..ArtifactDownload::default()
        };
        assert!(mgr.record_download(both).is_err());

        let neither = ArtifactDownload {
            path: "/deploy".into(),
            ..ArtifactDownload::default()
        };
        assert!(mgr.record_download(neither).is_err());
    }

    #[test]
    fn download_requires_path() {
        let mut mgr = manager();
        let download = ArtifactDownload {
            name: Some("a".into()),
            ..ArtifactDownload::default()
        };
        assert!(mgr.record_download(download).is_err());
    }

    #[test]
    fn name_download_resolves_through_direct_dependency() {
        let mut mgr = manager();
        mgr.record_upload("logs", vec!["/tmp/x.log".into()], Some("build".into()))
            .unwrap();
        mgr.record_download(ArtifactDownload {
            name: Some("logs".into()),
            path: "/deploy".into(),
            job_name: "deploy".into(),
            depends_on: vec!["build".into()],
            ..ArtifactDownload::default()
        })
        .unwrap();

        assert!(mgr.validate_all_downloads(&no_needs()).is_empty());
    }

    #[test]
    fn name_download_resolves_transitively() {
        let mut mgr = manager();
        mgr.record_upload("logs", vec!["/tmp/x.log".into()], Some("build".into()))
            .unwrap();
        mgr.record_download(ArtifactDownload {
            name: Some("logs".into()),
            path: "/deploy".into(),
            job_name: "report".into(),
            depends_on: vec!["test".into()],
            ..ArtifactDownload::default()
        })
        .unwrap();

        // report depends on test, test depends on build
        let mut needs = BTreeMap::new();
        needs.insert("test".to_string(), vec!["build".to_string()]);
        assert!(mgr.validate_all_downloads(&needs).is_empty());
    }

    #[test]
    fn unresolved_download_is_reported() {
        let mut mgr = manager();
        mgr.record_upload("logs", vec!["/tmp/x.log".into()], Some("build".into()))
            .unwrap();
        mgr.record_download(ArtifactDownload {
            name: Some("logs".into()),
            path: "/deploy".into(),
            job_name: "deploy".into(),
            depends_on: vec![],
            ..ArtifactDownload::default()
        })
        .unwrap();

        let errors = mgr.validate_all_downloads(&no_needs());
        assert_eq!(errors.len(), 1);
        assert!(errors[0]
            .to_string()
            .contains("artifact logs not found in any dependent job"));
    }

    #[test]
    fn all_mismatches_are_collected() {
        let mut mgr = manager();
        for name in ["a", "b"] {
            mgr.record_download(ArtifactDownload {
                name: Some(name.into()),
                path: "/deploy".into(),
                job_name: "deploy".into(),
                depends_on: vec![],
                ..ArtifactDownload::default()
            })
            .unwrap();
        }
        assert_eq!(mgr.validate_all_downloads(&no_needs()).len(), 2);
    }

    #[test]
    fn pattern_download_matches_uploaded_names() {
        let mut mgr = manager();
        mgr.record_upload("build-linux", vec!["/out/app".into()], Some("build".into()))
            .unwrap();
        mgr.record_download(ArtifactDownload {
            pattern: Some("build-*".into()),
            path: "/deploy".into(),
            job_name: "deploy".into(),
            depends_on: vec!["build".into()],
            ..ArtifactDownload::default()
        })
        .unwrap();

        assert!(mgr.validate_all_downloads(&no_needs()).is_empty());
    }

    #[test]
    fn pattern_star_matches_empty() {
        let mut mgr = manager();
        mgr.record_upload("build-", vec!["/out/app".into()], Some("build".into()))
            .unwrap();
        mgr.record_download(ArtifactDownload {
            pattern: Some("build-*".into()),
            path: "/deploy".into(),
            job_name: "deploy".into(),
            depends_on: vec!["build".into()],
            ..ArtifactDownload::default()
        })
        .unwrap();

        assert!(mgr.validate_all_downloads(&no_needs()).is_empty());
    }

    #[test]
    fn unmatched_pattern_is_reported() {
        let mut mgr = manager();
        mgr.record_upload("logs", vec!["/tmp/x.log".into()], Some("build".into()))
            .unwrap();
        mgr.record_download(ArtifactDownload {
            pattern: Some("coverage-*".into()),
            path: "/deploy".into(),
            job_name: "deploy".into(),
            depends_on: vec!["build".into()],
            ..ArtifactDownload::default()
        })
        .unwrap();

        let errors = mgr.validate_all_downloads(&no_needs());
        assert_eq!(errors.len(), 1);
        assert!(errors[0]
            .to_string()
            .contains("no artifacts matching pattern coverage-*"));
    }

    #[test]
    fn pattern_without_merge_prepends_artifact_directory() {
        let mut mgr = manager();
        mgr.record_upload(
            "build-linux",
            vec![
                "/build/output/linux/app".into(),
                "/build/output/linux/lib.so".into(),
            ],
            Some("build".into()),
        )
        .unwrap();
        let upload = mgr.uploads()[0].clone();
        let download = ArtifactDownload {
            pattern: Some("build-*".into()),
            path: "/deploy".into(),
            merge_multiple: false,
            job_name: "deploy".into(),
            depends_on: vec!["build".into()],
            ..ArtifactDownload::default()
        };

        assert_eq!(
            mgr.compute_download_path(&download, &upload, "/build/output/linux/app"),
            "/deploy/build-linux/app"
        );
    }

    #[test]
    fn pattern_with_merge_flattens() {
        let mut mgr = manager();
        mgr.record_upload("build-linux", vec!["/out/a".into(), "/out/b".into()], Some("build".into()))
            .unwrap();
        let upload = mgr.uploads()[0].clone();
        let download = ArtifactDownload {
            pattern: Some("build-*".into()),
            path: "/deploy".into(),
            merge_multiple: true,
            job_name: "deploy".into(),
            depends_on: vec!["build".into()],
            ..ArtifactDownload::default()
        };

        assert_eq!(
            mgr.compute_download_path(&download, &upload, "/out/a"),
            "/deploy/a"
        );
    }

    #[test]
    fn name_download_round_trips_normalized_paths() {
        let mut mgr = manager();
        mgr.record_upload(
            "out",
            vec!["/build/linux/app".into(), "/build/darwin/app".into()],
            Some("build".into()),
        )
        .unwrap();
        let upload = mgr.uploads()[0].clone();
        let download = ArtifactDownload {
            name: Some("out".into()),
            path: "/deploy".into(),
            job_name: "deploy".into(),
            depends_on: vec!["build".into()],
            ..ArtifactDownload::default()
        };

        for path in &upload.paths {
            let expected = format!("/deploy/{}", upload.normalized_paths[path]);
            assert_eq!(mgr.compute_download_path(&download, &upload, path), expected);
        }
    }

    #[test]
    fn unknown_original_path_falls_back_sensibly() {
        let mgr = manager();
        let upload = ArtifactUpload {
            name: "out".into(),
            paths: vec![],
            normalized_paths: BTreeMap::new(),
            job_name: "build".into(),
        };
        let download = ArtifactDownload {
            name: Some("out".into()),
            path: "/deploy".into(),
            job_name: "deploy".into(),
            depends_on: vec!["build".into()],
            ..ArtifactDownload::default()
        };

        assert_eq!(
            mgr.compute_download_path(&download, &upload, "./rel/file.txt"),
            "/deploy/rel/file.txt"
        );
        assert_eq!(
            mgr.compute_download_path(&download, &upload, "/abs/file.txt"),
            "/deploy/file.txt"
        );
    }

    #[test]
    fn computed_paths_use_forward_slashes() {
        let mut mgr = manager();
        mgr.record_upload("out", vec![r"C:\build\app.exe".into()], Some("build".into()))
            .unwrap();
        let upload = mgr.uploads()[0].clone();
        let download = ArtifactDownload {
            name: Some("out".into()),
            path: "/deploy".into(),
            job_name: "deploy".into(),
            depends_on: vec!["build".into()],
            ..ArtifactDownload::default()
        };
        let path = mgr.compute_download_path(&download, &upload, r"C:\build\app.exe");
        assert!(!path.contains('\\'));
    }
}
