//! Process-wide caches
//!
//! Two pieces of state outlive individual compilations: the repository
//! feature flags fetched by sibling subsystems (keyed by `owner/repo`) and
//! the set of repositories whose verbose feature diagnostic was already
//! printed. Both use atomic map operations; neither sits on the compile hot
//! path.

use dashmap::{DashMap, DashSet};
use once_cell::sync::Lazy;

#[derive(Debug, Default)]
pub struct RepoFeaturesCache {
    features: DashMap<String, Vec<String>>,
    logged: DashSet<String>,
}

static CACHE: Lazy<RepoFeaturesCache> = Lazy::new(RepoFeaturesCache::default);

pub fn global() -> &'static RepoFeaturesCache {
    &CACHE
}

impl RepoFeaturesCache {
    pub fn get(&self, repo: &str) -> Option<Vec<String>> {
        self.features.get(repo).map(|entry| entry.value().clone())
    }

    pub fn set(&self, repo: impl Into<String>, features: Vec<String>) {
        self.features.insert(repo.into(), features);
    }

    /// True exactly once per repository per process. Callers gate their
    /// verbose feature diagnostic on this.
    pub fn should_log(&self, repo: &str) -> bool {
        self.logged.insert(repo.to_string())
    }

    /// Reset all state; tests only.
    pub fn clear(&self) {
        self.features.clear();
        self.logged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let cache = RepoFeaturesCache::default();
        assert!(cache.get("octo/repo").is_none());
        cache.set("octo/repo", vec!["safe-outputs".into()]);
        assert_eq!(cache.get("octo/repo").unwrap(), vec!["safe-outputs"]);
    }

    #[test]
    fn should_log_fires_once_per_repo() {
        let cache = RepoFeaturesCache::default();
        assert!(cache.should_log("octo/repo"));
        assert!(!cache.should_log("octo/repo"));
        assert!(cache.should_log("octo/other"));
    }

    #[test]
    fn clear_resets_both_maps() {
        let cache = RepoFeaturesCache::default();
        cache.set("octo/repo", vec![]);
        assert!(cache.should_log("octo/repo"));
        cache.clear();
        assert!(cache.get("octo/repo").is_none());
        assert!(cache.should_log("octo/repo"));
    }
}
