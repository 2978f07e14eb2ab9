//! Memoized verdicts for tuning requests.

use crate::score::Verdict;
use anyhow::Result;
use gemmtune_kernels::config::{ConfigDescriptor, GemmProblem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Measurement settings a verdict depends on besides descriptor and problem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub repetitions: usize,
    pub seed: u64,
    pub tolerance: f64,
}

/// Verdicts keyed by descriptor and problem, so a search that revisits a
/// grid point does not benchmark it twice. Timeouts and failures are not
/// stored since a retry may succeed.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ScoreCache {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    settings: Option<CacheSettings>,
    verdicts: BTreeMap<String, Verdict>,
}

impl ScoreCache {
    pub fn new() -> Self {
        Self {
            settings: None,
            verdicts: BTreeMap::new(),
        }
    }

    /// Empty cache whose verdicts are tagged with `settings` when saved.
    pub fn with_settings(settings: CacheSettings) -> Self {
        Self {
            settings: Some(settings),
            verdicts: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> Option<&CacheSettings> {
        self.settings.as_ref()
    }

    pub fn get(&self, descriptor: &ConfigDescriptor, problem: &GemmProblem) -> Option<&Verdict> {
        self.verdicts.get(&verdict_key(descriptor, problem))
    }

    /// Stores `verdict` unless it is a timeout or failure. Returns whether it
    /// was stored.
    pub fn insert(
        &mut self,
        descriptor: &ConfigDescriptor,
        problem: &GemmProblem,
        verdict: Verdict,
    ) -> bool {
        if matches!(verdict, Verdict::TimedOut { .. } | Verdict::Failed { .. }) {
            return false;
        }
        self.verdicts.insert(verdict_key(descriptor, problem), verdict);
        true
    }

    /// Returns the cached verdict or computes, stores and returns it. Errors
    /// are passed through and never cached.
    pub fn verdict_or_insert_with<F>(
        &mut self,
        descriptor: &ConfigDescriptor,
        problem: &GemmProblem,
        compute: F,
    ) -> Result<Verdict>
    where
        F: FnOnce() -> Result<Verdict>,
    {
        if let Some(verdict) = self.get(descriptor, problem) {
            return Ok(verdict.clone());
        }
        let verdict = compute()?;
        self.insert(descriptor, problem, verdict.clone());
        Ok(verdict)
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    /// Loads the verdicts saved at `path`. A file saved under different
    /// settings, or without any, is ignored and an empty cache is returned.
    pub fn load_from_file(path: &Path, settings: &CacheSettings) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::with_settings(*settings));
        }
        let data = fs::read(path)?;
        let cache: Self = serde_json::from_slice(&data)?;
        if cache.settings.as_ref() != Some(settings) {
            warn!(
                path = %path.display(),
                saved = ?cache.settings,
                current = ?settings,
                discarded = cache.len(),
                "cached verdicts were measured under other settings"
            );
            return Ok(Self::with_settings(*settings));
        }
        Ok(cache)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let blob = serde_json::to_vec_pretty(self)?;
        fs::write(path, blob)?;
        Ok(())
    }
}

fn verdict_key(descriptor: &ConfigDescriptor, problem: &GemmProblem) -> String {
    format!(
        "{}@m{}_k{}_n{}_b{}",
        descriptor.key(),
        problem.m,
        problem.k,
        problem.n,
        problem.batch
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{TuningResult, NOT_MATCHED_SENTINEL};
    use anyhow::bail;
    use approx::assert_abs_diff_eq;
    use gemmtune_kernels::catalog::generated_combinations;

    fn descriptor() -> ConfigDescriptor {
        generated_combinations()[0].descriptor(false, false)
    }

    fn settings() -> CacheSettings {
        CacheSettings {
            repetitions: 16,
            seed: 42,
            tolerance: 1.0e-3,
        }
    }

    fn timed(seconds: f64) -> Verdict {
        Verdict::Timed(TuningResult {
            seconds,
            error: 1.0e-7,
        })
    }

    #[test]
    fn computes_once_per_key() -> Result<()> {
        let mut cache = ScoreCache::new();
        let problem = GemmProblem::new(8, 8, 8);
        let mut calls = 0;

        for _ in 0..3 {
            let verdict = cache.verdict_or_insert_with(&descriptor(), &problem, || {
                calls += 1;
                Ok(timed(0.25))
            })?;
            assert_eq!(verdict.score(), 0.25);
        }
        assert_eq!(calls, 1);

        let other = problem.with_batch(2);
        assert!(cache.get(&descriptor(), &other).is_none());
        Ok(())
    }

    #[test]
    fn errors_and_transient_verdicts_are_not_cached() -> Result<()> {
        let mut cache = ScoreCache::new();
        let problem = GemmProblem::new(8, 8, 8);
        let failed =
            cache.verdict_or_insert_with(&descriptor(), &problem, || bail!("device lost"));
        assert!(failed.is_err());

        let timed_out = cache.verdict_or_insert_with(&descriptor(), &problem, || {
            Ok(Verdict::TimedOut { limit_ms: 10 })
        })?;
        assert_eq!(timed_out, Verdict::TimedOut { limit_ms: 10 });
        assert!(cache.is_empty());
        Ok(())
    }

    #[test]
    fn persists_verdicts_through_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("verdicts.json");
        let problem = GemmProblem::new(16, 16, 16);
        let unmatched = descriptor().with_transpose(true, true);

        let mut cache = ScoreCache::with_settings(settings());
        cache.insert(&descriptor(), &problem, timed(1.5e-4));
        cache.insert(&unmatched, &problem, Verdict::NotMatched);
        let wrong = descriptor().with_transpose(false, true);
        cache.insert(&wrong, &problem, Verdict::Incorrect { error: f64::NAN });
        cache.save_to_file(&path)?;

        let loaded = ScoreCache::load_from_file(&path, &settings())?;
        assert_eq!(loaded.len(), 3);
        let restored = loaded.get(&descriptor(), &problem).expect("timed verdict");
        assert!(restored.is_timed());
        assert_abs_diff_eq!(restored.score(), 1.5e-4, epsilon = 1e-15);
        assert_eq!(
            loaded.get(&unmatched, &problem).map(Verdict::score),
            Some(NOT_MATCHED_SENTINEL)
        );
        assert!(matches!(
            loaded.get(&wrong, &problem),
            Some(Verdict::Incorrect { error }) if error.is_nan()
        ));

        let missing = ScoreCache::load_from_file(&dir.path().join("absent.json"), &settings())?;
        assert!(missing.is_empty());
        assert_eq!(missing.settings(), Some(&settings()));
        Ok(())
    }

    #[test]
    fn verdicts_saved_under_other_settings_are_discarded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("verdicts.json");
        let problem = GemmProblem::new(16, 16, 16);

        let mut cache = ScoreCache::with_settings(settings());
        cache.insert(&descriptor(), &problem, timed(2.0e-4));
        cache.save_to_file(&path)?;

        let changed = [
            CacheSettings {
                repetitions: 4,
                ..settings()
            },
            CacheSettings {
                seed: 7,
                ..settings()
            },
            CacheSettings {
                tolerance: 1.0e-2,
                ..settings()
            },
        ];
        for other in changed {
            let loaded = ScoreCache::load_from_file(&path, &other)?;
            assert!(loaded.is_empty(), "{other:?}");
            assert_eq!(loaded.settings(), Some(&other));
        }
        assert_eq!(ScoreCache::load_from_file(&path, &settings())?.len(), 1);

        let mut untagged = ScoreCache::new();
        untagged.insert(&descriptor(), &problem, timed(2.0e-4));
        untagged.save_to_file(&path)?;
        assert!(ScoreCache::load_from_file(&path, &settings())?.is_empty());
        Ok(())
    }
}
