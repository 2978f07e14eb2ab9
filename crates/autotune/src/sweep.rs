//! Benchmark every catalog entry that can serve one problem and pick the
//! fastest correct one.

use crate::cache::ScoreCache;
use crate::score::Verdict;
use crate::tuner::Tuner;
use anyhow::Result;
use gemmtune_kernels::config::{ConfigDescriptor, GemmProblem};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// What to do when a device failure interrupts one entry of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Record the failure for that entry and continue with the next one.
    #[default]
    SkipAndLog,
    /// Abort the sweep and return the error.
    Abort,
}

#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    pub failure_policy: FailurePolicy,
}

/// Inserts a fixed pause before every benchmark except the first one it
/// sees. Share one pacer across sweeps so the pause also separates the last
/// benchmark of one sweep from the first of the next.
#[derive(Debug, Clone, Default)]
pub struct Pacer {
    delay: Duration,
    runs: usize,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, runs: 0 }
    }

    /// Benchmarks started through this pacer so far.
    pub fn runs(&self) -> usize {
        self.runs
    }

    pub fn before_benchmark(&mut self) {
        if self.runs > 0 && !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.runs += 1;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRecord {
    pub kernel: String,
    pub descriptor: ConfigDescriptor,
    pub verdict: Verdict,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub problem: GemmProblem,
    pub transpose_a: bool,
    pub transpose_b: bool,
    pub records: Vec<SweepRecord>,
}

impl SweepReport {
    /// Fastest entry whose output passed validation.
    pub fn best(&self) -> Option<&SweepRecord> {
        self.records
            .iter()
            .filter(|record| record.verdict.is_timed())
            .min_by(|lhs, rhs| lhs.score.total_cmp(&rhs.score))
    }

    pub fn count_where(&self, predicate: impl Fn(&Verdict) -> bool) -> usize {
        self.records
            .iter()
            .filter(|record| predicate(&record.verdict))
            .count()
    }
}

/// Entries already present in `cache` are not benchmarked again and do not
/// count toward `pacer`.
pub fn sweep(
    tuner: &Tuner<'_>,
    problem: GemmProblem,
    transpose: (bool, bool),
    options: &SweepOptions,
    pacer: &mut Pacer,
    cache: &mut ScoreCache,
) -> Result<SweepReport> {
    let (transpose_a, transpose_b) = transpose;
    let mut records = Vec::new();
    let runs_before = pacer.runs();

    for entry in tuner.catalog().with_transpose(transpose_a, transpose_b) {
        let result = cache.verdict_or_insert_with(entry.descriptor(), &problem, || {
            pacer.before_benchmark();
            tuner.evaluate_entry(entry, problem)
        });

        let verdict = match result {
            Ok(verdict) => verdict,
            Err(err) => match options.failure_policy {
                FailurePolicy::Abort => return Err(err),
                FailurePolicy::SkipAndLog => {
                    warn!(
                        kernel = entry.name(),
                        error = %err,
                        "benchmark failed; skipping entry"
                    );
                    Verdict::Failed {
                        detail: format!("{err:#}"),
                    }
                }
            },
        };

        records.push(SweepRecord {
            kernel: entry.name().to_string(),
            descriptor: *entry.descriptor(),
            score: verdict.score(),
            verdict,
        });
    }

    let report = SweepReport {
        problem,
        transpose_a,
        transpose_b,
        records,
    };

    match report.best() {
        Some(best) => info!(
            m = problem.m,
            k = problem.k,
            n = problem.n,
            batch = problem.batch,
            kernel = best.kernel.as_str(),
            seconds = best.score,
            candidates = report.records.len(),
            benchmarked = pacer.runs() - runs_before,
            "sweep finished"
        ),
        None => warn!(
            m = problem.m,
            k = problem.k,
            n = problem.n,
            batch = problem.batch,
            candidates = report.records.len(),
            "sweep found no correct kernel"
        ),
    }

    Ok(report)
}
