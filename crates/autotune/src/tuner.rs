//! Config-time lookup: match a requested configuration, benchmark it, and
//! reduce the outcome to a single score.

use crate::cache::CacheSettings;
use crate::harness::{BenchmarkHarness, DEFAULT_SEED};
use crate::score::{CorrectnessGate, TuningResult, Verdict};
use anyhow::{anyhow, Result};
use gemmtune_kernels::catalog::{Catalog, CatalogEntry, RawQuery};
use gemmtune_kernels::config::{ConfigDescriptor, GemmProblem};
use gemmtune_kernels::device::DynDevice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Launches per lookup. Higher values cut noise at the cost of wall time.
pub const LOOKUP_REPETITIONS: usize = 128;

#[derive(Debug, Clone)]
pub struct TunerOptions {
    pub repetitions: usize,
    pub seed: u64,
    pub tolerance: f64,
    /// Bound on one benchmark; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for TunerOptions {
    fn default() -> Self {
        Self {
            repetitions: LOOKUP_REPETITIONS,
            seed: DEFAULT_SEED,
            tolerance: CorrectnessGate::default().tolerance,
            timeout: None,
        }
    }
}

pub struct Tuner<'c> {
    catalog: &'c Catalog,
    harness: BenchmarkHarness,
    gate: CorrectnessGate,
    timeout: Option<Duration>,
}

impl<'c> Tuner<'c> {
    pub fn new(catalog: &'c Catalog, device: DynDevice) -> Self {
        Self::with_options(catalog, device, TunerOptions::default())
    }

    pub fn with_options(catalog: &'c Catalog, device: DynDevice, options: TunerOptions) -> Self {
        let harness = BenchmarkHarness::new(device)
            .with_seed(options.seed)
            .with_repetitions(options.repetitions);
        Self {
            catalog,
            harness,
            gate: CorrectnessGate::new(options.tolerance),
            timeout: options.timeout,
        }
    }

    pub fn catalog(&self) -> &'c Catalog {
        self.catalog
    }

    pub fn harness(&self) -> &BenchmarkHarness {
        &self.harness
    }

    /// Settings that cached verdicts from this tuner were measured under.
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            repetitions: self.harness.repetitions(),
            seed: self.harness.seed(),
            tolerance: self.gate.tolerance,
        }
    }

    /// Seconds per launch for the requested configuration, the
    /// not-matched sentinel if no entry has exactly these fields, or the
    /// incorrect sentinel if the kernel's output fails validation.
    /// Device failures are returned as errors.
    pub fn get_time_for_config(&self, query: &RawQuery, problem: GemmProblem) -> Result<f64> {
        Ok(self.evaluate_raw(query, problem)?.score())
    }

    pub fn evaluate_raw(&self, query: &RawQuery, problem: GemmProblem) -> Result<Verdict> {
        match self.catalog.find_raw(query) {
            Some(entry) => self.evaluate_entry(entry, problem),
            None => {
                debug!(?query, "no catalog entry matches query");
                Ok(Verdict::NotMatched)
            }
        }
    }

    pub fn evaluate(&self, descriptor: &ConfigDescriptor, problem: GemmProblem) -> Result<Verdict> {
        match self.catalog.find(descriptor) {
            Some(entry) => self.evaluate_entry(entry, problem),
            None => {
                debug!(descriptor = %descriptor, "no catalog entry matches descriptor");
                Ok(Verdict::NotMatched)
            }
        }
    }

    /// Benchmarks an entry that is already known to be in the catalog.
    pub fn evaluate_entry(&self, entry: &CatalogEntry, problem: GemmProblem) -> Result<Verdict> {
        let result = match self.timeout {
            None => self.harness.benchmark(entry, problem)?,
            Some(limit) => match self.benchmark_bounded(entry, problem, limit)? {
                Some(result) => result,
                None => {
                    warn!(
                        kernel = entry.name(),
                        limit_ms = limit.as_millis() as u64,
                        "benchmark timed out"
                    );
                    return Ok(Verdict::TimedOut {
                        limit_ms: limit.as_millis() as u64,
                    });
                }
            },
        };

        let verdict = self.gate.judge(result);
        match &verdict {
            Verdict::Incorrect { error } => warn!(
                kernel = entry.name(),
                m = problem.m,
                k = problem.k,
                n = problem.n,
                batch = problem.batch,
                error,
                "kernel output failed validation"
            ),
            _ => debug!(
                kernel = entry.name(),
                m = problem.m,
                k = problem.k,
                n = problem.n,
                batch = problem.batch,
                seconds = result.seconds,
                gflops = result.gflops(&problem),
                error = result.error,
                "kernel benchmarked"
            ),
        }
        Ok(verdict)
    }

    /// Runs the benchmark on a worker thread and waits at most `limit`.
    /// A worker that overruns is told to stop before its next launch and is
    /// then abandoned with its own buffers.
    fn benchmark_bounded(
        &self,
        entry: &CatalogEntry,
        problem: GemmProblem,
        limit: Duration,
    ) -> Result<Option<TuningResult>> {
        let (sender, receiver) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let harness = self.harness.clone();
        let entry = entry.clone();
        let worker_cancel = Arc::clone(&cancel);
        thread::Builder::new()
            .name(format!("bench-{}", entry.name()))
            .spawn(move || {
                let _ = sender.send(harness.benchmark_until(&entry, problem, &worker_cancel));
            })?;

        match receiver.recv_timeout(limit) {
            Ok(result) => result.map(Some),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                cancel.store(true, Ordering::Release);
                Ok(None)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(anyhow!("benchmark worker exited without reporting"))
            }
        }
    }
}
