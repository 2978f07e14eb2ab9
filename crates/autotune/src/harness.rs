//! Timed execution of one catalog entry against synthetic input.

use crate::score::TuningResult;
use anyhow::{bail, Context, Result};
use gemmtune_kernels::catalog::CatalogEntry;
use gemmtune_kernels::config::{GemmArgs, GemmProblem};
use gemmtune_kernels::device::DynDevice;
use gemmtune_kernels::reference::reference_gemm;
use gemmtune_kernels::utils::relative_l2_error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::trace;

pub const DEFAULT_SEED: u64 = 42;

/// Host-side operands for one benchmark, uniformly distributed in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticInputs {
    pub a: Vec<f32>,
    pub b: Vec<f32>,
    pub c: Vec<f32>,
}

impl SyntheticInputs {
    /// Identical `(problem, seed)` pairs always yield identical operands.
    pub fn generate(problem: &GemmProblem, seed: u64) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut uniform = |len: usize| -> Vec<f32> {
            (0..len).map(|_| rng.f32() * 2.0 - 1.0).collect()
        };
        let a = uniform(problem.a_len());
        let b = uniform(problem.b_len());
        let c = uniform(problem.c_len());
        Self { a, b, c }
    }
}

#[derive(Clone)]
pub struct BenchmarkHarness {
    device: DynDevice,
    seed: u64,
    repetitions: usize,
}

impl BenchmarkHarness {
    pub fn new(device: DynDevice) -> Self {
        Self {
            device,
            seed: DEFAULT_SEED,
            repetitions: 1,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions.max(1);
        self
    }

    pub fn device(&self) -> &DynDevice {
        &self.device
    }

    pub fn repetitions(&self) -> usize {
        self.repetitions
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Benchmarks `entry` on `problem`.
    ///
    /// One untimed launch on a private copy of C produces the output that is
    /// scored against the reference; the timed launches then run back to back
    /// on a second copy so that accumulating `beta * C` cannot skew the check.
    /// Device failures are returned unchanged; there is no retry.
    pub fn benchmark(&self, entry: &CatalogEntry, problem: GemmProblem) -> Result<TuningResult> {
        self.benchmark_until(entry, problem, &AtomicBool::new(false))
    }

    /// Like [`BenchmarkHarness::benchmark`], but stops before the next launch
    /// once `cancel` is set and returns an error instead of a result.
    pub fn benchmark_until(
        &self,
        entry: &CatalogEntry,
        problem: GemmProblem,
        cancel: &AtomicBool,
    ) -> Result<TuningResult> {
        problem.validate()?;
        let inputs = SyntheticInputs::generate(&problem, self.seed);
        let args = GemmArgs::for_descriptor(problem, entry.descriptor());
        let expected = reference_gemm(&args, &inputs.a, &inputs.b, &inputs.c)?;

        let kernel = entry.kernel();
        let device = &self.device;
        let a = device.upload(&inputs.a)?;
        let b = device.upload(&inputs.b)?;
        let mut checked_c = device.upload(&inputs.c)?;
        let mut timed_c = device.upload(&inputs.c)?;

        let cancelled = || cancel.load(Ordering::Acquire);
        if cancelled() {
            bail!("benchmark of {} cancelled", kernel.name());
        }
        kernel
            .launch(&args, &a, &b, &mut checked_c)
            .with_context(|| format!("validation launch of {} failed", kernel.name()))?;
        device.synchronize()?;

        let start = Instant::now();
        for _ in 0..self.repetitions {
            if cancelled() {
                bail!("benchmark of {} cancelled", kernel.name());
            }
            kernel.launch(&args, &a, &b, &mut timed_c)?;
        }
        device.synchronize()?;
        let total = start.elapsed();

        let result = device.download(&checked_c)?;
        let error = relative_l2_error(&expected, &result);
        let seconds = total.as_secs_f64() / self.repetitions as f64;

        trace!(
            kernel = kernel.name(),
            device = device.name(),
            seconds,
            error,
            "benchmark finished"
        );
        Ok(TuningResult { seconds, error })
    }
}
