//! Batch tuning over problem shapes read from a CSV table.

use crate::report::{BatchReport, RowOutcome};
use anyhow::{Context, Result};
use gemmtune_autotune::cache::ScoreCache;
use gemmtune_autotune::harness::DEFAULT_SEED;
use gemmtune_autotune::score::CorrectnessGate;
use gemmtune_autotune::sweep::{sweep, FailurePolicy, Pacer, SweepOptions};
use gemmtune_autotune::tuner::{Tuner, TunerOptions};
use gemmtune_kernels::catalog::Catalog;
use gemmtune_kernels::config::GemmProblem;
use gemmtune_kernels::device::DynDevice;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Launches per benchmark when the command line does not say otherwise.
pub const BATCH_REPETITIONS: usize = 16;

/// One data row of the shape table. Columns other than these are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShapeRow {
    #[serde(rename = "TransposeLHS")]
    pub transpose_lhs: String,
    #[serde(rename = "TransposeRHS")]
    pub transpose_rhs: String,
    #[serde(rename = "M")]
    pub m: usize,
    #[serde(rename = "N")]
    pub n: usize,
    #[serde(rename = "K")]
    pub k: usize,
    pub batch: usize,
}

impl ShapeRow {
    pub fn transpose_a(&self) -> bool {
        self.transpose_lhs.starts_with('t')
    }

    pub fn transpose_b(&self) -> bool {
        self.transpose_rhs.starts_with('t')
    }

    pub fn problem(&self) -> GemmProblem {
        GemmProblem::new(self.m, self.k, self.n).with_batch(self.batch)
    }
}

pub fn read_shape_rows<R: Read>(input: R) -> Result<Vec<ShapeRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(input);
    let mut rows = Vec::new();
    for (index, record) in reader.deserialize().enumerate() {
        let row: ShapeRow = record.with_context(|| format!("malformed row {}", index + 1))?;
        row.problem()
            .validate()
            .with_context(|| format!("malformed row {}", index + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

pub fn read_shape_file(path: &Path) -> Result<Vec<ShapeRow>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open shape table {}", path.display()))?;
    read_shape_rows(file).with_context(|| format!("failed to read {}", path.display()))
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub repetitions: usize,
    /// Pause between consecutive benchmarks, across rows as well.
    pub delay: Duration,
    pub failure_policy: FailurePolicy,
    pub seed: u64,
    pub tolerance: f64,
    pub timeout: Option<Duration>,
    /// Verdicts are loaded from and saved back to this file when set.
    pub cache_path: Option<PathBuf>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            repetitions: BATCH_REPETITIONS,
            delay: Duration::ZERO,
            failure_policy: FailurePolicy::default(),
            seed: DEFAULT_SEED,
            tolerance: CorrectnessGate::default().tolerance,
            timeout: None,
            cache_path: None,
        }
    }
}

impl BatchOptions {
    fn tuner_options(&self) -> TunerOptions {
        TunerOptions {
            repetitions: self.repetitions,
            seed: self.seed,
            tolerance: self.tolerance,
            timeout: self.timeout,
        }
    }

    fn sweep_options(&self) -> SweepOptions {
        SweepOptions {
            failure_policy: self.failure_policy,
        }
    }
}

/// Sweeps the catalog once for every non-transposed row. Rows that request
/// a transpose are skipped.
pub struct BatchDriver<'c> {
    tuner: Tuner<'c>,
    options: BatchOptions,
}

impl<'c> BatchDriver<'c> {
    pub fn new(catalog: &'c Catalog, device: DynDevice, options: BatchOptions) -> Self {
        let tuner = Tuner::with_options(catalog, device, options.tuner_options());
        Self { tuner, options }
    }

    pub fn run_file(&self, path: &Path) -> Result<BatchReport> {
        let rows = read_shape_file(path)?;
        let mut report = self.run(&rows)?;
        report.source = Some(path.display().to_string());
        Ok(report)
    }

    pub fn run(&self, rows: &[ShapeRow]) -> Result<BatchReport> {
        let mut cache = match &self.options.cache_path {
            Some(path) => ScoreCache::load_from_file(path, &self.tuner.cache_settings())?,
            None => ScoreCache::with_settings(self.tuner.cache_settings()),
        };
        let sweep_options = self.options.sweep_options();
        let mut pacer = Pacer::new(self.options.delay);
        let mut report = BatchReport::new(self.tuner.harness().repetitions());

        for (index, row) in rows.iter().enumerate() {
            if row.transpose_a() || row.transpose_b() {
                debug!(
                    row = index + 1,
                    transpose_lhs = row.transpose_lhs.as_str(),
                    transpose_rhs = row.transpose_rhs.as_str(),
                    "skipping transposed row"
                );
                report.push(RowOutcome::skipped(index + 1, row));
                continue;
            }

            let outcome = sweep(
                &self.tuner,
                row.problem(),
                (false, false),
                &sweep_options,
                &mut pacer,
                &mut cache,
            );
            let sweep_report = match outcome {
                Ok(sweep_report) => sweep_report,
                Err(err) => {
                    // Keep what was measured so far before giving up.
                    if let Some(path) = &self.options.cache_path {
                        cache.save_to_file(path)?;
                    }
                    return Err(err.context(format!("row {} aborted", index + 1)));
                }
            };
            report.push(RowOutcome::tuned(index + 1, row, &sweep_report));
        }

        if let Some(path) = &self.options.cache_path {
            cache.save_to_file(path)?;
        }

        info!(
            rows = rows.len(),
            tuned = report.tuned_rows(),
            skipped = report.skipped_rows(),
            "batch finished"
        );
        Ok(report)
    }
}
