//! CLI wiring for the `tune_nn` batch tuner.

use crate::batch::{BatchDriver, BatchOptions, BATCH_REPETITIONS};
use anyhow::{bail, Result};
use clap::Parser;
use gemmtune_autotune::sweep::FailurePolicy;
use gemmtune_backend_cpu::runtime::HostDevice;
use gemmtune_kernels::catalog::Catalog;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "tune_nn",
    about = "Tune every catalog kernel against the non-transposed shapes of a CSV table"
)]
pub struct Cli {
    /// Table with columns TransposeLHS, TransposeRHS, M, N, K, batch.
    pub csv: PathBuf,

    /// Timed launches per benchmark.
    #[arg(default_value_t = BATCH_REPETITIONS)]
    pub reps: usize,

    /// Pause between consecutive benchmarks, in milliseconds.
    #[arg(default_value_t = 0)]
    pub sleep_ms: u64,

    /// Load and save cached verdicts here.
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Write a JSON report of every row here.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Stop at the first device failure instead of skipping the entry.
    #[arg(long, default_value_t = false)]
    pub abort_on_failure: bool,

    /// Give up on a single benchmark after this many milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl Cli {
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            repetitions: self.reps,
            delay: Duration::from_millis(self.sleep_ms),
            failure_policy: if self.abort_on_failure {
                FailurePolicy::Abort
            } else {
                FailurePolicy::SkipAndLog
            },
            timeout: self.timeout_ms.map(Duration::from_millis),
            cache_path: self.cache.clone(),
            ..BatchOptions::default()
        }
    }
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let catalog = Catalog::global()?;
    if catalog.is_empty() {
        bail!("kernel catalog is empty");
    }
    info!(entries = catalog.len(), csv = %cli.csv.display(), "starting batch tuning");

    let driver = BatchDriver::new(catalog, Arc::new(HostDevice::new()), cli.batch_options());
    let report = driver.run_file(&cli.csv)?;

    println!(
        "rows={}, tuned={}, skipped={}, reps={}",
        report.rows.len(),
        report.tuned_rows(),
        report.skipped_rows(),
        report.repetitions
    );
    for row in report.rows.iter().filter(|row| !row.skipped) {
        let problem = row.problem;
        match &row.best {
            Some(best) => println!(
                "- row {}: m={} k={} n={} batch={} best={} seconds={:.3e} gflops={:.3} correct={}/{}",
                row.row,
                problem.m,
                problem.k,
                problem.n,
                problem.batch,
                best.kernel,
                best.score,
                best.gflops,
                row.correct,
                row.candidates
            ),
            None => println!(
                "- row {}: m={} k={} n={} batch={} no correct kernel ({} candidates)",
                row.row, problem.m, problem.k, problem.n, problem.batch, row.candidates
            ),
        }
    }

    if let Some(path) = &cli.output {
        report.write_json(path)?;
        info!(path = %path.display(), "wrote batch report");
    }
    Ok(())
}
