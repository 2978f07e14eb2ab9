//! JSON summary of a batch run.

use crate::batch::ShapeRow;
use anyhow::Result;
use gemmtune_autotune::score::Verdict;
use gemmtune_autotune::sweep::SweepReport;
use gemmtune_kernels::config::{ConfigDescriptor, GemmProblem};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestEntry {
    pub kernel: String,
    pub descriptor: ConfigDescriptor,
    pub score: f64,
    pub gflops: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowOutcome {
    /// 1-based position among the data rows of the table.
    pub row: usize,
    pub transpose_lhs: String,
    pub transpose_rhs: String,
    pub problem: GemmProblem,
    pub skipped: bool,
    pub candidates: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub failed: usize,
    pub best: Option<BestEntry>,
}

impl RowOutcome {
    pub fn skipped(row: usize, shape: &ShapeRow) -> Self {
        Self {
            row,
            transpose_lhs: shape.transpose_lhs.clone(),
            transpose_rhs: shape.transpose_rhs.clone(),
            problem: shape.problem(),
            skipped: true,
            candidates: 0,
            correct: 0,
            incorrect: 0,
            failed: 0,
            best: None,
        }
    }

    pub fn tuned(row: usize, shape: &ShapeRow, sweep: &SweepReport) -> Self {
        let best = sweep.best().map(|record| {
            let gflops = match &record.verdict {
                Verdict::Timed(result) => result.gflops(&sweep.problem),
                _ => 0.0,
            };
            BestEntry {
                kernel: record.kernel.clone(),
                descriptor: record.descriptor,
                score: record.score,
                gflops,
            }
        });
        Self {
            row,
            transpose_lhs: shape.transpose_lhs.clone(),
            transpose_rhs: shape.transpose_rhs.clone(),
            problem: sweep.problem,
            skipped: false,
            candidates: sweep.records.len(),
            correct: sweep.count_where(Verdict::is_timed),
            incorrect: sweep.count_where(|v| {
                matches!(v, Verdict::Incorrect { .. } | Verdict::TimedOut { .. })
            }),
            failed: sweep.count_where(|v| matches!(v, Verdict::Failed { .. })),
            best,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub generated_at_unix_ms: u128,
    pub source: Option<String>,
    pub repetitions: usize,
    pub rows: Vec<RowOutcome>,
}

impl BatchReport {
    pub fn new(repetitions: usize) -> Self {
        let generated_at_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_millis();
        Self {
            generated_at_unix_ms,
            source: None,
            repetitions,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: RowOutcome) {
        self.rows.push(outcome);
    }

    pub fn tuned_rows(&self) -> usize {
        self.rows.iter().filter(|row| !row.skipped).count()
    }

    pub fn skipped_rows(&self) -> usize {
        self.rows.iter().filter(|row| row.skipped).count()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
