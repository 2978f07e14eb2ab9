//! Kernel configuration structures.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a kernel stages operand tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryMode {
    /// Operand panels are packed into work-partition scratch before use.
    Local = 0,
    /// Operands are read straight from the global buffers.
    NoLocal = 1,
}

impl MemoryMode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(MemoryMode::Local),
            1 => Some(MemoryMode::NoLocal),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Shape specialization of the kernel body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmMode {
    Naive = 0,
    Standard = 1,
    /// Splits the K reduction across work partitions.
    TallSkinny = 2,
}

impl AlgorithmMode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(AlgorithmMode::Naive),
            1 => Some(AlgorithmMode::Standard),
            2 => Some(AlgorithmMode::TallSkinny),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileShape {
    pub item_rows: usize,
    pub item_cols: usize,
    pub wg_rows: usize,
    pub wg_cols: usize,
    pub tile_rows: usize,
    pub tile_cols: usize,
}

impl TileShape {
    pub const fn new(
        item_rows: usize,
        item_cols: usize,
        wg_rows: usize,
        wg_cols: usize,
        tile_rows: usize,
        tile_cols: usize,
    ) -> Self {
        Self {
            item_rows,
            item_cols,
            wg_rows,
            wg_cols,
            tile_rows,
            tile_cols,
        }
    }

    /// Output rows covered by one work partition step.
    pub fn block_rows(&self) -> usize {
        (self.item_rows * self.wg_rows * self.tile_rows).max(1)
    }

    /// Output columns covered by one work partition step.
    pub fn block_cols(&self) -> usize {
        (self.item_cols * self.wg_cols * self.tile_cols).max(1)
    }

    pub fn work_partition_size(&self) -> usize {
        self.wg_rows * self.wg_cols
    }
}

impl fmt::Display for TileShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}_{}x{}_{}x{}",
            self.item_rows,
            self.item_cols,
            self.wg_rows,
            self.wg_cols,
            self.tile_rows,
            self.tile_cols
        )
    }
}

/// Identifies exactly one catalog entry.
///
/// Two descriptors identify the same entry only if every field is equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigDescriptor {
    pub cache_size: usize,
    pub tile: TileShape,
    pub double_buffer: bool,
    pub bank_conflict_a: bool,
    pub bank_conflict_b: bool,
    pub memory: MemoryMode,
    pub algorithm: AlgorithmMode,
    pub transpose_a: bool,
    pub transpose_b: bool,
}

impl ConfigDescriptor {
    pub fn with_transpose(mut self, transpose_a: bool, transpose_b: bool) -> Self {
        self.transpose_a = transpose_a;
        self.transpose_b = transpose_b;
        self
    }

    /// Stable, human-readable key used for logs and cached scores.
    pub fn key(&self) -> String {
        format!(
            "cls{}_{}_db{}_bc{}{}_mem{}_algo{}_{}{}",
            self.cache_size,
            self.tile,
            u8::from(self.double_buffer),
            u8::from(self.bank_conflict_a),
            u8::from(self.bank_conflict_b),
            self.memory.code(),
            self.algorithm.code(),
            if self.transpose_a { 't' } else { 'n' },
            if self.transpose_b { 't' } else { 'n' },
        )
    }
}

impl fmt::Display for ConfigDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GemmProblem {
    pub m: usize,
    pub k: usize,
    pub n: usize,
    pub batch: usize,
}

impl GemmProblem {
    pub fn new(m: usize, k: usize, n: usize) -> Self {
        Self { m, k, n, batch: 1 }
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch;
        self
    }

    pub fn flops(&self) -> f64 {
        2.0 * self.m as f64 * self.n as f64 * self.k as f64 * self.batch as f64
    }

    /// Element counts of A, B and C, or `None` when one overflows `usize`.
    pub fn checked_lens(&self) -> Option<(usize, usize, usize)> {
        let len = |rows: usize, cols: usize| rows.checked_mul(cols)?.checked_mul(self.batch);
        Some((len(self.k, self.m)?, len(self.n, self.k)?, len(self.m, self.n)?))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.checked_lens().is_some(),
            "problem m={} k={} n={} batch={} is too large to address",
            self.m,
            self.k,
            self.n,
            self.batch
        );
        Ok(())
    }

    /// Callers must have checked the sizes with [`GemmProblem::validate`].
    pub fn a_len(&self) -> usize {
        self.k * self.m * self.batch
    }

    pub fn b_len(&self) -> usize {
        self.n * self.k * self.batch
    }

    pub fn c_len(&self) -> usize {
        self.m * self.n * self.batch
    }
}

/// Column-major GEMM arguments: `C = alpha * op(A) * op(B) + beta * C`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemmArgs {
    pub problem: GemmProblem,
    pub transpose_a: bool,
    pub transpose_b: bool,
    pub alpha: f32,
    pub beta: f32,
    pub lda: usize,
    pub ldb: usize,
    pub ldc: usize,
}

impl GemmArgs {
    pub fn new(problem: GemmProblem, transpose_a: bool, transpose_b: bool) -> Self {
        Self {
            problem,
            transpose_a,
            transpose_b,
            alpha: 1.0,
            beta: 1.0,
            lda: if transpose_a { problem.k } else { problem.m },
            ldb: if transpose_b { problem.n } else { problem.k },
            ldc: problem.m,
        }
    }

    pub fn for_descriptor(problem: GemmProblem, descriptor: &ConfigDescriptor) -> Self {
        Self::new(problem, descriptor.transpose_a, descriptor.transpose_b)
    }

    pub fn stride_a(&self) -> usize {
        self.problem.m * self.problem.k
    }

    pub fn stride_b(&self) -> usize {
        self.problem.k * self.problem.n
    }

    pub fn stride_c(&self) -> usize {
        self.problem.m * self.problem.n
    }

    /// Element `op(A)[row, p]` of batch-local A.
    #[inline]
    pub fn a_at(&self, a: &[f32], row: usize, p: usize) -> f32 {
        if self.transpose_a {
            a[row * self.lda + p]
        } else {
            a[p * self.lda + row]
        }
    }

    /// Element `op(B)[p, col]` of batch-local B.
    #[inline]
    pub fn b_at(&self, b: &[f32], p: usize, col: usize) -> f32 {
        if self.transpose_b {
            b[p * self.ldb + col]
        } else {
            b[col * self.ldb + p]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_dimensions_follow_transpose_flags() {
        let problem = GemmProblem::new(8, 4, 6);
        let nn = GemmArgs::new(problem, false, false);
        assert_eq!((nn.lda, nn.ldb, nn.ldc), (8, 4, 8));
        let tt = GemmArgs::new(problem, true, true);
        assert_eq!((tt.lda, tt.ldb, tt.ldc), (4, 6, 8));
    }

    #[test]
    fn oversized_problem_is_rejected_instead_of_overflowing() {
        let huge = GemmProblem::new(1 << 33, 4, 1 << 31);
        assert!(huge.checked_lens().is_none());
        assert!(huge.validate().is_err());

        let batched = GemmProblem::new(1 << 20, 1, 1 << 20).with_batch(usize::MAX / 2);
        assert!(batched.validate().is_err());

        let fine = GemmProblem::new(8, 4, 6).with_batch(3);
        assert_eq!(fine.checked_lens(), Some((96, 72, 144)));
        assert!(fine.validate().is_ok());
    }

    #[test]
    fn mode_codes_round_trip_and_reject_unknown() {
        assert_eq!(MemoryMode::from_code(0), Some(MemoryMode::Local));
        assert_eq!(MemoryMode::from_code(7), None);
        assert_eq!(AlgorithmMode::from_code(2), Some(AlgorithmMode::TallSkinny));
        assert_eq!(AlgorithmMode::from_code(-1), None);
    }

    #[test]
    fn descriptor_key_is_distinct_per_transpose() {
        let base = ConfigDescriptor {
            cache_size: 64,
            tile: TileShape::new(4, 4, 8, 8, 1, 1),
            double_buffer: true,
            bank_conflict_a: false,
            bank_conflict_b: false,
            memory: MemoryMode::Local,
            algorithm: AlgorithmMode::Standard,
            transpose_a: false,
            transpose_b: false,
        };
        let transposed = base.with_transpose(true, false);
        assert_ne!(base.key(), transposed.key());
        assert!(base.key().ends_with("nn"));
    }
}
