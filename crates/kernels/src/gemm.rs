//! Specialized GEMM kernels.
//!
//! Every kernel computes the column-major `C = alpha * op(A) * op(B) + beta * C`
//! over `batch` strided instances. A [`TiledGemm`] is fixed to one
//! [`ConfigDescriptor`] at construction and never changes shape afterwards.

use crate::config::{AlgorithmMode, ConfigDescriptor, GemmArgs, MemoryMode};
use crate::device::{DeviceBuffer, DeviceError};
use crate::utils::validate_gemm_buffers;
use rayon::prelude::*;
use std::ops::Range;
use std::sync::Arc;

pub trait GemmKernel: Send + Sync {
    fn name(&self) -> &str;
    fn launch(
        &self,
        args: &GemmArgs,
        a: &DeviceBuffer,
        b: &DeviceBuffer,
        c: &mut DeviceBuffer,
    ) -> Result<(), DeviceError>;
}

pub type DynGemmKernel = Arc<dyn GemmKernel>;

pub struct TiledGemm {
    name: String,
    descriptor: ConfigDescriptor,
}

impl TiledGemm {
    pub fn new(descriptor: ConfigDescriptor) -> Self {
        Self {
            name: format!("gemm_{}", descriptor.key()),
            descriptor,
        }
    }

    pub fn descriptor(&self) -> &ConfigDescriptor {
        &self.descriptor
    }

    fn run_batch(&self, args: &GemmArgs, a: &[f32], b: &[f32], c: &mut [f32]) {
        match self.descriptor.algorithm {
            AlgorithmMode::Naive => naive(args, a, b, c),
            AlgorithmMode::Standard => self.blocked(args, a, b, c),
            AlgorithmMode::TallSkinny => self.split_k(args, a, b, c),
        }
    }

    fn blocked(&self, args: &GemmArgs, a: &[f32], b: &[f32], c: &mut [f32]) {
        let problem = args.problem;
        let tile = self.descriptor.tile;
        let block_rows = tile.block_rows().min(problem.m);
        let block_cols = tile.block_cols().min(problem.n);
        let panel_k = self.descriptor.cache_size.max(1);
        let ldc = args.ldc;

        c.par_chunks_mut(ldc * block_cols)
            .enumerate()
            .for_each(|(chunk_idx, c_chunk)| {
                let j0 = chunk_idx * block_cols;
                let cols = j0..j0 + c_chunk.len() / ldc;
                scale(c_chunk, args.beta);
                if problem.k == 0 {
                    return;
                }
                match self.descriptor.memory {
                    MemoryMode::NoLocal => {
                        for p0 in (0..problem.k).step_by(panel_k) {
                            let ps = p0..(p0 + panel_k).min(problem.k);
                            for i0 in (0..problem.m).step_by(block_rows) {
                                let rows = i0..(i0 + block_rows).min(problem.m);
                                accumulate(
                                    c_chunk,
                                    ldc,
                                    args.alpha,
                                    (rows, cols.clone(), ps.clone()),
                                    |i, p| args.a_at(a, i, p),
                                    |p, j| args.b_at(b, p, j),
                                );
                            }
                        }
                    }
                    MemoryMode::Local => self.blocked_local(args, a, b, c_chunk, cols, panel_k),
                }
            });
    }

    fn blocked_local(
        &self,
        args: &GemmArgs,
        a: &[f32],
        b: &[f32],
        c_chunk: &mut [f32],
        cols: Range<usize>,
        panel_k: usize,
    ) {
        let problem = args.problem;
        let block_rows = self.descriptor.tile.block_rows().min(problem.m);
        let pad_a = usize::from(self.descriptor.bank_conflict_a);
        let pad_b = usize::from(self.descriptor.bank_conflict_b);
        let panels: Vec<Range<usize>> = (0..problem.k)
            .step_by(panel_k)
            .map(|p0| p0..(p0 + panel_k).min(problem.k))
            .collect();

        let mut prefetched: Option<Panel> = None;
        for (idx, ps) in panels.iter().enumerate() {
            let b_panel = match prefetched.take() {
                Some(panel) => panel,
                None => Panel::pack_b(args, b, ps.clone(), cols.clone(), pad_b),
            };
            if self.descriptor.double_buffer {
                if let Some(next) = panels.get(idx + 1) {
                    prefetched = Some(Panel::pack_b(args, b, next.clone(), cols.clone(), pad_b));
                }
            }

            for i0 in (0..problem.m).step_by(block_rows) {
                let rows = i0..(i0 + block_rows).min(problem.m);
                let a_panel = Panel::pack_a(args, a, rows.clone(), ps.clone(), pad_a);
                accumulate(
                    c_chunk,
                    args.ldc,
                    args.alpha,
                    (rows.clone(), cols.clone(), ps.clone()),
                    |i, p| a_panel.get(i - rows.start, p - ps.start),
                    |p, j| b_panel.get(p - ps.start, j - cols.start),
                );
            }
        }
    }

    fn split_k(&self, args: &GemmArgs, a: &[f32], b: &[f32], c: &mut [f32]) {
        let problem = args.problem;
        scale(c, args.beta);
        if problem.k == 0 {
            return;
        }

        let parts = self.descriptor.tile.work_partition_size().clamp(1, problem.k);
        let span = problem.k.div_ceil(parts);
        let all_rows = 0..problem.m;
        let all_cols = 0..problem.n;
        let len = c.len();

        let partial = (0..parts)
            .into_par_iter()
            .map(|part| {
                let ps = part * span..((part + 1) * span).min(problem.k);
                let mut acc = vec![0.0f32; len];
                if !ps.is_empty() {
                    accumulate(
                        &mut acc,
                        args.ldc,
                        1.0,
                        (all_rows.clone(), all_cols.clone(), ps),
                        |i, p| args.a_at(a, i, p),
                        |p, j| args.b_at(b, p, j),
                    );
                }
                acc
            })
            .reduce(
                || vec![0.0f32; len],
                |mut lhs, rhs| {
                    lhs.iter_mut().zip(&rhs).for_each(|(l, r)| *l += r);
                    lhs
                },
            );

        c.iter_mut()
            .zip(&partial)
            .for_each(|(out, sum)| *out += args.alpha * sum);
    }
}

impl GemmKernel for TiledGemm {
    fn name(&self) -> &str {
        &self.name
    }

    fn launch(
        &self,
        args: &GemmArgs,
        a: &DeviceBuffer,
        b: &DeviceBuffer,
        c: &mut DeviceBuffer,
    ) -> Result<(), DeviceError> {
        if args.transpose_a != self.descriptor.transpose_a
            || args.transpose_b != self.descriptor.transpose_b
        {
            return Err(DeviceError::KernelFault {
                kernel: self.name.clone(),
                detail: "transpose flags do not match kernel specialization".into(),
            });
        }
        validate_gemm_buffers(args, a.len(), b.len(), c.len())?;

        let problem = args.problem;
        if problem.m == 0 || problem.n == 0 || problem.batch == 0 {
            return Ok(());
        }

        let (stride_a, stride_b, stride_c) = (args.stride_a(), args.stride_b(), args.stride_c());
        let a = a.as_slice();
        let b = b.as_slice();
        for (batch, c_batch) in c
            .as_mut_slice()
            .chunks_mut(stride_c)
            .take(problem.batch)
            .enumerate()
        {
            let a_batch = &a[batch * stride_a..(batch + 1) * stride_a];
            let b_batch = &b[batch * stride_b..(batch + 1) * stride_b];
            self.run_batch(args, a_batch, b_batch, c_batch);
        }
        Ok(())
    }
}

/// Operand block copied into contiguous scratch, optionally padded per column.
struct Panel {
    data: Vec<f32>,
    stride: usize,
}

impl Panel {
    fn pack_a(
        args: &GemmArgs,
        a: &[f32],
        rows: Range<usize>,
        ps: Range<usize>,
        pad: usize,
    ) -> Self {
        let stride = rows.len() + pad;
        let mut data = vec![0.0f32; stride * ps.len()];
        for (pl, p) in ps.enumerate() {
            for (il, i) in rows.clone().enumerate() {
                data[pl * stride + il] = args.a_at(a, i, p);
            }
        }
        Self { data, stride }
    }

    fn pack_b(
        args: &GemmArgs,
        b: &[f32],
        ps: Range<usize>,
        cols: Range<usize>,
        pad: usize,
    ) -> Self {
        let stride = ps.len() + pad;
        let mut data = vec![0.0f32; stride * cols.len()];
        for (jl, j) in cols.enumerate() {
            for (pl, p) in ps.clone().enumerate() {
                data[jl * stride + pl] = args.b_at(b, p, j);
            }
        }
        Self { data, stride }
    }

    /// `row` is the fast axis for A panels, `p` for B panels.
    #[inline]
    fn get(&self, fast: usize, slow: usize) -> f32 {
        self.data[slow * self.stride + fast]
    }
}

fn naive(args: &GemmArgs, a: &[f32], b: &[f32], c: &mut [f32]) {
    let problem = args.problem;
    c.par_chunks_mut(args.ldc)
        .enumerate()
        .for_each(|(col, c_col)| {
            for (row, out) in c_col.iter_mut().enumerate().take(problem.m) {
                let acc: f32 = (0..problem.k)
                    .map(|p| args.a_at(a, row, p) * args.b_at(b, p, col))
                    .sum();
                *out = args.alpha * acc + args.beta * *out;
            }
        });
}

fn scale(c: &mut [f32], beta: f32) {
    if beta != 1.0 {
        c.iter_mut().for_each(|value| *value *= beta);
    }
}

/// Adds `alpha * op(A)[rows, ps] * op(B)[ps, cols]` into a column chunk whose
/// first column is `cols.start`.
fn accumulate<FA, FB>(
    c_chunk: &mut [f32],
    ldc: usize,
    alpha: f32,
    (rows, cols, ps): (Range<usize>, Range<usize>, Range<usize>),
    a_at: FA,
    b_at: FB,
) where
    FA: Fn(usize, usize) -> f32,
    FB: Fn(usize, usize) -> f32,
{
    for (jl, j) in cols.enumerate() {
        let c_col = &mut c_chunk[jl * ldc..(jl + 1) * ldc];
        for i in rows.clone() {
            let mut acc = 0.0f32;
            for p in ps.clone() {
                acc += a_at(i, p) * b_at(p, j);
            }
            c_col[i] += alpha * acc;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GemmProblem, TileShape};
    use crate::reference::reference_gemm;
    use approx::assert_abs_diff_eq;

    fn descriptor(memory: MemoryMode, algorithm: AlgorithmMode) -> ConfigDescriptor {
        ConfigDescriptor {
            cache_size: 8,
            tile: TileShape::new(2, 2, 2, 2, 1, 1),
            double_buffer: true,
            bank_conflict_a: true,
            bank_conflict_b: false,
            memory,
            algorithm,
            transpose_a: false,
            transpose_b: false,
        }
    }

    fn random(len: usize, rng: &mut fastrand::Rng) -> Vec<f32> {
        (0..len).map(|_| rng.f32() * 2.0 - 1.0).collect()
    }

    fn check_against_reference(descriptor: ConfigDescriptor, problem: GemmProblem) {
        let mut rng = fastrand::Rng::with_seed(7);
        let a = random(problem.a_len(), &mut rng);
        let b = random(problem.b_len(), &mut rng);
        let c = random(problem.c_len(), &mut rng);
        let args = GemmArgs::for_descriptor(problem, &descriptor);

        let expected = reference_gemm(&args, &a, &b, &c).expect("reference gemm");

        let kernel = TiledGemm::new(descriptor);
        let a = DeviceBuffer::from_storage(a);
        let b = DeviceBuffer::from_storage(b);
        let mut c = DeviceBuffer::from_storage(c);
        kernel.launch(&args, &a, &b, &mut c).expect("kernel launch");

        for (got, want) in c.as_slice().iter().zip(&expected) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-4);
        }
    }

    #[test]
    fn every_algorithm_matches_reference_for_every_transpose_pair() {
        // Deliberately not multiples of the block size.
        let problem = GemmProblem::new(13, 11, 9).with_batch(2);
        for memory in [MemoryMode::Local, MemoryMode::NoLocal] {
            for algorithm in [
                AlgorithmMode::Naive,
                AlgorithmMode::Standard,
                AlgorithmMode::TallSkinny,
            ] {
                for (ta, tb) in [(false, false), (true, false), (false, true), (true, true)] {
                    check_against_reference(
                        descriptor(memory, algorithm).with_transpose(ta, tb),
                        problem,
                    );
                }
            }
        }
    }

    #[test]
    fn single_buffered_local_kernel_matches_reference() {
        let mut single = descriptor(MemoryMode::Local, AlgorithmMode::Standard);
        single.double_buffer = false;
        single.bank_conflict_b = true;
        check_against_reference(single, GemmProblem::new(16, 20, 12));
    }

    #[test]
    fn zero_depth_only_scales_c() {
        check_against_reference(
            descriptor(MemoryMode::Local, AlgorithmMode::Standard),
            GemmProblem::new(4, 0, 3),
        );
    }

    #[test]
    fn rejects_mismatched_transpose_args() {
        let kernel = TiledGemm::new(descriptor(MemoryMode::Local, AlgorithmMode::Standard));
        let problem = GemmProblem::new(2, 2, 2);
        let args = GemmArgs::new(problem, true, false);
        let a = DeviceBuffer::from_storage(vec![0.0; 4]);
        let b = DeviceBuffer::from_storage(vec![0.0; 4]);
        let mut c = DeviceBuffer::from_storage(vec![0.0; 4]);
        let err = kernel.launch(&args, &a, &b, &mut c).unwrap_err();
        assert!(matches!(err, DeviceError::KernelFault { .. }));
    }

    #[test]
    fn rejects_short_buffers() {
        let kernel = TiledGemm::new(descriptor(MemoryMode::NoLocal, AlgorithmMode::Naive));
        let args = GemmArgs::new(GemmProblem::new(4, 4, 4), false, false);
        let a = DeviceBuffer::from_storage(vec![0.0; 15]);
        let b = DeviceBuffer::from_storage(vec![0.0; 16]);
        let mut c = DeviceBuffer::from_storage(vec![0.0; 16]);
        let err = kernel.launch(&args, &a, &b, &mut c).unwrap_err();
        assert!(matches!(err, DeviceError::SizeMismatch { expected: 16, found: 15 }));
    }
}
