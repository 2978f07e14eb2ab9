//! Reference (non-specialized) GEMM used to compute expected outputs.

use crate::config::GemmArgs;
use anyhow::{ensure, Result};
use ndarray::linalg::general_mat_mul;
use ndarray::{ArrayView2, ArrayViewMut2, ShapeBuilder};

/// Computes `alpha * op(A) * op(B) + beta * C` for every batch and returns the
/// new C. Inputs are column-major with the leading dimensions in `args`.
pub fn reference_gemm(args: &GemmArgs, a: &[f32], b: &[f32], c: &[f32]) -> Result<Vec<f32>> {
    let problem = args.problem;
    problem.validate()?;
    ensure!(
        a.len() >= problem.a_len() && b.len() >= problem.b_len() && c.len() >= problem.c_len(),
        "reference gemm operands too short for m={} k={} n={} batch={}",
        problem.m,
        problem.k,
        problem.n,
        problem.batch
    );

    let mut output = c[..problem.c_len()].to_vec();
    if problem.m == 0 || problem.n == 0 {
        return Ok(output);
    }

    let (m, k, n) = (problem.m, problem.k, problem.n);
    for (batch, c_batch) in output.chunks_mut(args.stride_c()).enumerate() {
        if k == 0 {
            c_batch.iter_mut().for_each(|value| *value *= args.beta);
            continue;
        }

        let a_batch = &a[batch * args.stride_a()..(batch + 1) * args.stride_a()];
        let b_batch = &b[batch * args.stride_b()..(batch + 1) * args.stride_b()];

        let a_view = if args.transpose_a {
            ArrayView2::from_shape((k, m).f(), a_batch)?.reversed_axes()
        } else {
            ArrayView2::from_shape((m, k).f(), a_batch)?
        };
        let b_view = if args.transpose_b {
            ArrayView2::from_shape((n, k).f(), b_batch)?.reversed_axes()
        } else {
            ArrayView2::from_shape((k, n).f(), b_batch)?
        };
        let mut c_view = ArrayViewMut2::from_shape((m, n).f(), c_batch)?;

        general_mat_mul(args.alpha, &a_view, &b_view, args.beta, &mut c_view);
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GemmProblem;
    use approx::assert_abs_diff_eq;

    #[test]
    fn computes_column_major_product_plus_c() {
        // A = [[1, 2], [3, 4]], B = [[5, 6], [7, 8]] stored column-major.
        let args = GemmArgs::new(GemmProblem::new(2, 2, 2), false, false);
        let a = [1.0, 3.0, 2.0, 4.0];
        let b = [5.0, 7.0, 6.0, 8.0];
        let c = [1.0, 1.0, 1.0, 1.0];

        let out = reference_gemm(&args, &a, &b, &c).expect("reference gemm");
        // A*B = [[19, 22], [43, 50]]
        let expected = [20.0, 44.0, 23.0, 51.0];
        for (got, want) in out.iter().zip(expected) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-6);
        }
    }

    #[test]
    fn transposed_a_reads_rows_as_columns() {
        let problem = GemmProblem::new(2, 3, 1);
        let plain = GemmArgs::new(problem, false, false);
        let transposed = GemmArgs::new(problem, true, false);
        // op(A) = [[1, 2, 3], [4, 5, 6]]
        let a_plain = [1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
        let a_trans = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [1.0, 1.0, 1.0];
        let c = [0.0, 0.0];

        let lhs = reference_gemm(&plain, &a_plain, &b, &c).expect("plain");
        let rhs = reference_gemm(&transposed, &a_trans, &b, &c).expect("transposed");
        assert_eq!(lhs, rhs);
        assert_eq!(lhs, vec![6.0, 15.0]);
    }

    #[test]
    fn batches_are_independent() {
        let args = GemmArgs::new(GemmProblem::new(1, 1, 1).with_batch(3), false, false);
        let out = reference_gemm(&args, &[1.0, 2.0, 3.0], &[2.0, 2.0, 2.0], &[0.0, 1.0, 2.0])
            .expect("batched");
        assert_eq!(out, vec![2.0, 5.0, 8.0]);
    }

    #[test]
    fn rejects_short_operands() {
        let args = GemmArgs::new(GemmProblem::new(2, 2, 2), false, false);
        assert!(reference_gemm(&args, &[0.0; 3], &[0.0; 4], &[0.0; 4]).is_err());
    }
}
