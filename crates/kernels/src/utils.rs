//! Shared helpers for kernel implementations.

use crate::config::GemmArgs;
use crate::device::DeviceError;

pub fn validate_gemm_buffers(
    args: &GemmArgs,
    a_len: usize,
    b_len: usize,
    c_len: usize,
) -> Result<(), DeviceError> {
    let problem = args.problem;
    let Some((a_need, b_need, c_need)) = problem.checked_lens() else {
        return Err(DeviceError::Oversized {
            m: problem.m,
            k: problem.k,
            n: problem.n,
            batch: problem.batch,
        });
    };
    for (expected, found) in [(a_need, a_len), (b_need, b_len), (c_need, c_len)] {
        if found < expected {
            return Err(DeviceError::SizeMismatch { expected, found });
        }
    }
    Ok(())
}

/// Relative L2 discrepancy `||candidate - expected|| / ||expected||`.
///
/// Lower is better. Returns `f64::INFINITY` on a length mismatch and NaN if
/// either input holds NaN, so callers must treat non-finite scores as failures.
pub fn relative_l2_error(expected: &[f32], candidate: &[f32]) -> f64 {
    if expected.len() != candidate.len() {
        return f64::INFINITY;
    }

    let (diff_sq, norm_sq) = expected.iter().zip(candidate).fold(
        (0.0f64, 0.0f64),
        |(diff_sq, norm_sq), (&e, &c)| {
            let d = f64::from(e) - f64::from(c);
            (diff_sq + d * d, norm_sq + f64::from(e) * f64::from(e))
        },
    );

    diff_sq.sqrt() / norm_sq.sqrt().max(f64::from(f32::MIN_POSITIVE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GemmProblem;
    use approx::assert_abs_diff_eq;

    #[test]
    fn identical_outputs_have_zero_error() {
        let values = [1.0f32, -2.0, 3.5];
        assert_abs_diff_eq!(relative_l2_error(&values, &values), 0.0);
    }

    #[test]
    fn error_is_relative_to_expected_norm() {
        let expected = [3.0f32, 4.0];
        let candidate = [3.0f32, 4.5];
        assert_abs_diff_eq!(relative_l2_error(&expected, &candidate), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn nan_and_length_mismatch_are_not_finite() {
        assert!(relative_l2_error(&[1.0], &[f32::NAN]).is_nan());
        assert!(relative_l2_error(&[1.0], &[1.0, 2.0]).is_infinite());
    }

    #[test]
    fn validation_reports_first_short_operand() {
        let args = GemmArgs::new(GemmProblem::new(2, 3, 4), false, false);
        assert!(validate_gemm_buffers(&args, 6, 12, 8).is_ok());
        let err = validate_gemm_buffers(&args, 6, 11, 8).unwrap_err();
        assert!(matches!(err, DeviceError::SizeMismatch { expected: 12, found: 11 }));
    }

    #[test]
    fn overflowing_problem_is_rejected_before_size_checks() {
        let args = GemmArgs::new(GemmProblem::new(1 << 33, 1, 1 << 31), false, false);
        let err = validate_gemm_buffers(&args, 0, 0, 0).unwrap_err();
        assert!(matches!(err, DeviceError::Oversized { .. }));
    }
}
