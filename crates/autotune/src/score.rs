//! Scores and verdicts produced by a tuning request.

use gemmtune_kernels::config::GemmProblem;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Returned when the requested descriptor names no catalog entry.
pub const NOT_MATCHED_SENTINEL: f64 = f64::MAX;

/// Returned when a matched kernel produced wrong output, timed out or
/// failed. Strictly smaller than [`NOT_MATCHED_SENTINEL`] and far above any
/// real timing.
pub const INCORRECT_SENTINEL: f64 = 1.0e9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TuningResult {
    /// Mean wall time of one launch.
    pub seconds: f64,
    /// Relative L2 discrepancy against the reference output.
    #[serde(with = "nullable_f64")]
    pub error: f64,
}

impl TuningResult {
    pub fn gflops(&self, problem: &GemmProblem) -> f64 {
        if self.seconds > 0.0 {
            problem.flops() / (self.seconds * 1.0e9)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Verdict {
    NotMatched,
    Timed(TuningResult),
    Incorrect {
        #[serde(with = "nullable_f64")]
        error: f64,
    },
    TimedOut { limit_ms: u64 },
    /// Device execution failed and the caller chose to keep going.
    Failed { detail: String },
}

impl Verdict {
    pub fn score(&self) -> f64 {
        match self {
            Verdict::NotMatched => NOT_MATCHED_SENTINEL,
            Verdict::Timed(result) => result.seconds,
            Verdict::Incorrect { .. } | Verdict::TimedOut { .. } | Verdict::Failed { .. } => {
                INCORRECT_SENTINEL
            }
        }
    }

    pub fn is_timed(&self) -> bool {
        matches!(self, Verdict::Timed(_))
    }

    /// Same outcome class, ignoring the measured numbers.
    pub fn same_class(&self, other: &Verdict) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Accepts a result only when its discrepancy is finite and within tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectnessGate {
    pub tolerance: f64,
}

impl Default for CorrectnessGate {
    fn default() -> Self {
        Self { tolerance: 1.0e-3 }
    }
}

impl CorrectnessGate {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    pub fn accepts(&self, error: f64) -> bool {
        error.is_finite() && error <= self.tolerance
    }

    pub fn judge(&self, result: TuningResult) -> Verdict {
        if self.accepts(result.error) {
            Verdict::Timed(result)
        } else {
            Verdict::Incorrect {
                error: result.error,
            }
        }
    }
}

/// JSON has no NaN or infinity; non-finite errors are written as `null`
/// and read back as NaN.
mod nullable_f64 {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}
