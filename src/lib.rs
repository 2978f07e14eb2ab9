//! gemmtune: auto-tuning for a catalog of specialized GEMM kernels.
//!
//! The kernel catalog, the benchmark harness and the batch driver live in
//! their own crates and are re-exported here. [`get_time_for_config`] is the
//! flat lookup used by external parameter-search drivers.

pub use gemmtune_autotune as autotune;
pub use gemmtune_backend_cpu as backend_cpu;
pub use gemmtune_driver as driver;
pub use gemmtune_kernels as kernels;

pub use gemmtune_autotune::score::{INCORRECT_SENTINEL, NOT_MATCHED_SENTINEL};

use anyhow::Result;
use gemmtune_autotune::tuner::Tuner;
use gemmtune_backend_cpu::runtime::HostDevice;
use gemmtune_kernels::catalog::{Catalog, RawQuery};
use gemmtune_kernels::config::GemmProblem;
use std::sync::Arc;

/// Seconds per launch of the catalog kernel built for exactly these fields,
/// measured on the host device over
/// [`LOOKUP_REPETITIONS`](gemmtune_autotune::tuner::LOOKUP_REPETITIONS)
/// launches.
///
/// Returns [`NOT_MATCHED_SENTINEL`] when no kernel was generated for the
/// fields (nothing is launched) and [`INCORRECT_SENTINEL`] when the kernel's
/// output disagrees with the reference. Device failures and a catalog that
/// failed to generate are errors.
#[allow(clippy::too_many_arguments)]
pub fn get_time_for_config(
    cache_size: i64,
    item_rows: i64,
    item_cols: i64,
    wg_rows: i64,
    wg_cols: i64,
    tile_rows: i64,
    tile_cols: i64,
    double_buffer: bool,
    bank_conflict_a: bool,
    bank_conflict_b: bool,
    mem_type: i32,
    algorithm: i32,
    transpose_a: bool,
    transpose_b: bool,
    m: usize,
    k: usize,
    n: usize,
    batch: usize,
) -> Result<f64> {
    let query = RawQuery {
        cache_size,
        item_rows,
        item_cols,
        wg_rows,
        wg_cols,
        tile_rows,
        tile_cols,
        double_buffer,
        bank_conflict_a,
        bank_conflict_b,
        mem_type,
        algorithm,
        transpose_a,
        transpose_b,
    };
    let tuner = Tuner::new(Catalog::global()?, Arc::new(HostDevice::new()));
    tuner.get_time_for_config(&query, GemmProblem::new(m, k, n).with_batch(batch))
}
