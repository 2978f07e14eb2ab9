//! Batch driver for gemmtune: reads problem shapes from a CSV table and
//! sweeps the kernel catalog for each of them.

pub mod batch;
#[cfg(feature = "cli")]
pub mod cli;
pub mod report;

pub use batch::*;
pub use report::*;
