//! Benchmark harness and config-time lookup for the gemmtune kernel catalog.
//!
//! A request names a configuration; the [`tuner::Tuner`] matches it against
//! the catalog, benchmarks the matched kernel on synthetic input and reduces
//! the outcome to one score. Not-matched and incorrect outcomes are ordinary
//! values (sentinel scores), only device failures are errors.

pub mod cache;
pub mod harness;
pub mod score;
pub mod sweep;
pub mod tuner;

pub use cache::*;
pub use harness::*;
pub use score::*;
pub use sweep::*;
pub use tuner::*;
