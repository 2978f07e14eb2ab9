//! CPU backend: a device whose storage lives in host memory.

pub mod runtime;

pub use runtime::*;
