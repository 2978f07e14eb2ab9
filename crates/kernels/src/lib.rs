//! Specialized GEMM kernels, the catalog that binds them to configuration
//! descriptors, and the device seam they run on.

pub mod catalog;
pub mod config;
pub mod device;
pub mod gemm;
pub mod reference;
pub mod utils;

pub use catalog::*;
pub use config::*;
pub use device::*;
pub use gemm::*;
pub use reference::*;
pub use utils::*;
