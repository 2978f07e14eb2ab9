//! Data-movement seam between host vectors and device-resident storage.

use std::sync::Arc;

/// Failures raised by a device or by a kernel running on it.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("allocation of {elements} elements failed on {device}")]
    Allocation { device: String, elements: usize },

    #[error("buffer size mismatch: expected {expected} elements, found {found}")]
    SizeMismatch { expected: usize, found: usize },

    #[error("problem m={m} k={k} n={n} batch={batch} overflows buffer sizes")]
    Oversized {
        m: usize,
        k: usize,
        n: usize,
        batch: usize,
    },

    #[error("kernel {kernel} faulted: {detail}")]
    KernelFault { kernel: String, detail: String },

    #[error("device {device} unavailable: {detail}")]
    Unavailable { device: String, detail: String },
}

/// Storage owned by a device. Kernels read and write it in place.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceBuffer {
    data: Vec<f32>,
}

impl DeviceBuffer {
    /// Wrap already-allocated storage. Only device implementations should call this.
    pub fn from_storage(data: Vec<f32>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

pub trait Device: Send + Sync {
    fn name(&self) -> &str;
    fn upload(&self, host: &[f32]) -> Result<DeviceBuffer, DeviceError>;
    fn download(&self, buffer: &DeviceBuffer) -> Result<Vec<f32>, DeviceError>;
    /// Block until all submitted work has completed.
    fn synchronize(&self) -> Result<(), DeviceError>;
}

pub type DynDevice = Arc<dyn Device>;
