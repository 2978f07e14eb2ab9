//! Host-memory device entrypoints.

use gemmtune_kernels::device::{Device, DeviceBuffer, DeviceError};
use tracing::trace;

#[derive(Debug, Clone, Default)]
pub struct HostDeviceOptions {
    /// Upper bound on elements per buffer; `None` means unbounded.
    pub max_buffer_elements: Option<usize>,
}

/// Kernels run synchronously on the calling thread (and its rayon pool), so
/// every launch has completed by the time it returns.
#[derive(Debug, Clone, Default)]
pub struct HostDevice {
    options: HostDeviceOptions,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: HostDeviceOptions) -> Self {
        Self { options }
    }

    fn allocate(&self, elements: usize) -> Result<Vec<f32>, DeviceError> {
        let exceeds_limit = self
            .options
            .max_buffer_elements
            .is_some_and(|limit| elements > limit);
        let mut storage = Vec::new();
        if exceeds_limit || storage.try_reserve_exact(elements).is_err() {
            return Err(DeviceError::Allocation {
                device: self.name().to_string(),
                elements,
            });
        }
        Ok(storage)
    }
}

impl Device for HostDevice {
    fn name(&self) -> &str {
        "host"
    }

    fn upload(&self, host: &[f32]) -> Result<DeviceBuffer, DeviceError> {
        let mut storage = self.allocate(host.len())?;
        storage.extend_from_slice(host);
        trace!(elements = host.len(), "uploaded buffer");
        Ok(DeviceBuffer::from_storage(storage))
    }

    fn download(&self, buffer: &DeviceBuffer) -> Result<Vec<f32>, DeviceError> {
        let mut host = self.allocate(buffer.len())?;
        host.extend_from_slice(buffer.as_slice());
        trace!(elements = buffer.len(), "downloaded buffer");
        Ok(host)
    }

    fn synchronize(&self) -> Result<(), DeviceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_then_download_preserves_contents() -> anyhow::Result<()> {
        let device = HostDevice::new();
        let host = vec![1.0f32, -2.5, 3.25];
        let buffer = device.upload(&host)?;
        assert_eq!(buffer.len(), 3);
        device.synchronize()?;
        assert_eq!(device.download(&buffer)?, host);
        Ok(())
    }

    #[test]
    fn buffers_above_the_limit_fail_to_allocate() {
        let device = HostDevice::with_options(HostDeviceOptions {
            max_buffer_elements: Some(2),
        });
        let err = device.upload(&[0.0; 3]).unwrap_err();
        assert!(matches!(err, DeviceError::Allocation { elements: 3, .. }));
    }
}
