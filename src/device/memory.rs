use super::Device;

/// Bytes held on a device on behalf of a single buffer.
///
/// The bytes are given back to the device when the reservation is dropped, which happens exactly
/// when the owning buffer is.
#[derive(Debug)]
pub(crate) struct Reservation {
    device: Device,
    bytes: usize,
}

impl Reservation {
    pub(super) fn new(device: Device, bytes: usize) -> Self {
        Self { device, bytes }
    }

    pub(crate) fn device(&self) -> &Device {
        &self.device
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.device.release(self.bytes);
    }
}
