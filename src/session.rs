use log::{info, warn};

use crate::config::DeviceConfig;
use crate::device::AcquisitionDevice;
use crate::error::ScanError;

/// Sole owner of the device connection and its descriptor for one run.
///
/// Every component receives the session by `&mut`; nothing else holds the
/// device. The connection is closed on [`Session::close`] or, failing that,
/// when the session is dropped.
pub struct Session<D: AcquisitionDevice> {
    device: D,
    config: DeviceConfig,
}

impl<D: AcquisitionDevice> Session<D> {
    pub fn new(device: D, config: DeviceConfig) -> Self {
        Self { device, config }
    }

    /// Open the connection and upload the descriptor.
    ///
    /// A failed upload closes the connection again before returning.
    pub fn open(&mut self) -> Result<(), ScanError> {
        self.device.open(&self.config).map_err(|e| {
            ScanError::Device(format!("failed to open the device connection: {e}"))
        })?;
        if let Err(e) = self.device.upload_config(&self.config) {
            self.close_quietly();
            return Err(ScanError::Device(format!("configuration upload failed: {e}")));
        }
        info!("Device '{}' opened and configured", self.device.name());
        Ok(())
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DeviceConfig {
        &mut self.config
    }

    /// Borrow device and descriptor together
    pub fn parts_mut(&mut self) -> (&mut D, &mut DeviceConfig) {
        (&mut self.device, &mut self.config)
    }

    pub fn close(&mut self) -> Result<(), ScanError> {
        if self.device.is_open() {
            self.device.close()?;
        }
        Ok(())
    }

    /// Close after a fault; a failure here is only logged
    pub fn close_quietly(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close the device cleanly: {e}");
        }
    }
}

impl<D: AcquisitionDevice> Drop for Session<D> {
    fn drop(&mut self) {
        if self.device.is_open() {
            warn!("Session dropped with the device still open; closing");
            self.close_quietly();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceEvent, SimulatedDevice};

    #[test]
    fn test_open_uploads_config() {
        let mut session = Session::new(SimulatedDevice::new(), DeviceConfig::default());
        session.open().unwrap();
        assert_eq!(
            session.device().events(),
            &[DeviceEvent::Opened, DeviceEvent::Uploaded]
        );
        session.close().unwrap();
        assert!(!session.device().is_open());
    }

    #[test]
    fn test_open_failure_reported_as_device_error() {
        let mut session = Session::new(
            SimulatedDevice::new().with_open_fault(),
            DeviceConfig::default(),
        );
        assert!(matches!(session.open(), Err(ScanError::Device(_))));
    }
}
