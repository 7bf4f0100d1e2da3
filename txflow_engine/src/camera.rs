//! Camera acquisition for QR intake.
//!
//! A device is only ever held through a [`CameraLease`], which releases it on drop. Turning the
//! scanner off, dropping it, and any error between acquisition and the first frame all go
//! through that drop.

use crate::error_map::Alert;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera acquisition failed: {0}")]
    Acquisition(String),
    #[error("camera enumeration failed: {0}")]
    Enumeration(String),
    #[error("frame decoding failed: {0}")]
    Decode(String),
}

impl CameraError {
    pub fn alert(&self) -> Alert {
        Alert::Camera {
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
}

impl DeviceInfo {
    fn is_rear_facing(&self) -> bool {
        let label = self.label.to_ascii_lowercase();
        label.contains("back") || label.contains("rear") || label.contains("environment")
    }
}

pub trait VideoDevice {
    fn id(&self) -> &str;
    /// Stops every track. Called exactly once per acquired device.
    fn release(&mut self);
    /// The QR payload in the current frame, if any.
    fn decode_frame(&mut self) -> Result<Option<String>, CameraError>;
}

pub trait CameraProvider {
    type Device: VideoDevice;

    /// Opens the platform default camera. Permission prompts happen here.
    fn open_default(&mut self) -> Result<Self::Device, CameraError>;
    /// Only yields labels once a device has been opened.
    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, CameraError>;
    fn open(&mut self, id: &str) -> Result<Self::Device, CameraError>;
}

/// Holds a device until dropped.
#[derive(Debug)]
pub struct CameraLease<D: VideoDevice> {
    device: Option<D>,
}

impl<D: VideoDevice> CameraLease<D> {
    pub fn new(device: D) -> Self {
        Self {
            device: Some(device),
        }
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device.as_ref().map(|d| d.id())
    }

    fn device_mut(&mut self) -> Option<&mut D> {
        self.device.as_mut()
    }
}

impl<D: VideoDevice> Drop for CameraLease<D> {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            tracing::debug!(device = device.id(), "releasing camera");
            device.release();
        }
    }
}

pub struct QrScanner<P: CameraProvider> {
    provider: P,
    lease: Option<CameraLease<P::Device>>,
}

impl<P: CameraProvider> QrScanner<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            lease: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lease.is_some()
    }

    pub fn active_device(&self) -> Option<&str> {
        self.lease.as_ref().and_then(|l| l.device_id())
    }

    /// Turning off releases the camera. A failed start leaves nothing acquired.
    pub fn set_active(&mut self, active: bool) -> Result<(), CameraError> {
        if !active {
            self.lease = None;
            return Ok(());
        }
        if self.lease.is_none() {
            self.lease = Some(self.acquire()?);
        }
        Ok(())
    }

    fn acquire(&mut self) -> Result<CameraLease<P::Device>, CameraError> {
        let lease = CameraLease::new(self.provider.open_default()?);
        let devices = self.provider.enumerate()?;
        let current = lease.device_id().unwrap_or_default().to_string();
        match devices.iter().find(|d| d.is_rear_facing() && d.id != current) {
            Some(rear) => {
                drop(lease);
                Ok(CameraLease::new(self.provider.open(&rear.id)?))
            }
            None => Ok(lease),
        }
    }

    /// Checks the current frame. A decoded payload stops the scanner and is returned for
    /// [`Action::QrScanned`](crate::flow::Action::QrScanned). Decode errors also stop it.
    pub fn poll(&mut self) -> Result<Option<String>, CameraError> {
        let Some(device) = self.lease.as_mut().and_then(|l| l.device_mut()) else {
            return Ok(None);
        };
        match device.decode_frame() {
            Ok(Some(payload)) => {
                self.lease = None;
                Ok(Some(payload))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.lease = None;
                Err(e)
            }
        }
    }
}
