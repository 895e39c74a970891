//! Camera driver seam

use crate::config::{DriverKind, HardwareConfig};
use crate::frame::RawFrame;
use crate::rpicam::RpicamDriver;
use crate::simulated::SimulatedDriver;
use crate::state::PipelineState;
use crate::CameraError;
use std::fmt;
use std::time::Duration;

/// Value written to a camera property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Int(i) => write!(f, "{}", i),
            PropertyValue::Text(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// Blocking access to one physical camera.
///
/// Calls are made from a blocking worker thread, never from the async
/// executor. Dropping the driver releases the device.
pub trait CameraDriver: Send + 'static {
    /// Human readable driver name for logs
    fn name(&self) -> &str;

    /// Perform a single-step state change
    fn transition(&mut self, target: PipelineState) -> Result<(), CameraError>;

    /// Whether the device exposes a property under this name
    fn has_property(&self, name: &str) -> bool;

    /// Write a property value
    fn set_property(&mut self, name: &str, value: &PropertyValue) -> Result<(), CameraError>;

    /// Pull the next frame. `Ok(None)` means the hardware handed back a null
    /// buffer.
    fn pull_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CameraError>;
}

/// Opens a driver for a hardware configuration
pub trait DriverOpener: Send + Sync {
    fn open(&self, config: &HardwareConfig) -> Result<Box<dyn CameraDriver>, CameraError>;
}

impl<F> DriverOpener for F
where
    F: Fn(&HardwareConfig) -> Result<Box<dyn CameraDriver>, CameraError> + Send + Sync,
{
    fn open(&self, config: &HardwareConfig) -> Result<Box<dyn CameraDriver>, CameraError> {
        self(config)
    }
}

/// Open the driver selected by `config.driver`
pub fn open_driver(config: &HardwareConfig) -> Result<Box<dyn CameraDriver>, CameraError> {
    match config.driver {
        DriverKind::Simulated => Ok(Box::new(SimulatedDriver::new(config))),
        DriverKind::Rpicam => Ok(Box::new(RpicamDriver::new(config))),
        DriverKind::Gstreamer => open_gstreamer(config),
    }
}

#[cfg(feature = "gstreamer")]
fn open_gstreamer(config: &HardwareConfig) -> Result<Box<dyn CameraDriver>, CameraError> {
    Ok(Box::new(crate::gst::GstDriver::new(config)?))
}

#[cfg(not(feature = "gstreamer"))]
fn open_gstreamer(_config: &HardwareConfig) -> Result<Box<dyn CameraDriver>, CameraError> {
    Err(CameraError::Open(
        "GStreamer driver requested but built without the `gstreamer` feature".to_string(),
    ))
}
