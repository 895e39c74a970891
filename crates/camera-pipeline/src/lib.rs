//! Camera Pipeline Control for the AOI Station
//!
//! Owns the single inspection camera and guards every hardware operation
//! with the pipeline state machine (`Null → Ready → Paused → Playing`).
//! Supports:
//! - Industrial camera with manual focus/exposure and a settle delay
//! - Raspberry Pi camera (auto exposure / auto focus, no settle)
//! - Simulated camera for dry runs and tests

pub mod auto_modes;
pub mod config;
pub mod controller;
pub mod driver;
pub mod frame;
#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod rpicam;
pub mod simulated;
pub mod state;
pub mod strategy;

pub use auto_modes::{AutoModeReport, disable_auto_modes};
pub use config::{AutoMode, AutoProperty, BackendKind, CameraSettings, DriverKind, HardwareConfig};
pub use controller::{InitStatus, PipelineController, ShutdownHandle};
pub use driver::{CameraDriver, DriverOpener, PropertyValue, open_driver};
pub use frame::{validate_frame, CapturedImage, FrameFault, PixelFormat, RawFrame};
pub use simulated::{DriverEvent, SimulatedDriver, SimulatedFault, SimulatorHandle};
pub use state::PipelineState;
pub use strategy::{CapturePath, CaptureStrategy, CapturedShot, PreparedCapture};

use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Pipeline not ready (state: {0})")]
    PipelineNotReady(PipelineState),

    #[error("Capture failed: {0}")]
    CaptureFailed(#[from] FrameFault),

    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Property not supported: {0}")]
    Unsupported(String),

    #[error("Invalid pipeline transition from {from} to {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    #[error("Camera operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Camera operation cancelled by shutdown")]
    Cancelled,
}

impl CameraError {
    /// Whether a capture that failed with this error may be retried through
    /// the settled path. Readiness and cancellation errors are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CameraError::CaptureFailed(_) | CameraError::Timeout(_) | CameraError::Driver(_)
        )
    }

    /// Errors that end the whole inspection cycle rather than one group.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CameraError::PipelineNotReady(_) | CameraError::Cancelled | CameraError::Open(_)
        )
    }
}
