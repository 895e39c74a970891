//! AOI Inspection Session
//!
//! Ties the camera pipeline, the ROI configuration and the remote engine
//! together into one inspection cycle:
//! - ROIs are grouped by the focus/exposure they need and each group is
//!   captured exactly once
//! - every group image is evaluated remotely, overlapping the settle wait of
//!   the next group
//! - per-ROI verdicts are folded into per-device results with barcode
//!   association

pub mod aggregator;
pub mod config;
pub mod orchestrator;
pub mod station;

pub use aggregator::{
    BarcodeSource, DeviceAggregator, DeviceIdentifier, DeviceResult, ManualBarcodes, RoiResult,
    RoiStatus,
};
pub use self::config::{CycleConfig, StationConfig};
pub use orchestrator::{CaptureOrchestrator, GroupCapture, GroupCaptureFailed, GroupKey, RoiGroup};
pub use station::{GroupSummary, InspectionPlan, InspectionReport, InspectionStation, RoiIssue};

use camera_pipeline::CameraError;
use inspection_engine::{EngineError, LinkError};
use roi_config::ProductError;
use thiserror::Error;

/// Inspection session errors
#[derive(Error, Debug)]
pub enum StationError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Inspection engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Barcode linker setup failed: {0}")]
    Link(#[from] LinkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Product configuration error: {0}")]
    Product(#[from] ProductError),
}

impl StationError {
    /// Stable machine-readable error kind
    pub fn code(&self) -> &'static str {
        match self {
            StationError::Camera(CameraError::PipelineNotReady(_)) => "pipeline_not_ready",
            StationError::Camera(CameraError::Cancelled) => "cancelled",
            StationError::Camera(CameraError::Timeout(_)) => "camera_timeout",
            StationError::Camera(_) => "camera_error",
            StationError::Engine(e) if e.is_unavailable() => "engine_unavailable",
            StationError::Engine(_) => "engine_error",
            StationError::Link(_) => "link_error",
            StationError::Config(_) => "config_error",
            StationError::Product(_) => "product_error",
        }
    }
}
