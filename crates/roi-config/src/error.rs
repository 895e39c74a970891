//! ROI error and warning types

use thiserror::Error;

/// A record that cannot be turned into an ROI at all
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizationError {
    /// Neither a sequence nor a mapping
    #[error("{record}: unsupported ROI shape ({found})")]
    UnsupportedShape { record: String, found: &'static str },

    /// Positional record with too few fields
    #[error("{record}: positional ROI has {len} fields, at least {min} required")]
    TooShort {
        record: String,
        len: usize,
        min: usize,
    },

    /// Required field absent
    #[error("{record}: missing required field {field}")]
    MissingField { record: String, field: &'static str },

    /// Field present with the wrong type or an unusable value
    #[error("{record}: invalid {field}: {reason}")]
    InvalidField {
        record: String,
        field: &'static str,
        reason: String,
    },
}

impl NormalizationError {
    /// Label of the offending record
    pub fn record(&self) -> &str {
        match self {
            NormalizationError::UnsupportedShape { record, .. }
            | NormalizationError::TooShort { record, .. }
            | NormalizationError::MissingField { record, .. }
            | NormalizationError::InvalidField { record, .. } => record,
        }
    }
}

/// Non-fatal problem with a normalized ROI
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoiWarning {
    #[error("bounds ({x1}, {y1}, {x2}, {y2}) are not ordered (need x1 < x2 and y1 < y2)")]
    BoundsOrder { x1: i32, y1: i32, x2: i32, y2: i32 },

    #[error("device_id {device_id} is outside 1..={device_count}")]
    DeviceOutOfRange { device_id: u32, device_count: u32 },

    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("rotation {0} is not one of 0, 90, 180, 270")]
    Rotation(u16),

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("unrecognized kind {0}, using compare")]
    KindDefaulted(String),

    #[error("device_id missing, using device 1")]
    DeviceDefaulted,

    #[error("roi_id {0} appears more than once")]
    DuplicateId(u32),
}
