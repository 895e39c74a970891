//! ROI Configuration
//!
//! Collapses every historical ROI representation (positional tuples, mappings
//! with canonical keys, mappings with legacy spellings) into one canonical
//! [`Roi`] record, validates it, and loads product configurations.

mod error;
mod normalizer;
mod product;
mod roi;
mod validator;

pub use error::{NormalizationError, RoiWarning};
pub use normalizer::{NormalizationReport, RawRoi, RoiDefaults, RoiNormalizer, POSITIONAL_MIN_LEN};
pub use product::{CameraDefaults, ProductConfig, ProductError, MAX_DEVICE_COUNT};
pub use roi::{Bounds, Roi, RoiKind, DEFAULT_AI_THRESHOLD, DEFAULT_FEATURE_METHOD};
pub use validator::{RoiValidation, RoiValidator, ValidationLimits};
