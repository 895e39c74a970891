//! ROI validation
//!
//! Validation never rejects an ROI; it reports warnings that callers log or
//! surface next to the inspection result.

use crate::error::RoiWarning;
use crate::roi::{Roi, RoiKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Hardware-sane ranges
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationLimits {
    /// Devices on the panel; valid `device_id`s are `1..=device_count`
    pub device_count: u32,
    pub focus_range: (i32, i32),
    pub exposure_range: (i32, i32),
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            device_count: 1,
            focus_range: (0, 1023),
            exposure_range: (1, 1_000_000),
        }
    }
}

impl ValidationLimits {
    pub fn with_device_count(mut self, device_count: u32) -> Self {
        self.device_count = device_count;
        self
    }
}

/// Result of validating one ROI
#[derive(Debug, Clone, PartialEq)]
pub struct RoiValidation {
    pub valid: bool,
    pub errors: Vec<RoiWarning>,
}

impl RoiValidation {
    fn from_errors(errors: Vec<RoiWarning>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }
}

/// ROI validator
#[derive(Debug, Clone, Default)]
pub struct RoiValidator {
    limits: ValidationLimits,
}

impl RoiValidator {
    pub fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    fn check_range(
        field: &'static str,
        value: f64,
        (min, max): (f64, f64),
        errors: &mut Vec<RoiWarning>,
    ) {
        // NaN fails both comparisons
        if !(value >= min && value <= max) {
            errors.push(RoiWarning::OutOfRange {
                field,
                value,
                min,
                max,
            });
        }
    }

    pub fn validate(&self, roi: &Roi) -> RoiValidation {
        let mut errors = Vec::new();
        let b = roi.bounds;

        if !b.is_ordered() {
            errors.push(RoiWarning::BoundsOrder {
                x1: b.x1,
                y1: b.y1,
                x2: b.x2,
                y2: b.y2,
            });
        }

        if roi.device_id < 1 || roi.device_id > self.limits.device_count {
            errors.push(RoiWarning::DeviceOutOfRange {
                device_id: roi.device_id,
                device_count: self.limits.device_count,
            });
        }

        Self::check_range("ai_threshold", roi.ai_threshold, (0.0, 1.0), &mut errors);
        let (fmin, fmax) = self.limits.focus_range;
        Self::check_range("focus", roi.focus.into(), (fmin.into(), fmax.into()), &mut errors);
        let (emin, emax) = self.limits.exposure_range;
        Self::check_range(
            "exposure",
            roi.exposure.into(),
            (emin.into(), emax.into()),
            &mut errors,
        );

        if roi.kind == RoiKind::Ocr && ![0, 90, 180, 270].contains(&roi.rotation) {
            errors.push(RoiWarning::Rotation(roi.rotation));
        }

        if roi.kind == RoiKind::Text
            && roi
                .expected_text
                .as_deref()
                .map_or(true, |t| t.trim().is_empty())
        {
            errors.push(RoiWarning::MissingField("expected_text"));
        }

        RoiValidation::from_errors(errors)
    }

    /// Validate a set of ROIs, including `roi_id` uniqueness across the set
    pub fn validate_all(&self, rois: &[Roi]) -> Vec<(u32, RoiValidation)> {
        let mut seen = HashSet::new();
        rois.iter()
            .map(|roi| {
                let mut result = self.validate(roi);
                if !seen.insert(roi.roi_id) {
                    result.errors.push(RoiWarning::DuplicateId(roi.roi_id));
                    result.valid = false;
                }
                (roi.roi_id, result)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roi::Bounds;

    fn roi() -> Roi {
        Roi {
            roi_id: 1,
            kind: RoiKind::Compare,
            device_id: 1,
            bounds: Bounds::new(10, 10, 50, 50),
            ai_threshold: 0.8,
            focus: 305,
            exposure: 1200,
            enabled: true,
            rotation: 0,
            is_device_identifier: false,
            feature_method: "opencv".to_string(),
            expected_text: None,
            expected_pattern: None,
        }
    }

    #[test]
    fn test_valid_roi() {
        let result = RoiValidator::default().validate(&roi());
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_unordered_bounds() {
        let bad = Roi {
            bounds: Bounds::new(100, 100, 50, 50),
            ..roi()
        };
        let result = RoiValidator::default().validate(&bad);
        assert!(!result.valid);
        assert!(result.messages()[0].starts_with("bounds"));
    }

    #[test]
    fn test_device_range_follows_limits() {
        let on_device_3 = Roi {
            device_id: 3,
            ..roi()
        };
        assert!(!RoiValidator::default().validate(&on_device_3).valid);
        let limits = ValidationLimits::default().with_device_count(4);
        assert!(RoiValidator::new(limits).validate(&on_device_3).valid);
        let on_device_0 = Roi {
            device_id: 0,
            ..roi()
        };
        assert!(!RoiValidator::default().validate(&on_device_0).valid);
    }

    #[test]
    fn test_threshold_and_hardware_ranges() {
        let bad = Roi {
            ai_threshold: 1.5,
            focus: 2000,
            exposure: 0,
            ..roi()
        };
        let result = RoiValidator::default().validate(&bad);
        let fields: Vec<_> = result
            .errors
            .iter()
            .filter_map(|e| match e {
                RoiWarning::OutOfRange { field, .. } => Some(*field),
                _ => None,
            })
            .collect();
        assert_eq!(fields, vec!["ai_threshold", "focus", "exposure"]);

        let nan = Roi {
            ai_threshold: f64::NAN,
            ..roi()
        };
        assert!(!RoiValidator::default().validate(&nan).valid);
    }

    #[test]
    fn test_ocr_rotation() {
        let ocr = Roi {
            kind: RoiKind::Ocr,
            rotation: 45,
            ..roi()
        };
        let result = RoiValidator::default().validate(&ocr);
        assert_eq!(result.errors, vec![RoiWarning::Rotation(45)]);
    }

    #[test]
    fn test_text_requires_expected_text() {
        let text = Roi {
            kind: RoiKind::Text,
            expected_text: Some("  ".to_string()),
            ..roi()
        };
        let result = RoiValidator::default().validate(&text);
        assert_eq!(result.errors, vec![RoiWarning::MissingField("expected_text")]);
    }

    #[test]
    fn test_duplicate_ids() {
        let results = RoiValidator::default().validate_all(&[roi(), roi()]);
        assert!(results[0].1.valid);
        assert_eq!(results[1].1.errors, vec![RoiWarning::DuplicateId(1)]);
    }
}
