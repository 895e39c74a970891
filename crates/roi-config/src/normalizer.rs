//! ROI normalization
//!
//! Accepted shapes:
//! - positional: `[id, device_id, bounds, focus, exposure, threshold, method,
//!   rotation, kind_code, expected_text?, is_device_identifier?]`
//! - mapping with canonical keys (`roi_id`, `kind`, `device_id`, `bounds`, ...)
//! - mapping with legacy spellings (`idx`, `type`, `device_location`,
//!   `coords`, `exposure_time`, `is_device_barcode`, `sample_text`, ...)
//!
//! Bounds are either a four-element sequence or `{x1, y1, x2, y2}`.

use crate::error::{NormalizationError, RoiWarning};
use crate::roi::{Bounds, Roi, RoiKind, DEFAULT_AI_THRESHOLD, DEFAULT_FEATURE_METHOD};
use crate::validator::{RoiValidation, RoiValidator, ValidationLimits};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

/// Minimum length of a positional record
pub const POSITIONAL_MIN_LEN: usize = 9;

const ROI_ID: &[&str] = &["roi_id", "idx", "id"];
const KIND: &[&str] = &["kind", "roi_type_name", "type", "roi_type"];
const DEVICE_ID: &[&str] = &["device_id", "device", "device_location"];
const BOUNDS: &[&str] = &["bounds", "coordinates", "coords"];
const AI_THRESHOLD: &[&str] = &["ai_threshold", "threshold"];
const FOCUS: &[&str] = &["focus"];
const EXPOSURE: &[&str] = &["exposure", "exposure_time"];
const ENABLED: &[&str] = &["enabled"];
const ROTATION: &[&str] = &["rotation"];
const DEVICE_IDENTIFIER: &[&str] = &["is_device_identifier", "is_device_barcode"];
const FEATURE_METHOD: &[&str] = &["feature_method", "method"];
const EXPECTED_TEXT: &[&str] = &["expected_text", "sample_text"];
const EXPECTED_PATTERN: &[&str] = &["expected_pattern", "pattern"];

/// ROI record as it arrives from a product configuration or API payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawRoi {
    Positional(Vec<Value>),
    Mapping(Map<String, Value>),
}

impl RawRoi {
    pub fn from_value(value: Value, record: &str) -> Result<Self, NormalizationError> {
        match value {
            Value::Array(items) => Ok(RawRoi::Positional(items)),
            Value::Object(map) => Ok(RawRoi::Mapping(map)),
            other => Err(NormalizationError::UnsupportedShape {
                record: record.to_string(),
                found: value_kind(&other),
            }),
        }
    }
}

impl From<Roi> for RawRoi {
    fn from(roi: Roi) -> Self {
        RawRoi::Mapping(roi.to_mapping())
    }
}

/// Values used when a record leaves a field out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiDefaults {
    pub focus: i32,
    pub exposure: i32,
    pub ai_threshold: f64,
    pub feature_method: String,
}

impl Default for RoiDefaults {
    fn default() -> Self {
        Self {
            focus: 305,
            exposure: 1200,
            ai_threshold: DEFAULT_AI_THRESHOLD,
            feature_method: DEFAULT_FEATURE_METHOD.to_string(),
        }
    }
}

/// Outcome of normalizing a list of records
#[derive(Debug, Clone, Default)]
pub struct NormalizationReport {
    /// Every record that could be normalized, valid or not, in input order
    pub rois: Vec<Roi>,
    /// Records that could not be normalized
    pub rejected: Vec<NormalizationError>,
    /// Normalization and validation warnings by `roi_id`
    pub warnings: Vec<(u32, RoiWarning)>,
}

impl NormalizationReport {
    pub fn warnings_for(&self, roi_id: u32) -> Vec<&RoiWarning> {
        self.warnings
            .iter()
            .filter(|(id, _)| *id == roi_id)
            .map(|(_, w)| w)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.warnings.is_empty()
    }
}

/// Normalizes raw ROI records into [`Roi`]s
#[derive(Debug, Clone, Default)]
pub struct RoiNormalizer {
    defaults: RoiDefaults,
    validator: RoiValidator,
}

/// Fields of one record, pulled out of whichever shape it came in
struct Fields<'a> {
    record: String,
    roi_id: Option<&'a Value>,
    device_id: Option<&'a Value>,
    bounds: Option<&'a Value>,
    focus: Option<&'a Value>,
    exposure: Option<&'a Value>,
    ai_threshold: Option<&'a Value>,
    feature_method: Option<&'a Value>,
    rotation: Option<&'a Value>,
    kind: Option<&'a Value>,
    expected_text: Option<&'a Value>,
    is_device_identifier: Option<&'a Value>,
    enabled: Option<&'a Value>,
    expected_pattern: Option<&'a Value>,
}

impl RoiNormalizer {
    pub fn new(defaults: RoiDefaults, limits: ValidationLimits) -> Self {
        Self {
            defaults,
            validator: RoiValidator::new(limits),
        }
    }

    pub fn defaults(&self) -> &RoiDefaults {
        &self.defaults
    }

    pub fn validator(&self) -> &RoiValidator {
        &self.validator
    }

    /// Normalize one record. Normalization warnings are logged.
    pub fn normalize(&self, raw: &RawRoi) -> Result<Roi, NormalizationError> {
        let (roi, warnings) = self.normalize_with_warnings(raw, "roi")?;
        for warning in &warnings {
            warn!(roi_id = roi.roi_id, "{}", warning);
        }
        Ok(roi)
    }

    /// Normalize a JSON value of either shape
    pub fn normalize_value(&self, value: &Value) -> Result<Roi, NormalizationError> {
        self.normalize(&RawRoi::from_value(value.clone(), "roi")?)
    }

    pub fn validate(&self, roi: &Roi) -> RoiValidation {
        self.validator.validate(roi)
    }

    /// Normalize a list, never failing. Malformed records are dropped and
    /// logged; invalid ROIs are kept and their warnings logged.
    pub fn normalize_many(&self, raw: &[Value]) -> Vec<Roi> {
        let report = self.normalize_report(raw);
        for rejected in &report.rejected {
            error!("Dropping ROI record: {}", rejected);
        }
        for (roi_id, warning) in &report.warnings {
            warn!(roi_id, "ROI validation: {}", warning);
        }
        report.rois
    }

    /// Normalize a list and collect rejected records and warnings
    pub fn normalize_report(&self, raw: &[Value]) -> NormalizationReport {
        let mut report = NormalizationReport::default();

        for (index, value) in raw.iter().enumerate() {
            let record = format!("record {}", index);
            let normalized = RawRoi::from_value(value.clone(), &record)
                .and_then(|raw| self.normalize_with_warnings(&raw, &record));
            match normalized {
                Ok((roi, warnings)) => {
                    report
                        .warnings
                        .extend(warnings.into_iter().map(|w| (roi.roi_id, w)));
                    report.rois.push(roi);
                }
                Err(e) => report.rejected.push(e),
            }
        }

        for (roi_id, validation) in self.validator.validate_all(&report.rois) {
            report
                .warnings
                .extend(validation.errors.into_iter().map(|w| (roi_id, w)));
        }

        debug!(
            normalized = report.rois.len(),
            rejected = report.rejected.len(),
            warnings = report.warnings.len(),
            "ROI list normalized"
        );
        report
    }

    fn normalize_with_warnings(
        &self,
        raw: &RawRoi,
        record: &str,
    ) -> Result<(Roi, Vec<RoiWarning>), NormalizationError> {
        let fields = match raw {
            RawRoi::Positional(items) => positional_fields(items, record)?,
            RawRoi::Mapping(map) => mapping_fields(map, record),
        };
        self.build(fields)
    }

    fn build(&self, f: Fields<'_>) -> Result<(Roi, Vec<RoiWarning>), NormalizationError> {
        let mut warnings = Vec::new();

        let roi_id = f.roi_id.ok_or_else(|| NormalizationError::MissingField {
            record: f.record.clone(),
            field: "roi_id",
        })?;
        let roi_id = to_u32(roi_id, &f.record, "roi_id")?;
        // Name the record by its id from here on
        let record = format!("{} (roi {})", f.record, roi_id);

        let bounds = f.bounds.ok_or_else(|| NormalizationError::MissingField {
            record: record.clone(),
            field: "bounds",
        })?;
        let bounds = to_bounds(bounds, &record)?;

        let kind = match f.kind {
            None => RoiKind::Compare,
            Some(value) => match kind_of(value) {
                Some(kind) => kind,
                None => {
                    warnings.push(RoiWarning::KindDefaulted(value.to_string()));
                    RoiKind::Compare
                }
            },
        };

        let device_id = match f.device_id {
            Some(value) => to_u32(value, &record, "device_id")?,
            None => {
                warnings.push(RoiWarning::DeviceDefaulted);
                1
            }
        };

        let focus = match f.focus {
            Some(value) => to_i32(value, &record, "focus")?,
            None => self.defaults.focus,
        };
        let exposure = match f.exposure {
            Some(value) => to_i32(value, &record, "exposure")?,
            None => self.defaults.exposure,
        };
        let ai_threshold = match f.ai_threshold {
            Some(value) => to_f64(value, &record, "ai_threshold")?,
            None => self.defaults.ai_threshold,
        };
        let feature_method = match f.feature_method {
            Some(value) => to_string(value, &record, "feature_method")?,
            None => self.defaults.feature_method.clone(),
        };
        let rotation = match f.rotation {
            Some(value) if kind == RoiKind::Ocr => {
                to_i64(value, &record, "rotation")?.rem_euclid(360) as u16
            }
            Some(value) => {
                // Still reject garbage, but rotation only means something for OCR
                to_i64(value, &record, "rotation")?;
                0
            }
            None => 0,
        };
        let is_device_identifier = match f.is_device_identifier {
            Some(value) => to_bool(value, &record, "is_device_identifier")?,
            None => kind == RoiKind::Barcode,
        };
        let enabled = match f.enabled {
            Some(value) => to_bool(value, &record, "enabled")?,
            None => true,
        };
        let expected_text = f
            .expected_text
            .map(|v| to_string(v, &record, "expected_text"))
            .transpose()?;
        let expected_pattern = f
            .expected_pattern
            .map(|v| to_string(v, &record, "expected_pattern"))
            .transpose()?;

        let roi = Roi {
            roi_id,
            kind,
            device_id,
            bounds,
            ai_threshold,
            focus,
            exposure,
            enabled,
            rotation,
            is_device_identifier,
            feature_method,
            expected_text,
            expected_pattern,
        };
        Ok((roi, warnings))
    }
}

fn positional_fields<'a>(
    items: &'a [Value],
    record: &str,
) -> Result<Fields<'a>, NormalizationError> {
    if items.len() < POSITIONAL_MIN_LEN {
        return Err(NormalizationError::TooShort {
            record: record.to_string(),
            len: items.len(),
            min: POSITIONAL_MIN_LEN,
        });
    }
    let at = |i: usize| items.get(i).filter(|v| !v.is_null());
    Ok(Fields {
        record: record.to_string(),
        roi_id: at(0),
        device_id: at(1),
        bounds: at(2),
        focus: at(3),
        exposure: at(4),
        ai_threshold: at(5),
        feature_method: at(6),
        rotation: at(7),
        kind: at(8),
        expected_text: at(9),
        is_device_identifier: at(10),
        enabled: None,
        expected_pattern: None,
    })
}

fn mapping_fields<'a>(map: &'a Map<String, Value>, record: &str) -> Fields<'a> {
    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| map.get(*name).filter(|v| !v.is_null()))
    };
    Fields {
        record: record.to_string(),
        roi_id: field(ROI_ID),
        device_id: field(DEVICE_ID),
        bounds: field(BOUNDS),
        focus: field(FOCUS),
        exposure: field(EXPOSURE),
        ai_threshold: field(AI_THRESHOLD),
        feature_method: field(FEATURE_METHOD),
        rotation: field(ROTATION),
        kind: field(KIND),
        expected_text: field(EXPECTED_TEXT),
        is_device_identifier: field(DEVICE_IDENTIFIER),
        enabled: field(ENABLED),
        expected_pattern: field(EXPECTED_PATTERN),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

fn invalid(record: &str, field: &'static str, reason: String) -> NormalizationError {
    NormalizationError::InvalidField {
        record: record.to_string(),
        field,
        reason,
    }
}

fn kind_of(value: &Value) -> Option<RoiKind> {
    match value {
        Value::Number(n) => n.as_i64().and_then(RoiKind::from_code),
        Value::String(s) => RoiKind::from_name(s),
        _ => None,
    }
}

fn to_f64(value: &Value, record: &str, field: &'static str) -> Result<f64, NormalizationError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| invalid(record, field, format!("{} is not representable", n))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid(record, field, format!("{:?} is not a number", s))),
        other => Err(invalid(
            record,
            field,
            format!("expected a number, found {}", value_kind(other)),
        )),
    }
}

fn to_i64(value: &Value, record: &str, field: &'static str) -> Result<i64, NormalizationError> {
    if let Value::Number(n) = value {
        if let Some(i) = n.as_i64() {
            return Ok(i);
        }
    }
    let f = to_f64(value, record, field)?;
    if f.fract() != 0.0 || !f.is_finite() {
        return Err(invalid(record, field, format!("{} is not an integer", f)));
    }
    Ok(f as i64)
}

fn to_i32(value: &Value, record: &str, field: &'static str) -> Result<i32, NormalizationError> {
    let i = to_i64(value, record, field)?;
    i32::try_from(i).map_err(|_| invalid(record, field, format!("{} is out of range", i)))
}

fn to_u32(value: &Value, record: &str, field: &'static str) -> Result<u32, NormalizationError> {
    let i = to_i64(value, record, field)?;
    u32::try_from(i).map_err(|_| invalid(record, field, format!("{} is negative or too large", i)))
}

fn to_bool(value: &Value, record: &str, field: &'static str) -> Result<bool, NormalizationError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_i64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_i64() == Some(1) => Ok(true),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" | "" => Ok(false),
            _ => Err(invalid(record, field, format!("{:?} is not a boolean", s))),
        },
        other => Err(invalid(
            record,
            field,
            format!("expected a boolean, found {}", other),
        )),
    }
}

fn to_string(value: &Value, record: &str, field: &'static str) -> Result<String, NormalizationError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(invalid(
            record,
            field,
            format!("expected a string, found {}", value_kind(other)),
        )),
    }
}

fn to_bounds(value: &Value, record: &str) -> Result<Bounds, NormalizationError> {
    let coord = |v: &Value| -> Result<i32, NormalizationError> {
        let f = to_f64(v, record, "bounds")?;
        if !f.is_finite() || f < i32::MIN as f64 || f > i32::MAX as f64 {
            return Err(invalid(record, "bounds", format!("coordinate {} out of range", f)));
        }
        Ok(f.round() as i32)
    };
    match value {
        Value::Array(items) if items.len() == 4 => Ok(Bounds::new(
            coord(&items[0])?,
            coord(&items[1])?,
            coord(&items[2])?,
            coord(&items[3])?,
        )),
        Value::Array(items) => Err(invalid(
            record,
            "bounds",
            format!("expected 4 coordinates, found {}", items.len()),
        )),
        Value::Object(map) => {
            let get = |key: &'static str| {
                map.get(key)
                    .ok_or_else(|| invalid(record, "bounds", format!("missing {}", key)))
                    .and_then(|v| coord(v))
            };
            Ok(Bounds::new(get("x1")?, get("y1")?, get("x2")?, get("y2")?))
        }
        other => Err(invalid(
            record,
            "bounds",
            format!("expected a sequence or mapping, found {}", value_kind(other)),
        )),
    }
}
