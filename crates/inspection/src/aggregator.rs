//! Per-device aggregation
//!
//! Per-ROI results are grouped by device. A device passes only when every
//! one of its ROIs passed. Each device gets one display barcode, resolved by
//! a fixed priority:
//! 1. a decoded device-identifier ROI
//! 2. any other decoded barcode ROI
//! 3. the manual barcode entered for that device
//! 4. the manual barcode entered for the whole inspection

use inspection_engine::RoiVerdict;
use roi_config::{Roi, RoiKind, MAX_DEVICE_COUNT};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of one ROI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoiStatus {
    Passed,
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The group capture failed, nothing was evaluated
    NoImage { reason: String },
    /// The engine answered without a result for this ROI
    NoResult,
}

/// Result of one ROI in one inspection cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoiResult {
    pub roi_id: u32,
    pub device_id: u32,
    pub kind: RoiKind,
    pub is_device_identifier: bool,
    #[serde(flatten)]
    pub status: RoiStatus,
    pub similarity: Option<f64>,
    pub decoded_value: Option<String>,
    pub image_id: Option<Uuid>,
}

impl RoiResult {
    fn base(roi: &Roi, status: RoiStatus, image_id: Option<Uuid>) -> Self {
        Self {
            roi_id: roi.roi_id,
            device_id: roi.device_id,
            kind: roi.kind,
            is_device_identifier: roi.is_device_identifier,
            status,
            similarity: None,
            decoded_value: None,
            image_id,
        }
    }

    pub fn from_verdict(roi: &Roi, verdict: Option<&RoiVerdict>, image_id: Uuid) -> Self {
        let Some(verdict) = verdict else {
            return Self::base(roi, RoiStatus::NoResult, Some(image_id));
        };
        let status = if verdict.passed {
            RoiStatus::Passed
        } else {
            RoiStatus::Failed {
                error: verdict.error.clone(),
            }
        };
        Self {
            similarity: verdict.similarity,
            decoded_value: verdict.decoded_value.clone(),
            ..Self::base(roi, status, Some(image_id))
        }
    }

    pub fn no_image(roi: &Roi, reason: impl Into<String>) -> Self {
        Self::base(
            roi,
            RoiStatus::NoImage {
                reason: reason.into(),
            },
            None,
        )
    }

    pub fn passed(&self) -> bool {
        self.status == RoiStatus::Passed
    }

    fn decoded(&self) -> Option<&str> {
        self.decoded_value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Barcodes entered by the operator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualBarcodes {
    pub per_device: HashMap<u32, String>,
    pub global: Option<String>,
}

impl ManualBarcodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global(mut self, barcode: impl Into<String>) -> Self {
        self.global = Some(barcode.into());
        self
    }

    pub fn with_device(mut self, device_id: u32, barcode: impl Into<String>) -> Self {
        self.per_device.insert(device_id, barcode.into());
        self
    }

    fn for_device(&self, device_id: u32) -> Option<&str> {
        non_empty(self.per_device.get(&device_id))
    }

    fn global(&self) -> Option<&str> {
        non_empty(self.global.as_ref())
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Where a device barcode came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeSource {
    DeviceIdentifierRoi,
    BarcodeRoi,
    ManualDevice,
    ManualGlobal,
    None,
}

/// Standardized identifier for a device barcode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "link", rename_all = "snake_case")]
pub enum DeviceIdentifier {
    Linked { raw: String, linked: String },
    /// Linking failed; `raw` is used as-is
    Unlinked { raw: String, error: String },
}

impl DeviceIdentifier {
    pub fn value(&self) -> &str {
        match self {
            DeviceIdentifier::Linked { linked, .. } => linked,
            DeviceIdentifier::Unlinked { raw, .. } => raw,
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, DeviceIdentifier::Linked { .. })
    }
}

/// Verdict for one physical device on the panel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceResult {
    pub device_id: u32,
    pub passed: bool,
    pub barcode: Option<String>,
    pub barcode_source: BarcodeSource,
    /// Filled in by barcode linking
    pub identifier: Option<DeviceIdentifier>,
    pub roi_results: Vec<RoiResult>,
}

impl DeviceResult {
    pub fn display_barcode(&self) -> &str {
        self.barcode.as_deref().unwrap_or("N/A")
    }
}

/// Folds per-ROI results into per-device results
#[derive(Debug, Clone, Copy)]
pub struct DeviceAggregator {
    device_count: u32,
}

impl DeviceAggregator {
    /// `device_count` is capped at [`MAX_DEVICE_COUNT`]
    pub fn new(device_count: u32) -> Self {
        if device_count > MAX_DEVICE_COUNT {
            warn!(device_count, max = MAX_DEVICE_COUNT, "Device count capped");
        }
        Self {
            device_count: device_count.min(MAX_DEVICE_COUNT),
        }
    }

    /// One result per device, ordered by `device_id`.
    ///
    /// Devices `1..=device_count` are always present, even with no ROIs.
    pub fn aggregate(&self, results: Vec<RoiResult>, manual: &ManualBarcodes) -> Vec<DeviceResult> {
        let mut by_device: BTreeMap<u32, Vec<RoiResult>> =
            (1..=self.device_count).map(|id| (id, Vec::new())).collect();
        for result in results {
            by_device.entry(result.device_id).or_default().push(result);
        }

        by_device
            .into_iter()
            .map(|(device_id, roi_results)| {
                let passed = roi_results.iter().all(RoiResult::passed);
                if roi_results.is_empty() {
                    warn!(device_id, "Device has no ROI results, passing by default");
                }
                let (barcode, barcode_source) = resolve_barcode(device_id, &roi_results, manual);
                debug!(device_id, passed, source = ?barcode_source, "Device aggregated");
                DeviceResult {
                    device_id,
                    passed,
                    barcode,
                    barcode_source,
                    identifier: None,
                    roi_results,
                }
            })
            .collect()
    }
}

fn resolve_barcode(
    device_id: u32,
    results: &[RoiResult],
    manual: &ManualBarcodes,
) -> (Option<String>, BarcodeSource) {
    let identifier = results
        .iter()
        .filter(|r| r.is_device_identifier)
        .find_map(RoiResult::decoded);
    if let Some(barcode) = identifier {
        return (Some(barcode.to_string()), BarcodeSource::DeviceIdentifierRoi);
    }

    let decoded = results
        .iter()
        .filter(|r| !r.is_device_identifier && r.kind == RoiKind::Barcode)
        .find_map(RoiResult::decoded);
    if let Some(barcode) = decoded {
        return (Some(barcode.to_string()), BarcodeSource::BarcodeRoi);
    }

    if let Some(barcode) = manual.for_device(device_id) {
        return (Some(barcode.to_string()), BarcodeSource::ManualDevice);
    }
    if let Some(barcode) = manual.global() {
        return (Some(barcode.to_string()), BarcodeSource::ManualGlobal);
    }
    (None, BarcodeSource::None)
}
