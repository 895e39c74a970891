//! Canonical ROI record

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const DEFAULT_AI_THRESHOLD: f64 = 0.8;
pub const DEFAULT_FEATURE_METHOD: &str = "opencv";

/// What the inspection engine does with an ROI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoiKind {
    Barcode = 1,
    /// Golden-sample comparison; also used for unrecognized kinds
    #[default]
    Compare = 2,
    Ocr = 3,
    Text = 4,
}

impl RoiKind {
    /// Kind for a numeric code (1-4)
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(RoiKind::Barcode),
            2 => Some(RoiKind::Compare),
            3 => Some(RoiKind::Ocr),
            4 => Some(RoiKind::Text),
            _ => None,
        }
    }

    /// Kind for a name or numeric string, case-insensitive
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Ok(code) = name.parse::<i64>() {
            return Self::from_code(code);
        }
        match name.to_ascii_lowercase().as_str() {
            "barcode" => Some(RoiKind::Barcode),
            "compare" => Some(RoiKind::Compare),
            "ocr" => Some(RoiKind::Ocr),
            "text" => Some(RoiKind::Text),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoiKind::Barcode => "barcode",
            RoiKind::Compare => "compare",
            RoiKind::Ocr => "ocr",
            RoiKind::Text => "text",
        }
    }
}

impl fmt::Display for RoiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel rectangle within the captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Bounds {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_ordered(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

/// Region of interest in canonical form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub roi_id: u32,
    pub kind: RoiKind,
    pub device_id: u32,
    pub bounds: Bounds,
    pub ai_threshold: f64,
    pub focus: i32,
    pub exposure: i32,
    pub enabled: bool,
    /// Degrees; always 0 unless `kind` is OCR
    pub rotation: u16,
    pub is_device_identifier: bool,
    pub feature_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_pattern: Option<String>,
}

impl Roi {
    /// `(focus, exposure)` this ROI must be captured under
    pub fn capture_settings(&self) -> (i32, i32) {
        (self.focus, self.exposure)
    }

    /// Canonical mapping; normalizing it again yields an identical ROI
    pub fn to_mapping(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
