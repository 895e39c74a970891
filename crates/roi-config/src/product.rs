//! Product configuration
//!
//! A product is a panel of `device_count` identical devices plus the ROI list
//! inspected on it. Configurations come from JSON files or API payloads.

use crate::normalizer::{NormalizationReport, RoiDefaults, RoiNormalizer};
use crate::validator::ValidationLimits;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Product configuration errors
#[derive(Debug, Error)]
pub enum ProductError {
    #[error("Cannot read product config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid product config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("device_count must be between 1 and {max}, got {count}")]
    DeviceCount { count: u32, max: u32 },
}

/// Most devices a single panel may carry
pub const MAX_DEVICE_COUNT: u32 = 64;

/// Camera settings a product is inspected with unless an ROI says otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraDefaults {
    pub focus: i32,
    pub exposure: i32,
    /// Overrides the station's capture width when set
    pub width: Option<u32>,
    /// Overrides the station's capture height when set
    pub height: Option<u32>,
    /// Pixel format name, e.g. `rgb24`
    pub format: Option<String>,
}

impl Default for CameraDefaults {
    fn default() -> Self {
        Self {
            focus: 305,
            exposure: 1200,
            width: None,
            height: None,
            format: None,
        }
    }
}

fn one() -> u32 {
    1
}

/// Product configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductConfig {
    #[serde(alias = "product_name")]
    pub name: String,
    #[serde(default = "one")]
    pub device_count: u32,
    #[serde(default)]
    pub camera: CameraDefaults,
    /// Raw ROI records in any supported shape
    #[serde(default, alias = "roi_list")]
    pub rois: Vec<Value>,
}

impl ProductConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProductError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ProductError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let product = Self::from_json_str(&text)?;
        info!(
            product = %product.name,
            devices = product.device_count,
            rois = product.rois.len(),
            "Product configuration loaded"
        );
        Ok(product)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ProductError> {
        serde_json::from_str::<Self>(text)?.validated()
    }

    pub fn from_value(value: Value) -> Result<Self, ProductError> {
        serde_json::from_value::<Self>(value)?.validated()
    }

    fn validated(self) -> Result<Self, ProductError> {
        if self.device_count == 0 || self.device_count > MAX_DEVICE_COUNT {
            return Err(ProductError::DeviceCount {
                count: self.device_count,
                max: MAX_DEVICE_COUNT,
            });
        }
        Ok(self)
    }

    /// Defaults for ROIs that leave focus or exposure out
    pub fn roi_defaults(&self) -> RoiDefaults {
        RoiDefaults {
            focus: self.camera.focus,
            exposure: self.camera.exposure,
            ..RoiDefaults::default()
        }
    }

    /// Normalizer for this product; `limits.device_count` is taken from the product
    pub fn normalizer(&self, limits: ValidationLimits) -> RoiNormalizer {
        RoiNormalizer::new(self.roi_defaults(), limits.with_device_count(self.device_count))
    }

    pub fn normalize(&self) -> NormalizationReport {
        self.normalize_with(ValidationLimits::default())
    }

    pub fn normalize_with(&self, limits: ValidationLimits) -> NormalizationReport {
        self.normalizer(limits).normalize_report(&self.rois)
    }
}
