//! Hardware configuration
//!
//! Settle delay and automatic-mode property names are hardware-SDK specific,
//! so they live here as per-backend configuration rather than in the state
//! machine.

use crate::frame::PixelFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Camera backend variant. Chosen statically from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Manual focus/exposure with a settle delay after every change
    #[default]
    Industrial,
    /// Auto-exposure / auto-focus camera (Raspberry Pi); focus and exposure
    /// are not controllable and captures never wait for settle
    AutoExposure,
}

/// Driver used to reach the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Synthetic frames, no hardware
    #[default]
    Simulated,
    /// Raspberry Pi camera through `rpicam-still`
    Rpicam,
    /// GStreamer source element (requires the `gstreamer` feature)
    Gstreamer,
}

/// Focus/exposure pair applied to the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraSettings {
    pub focus: i32,
    pub exposure: i32,
}

impl CameraSettings {
    pub fn new(focus: i32, exposure: i32) -> Self {
        Self { focus, exposure }
    }
}

/// Automatic camera modes that must be switched off for repeatable captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoMode {
    Exposure,
    Gain,
    WhiteBalance,
    Focus,
    Brightness,
    Iris,
}

/// One automatic mode and every property name it is known under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoProperty {
    pub mode: AutoMode,
    pub names: Vec<String>,
}

impl AutoProperty {
    fn new(mode: AutoMode, names: &[&str]) -> Self {
        Self {
            mode,
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    /// Property name variants seen across industrial camera SDKs
    pub fn industrial_defaults() -> Vec<AutoProperty> {
        vec![
            Self::new(
                AutoMode::Exposure,
                &["Exposure Auto", "ExposureAuto", "exposure-auto", "auto-exposure"],
            ),
            Self::new(AutoMode::Gain, &["Gain Auto", "GainAuto", "gain-auto", "auto-gain"]),
            Self::new(
                AutoMode::WhiteBalance,
                &[
                    "Whitebalance Auto",
                    "BalanceWhiteAuto",
                    "white-balance-auto",
                    "auto-white-balance",
                ],
            ),
            Self::new(AutoMode::Focus, &["Focus Auto", "FocusAuto", "focus-auto", "auto-focus"]),
            Self::new(
                AutoMode::Brightness,
                &["Brightness Auto", "BrightnessAuto", "auto-brightness"],
            ),
            Self::new(AutoMode::Iris, &["Iris Auto", "IrisAuto", "auto-iris"]),
        ]
    }
}

/// Camera hardware configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Backend variant
    pub backend: BackendKind,
    /// Driver used to reach the device
    pub driver: DriverKind,
    /// Device identifier (serial number, device path, or camera index)
    pub device: String,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Frame format delivered to the inspection engine
    pub format: PixelFormat,
    /// Focus applied on bring-up
    pub default_focus: i32,
    /// Exposure applied on bring-up
    pub default_exposure: i32,
    /// Wait after a focus/exposure change before a capture is trusted (ms)
    pub settle_delay_ms: u64,
    /// Upper bound for a settle wait (ms)
    pub settle_timeout_ms: u64,
    /// Upper bound for pulling one frame (ms)
    pub capture_timeout_ms: u64,
    /// Name of the focus property on the source
    pub focus_property: String,
    /// Name of the exposure property on the source
    pub exposure_property: String,
    /// Automatic modes to disable on bring-up
    pub auto_properties: Vec<AutoProperty>,
    /// GStreamer source description, e.g. `aravissrc camera-name=...`
    pub source: Option<String>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self::industrial()
    }
}

impl HardwareConfig {
    /// Industrial camera with manual focus/exposure
    pub fn industrial() -> Self {
        Self {
            backend: BackendKind::Industrial,
            driver: DriverKind::Simulated,
            device: String::new(),
            width: 1920,
            height: 1080,
            format: PixelFormat::Rgb24,
            default_focus: 305,
            default_exposure: 1200,
            settle_delay_ms: 3000,
            settle_timeout_ms: 10_000,
            capture_timeout_ms: 5000,
            focus_property: "Focus".to_string(),
            exposure_property: "Exposure".to_string(),
            auto_properties: AutoProperty::industrial_defaults(),
            source: None,
        }
    }

    /// Raspberry Pi camera (auto exposure and auto focus)
    pub fn raspberry_pi() -> Self {
        Self {
            backend: BackendKind::AutoExposure,
            driver: DriverKind::Rpicam,
            device: "0".to_string(),
            width: 2028,
            height: 1520,
            settle_delay_ms: 0,
            auto_properties: Vec::new(),
            ..Self::industrial()
        }
    }

    /// Settings applied when the pipeline is brought up
    pub fn default_settings(&self) -> CameraSettings {
        CameraSettings::new(self.default_focus, self.default_exposure)
    }

    pub fn settle_delay(&self) -> Duration {
        match self.backend {
            BackendKind::Industrial => Duration::from_millis(self.settle_delay_ms),
            BackendKind::AutoExposure => Duration::ZERO,
        }
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_exposure_never_settles() {
        let config = HardwareConfig {
            settle_delay_ms: 3000,
            ..HardwareConfig::raspberry_pi()
        };
        assert_eq!(config.settle_delay(), Duration::ZERO);
        assert_eq!(HardwareConfig::industrial().settle_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: HardwareConfig =
            serde_json::from_str(r#"{"backend": "auto_exposure", "width": 640}"#).unwrap();
        assert_eq!(config.backend, BackendKind::AutoExposure);
        assert_eq!(config.width, 640);
        assert_eq!(config.default_focus, 305);
        assert_eq!(config.auto_properties.len(), 6);
    }
}
