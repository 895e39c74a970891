//! Disabling automatic camera modes
//!
//! Camera SDKs disagree on both the property name and the value encoding of
//! "off", so every known name variant is probed and each off encoding is
//! tried in turn until the device accepts one.

use crate::config::{AutoMode, AutoProperty};
use crate::driver::{CameraDriver, PropertyValue};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Outcome of disabling automatic modes on bring-up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoModeReport {
    /// Property names switched off
    pub disabled: Vec<String>,
    /// Modes the device does not expose under any known name
    pub unavailable: Vec<AutoMode>,
    /// Property names present but refusing every off encoding
    pub rejected: Vec<String>,
}

impl AutoModeReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

fn off_values() -> [PropertyValue; 3] {
    [
        PropertyValue::Bool(false),
        PropertyValue::Text("Off".to_string()),
        PropertyValue::Int(0),
    ]
}

/// Switch off every automatic mode the device exposes
pub fn disable_auto_modes(
    driver: &mut dyn CameraDriver,
    properties: &[AutoProperty],
) -> AutoModeReport {
    let mut report = AutoModeReport::default();

    for property in properties {
        let present: Vec<&String> = property
            .names
            .iter()
            .filter(|name| driver.has_property(name))
            .collect();

        if present.is_empty() {
            debug!(mode = ?property.mode, "Auto mode not exposed by device");
            report.unavailable.push(property.mode);
            continue;
        }

        for name in present {
            let accepted = off_values()
                .iter()
                .find(|value| driver.set_property(name, value).is_ok())
                .cloned();
            match accepted {
                Some(value) => {
                    debug!(property = %name, value = %value, "Auto mode disabled");
                    report.disabled.push(name.clone());
                }
                None => {
                    warn!(property = %name, "Device refused every off value");
                    report.rejected.push(name.clone());
                }
            }
        }
    }

    info!(
        disabled = report.disabled.len(),
        unavailable = report.unavailable.len(),
        rejected = report.rejected.len(),
        "Automatic camera modes processed"
    );
    report
}
