//! Raspberry Pi camera through `rpicam-still`
//!
//! The Pi camera runs auto exposure and auto focus, so this driver has no
//! writable properties. Each capture spawns `rpicam-still`, waits for it up to
//! the capture timeout and reads back the JPEG it wrote.

use crate::config::HardwareConfig;
use crate::driver::{CameraDriver, PropertyValue};
use crate::frame::{PixelFormat, RawFrame};
use crate::state::PipelineState;
use crate::CameraError;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

const BINARY: &str = "rpicam-still";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Raspberry Pi camera driver
pub struct RpicamDriver {
    binary: String,
    camera_index: String,
    width: u32,
    height: u32,
    sequence: u32,
}

impl RpicamDriver {
    pub fn new(config: &HardwareConfig) -> Self {
        let camera_index = if config.device.is_empty() {
            "0".to_string()
        } else {
            config.device.clone()
        };
        Self {
            binary: BINARY.to_string(),
            camera_index,
            width: config.width,
            height: config.height,
            sequence: 0,
        }
    }

    /// Use a different capture binary (e.g. `libcamera-still` on older images)
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Arguments for one still capture into `output`
    pub fn command_args(&self, output: &Path) -> Vec<String> {
        vec![
            "-n".to_string(),
            "--immediate".to_string(),
            "-t".to_string(),
            "1".to_string(),
            "--camera".to_string(),
            self.camera_index.clone(),
            "--width".to_string(),
            self.width.to_string(),
            "--height".to_string(),
            self.height.to_string(),
            "-e".to_string(),
            "jpg".to_string(),
            "-o".to_string(),
            output.display().to_string(),
        ]
    }

    fn probe(&self) -> Result<(), CameraError> {
        let status = Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| CameraError::Open(format!("{} not available: {}", self.binary, e)))?;
        if !status.success() {
            return Err(CameraError::Open(format!(
                "{} --version exited with {}",
                self.binary, status
            )));
        }
        Ok(())
    }

    fn temp_output(&self) -> PathBuf {
        std::env::temp_dir().join(format!("aoi-capture-{}.jpg", Uuid::new_v4()))
    }
}

impl CameraDriver for RpicamDriver {
    fn name(&self) -> &str {
        "rpicam"
    }

    fn transition(&mut self, target: PipelineState) -> Result<(), CameraError> {
        if target == PipelineState::Ready {
            self.probe()?;
            info!(binary = %self.binary, camera = %self.camera_index, "Pi camera available");
        }
        Ok(())
    }

    fn has_property(&self, _name: &str) -> bool {
        false
    }

    fn set_property(&mut self, name: &str, _value: &PropertyValue) -> Result<(), CameraError> {
        Err(CameraError::Unsupported(format!(
            "{} (Pi camera runs auto exposure and auto focus)",
            name
        )))
    }

    fn pull_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CameraError> {
        let output = self.temp_output();
        let mut child = Command::new(&self.binary)
            .args(self.command_args(&output))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CameraError::Driver(format!("failed to spawn {}: {}", self.binary, e)))?;

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= timeout => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "Capture timed out, killing {}", self.binary);
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = std::fs::remove_file(&output);
                    return Err(CameraError::Timeout(timeout.as_millis() as u64));
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(CameraError::Driver(e.to_string())),
            }
        };

        if !status.success() {
            let _ = std::fs::remove_file(&output);
            return Err(CameraError::Driver(format!("{} exited with {}", self.binary, status)));
        }

        let Some(data) = take_output(&output)? else {
            return Ok(None);
        };

        self.sequence = self.sequence.wrapping_add(1);
        debug!(bytes = data.len(), sequence = self.sequence, "Pi still captured");

        Ok(Some(RawFrame {
            data,
            width: self.width,
            height: self.height,
            format: PixelFormat::Jpeg,
            sequence: self.sequence,
        }))
    }
}

/// Read and remove a still. The file is removed whether or not the read worked.
fn take_output(path: &Path) -> Result<Option<Vec<u8>>, CameraError> {
    let read = std::fs::read(path);
    let _ = std::fs::remove_file(path);
    match read {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CameraError::Driver(format!("failed to read {}: {}", path.display(), e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_args() {
        let driver = RpicamDriver::new(&HardwareConfig::raspberry_pi());
        let args = driver.command_args(Path::new("/tmp/out.jpg"));
        assert_eq!(&args[..4], &["-n", "--immediate", "-t", "1"]);
        let pos = args.iter().position(|a| a == "--width").unwrap();
        assert_eq!(args[pos + 1], "2028");
        assert_eq!(args.last().unwrap(), "/tmp/out.jpg");
    }

    #[test]
    fn test_properties_are_unsupported() {
        let mut driver = RpicamDriver::new(&HardwareConfig::raspberry_pi());
        assert!(!driver.has_property("Focus"));
        assert!(matches!(
            driver.set_property("Focus", &PropertyValue::Int(305)),
            Err(CameraError::Unsupported(_))
        ));
    }

    #[test]
    fn test_missing_binary_fails_ready() {
        let mut driver = RpicamDriver::new(&HardwareConfig::raspberry_pi())
            .with_binary("definitely-not-an-installed-camera-binary");
        assert!(matches!(
            driver.transition(PipelineState::Ready),
            Err(CameraError::Open(_))
        ));
        // Other steps do not touch the binary
        assert!(driver.transition(PipelineState::Paused).is_ok());
    }

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("aoi-rpicam-{}-{}.jpg", name, Uuid::new_v4()))
    }

    #[test]
    fn test_take_output_reads_and_removes() {
        let path = scratch("ok");
        std::fs::write(&path, b"\xff\xd8jpeg").unwrap();

        let data = take_output(&path).unwrap().unwrap();
        assert_eq!(data, b"\xff\xd8jpeg");
        assert!(!path.exists());

        assert!(take_output(&path).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_take_output_removes_unreadable_file() {
        let path = scratch("loop");
        // Self-referencing link: reading fails with something other than NotFound
        std::os::unix::fs::symlink(&path, &path).unwrap();

        let err = take_output(&path).unwrap_err();
        assert!(matches!(err, CameraError::Driver(_)));
        assert!(std::fs::symlink_metadata(&path).is_err());
    }
}
