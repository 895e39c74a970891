//! Fast vs. settled capture
//!
//! A capture under the settings the camera already has goes straight to the
//! sensor. Anything else writes the settings and waits out the settle delay
//! first. `prepare` and `shoot` are separate so callers can overlap other I/O
//! with the settle wait.

use crate::config::CameraSettings;
use crate::controller::PipelineController;
use crate::frame::CapturedImage;
use crate::CameraError;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

/// How a frame was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePath {
    /// Settings already applied, no wait
    Fast,
    /// Settings written and settle delay observed
    Settled,
}

/// Settings applied and ready to shoot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedCapture {
    pub settings: CameraSettings,
    pub path: CapturePath,
}

/// A captured frame and how it was obtained
#[derive(Debug, Clone)]
pub struct CapturedShot {
    pub image: CapturedImage,
    pub path: CapturePath,
    /// The fast path failed and the frame came from the settled retry
    pub retried: bool,
}

/// Capture strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStrategy;

impl CaptureStrategy {
    pub fn new() -> Self {
        Self
    }

    /// Apply `settings` unless the camera already has them
    pub async fn prepare(
        &self,
        controller: &mut PipelineController,
        settings: CameraSettings,
    ) -> Result<PreparedCapture, CameraError> {
        let path = if controller.needs_settle(settings) {
            controller.set_properties(settings, false).await?;
            CapturePath::Settled
        } else {
            CapturePath::Fast
        };
        debug!(focus = settings.focus, exposure = settings.exposure, ?path, "Capture prepared");
        Ok(PreparedCapture { settings, path })
    }

    /// Capture one frame. A failed fast-path capture is retried once
    /// through the settled path.
    pub async fn shoot(
        &self,
        controller: &mut PipelineController,
        prepared: PreparedCapture,
    ) -> Result<CapturedShot, CameraError> {
        match controller.capture().await {
            Ok(image) => Ok(CapturedShot {
                image,
                path: prepared.path,
                retried: false,
            }),
            Err(e) if prepared.path == CapturePath::Fast && e.is_retryable() => {
                warn!(error = %e, "Fast capture failed, retrying with settle delay");
                counter!("aoi_capture_retries_total").increment(1);
                controller.set_properties(prepared.settings, false).await?;
                let image = controller.capture().await?;
                Ok(CapturedShot {
                    image,
                    path: CapturePath::Settled,
                    retried: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// `prepare` followed by `shoot`
    pub async fn capture(
        &self,
        controller: &mut PipelineController,
        settings: CameraSettings,
    ) -> Result<CapturedShot, CameraError> {
        let prepared = self.prepare(controller, settings).await?;
        self.shoot(controller, prepared).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HardwareConfig;
    use crate::frame::FrameFault;
    use crate::simulated::{SimulatedFault, SimulatorHandle};
    use crate::state::PipelineState;
    use std::time::Duration;

    fn config() -> HardwareConfig {
        HardwareConfig {
            width: 8,
            height: 6,
            ..HardwareConfig::industrial()
        }
    }

    async fn playing() -> (PipelineController, SimulatorHandle) {
        let handle = SimulatorHandle::new();
        let mut controller = PipelineController::with_opener(config(), handle.opener());
        controller.initialize(&config()).await.unwrap();
        (controller, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_settings_take_fast_path() {
        let (mut controller, handle) = playing().await;
        let writes = handle.property_writes().len();

        let started = tokio::time::Instant::now();
        let shot = CaptureStrategy::new()
            .capture(&mut controller, CameraSettings::new(305, 1200))
            .await
            .unwrap();

        assert_eq!(shot.path, CapturePath::Fast);
        assert!(!shot.retried);
        assert_eq!(handle.property_writes().len(), writes);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_settings_wait_for_settle() {
        let (mut controller, _handle) = playing().await;

        let started = tokio::time::Instant::now();
        let shot = CaptureStrategy::new()
            .capture(&mut controller, CameraSettings::new(310, 1500))
            .await
            .unwrap();

        assert_eq!(shot.path, CapturePath::Settled);
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(shot.image.settings(), CameraSettings::new(310, 1500));
        assert_eq!(controller.applied_settings(), Some(CameraSettings::new(310, 1500)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_path_failure_retries_once_with_settle() {
        let (mut controller, handle) = playing().await;
        let writes = handle.property_writes().len();
        handle.inject(SimulatedFault::NullBuffer);

        let started = tokio::time::Instant::now();
        let shot = CaptureStrategy::new()
            .capture(&mut controller, CameraSettings::new(305, 1200))
            .await
            .unwrap();

        assert!(shot.retried);
        assert_eq!(shot.path, CapturePath::Settled);
        assert_eq!(handle.capture_count(), 2);
        assert_eq!(handle.property_writes().len(), writes + 2);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failure_surfaces() {
        let (mut controller, handle) = playing().await;
        handle.inject(SimulatedFault::NullBuffer);
        handle.inject(SimulatedFault::ZeroSize);

        let result = CaptureStrategy::new()
            .capture(&mut controller, CameraSettings::new(305, 1200))
            .await;
        assert!(matches!(
            result,
            Err(CameraError::CaptureFailed(FrameFault::ZeroSize))
        ));
        assert_eq!(handle.capture_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_failure_is_not_retried() {
        let (mut controller, handle) = playing().await;
        handle.inject(SimulatedFault::NullBuffer);

        let result = CaptureStrategy::new()
            .capture(&mut controller, CameraSettings::new(310, 1500))
            .await;
        assert!(matches!(result, Err(CameraError::CaptureFailed(_))));
        assert_eq!(handle.capture_count(), 1);
    }

    #[tokio::test]
    async fn test_not_ready_is_not_retried() {
        let handle = SimulatorHandle::new();
        let mut controller = PipelineController::with_opener(config(), handle.opener());

        let result = CaptureStrategy::new()
            .capture(&mut controller, CameraSettings::new(305, 1200))
            .await;
        assert!(matches!(
            result,
            Err(CameraError::PipelineNotReady(PipelineState::Null))
        ));
        assert_eq!(handle.capture_count(), 0);
    }
}
