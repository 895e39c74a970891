//! Capture orchestration
//!
//! Enabled ROIs are partitioned by the `(focus, exposure)` pair they must be
//! captured under. Each group is captured exactly once and every ROI in the
//! group references the same frame.

use camera_pipeline::{
    CameraError, CameraSettings, CapturePath, CaptureStrategy, CapturedImage, PipelineController,
    PreparedCapture,
};
use metrics::counter;
use roi_config::Roi;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Camera settings shared by every ROI in a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GroupKey {
    pub focus: i32,
    pub exposure: i32,
}

impl GroupKey {
    pub fn of(roi: &Roi) -> Self {
        Self {
            focus: roi.focus,
            exposure: roi.exposure,
        }
    }

    pub fn settings(&self) -> CameraSettings {
        CameraSettings::new(self.focus, self.exposure)
    }
}

impl From<CameraSettings> for GroupKey {
    fn from(settings: CameraSettings) -> Self {
        Self {
            focus: settings.focus,
            exposure: settings.exposure,
        }
    }
}

/// Enabled ROIs captured under one key
#[derive(Debug, Clone)]
pub struct RoiGroup {
    pub key: GroupKey,
    pub rois: Vec<Roi>,
}

impl RoiGroup {
    pub fn roi_ids(&self) -> Vec<u32> {
        self.rois.iter().map(|r| r.roi_id).collect()
    }
}

/// A group whose capture failed even after the retry. Its ROIs have no image.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("capture failed for focus {} exposure {}: {reason}", .key.focus, .key.exposure)]
pub struct GroupCaptureFailed {
    pub key: GroupKey,
    pub reason: String,
}

/// Capture outcome of one group
#[derive(Debug, Clone)]
pub struct GroupCapture {
    pub key: GroupKey,
    pub roi_ids: Vec<u32>,
    pub outcome: Result<CapturedImage, GroupCaptureFailed>,
    /// `None` when the settings could not be applied
    pub path: Option<CapturePath>,
    pub retried: bool,
}

impl GroupCapture {
    pub fn image(&self) -> Option<&CapturedImage> {
        self.outcome.as_ref().ok()
    }

    fn failed(group: &RoiGroup, path: Option<CapturePath>, error: &CameraError) -> Self {
        counter!("aoi_group_capture_failures_total").increment(1);
        warn!(
            focus = group.key.focus,
            exposure = group.key.exposure,
            rois = group.rois.len(),
            error = %error,
            "Group capture failed"
        );
        Self {
            key: group.key,
            roi_ids: group.roi_ids(),
            outcome: Err(GroupCaptureFailed {
                key: group.key,
                reason: error.to_string(),
            }),
            path,
            retried: path == Some(CapturePath::Fast) && error.is_retryable(),
        }
    }
}

/// Drives the capture strategy through one capture per group
#[derive(Debug, Clone, Default)]
pub struct CaptureOrchestrator {
    strategy: CaptureStrategy,
}

impl CaptureOrchestrator {
    pub fn new(strategy: CaptureStrategy) -> Self {
        Self { strategy }
    }

    /// Group enabled ROIs by capture settings.
    ///
    /// Groups keep first-appearance order, except that the group matching
    /// `current` (the settings already on the camera) goes first so it needs
    /// no settle wait.
    pub fn plan(&self, rois: &[Roi], current: Option<CameraSettings>) -> Vec<RoiGroup> {
        let mut groups: Vec<RoiGroup> = Vec::new();
        for roi in rois.iter().filter(|r| r.enabled) {
            let key = GroupKey::of(roi);
            match groups.iter_mut().find(|g| g.key == key) {
                Some(group) => group.rois.push(roi.clone()),
                None => groups.push(RoiGroup {
                    key,
                    rois: vec![roi.clone()],
                }),
            }
        }

        if let Some(current) = current.map(GroupKey::from) {
            if let Some(pos) = groups.iter().position(|g| g.key == current) {
                let group = groups.remove(pos);
                groups.insert(0, group);
            }
        }

        debug!(
            rois = rois.len(),
            groups = groups.len(),
            "Capture groups planned"
        );
        groups
    }

    /// Apply the group's settings and wait out the settle delay if needed
    pub async fn prepare_group(
        &self,
        controller: &mut PipelineController,
        group: &RoiGroup,
    ) -> Result<PreparedCapture, CameraError> {
        self.strategy.prepare(controller, group.key.settings()).await
    }

    /// Capture a prepared group.
    ///
    /// Fatal camera errors abort with `Err`; anything else becomes a failed
    /// [`GroupCapture`] so the remaining groups still run.
    pub async fn shoot_group(
        &self,
        controller: &mut PipelineController,
        group: &RoiGroup,
        prepared: Result<PreparedCapture, CameraError>,
    ) -> Result<GroupCapture, CameraError> {
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(GroupCapture::failed(group, None, &e)),
        };

        match self.strategy.shoot(controller, prepared).await {
            Ok(shot) => {
                debug!(
                    focus = group.key.focus,
                    exposure = group.key.exposure,
                    image_id = %shot.image.id(),
                    path = ?shot.path,
                    "Group captured"
                );
                Ok(GroupCapture {
                    key: group.key,
                    roi_ids: group.roi_ids(),
                    outcome: Ok(shot.image),
                    path: Some(shot.path),
                    retried: shot.retried,
                })
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(GroupCapture::failed(group, Some(prepared.path), &e)),
        }
    }

    pub async fn capture_group(
        &self,
        controller: &mut PipelineController,
        group: &RoiGroup,
    ) -> Result<GroupCapture, CameraError> {
        let prepared = self.prepare_group(controller, group).await;
        self.shoot_group(controller, group, prepared).await
    }

    /// Capture every group in order, without overlapping remote evaluation
    pub async fn run(
        &self,
        controller: &mut PipelineController,
        rois: &[Roi],
    ) -> Result<Vec<GroupCapture>, CameraError> {
        let groups = self.plan(rois, controller.applied_settings());
        let mut captures = Vec::with_capacity(groups.len());
        for group in &groups {
            captures.push(self.capture_group(controller, group).await?);
        }
        info!(
            groups = captures.len(),
            failed = captures.iter().filter(|c| c.outcome.is_err()).count(),
            "Capture run complete"
        );
        Ok(captures)
    }
}
