//! Inspection request for one capture group

use camera_pipeline::CapturedImage;
use roi_config::Roi;
use serde::Serialize;
use uuid::Uuid;

/// One captured image and the ROIs to evaluate on it
#[derive(Debug, Clone)]
pub struct InspectionRequest {
    pub cycle_id: Uuid,
    pub product: String,
    pub image: CapturedImage,
    pub rois: Vec<Roi>,
}

/// JSON `metadata` part sent next to the image
#[derive(Debug, Serialize)]
pub struct RequestMetadata<'a> {
    pub cycle_id: Uuid,
    pub product: &'a str,
    pub image_id: Uuid,
    pub focus: i32,
    pub exposure: i32,
    pub width: u32,
    pub height: u32,
    pub rois: &'a [Roi],
}

impl InspectionRequest {
    pub fn metadata(&self) -> RequestMetadata<'_> {
        let settings = self.image.settings();
        RequestMetadata {
            cycle_id: self.cycle_id,
            product: &self.product,
            image_id: self.image.id(),
            focus: settings.focus,
            exposure: settings.exposure,
            width: self.image.width(),
            height: self.image.height(),
            rois: &self.rois,
        }
    }

    pub fn roi_ids(&self) -> Vec<u32> {
        self.rois.iter().map(|r| r.roi_id).collect()
    }
}
