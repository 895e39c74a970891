//! Industrial camera through a GStreamer source element
//!
//! The configured source (e.g. `aravissrc camera-name=...` or
//! `v4l2src device=/dev/video0`) is named `src` and feeds an `appsink`
//! through a raw RGB caps filter. Focus, exposure and auto-mode properties are
//! written on the source element.

use crate::config::HardwareConfig;
use crate::driver::{CameraDriver, PropertyValue};
use crate::frame::{pack_rows, PixelFormat, RawFrame};
use crate::state::PipelineState;
use crate::CameraError;
use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video::VideoInfo;
use std::time::Duration;
use tracing::{debug, info, warn};

const STATE_CHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// GStreamer-backed camera driver
pub struct GstDriver {
    pipeline: gst::Pipeline,
    source: gst::Element,
    sink: gst_app::AppSink,
    format: PixelFormat,
    sequence: u32,
}

/// Launch line for a configuration
pub fn pipeline_description(config: &HardwareConfig) -> String {
    let source = config
        .source
        .clone()
        .unwrap_or_else(|| format!("v4l2src device={}", config.device));
    let caps_format = match config.format {
        PixelFormat::Gray8 => "GRAY8",
        _ => "RGB",
    };
    format!(
        "{} name=src ! videoconvert ! video/x-raw,format={},width={},height={} ! \
         appsink name=sink max-buffers=1 drop=true sync=false",
        source, caps_format, config.width, config.height
    )
}

impl GstDriver {
    pub fn new(config: &HardwareConfig) -> Result<Self, CameraError> {
        gst::init().map_err(|e| CameraError::Open(format!("GStreamer init failed: {}", e)))?;

        let description = pipeline_description(config);
        info!(pipeline = %description, "Building camera pipeline");

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| CameraError::Open(format!("invalid pipeline: {}", e)))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CameraError::Open("launch line is not a pipeline".to_string()))?;
        let source = pipeline
            .by_name("src")
            .ok_or_else(|| CameraError::Open("source element missing".to_string()))?;
        let sink = pipeline
            .by_name("sink")
            .ok_or_else(|| CameraError::Open("appsink missing".to_string()))?
            .dynamic_cast::<gst_app::AppSink>()
            .map_err(|_| CameraError::Open("sink is not an appsink".to_string()))?;

        let format = match config.format {
            PixelFormat::Gray8 => PixelFormat::Gray8,
            _ => PixelFormat::Rgb24,
        };

        Ok(Self {
            pipeline,
            source,
            sink,
            format,
            sequence: 0,
        })
    }

    fn report_bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(msg) = bus.pop() {
            if let gst::MessageView::Error(err) = msg.view() {
                return Some(err.error().to_string());
            }
        }
        None
    }
}

fn gst_state(state: PipelineState) -> gst::State {
    match state {
        PipelineState::Null => gst::State::Null,
        PipelineState::Ready => gst::State::Ready,
        PipelineState::Paused => gst::State::Paused,
        PipelineState::Playing => gst::State::Playing,
    }
}

/// Convert to a value of the property's own type, or `None` when the
/// encoding does not fit it
fn to_glib_value(pspec: &glib::ParamSpec, value: &PropertyValue) -> Option<glib::Value> {
    let ty = pspec.value_type();
    let converted = match value {
        PropertyValue::Bool(b) if ty == glib::Type::BOOL => b.to_value(),
        PropertyValue::Int(i) if ty == glib::Type::I32 => i32::try_from(*i).ok()?.to_value(),
        PropertyValue::Int(i) if ty == glib::Type::U32 => u32::try_from(*i).ok()?.to_value(),
        PropertyValue::Int(i) if ty == glib::Type::I64 => i.to_value(),
        PropertyValue::Int(i) if ty == glib::Type::U64 => u64::try_from(*i).ok()?.to_value(),
        PropertyValue::Int(i) if ty == glib::Type::F64 => (*i as f64).to_value(),
        PropertyValue::Int(i) if ty.is_a(glib::Type::ENUM) => {
            glib::EnumClass::with_type(ty)?.to_value(i32::try_from(*i).ok()?)?
        }
        PropertyValue::Text(s) if ty == glib::Type::STRING => s.to_value(),
        PropertyValue::Text(s) if ty.is_a(glib::Type::ENUM) => {
            let class = glib::EnumClass::with_type(ty)?;
            class
                .to_value_by_nick(s)
                .or_else(|| class.to_value_by_nick(&s.to_lowercase()))
                .or_else(|| class.to_value_by_name(s))?
        }
        _ => return None,
    };
    pspec.value_is_valid(&converted).then_some(converted)
}

impl CameraDriver for GstDriver {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn transition(&mut self, target: PipelineState) -> Result<(), CameraError> {
        self.pipeline
            .set_state(gst_state(target))
            .map_err(|e| {
                let detail = self.report_bus_error().unwrap_or_else(|| e.to_string());
                CameraError::Driver(format!("cannot enter {}: {}", target, detail))
            })?;

        let (result, current, pending) = self.pipeline.state(gst::ClockTime::from_mseconds(
            STATE_CHANGE_TIMEOUT.as_millis() as u64,
        ));
        debug!(?result, ?current, ?pending, "GStreamer state change");
        if result.is_err() {
            let detail = self
                .report_bus_error()
                .unwrap_or_else(|| format!("stuck in {:?}", current));
            return Err(CameraError::Driver(format!("cannot enter {}: {}", target, detail)));
        }
        Ok(())
    }

    fn has_property(&self, name: &str) -> bool {
        self.source.find_property(name).is_some()
    }

    fn set_property(&mut self, name: &str, value: &PropertyValue) -> Result<(), CameraError> {
        let pspec = self
            .source
            .find_property(name)
            .ok_or_else(|| CameraError::Unsupported(name.to_string()))?;
        if !pspec.flags().contains(glib::ParamFlags::WRITABLE) {
            return Err(CameraError::Unsupported(format!("{} is read-only", name)));
        }
        let converted = to_glib_value(&pspec, value).ok_or_else(|| {
            CameraError::Driver(format!(
                "{} ({}) does not accept {}",
                name,
                pspec.value_type(),
                value
            ))
        })?;
        self.source.set_property_from_value(name, &converted);
        Ok(())
    }

    fn pull_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CameraError> {
        let sample = match self
            .sink
            .try_pull_sample(gst::ClockTime::from_mseconds(timeout.as_millis() as u64))
        {
            Some(sample) => sample,
            None if self.sink.is_eos() => {
                return Err(CameraError::Driver("camera stream ended".to_string()))
            }
            None => return Err(CameraError::Timeout(timeout.as_millis() as u64)),
        };

        let Some(buffer) = sample.buffer() else {
            return Ok(None);
        };
        let caps = sample
            .caps()
            .ok_or_else(|| CameraError::Driver("sample without caps".to_string()))?;
        let info = VideoInfo::from_caps(caps)
            .map_err(|e| CameraError::Driver(format!("unreadable caps: {}", e)))?;
        let map = buffer
            .map_readable()
            .map_err(|e| CameraError::Driver(format!("cannot map buffer: {}", e)))?;

        let bpp = self.format.bytes_per_pixel().unwrap_or(3);
        let row = info.width() as usize * bpp;
        let stride = info.stride()[0].max(0) as usize;
        let src = map.as_slice();
        if stride != 0 && stride < row {
            warn!(stride, row, "Stride narrower than a row");
        }
        let data = pack_rows(src, stride, row, info.height() as usize);

        self.sequence = self.sequence.wrapping_add(1);
        Ok(Some(RawFrame {
            data,
            width: info.width(),
            height: info.height(),
            format: self.format,
            sequence: self.sequence,
        }))
    }
}

impl Drop for GstDriver {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to set pipeline to NULL on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_description_uses_source() {
        let config = HardwareConfig {
            source: Some("aravissrc camera-name=cam0".to_string()),
            width: 640,
            height: 480,
            ..HardwareConfig::industrial()
        };
        let description = pipeline_description(&config);
        assert!(description.starts_with("aravissrc camera-name=cam0 name=src"));
        assert!(description.contains("format=RGB,width=640,height=480"));
        assert!(description.contains("appsink name=sink"));
    }

    #[test]
    fn test_pipeline_description_falls_back_to_device() {
        let config = HardwareConfig {
            device: "/dev/video2".to_string(),
            format: PixelFormat::Gray8,
            ..HardwareConfig::industrial()
        };
        let description = pipeline_description(&config);
        assert!(description.starts_with("v4l2src device=/dev/video2 name=src"));
        assert!(description.contains("format=GRAY8"));
    }
}
