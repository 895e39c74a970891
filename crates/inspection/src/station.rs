//! Inspection session
//!
//! `initialize` brings the camera up, `run_inspection` runs one full cycle
//! and `shutdown` releases the camera. Within a cycle the remote evaluation
//! of group *i* runs while the camera settles for group *i + 1*; it is always
//! awaited before group *i + 1* is captured.

use crate::aggregator::{DeviceAggregator, DeviceIdentifier, DeviceResult, ManualBarcodes, RoiResult};
use crate::config::{CycleConfig, StationConfig};
use crate::orchestrator::{CaptureOrchestrator, GroupCapture, RoiGroup};
use crate::StationError;
use camera_pipeline::{
    CameraError, CapturePath, HardwareConfig, InitStatus, PipelineController, PipelineState,
    ShutdownHandle,
};
use chrono::{DateTime, Utc};
use inspection_engine::{
    BarcodeLinker, EngineError, HttpBarcodeLinker, HttpInspectionEngine, InspectionEngine,
    InspectionRequest, LinkError,
};
use metrics::counter;
use roi_config::{ProductConfig, Roi, ValidationLimits};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Normalization problem carried into the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoiIssue {
    /// `None` when the record was rejected before its id was known
    pub roi_id: Option<u32>,
    pub message: String,
}

/// Normalized input for one inspection cycle
#[derive(Debug, Clone)]
pub struct InspectionPlan {
    pub product: String,
    pub device_count: u32,
    pub rois: Vec<Roi>,
    pub manual: ManualBarcodes,
    pub issues: Vec<RoiIssue>,
}

impl InspectionPlan {
    pub fn new(product: impl Into<String>, device_count: u32, rois: Vec<Roi>) -> Self {
        Self {
            product: product.into(),
            device_count,
            rois,
            manual: ManualBarcodes::default(),
            issues: Vec::new(),
        }
    }

    pub fn with_manual(mut self, manual: ManualBarcodes) -> Self {
        self.manual = manual;
        self
    }

    /// Normalize a product's ROI records.
    ///
    /// Rejected records and validation warnings become issues; warned ROIs
    /// are still inspected.
    pub fn from_product(
        product: &ProductConfig,
        limits: ValidationLimits,
        manual: ManualBarcodes,
    ) -> Self {
        let report = product.normalize_with(limits);
        let mut issues: Vec<RoiIssue> = report
            .rejected
            .iter()
            .map(|e| RoiIssue {
                roi_id: None,
                message: e.to_string(),
            })
            .collect();
        issues.extend(report.warnings.iter().map(|(roi_id, warning)| RoiIssue {
            roi_id: Some(*roi_id),
            message: warning.to_string(),
        }));

        Self {
            product: product.name.clone(),
            device_count: product.device_count,
            rois: report.rois,
            manual,
            issues,
        }
    }
}

/// What happened to one capture group
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub focus: i32,
    pub exposure: i32,
    pub roi_ids: Vec<u32>,
    pub image_id: Option<Uuid>,
    pub path: Option<CapturePath>,
    pub retried: bool,
    pub error: Option<String>,
    /// Overall verdict the engine gave for this group
    pub engine_passed: Option<bool>,
}

impl From<&GroupCapture> for GroupSummary {
    fn from(capture: &GroupCapture) -> Self {
        Self {
            focus: capture.key.focus,
            exposure: capture.key.exposure,
            roi_ids: capture.roi_ids.clone(),
            image_id: capture.image().map(|i| i.id()),
            path: capture.path,
            retried: capture.retried,
            error: capture.outcome.as_ref().err().map(|e| e.reason.clone()),
            engine_passed: None,
        }
    }
}

/// Externally visible result of one inspection cycle
#[derive(Debug, Clone, Serialize)]
pub struct InspectionReport {
    pub cycle_id: Uuid,
    pub product: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub passed: bool,
    pub devices: Vec<DeviceResult>,
    pub groups: Vec<GroupSummary>,
    pub roi_issues: Vec<RoiIssue>,
}

impl InspectionReport {
    pub fn device(&self, device_id: u32) -> Option<&DeviceResult> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }
}

/// Per-ROI results and summary of one evaluated group
type Evaluated = (Vec<RoiResult>, GroupSummary);

/// Camera, engine and linker for one station
pub struct InspectionStation<E = HttpInspectionEngine, L = HttpBarcodeLinker> {
    controller: PipelineController,
    orchestrator: CaptureOrchestrator,
    engine: E,
    linker: Option<L>,
    cycle: CycleConfig,
}

impl InspectionStation<HttpInspectionEngine, HttpBarcodeLinker> {
    /// Station reaching the engine and linker over HTTP
    pub fn from_config(config: &StationConfig) -> Result<Self, StationError> {
        let controller = PipelineController::new(config.hardware.clone());
        let engine = HttpInspectionEngine::new(config.engine.clone())?;
        let linker = config
            .linker
            .clone()
            .map(HttpBarcodeLinker::new)
            .transpose()?;
        Ok(Self::new(controller, engine, linker, config.cycle.clone()))
    }
}

impl<E: InspectionEngine, L: BarcodeLinker> InspectionStation<E, L> {
    pub fn new(
        controller: PipelineController,
        engine: E,
        linker: Option<L>,
        cycle: CycleConfig,
    ) -> Self {
        Self {
            controller,
            orchestrator: CaptureOrchestrator::default(),
            engine,
            linker,
            cycle,
        }
    }

    pub fn controller(&self) -> &PipelineController {
        &self.controller
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.controller.state()
    }

    /// Handle that aborts in-flight camera work from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.controller.shutdown_handle()
    }

    pub async fn initialize(&mut self, hardware: &HardwareConfig) -> Result<InitStatus, StationError> {
        Ok(self.controller.initialize(hardware).await?)
    }

    pub async fn shutdown(&mut self) {
        self.controller.shutdown().await;
    }

    /// Run one inspection cycle.
    ///
    /// Camera faults confined to one group are reported per ROI. A pipeline
    /// that is not playing, a shutdown request, or any engine failure aborts
    /// the cycle with `Err`.
    pub async fn run_inspection(
        &mut self,
        plan: &InspectionPlan,
    ) -> Result<InspectionReport, StationError> {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let state = self.controller.state();
        if !state.can_capture() {
            counter!("aoi_inspection_cycles_total", "result" => "error").increment(1);
            return Err(CameraError::PipelineNotReady(state).into());
        }

        let groups = self
            .orchestrator
            .plan(&plan.rois, self.controller.applied_settings());
        info!(
            %cycle_id,
            product = %plan.product,
            rois = plan.rois.len(),
            groups = groups.len(),
            "Inspection started"
        );

        let outcome = self.capture_and_evaluate(cycle_id, &plan.product, &groups).await;
        let (results, summaries) = match outcome {
            Ok(evaluated) => evaluated,
            Err(e) => {
                counter!("aoi_inspection_cycles_total", "result" => "error").increment(1);
                warn!(%cycle_id, error = %e, "Inspection aborted");
                return Err(e);
            }
        };

        let mut devices = DeviceAggregator::new(plan.device_count).aggregate(results, &plan.manual);
        self.link_barcodes(&mut devices).await;

        let passed = devices.iter().all(|d| d.passed);
        let result = if passed { "pass" } else { "fail" };
        counter!("aoi_inspection_cycles_total", "result" => result).increment(1);
        info!(
            %cycle_id,
            passed,
            devices = devices.len(),
            failed_devices = devices.iter().filter(|d| !d.passed).count(),
            "Inspection finished"
        );

        Ok(InspectionReport {
            cycle_id,
            product: plan.product.clone(),
            started_at,
            finished_at: Utc::now(),
            passed,
            devices,
            groups: summaries,
            roi_issues: plan.issues.clone(),
        })
    }

    async fn capture_and_evaluate(
        &mut self,
        cycle_id: Uuid,
        product: &str,
        groups: &[RoiGroup],
    ) -> Result<(Vec<RoiResult>, Vec<GroupSummary>), StationError> {
        let timeout = self.cycle.engine_timeout();
        let mut results = Vec::new();
        let mut summaries = Vec::with_capacity(groups.len());
        let mut pending: Option<(&RoiGroup, GroupCapture)> = None;

        for group in groups {
            let (prepared, evaluated) = tokio::join!(
                self.orchestrator.prepare_group(&mut self.controller, group),
                evaluate(&self.engine, timeout, cycle_id, product, pending.take()),
            );
            if let Some((group_results, summary)) = evaluated? {
                results.extend(group_results);
                summaries.push(summary);
            }

            let capture = self
                .orchestrator
                .shoot_group(&mut self.controller, group, prepared)
                .await?;
            pending = Some((group, capture));
        }

        if let Some((group_results, summary)) =
            evaluate(&self.engine, timeout, cycle_id, product, pending.take()).await?
        {
            results.extend(group_results);
            summaries.push(summary);
        }
        Ok((results, summaries))
    }

    /// Link each distinct barcode once. Failures fall back to the raw value.
    async fn link_barcodes(&self, devices: &mut [DeviceResult]) {
        let Some(linker) = &self.linker else {
            return;
        };
        let timeout = self.cycle.link_timeout();
        let mut resolved: HashMap<String, DeviceIdentifier> = HashMap::new();

        for device in devices.iter_mut() {
            let Some(raw) = device.barcode.clone() else {
                continue;
            };
            if !resolved.contains_key(&raw) {
                let identifier = match tokio::time::timeout(timeout, linker.link(&raw)).await {
                    Ok(Ok(linked)) => DeviceIdentifier::Linked {
                        raw: raw.clone(),
                        linked,
                    },
                    Ok(Err(e)) => unlinked(&raw, e),
                    Err(_) => unlinked(&raw, LinkError::Timeout(timeout.as_millis() as u64)),
                };
                resolved.insert(raw.clone(), identifier);
            }
            device.identifier = resolved.get(&raw).cloned();
        }
    }
}

fn unlinked(raw: &str, error: LinkError) -> DeviceIdentifier {
    warn!(raw, error = %error, "Barcode linking failed, using raw value");
    DeviceIdentifier::Unlinked {
        raw: raw.to_string(),
        error: error.to_string(),
    }
}

/// Evaluate a captured group remotely. Failed captures are not sent.
async fn evaluate<E: InspectionEngine>(
    engine: &E,
    timeout: Duration,
    cycle_id: Uuid,
    product: &str,
    pending: Option<(&RoiGroup, GroupCapture)>,
) -> Result<Option<Evaluated>, StationError> {
    let Some((group, capture)) = pending else {
        return Ok(None);
    };
    let mut summary = GroupSummary::from(&capture);

    let image = match capture.outcome {
        Ok(image) => image,
        Err(failed) => {
            let results = group
                .rois
                .iter()
                .map(|roi| RoiResult::no_image(roi, failed.reason.as_str()))
                .collect();
            return Ok(Some((results, summary)));
        }
    };

    let request = InspectionRequest {
        cycle_id,
        product: product.to_string(),
        image,
        rois: group.rois.clone(),
    };
    let verdict = match tokio::time::timeout(timeout, engine.inspect(&request)).await {
        Ok(verdict) => verdict?,
        Err(_) => return Err(EngineError::Timeout(timeout.as_millis() as u64).into()),
    };
    debug!(
        image_id = %request.image.id(),
        passed = verdict.overall_passed,
        results = verdict.roi_results.len(),
        "Group evaluated"
    );

    let missing: Vec<u32> = request
        .roi_ids()
        .into_iter()
        .filter(|id| verdict.result_for(*id).is_none())
        .collect();
    if !missing.is_empty() {
        warn!(?missing, "Engine returned no result for some ROIs");
    }

    summary.engine_passed = Some(verdict.overall_passed);
    let image_id = request.image.id();
    let results = group
        .rois
        .iter()
        .map(|roi| RoiResult::from_verdict(roi, verdict.result_for(roi.roi_id), image_id))
        .collect();
    Ok(Some((results, summary)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{BarcodeSource, RoiStatus};
    use async_trait::async_trait;
    use camera_pipeline::{SimulatedFault, SimulatorHandle};
    use inspection_engine::{EngineSummary, EngineVerdict, RoiVerdict, SchemaVersion};
    use roi_config::{Bounds, RoiKind};
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct FakeEngine {
        failing: Vec<u32>,
        decoded: HashMap<u32, String>,
        requests: Mutex<Vec<(Vec<u32>, Uuid)>>,
    }

    impl FakeEngine {
        fn requests(&self) -> Vec<(Vec<u32>, Uuid)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InspectionEngine for FakeEngine {
        async fn inspect(&self, request: &InspectionRequest) -> Result<EngineVerdict, EngineError> {
            self.requests
                .lock()
                .unwrap()
                .push((request.roi_ids(), request.image.id()));
            let roi_results: Vec<RoiVerdict> = request
                .rois
                .iter()
                .map(|roi| RoiVerdict {
                    roi_id: roi.roi_id,
                    passed: !self.failing.contains(&roi.roi_id),
                    similarity: Some(0.9),
                    decoded_value: self.decoded.get(&roi.roi_id).cloned(),
                    error: None,
                })
                .collect();
            Ok(EngineVerdict {
                schema: SchemaVersion::V2,
                overall_passed: roi_results.iter().all(|r| r.passed),
                roi_results,
                summary: EngineSummary::default(),
            })
        }
    }

    struct BrokenEngine;

    #[async_trait]
    impl InspectionEngine for BrokenEngine {
        async fn inspect(&self, _request: &InspectionRequest) -> Result<EngineVerdict, EngineError> {
            Err(EngineError::Status {
                status: 500,
                body: "model not loaded".to_string(),
            })
        }
    }

    /// Links `SN-*` barcodes, fails on everything else
    struct FakeLinker {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BarcodeLinker for FakeLinker {
        async fn link(&self, raw: &str) -> Result<String, LinkError> {
            self.calls.lock().unwrap().push(raw.to_string());
            if raw.starts_with("SN-") {
                Ok(format!("DEV-{}", raw))
            } else {
                Err(LinkError::Unavailable("connection refused".to_string()))
            }
        }
    }

    /// One engine call as seen from the camera side
    #[derive(Debug, Clone, Copy)]
    struct Call {
        entered: Instant,
        left: Instant,
        captures_on_enter: usize,
        captures_on_leave: usize,
    }

    /// Takes a second per group and records what the camera did meanwhile
    struct SlowEngine {
        camera: SimulatorHandle,
        calls: Mutex<Vec<Call>>,
    }

    #[async_trait]
    impl InspectionEngine for SlowEngine {
        async fn inspect(&self, request: &InspectionRequest) -> Result<EngineVerdict, EngineError> {
            let entered = Instant::now();
            let captures_on_enter = self.camera.capture_count();
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.calls.lock().unwrap().push(Call {
                entered,
                left: Instant::now(),
                captures_on_enter,
                captures_on_leave: self.camera.capture_count(),
            });
            Ok(EngineVerdict {
                schema: SchemaVersion::V2,
                overall_passed: true,
                roi_results: request
                    .rois
                    .iter()
                    .map(|roi| RoiVerdict {
                        roi_id: roi.roi_id,
                        passed: true,
                        similarity: None,
                        decoded_value: None,
                        error: None,
                    })
                    .collect(),
                summary: EngineSummary::default(),
            })
        }
    }

    fn config() -> HardwareConfig {
        HardwareConfig {
            width: 8,
            height: 6,
            ..HardwareConfig::industrial()
        }
    }

    fn roi(roi_id: u32, device_id: u32, kind: RoiKind, settings: (i32, i32)) -> Roi {
        Roi {
            roi_id,
            kind,
            device_id,
            bounds: Bounds::new(0, 0, 4, 4),
            ai_threshold: 0.8,
            focus: settings.0,
            exposure: settings.1,
            enabled: true,
            rotation: 0,
            is_device_identifier: false,
            feature_method: "opencv".to_string(),
            expected_text: None,
            expected_pattern: None,
        }
    }

    fn plan() -> InspectionPlan {
        let rois = vec![
            roi(1, 1, RoiKind::Compare, (305, 1200)),
            Roi {
                is_device_identifier: true,
                ..roi(2, 1, RoiKind::Barcode, (305, 1200))
            },
            roi(3, 2, RoiKind::Compare, (310, 1500)),
            roi(4, 2, RoiKind::Ocr, (310, 1500)),
        ];
        InspectionPlan::new("PCB-A", 2, rois).with_manual(ManualBarcodes::new().with_global("LOT-7"))
    }

    async fn station<E: InspectionEngine>(
        engine: E,
    ) -> (InspectionStation<E, FakeLinker>, SimulatorHandle) {
        let handle = SimulatorHandle::new();
        let controller = PipelineController::with_opener(config(), handle.opener());
        let linker = FakeLinker {
            calls: Mutex::new(Vec::new()),
        };
        let mut station = InspectionStation::new(controller, engine, Some(linker), CycleConfig::default());
        station.initialize(&config()).await.unwrap();
        (station, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle() {
        let engine = FakeEngine {
            failing: vec![3],
            decoded: HashMap::from([(2, "SN-1".to_string())]),
            ..FakeEngine::default()
        };
        let (mut station, handle) = station(engine).await;

        let report = station.run_inspection(&plan()).await.unwrap();

        assert!(!report.passed);
        assert_eq!(handle.capture_count(), 2);
        assert_eq!(report.groups.len(), 2);

        let requests = station.engine.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].0, vec![1, 2]);
        assert_eq!(requests[1].0, vec![3, 4]);
        assert_eq!(report.groups[0].image_id, Some(requests[0].1));

        let first = report.device(1).unwrap();
        assert!(first.passed);
        assert_eq!(first.barcode_source, BarcodeSource::DeviceIdentifierRoi);
        assert_eq!(
            first.identifier,
            Some(DeviceIdentifier::Linked {
                raw: "SN-1".to_string(),
                linked: "DEV-SN-1".to_string(),
            })
        );

        let second = report.device(2).unwrap();
        assert!(!second.passed);
        assert_eq!(second.barcode_source, BarcodeSource::ManualGlobal);
        let identifier = second.identifier.as_ref().unwrap();
        assert!(!identifier.is_linked());
        assert_eq!(identifier.value(), "LOT-7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluation_overlaps_settle_of_next_group() {
        let handle = SimulatorHandle::new();
        let engine = SlowEngine {
            camera: handle.clone(),
            calls: Mutex::new(Vec::new()),
        };
        let controller = PipelineController::with_opener(config(), handle.opener());
        let mut station: InspectionStation<SlowEngine, FakeLinker> =
            InspectionStation::new(controller, engine, None, CycleConfig::default());
        station.initialize(&config()).await.unwrap();
        let settle = Duration::from_millis(config().settle_delay_ms);

        let started = Instant::now();
        let report = station.run_inspection(&plan()).await.unwrap();
        let elapsed = started.elapsed();

        assert!(report.passed);
        assert_eq!(report.groups[0].path, Some(CapturePath::Fast));
        assert_eq!(report.groups[1].path, Some(CapturePath::Settled));

        let calls = station.engine.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        // first group is evaluated while the second one settles
        assert!(calls[0].entered < started + settle);
        assert!(calls[0].left <= started + settle);
        assert!(calls[1].entered >= started + settle);
        // serialized would be 1s + settle + 1s
        assert!(elapsed >= settle + Duration::from_secs(1));
        assert!(elapsed < settle + Duration::from_secs(2));

        // the camera never fires while a request is in flight
        assert_eq!(calls[0].captures_on_enter, 1);
        assert_eq!(calls[0].captures_on_leave, 1);
        assert_eq!(calls[1].captures_on_enter, 2);
        assert_eq!(calls[1].captures_on_leave, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_barcode_linked_once() {
        let (mut station, _handle) = station(FakeEngine::default()).await;
        let rois = vec![
            roi(1, 1, RoiKind::Compare, (305, 1200)),
            roi(2, 2, RoiKind::Compare, (305, 1200)),
            roi(3, 3, RoiKind::Compare, (305, 1200)),
        ];
        let plan = InspectionPlan::new("PCB-A", 3, rois)
            .with_manual(ManualBarcodes::new().with_global("SN-PANEL"));

        let report = station.run_inspection(&plan).await.unwrap();

        assert!(report.passed);
        assert_eq!(station.linker.as_ref().unwrap().calls.lock().unwrap().len(), 1);
        assert!(report
            .devices
            .iter()
            .all(|d| d.identifier.as_ref().map(DeviceIdentifier::value) == Some("DEV-SN-PANEL")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_group_is_not_sent_to_engine() {
        let (mut station, handle) = station(FakeEngine::default()).await;
        handle.inject(SimulatedFault::NullBuffer);
        handle.inject(SimulatedFault::ZeroSize);

        let report = station.run_inspection(&plan()).await.unwrap();

        assert_eq!(station.engine.requests().len(), 1);
        assert!(report.groups[0].error.is_some());
        assert!(report.groups[0].retried);
        let first = report.device(1).unwrap();
        assert!(!first.passed);
        assert!(matches!(first.roi_results[0].status, RoiStatus::NoImage { .. }));
        assert!(report.device(2).unwrap().passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_error_aborts_cycle() {
        let (mut station, _handle) = station(BrokenEngine).await;

        let err = station.run_inspection(&plan()).await.unwrap_err();

        assert!(matches!(
            err,
            StationError::Engine(EngineError::Status { status: 500, .. })
        ));
        assert_eq!(err.code(), "engine_error");
    }

    #[tokio::test]
    async fn test_inspection_requires_initialize() {
        let controller =
            PipelineController::with_opener(config(), SimulatorHandle::new().opener());
        let mut station: InspectionStation<FakeEngine, FakeLinker> =
            InspectionStation::new(controller, FakeEngine::default(), None, CycleConfig::default());

        let err = station.run_inspection(&plan()).await.unwrap_err();
        assert_eq!(err.code(), "pipeline_not_ready");

        station.shutdown().await;
        station.shutdown().await;
        assert_eq!(station.pipeline_state(), PipelineState::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_between_cycles() {
        let (mut station, handle) = station(FakeEngine::default()).await;
        station.run_inspection(&plan()).await.unwrap();

        station.shutdown().await;
        assert!(handle.released());
        let err = station.run_inspection(&plan()).await.unwrap_err();
        assert_eq!(err.code(), "pipeline_not_ready");
    }

    #[test]
    fn test_plan_from_product_keeps_issues() {
        let product = ProductConfig::from_value(json!({
            "name": "PCB-B",
            "device_count": 2,
            "rois": [
                [1, 1, [0, 0, 10, 10], 305, 1200, 0.8, "opencv", 0, 2],
                [2, 1, [100, 100, 50, 50], 305, 1200, 0.8, "opencv", 0, 2],
                "not an roi"
            ]
        }))
        .unwrap();

        let plan = InspectionPlan::from_product(&product, ValidationLimits::default(), ManualBarcodes::new());

        assert_eq!(plan.product, "PCB-B");
        assert_eq!(plan.device_count, 2);
        assert_eq!(plan.rois.len(), 2);
        assert!(plan.issues.iter().any(|i| i.roi_id.is_none()));
        assert!(plan
            .issues
            .iter()
            .any(|i| i.roi_id == Some(2) && i.message.contains("bounds")));
    }
}
