//! Full inspection cycles against a fake engine served over HTTP

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use camera_pipeline::{HardwareConfig, PipelineController, PipelineState, SimulatorHandle};
use inspection::{
    BarcodeSource, CycleConfig, DeviceIdentifier, InspectionPlan, InspectionStation,
    ManualBarcodes, StationConfig, StationError,
};
use inspection_engine::{
    EngineConfig, EngineError, HttpBarcodeLinker, HttpInspectionEngine, LinkerConfig,
};
use roi_config::{ProductConfig, ValidationLimits};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

#[derive(Default)]
struct FakeEngine {
    metadata: Mutex<Vec<Value>>,
    links: Mutex<Vec<String>>,
}

async fn inspect(
    State(engine): State<Arc<FakeEngine>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, StatusCode> {
    let mut metadata = None;
    let mut png = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        let name = field.name().unwrap_or_default().to_string();
        let body = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
        match name.as_str() {
            "metadata" => {
                metadata = Some(
                    serde_json::from_slice::<Value>(&body).map_err(|_| StatusCode::BAD_REQUEST)?,
                )
            }
            "image" => png = body.to_vec(),
            _ => {}
        }
    }
    let metadata = metadata.ok_or(StatusCode::BAD_REQUEST)?;
    if !png.starts_with(PNG_SIGNATURE) {
        return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    // v1 schema on purpose; the client must normalize it
    let roi_results: Vec<Value> = metadata["rois"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .map(|roi| {
            let mut result = json!({
                "roi_id": roi["roi_id"],
                "result": "PASS",
                "match_score": 0.95,
            });
            if roi["kind"] == "barcode" {
                result["barcode_values"] = json!(["SN-9"]);
            }
            result
        })
        .collect();
    engine.metadata.lock().unwrap().push(metadata);

    Ok(Json(json!({
        "overall_result": "PASS",
        "passed_devices": 1,
        "failed_devices": 0,
        "total_devices": 1,
        "roi_results": roi_results,
    })))
}

async fn link(State(engine): State<Arc<FakeEngine>>, Json(body): Json<Value>) -> Json<Value> {
    let raw = body["barcode"].as_str().unwrap_or_default().to_string();
    engine.links.lock().unwrap().push(raw.clone());
    Json(json!({ "device_barcode": format!("DEV-{}", raw) }))
}

async fn broken() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded")
}

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn hardware() -> HardwareConfig {
    HardwareConfig {
        width: 16,
        height: 12,
        settle_delay_ms: 10,
        ..HardwareConfig::industrial()
    }
}

fn product() -> ProductConfig {
    ProductConfig::from_value(json!({
        "product_name": "PCB-A",
        "device_count": 2,
        "roi_list": [
            {"roi_id": 1, "device_id": 1, "kind": "compare", "bounds": [0, 0, 8, 6]},
            {"roi_id": 2, "device_id": 1, "kind": "barcode", "bounds": [8, 0, 16, 6]},
            {"roi_id": 3, "device_id": 2, "kind": 3, "bounds": [0, 6, 8, 12],
             "focus": 310, "exposure": 1500, "rotation": 90},
            {"roi_id": 4, "device_id": 2, "kind": "compare", "bounds": [8, 6, 16, 12],
             "enabled": false}
        ]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_full_cycle_over_http() {
    let engine = Arc::new(FakeEngine::default());
    let addr = serve(
        Router::new()
            .route("/api/inspect", post(inspect))
            .route("/link", post(link))
            .with_state(engine.clone()),
    )
    .await;

    let handle = SimulatorHandle::new();
    let client = HttpInspectionEngine::new(EngineConfig {
        base_url: format!("http://{}", addr),
        timeout_ms: 5000,
        ..EngineConfig::default()
    })
    .unwrap();
    let linker = HttpBarcodeLinker::new(LinkerConfig {
        url: format!("http://{}/link", addr),
        timeout_ms: 2000,
    })
    .unwrap();
    let mut station = InspectionStation::new(
        PipelineController::with_opener(hardware(), handle.opener()),
        client,
        Some(linker),
        CycleConfig::default(),
    );
    station.initialize(&hardware()).await.unwrap();

    let plan = InspectionPlan::from_product(
        &product(),
        ValidationLimits::default(),
        ManualBarcodes::new().with_device(2, "SN-MANUAL"),
    );
    let report = station.run_inspection(&plan).await.unwrap();

    assert!(report.passed);
    assert_eq!(handle.capture_count(), 2);

    let metadata = engine.metadata.lock().unwrap().clone();
    assert_eq!(metadata.len(), 2);
    assert_eq!(metadata[0]["focus"], 305);
    assert_eq!(metadata[0]["rois"].as_array().unwrap().len(), 2);
    assert_eq!(metadata[1]["focus"], 310);
    assert_eq!(metadata[1]["rois"][0]["rotation"], 90);

    let first = report.device(1).unwrap();
    assert_eq!(first.barcode_source, BarcodeSource::DeviceIdentifierRoi);
    assert_eq!(
        first.identifier,
        Some(DeviceIdentifier::Linked {
            raw: "SN-9".to_string(),
            linked: "DEV-SN-9".to_string(),
        })
    );
    let second = report.device(2).unwrap();
    assert_eq!(second.barcode_source, BarcodeSource::ManualDevice);
    assert_eq!(second.roi_results.len(), 1);

    let mut links = engine.links.lock().unwrap().clone();
    links.sort();
    assert_eq!(links, vec!["SN-9", "SN-MANUAL"]);

    let serialized = serde_json::to_value(&report).unwrap();
    assert_eq!(serialized["devices"][0]["roi_results"][0]["status"], "passed");

    station.shutdown().await;
    assert!(handle.released());
}

#[tokio::test]
async fn test_engine_http_500_is_an_error() {
    let addr = serve(Router::new().route("/api/inspect", post(broken))).await;

    let config = StationConfig {
        hardware: hardware(),
        engine: EngineConfig {
            base_url: format!("http://{}", addr),
            ..EngineConfig::default()
        },
        ..StationConfig::default()
    };
    let mut station = InspectionStation::from_config(&config).unwrap();
    station.initialize(&config.hardware).await.unwrap();

    let plan = InspectionPlan::from_product(&product(), config.limits.clone(), ManualBarcodes::new());
    let err = station.run_inspection(&plan).await.unwrap_err();

    match err {
        StationError::Engine(EngineError::Status { status, ref body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "model not loaded");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(station.pipeline_state(), PipelineState::Playing);
    station.shutdown().await;
    assert_eq!(station.pipeline_state(), PipelineState::Null);
}
