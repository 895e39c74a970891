//! AOI Station Runner
//!
//! Loads the station and product configuration, runs one inspection cycle
//! and releases the camera. Ctrl-C aborts in-flight camera work.

use anyhow::{Context, Result};
use camera_pipeline::{HardwareConfig, PixelFormat};
use clap::Parser;
use inspection::{
    InspectionPlan, InspectionReport, InspectionStation, ManualBarcodes, StationConfig,
    StationError,
};
use roi_config::{CameraDefaults, ProductConfig};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Command-line options
#[derive(Debug, Parser)]
#[command(name = "aoi-station", version, about = "Run one AOI inspection cycle")]
pub struct Cli {
    /// Station configuration file (TOML, JSON or YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Product configuration (JSON)
    #[arg(short, long)]
    pub product: PathBuf,

    /// Barcode applied to every device without a better source
    #[arg(long)]
    pub barcode: Option<String>,

    /// Barcode for one device, as `<device_id>=<barcode>`
    #[arg(long = "device-barcode", value_parser = parse_device_barcode)]
    pub device_barcodes: Vec<(u32, String)>,

    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    pub fn manual_barcodes(&self) -> ManualBarcodes {
        ManualBarcodes {
            per_device: self.device_barcodes.iter().cloned().collect(),
            global: self.barcode.clone(),
        }
    }
}

fn parse_device_barcode(arg: &str) -> Result<(u32, String), String> {
    let (device, barcode) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected <device_id>=<barcode>, got '{}'", arg))?;
    let device: u32 = device
        .trim()
        .parse()
        .map_err(|_| format!("invalid device id '{}'", device))?;
    if device == 0 {
        return Err("device ids start at 1".to_string());
    }
    Ok((device, barcode.trim().to_string()))
}

/// Initialize logging. `RUST_LOG` overrides the default `info` level.
pub fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Apply a product's camera defaults to the station hardware
fn apply_camera_defaults(hardware: &mut HardwareConfig, camera: &CameraDefaults) {
    hardware.default_focus = camera.focus;
    hardware.default_exposure = camera.exposure;
    if let Some(width) = camera.width {
        hardware.width = width;
    }
    if let Some(height) = camera.height {
        hardware.height = height;
    }
    if let Some(name) = &camera.format {
        match serde_json::from_value::<PixelFormat>(serde_json::Value::String(name.to_lowercase())) {
            Ok(format) => hardware.format = format,
            Err(_) => warn!(format = %name, "Unknown pixel format in product, keeping station format"),
        }
    }
}

/// Initialize, inspect once, shut down
pub async fn run(cli: &Cli) -> Result<InspectionReport> {
    let mut config =
        StationConfig::load(cli.config.as_deref()).context("loading station configuration")?;
    let product = ProductConfig::load(&cli.product)
        .with_context(|| format!("loading product {}", cli.product.display()))?;
    apply_camera_defaults(&mut config.hardware, &product.camera);

    let plan = InspectionPlan::from_product(&product, config.limits.clone(), cli.manual_barcodes());
    for issue in &plan.issues {
        warn!(roi_id = ?issue.roi_id, "{}", issue.message);
    }
    info!(
        product = %plan.product,
        devices = plan.device_count,
        rois = plan.rois.len(),
        "Inspection plan ready"
    );

    let mut station = InspectionStation::from_config(&config)?;
    let shutdown = station.shutdown_handle();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting camera work");
            shutdown.request();
        }
    });

    let outcome: Result<InspectionReport, StationError> = async {
        let status = station.initialize(&config.hardware).await?;
        info!(?status, "Camera ready");
        station.run_inspection(&plan).await
    }
    .await;

    station.shutdown().await;
    signal.abort();

    outcome.map_err(|e| {
        let code = e.code();
        anyhow::Error::new(e).context(format!("inspection failed ({})", code))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_barcode_argument() {
        assert_eq!(parse_device_barcode("2=SN-0042"), Ok((2, "SN-0042".to_string())));
        assert_eq!(parse_device_barcode(" 3 = LOT 7 "), Ok((3, "LOT 7".to_string())));
        assert!(parse_device_barcode("SN-0042").is_err());
        assert!(parse_device_barcode("x=SN").is_err());
        assert!(parse_device_barcode("0=SN").is_err());
    }

    #[test]
    fn test_cli_collects_manual_barcodes() {
        let cli = Cli::try_parse_from([
            "aoi-station",
            "--product",
            "pcb.json",
            "--barcode",
            "LOT-7",
            "--device-barcode",
            "1=SN-1",
            "--device-barcode",
            "2=SN-2",
        ])
        .unwrap();

        let manual = cli.manual_barcodes();
        assert_eq!(manual.global.as_deref(), Some("LOT-7"));
        assert_eq!(manual.per_device.get(&2).map(String::as_str), Some("SN-2"));
        assert_eq!(manual.per_device.len(), 2);
        assert!(!cli.log_json);
    }

    #[test]
    fn test_product_camera_overrides() {
        let mut hardware = HardwareConfig::industrial();
        let camera = CameraDefaults {
            focus: 280,
            exposure: 900,
            width: Some(1280),
            height: None,
            format: Some("GRAY8".to_string()),
        };
        apply_camera_defaults(&mut hardware, &camera);

        assert_eq!(hardware.default_settings().focus, 280);
        assert_eq!(hardware.default_exposure, 900);
        assert_eq!(hardware.width, 1280);
        assert_eq!(hardware.height, 1080);
        assert_eq!(hardware.format, PixelFormat::Gray8);
    }

    #[tokio::test]
    async fn test_missing_product_is_reported() {
        let cli = Cli::try_parse_from(["aoi-station", "--product", "/nonexistent/product.json"])
            .unwrap();
        let err = run(&cli).await.unwrap_err();
        assert!(format!("{:#}", err).contains("loading product"));
    }
}
