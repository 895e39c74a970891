//! Pipeline controller
//!
//! Owns the one camera of the station. The driver lives in an optional slot
//! together with the state it has reached; "no camera" is an empty slot, so a
//! released handle cannot be used again. Every hardware call is moved onto a
//! blocking worker and raced against the shutdown signal.

use crate::auto_modes::{disable_auto_modes, AutoModeReport};
use crate::config::{BackendKind, CameraSettings, HardwareConfig};
use crate::driver::{open_driver, CameraDriver, DriverOpener, PropertyValue};
use crate::frame::{validate_frame, CapturedImage};
use crate::state::PipelineState;
use crate::CameraError;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Result of [`PipelineController::initialize`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InitStatus {
    /// The pipeline was brought up to `Playing`
    Started { auto_modes: AutoModeReport },
    /// The pipeline was already streaming and was kept; only settings were applied
    Reused,
}

/// Cloneable trigger that cancels in-flight camera work.
///
/// Safe to call from a signal handler task, any number of times.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Driver plus the state it is known to be in
struct LivePipeline {
    driver: Box<dyn CameraDriver>,
    state: PipelineState,
    applied: Option<CameraSettings>,
}

impl LivePipeline {
    fn new(driver: Box<dyn CameraDriver>) -> Self {
        Self {
            driver,
            state: PipelineState::Null,
            applied: None,
        }
    }

    /// Single-step to `target`. On failure the state stays at the last step
    /// the driver accepted.
    fn step_to(&mut self, target: PipelineState) -> Result<(), CameraError> {
        for next in self.state.path_to(target) {
            self.driver.transition(next)?;
            debug!(driver = self.driver.name(), from = %self.state, to = %next, "Pipeline transition");
            self.state = next;
        }
        Ok(())
    }

    fn write_settings(
        &mut self,
        focus_property: &str,
        exposure_property: &str,
        settings: CameraSettings,
    ) -> Result<(), CameraError> {
        // Half-written settings must not count as applied
        self.applied = None;
        self.driver
            .set_property(focus_property, &PropertyValue::Int(settings.focus.into()))?;
        self.driver
            .set_property(exposure_property, &PropertyValue::Int(settings.exposure.into()))?;
        self.applied = Some(settings);
        Ok(())
    }
}

impl Drop for LivePipeline {
    fn drop(&mut self) {
        for next in self.state.path_to(PipelineState::Null) {
            if let Err(e) = self.driver.transition(next) {
                warn!(driver = self.driver.name(), to = %next, "Teardown step failed: {}", e);
            }
            self.state = next;
        }
        debug!(driver = self.driver.name(), "Camera released");
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Controller for the inspection camera pipeline
pub struct PipelineController {
    config: HardwareConfig,
    opener: Arc<dyn DriverOpener>,
    live: Option<LivePipeline>,
    shutdown: Arc<watch::Sender<bool>>,
    reset_count: u64,
}

impl PipelineController {
    /// Controller opening the driver named in `config`
    pub fn new(config: HardwareConfig) -> Self {
        Self::with_opener(config, open_driver)
    }

    /// Controller opening drivers through `opener`
    pub fn with_opener(config: HardwareConfig, opener: impl DriverOpener + 'static) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            config,
            opener: Arc::new(opener),
            live: None,
            shutdown: Arc::new(tx),
            reset_count: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.live
            .as_ref()
            .map(|live| live.state)
            .unwrap_or(PipelineState::Null)
    }

    /// Settings last written successfully, if any
    pub fn applied_settings(&self) -> Option<CameraSettings> {
        self.live.as_ref().and_then(|live| live.applied)
    }

    pub fn backend(&self) -> BackendKind {
        self.config.backend
    }

    pub fn config(&self) -> &HardwareConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    /// Number of times `reset()` has run
    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }

    /// Whether capturing under `settings` requires a write and a settle wait
    pub fn needs_settle(&self, settings: CameraSettings) -> bool {
        self.config.backend == BackendKind::Industrial
            && self.applied_settings() != Some(settings)
    }

    /// Bring the pipeline to `Playing`.
    ///
    /// A pipeline that is already streaming is kept and only gets the default
    /// settings applied. A pipeline stuck below `Playing` goes through
    /// [`reset`](Self::reset); without a pipeline the driver is opened and
    /// walked up from `Null`.
    pub async fn initialize(&mut self, config: &HardwareConfig) -> Result<InitStatus, CameraError> {
        if *self.shutdown.borrow() {
            warn!("Shutdown requested before initialize, not bringing the camera up");
            self.release().await;
            return Err(CameraError::Cancelled);
        }
        self.config = config.clone();
        let defaults = self.config.default_settings();

        let state = self.state();
        if state == PipelineState::Playing {
            info!(backend = ?self.config.backend, "Pipeline already playing, reusing it");
            let skip_settle = !self.needs_settle(defaults);
            self.set_properties(defaults, skip_settle).await?;
            return Ok(InitStatus::Reused);
        }

        let brought_up = if state == PipelineState::Null {
            self.bring_up().await
        } else {
            self.reset().await
        };
        if let Err(e) = brought_up {
            warn!(error = %e, "Pipeline bring-up failed, releasing camera");
            self.release().await;
            return Err(e);
        }

        let auto_properties = match self.config.backend {
            BackendKind::Industrial => self.config.auto_properties.clone(),
            BackendKind::AutoExposure => Vec::new(),
        };
        let auto_modes = self
            .run_blocking(move |live| {
                Ok(disable_auto_modes(live.driver.as_mut(), &auto_properties))
            })
            .await?;

        self.set_properties(defaults, false).await?;

        info!(
            backend = ?self.config.backend,
            focus = defaults.focus,
            exposure = defaults.exposure,
            "Pipeline playing"
        );
        Ok(InitStatus::Started { auto_modes })
    }

    async fn bring_up(&mut self) -> Result<(), CameraError> {
        let opener = self.opener.clone();
        let config = self.config.clone();
        let driver = tokio::task::spawn_blocking(move || opener.open(&config))
            .await
            .map_err(|e| CameraError::Open(format!("camera open task failed: {}", e)))??;
        info!(driver = driver.name(), device = %self.config.device, "Camera opened");

        self.live = Some(LivePipeline::new(driver));
        self.run_blocking(|live| live.step_to(PipelineState::Playing))
            .await
    }

    /// Restart a pipeline that stopped streaming: `Ready`, then `Playing`.
    ///
    /// Refused while already `Playing` or when no pipeline exists.
    pub async fn reset(&mut self) -> Result<(), CameraError> {
        let from = self.state();
        if from == PipelineState::Playing || from == PipelineState::Null {
            return Err(CameraError::InvalidTransition {
                from,
                to: PipelineState::Playing,
            });
        }

        self.reset_count += 1;
        info!(from = %from, "Resetting pipeline");
        self.run_blocking(|live| {
            live.step_to(PipelineState::Ready)?;
            live.step_to(PipelineState::Playing)
        })
        .await
    }

    /// Stop streaming but keep the device open
    pub async fn stop_streaming(&mut self) -> Result<(), CameraError> {
        self.run_blocking(|live| live.step_to(PipelineState::Ready))
            .await
    }

    /// Write focus and exposure, then wait for the optics to settle unless
    /// `skip_settle_delay` is set.
    ///
    /// The auto-exposure backend has no controllable focus or exposure; the
    /// call is a no-op there.
    pub async fn set_properties(
        &mut self,
        settings: CameraSettings,
        skip_settle_delay: bool,
    ) -> Result<(), CameraError> {
        let state = self.state();
        if state == PipelineState::Null {
            return Err(CameraError::PipelineNotReady(state));
        }
        if self.config.backend == BackendKind::AutoExposure {
            debug!("Auto-exposure camera, focus/exposure left to the device");
            return Ok(());
        }

        let focus_property = self.config.focus_property.clone();
        let exposure_property = self.config.exposure_property.clone();
        self.run_blocking(move |live| {
            live.write_settings(&focus_property, &exposure_property, settings)
        })
        .await?;
        debug!(focus = settings.focus, exposure = settings.exposure, "Camera settings written");

        if !skip_settle_delay {
            self.settle().await?;
        }
        Ok(())
    }

    async fn settle(&mut self) -> Result<(), CameraError> {
        let delay = self.config.settle_delay();
        if delay.is_zero() {
            return Ok(());
        }
        let limit = self.config.settle_timeout();
        let mut cancel = self.shutdown.subscribe();

        debug!(delay_ms = delay.as_millis() as u64, "Waiting for camera to settle");
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                warn!("Settle wait cancelled by shutdown");
                self.release().await;
                Err(CameraError::Cancelled)
            }
            waited = tokio::time::timeout(limit, tokio::time::sleep(delay)) => {
                waited.map_err(|_| CameraError::Timeout(limit.as_millis() as u64))
            }
        }
    }

    /// Capture one validated frame. Only succeeds while `Playing`.
    pub async fn capture(&mut self) -> Result<CapturedImage, CameraError> {
        let state = self.state();
        if !state.can_capture() {
            return Err(CameraError::PipelineNotReady(state));
        }

        let timeout = self.config.capture_timeout();
        let fallback = self.config.default_settings();
        let result = self
            .run_blocking(move |live| {
                let settings = live.applied.unwrap_or(fallback);
                let raw = live.driver.pull_frame(timeout)?;
                Ok(validate_frame(raw, settings)?)
            })
            .await;

        match &result {
            Ok(image) => {
                counter!("aoi_captures_total").increment(1);
                debug!(
                    image_id = %image.id(),
                    width = image.width(),
                    height = image.height(),
                    sequence = image.sequence(),
                    "Frame captured"
                );
            }
            Err(e) => {
                counter!("aoi_capture_failures_total").increment(1);
                warn!(error = %e, "Capture failed");
            }
        }
        result
    }

    /// Release the camera. Succeeds in every state, any number of times.
    ///
    /// A pending shutdown request is cleared once the camera is released, so
    /// a later `initialize` can bring it up again.
    pub async fn shutdown(&mut self) {
        if self.live.is_none() {
            debug!("Shutdown with no pipeline");
        } else {
            info!(state = %self.state(), "Shutting down pipeline");
            self.release().await;
        }
        self.shutdown.send_replace(false);
    }

    async fn release(&mut self) {
        if let Some(live) = self.live.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || drop(live)).await {
                warn!("Camera teardown task failed: {}", e);
            }
        }
    }

    /// Run a driver operation on a blocking worker.
    ///
    /// The pipeline is moved into the worker and back. If shutdown is
    /// requested first, the operation is abandoned: the worker drops the
    /// pipeline (releasing the device) when the driver call returns, and the
    /// controller is left in `Null`.
    async fn run_blocking<T, F>(&mut self, op: F) -> Result<T, CameraError>
    where
        T: Send + 'static,
        F: FnOnce(&mut LivePipeline) -> Result<T, CameraError> + Send + 'static,
    {
        if *self.shutdown.borrow() {
            self.release().await;
            return Err(CameraError::Cancelled);
        }
        let mut live = self
            .live
            .take()
            .ok_or(CameraError::PipelineNotReady(PipelineState::Null))?;
        let mut cancel = self.shutdown.subscribe();

        let task = tokio::task::spawn_blocking(move || {
            let result = op(&mut live);
            (live, result)
        });

        tokio::select! {
            joined = task => match joined {
                Ok((live, result)) => {
                    self.live = Some(live);
                    result
                }
                Err(e) => Err(CameraError::Driver(format!("camera worker failed: {}", e))),
            },
            _ = cancelled(&mut cancel) => {
                warn!("Camera operation abandoned on shutdown");
                Err(CameraError::Cancelled)
            }
        }
    }
}
