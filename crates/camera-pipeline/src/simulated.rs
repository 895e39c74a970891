//! Simulated camera for dry runs and tests
//!
//! Produces deterministic gradient frames and can be told to reproduce the
//! hardware failure signatures seen in the field (null buffers, empty
//! buffers, truncated frames, stalls, failing state changes). Every driver
//! call is written to a journal shared through [`SimulatorHandle`], so the
//! journal stays readable after the driver has been moved into a
//! controller.

use crate::config::HardwareConfig;
use crate::driver::{CameraDriver, DriverOpener, PropertyValue};
use crate::frame::{PixelFormat, RawFrame};
use crate::state::PipelineState;
use crate::CameraError;
use std::collections::{HashMap, VecDeque};
use std::mem::discriminant;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Journal entry for one driver call
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    Opened,
    Transition(PipelineState),
    Property(String, PropertyValue),
    Capture,
    Released,
}

/// Fault to inject into the next capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFault {
    NullBuffer,
    ZeroSize,
    Truncated,
    /// Block for this long before returning a good frame
    Stall(Duration),
    DriverError,
}

#[derive(Default)]
struct SimState {
    events: Vec<DriverEvent>,
    capture_faults: VecDeque<SimulatedFault>,
    failing_transitions: Vec<PipelineState>,
    extra_properties: Vec<(String, PropertyValue)>,
}

/// Shared view into a simulated camera
#[derive(Clone, Default)]
pub struct SimulatorHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatorHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a fault for an upcoming capture
    pub fn inject(&self, fault: SimulatedFault) {
        self.lock().capture_faults.push_back(fault);
    }

    /// Make the next transition into `state` fail once
    pub fn fail_transition(&self, state: PipelineState) {
        self.lock().failing_transitions.push(state);
    }

    /// Expose an extra property on drivers opened after this call
    pub fn add_property(&self, name: &str, initial: PropertyValue) {
        self.lock().extra_properties.push((name.to_string(), initial));
    }

    pub fn events(&self) -> Vec<DriverEvent> {
        self.lock().events.clone()
    }

    pub fn transitions(&self) -> Vec<PipelineState> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                DriverEvent::Transition(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    pub fn property_writes(&self) -> Vec<(String, PropertyValue)> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                DriverEvent::Property(n, v) => Some((n.clone(), v.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn capture_count(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, DriverEvent::Capture))
            .count()
    }

    pub fn released(&self) -> bool {
        self.lock().events.contains(&DriverEvent::Released)
    }

    /// Opener that builds simulated drivers attached to this handle
    pub fn opener(&self) -> impl DriverOpener + 'static {
        let handle = self.clone();
        move |config: &HardwareConfig| -> Result<Box<dyn CameraDriver>, CameraError> {
            Ok(Box::new(SimulatedDriver::with_handle(config, handle.clone())))
        }
    }

    fn record(&self, event: DriverEvent) {
        self.lock().events.push(event);
    }
}

/// Simulated camera driver
pub struct SimulatedDriver {
    handle: SimulatorHandle,
    width: u32,
    height: u32,
    properties: HashMap<String, PropertyValue>,
    sequence: u32,
}

impl SimulatedDriver {
    pub fn new(config: &HardwareConfig) -> Self {
        Self::with_handle(config, SimulatorHandle::new())
    }

    pub fn with_handle(config: &HardwareConfig, handle: SimulatorHandle) -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            config.focus_property.clone(),
            PropertyValue::Int(config.default_focus.into()),
        );
        properties.insert(
            config.exposure_property.clone(),
            PropertyValue::Int(config.default_exposure.into()),
        );
        // Auto modes as different SDKs encode them
        properties.insert("Exposure Auto".to_string(), PropertyValue::Bool(true));
        properties.insert("Gain Auto".to_string(), PropertyValue::Text("Continuous".into()));
        properties.insert("Whitebalance Auto".to_string(), PropertyValue::Int(1));
        for (name, value) in handle.lock().extra_properties.iter() {
            properties.insert(name.clone(), value.clone());
        }

        handle.record(DriverEvent::Opened);
        debug!(width = config.width, height = config.height, "Simulated camera opened");

        Self {
            handle,
            width: config.width,
            height: config.height,
            properties,
            sequence: 0,
        }
    }

    pub fn handle(&self) -> SimulatorHandle {
        self.handle.clone()
    }

    fn gradient(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push((x % 256) as u8);
                data.push((y % 256) as u8);
                data.push((self.sequence % 256) as u8);
            }
        }
        data
    }
}

impl CameraDriver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    fn transition(&mut self, target: PipelineState) -> Result<(), CameraError> {
        {
            let mut state = self.handle.lock();
            if let Some(pos) = state.failing_transitions.iter().position(|s| *s == target) {
                state.failing_transitions.remove(pos);
                return Err(CameraError::Driver(format!(
                    "simulated failure entering {}",
                    target
                )));
            }
        }
        self.handle.record(DriverEvent::Transition(target));
        Ok(())
    }

    fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    fn set_property(&mut self, name: &str, value: &PropertyValue) -> Result<(), CameraError> {
        let current = self
            .properties
            .get_mut(name)
            .ok_or_else(|| CameraError::Unsupported(name.to_string()))?;
        if discriminant(current) != discriminant(value) {
            return Err(CameraError::Driver(format!(
                "{} does not accept {}",
                name, value
            )));
        }
        *current = value.clone();
        self.handle
            .record(DriverEvent::Property(name.to_string(), value.clone()));
        Ok(())
    }

    fn pull_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CameraError> {
        self.handle.record(DriverEvent::Capture);
        self.sequence = self.sequence.wrapping_add(1);

        let fault = self.handle.lock().capture_faults.pop_front();
        let mut data = self.gradient();
        match fault {
            Some(SimulatedFault::NullBuffer) => return Ok(None),
            Some(SimulatedFault::ZeroSize) => data.clear(),
            Some(SimulatedFault::Truncated) => data.truncate(data.len() / 2),
            Some(SimulatedFault::DriverError) => {
                return Err(CameraError::Driver("simulated streaming error".to_string()))
            }
            Some(SimulatedFault::Stall(stall)) => {
                if stall > timeout {
                    std::thread::sleep(timeout);
                    return Err(CameraError::Timeout(timeout.as_millis() as u64));
                }
                std::thread::sleep(stall);
            }
            None => {}
        }

        Ok(Some(RawFrame {
            data,
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgb24,
            sequence: self.sequence,
        }))
    }
}

impl Drop for SimulatedDriver {
    fn drop(&mut self) {
        self.handle.record(DriverEvent::Released);
    }
}
