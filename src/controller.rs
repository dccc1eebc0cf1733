//! Hysteresis controller driving the water pump from moisture samples
//!
//! Two timers run off one sample per tick: telemetry, every configured
//! interval, and the control check, every configured interval while idle but
//! every `watering_check` while watering so "stop" is detected quickly. The
//! controller stays inert until the configuration store has been confirmed.

use crate::store::ConfigStore;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Analog front end of the moisture probe
pub trait MoistureSensor: Send {
    /// Raw ADC reading; larger means drier
    fn read_raw(&mut self) -> u32;
}

/// Actuator output
pub trait Pump: Send {
    fn set_running(&mut self, running: bool);
}

/// Controller state, owned exclusively by [`MoistureController`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Watering,
}

/// Fixed controller parameters that are not replicated from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Full-scale raw reading of the analog input
    pub max_raw: u32,
    /// Control check period while watering
    pub watering_check: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_raw: 1023,
            watering_check: Duration::from_millis(100),
        }
    }
}

/// Normalize a raw reading to a moisture percentage in `[0, 100]`
pub fn moisture_percent(raw: u32, offset: u32, max_raw: u32) -> u8 {
    let excess = raw.saturating_sub(offset);
    let span = max_raw.saturating_sub(offset);
    if span == 0 {
        return if excess == 0 { 100 } else { 0 };
    }

    let percent = 100.0 * (1.0 - f64::from(excess) / f64::from(span));
    percent.clamp(0.0, 100.0).round() as u8
}

/// Hysteresis rule. `[low, high)` holds the current state.
pub fn next_state(state: ControllerState, reading: u32, low: u32, high: u32) -> ControllerState {
    match state {
        ControllerState::Idle if reading < low => ControllerState::Watering,
        ControllerState::Watering if reading >= high => ControllerState::Idle,
        unchanged => unchanged,
    }
}

/// What one tick produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutput {
    /// Moisture percentage to submit upstream
    pub telemetry: Option<u8>,
    /// Sample taken this tick, if any timer was due
    pub sample: Option<u8>,
    /// State change applied to the pump this tick
    pub transition: Option<(ControllerState, ControllerState)>,
}

/// Periodic sampler and pump driver
pub struct MoistureController<S, P> {
    sensor: S,
    pump: P,
    settings: ControllerSettings,
    state: ControllerState,
    next_check: Option<Instant>,
    next_telemetry: Option<Instant>,
    seen_revision: Option<u64>,
}

impl<S: MoistureSensor, P: Pump> MoistureController<S, P> {
    pub fn new(sensor: S, mut pump: P, settings: ControllerSettings) -> Self {
        pump.set_running(false);
        Self {
            sensor,
            pump,
            settings,
            state: ControllerState::Idle,
            next_check: None,
            next_telemetry: None,
            seen_revision: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Read and normalize the probe
    pub fn sample(&mut self, offset: u32) -> u8 {
        let raw = self.sensor.read_raw();
        moisture_percent(raw, offset, self.settings.max_raw)
    }

    /// Run whatever timers are due at `now`
    pub fn tick(&mut self, now: Instant, store: &ConfigStore) -> TickOutput {
        let mut output = TickOutput::default();
        if !store.is_confirmed() {
            return output;
        }

        // A new configuration takes effect right away
        if self.seen_revision != Some(store.revision()) {
            self.seen_revision = Some(store.revision());
            self.next_check = Some(now);
            self.next_telemetry = Some(now);
        }

        let config = store.get();
        let interval = Duration::from_millis(u64::from(config.interval_ms));

        if self.next_telemetry.map_or(true, |due| now >= due) {
            let reading = self.cached_sample(&mut output, config.offset);
            output.telemetry = Some(reading);
            self.next_telemetry = Some(now + interval);
        }

        if self.next_check.map_or(true, |due| now >= due) {
            let reading = self.cached_sample(&mut output, config.offset);
            let next = next_state(self.state, u32::from(reading), config.low, config.high);
            if next != self.state {
                info!(?next, reading, "Moisture controller transition");
                self.pump.set_running(next == ControllerState::Watering);
                output.transition = Some((self.state, next));
                self.state = next;
            }
            let period = match self.state {
                ControllerState::Watering => self.settings.watering_check,
                ControllerState::Idle => interval,
            };
            self.next_check = Some(now + period);
        }

        output
    }

    fn cached_sample(&mut self, output: &mut TickOutput, offset: u32) -> u8 {
        if let Some(reading) = output.sample {
            return reading;
        }
        let reading = self.sample(offset);
        debug!(reading, "Moisture sampled");
        output.sample = Some(reading);
        reading
    }
}
