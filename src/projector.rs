//! Hardware projector (emulator mode).
//!
//! A periodic reconciliation loop: modeled line states become pin levels
//! on the MCP23017 bank, and sampled ADC channels become telemetry. The
//! projector reads line states and writes measurements; it never initiates
//! mode transitions or touches the line states themselves.
//!
//! The expander driver itself is an external capability behind
//! [`GpioBackend`]; [`SimGpio`] is the in-process backend used in tests
//! and on hosts without the I2C bus.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{PduError, PduResult};
use crate::lines::{mcp_pin_for_line, ADC_CHANNEL_COUNT, LINE_COUNT, MCP_ADDRESSES};
use crate::measurements;
use crate::state::{PduMode, PduStateManager};

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    Low,
    High,
}

/// External expander driver contract: atomic per-pin writes and 12-bit
/// ADC reads. Implementations talk to the I2C bus; the projector never
/// holds the state lock across these calls.
pub trait GpioBackend: Send {
    fn configure_pin_as_output(&mut self, expander: u8, pin: u8) -> PduResult<()>;
    fn write_pin(&mut self, expander: u8, pin: u8, level: PinLevel) -> PduResult<()>;
    fn read_adc(&mut self, channel: usize) -> PduResult<u16>;
}

impl<T: GpioBackend + ?Sized> GpioBackend for Box<T> {
    fn configure_pin_as_output(&mut self, expander: u8, pin: u8) -> PduResult<()> {
        (**self).configure_pin_as_output(expander, pin)
    }

    fn write_pin(&mut self, expander: u8, pin: u8, level: PinLevel) -> PduResult<()> {
        (**self).write_pin(expander, pin, level)
    }

    fn read_adc(&mut self, channel: usize) -> PduResult<u16> {
        (**self).read_adc(channel)
    }
}

/// In-process expander bank: pin levels and ADC samples live in memory,
/// and individual expanders can be made to fail for fault-path tests.
#[derive(Debug)]
pub struct SimGpio {
    pins: [[PinLevel; 16]; MCP_ADDRESSES.len()],
    adc: [u16; ADC_CHANNEL_COUNT],
    failing: [bool; MCP_ADDRESSES.len()],
}

impl SimGpio {
    pub fn new() -> Self {
        Self {
            pins: [[PinLevel::High; 16]; MCP_ADDRESSES.len()],
            adc: [0; ADC_CHANNEL_COUNT],
            failing: [false; MCP_ADDRESSES.len()],
        }
    }

    fn bank(expander: u8) -> PduResult<usize> {
        MCP_ADDRESSES
            .iter()
            .position(|&addr| addr == expander)
            .ok_or(PduError::HardwareFault {
                expander,
                reason: "unknown expander address".into(),
            })
    }

    pub fn pin_level(&self, expander: u8, pin: u8) -> Option<PinLevel> {
        let bank = Self::bank(expander).ok()?;
        self.pins[bank].get(usize::from(pin)).copied()
    }

    pub fn set_adc(&mut self, channel: usize, raw: u16) {
        self.adc[channel] = raw & measurements::ADC_MAX;
    }

    /// Make every transaction against one expander fail.
    pub fn set_expander_failing(&mut self, expander: u8, failing: bool) {
        if let Ok(bank) = Self::bank(expander) {
            self.failing[bank] = failing;
        }
    }
}

impl Default for SimGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl GpioBackend for SimGpio {
    fn configure_pin_as_output(&mut self, expander: u8, pin: u8) -> PduResult<()> {
        self.write_pin(expander, pin, PinLevel::High)
    }

    fn write_pin(&mut self, expander: u8, pin: u8, level: PinLevel) -> PduResult<()> {
        let bank = Self::bank(expander)?;
        if self.failing[bank] {
            return Err(PduError::HardwareFault {
                expander,
                reason: "simulated bus failure".into(),
            });
        }
        self.pins[bank][usize::from(pin)] = level;
        Ok(())
    }

    fn read_adc(&mut self, channel: usize) -> PduResult<u16> {
        Ok(self.adc[channel])
    }
}

pub struct Projector<B: GpioBackend> {
    state: Arc<PduStateManager>,
    backend: B,
    period: Duration,
}

impl<B: GpioBackend> Projector<B> {
    pub fn new(state: Arc<PduStateManager>, backend: B, period: Duration) -> Self {
        Self {
            state,
            backend,
            period,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Configure the full bank as outputs, everything driven HIGH (all
    /// lines off, the drivers sink).
    pub fn configure(&mut self) -> PduResult<()> {
        for line in 0..LINE_COUNT {
            if let Some((expander, pin)) = mcp_pin_for_line(line) {
                self.backend.configure_pin_as_output(expander, pin)?;
                self.backend.write_pin(expander, pin, PinLevel::High)?;
            }
        }
        Ok(())
    }

    /// Reconciliation loop at the configured cadence.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(period_ms = self.period.as_millis() as u64, "hardware projector running");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("hardware projector shutting down");
                    return;
                }
                _ = ticker.tick() => self.cycle(),
            }
        }
    }

    /// One reconciliation pass: project line states onto pins, then fold
    /// sampled ADC values back into telemetry.
    pub fn cycle(&mut self) {
        let merged = self.snapshot_lines();
        self.drive_pins(&merged);
        self.sample_adc();
    }

    /// Union of both units' line states, skipping units still in Boot or
    /// Load (their drivers are unpowered).
    fn snapshot_lines(&self) -> [bool; LINE_COUNT] {
        let mut merged = [false; LINE_COUNT];
        for unit in self.state.units() {
            let unit = PduStateManager::lock(unit);
            if matches!(unit.status.mode, PduMode::Boot | PduMode::Load) {
                continue;
            }
            let snapshot = unit.line_states.snapshot();
            for (line, &enabled) in snapshot.iter().enumerate() {
                merged[line] |= enabled;
            }
        }
        merged
    }

    /// Inverted output polarity: enabled line drives the pin LOW. A
    /// failing expander is skipped for the rest of the cycle and counted
    /// once; the other expanders still get their writes.
    fn drive_pins(&mut self, merged: &[bool; LINE_COUNT]) {
        let mut failed = [false; MCP_ADDRESSES.len()];
        for (line, &enabled) in merged.iter().enumerate() {
            let Some((expander, pin)) = mcp_pin_for_line(line) else {
                continue;
            };
            let bank = MCP_ADDRESSES.iter().position(|&a| a == expander);
            if let Some(bank) = bank {
                if failed[bank] {
                    continue;
                }
            }
            let level = if enabled { PinLevel::Low } else { PinLevel::High };
            if let Err(e) = self.backend.write_pin(expander, pin, level) {
                warn!(error = %e, expander, "expander write failed");
                if let Some(bank) = bank {
                    failed[bank] = true;
                }
                self.count_hardware_fault();
            }
        }
    }

    /// Sample every configured channel and commit raw + converted
    /// atomically. On any read failure telemetry keeps last-known values.
    fn sample_adc(&mut self) {
        let mut samples = [0u16; ADC_CHANNEL_COUNT];
        for (channel, sample) in samples.iter_mut().enumerate() {
            match self.backend.read_adc(channel) {
                Ok(raw) => *sample = raw & measurements::ADC_MAX,
                Err(e) => {
                    warn!(error = %e, channel, "ADC sample failed, keeping last-known telemetry");
                    self.count_hardware_fault();
                    return;
                }
            }
        }

        for unit in self.state.units() {
            let mut unit = PduStateManager::lock(unit);
            let unit = &mut *unit;
            unit.raw.channels = samples;
            measurements::convert_all(&unit.raw, &mut unit.converted);
            measurements::refresh_bus_aggregates(&mut unit.raw, &mut unit.converted);
        }
    }

    fn count_hardware_fault(&self) {
        for unit in self.state.units() {
            let mut unit = PduStateManager::lock(unit);
            unit.status.counters.hardware_fault =
                unit.status.counters.hardware_fault.saturating_add(1);
        }
    }
}
