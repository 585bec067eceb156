//! In-memory state of the dual PDU.
//!
//! One [`PduUnit`] per redundancy side, addressed by APID. Each unit sits
//! behind its own lock; command handlers and the hardware projector take
//! the lock only for the duration of a read or mutation, never across I/O.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::lines::{LogicalUnit, ADC_CHANNEL_COUNT, LINE_COUNT};

pub const APID_NOMINAL: u16 = 0x65;
pub const APID_REDUNDANT: u16 = 0x66;

/// Heartbeat exchanges are nominally 1 Hz; a gap of three periods counts
/// as a missed heartbeat.
const HEARTBEAT_MISS_THRESHOLD_MS: u64 = 3000;

/// Operating mode of one PDU unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PduMode {
    Boot = 0,
    Load = 1,
    Operate = 2,
    Safe = 3,
    Maintenance = 4,
}

impl PduMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PduMode::Boot),
            1 => Some(PduMode::Load),
            2 => Some(PduMode::Operate),
            3 => Some(PduMode::Safe),
            4 => Some(PduMode::Maintenance),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Line transitions are only legal in Operate and Maintenance.
    pub fn allows_line_switching(self) -> bool {
        matches!(self, PduMode::Operate | PduMode::Maintenance)
    }
}

/// OBC heartbeat bookkeeping.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HeartbeatState {
    pub last_obc_counter: u16,
    pub last_reply_counter: u16,
    /// Milliseconds since unit start of the last exchange; 0 = never.
    pub last_exchange_ms: u64,
    pub missed_heartbeats: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounters {
    pub command_rejected: u16,
    pub checksum_failed: u16,
    pub unknown_command: u16,
    pub hardware_fault: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatusState {
    pub mode: PduMode,
    pub counters: ErrorCounters,
    pub uptime_ticks: u32,
}

impl Default for StatusState {
    fn default() -> Self {
        Self {
            mode: PduMode::Boot,
            counters: ErrorCounters::default(),
            uptime_ticks: 0,
        }
    }
}

/// Enable state of the 71 switchable lines.
///
/// Thermal/flyback lines start enabled; the harness keeps the flyback
/// converters powered from boot. Everything else starts disabled.
#[derive(Debug, Clone)]
pub struct UnitLineStates {
    lines: [bool; LINE_COUNT],
}

impl UnitLineStates {
    pub fn new() -> Self {
        let mut lines = [false; LINE_COUNT];
        for line in LogicalUnit::ThermalFlyback.line_range() {
            lines[line] = true;
        }
        Self { lines }
    }

    pub fn get(&self, line: usize) -> bool {
        self.lines[line]
    }

    pub fn snapshot(&self) -> [bool; LINE_COUNT] {
        self.lines
    }

    /// Current enable mask of one logical unit, bit 0 = first line.
    pub fn unit_mask(&self, unit: LogicalUnit) -> u32 {
        let range = unit.line_range();
        let mut mask = 0u32;
        for (bit, line) in range.enumerate() {
            if self.lines[line] {
                mask |= 1 << bit;
            }
        }
        mask
    }

    /// Enable every selected line; unselected lines are untouched.
    pub fn set_masked(&mut self, unit: LogicalUnit, mask: u32) {
        let mask = mask & unit.valid_mask();
        for (bit, line) in unit.line_range().enumerate() {
            if mask & (1 << bit) != 0 {
                self.lines[line] = true;
            }
        }
    }

    /// Disable every selected line; unselected lines are untouched.
    pub fn clear_masked(&mut self, unit: LogicalUnit, mask: u32) {
        let mask = mask & unit.valid_mask();
        for (bit, line) in unit.line_range().enumerate() {
            if mask & (1 << bit) != 0 {
                self.lines[line] = false;
            }
        }
    }

    /// Assign every line of the unit to the corresponding mask bit.
    pub fn overwrite(&mut self, unit: LogicalUnit, mask: u32) {
        let mask = mask & unit.valid_mask();
        for (bit, line) in unit.line_range().enumerate() {
            self.lines[line] = mask & (1 << bit) != 0;
        }
    }

    /// Force every line off (PduGoSafe side effect).
    pub fn all_off(&mut self) {
        self.lines = [false; LINE_COUNT];
    }
}

impl Default for UnitLineStates {
    fn default() -> Self {
        Self::new()
    }
}

/// 12-bit ADC samples, one per instrumented channel, plus bus aggregates.
#[derive(Debug, Clone)]
pub struct RawMeasurements {
    pub channels: [u16; ADC_CHANNEL_COUNT],
    pub bus_voltage: u16,
    pub bus_current: u16,
}

impl Default for RawMeasurements {
    fn default() -> Self {
        Self {
            channels: [0; ADC_CHANNEL_COUNT],
            bus_voltage: 0,
            bus_current: 0,
        }
    }
}

/// Engineering-unit projections of [`RawMeasurements`] in milli-units
/// (mA, mV, m degC). Updated atomically together with the raw vector.
#[derive(Debug, Clone)]
pub struct ConvertedMeasurements {
    pub channels: [i32; ADC_CHANNEL_COUNT],
    pub bus_voltage_mv: i32,
    pub bus_current_ma: i32,
}

impl Default for ConvertedMeasurements {
    fn default() -> Self {
        Self {
            channels: [0; ADC_CHANNEL_COUNT],
            bus_voltage_mv: 0,
            bus_current_ma: 0,
        }
    }
}

/// Aggregate state of one redundancy side.
#[derive(Debug)]
pub struct PduUnit {
    pub apid: u16,
    pub heartbeat: HeartbeatState,
    pub status: StatusState,
    pub line_states: UnitLineStates,
    pub raw: RawMeasurements,
    pub converted: ConvertedMeasurements,
    started_at: Instant,
}

impl PduUnit {
    pub fn new(apid: u16) -> Self {
        Self {
            apid,
            heartbeat: HeartbeatState::default(),
            status: StatusState::default(),
            line_states: UnitLineStates::new(),
            raw: RawMeasurements::default(),
            converted: ConvertedMeasurements::default(),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn uptime_secs(&self) -> u32 {
        self.started_at.elapsed().as_secs() as u32
    }

    /// Record a heartbeat exchange and echo the counter (the reply counter
    /// always equals the last received counter).
    pub fn record_heartbeat(&mut self, obc_counter: u16) {
        // Clamp away from the 0 = never sentinel
        let now = self.uptime_ms().max(1);
        if self.heartbeat.last_exchange_ms != 0
            && now.saturating_sub(self.heartbeat.last_exchange_ms) > HEARTBEAT_MISS_THRESHOLD_MS
        {
            self.heartbeat.missed_heartbeats = self.heartbeat.missed_heartbeats.saturating_add(1);
        }
        self.heartbeat.last_obc_counter = obc_counter;
        self.heartbeat.last_reply_counter = obc_counter;
        self.heartbeat.last_exchange_ms = now;
    }
}

/// The two redundancy sides, each behind its own lock.
#[derive(Debug)]
pub struct PduStateManager {
    nominal: Mutex<PduUnit>,
    redundant: Mutex<PduUnit>,
}

impl PduStateManager {
    pub fn new() -> Self {
        Self {
            nominal: Mutex::new(PduUnit::new(APID_NOMINAL)),
            redundant: Mutex::new(PduUnit::new(APID_REDUNDANT)),
        }
    }

    /// The unit owning `apid`, or None for APIDs another device may own.
    pub fn unit(&self, apid: u16) -> Option<&Mutex<PduUnit>> {
        match apid {
            APID_NOMINAL => Some(&self.nominal),
            APID_REDUNDANT => Some(&self.redundant),
            _ => None,
        }
    }

    pub fn units(&self) -> [&Mutex<PduUnit>; 2] {
        [&self.nominal, &self.redundant]
    }

    /// Lock one unit, recovering from a poisoned lock (handlers never
    /// leave partial updates behind, so the inner state stays coherent).
    pub fn lock(unit: &Mutex<PduUnit>) -> MutexGuard<'_, PduUnit> {
        unit.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for PduStateManager {
    fn default() -> Self {
        Self::new()
    }
}
