//! Layout of the 71 switchable power lines.
//!
//! Lines are grouped into nine logical units addressed by commands; each
//! line maps onto one pin of a bank of six MCP23017 expanders. Both tables
//! were lifted from the harness pin allocation and must not be reordered.

use core::ops::Range;
use serde::{Deserialize, Serialize};

pub const LINE_COUNT: usize = 71;
pub const LOGICAL_UNIT_COUNT: usize = 9;
pub const ADC_CHANNEL_COUNT: usize = 46;

/// I2C addresses of the expander bank, in line order.
pub const MCP_ADDRESSES: [u8; 6] = [0x27, 0x26, 0x25, 0x24, 0x23, 0x22];

pub const PINS_PER_EXPANDER: u8 = 16;

/// One group of power lines sharing a role, addressed as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalUnit {
    HighPowerHeaters = 0,
    LowPowerHeaters = 1,
    AvionicLoads = 2,
    Hdrm = 3,
    ReactionWheels = 4,
    Propulsion = 5,
    IsolatedLdo = 6,
    IsolatedPower = 7,
    ThermalFlyback = 8,
}

impl LogicalUnit {
    pub const ALL: [LogicalUnit; LOGICAL_UNIT_COUNT] = [
        LogicalUnit::HighPowerHeaters,
        LogicalUnit::LowPowerHeaters,
        LogicalUnit::AvionicLoads,
        LogicalUnit::Hdrm,
        LogicalUnit::ReactionWheels,
        LogicalUnit::Propulsion,
        LogicalUnit::IsolatedLdo,
        LogicalUnit::IsolatedPower,
        LogicalUnit::ThermalFlyback,
    ];

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(LogicalUnit::HighPowerHeaters),
            1 => Some(LogicalUnit::LowPowerHeaters),
            2 => Some(LogicalUnit::AvionicLoads),
            3 => Some(LogicalUnit::Hdrm),
            4 => Some(LogicalUnit::ReactionWheels),
            5 => Some(LogicalUnit::Propulsion),
            6 => Some(LogicalUnit::IsolatedLdo),
            7 => Some(LogicalUnit::IsolatedPower),
            8 => Some(LogicalUnit::ThermalFlyback),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Global line indices belonging to this unit.
    pub fn line_range(self) -> Range<usize> {
        match self {
            LogicalUnit::HighPowerHeaters => 0..18,
            LogicalUnit::LowPowerHeaters => 18..40,
            LogicalUnit::AvionicLoads => 40..42,
            LogicalUnit::Hdrm => 42..54,
            LogicalUnit::ReactionWheels => 54..58,
            LogicalUnit::Propulsion => 58..60,
            LogicalUnit::IsolatedLdo => 60..66,
            LogicalUnit::IsolatedPower => 66..69,
            LogicalUnit::ThermalFlyback => 69..71,
        }
    }

    pub fn line_count(self) -> usize {
        self.line_range().len()
    }

    /// Mask with one bit per line of this unit; bits beyond the unit
    /// width are never interpreted.
    pub fn valid_mask(self) -> u32 {
        if self.line_count() >= 32 {
            u32::MAX
        } else {
            (1u32 << self.line_count()) - 1
        }
    }

    /// Global ADC channel indices instrumenting this unit.
    pub fn adc_range(self) -> Range<usize> {
        match self {
            LogicalUnit::HighPowerHeaters => 0..9,
            LogicalUnit::LowPowerHeaters => 9..13,
            LogicalUnit::AvionicLoads => 13..15,
            LogicalUnit::Hdrm => 15..31,
            LogicalUnit::ReactionWheels => 31..35,
            LogicalUnit::Propulsion => 35..37,
            LogicalUnit::IsolatedLdo => 37..38,
            LogicalUnit::IsolatedPower => 38..39,
            LogicalUnit::ThermalFlyback => 39..46,
        }
    }

    pub fn adc_count(self) -> usize {
        self.adc_range().len()
    }
}

/// Map a line index onto its `(expander_address, pin_index)` pair.
///
/// The allocation walks the expander bank from 0x27 down to 0x22; 0x26 and
/// 0x24 only use their A bank, 0x22 drives the last seven lines.
pub fn mcp_pin_for_line(line: usize) -> Option<(u8, u8)> {
    let pair = match line {
        0..=15 => (0x27, line as u8),
        16..=23 => (0x26, (line - 16) as u8),
        24..=39 => (0x25, (line - 24) as u8),
        40..=47 => (0x24, (line - 40) as u8),
        48..=63 => (0x23, (line - 48) as u8),
        64..=70 => (0x22, (line - 64) as u8),
        _ => return None,
    };
    Some(pair)
}
