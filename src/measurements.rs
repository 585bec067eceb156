//! ADC channel conversion and the simulator-mode measurement model.
//!
//! Converted values are an affine image of the raw 12-bit counts; the
//! per-channel `(gain, offset)` pairs live in one table so the calibrated
//! ICD coefficients can be dropped in without touching anything else.
//!
//! In simulator mode there is no ADC to sample, so the dispatcher re-derives
//! a unit's channels from its line states after every line mutation: each
//! enabled line contributes its nominal load current (or rail voltage) to
//! the channel instrumenting it. The model computes the engineering target,
//! quantizes it through the channel coefficients into a raw count, and
//! converts back — converted measurements stay a pure function of raw.

use crate::lines::LogicalUnit;
use crate::state::{ConvertedMeasurements, RawMeasurements, UnitLineStates};

pub const ADC_MAX: u16 = 0x0FFF;

/// Raw sentinel reported by unmonitored channels (isolated LDO / isolated
/// power lines carry no shunt).
pub const UNMONITORED_RAW: u16 = 0x0FFF;

/// Nominal per-line contributions, in milli-units.
const HIGH_PW_HEATER_LINE_MA: i32 = 3700;
const LOW_PW_HEATER_LINE6_MA: i32 = 317;
const LOW_PW_HEATER_LINE4_MA: i32 = 475;
const AVIONIC_LOAD_LINE_MA: i32 = 200;
const HDRM_BUS_MV: i32 = 28_000;
const HDRM_GROUP_LINE_MA: i32 = 667;
const REACTION_WHEEL_LINE_MA: i32 = 5000;
const PROPULSION_LINE_MA: i32 = 40_000;
const THERMAL_RAIL_MV: i32 = 5000;
const BUS_VOLTAGE_MV: i32 = 28_000;

/// Affine calibration of one channel: `milli = raw * gain + offset`.
#[derive(Debug, Clone, Copy)]
pub struct ChannelCoeff {
    /// Milli-units per ADC count
    pub gain: f32,
    /// Milli-unit offset at zero counts
    pub offset: i32,
}

const BUS_VOLTAGE_COEFF: ChannelCoeff = ChannelCoeff { gain: 8.0, offset: 0 };
const BUS_CURRENT_COEFF: ChannelCoeff = ChannelCoeff { gain: 40.0, offset: 0 };

/// Calibration of one global ADC channel (0-45).
pub fn channel_coeff(channel: usize) -> ChannelCoeff {
    let (unit, local) = owning_unit(channel);
    let gain = match unit {
        LogicalUnit::HighPowerHeaters => 2.0,
        LogicalUnit::LowPowerHeaters => 0.5,
        LogicalUnit::AvionicLoads => 0.1,
        // Fire/arm sense channels read volts, the two group channels amps
        LogicalUnit::Hdrm => {
            if local >= 14 {
                1.0
            } else {
                8.0
            }
        }
        LogicalUnit::ReactionWheels => 2.0,
        LogicalUnit::Propulsion => 12.0,
        LogicalUnit::IsolatedLdo | LogicalUnit::IsolatedPower => 1.0,
        LogicalUnit::ThermalFlyback => 1.6,
    };
    ChannelCoeff { gain, offset: 0 }
}

fn owning_unit(channel: usize) -> (LogicalUnit, usize) {
    for unit in LogicalUnit::ALL {
        let range = unit.adc_range();
        if range.contains(&channel) {
            return (unit, channel - range.start);
        }
    }
    // Channel indices come from lines::adc_range tables; 0-45 is total.
    unreachable!("ADC channel {channel} outside 0-45")
}

fn convert_with(coeff: ChannelCoeff, raw: u16) -> i32 {
    (f32::from(raw) * coeff.gain).round() as i32 + coeff.offset
}

fn quantize_with(coeff: ChannelCoeff, milli: i32) -> u16 {
    let counts = ((milli - coeff.offset) as f32 / coeff.gain).round();
    counts.clamp(0.0, f32::from(ADC_MAX)) as u16
}

/// Engineering value of one raw sample.
pub fn convert_channel(channel: usize, raw: u16) -> i32 {
    convert_with(channel_coeff(channel), raw)
}

/// Raw count whose conversion is closest to `milli`, clamped to 12 bits.
pub fn quantize_channel(channel: usize, milli: i32) -> u16 {
    quantize_with(channel_coeff(channel), milli)
}

/// Recompute the whole converted vector from the raw vector. Called with
/// the unit lock held so both commit atomically.
pub fn convert_all(raw: &RawMeasurements, converted: &mut ConvertedMeasurements) {
    for (channel, sample) in raw.channels.iter().enumerate() {
        converted.channels[channel] = convert_channel(channel, *sample);
    }
    converted.bus_voltage_mv = convert_with(BUS_VOLTAGE_COEFF, raw.bus_voltage);
    converted.bus_current_ma = convert_with(BUS_CURRENT_COEFF, raw.bus_current);
}

/// Simulator model: re-derive one logical unit's channels from its line
/// states, then refresh the bus aggregates.
pub fn model_logical_unit(
    unit: LogicalUnit,
    lines: &UnitLineStates,
    raw: &mut RawMeasurements,
    converted: &mut ConvertedMeasurements,
) {
    let mask = lines.unit_mask(unit);
    let on = |bit: usize| mask & (1 << bit) != 0;
    let count_on = |bits: core::ops::Range<usize>| bits.filter(|bit| on(*bit)).count() as i32;
    let base = unit.adc_range().start;

    for local in 0..unit.adc_count() {
        let channel = base + local;
        let target_milli = match unit {
            // Two heater lines share one current channel
            LogicalUnit::HighPowerHeaters => {
                count_on(2 * local..2 * local + 2) * HIGH_PW_HEATER_LINE_MA
            }
            // Six lines per channel, four on the last
            LogicalUnit::LowPowerHeaters => {
                if local < 3 {
                    count_on(6 * local..6 * local + 6) * LOW_PW_HEATER_LINE6_MA
                } else {
                    count_on(18..22) * LOW_PW_HEATER_LINE4_MA
                }
            }
            LogicalUnit::AvionicLoads => {
                if on(local) {
                    AVIONIC_LOAD_LINE_MA
                } else {
                    0
                }
            }
            LogicalUnit::Hdrm => match local {
                // Fire-line sense voltages, nominal then redundant side
                2..=11 => {
                    if on(local) {
                        HDRM_BUS_MV
                    } else {
                        0
                    }
                }
                // Arm rails are hot whenever the unit is powered
                12 | 13 => HDRM_BUS_MV,
                14 => count_on(1..7) * HDRM_GROUP_LINE_MA,
                15 => count_on(8..12) * HDRM_GROUP_LINE_MA,
                _ => 0,
            },
            LogicalUnit::ReactionWheels => {
                if on(local) {
                    REACTION_WHEEL_LINE_MA
                } else {
                    0
                }
            }
            LogicalUnit::Propulsion => {
                if on(local) {
                    PROPULSION_LINE_MA
                } else {
                    0
                }
            }
            LogicalUnit::IsolatedLdo | LogicalUnit::IsolatedPower => {
                raw.channels[channel] = UNMONITORED_RAW;
                converted.channels[channel] = convert_channel(channel, UNMONITORED_RAW);
                continue;
            }
            LogicalUnit::ThermalFlyback => {
                if local < 5 {
                    THERMAL_RAIL_MV
                } else {
                    raw.channels[channel] = UNMONITORED_RAW;
                    converted.channels[channel] = convert_channel(channel, UNMONITORED_RAW);
                    continue;
                }
            }
        };

        let sample = quantize_channel(channel, target_milli);
        raw.channels[channel] = sample;
        converted.channels[channel] = convert_channel(channel, sample);
    }

    refresh_bus_aggregates(raw, converted);
}

/// Bus voltage is the 28 V main rail; bus current sums every current
/// channel currently modeled.
pub fn refresh_bus_aggregates(raw: &mut RawMeasurements, converted: &mut ConvertedMeasurements) {
    let mut total_ma: i64 = 0;
    for unit in [
        LogicalUnit::HighPowerHeaters,
        LogicalUnit::LowPowerHeaters,
        LogicalUnit::AvionicLoads,
        LogicalUnit::ReactionWheels,
        LogicalUnit::Propulsion,
    ] {
        for channel in unit.adc_range() {
            total_ma += i64::from(converted.channels[channel]);
        }
    }
    // HDRM group currents sit at local channels 14 and 15
    let hdrm = LogicalUnit::Hdrm.adc_range().start;
    total_ma += i64::from(converted.channels[hdrm + 14]);
    total_ma += i64::from(converted.channels[hdrm + 15]);

    raw.bus_voltage = quantize_with(BUS_VOLTAGE_COEFF, BUS_VOLTAGE_MV);
    raw.bus_current = quantize_with(BUS_CURRENT_COEFF, total_ma as i32);
    converted.bus_voltage_mv = convert_with(BUS_VOLTAGE_COEFF, raw.bus_voltage);
    converted.bus_current_ma = convert_with(BUS_CURRENT_COEFF, raw.bus_current);
}
