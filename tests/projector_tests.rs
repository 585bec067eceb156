use std::sync::Arc;
use std::time::Duration;

use pdusim::lines::{mcp_pin_for_line, LINE_COUNT};
use pdusim::measurements;
use pdusim::projector::{PinLevel, Projector, SimGpio};
use pdusim::state::{PduMode, PduStateManager, APID_NOMINAL, APID_REDUNDANT};

const PERIOD: Duration = Duration::from_millis(100);

fn manager_with_mode(apid: u16, mode: PduMode) -> Arc<PduStateManager> {
    let state = Arc::new(PduStateManager::new());
    {
        let unit = state.unit(apid).unwrap();
        let mut unit = PduStateManager::lock(unit);
        unit.status.mode = mode;
    }
    state
}

fn enable_line(state: &PduStateManager, apid: u16, line: usize) {
    let unit = state.unit(apid).unwrap();
    let mut unit = PduStateManager::lock(unit);
    let lu = pdusim::lines::LogicalUnit::ALL
        .into_iter()
        .find(|lu| lu.line_range().contains(&line))
        .unwrap();
    let bit = line - lu.line_range().start;
    unit.line_states.set_masked(lu, 1 << bit);
}

#[test]
fn pin_level_is_inverted_line_state() {
    // P8: enabled line drives LOW, disabled drives HIGH
    let state = manager_with_mode(APID_NOMINAL, PduMode::Operate);
    enable_line(&state, APID_NOMINAL, 0);
    enable_line(&state, APID_NOMINAL, 42);
    enable_line(&state, APID_NOMINAL, 70);

    let mut projector = Projector::new(state.clone(), SimGpio::new(), PERIOD);
    projector.configure().unwrap();
    projector.cycle();

    let snapshot = {
        let unit = state.unit(APID_NOMINAL).unwrap();
        let unit = PduStateManager::lock(unit);
        unit.line_states.snapshot()
    };
    for (line, &enabled) in snapshot.iter().enumerate().take(LINE_COUNT) {
        let (expander, pin) = mcp_pin_for_line(line).unwrap();
        let level = projector.backend().pin_level(expander, pin).unwrap();
        let expected = if enabled { PinLevel::Low } else { PinLevel::High };
        assert_eq!(level, expected, "line {line}");
    }
}

#[test]
fn units_in_boot_or_load_are_not_projected() {
    // Thermal/flyback lines default on, but a unit still in Boot has
    // unpowered drivers; every pin stays HIGH
    let state = Arc::new(PduStateManager::new());
    let mut projector = Projector::new(state, SimGpio::new(), PERIOD);
    projector.configure().unwrap();
    projector.cycle();

    for line in 0..LINE_COUNT {
        let (expander, pin) = mcp_pin_for_line(line).unwrap();
        assert_eq!(
            projector.backend().pin_level(expander, pin).unwrap(),
            PinLevel::High
        );
    }
}

#[test]
fn projection_merges_both_units() {
    let state = manager_with_mode(APID_NOMINAL, PduMode::Operate);
    {
        let unit = state.unit(APID_REDUNDANT).unwrap();
        let mut unit = PduStateManager::lock(unit);
        unit.status.mode = PduMode::Operate;
    }
    enable_line(&state, APID_NOMINAL, 0);
    enable_line(&state, APID_REDUNDANT, 1);

    let mut projector = Projector::new(state, SimGpio::new(), PERIOD);
    projector.configure().unwrap();
    projector.cycle();

    let (expander, pin) = mcp_pin_for_line(0).unwrap();
    assert_eq!(projector.backend().pin_level(expander, pin).unwrap(), PinLevel::Low);
    let (expander, pin) = mcp_pin_for_line(1).unwrap();
    assert_eq!(projector.backend().pin_level(expander, pin).unwrap(), PinLevel::Low);
}

#[test]
fn failing_expander_is_isolated_and_counted() {
    let state = manager_with_mode(APID_NOMINAL, PduMode::Operate);
    // Line 0 sits on 0x27, line 24 on the failing 0x25
    enable_line(&state, APID_NOMINAL, 0);
    enable_line(&state, APID_NOMINAL, 24);

    let mut gpio = SimGpio::new();
    gpio.set_expander_failing(0x25, true);
    let mut projector = Projector::new(state.clone(), gpio, PERIOD);
    projector.cycle();

    // Healthy expanders still got their writes
    let (expander, pin) = mcp_pin_for_line(0).unwrap();
    assert_eq!(projector.backend().pin_level(expander, pin).unwrap(), PinLevel::Low);
    // The failing expander kept its previous levels
    let (expander, pin) = mcp_pin_for_line(24).unwrap();
    assert_eq!(projector.backend().pin_level(expander, pin).unwrap(), PinLevel::High);

    // The fault is counted exactly once per cycle, on both units
    for apid in [APID_NOMINAL, APID_REDUNDANT] {
        let unit = state.unit(apid).unwrap();
        let unit = PduStateManager::lock(unit);
        assert_eq!(unit.status.counters.hardware_fault, 1);
    }
}

#[test]
fn adc_samples_land_in_both_units_telemetry() {
    let state = manager_with_mode(APID_NOMINAL, PduMode::Operate);
    let mut gpio = SimGpio::new();
    gpio.set_adc(0, 1850);
    gpio.set_adc(45, 0x0FFF);

    let mut projector = Projector::new(state.clone(), gpio, PERIOD);
    projector.cycle();

    for apid in [APID_NOMINAL, APID_REDUNDANT] {
        let unit = state.unit(apid).unwrap();
        let unit = PduStateManager::lock(unit);
        assert_eq!(unit.raw.channels[0], 1850);
        assert_eq!(unit.raw.channels[45], 0x0FFF);
        // Converted is the affine image of raw, committed together
        for channel in 0..unit.raw.channels.len() {
            assert_eq!(
                unit.converted.channels[channel],
                measurements::convert_channel(channel, unit.raw.channels[channel])
            );
        }
        assert!(unit.converted.bus_voltage_mv > 0);
    }
}
