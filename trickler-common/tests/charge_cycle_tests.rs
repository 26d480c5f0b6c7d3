// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! End-to-end walk through the charge-cycle state machine, driven entirely
//! through scripted capability-trait doubles the way the real firmware
//! drives it through hardware.

use trickler_common::charge_cycle::{ChargeCycle, ChargeCycleEvent, ChargeState, CycleParams};
use trickler_common::drivers::sim::{NoGate, RecordingLed, RecordingMotor, ScriptedButtons, ScriptedScale, SimClock};
use trickler_common::eeprom::ChargeModeConfig;
use trickler_common::pid::MotorGains;
use trickler_common::profile::{Gains, MotorBounds};
use trickler_common::telemetry::ScoringParams;

fn params() -> CycleParams {
    CycleParams {
        gains: MotorGains {
            coarse: Gains { kp: 2.0, ki: 0.0, kd: 0.0 },
            fine: Gains { kp: 0.8, ki: 0.0, kd: 0.0 },
        },
        coarse_bounds: MotorBounds { min: 0.0, max: 100.0 },
        fine_bounds: MotorBounds { min: 0.0, max: 100.0 },
        target_weight: 10.0,
        scoring: ScoringParams {
            max_overthrow_percent: 5.0,
            target_total_time_ms: 2000.0,
            weights: Default::default(),
        },
    }
}

#[test]
fn full_cycle_zero_dispense_classify_remove_and_restart() {
    let mut cycle = ChargeCycle::new();
    let cfg = ChargeModeConfig::default();
    let p = params();

    let mut coarse = RecordingMotor::default();
    let mut fine = RecordingMotor::default();
    let mut gate = NoGate;
    let mut led = RecordingLed::default();
    let mut clock = SimClock::new();
    let mut buttons = ScriptedButtons::default();

    // --- wait-for-zero: 10 stable near-zero samples tare the scale.
    let mut scale = ScriptedScale::new([0.0; 10]);
    let mut event = ChargeCycleEvent::None;
    for _ in 0..10 {
        event = cycle.step(
            &mut scale, &mut coarse, &mut fine, &mut gate, &mut led, &mut clock, &mut buttons, &cfg, &p,
        );
    }
    assert_eq!(event, ChargeCycleEvent::Zeroed);
    assert_eq!(cycle.state(), ChargeState::WaitForComplete);
    assert_eq!(led.last, Some(trickler_common::drivers::LedStatus::NotReady));

    // --- wait-for-complete: dispense down to just under the fine threshold.
    let mut scale = ScriptedScale::new([3.0, 7.0, 9.5, 9.9, 9.99]);
    let mut dispense_event = ChargeCycleEvent::None;
    for _ in 0..5 {
        clock.delay_ms(150);
        dispense_event = cycle.step(
            &mut scale, &mut coarse, &mut fine, &mut gate, &mut led, &mut clock, &mut buttons, &cfg, &p,
        );
    }
    assert!(matches!(dispense_event, ChargeCycleEvent::DispenseComplete(_)));
    assert_eq!(cycle.state(), ChargeState::WaitForCupRemoval);
    assert!(!fine.history.is_empty());
    assert_eq!(coarse.last_speed, 0.0);
    assert_eq!(fine.last_speed, 0.0);

    // --- wait-for-cup-removal: advance past the classify delay, then see 5
    // stable empty-platform samples.
    clock.delay_ms(1200);
    let mut scale = ScriptedScale::new([0.0; 5]);
    let mut removal_event = ChargeCycleEvent::None;
    for _ in 0..5 {
        removal_event = cycle.step(
            &mut scale, &mut coarse, &mut fine, &mut gate, &mut led, &mut clock, &mut buttons, &cfg, &p,
        );
    }
    assert_eq!(removal_event, ChargeCycleEvent::CupRemoved);
    assert_eq!(cycle.state(), ChargeState::WaitForCupReturn);

    // --- wait-for-cup-return: a non-negative reading brings the cup back.
    let mut scale = ScriptedScale::new([12.0]);
    let return_event = cycle.step(
        &mut scale, &mut coarse, &mut fine, &mut gate, &mut led, &mut clock, &mut buttons, &cfg, &p,
    );
    assert_eq!(return_event, ChargeCycleEvent::CycleRestarted);
    assert_eq!(cycle.state(), ChargeState::WaitForZero);
}

#[test]
fn reset_button_exits_the_state_machine_from_wait_for_zero() {
    let mut cycle = ChargeCycle::new();
    let cfg = ChargeModeConfig::default();
    let p = params();

    let mut scale = ScriptedScale::new([0.0]);
    let mut coarse = RecordingMotor::default();
    let mut fine = RecordingMotor::default();
    let mut gate = NoGate;
    let mut led = RecordingLed::default();
    let mut clock = SimClock::new();
    let mut buttons = ScriptedButtons::default();
    buttons.reset_presses.push_back(true);

    let event = cycle.step(
        &mut scale, &mut coarse, &mut fine, &mut gate, &mut led, &mut clock, &mut buttons, &cfg, &p,
    );
    assert_eq!(event, ChargeCycleEvent::Exited);
    assert_eq!(cycle.state(), ChargeState::Exit);
}

#[test]
fn encoder_press_forces_a_rezero_while_waiting_for_zero() {
    let mut cycle = ChargeCycle::new();
    let cfg = ChargeModeConfig::default();
    let p = params();

    let mut scale = ScriptedScale::new([5.0]);
    let mut coarse = RecordingMotor::default();
    let mut fine = RecordingMotor::default();
    let mut gate = NoGate;
    let mut led = RecordingLed::default();
    let mut clock = SimClock::new();
    let mut buttons = ScriptedButtons::default();
    buttons.encoder_presses.push_back(true);

    cycle.step(
        &mut scale, &mut coarse, &mut fine, &mut gate, &mut led, &mut clock, &mut buttons, &cfg, &p,
    );
    assert_eq!(scale.zero_count, 1);
}
