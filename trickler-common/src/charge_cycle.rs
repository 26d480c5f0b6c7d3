// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Charge-cycle state machine (spec §4.7), driven by the scale, the coarse
//! and fine motors, the optional hopper gate, the status LED, a monotonic
//! clock, and the reset/encoder buttons via the capability traits in
//! [`crate::drivers`].
//!
//! One call to [`ChargeCycle::step`] corresponds to one scale sample; the
//! owning task (spec §5's charge task) calls it in a tight loop and reacts
//! to the returned [`ChargeCycleEvent`].

use crate::drivers::{ButtonInput, Clock, Gate, LedStatus, Motor, Scale, StatusLed};
use crate::eeprom::ChargeModeConfig;
use crate::pid::{MotorGains, PidState};
use crate::profile::MotorBounds;
use crate::telemetry::{Gains4, ScoringParams, TelemetryRecord};

const ZERO_RING_LEN: usize = 10;
const ZERO_SAMPLE_TIMEOUT_MS: u32 = 300;
const SAMPLE_TIMEOUT_MS: u32 = 200;
const CUP_REMOVAL_STABLE_TARGET: u32 = 5;
const CUP_REMOVAL_CLASSIFY_DELAY_MS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeCycleError {
    /// `start()` called while a firmware update is in progress (spec §5
    /// ordering guarantee: a charge cycle and an OTA update never overlap).
    UpdateInProgress,
    NotIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeState {
    WaitForZero,
    WaitForComplete,
    WaitForCupRemoval,
    WaitForCupReturn,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeClassification {
    OverCharge,
    UnderCharge,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChargeCycleEvent {
    None,
    Zeroed,
    DispenseComplete(TelemetryRecord),
    Classified(ChargeClassification),
    CupRemoved,
    CycleRestarted,
    Exited,
}

/// Everything a cycle needs for one dispense that isn't persisted EEPROM
/// config: the gains and bounds the controller should use and the target
/// weight for this charge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleParams {
    pub gains: MotorGains,
    pub coarse_bounds: MotorBounds,
    pub fine_bounds: MotorBounds,
    pub target_weight: f32,
    pub scoring: ScoringParams,
}

pub struct ChargeCycle {
    state: ChargeState,
    zero_ring: heapless::Vec<f32, ZERO_RING_LEN>,
    pid: PidState,
    last_sample_ms: u32,
    cycle_start_ms: u32,
    stop_at_ms: u32,
    classify_at_ms: u32,
    cup_removal_stable_count: u32,
    last_fine_stop_ms: Option<u32>,
    telemetry_sequence: u32,
    baseline_weight: f32,
}

impl ChargeCycle {
    pub fn new() -> Self {
        Self {
            state: ChargeState::WaitForZero,
            zero_ring: heapless::Vec::new(),
            pid: PidState::new(),
            last_sample_ms: 0,
            cycle_start_ms: 0,
            stop_at_ms: 0,
            classify_at_ms: 0,
            cup_removal_stable_count: 0,
            last_fine_stop_ms: None,
            telemetry_sequence: 0,
            baseline_weight: 0.0,
        }
    }

    pub fn state(&self) -> ChargeState {
        self.state
    }

    /// Starts a fresh cycle from the `exit` state.
    pub fn restart(&mut self) {
        self.state = ChargeState::WaitForZero;
        self.zero_ring.clear();
        self.pid = PidState::new();
        self.cup_removal_stable_count = 0;
        self.last_fine_stop_ms = None;
    }

    fn reset_to_zero_wait(&mut self) {
        self.state = ChargeState::WaitForZero;
        self.zero_ring.clear();
        self.cup_removal_stable_count = 0;
    }

    /// Processes one scale sample. Returns the resulting event, if any.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        scale: &mut impl Scale,
        coarse_motor: &mut impl Motor,
        fine_motor: &mut impl Motor,
        gate: &mut impl Gate,
        led: &mut impl StatusLed,
        clock: &mut impl Clock,
        buttons: &mut impl ButtonInput,
        cfg: &ChargeModeConfig,
        params: &CycleParams,
    ) -> ChargeCycleEvent {
        if buttons.reset_pressed() {
            coarse_motor.stop();
            fine_motor.stop();
            if gate.is_present() {
                gate.close();
            }
            self.state = ChargeState::Exit;
            return ChargeCycleEvent::Exited;
        }

        match self.state {
            ChargeState::Exit => ChargeCycleEvent::None,
            ChargeState::WaitForZero => self.step_wait_for_zero(scale, led, clock, buttons, cfg),
            ChargeState::WaitForComplete => {
                self.step_wait_for_complete(scale, coarse_motor, fine_motor, gate, led, clock, cfg, params)
            }
            ChargeState::WaitForCupRemoval => self.step_wait_for_cup_removal(scale, led, clock, cfg, params),
            ChargeState::WaitForCupReturn => self.step_wait_for_cup_return(scale, led, clock, buttons),
        }
    }

    fn step_wait_for_zero(
        &mut self,
        scale: &mut impl Scale,
        led: &mut impl StatusLed,
        clock: &mut impl Clock,
        buttons: &mut impl ButtonInput,
        cfg: &ChargeModeConfig,
    ) -> ChargeCycleEvent {
        led.set_status(LedStatus::NotReady);

        if buttons.encoder_pressed() {
            scale.force_zero();
            self.zero_ring.clear();
        }

        let Some(sample) = scale.wait_for_sample(ZERO_SAMPLE_TIMEOUT_MS) else {
            return ChargeCycleEvent::None;
        };

        if self.zero_ring.len() == ZERO_RING_LEN {
            self.zero_ring.remove(0);
        }
        let _ = self.zero_ring.push(sample);

        if self.zero_ring.len() < ZERO_RING_LEN {
            return ChargeCycleEvent::None;
        }

        let mean = self.zero_ring.iter().sum::<f32>() / ZERO_RING_LEN as f32;
        // Compared against sd_margin^2 rather than taking a square root:
        // std_dev < sd_margin iff variance < sd_margin^2 for non-negative values.
        let variance =
            self.zero_ring.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / ZERO_RING_LEN as f32;

        if variance < cfg.set_point_sd_margin * cfg.set_point_sd_margin && libm_abs(mean) < cfg.set_point_mean_margin
        {
            self.cycle_start_ms = clock.now_ms();
            self.pid = PidState::new();
            self.last_sample_ms = self.cycle_start_ms;
            self.state = ChargeState::WaitForComplete;
            return ChargeCycleEvent::Zeroed;
        }

        ChargeCycleEvent::None
    }

    fn step_wait_for_complete(
        &mut self,
        scale: &mut impl Scale,
        coarse_motor: &mut impl Motor,
        fine_motor: &mut impl Motor,
        gate: &mut impl Gate,
        led: &mut impl StatusLed,
        clock: &mut impl Clock,
        cfg: &ChargeModeConfig,
        params: &CycleParams,
    ) -> ChargeCycleEvent {
        led.set_status(LedStatus::UnderCharge);
        if gate.is_present() {
            gate.open();
        }

        let now = clock.now_ms();
        let Some(current) = scale.wait_for_sample(SAMPLE_TIMEOUT_MS) else {
            return ChargeCycleEvent::None;
        };

        let outcome = self.pid.sample(
            now,
            self.last_sample_ms,
            params.target_weight,
            current,
            &params.gains,
            params.coarse_bounds,
            params.fine_bounds,
            cfg.coarse_stop_threshold,
            cfg.fine_stop_threshold,
        );
        self.last_sample_ms = now;

        if let Some(speed) = outcome.coarse_speed {
            coarse_motor.set_speed(speed);
        }
        fine_motor.set_speed(outcome.fine_speed);

        if !outcome.should_stop {
            return ChargeCycleEvent::None;
        }

        coarse_motor.stop();
        fine_motor.stop();
        if gate.is_present() {
            gate.close();
        }

        if cfg.precharge_enabled {
            coarse_motor.set_speed(cfg.precharge_speed);
            clock.delay_ms(cfg.precharge_time_ms);
            coarse_motor.stop();
        }

        let total_time_ms = now.saturating_sub(self.cycle_start_ms);
        let coarse_time_ms = self.pid.coarse_stop_tick_ms().map(|t| t.saturating_sub(self.cycle_start_ms));
        let fine_time_ms = total_time_ms.saturating_sub(coarse_time_ms.unwrap_or(0));

        let gains4 = Gains4 {
            coarse_kp: params.gains.coarse.kp,
            coarse_kd: params.gains.coarse.kd,
            fine_kp: params.gains.fine.kp,
            fine_kd: params.gains.fine.kd,
        };
        let record = TelemetryRecord::new(
            self.telemetry_sequence,
            coarse_time_ms,
            fine_time_ms,
            total_time_ms,
            current,
            params.target_weight,
            gains4,
            &params.scoring,
        );
        self.telemetry_sequence += 1;

        self.baseline_weight = current;
        self.classify_at_ms = now + CUP_REMOVAL_CLASSIFY_DELAY_MS;
        self.state = ChargeState::WaitForCupRemoval;
        ChargeCycleEvent::DispenseComplete(record)
    }

    fn step_wait_for_cup_removal(
        &mut self,
        scale: &mut impl Scale,
        led: &mut impl StatusLed,
        clock: &mut impl Clock,
        cfg: &ChargeModeConfig,
        params: &CycleParams,
    ) -> ChargeCycleEvent {
        let now = clock.now_ms();
        if now < self.classify_at_ms {
            return ChargeCycleEvent::None;
        }

        let Some(current) = scale.wait_for_sample(SAMPLE_TIMEOUT_MS) else {
            return ChargeCycleEvent::None;
        };

        let error = params.target_weight - self.baseline_weight;
        if self.cup_removal_stable_count == 0 {
            let classification = if error <= -cfg.fine_stop_threshold {
                ChargeClassification::OverCharge
            } else if error >= cfg.fine_stop_threshold {
                ChargeClassification::UnderCharge
            } else {
                ChargeClassification::Normal
            };
            led.set_status(match classification {
                ChargeClassification::OverCharge => LedStatus::OverCharge,
                ChargeClassification::UnderCharge => LedStatus::UnderCharge,
                ChargeClassification::Normal => LedStatus::Normal,
            });
        }

        if current <= cfg.fine_stop_threshold {
            self.cup_removal_stable_count += 1;
        } else {
            self.cup_removal_stable_count = 0;
        }

        if self.cup_removal_stable_count >= CUP_REMOVAL_STABLE_TARGET {
            self.state = ChargeState::WaitForCupReturn;
            return ChargeCycleEvent::CupRemoved;
        }

        ChargeCycleEvent::None
    }

    fn step_wait_for_cup_return(
        &mut self,
        scale: &mut impl Scale,
        led: &mut impl StatusLed,
        clock: &mut impl Clock,
        buttons: &mut impl ButtonInput,
    ) -> ChargeCycleEvent {
        led.set_status(LedStatus::NotReady);

        if buttons.encoder_pressed() {
            scale.force_zero();
        }

        let Some(current) = scale.wait_for_sample(ZERO_SAMPLE_TIMEOUT_MS) else {
            return ChargeCycleEvent::None;
        };

        if current >= 0.0 {
            self.cycle_start_ms = clock.now_ms();
            self.reset_to_zero_wait();
            return ChargeCycleEvent::CycleRestarted;
        }

        ChargeCycleEvent::None
    }
}

impl Default for ChargeCycle {
    fn default() -> Self {
        Self::new()
    }
}

fn libm_abs(v: f32) -> f32 {
    if v < 0.0 {
        -v
    } else {
        v
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::drivers::sim::{NoGate, RecordingLed, RecordingMotor, ScriptedButtons, ScriptedScale, SimClock};
    use crate::profile::Gains;

    fn params() -> CycleParams {
        CycleParams {
            gains: MotorGains {
                coarse: Gains { kp: 1.0, ki: 0.0, kd: 0.0 },
                fine: Gains { kp: 0.5, ki: 0.0, kd: 0.0 },
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
    fn stays_in_wait_for_zero_until_ten_stable_samples() {
        let mut cycle = ChargeCycle::new();
        let mut scale = ScriptedScale::new([0.0; 9]);
        let mut led = RecordingLed::default();
        let mut clock = SimClock::new();
        let mut buttons = ScriptedButtons::default();
        let cfg = ChargeModeConfig::default();

        for _ in 0..9 {
            let ev = cycle.step_wait_for_zero(&mut scale, &mut led, &mut clock, &mut buttons, &cfg);
            assert_eq!(ev, ChargeCycleEvent::None);
        }
        assert_eq!(cycle.state(), ChargeState::WaitForZero);
    }

    #[test]
    fn ten_stable_zero_samples_transition_to_dispense() {
        let mut cycle = ChargeCycle::new();
        let mut scale = ScriptedScale::new([0.0; 10]);
        let mut led = RecordingLed::default();
        let mut clock = SimClock::new();
        let mut buttons = ScriptedButtons::default();
        let cfg = ChargeModeConfig::default();

        let mut last_event = ChargeCycleEvent::None;
        for _ in 0..10 {
            last_event = cycle.step_wait_for_zero(&mut scale, &mut led, &mut clock, &mut buttons, &cfg);
        }
        assert_eq!(last_event, ChargeCycleEvent::Zeroed);
        assert_eq!(cycle.state(), ChargeState::WaitForComplete);
    }

    #[test]
    fn dispense_runs_both_motors_until_fine_threshold() {
        let mut cycle = ChargeCycle::new();
        cycle.state = ChargeState::WaitForComplete;
        let mut scale = ScriptedScale::new([5.0, 8.0, 9.9, 9.99]);
        let mut coarse = RecordingMotor::default();
        let mut fine = RecordingMotor::default();
        let mut gate = NoGate;
        let mut led = RecordingLed::default();
        let mut clock = SimClock::new();
        let cfg = ChargeModeConfig::default();
        let p = params();

        let mut last_event = ChargeCycleEvent::None;
        for _ in 0..4 {
            clock.delay_ms(100);
            last_event =
                cycle.step_wait_for_complete(&mut scale, &mut coarse, &mut fine, &mut gate, &mut led, &mut clock, &cfg, &p);
        }

        assert!(matches!(last_event, ChargeCycleEvent::DispenseComplete(_)));
        assert_eq!(cycle.state(), ChargeState::WaitForCupRemoval);
        assert!(!fine.history.is_empty());
    }

    #[test]
    fn reset_button_exits_from_any_state() {
        let mut cycle = ChargeCycle::new();
        cycle.state = ChargeState::WaitForComplete;
        let mut scale = ScriptedScale::new([5.0]);
        let mut coarse = RecordingMotor::default();
        let mut fine = RecordingMotor::default();
        let mut gate = NoGate;
        let mut led = RecordingLed::default();
        let mut clock = SimClock::new();
        let mut buttons = ScriptedButtons::default();
        buttons.reset_presses.push_back(true);
        let cfg = ChargeModeConfig::default();
        let p = params();

        let ev = cycle.step(
            &mut scale, &mut coarse, &mut fine, &mut gate, &mut led, &mut clock, &mut buttons, &cfg, &p,
        );
        assert_eq!(ev, ChargeCycleEvent::Exited);
        assert_eq!(cycle.state(), ChargeState::Exit);
    }
}
