// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Dual-motor PID dispenser controller (spec §4.8).
//!
//! One scalar error drives two motors: the coarse motor runs until the error
//! first falls below `coarse_stop_threshold`, then stops instantly; the fine
//! motor runs for the whole cycle. Mirrors `charge_mode_wait_for_complete`'s
//! inline PID loop, generalized away from a specific RTOS tick source.

use crate::profile::{Gains, MotorBounds};

/// Per-cycle gains for both motors, either read from the active [`Profile`]
/// or supplied by an active tuning session (spec §4.8).
///
/// [`Profile`]: crate::profile::Profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorGains {
    pub coarse: Gains,
    pub fine: Gains,
}

/// What the controller wants the caller to do after one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidSampleOutcome {
    pub fine_speed: f32,
    /// `Some(speed)` while the coarse motor should still be running;
    /// `None` once it has been stopped for this cycle.
    pub coarse_speed: Option<f32>,
    /// The coarse motor just crossed `coarse_stop_threshold` this sample.
    pub coarse_just_stopped: bool,
    /// The whole cycle should stop: `error < fine_stop_threshold`.
    pub should_stop: bool,
}

/// Running PID state across the samples of one dispense.
#[derive(Debug, Clone, Copy)]
pub struct PidState {
    integral: f32,
    last_error: f32,
    coarse_running: bool,
    coarse_stop_tick_ms: Option<u32>,
}

impl PidState {
    pub fn new() -> Self {
        Self {
            integral: 0.0,
            last_error: 0.0,
            coarse_running: true,
            coarse_stop_tick_ms: None,
        }
    }

    /// Tick at which the coarse motor was stopped, if it ever ran this cycle
    /// (spec §9 open question: `coarse_time_ms` is only defined once this fires).
    pub fn coarse_stop_tick_ms(&self) -> Option<u32> {
        self.coarse_stop_tick_ms
    }

    /// Process one scale sample (spec §4.8). `now_ms`/`last_sample_ms` are
    /// monotonic milliseconds; the caller is responsible for the ≤200ms
    /// sample-wait timeout (skip the tick entirely rather than calling this).
    #[allow(clippy::too_many_arguments)]
    pub fn sample(
        &mut self,
        now_ms: u32,
        last_sample_ms: u32,
        target: f32,
        current: f32,
        gains: &MotorGains,
        coarse_bounds: MotorBounds,
        fine_bounds: MotorBounds,
        coarse_stop_threshold: f32,
        fine_stop_threshold: f32,
    ) -> PidSampleOutcome {
        let error = target - current;

        if error < fine_stop_threshold {
            return PidSampleOutcome {
                fine_speed: 0.0,
                coarse_speed: if self.coarse_running { Some(0.0) } else { None },
                coarse_just_stopped: false,
                should_stop: true,
            };
        }

        let mut coarse_just_stopped = false;
        if self.coarse_running && error < coarse_stop_threshold {
            self.coarse_running = false;
            self.coarse_stop_tick_ms = Some(now_ms);
            coarse_just_stopped = true;
        }

        let dt_ms = (now_ms.saturating_sub(last_sample_ms)).max(1) as f32;
        self.integral += error;
        let derivative = (error - self.last_error) / dt_ms;
        self.last_error = error;

        let fine_speed = (gains.fine.kp * error + gains.fine.ki * self.integral + gains.fine.kd * derivative)
            .clamp(fine_bounds.min, fine_bounds.max);

        let coarse_speed = if self.coarse_running {
            let speed = (gains.coarse.kp * error + gains.coarse.ki * self.integral + gains.coarse.kd * derivative)
                .clamp(coarse_bounds.min, coarse_bounds.max);
            Some(speed)
        } else if coarse_just_stopped {
            Some(0.0)
        } else {
            None
        };

        PidSampleOutcome {
            fine_speed,
            coarse_speed,
            coarse_just_stopped,
            should_stop: false,
        }
    }
}

impl Default for PidState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gains() -> MotorGains {
        MotorGains {
            coarse: Gains { kp: 1.0, ki: 0.0, kd: 0.0 },
            fine: Gains { kp: 0.5, ki: 0.0, kd: 0.0 },
        }
    }

    #[test]
    fn coarse_motor_stops_once_below_threshold() {
        let mut pid = PidState::new();
        let bounds = MotorBounds { min: 0.0, max: 100.0 };

        let out = pid.sample(100, 0, 20.0, 10.0, &gains(), bounds, bounds, 5.0, 0.03, );
        assert!(out.coarse_speed.is_some());
        assert!(!out.should_stop);

        // error now 4.0 < coarse_stop_threshold(5.0): coarse stops this sample.
        let out = pid.sample(200, 100, 20.0, 16.0, &gains(), bounds, bounds, 5.0, 0.03);
        assert!(out.coarse_just_stopped);
        assert_eq!(out.coarse_speed, Some(0.0));
        assert_eq!(pid.coarse_stop_tick_ms(), Some(200));

        // Subsequent samples: coarse no longer reported.
        let out = pid.sample(300, 200, 20.0, 18.0, &gains(), bounds, bounds, 5.0, 0.03);
        assert!(out.coarse_speed.is_none());
    }

    #[test]
    fn cycle_stops_below_fine_threshold() {
        let mut pid = PidState::new();
        let bounds = MotorBounds { min: 0.0, max: 100.0 };
        let out = pid.sample(100, 0, 20.0, 19.99, &gains(), bounds, bounds, 5.0, 0.03);
        assert!(out.should_stop);
        assert_eq!(out.fine_speed, 0.0);
    }

    #[test]
    fn speed_is_clamped_to_bounds() {
        let mut pid = PidState::new();
        let narrow = MotorBounds { min: 1.0, max: 2.0 };
        let out = pid.sample(100, 0, 100.0, 0.0, &gains(), narrow, narrow, 5.0, 0.03);
        assert_eq!(out.coarse_speed, Some(2.0));
        assert_eq!(out.fine_speed, 2.0);
    }
}
