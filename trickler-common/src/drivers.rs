// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Capability traits for the scale, motors, servo gate, status LED, and the
//! reset/encoder input that the charge-cycle state machine (§4.7) and PID
//! controller (§4.8) are driven through.
//!
//! Modeled as a small trait per physical capability rather than one big
//! "hardware" struct, per the polymorphism note in spec §9: test suites
//! substitute simulated implementations driven by scripted sample streams,
//! the real firmware binds these to the scale serial protocol, step
//! generator, and PWM driver that are out of scope here (spec §1).

/// A weight reading source. `wait_for_sample` returns `None` if no sample
/// arrives within `timeout_ms` (spec §4.8: "no new sample this tick").
pub trait Scale {
    fn wait_for_sample(&mut self, timeout_ms: u32) -> Option<f32>;
    fn force_zero(&mut self);
    /// Latest known reading, for display and post-cycle classification.
    fn current(&self) -> f32;
}

/// A single trickler motor (coarse or fine).
pub trait Motor {
    fn set_speed(&mut self, speed: f32);

    fn stop(&mut self) {
        self.set_speed(0.0);
    }
}

/// The hopper gate. A system with no gate reports `is_present() == false` and
/// treats open/close as no-ops (spec §4.7: "if a servo gate is present").
pub trait Gate {
    fn open(&mut self);
    fn close(&mut self);
    fn is_present(&self) -> bool;
}

/// Semantic status colors the charge cycle drives (spec §4.7); the mapping
/// to an actual RGB triple is a persisted EEPROM tunable (spec §6.4), not a
/// concern of the state machine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedStatus {
    NotReady,
    UnderCharge,
    OverCharge,
    Normal,
}

pub trait StatusLed {
    fn set_status(&mut self, status: LedStatus);
}

/// Monotonic millisecond clock and cooperative delay, standing in for the
/// RTOS tick count the original firmware reads via `xTaskGetTickCount`.
pub trait Clock {
    fn now_ms(&self) -> u32;
    fn delay_ms(&mut self, ms: u32);
}

/// Reset button and tare/zero encoder press, delivered through the bounded
/// event queue of spec §5's menu/input task.
pub trait ButtonInput {
    fn reset_pressed(&mut self) -> bool;
    fn encoder_pressed(&mut self) -> bool;
}

#[cfg(feature = "std")]
pub mod sim {
    //! Host-side simulated drivers driven by scripted sample streams, for
    //! the charge-cycle and PID tests.

    use super::*;
    use alloc::collections::VecDeque;

    #[derive(Default)]
    pub struct ScriptedScale {
        pub samples: VecDeque<Option<f32>>,
        pub last: f32,
        pub zero_count: u32,
    }

    impl ScriptedScale {
        pub fn new<I: IntoIterator<Item = f32>>(samples: I) -> Self {
            Self {
                samples: samples.into_iter().map(Some).collect(),
                last: 0.0,
                zero_count: 0,
            }
        }
    }

    impl Scale for ScriptedScale {
        fn wait_for_sample(&mut self, _timeout_ms: u32) -> Option<f32> {
            match self.samples.pop_front() {
                Some(Some(v)) => {
                    self.last = v;
                    Some(v)
                }
                Some(None) => None, // scripted timeout
                None => Some(self.last),
            }
        }

        fn force_zero(&mut self) {
            self.zero_count += 1;
            self.last = 0.0;
        }

        fn current(&self) -> f32 {
            self.last
        }
    }

    #[derive(Default)]
    pub struct RecordingMotor {
        pub last_speed: f32,
        pub history: alloc::vec::Vec<f32>,
    }

    impl Motor for RecordingMotor {
        fn set_speed(&mut self, speed: f32) {
            self.last_speed = speed;
            self.history.push(speed);
        }
    }

    pub struct NoGate;
    impl Gate for NoGate {
        fn open(&mut self) {}
        fn close(&mut self) {}
        fn is_present(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    pub struct RecordingGate {
        pub open_count: u32,
        pub close_count: u32,
    }

    impl Gate for RecordingGate {
        fn open(&mut self) {
            self.open_count += 1;
        }
        fn close(&mut self) {
            self.close_count += 1;
        }
        fn is_present(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    pub struct RecordingLed {
        pub last: Option<LedStatus>,
        pub history: alloc::vec::Vec<LedStatus>,
    }

    impl StatusLed for RecordingLed {
        fn set_status(&mut self, status: LedStatus) {
            self.last = Some(status);
            self.history.push(status);
        }
    }

    /// Advances by a fixed step on every `delay_ms`/tick so tests don't
    /// depend on wall-clock time.
    pub struct SimClock {
        pub now: u32,
    }

    impl SimClock {
        pub fn new() -> Self {
            Self { now: 0 }
        }
    }

    impl Default for SimClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for SimClock {
        fn now_ms(&self) -> u32 {
            self.now
        }

        fn delay_ms(&mut self, ms: u32) {
            self.now += ms;
        }
    }

    #[derive(Default)]
    pub struct ScriptedButtons {
        pub reset_presses: VecDeque<bool>,
        pub encoder_presses: VecDeque<bool>,
    }

    impl ButtonInput for ScriptedButtons {
        fn reset_pressed(&mut self) -> bool {
            self.reset_presses.pop_front().unwrap_or(false)
        }

        fn encoder_pressed(&mut self) -> bool {
            self.encoder_presses.pop_front().unwrap_or(false)
        }
    }
}
