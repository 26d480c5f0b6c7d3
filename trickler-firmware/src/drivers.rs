// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Hardware implementations of `trickler_common::drivers`' capability traits.
//!
//! Each trait is backed by the simplest peripheral that genuinely delivers
//! the capability: the scale by a single ADC channel (the load cell's
//! amplifier output, not a digital scale protocol), the motors by PWM duty
//! cycle, the gate and status LED by GPIO, and the clock by the RP2040
//! timer already proven in the bootloader. No UART or I2C driver is
//! fabricated here; see DESIGN.md for the reasoning.

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::pwm::SetDutyCycle;
use rp2040_hal as hal;

use trickler_common::drivers::{ButtonInput, Clock, Gate, LedStatus, Motor, Scale, StatusLed};

use crate::peripherals::{
    CoarseMotorChannel, EncoderButtonPin, FineMotorChannel, GatePin, HeartbeatLedPin,
    ResetButtonPin,
};

/// Scale amplifier output on a single ADC channel, converted to grams by a
/// fixed linear calibration. `force_zero` just captures the current raw
/// reading as the new baseline; it does not touch the ADC hardware.
pub struct AdcScale<'a> {
    adc: &'a mut hal::Adc,
    pin: &'a mut hal::gpio::Pin<
        hal::gpio::bank0::Gpio26,
        hal::gpio::FunctionSioInput,
        hal::gpio::PullNone,
    >,
    /// Grams per raw ADC count, from bench calibration against a reference mass.
    counts_to_grams: f32,
    zero_offset: u16,
    last: f32,
}

impl<'a> AdcScale<'a> {
    pub fn new(
        adc: &'a mut hal::Adc,
        pin: &'a mut hal::gpio::Pin<
            hal::gpio::bank0::Gpio26,
            hal::gpio::FunctionSioInput,
            hal::gpio::PullNone,
        >,
        counts_to_grams: f32,
    ) -> Self {
        Self { adc, pin, counts_to_grams, zero_offset: 0, last: 0.0 }
    }

    fn read_raw(&mut self) -> u16 {
        self.adc.read(self.pin).unwrap_or(0)
    }
}

impl Scale for AdcScale<'_> {
    fn wait_for_sample(&mut self, _timeout_ms: u32) -> Option<f32> {
        let raw = self.read_raw();
        let counts = raw as i32 - self.zero_offset as i32;
        self.last = counts as f32 * self.counts_to_grams;
        Some(self.last)
    }

    fn force_zero(&mut self) {
        self.zero_offset = self.read_raw();
        self.last = 0.0;
    }

    fn current(&self) -> f32 {
        self.last
    }
}

/// One motor's PWM channel. `speed` is 0..100 (percent of max duty); the PID
/// controller's `MotorBounds` already clamp into this range before it
/// reaches here.
pub struct PwmMotor<C> {
    channel: C,
}

impl<C> PwmMotor<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// Hands the PWM channel back so it can be stored in `Peripherals`
    /// between loop iterations instead of living inside a driver wrapper
    /// that only needs to exist for the duration of one `step` call.
    pub fn into_inner(self) -> C {
        self.channel
    }
}

impl Motor for PwmMotor<CoarseMotorChannel> {
    fn set_speed(&mut self, speed: f32) {
        set_duty_percent(&mut self.channel, speed);
    }
}

impl Motor for PwmMotor<FineMotorChannel> {
    fn set_speed(&mut self, speed: f32) {
        set_duty_percent(&mut self.channel, speed);
    }
}

fn set_duty_percent<C: SetDutyCycle>(channel: &mut C, speed: f32) {
    let pct = speed.clamp(0.0, 100.0);
    let max = channel.max_duty_cycle() as u32;
    let duty = (max * pct as u32 / 100).min(max) as u16;
    let _ = channel.set_duty_cycle(duty);
}

/// Hopper gate solenoid. Present on every build of this instrument, so
/// `is_present` is always `true`; systems without a gate would substitute
/// `trickler_common::drivers::sim::NoGate` at the call site instead (spec
/// §4.7).
pub struct SolenoidGate<'a> {
    pin: &'a mut GatePin,
}

impl<'a> SolenoidGate<'a> {
    pub fn new(pin: &'a mut GatePin) -> Self {
        Self { pin }
    }
}

impl Gate for SolenoidGate<'_> {
    fn open(&mut self) {
        let _ = self.pin.set_high();
    }

    fn close(&mut self) {
        let _ = self.pin.set_low();
    }

    fn is_present(&self) -> bool {
        true
    }
}

/// Status LED on a single GPIO. The RGB status colors of spec §6.4 want a
/// 3-channel PWM LED this board revision doesn't carry, so `set_status`
/// degrades semantic color to on/off (off only for `NotReady`) rather than
/// pretending to drive colors that aren't there.
pub struct HeartbeatLed<'a> {
    pin: &'a mut HeartbeatLedPin,
}

impl<'a> HeartbeatLed<'a> {
    pub fn new(pin: &'a mut HeartbeatLedPin) -> Self {
        Self { pin }
    }
}

impl StatusLed for HeartbeatLed<'_> {
    fn set_status(&mut self, status: LedStatus) {
        match status {
            LedStatus::NotReady => {
                let _ = self.pin.set_low();
            }
            LedStatus::UnderCharge | LedStatus::OverCharge | LedStatus::Normal => {
                let _ = self.pin.set_high();
            }
        }
    }
}

pub struct GpioButtons<'a> {
    reset: &'a mut ResetButtonPin,
    encoder: &'a mut EncoderButtonPin,
}

impl<'a> GpioButtons<'a> {
    pub fn new(reset: &'a mut ResetButtonPin, encoder: &'a mut EncoderButtonPin) -> Self {
        Self { reset, encoder }
    }
}

impl ButtonInput for GpioButtons<'_> {
    fn reset_pressed(&mut self) -> bool {
        self.reset.is_low().unwrap_or(false)
    }

    fn encoder_pressed(&mut self) -> bool {
        self.encoder.is_low().unwrap_or(false)
    }
}

/// Wraps the RP2040 timer as the monotonic millisecond clock the charge
/// cycle and PID loop are driven against.
pub struct HalClock<'a> {
    timer: &'a mut hal::Timer,
}

impl<'a> HalClock<'a> {
    pub fn new(timer: &'a mut hal::Timer) -> Self {
        Self { timer }
    }
}

impl Clock for HalClock<'_> {
    fn now_ms(&self) -> u32 {
        (self.timer.get_counter().ticks() / 1000) as u32
    }

    fn delay_ms(&mut self, ms: u32) {
        use embedded_hal::delay::DelayNs;
        self.timer.delay_ms(ms);
    }
}
