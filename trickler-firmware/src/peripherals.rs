// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Board bring-up for the trickler instrument: clocks, timer, watchdog, the
//! RGB status LED, reset/encoder buttons, the gate solenoid, the coarse/fine
//! motor PWM outputs, and the scale's analog front end.
//!
//! Pin assignment is specific to this instrument's PCB, not part of any
//! shared layout; unlike the bootloader (which only drives one LED) the
//! firmware owns the full set of GPIOs the charge cycle depends on.

use rp2040_hal as hal;
use rp2040_hal::fugit::ExtU32;
use rp2040_hal::gpio::bank0::{
    Gpio14, Gpio15, Gpio16, Gpio17, Gpio18, Gpio25, Gpio26,
};
use rp2040_hal::gpio::{FunctionSioInput, FunctionSioOutput, Pin, PullDown, PullUp};
use rp2040_hal::pwm::{Channel, FreeRunning, Pwm0, Pwm1, A, B};

pub type HeartbeatLedPin = Pin<Gpio25, FunctionSioOutput, PullDown>;
pub type ResetButtonPin = Pin<Gpio14, FunctionSioInput, PullUp>;
pub type EncoderButtonPin = Pin<Gpio15, FunctionSioInput, PullUp>;
pub type GatePin = Pin<Gpio16, FunctionSioOutput, PullDown>;

pub type CoarseMotorChannel = Channel<Pwm0, FreeRunning, B>;
pub type FineMotorChannel = Channel<Pwm1, FreeRunning, A>;

pub struct Peripherals {
    pub heartbeat_led: HeartbeatLedPin,
    pub reset_button: ResetButtonPin,
    pub encoder_button: EncoderButtonPin,
    pub gate: GatePin,
    pub coarse_motor: CoarseMotorChannel,
    pub fine_motor: FineMotorChannel,
    pub adc: hal::Adc,
    pub scale_pin: Pin<Gpio26, FunctionSioInput, hal::gpio::PullNone>,
    pub timer: hal::Timer,
    pub watchdog: hal::Watchdog,
}

/// Watchdog window mandated by spec §5: 8 seconds. Long flash and scale
/// waits feed it directly; everything else relies on the main loop's own
/// period being far shorter than this.
pub const WATCHDOG_WINDOW_MS: u32 = 8_000;

pub fn init() -> Peripherals {
    let mut pac = unsafe { hal::pac::Peripherals::steal() };

    let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);
    let clocks = hal::clocks::init_clocks_and_plls(
        12_000_000u32,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .unwrap();

    let timer = hal::Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
    let sio = hal::Sio::new(pac.SIO);
    let pins = hal::gpio::Pins::new(pac.IO_BANK0, pac.PADS_BANK0, sio.gpio_bank0, &mut pac.RESETS);

    let pwm_slices = hal::pwm::Slices::new(pac.PWM, &mut pac.RESETS);
    let mut pwm0 = pwm_slices.pwm0;
    pwm0.set_ph_correct();
    pwm0.enable();
    let mut coarse_motor = pwm0.channel_b;
    coarse_motor.output_to(pins.gpio17);

    let mut pwm1 = pwm_slices.pwm1;
    pwm1.set_ph_correct();
    pwm1.enable();
    let mut fine_motor = pwm1.channel_a;
    fine_motor.output_to(pins.gpio18);

    let adc = hal::Adc::new(pac.ADC, &mut pac.RESETS);

    watchdog.start(WATCHDOG_WINDOW_MS.millis());

    Peripherals {
        heartbeat_led: pins.gpio25.into_push_pull_output(),
        reset_button: pins.gpio14.into_pull_up_input(),
        encoder_button: pins.gpio15.into_pull_up_input(),
        gate: pins.gpio16.into_push_pull_output(),
        coarse_motor,
        fine_motor,
        adc,
        scale_pin: pins.gpio26.into_floating_input(),
        timer,
        watchdog,
    }
}
