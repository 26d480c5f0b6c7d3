// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Trickler firmware application for RP2040: runs the charge-cycle state
//! machine (spec §4.7/§4.8), drives the self-tuning session (§4.9) when a
//! host enables it, and exposes the firmware manager (§4.4) and metadata
//! store to the network task's HTTP handlers.
//!
//! The boot-time protocol itself runs in the bootloader (`trickler-bootloader`);
//! by the time this binary is executing, `active_bank` is already known-good.
//! This binary's only boot-time responsibility is [`FirmwareManager::confirm_boot`],
//! which must run within the watchdog window (spec §4.4, §5).

#![no_std]
#![no_main]

mod drivers;
mod peripherals;

use cortex_m_rt::entry;
use defmt_rtt as _;
use panic_probe as _;

use trickler_common::charge_cycle::CycleParams;
use trickler_common::eeprom::ChargeModeConfig;
use trickler_common::flash::hw::Rp2040Flash;
use trickler_common::metadata::MetadataStore;
use trickler_common::pid::MotorGains;
use trickler_common::profile::{MotorBounds, ProfileTable};
use trickler_common::{ChargeCycle, ChargeCycleEvent, FirmwareManager, TuningSession};
use trickler_net::UploadSink;

use drivers::{AdcScale, GpioButtons, HalClock, HeartbeatLed, PwmMotor, SolenoidGate};

defmt::timestamp!("{=u64:us}", { 0 });

/// Hardware travel limits for the coarse/fine motors, independent of
/// whatever a profile requests (spec §4.8: profile bounds are clamped
/// against hardware bounds, never the other way around).
const COARSE_HW_BOUNDS: (f32, f32) = (0.0, 100.0);
const FINE_HW_BOUNDS: (f32, f32) = (0.0, 100.0);

/// Grams per raw ADC count for this board's load cell amplifier, from bench
/// calibration. Not persisted: a production build would store this in the
/// EEPROM tunables of spec §6.4 alongside `ChargeModeConfig`.
const SCALE_COUNTS_TO_GRAMS: f32 = 0.01;

/// Scoring normalization used outside of an active tuning session, since
/// `ChargeModeConfig` carries charge-mode thresholds but not the telemetry
/// scoring parameters (those are a tuning-session concern, spec §4.9/§4.10).
const DEFAULT_MAX_OVERTHROW_PERCENT: f32 = 5.0;
const DEFAULT_TARGET_TOTAL_TIME_MS: f32 = 2000.0;

#[entry]
fn main() -> ! {
    defmt::println!("trickler firmware starting");

    let mut p = peripherals::init();

    trickler_common::flash::hw::init();
    let mut flash = unsafe { Rp2040Flash::new() };

    let mut store = match MetadataStore::open(&mut flash) {
        Ok(store) => store,
        Err(e) => {
            defmt::println!("metadata store failed to open: {:?}, halting", defmt::Debug2Format(&e));
            loop {
                cortex_m::asm::wfi();
            }
        }
    };

    // Essential subsystems (metadata, flash, GPIO) are up: confirm this boot
    // before the 8s watchdog window (spec §4.4) elapses.
    if let Err(e) = FirmwareManager::confirm_boot(&mut store, &mut flash) {
        defmt::println!("confirm_boot failed: {:?}", defmt::Debug2Format(&e));
    }
    p.watchdog.feed();

    // No EEPROM chip is wired on this board revision; the charge-mode
    // tunables and profile table start from their documented defaults
    // rather than a fabricated I2C driver (see DESIGN.md).
    let cfg = ChargeModeConfig::default();
    let profiles = ProfileTable::default();
    let active_profile_idx: u8 = 0;
    let profile = *profiles.get(active_profile_idx).expect("index 0 always present");

    // Not yet mutated directly: until a network transport is wired in, only
    // `is_update_in_progress` is read here. The external HTTP server's
    // handlers would take `&mut manager` to drive `_upload_sink`.
    let manager = FirmwareManager::new();
    let mut tuning = TuningSession::new();
    let mut cycle = ChargeCycle::new();

    let mut scale = AdcScale::new(&mut p.adc, &mut p.scale_pin, SCALE_COUNTS_TO_GRAMS);

    // Embedded so the external HTTP server's POST /upload handler (spec
    // §6.3) can drive it directly through `begin`/`feed`/`end`/`cancel`
    // once a Wi-Fi/TCP transport is wired up; this binary owns no
    // transport itself, so it never calls these methods on its own.
    let mut _upload_sink = UploadSink::new();

    defmt::println!("entering main loop");

    loop {
        p.watchdog.feed();

        // Charge task (highest application priority after the watchdog
        // itself, spec §5). Never runs concurrently with an OTA update: the
        // firmware manager and the charge cycle share the same flash part,
        // and an update in progress means the opposite bank is mid-erase or
        // mid-program.
        if !manager.is_update_in_progress() {
            let coarse_bounds = MotorBounds::clamp_against_hardware(
                profile.coarse_min_flow_speed,
                profile.coarse_max_flow_speed,
                COARSE_HW_BOUNDS.0,
                COARSE_HW_BOUNDS.1,
            );
            let fine_bounds = MotorBounds::clamp_against_hardware(
                profile.fine_min_flow_speed,
                profile.fine_max_flow_speed,
                FINE_HW_BOUNDS.0,
                FINE_HW_BOUNDS.1,
            );

            let gains4 = tuning.next_gains();
            let gains = match gains4 {
                Some(g) => MotorGains {
                    coarse: trickler_common::profile::Gains { kp: g.coarse_kp, ki: 0.0, kd: g.coarse_kd },
                    fine: trickler_common::profile::Gains { kp: g.fine_kp, ki: 0.0, kd: g.fine_kd },
                },
                None => MotorGains { coarse: profile.coarse_gains, fine: profile.fine_gains },
            };

            let params = CycleParams {
                gains,
                coarse_bounds,
                fine_bounds,
                target_weight: 10.0,
                scoring: trickler_common::telemetry::ScoringParams {
                    max_overthrow_percent: DEFAULT_MAX_OVERTHROW_PERCENT,
                    target_total_time_ms: DEFAULT_TARGET_TOTAL_TIME_MS,
                    weights: Default::default(),
                },
            };

            let mut coarse_motor = PwmMotor::new(p.coarse_motor);
            let mut fine_motor = PwmMotor::new(p.fine_motor);
            let mut gate = SolenoidGate::new(&mut p.gate);
            let mut led = HeartbeatLed::new(&mut p.heartbeat_led);
            let mut clock = HalClock::new(&mut p.timer);
            let mut buttons = GpioButtons::new(&mut p.reset_button, &mut p.encoder_button);

            let event = cycle.step(
                &mut scale,
                &mut coarse_motor,
                &mut fine_motor,
                &mut gate,
                &mut led,
                &mut clock,
                &mut buttons,
                &cfg,
                &params,
            );

            p.coarse_motor = coarse_motor.into_inner();
            p.fine_motor = fine_motor.into_inner();

            match event {
                ChargeCycleEvent::DispenseComplete(record) if tuning.is_active() => {
                    if let Err(e) = tuning.record_drop(
                        record.coarse_time_ms,
                        record.fine_time_ms,
                        record.total_time_ms,
                        record.final_weight,
                        record.target_weight,
                    ) {
                        defmt::println!("tuning record_drop rejected: {:?}", defmt::Debug2Format(&e));
                    }
                }
                ChargeCycleEvent::Exited => {
                    defmt::println!("charge cycle exited via reset button");
                }
                _ => {}
            }
        }

        // Network task (spec §5: medium priority, short non-blocking calls
        // into the firmware manager only). The HTTP server, TCP stack, and
        // DNS resolver are external collaborators (spec §1) that this
        // binary does not embed; `trickler_net::UploadSink`/`DownloadSource`
        // are the integration points a host-side server task would drive
        // `manager`/`store`/`flash` through.

        // Menu/input task: encoder/reset events are already consumed inside
        // the charge task's `step` call above via `ButtonInput`; a display
        // with its own menu would poll `buttons` here too, but this board
        // revision has none (spec §4.6 notes an LCD is optional hardware).

        // Display/render task (spec §5: low priority, read-only). The
        // status LED is driven from within the charge task's `step` call;
        // a full LCD would read `cycle.state()`/`scale.current()` here.
    }
}
