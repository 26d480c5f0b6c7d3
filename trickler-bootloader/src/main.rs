// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Trickler bootloader for RP2040: reads the dual-bank metadata record,
//! runs the boot protocol (spec §4.4), and jumps into the selected bank.
//!
//! Firmware updates themselves are driven entirely from the running
//! firmware over HTTP (spec §4.5/§4.6); this binary never talks to a host,
//! it only ever boots.

#![no_std]
#![no_main]

mod boot;
mod peripherals;

use defmt_rtt as _;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use panic_probe as _;
use trickler_common::flash::hw::Rp2040Flash;
use trickler_common::metadata::MetadataStore;

defmt::timestamp!("{=u64:us}", { 0 });

use cortex_m_rt::entry;

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

#[entry]
fn main() -> ! {
    defmt::println!("bootloader init");

    let mut p = peripherals::init();
    blink(&mut p.led_pin, &mut p.timer, 3, 200);

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

    let bank = boot::select_boot_bank(&mut store, &mut flash);
    defmt::println!("selected bank {:?}", defmt::Debug2Format(&bank));

    if !boot::bank_looks_bootable(bank) {
        defmt::println!("selected bank has no sane vector table, halting");
        loop {
            cortex_m::asm::wfi();
        }
    }

    p.timer.delay_ms(10u32);
    unsafe { boot::jump_to_bank(bank) }
}

fn blink(led: &mut peripherals::LedPin, timer: &mut rp2040_hal::Timer, times: u32, ms: u32) {
    for _ in 0..times {
        let _ = led.set_high();
        timer.delay_ms(ms);
        let _ = led.set_low();
        timer.delay_ms(ms);
    }
}
