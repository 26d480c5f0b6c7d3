// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot protocol: validate metadata, pick a bank, jump to it directly via
//! XIP.
//!
//! Firmware banks are 896 KiB (spec §6.1) -- far larger than the RP2040's
//! 264 KiB of SRAM, so unlike a typical small-image bootloader this one
//! never copies the image to RAM. It relocates the vector table to the
//! bank's flash address and branches straight into it.

use trickler_common::flash::hw::Rp2040Flash;
use trickler_common::layout::FLASH_BASE;
use trickler_common::metadata::MetadataStore;
use trickler_common::{Bank, FirmwareManager};

struct VectorTable {
    initial_sp: u32,
    reset_vector: u32,
}

impl VectorTable {
    unsafe fn read_from(addr: u32) -> Self {
        Self {
            initial_sp: (addr as *const u32).read_volatile(),
            reset_vector: (addr as *const u32).offset(1).read_volatile(),
        }
    }

    fn looks_sane(&self) -> bool {
        const RAM_START: u32 = 0x2000_0000;
        const RAM_END: u32 = 0x2004_2000;
        (RAM_START..RAM_END).contains(&self.initial_sp) && self.reset_vector != 0 && self.reset_vector != 0xFFFF_FFFF
    }
}

/// Runs the boot protocol (spec §4.4) and returns the bank to jump into.
///
/// On a rollback (invalid active bank, or boot-attempt exhaustion) the
/// metadata store already points at the other bank by the time this
/// returns; the caller does not need to reboot, it can jump straight there.
pub fn select_boot_bank(store: &mut MetadataStore, flash: &mut Rp2040Flash) -> Bank {
    match FirmwareManager::run_boot_protocol(store, flash) {
        Ok(_) => store.current().active_bank,
        Err(_) => {
            defmt::println!("boot protocol failed to read metadata, defaulting to bank A");
            Bank::A
        }
    }
}

/// Checks the vector table at a bank's flash offset without trusting the
/// CRC (used only as a last-resort fallback when metadata itself can't be
/// trusted).
pub fn bank_looks_bootable(bank: Bank) -> bool {
    let vt = unsafe { VectorTable::read_from(FLASH_BASE + bank.offset()) };
    vt.looks_sane()
}

/// Relocates the vector table to `bank`'s flash address and jumps there.
/// Never returns.
///
/// # Safety
/// `bank` must hold a firmware image whose CRC was already validated by
/// the metadata store (or the caller accepts the consequences of jumping
/// into garbage).
pub unsafe fn jump_to_bank(bank: Bank) -> ! {
    let addr = FLASH_BASE + bank.offset();

    prepare_for_firmware_handoff();
    relocate_vector_table(addr);

    let vt = VectorTable::read_from(addr);
    jump(vt.initial_sp, vt.reset_vector);
}

unsafe fn prepare_for_firmware_handoff() {
    cortex_m::interrupt::disable();

    const NVIC_ICPR: *mut u32 = 0xE000_E280 as *mut u32;
    NVIC_ICPR.write_volatile(0xFFFF_FFFF);
    const NVIC_ICER: *mut u32 = 0xE000_E180 as *mut u32;
    NVIC_ICER.write_volatile(0xFFFF_FFFF);
}

unsafe fn relocate_vector_table(addr: u32) {
    const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;
    SCB_VTOR.write_volatile(addr);
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

unsafe fn jump(initial_sp: u32, reset_vector: u32) -> ! {
    core::arch::asm!(
        "msr msp, {sp}",
        "cpsie i",
        "bx {reset}",
        sp = in(reg) initial_sp,
        reset = in(reg) reset_vector,
        options(noreturn)
    );
}
