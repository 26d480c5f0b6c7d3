// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash device abstraction: sector erase, page program, verify, and
//! streaming CRC, with watchdog feeding and progress reporting on long
//! operations.
//!
//! The [`FlashDevice`] trait is implemented by [`SimFlash`] (an in-memory
//! double used by host tests and by the property tests in
//! `tests/metadata_proptest.rs`) and, under the `embedded` feature, by a
//! hardware driver built on the RP2040 ROM flash routines in the same style
//! as the bootloader's own flash driver: functions resolved from the ROM
//! table at init time, executed from RAM with interrupts disabled only for
//! the duration of a single sector or page operation.

use crate::crc32::Crc32;
use crate::layout::{Bank, FLASH_PAGE_SIZE, FLASH_SECTOR_SIZE, FW_BANK_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    InvalidParam,
    NotAligned,
    OutOfRange,
    VerifyFailed,
    CrcMismatch,
    Timeout,
}

#[cfg(feature = "embedded")]
impl defmt::Format for FlashError {
    fn format(&self, fmt: defmt::Formatter) {
        let s = match self {
            FlashError::InvalidParam => "invalid-param",
            FlashError::NotAligned => "not-aligned",
            FlashError::OutOfRange => "out-of-range",
            FlashError::VerifyFailed => "verify-failed",
            FlashError::CrcMismatch => "crc-mismatch",
            FlashError::Timeout => "timeout",
        };
        defmt::write!(fmt, "{}", s)
    }
}

/// Called at bounded intervals during long erase/CRC passes so the caller
/// can feed a hardware watchdog and/or report progress.
pub trait ProgressSink {
    fn on_progress(&mut self, current_bytes: u32, total_bytes: u32);
}

/// A no-op sink for callers that don't care about progress.
pub struct NoProgress;
impl ProgressSink for NoProgress {
    fn on_progress(&mut self, _current_bytes: u32, _total_bytes: u32) {}
}

impl<F: FnMut(u32, u32)> ProgressSink for F {
    fn on_progress(&mut self, current_bytes: u32, total_bytes: u32) {
        self(current_bytes, total_bytes)
    }
}

/// How many sectors (for erase) or bytes (for CRC) to process before
/// reporting progress and feeding the watchdog. See spec §4.2.
pub const ERASE_PROGRESS_SECTORS: u32 = 10;
pub const CRC_PROGRESS_BYTES: u32 = 16 * 1024;

/// Region below which writes are never permitted through this abstraction
/// (bootloader + metadata sectors). The metadata store writes through its
/// own privileged path, not through [`FlashDevice::program`].
pub const WRITABLE_REGION_START: u32 = crate::layout::FW_BANK_A_OFFSET;

pub trait FlashDevice {
    /// Erase `size` bytes starting at `offset`. Both must be sector-aligned.
    fn erase_region(
        &mut self,
        offset: u32,
        size: u32,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), FlashError>;

    /// Program `data` at `offset`. Both must be page-aligned.
    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Erase a single 4 KiB sector below [`WRITABLE_REGION_START`]. Used only
    /// by the metadata store's privileged path (spec §4.2); never exposed to
    /// the firmware manager.
    fn erase_sector_raw(&mut self, offset: u32) -> Result<(), FlashError>;

    /// Program a single 256 B page below [`WRITABLE_REGION_START`]. Used only
    /// by the metadata store's privileged path.
    fn program_page_raw(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Erase a bank's full extent, not just the bytes an incoming image
    /// needs. Leaving the tail of the target bank un-erased would let stale
    /// bytes from a previous (possibly rolled-back) image survive past the
    /// new image's CRC coverage, since `finalize_update` only hashes
    /// `expected_size` bytes (spec §4.4).
    fn erase_bank(&mut self, bank: Bank, progress: &mut dyn ProgressSink) -> Result<(), FlashError> {
        self.erase_region(bank.offset(), FW_BANK_SIZE, progress)
    }

    fn program_and_verify(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        self.program(offset, data)?;
        self.verify(offset, data)
    }

    fn verify(&self, offset: u32, expected: &[u8]) -> Result<(), FlashError> {
        let mut buf = [0u8; FLASH_PAGE_SIZE as usize];
        let mut done = 0usize;
        while done < expected.len() {
            let n = (expected.len() - done).min(buf.len());
            self.read(offset + done as u32, &mut buf[..n])?;
            if buf[..n] != expected[done..done + n] {
                return Err(FlashError::VerifyFailed);
            }
            done += n;
        }
        Ok(())
    }

    fn crc32_region(
        &self,
        offset: u32,
        size: u32,
        progress: &mut dyn ProgressSink,
    ) -> Result<u32, FlashError> {
        let mut ctx = Crc32::new();
        let mut chunk = [0u8; 256];
        let mut remaining = size;
        let mut pos = offset;
        let mut since_progress = 0u32;
        while remaining > 0 {
            let n = remaining.min(chunk.len() as u32) as usize;
            self.read(pos, &mut chunk[..n])?;
            ctx.update(&chunk[..n]);
            pos += n as u32;
            remaining -= n as u32;
            since_progress += n as u32;
            if since_progress >= CRC_PROGRESS_BYTES {
                progress.on_progress(size - remaining, size);
                since_progress = 0;
            }
        }
        progress.on_progress(size, size);
        Ok(ctx.finalize())
    }
}

pub(crate) fn check_erase_alignment(offset: u32, size: u32) -> Result<(), FlashError> {
    if offset % FLASH_SECTOR_SIZE != 0 || size % FLASH_SECTOR_SIZE != 0 {
        return Err(FlashError::NotAligned);
    }
    if offset < WRITABLE_REGION_START {
        return Err(FlashError::OutOfRange);
    }
    Ok(())
}

pub(crate) fn check_program_alignment(offset: u32, len: u32) -> Result<(), FlashError> {
    if offset % FLASH_PAGE_SIZE != 0 || len % FLASH_PAGE_SIZE != 0 {
        return Err(FlashError::NotAligned);
    }
    if offset < WRITABLE_REGION_START {
        return Err(FlashError::OutOfRange);
    }
    Ok(())
}

/// In-memory flash double used by host tests. Mirrors a real NOR flash:
/// erased bytes read back as `0xFF`, and `program` can only clear bits
/// (never set them), matching real flash semantics closely enough for the
/// power-cut and round-trip properties in spec §8.
///
/// Only available with the `std` feature: it allocates the full 2 MiB flash
/// image on the heap rather than inline, which a `no_std` target cannot do
/// without an allocator.
#[cfg(feature = "std")]
pub struct SimFlash {
    bytes: alloc::vec::Vec<u8>,
    /// If set, simulates a power cut after this many total bytes have been
    /// written across all `program` calls; subsequent writes are dropped.
    pub power_cut_after_bytes: Option<u32>,
    bytes_written: u32,
}

#[cfg(feature = "std")]
impl SimFlash {
    pub fn new() -> Self {
        Self {
            bytes: alloc::vec![0xFFu8; crate::layout::FLASH_TOTAL_SIZE as usize],
            power_cut_after_bytes: None,
            bytes_written: 0,
        }
    }

    /// Directly inspect flash contents (test-only convenience).
    pub fn raw(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(feature = "std")]
impl Default for SimFlash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl FlashDevice for SimFlash {
    fn erase_region(
        &mut self,
        offset: u32,
        size: u32,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), FlashError> {
        check_erase_alignment(offset, size)?;
        if offset + size > crate::layout::FLASH_TOTAL_SIZE {
            return Err(FlashError::OutOfRange);
        }
        let sectors = size / FLASH_SECTOR_SIZE;
        for i in 0..sectors {
            let start = (offset + i * FLASH_SECTOR_SIZE) as usize;
            let end = start + FLASH_SECTOR_SIZE as usize;
            self.bytes[start..end].fill(0xFF);
            if (i + 1) % ERASE_PROGRESS_SECTORS == 0 {
                progress.on_progress((i + 1) * FLASH_SECTOR_SIZE, size);
            }
        }
        progress.on_progress(size, size);
        Ok(())
    }

    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        check_program_alignment(offset, data.len() as u32)?;
        if offset as usize + data.len() > self.bytes.len() {
            return Err(FlashError::OutOfRange);
        }
        for (i, &b) in data.iter().enumerate() {
            if let Some(limit) = self.power_cut_after_bytes {
                if self.bytes_written >= limit {
                    return Ok(()); // simulated power loss: silently stop writing
                }
            }
            let idx = offset as usize + i;
            self.bytes[idx] &= b; // flash program can only clear bits
            self.bytes_written += 1;
        }
        Ok(())
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.bytes.len() {
            return Err(FlashError::OutOfRange);
        }
        buf.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }

    fn erase_sector_raw(&mut self, offset: u32) -> Result<(), FlashError> {
        if offset % FLASH_SECTOR_SIZE != 0 {
            return Err(FlashError::NotAligned);
        }
        let start = offset as usize;
        let end = start + FLASH_SECTOR_SIZE as usize;
        if end > self.bytes.len() {
            return Err(FlashError::OutOfRange);
        }
        self.bytes[start..end].fill(0xFF);
        Ok(())
    }

    fn program_page_raw(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        if offset % FLASH_PAGE_SIZE != 0 || data.len() as u32 % FLASH_PAGE_SIZE != 0 {
            return Err(FlashError::NotAligned);
        }
        if offset as usize + data.len() > self.bytes.len() {
            return Err(FlashError::OutOfRange);
        }
        for (i, &b) in data.iter().enumerate() {
            if let Some(limit) = self.power_cut_after_bytes {
                if self.bytes_written >= limit {
                    return Ok(());
                }
            }
            let idx = offset as usize + i;
            self.bytes[idx] &= b;
            self.bytes_written += 1;
        }
        Ok(())
    }
}

#[cfg(feature = "embedded")]
pub mod hw {
    //! Hardware-backed [`FlashDevice`] for the RP2040, using the same ROM
    //! function lookup and RAM-resident erase/program sequence as the
    //! bootloader's flash driver.

    use super::*;

    type RomFnVoid = unsafe extern "C" fn();
    type RomFnErase = unsafe extern "C" fn(u32, usize, u32, u8);
    type RomFnProgram = unsafe extern "C" fn(u32, *const u8, usize);

    static mut ROM_CONNECT_INTERNAL_FLASH: RomFnVoid = dummy_void;
    static mut ROM_FLASH_EXIT_XIP: RomFnVoid = dummy_void;
    static mut ROM_FLASH_RANGE_ERASE: RomFnErase = dummy_erase;
    static mut ROM_FLASH_RANGE_PROGRAM: RomFnProgram = dummy_program;
    static mut ROM_FLASH_FLUSH_CACHE: RomFnVoid = dummy_void;
    static mut ROM_FLASH_ENTER_CMD_XIP: RomFnVoid = dummy_void;

    unsafe extern "C" fn dummy_void() {}
    unsafe extern "C" fn dummy_erase(_: u32, _: usize, _: u32, _: u8) {}
    unsafe extern "C" fn dummy_program(_: u32, _: *const u8, _: usize) {}

    unsafe fn rom_func_lookup(tag: &[u8; 2]) -> usize {
        let fn_table = *(0x14 as *const u16) as *const u16;
        let lookup: unsafe extern "C" fn(*const u16, u32) -> usize =
            core::mem::transmute::<usize, unsafe extern "C" fn(*const u16, u32) -> usize>(
                *(0x18 as *const u16) as usize,
            );
        let code = u16::from_le_bytes(*tag) as u32;
        lookup(fn_table, code)
    }

    /// Resolve ROM flash function pointers. Must be called once, with XIP
    /// active, before constructing [`Rp2040Flash`].
    pub fn init() {
        unsafe {
            ROM_CONNECT_INTERNAL_FLASH =
                core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"IF"));
            ROM_FLASH_EXIT_XIP = core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"EX"));
            ROM_FLASH_RANGE_ERASE =
                core::mem::transmute::<usize, RomFnErase>(rom_func_lookup(b"RE"));
            ROM_FLASH_RANGE_PROGRAM =
                core::mem::transmute::<usize, RomFnProgram>(rom_func_lookup(b"RP"));
            ROM_FLASH_FLUSH_CACHE =
                core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"FC"));
            ROM_FLASH_ENTER_CMD_XIP =
                core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"CX"));
        }
    }

    #[link_section = ".data"]
    #[inline(never)]
    unsafe fn erase_sector(offset: u32) {
        cortex_m::interrupt::disable();
        ROM_CONNECT_INTERNAL_FLASH();
        ROM_FLASH_EXIT_XIP();
        ROM_FLASH_RANGE_ERASE(offset, FLASH_SECTOR_SIZE as usize, FLASH_SECTOR_SIZE, 0x20);
        ROM_FLASH_FLUSH_CACHE();
        ROM_FLASH_ENTER_CMD_XIP();
        cortex_m::interrupt::enable();
    }

    #[link_section = ".data"]
    #[inline(never)]
    unsafe fn program_page(offset: u32, data: &[u8]) {
        cortex_m::interrupt::disable();
        ROM_CONNECT_INTERNAL_FLASH();
        ROM_FLASH_EXIT_XIP();
        ROM_FLASH_RANGE_PROGRAM(offset, data.as_ptr(), data.len());
        ROM_FLASH_FLUSH_CACHE();
        ROM_FLASH_ENTER_CMD_XIP();
        cortex_m::interrupt::enable();
    }

    fn flash_read_volatile(abs_addr: u32, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = unsafe { ((abs_addr + i as u32) as *const u8).read_volatile() };
        }
    }

    /// Hardware flash device backed by the on-chip NOR flash via XIP.
    pub struct Rp2040Flash;

    impl Rp2040Flash {
        /// # Safety
        /// [`init`] must have been called first, with exclusive flash access.
        pub unsafe fn new() -> Self {
            Rp2040Flash
        }
    }

    impl FlashDevice for Rp2040Flash {
        fn erase_region(
            &mut self,
            offset: u32,
            size: u32,
            progress: &mut dyn ProgressSink,
        ) -> Result<(), FlashError> {
            check_erase_alignment(offset, size)?;
            let sectors = size / FLASH_SECTOR_SIZE;
            for i in 0..sectors {
                unsafe { erase_sector(offset + i * FLASH_SECTOR_SIZE) };
                if (i + 1) % ERASE_PROGRESS_SECTORS == 0 {
                    progress.on_progress((i + 1) * FLASH_SECTOR_SIZE, size);
                }
            }
            progress.on_progress(size, size);
            Ok(())
        }

        fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
            check_program_alignment(offset, data.len() as u32)?;
            unsafe { program_page(offset, data) };
            Ok(())
        }

        fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
            flash_read_volatile(crate::layout::FLASH_BASE + offset, buf);
            Ok(())
        }

        fn erase_sector_raw(&mut self, offset: u32) -> Result<(), FlashError> {
            if offset % FLASH_SECTOR_SIZE != 0 {
                return Err(FlashError::NotAligned);
            }
            unsafe { erase_sector(offset) };
            Ok(())
        }

        fn program_page_raw(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
            if offset % FLASH_PAGE_SIZE != 0 || data.len() as u32 % FLASH_PAGE_SIZE != 0 {
                return Err(FlashError::NotAligned);
            }
            unsafe { program_page(offset, data) };
            Ok(())
        }
    }
}
