// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! The OTA update pipeline: prepare, erase, stream, validate, activate.
//!
//! Mirrors the shape of the bootloader's own `DataBlock`/`FinishUpdate`
//! handlers (sequential offset checks, a page-padding staging buffer,
//! CRC verified against flash rather than trusted from the stream) but
//! generalized into a reusable state machine driven by [`FlashDevice`] and
//! [`MetadataStore`] instead of being wired directly to a USB transport.

use crate::crc32::Crc32;
use crate::flash::{FlashDevice, FlashError, NoProgress};
use crate::layout::{Bank, FLASH_PAGE_SIZE, FW_BANK_SIZE};
use crate::metadata::{MetadataError, MetadataStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Preparing,
    Erasing,
    Receiving,
    Validating,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareError {
    NotIdle,
    NotReceiving,
    NotComplete,
    SizeTooLarge,
    WouldOverflow,
    CrcMismatch,
    Flash(FlashError),
    Metadata(MetadataError),
    NoValidOppositeBank,
}

impl From<FlashError> for FirmwareError {
    fn from(e: FlashError) -> Self {
        FirmwareError::Flash(e)
    }
}

impl From<MetadataError> for FirmwareError {
    fn from(e: MetadataError) -> Self {
        FirmwareError::Metadata(e)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FirmwareUpdateStatus {
    pub state: UpdateState,
    pub target_bank: Option<Bank>,
    pub bytes_received: u32,
    pub expected_size: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct FirmwareInfo {
    pub valid: bool,
    pub size: u32,
    pub crc32: u32,
    pub boot_count: u8,
}

struct ReceivingCtx {
    target: Bank,
    expected_size: u32,
    bytes_received: u32,
    crc_ctx: Crc32,
    page_buf: [u8; FLASH_PAGE_SIZE as usize],
    page_fill: usize,
}

/// Drives one OTA session at a time over a shared [`FlashDevice`] and
/// [`MetadataStore`].
pub struct FirmwareManager {
    state: UpdateState,
    ctx: Option<ReceivingCtx>,
}

impl FirmwareManager {
    pub fn new() -> Self {
        Self {
            state: UpdateState::Idle,
            ctx: None,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn is_update_in_progress(&self) -> bool {
        !matches!(self.state, UpdateState::Idle)
    }

    pub fn status(&self) -> FirmwareUpdateStatus {
        match &self.ctx {
            Some(ctx) => FirmwareUpdateStatus {
                state: self.state,
                target_bank: Some(ctx.target),
                bytes_received: ctx.bytes_received,
                expected_size: ctx.expected_size,
            },
            None => FirmwareUpdateStatus {
                state: self.state,
                target_bank: None,
                bytes_received: 0,
                expected_size: 0,
            },
        }
    }

    pub fn progress_percent(&self) -> u8 {
        match &self.ctx {
            Some(ctx) if ctx.expected_size > 0 => {
                ((ctx.bytes_received as u64 * 100) / ctx.expected_size as u64) as u8
            }
            _ => 0,
        }
    }

    pub fn bank_info<F: FlashDevice>(
        &self,
        bank: Bank,
        store: &MetadataStore,
        _flash: &F,
    ) -> FirmwareInfo {
        let rec = store.current().bank(bank);
        FirmwareInfo {
            valid: rec.valid,
            size: rec.size,
            crc32: rec.crc32,
            boot_count: rec.boot_count,
        }
    }

    pub fn current_bank(&self, store: &MetadataStore) -> Bank {
        store.current().active_bank
    }

    /// §4.4 entry point: erase the opposite bank and begin receiving.
    pub fn start_update<F: FlashDevice>(
        &mut self,
        expected_size: u32,
        store: &mut MetadataStore,
        flash: &mut F,
    ) -> Result<(), FirmwareError> {
        if self.state != UpdateState::Idle {
            return Err(FirmwareError::NotIdle);
        }
        if expected_size > FW_BANK_SIZE {
            return Err(FirmwareError::SizeTooLarge);
        }

        self.state = UpdateState::Preparing;
        let target = store.current().active_bank.opposite();

        store.set_update_in_progress(target, flash)?;
        store.mark_bank_invalid(target, flash)?;

        self.state = UpdateState::Erasing;
        flash.erase_bank(target, &mut NoProgress)?;

        self.ctx = Some(ReceivingCtx {
            target,
            expected_size,
            bytes_received: 0,
            crc_ctx: Crc32::new(),
            page_buf: [0xFFu8; FLASH_PAGE_SIZE as usize],
            page_fill: 0,
        });
        self.state = UpdateState::Receiving;
        Ok(())
    }

    /// §4.4 streaming: stage bytes through a 256 B page buffer, flushing
    /// full pages to flash as they fill.
    pub fn write_chunk<F: FlashDevice>(
        &mut self,
        mut buf: &[u8],
        flash: &mut F,
    ) -> Result<(), FirmwareError> {
        if self.state != UpdateState::Receiving {
            return Err(FirmwareError::NotReceiving);
        }
        let ctx = self.ctx.as_mut().expect("receiving state implies ctx");
        if ctx.bytes_received + buf.len() as u32 > ctx.expected_size {
            return Err(FirmwareError::WouldOverflow);
        }

        ctx.crc_ctx.update(buf);

        while !buf.is_empty() {
            let page_len = ctx.page_buf.len();
            let room = page_len - ctx.page_fill;
            let n = room.min(buf.len());
            ctx.page_buf[ctx.page_fill..ctx.page_fill + n].copy_from_slice(&buf[..n]);
            ctx.page_fill += n;
            buf = &buf[n..];
            ctx.bytes_received += n as u32;

            if ctx.page_fill == page_len {
                let page_offset =
                    ctx.target.offset() + ctx.bytes_received - ctx.page_fill as u32;
                flash.program(page_offset, &ctx.page_buf)?;
                ctx.page_buf.fill(0xFF);
                ctx.page_fill = 0;
            }
        }
        Ok(())
    }

    /// §4.4 finalize: flush the partial tail page, then recompute the CRC
    /// directly from flash (not from the streaming context) before trusting it.
    pub fn finalize_update<F: FlashDevice>(
        &mut self,
        expected_crc32: u32,
        version_string: [u8; 32],
        store: &mut MetadataStore,
        flash: &mut F,
    ) -> Result<(), FirmwareError> {
        if self.state != UpdateState::Receiving {
            return Err(FirmwareError::NotReceiving);
        }
        self.state = UpdateState::Validating;
        let ctx = self.ctx.as_mut().expect("receiving state implies ctx");

        if ctx.page_fill > 0 {
            let page_offset = ctx.target.offset() + ctx.bytes_received - ctx.page_fill as u32;
            flash.program(page_offset, &ctx.page_buf)?;
            ctx.page_fill = 0;
        }

        let actual_crc =
            flash.crc32_region(ctx.target.offset(), ctx.bytes_received, &mut NoProgress)?;

        if actual_crc != expected_crc32 {
            self.state = UpdateState::Error;
            store.mark_bank_invalid(ctx.target, flash)?;
            self.ctx = None;
            return Err(FirmwareError::CrcMismatch);
        }

        store.mark_bank_valid(ctx.target, actual_crc, ctx.bytes_received, version_string, flash)?;
        store.clear_update_in_progress(flash)?;
        self.state = UpdateState::Complete;
        Ok(())
    }

    /// §4.4 activate: make the completed bank active and reset.
    ///
    /// Returns the bank that is now active; the caller performs the actual
    /// system reset (not modeled here so this function stays host-testable).
    pub fn activate<F: FlashDevice>(
        &mut self,
        store: &mut MetadataStore,
        flash: &mut F,
    ) -> Result<Bank, FirmwareError> {
        if self.state != UpdateState::Complete {
            return Err(FirmwareError::NotComplete);
        }
        let target = self.ctx.as_ref().expect("complete state implies ctx").target;
        store.set_active_bank(target, flash)?;
        self.ctx = None;
        self.state = UpdateState::Idle;
        Ok(target)
    }

    pub fn rollback<F: FlashDevice>(
        &mut self,
        store: &mut MetadataStore,
        flash: &mut F,
    ) -> Result<Bank, FirmwareError> {
        store.trigger_rollback(flash)?;
        Ok(store.current().active_bank)
    }

    pub fn cancel_update<F: FlashDevice>(&mut self, store: &mut MetadataStore, flash: &mut F) -> Result<(), FirmwareError> {
        if self.state == UpdateState::Idle {
            return Ok(());
        }
        if let Some(ctx) = &self.ctx {
            store.mark_bank_invalid(ctx.target, flash)?;
        }
        store.clear_update_in_progress(flash)?;
        self.ctx = None;
        self.state = UpdateState::Idle;
        Ok(())
    }

    /// Boot-time protocol (spec §4.4): call once at application startup,
    /// before [`Self::confirm_boot`]. Returns `true` if a reboot into a
    /// different bank is required (caller performs the actual reset).
    pub fn run_boot_protocol<F: FlashDevice>(
        store: &mut MetadataStore,
        flash: &mut F,
    ) -> Result<bool, FirmwareError> {
        let active = store.current().active_bank;

        if !store.current().bank(active).valid {
            store.trigger_rollback(flash)?;
            return Ok(true);
        }

        let new_count = store.increment_boot_count(flash)?;
        if new_count > crate::metadata::MAX_BOOT_ATTEMPTS {
            store.mark_bank_invalid(active, flash)?;
            store.trigger_rollback(flash)?;
            return Ok(true);
        }

        if store.current().update_in_progress {
            store.clear_update_in_progress(flash)?;
        }

        Ok(false)
    }

    /// Confirms that the active bank booted successfully; resets its boot
    /// counter. Must be called after essential subsystems initialize and
    /// within the watchdog window, or the hardware will reset and count
    /// another boot attempt (spec §4.4, §5).
    pub fn confirm_boot<F: FlashDevice>(
        store: &mut MetadataStore,
        flash: &mut F,
    ) -> Result<(), FirmwareError> {
        store.reset_boot_count(flash)?;
        Ok(())
    }
}

impl Default for FirmwareManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::flash::SimFlash;

    fn version_string(s: &str) -> [u8; 32] {
        let mut buf = [0u8; 32];
        let bytes = s.as_bytes();
        buf[..bytes.len()].copy_from_slice(bytes);
        buf
    }

    #[test]
    fn clean_update_activates_opposite_bank() {
        let mut flash = SimFlash::new();
        let mut store = MetadataStore::open(&mut flash).unwrap();
        let mut mgr = FirmwareManager::new();

        let image: heapless::Vec<u8, 4096> = (0u8..=255).cycle().take(1000).collect();
        mgr.start_update(image.len() as u32, &mut store, &mut flash)
            .unwrap();
        assert_eq!(mgr.state(), UpdateState::Receiving);

        for chunk in image.chunks(97) {
            mgr.write_chunk(chunk, &mut flash).unwrap();
        }

        let expected_crc = crate::crc32::crc32(&image);
        mgr.finalize_update(expected_crc, version_string("1.0.0"), &mut store, &mut flash)
            .unwrap();
        assert_eq!(mgr.state(), UpdateState::Complete);

        let active_before = store.current().active_bank;
        let new_active = mgr.activate(&mut store, &mut flash).unwrap();
        assert_ne!(active_before, new_active);
        assert_eq!(store.current().active_bank, new_active);

        let mut readback = [0u8; 1000];
        flash.read(new_active.offset(), &mut readback).unwrap();
        assert_eq!(&readback[..], &image[..]);
    }

    #[test]
    fn wrong_crc_marks_bank_invalid_and_leaves_active_unchanged() {
        let mut flash = SimFlash::new();
        let mut store = MetadataStore::open(&mut flash).unwrap();
        let mut mgr = FirmwareManager::new();
        let active_before = store.current().active_bank;

        mgr.start_update(256, &mut store, &mut flash).unwrap();
        mgr.write_chunk(&[0xAAu8; 256], &mut flash).unwrap();
        let result = mgr.finalize_update(0x1234_5678, version_string("x"), &mut store, &mut flash);

        assert_eq!(result, Err(FirmwareError::CrcMismatch));
        assert_eq!(mgr.state(), UpdateState::Error);
        assert_eq!(store.current().active_bank, active_before);
        let target = active_before.opposite();
        assert!(!store.current().bank(target).valid);
    }

    #[test]
    fn concurrent_start_update_is_rejected() {
        let mut flash = SimFlash::new();
        let mut store = MetadataStore::open(&mut flash).unwrap();
        let mut mgr = FirmwareManager::new();
        mgr.start_update(256, &mut store, &mut flash).unwrap();
        assert_eq!(
            mgr.start_update(256, &mut store, &mut flash),
            Err(FirmwareError::NotIdle)
        );
    }

    #[test]
    fn boot_protocol_rolls_back_invalid_active_bank() {
        let mut flash = SimFlash::new();
        let mut store = MetadataStore::open(&mut flash).unwrap();
        // Make bank A (active) invalid and bank B valid, simulating a bad flash.
        store.mark_bank_valid(Bank::B, 1, 1, [0u8; 32], &mut flash).unwrap();
        store.mark_bank_invalid(Bank::A, &mut flash).unwrap();

        let needs_reboot = FirmwareManager::run_boot_protocol(&mut store, &mut flash).unwrap();
        assert!(needs_reboot);
        assert_eq!(store.current().active_bank, Bank::B);
    }

    #[test]
    fn auto_rollback_after_max_boot_attempts() {
        let mut flash = SimFlash::new();
        let mut store = MetadataStore::open(&mut flash).unwrap();
        store.mark_bank_valid(Bank::B, 1, 1, [0u8; 32], &mut flash).unwrap();
        store.set_active_bank(Bank::B, &mut flash).unwrap();

        let mut rebooted = false;
        for _ in 0..(crate::metadata::MAX_BOOT_ATTEMPTS as u32 + 1) {
            rebooted = FirmwareManager::run_boot_protocol(&mut store, &mut flash).unwrap();
            if rebooted {
                break;
            }
        }
        assert!(rebooted);
        assert_eq!(store.current().active_bank, Bank::A);
        assert!(store.current().rollback_occurred);
    }

    #[test]
    fn start_update_erases_the_full_bank_not_just_the_image_size() {
        let mut flash = SimFlash::new();
        let mut store = MetadataStore::open(&mut flash).unwrap();
        let mut mgr = FirmwareManager::new();
        let target = store.current().active_bank.opposite();

        // Leave stale bytes in the tail of the target bank, past where a
        // small image's own CRC coverage would ever reach.
        flash
            .program(target.offset(), &[0xAAu8; crate::layout::FLASH_PAGE_SIZE as usize])
            .unwrap();
        let tail_offset = target.offset() + crate::layout::FW_BANK_SIZE - crate::layout::FLASH_PAGE_SIZE;
        flash.program(tail_offset, &[0xAAu8; crate::layout::FLASH_PAGE_SIZE as usize]).unwrap();

        mgr.start_update(256, &mut store, &mut flash).unwrap();

        let mut tail = [0u8; crate::layout::FLASH_PAGE_SIZE as usize];
        flash.read(tail_offset, &mut tail).unwrap();
        assert!(tail.iter().all(|&b| b == 0xFF), "stale bytes survived in the bank tail");
    }
}
