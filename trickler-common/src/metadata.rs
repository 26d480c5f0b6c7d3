// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Double-buffered firmware metadata record and store.
//!
//! Two 4 KiB sectors hold the same logical record at different sequence
//! numbers; the store always writes the non-current sector and reads back
//! before trusting the new record, so a power cut at any point during a
//! write leaves the previous record intact in the other sector.

use crate::crc32::crc32;
use crate::flash::FlashDevice;
use crate::layout::{Bank, FLASH_PAGE_SIZE, METADATA_A_OFFSET, METADATA_B_OFFSET};

pub const METADATA_MAGIC: u32 = 0x4F54_4D55;
pub const METADATA_VERSION: u32 = 1;
pub const MAX_BOOT_ATTEMPTS: u8 = 3;

const VALID: u8 = 0xFF;
const INVALID: u8 = 0x00;
const VERSION_STRING_LEN: usize = 32;
const RESERVED_LEN: usize = 128;

/// Per-bank fields of the metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankRecord {
    pub crc32: u32,
    pub size: u32,
    pub version_string: [u8; VERSION_STRING_LEN],
    pub boot_count: u8,
    pub valid: bool,
}

impl BankRecord {
    const ENCODED_LEN: usize = 4 + 4 + VERSION_STRING_LEN + 1 + 1;

    const fn empty() -> Self {
        Self {
            crc32: 0,
            size: 0,
            version_string: [0u8; VERSION_STRING_LEN],
            boot_count: 0,
            valid: false,
        }
    }

    fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.crc32.to_le_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..8 + VERSION_STRING_LEN].copy_from_slice(&self.version_string);
        out[8 + VERSION_STRING_LEN] = self.boot_count;
        out[9 + VERSION_STRING_LEN] = if self.valid { VALID } else { INVALID };
    }

    fn decode(buf: &[u8]) -> Self {
        let mut version_string = [0u8; VERSION_STRING_LEN];
        version_string.copy_from_slice(&buf[8..8 + VERSION_STRING_LEN]);
        Self {
            crc32: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            size: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            version_string,
            boot_count: buf[8 + VERSION_STRING_LEN],
            valid: buf[9 + VERSION_STRING_LEN] == VALID,
        }
    }
}

/// The firmware metadata record (spec §3.2 / §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub sequence: u32,
    pub active_bank: Bank,
    pub bank_a: BankRecord,
    pub bank_b: BankRecord,
    pub update_in_progress: bool,
    pub update_target: Option<Bank>,
    pub rollback_occurred: bool,
    pub rollback_count: u8,
}

impl Metadata {
    /// Total encoded size, including the trailing CRC. Must fit in one sector.
    pub const ENCODED_LEN: usize =
        4 + 4 + 4 + 1 + 2 * BankRecord::ENCODED_LEN + 1 + 1 + 1 + 1 + RESERVED_LEN + 4;

    pub fn factory_default() -> Self {
        Self {
            sequence: 1,
            active_bank: Bank::A,
            bank_a: BankRecord {
                valid: true,
                ..BankRecord::empty()
            },
            bank_b: BankRecord::empty(),
            update_in_progress: false,
            update_target: None,
            rollback_occurred: false,
            rollback_count: 0,
        }
    }

    pub fn bank(&self, bank: Bank) -> &BankRecord {
        match bank {
            Bank::A => &self.bank_a,
            Bank::B => &self.bank_b,
        }
    }

    pub fn bank_mut(&mut self, bank: Bank) -> &mut BankRecord {
        match bank {
            Bank::A => &mut self.bank_a,
            Bank::B => &mut self.bank_b,
        }
    }

    fn encode(&self, out: &mut [u8; Self::ENCODED_LEN]) {
        let mut pos = 0;
        out[pos..pos + 4].copy_from_slice(&METADATA_MAGIC.to_le_bytes());
        pos += 4;
        out[pos..pos + 4].copy_from_slice(&METADATA_VERSION.to_le_bytes());
        pos += 4;
        out[pos..pos + 4].copy_from_slice(&self.sequence.to_le_bytes());
        pos += 4;
        out[pos] = self.active_bank.as_index() as u8;
        pos += 1;
        self.bank_a.encode(&mut out[pos..pos + BankRecord::ENCODED_LEN]);
        pos += BankRecord::ENCODED_LEN;
        self.bank_b.encode(&mut out[pos..pos + BankRecord::ENCODED_LEN]);
        pos += BankRecord::ENCODED_LEN;
        out[pos] = if self.update_in_progress { VALID } else { INVALID };
        pos += 1;
        out[pos] = match self.update_target {
            Some(Bank::A) => 0,
            Some(Bank::B) => 1,
            None => 0xFF,
        };
        pos += 1;
        out[pos] = if self.rollback_occurred { VALID } else { INVALID };
        pos += 1;
        out[pos] = self.rollback_count;
        pos += 1;
        // reserved bytes stay zeroed
        pos += RESERVED_LEN;
        let crc = crc32(&out[..pos]);
        out[pos..pos + 4].copy_from_slice(&crc.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::ENCODED_LEN {
            return None;
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if magic != METADATA_MAGIC || version != METADATA_VERSION {
            return None;
        }
        let crc_offset = Self::ENCODED_LEN - 4;
        let stored_crc = u32::from_le_bytes(
            buf[crc_offset..crc_offset + 4].try_into().unwrap(),
        );
        if crc32(&buf[..crc_offset]) != stored_crc {
            return None;
        }
        let sequence = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let active_bank = Bank::from_index(buf[12] as usize)?;
        let mut pos = 13;
        let bank_a = BankRecord::decode(&buf[pos..pos + BankRecord::ENCODED_LEN]);
        pos += BankRecord::ENCODED_LEN;
        let bank_b = BankRecord::decode(&buf[pos..pos + BankRecord::ENCODED_LEN]);
        pos += BankRecord::ENCODED_LEN;
        let update_in_progress = buf[pos] == VALID;
        pos += 1;
        let update_target = match buf[pos] {
            0 => Some(Bank::A),
            1 => Some(Bank::B),
            _ => None,
        };
        pos += 1;
        let rollback_occurred = buf[pos] == VALID;
        pos += 1;
        let rollback_count = buf[pos];

        Some(Self {
            sequence,
            active_bank,
            bank_a,
            bank_b,
            update_in_progress,
            update_target,
            rollback_occurred,
            rollback_count,
        })
    }
}

const _: () = assert!(Metadata::ENCODED_LEN <= crate::layout::METADATA_SECTOR_SIZE as usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataError {
    Flash(crate::flash::FlashError),
    BothSectorsInvalid,
    NoValidOppositeBank,
    ReadBackMismatch,
}

impl From<crate::flash::FlashError> for MetadataError {
    fn from(e: crate::flash::FlashError) -> Self {
        MetadataError::Flash(e)
    }
}

/// Which physical sector (A or B) currently holds the higher sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sector {
    A,
    B,
}

impl Sector {
    fn offset(self) -> u32 {
        match self {
            Sector::A => METADATA_A_OFFSET,
            Sector::B => METADATA_B_OFFSET,
        }
    }

    fn opposite(self) -> Sector {
        match self {
            Sector::A => Sector::B,
            Sector::B => Sector::A,
        }
    }
}

/// Manages the two metadata sectors for a single [`FlashDevice`].
pub struct MetadataStore {
    current: Metadata,
    current_sector: Sector,
}

impl MetadataStore {
    /// Reads both sectors, selecting the highest-sequence valid record, or
    /// initializing both sectors to factory defaults if neither validates.
    pub fn open<F: FlashDevice>(flash: &mut F) -> Result<Self, MetadataError> {
        let a = Self::read_sector(flash, Sector::A)?;
        let b = Self::read_sector(flash, Sector::B)?;

        match (a, b) {
            (Some(a), Some(b)) => {
                if a.sequence >= b.sequence {
                    Ok(Self {
                        current: a,
                        current_sector: Sector::A,
                    })
                } else {
                    Ok(Self {
                        current: b,
                        current_sector: Sector::B,
                    })
                }
            }
            (Some(a), None) => Ok(Self {
                current: a,
                current_sector: Sector::A,
            }),
            (None, Some(b)) => Ok(Self {
                current: b,
                current_sector: Sector::B,
            }),
            (None, None) => {
                let defaults = Metadata::factory_default();
                let mut store = Self {
                    current: defaults,
                    current_sector: Sector::B, // forces the first write to land on A
                };
                store.write(defaults, flash)?;
                // write the same record to the other sector too, so both are valid
                store.write(defaults, flash)?;
                Ok(store)
            }
        }
    }

    fn read_sector<F: FlashDevice>(
        flash: &mut F,
        sector: Sector,
    ) -> Result<Option<Metadata>, MetadataError> {
        let mut buf = [0u8; Metadata::ENCODED_LEN];
        flash.read(sector.offset(), &mut buf)?;
        Ok(Metadata::decode(&buf))
    }

    pub fn current(&self) -> &Metadata {
        &self.current
    }

    /// Writes `record` (with an incremented sequence number) to the sector
    /// not currently holding the latest data, then reads it back to confirm.
    pub fn write<F: FlashDevice>(
        &mut self,
        mut record: Metadata,
        flash: &mut F,
    ) -> Result<(), MetadataError> {
        record.sequence = self.current.sequence.wrapping_add(1);

        let target_sector = self.current_sector.opposite();
        let mut encoded = [0u8; Metadata::ENCODED_LEN];
        record.encode(&mut encoded);

        flash.erase_sector_raw(target_sector.offset())?;

        let mut page = [0xFFu8; FLASH_PAGE_SIZE as usize];
        let mut offset = target_sector.offset();
        let mut written = 0usize;
        while written < encoded.len() {
            let n = (encoded.len() - written).min(page.len());
            page.fill(0xFF);
            page[..n].copy_from_slice(&encoded[written..written + n]);
            flash.program_page_raw(offset, &page)?;
            offset += page.len() as u32;
            written += n;
        }

        let read_back = Self::read_sector(flash, target_sector)?;
        if read_back != Some(record) {
            return Err(MetadataError::ReadBackMismatch);
        }

        self.current = record;
        self.current_sector = target_sector;
        Ok(())
    }

    // --- Convenience operations (original_source/bootloader/metadata.c) ---

    pub fn set_active_bank<F: FlashDevice>(
        &mut self,
        bank: Bank,
        flash: &mut F,
    ) -> Result<(), MetadataError> {
        let mut record = self.current;
        record.active_bank = bank;
        self.write(record, flash)
    }

    pub fn increment_boot_count<F: FlashDevice>(
        &mut self,
        flash: &mut F,
    ) -> Result<u8, MetadataError> {
        let mut record = self.current;
        let bank = record.active_bank;
        record.bank_mut(bank).boot_count = record.bank_mut(bank).boot_count.saturating_add(1);
        let count = record.bank(bank).boot_count;
        self.write(record, flash)?;
        Ok(count)
    }

    pub fn reset_boot_count<F: FlashDevice>(&mut self, flash: &mut F) -> Result<(), MetadataError> {
        let mut record = self.current;
        let bank = record.active_bank;
        if record.bank(bank).boot_count == 0 {
            return Ok(());
        }
        record.bank_mut(bank).boot_count = 0;
        self.write(record, flash)
    }

    pub fn mark_bank_valid<F: FlashDevice>(
        &mut self,
        bank: Bank,
        crc32_value: u32,
        size: u32,
        version_string: [u8; VERSION_STRING_LEN],
        flash: &mut F,
    ) -> Result<(), MetadataError> {
        let mut record = self.current;
        let b = record.bank_mut(bank);
        b.valid = true;
        b.crc32 = crc32_value;
        b.size = size;
        b.version_string = version_string;
        b.boot_count = 0;
        self.write(record, flash)
    }

    pub fn mark_bank_invalid<F: FlashDevice>(
        &mut self,
        bank: Bank,
        flash: &mut F,
    ) -> Result<(), MetadataError> {
        let mut record = self.current;
        let b = record.bank_mut(bank);
        b.valid = false;
        b.boot_count = MAX_BOOT_ATTEMPTS;
        self.write(record, flash)
    }

    pub fn set_update_in_progress<F: FlashDevice>(
        &mut self,
        target: Bank,
        flash: &mut F,
    ) -> Result<(), MetadataError> {
        let mut record = self.current;
        record.update_in_progress = true;
        record.update_target = Some(target);
        self.write(record, flash)
    }

    pub fn clear_update_in_progress<F: FlashDevice>(
        &mut self,
        flash: &mut F,
    ) -> Result<(), MetadataError> {
        let mut record = self.current;
        if !record.update_in_progress {
            return Ok(());
        }
        record.update_in_progress = false;
        self.write(record, flash)
    }

    /// Switches `active_bank` to the opposite bank if it's valid, marks the
    /// old active bank invalid (boot_count saturated), and records the
    /// rollback. Fails if the opposite bank is not valid.
    pub fn trigger_rollback<F: FlashDevice>(
        &mut self,
        flash: &mut F,
    ) -> Result<(), MetadataError> {
        let mut record = self.current;
        let old_active = record.active_bank;
        let candidate = old_active.opposite();
        if !record.bank(candidate).valid {
            return Err(MetadataError::NoValidOppositeBank);
        }
        record.bank_mut(old_active).valid = false;
        record.bank_mut(old_active).boot_count = MAX_BOOT_ATTEMPTS;
        record.active_bank = candidate;
        record.rollback_occurred = true;
        record.rollback_count = record.rollback_count.saturating_add(1);
        self.write(record, flash)
    }

    pub fn did_rollback_occur(&self) -> bool {
        self.current.rollback_occurred
    }

    pub fn clear_rollback_flag<F: FlashDevice>(
        &mut self,
        flash: &mut F,
    ) -> Result<(), MetadataError> {
        let mut record = self.current;
        if !record.rollback_occurred {
            return Ok(());
        }
        record.rollback_occurred = false;
        self.write(record, flash)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::flash::SimFlash;

    #[test]
    fn first_boot_initializes_factory_defaults() {
        let mut flash = SimFlash::new();
        let store = MetadataStore::open(&mut flash).unwrap();
        assert_eq!(store.current().active_bank, Bank::A);
        assert!(store.current().bank_a.valid);
        assert!(!store.current().bank_b.valid);
    }

    #[test]
    fn write_then_reopen_round_trips() {
        let mut flash = SimFlash::new();
        let mut store = MetadataStore::open(&mut flash).unwrap();
        store
            .mark_bank_valid(Bank::B, 0xDEAD_BEEF, 12345, [0u8; 32], &mut flash)
            .unwrap();

        let reopened = MetadataStore::open(&mut flash).unwrap();
        assert_eq!(reopened.current().bank_b.crc32, 0xDEAD_BEEF);
        assert_eq!(reopened.current().bank_b.size, 12345);
        assert!(reopened.current().bank_b.valid);
    }

    #[test]
    fn rollback_switches_active_bank_and_invalidates_old() {
        let mut flash = SimFlash::new();
        let mut store = MetadataStore::open(&mut flash).unwrap();
        store
            .mark_bank_valid(Bank::B, 1, 1, [0u8; 32], &mut flash)
            .unwrap();
        store.trigger_rollback(&mut flash).unwrap();
        assert_eq!(store.current().active_bank, Bank::B);
        assert!(!store.current().bank_a.valid);
        assert!(store.current().rollback_occurred);
        assert_eq!(store.current().rollback_count, 1);
    }

    #[test]
    fn rollback_fails_without_valid_opposite() {
        let mut flash = SimFlash::new();
        let mut store = MetadataStore::open(&mut flash).unwrap();
        assert_eq!(
            store.trigger_rollback(&mut flash),
            Err(MetadataError::NoValidOppositeBank)
        );
    }

    #[test]
    fn power_cut_mid_write_preserves_prior_record() {
        let mut flash = SimFlash::new();
        let mut store = MetadataStore::open(&mut flash).unwrap();
        let prior = *store.current();

        // Cut power after a handful of bytes into the next sector write.
        flash.power_cut_after_bytes = Some(flash.raw().len() as u32); // effectively: writes so far
        let bytes_before = 0u32;
        flash.power_cut_after_bytes = Some(bytes_before + 8);

        let err = store.mark_bank_valid(Bank::B, 1, 1, [0u8; 32], &mut flash);
        assert!(err.is_err());

        flash.power_cut_after_bytes = None;
        let reopened = MetadataStore::open(&mut flash).unwrap();
        assert_eq!(*reopened.current(), prior);
    }

    #[test]
    fn boot_count_increments_and_resets() {
        let mut flash = SimFlash::new();
        let mut store = MetadataStore::open(&mut flash).unwrap();
        assert_eq!(store.increment_boot_count(&mut flash).unwrap(), 1);
        assert_eq!(store.increment_boot_count(&mut flash).unwrap(), 2);
        store.reset_boot_count(&mut flash).unwrap();
        assert_eq!(store.current().bank_a.boot_count, 0);
    }
}
