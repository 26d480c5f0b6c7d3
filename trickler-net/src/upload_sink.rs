// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! HTTP upload sink (spec §4.5): a thin adapter between an external HTTP
//! server's POST handler and [`FirmwareManager`]'s prepare/stream/validate
//! pipeline. `begin`/`feed`/`end`/`cancel` map directly onto
//! `start_update`/`write_chunk`/`finalize_update`/`cancel_update`.

use trickler_common::flash::FlashDevice;
use trickler_common::metadata::MetadataStore;
use trickler_common::{FirmwareError, FirmwareManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadError {
    Firmware(FirmwareError),
    VersionTooLong,
}

impl From<FirmwareError> for UploadError {
    fn from(e: FirmwareError) -> Self {
        UploadError::Firmware(e)
    }
}

/// Carries just the version-string staging the sink itself owns; the
/// firmware manager, metadata store, and flash device are injected per call
/// so the same manager can be shared with the boot protocol and the
/// download source (spec §5: only one HTTP session may be active).
#[derive(Default)]
pub struct UploadSink {
    version_string: [u8; 32],
}

impl UploadSink {
    pub fn new() -> Self {
        Self { version_string: [0u8; 32] }
    }

    /// §6.3 `POST /upload`: `X-Firmware-Size`/`X-Firmware-Version` headers
    /// become `total_size`/`version`.
    pub fn begin<F: FlashDevice>(
        &mut self,
        manager: &mut FirmwareManager,
        store: &mut MetadataStore,
        flash: &mut F,
        total_size: u32,
        version: Option<&str>,
    ) -> Result<(), UploadError> {
        self.version_string = [0u8; 32];
        if let Some(v) = version {
            let bytes = v.as_bytes();
            if bytes.len() > self.version_string.len() {
                return Err(UploadError::VersionTooLong);
            }
            self.version_string[..bytes.len()].copy_from_slice(bytes);
        }
        manager.start_update(total_size, store, flash)?;
        Ok(())
    }

    pub fn feed<F: FlashDevice>(
        &mut self,
        manager: &mut FirmwareManager,
        flash: &mut F,
        bytes: &[u8],
    ) -> Result<(), UploadError> {
        manager.write_chunk(bytes, flash)?;
        Ok(())
    }

    /// §6.3: "On completion the server calls `finalize_update` with the
    /// expected CRC."
    pub fn end<F: FlashDevice>(
        &mut self,
        manager: &mut FirmwareManager,
        store: &mut MetadataStore,
        flash: &mut F,
        expected_crc32: u32,
    ) -> Result<(), UploadError> {
        manager.finalize_update(expected_crc32, self.version_string, store, flash)?;
        Ok(())
    }

    pub fn cancel<F: FlashDevice>(
        &mut self,
        manager: &mut FirmwareManager,
        store: &mut MetadataStore,
        flash: &mut F,
    ) -> Result<(), UploadError> {
        manager.cancel_update(store, flash)?;
        Ok(())
    }

    /// `(bytes_received, total_bytes)` for the status endpoint.
    pub fn progress(&self, manager: &FirmwareManager) -> (u32, u32) {
        let status = manager.status();
        (status.bytes_received, status.expected_size)
    }
}
